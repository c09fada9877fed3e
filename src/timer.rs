use chrono::Utc;
use std::{
    ops::ControlFlow,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::task::JoinHandle;

/// Snapshot of a question countdown, all times in epoch milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerState {
    pub started_at_ms: u64,
    pub now_ms: u64,
    pub limit_ms: u64,
    pub unlock_threshold_ms: u64,
}

impl TimerState {
    pub fn elapsed_ms(&self) -> u64 {
        self.now_ms.saturating_sub(self.started_at_ms)
    }

    pub fn remaining_ms(&self) -> u64 {
        self.limit_ms.saturating_sub(self.elapsed_ms())
    }

    /// Climbs from 0 to 100 as the unlock threshold approaches.
    pub fn unlock_progress(&self) -> f64 {
        if self.unlock_threshold_ms == 0 {
            return 100.0;
        }
        (self.elapsed_ms() as f64 / self.unlock_threshold_ms as f64 * 100.0).min(100.0)
    }

    /// Falls from 100 to 0 as the limit approaches.
    pub fn remaining_progress(&self) -> f64 {
        if self.limit_ms == 0 {
            return 0.0;
        }
        (100.0 - self.elapsed_ms() as f64 / self.limit_ms as f64 * 100.0).max(0.0)
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlock_progress() >= 100.0
    }

    pub fn is_expired(&self) -> bool {
        self.elapsed_ms() >= self.limit_ms
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running(TimerState),
    Expired(TimerState),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tick {
    /// Still counting down.
    Running(TimerState),
    /// The limit was reached on this tick. Reported once per episode.
    Expired(TimerState),
    /// Idle or already expired.
    Stopped,
}

/// Single-question countdown: `Idle -> Running -> Expired`, reset to `Idle`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Countdown {
    limit_ms: u64,
    unlock_threshold_ms: u64,
    phase: Phase,
}

impl Countdown {
    pub fn new(limit_ms: u64, unlock_threshold_ms: u64) -> Countdown {
        Countdown {
            limit_ms,
            unlock_threshold_ms,
            phase: Phase::Idle,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> Option<TimerState> {
        match self.phase {
            Phase::Idle => None,
            Phase::Running(state) | Phase::Expired(state) => Some(state),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.phase, Phase::Running(_))
    }

    pub fn start(&mut self, now_ms: u64) {
        self.phase = Phase::Running(TimerState {
            started_at_ms: now_ms,
            now_ms,
            limit_ms: self.limit_ms,
            unlock_threshold_ms: self.unlock_threshold_ms,
        });
    }

    pub fn tick(&mut self, now_ms: u64) -> Tick {
        let state = match self.phase {
            Phase::Running(state) => TimerState { now_ms, ..state },
            Phase::Idle | Phase::Expired(_) => return Tick::Stopped,
        };

        if state.is_expired() {
            self.phase = Phase::Expired(state);
            Tick::Expired(state)
        } else {
            self.phase = Phase::Running(state);
            Tick::Running(state)
        }
    }

    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
    }
}

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        Utc::now().timestamp_millis().max(0) as u64
    }
}

/// Something re-evaluated on every tick of [`drive`].
pub trait Ticking: Send {
    fn on_tick(&mut self, now_ms: u64) -> ControlFlow<()>;
}

/// Ticks `target` every `period` until it breaks or the handle is aborted.
pub fn drive<T, C>(period: Duration, clock: C, target: Arc<Mutex<T>>) -> JoinHandle<()>
where
    T: Ticking + 'static,
    C: Clock + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);

        loop {
            interval.tick().await;

            let flow = match target.lock() {
                Ok(mut target) => target.on_tick(clock.now_ms()),
                Err(_err) => {
                    log::warn!("ticker target lock poisoned, stopping");
                    ControlFlow::Break(())
                }
            };

            if flow.is_break() {
                break;
            }
        }
    })
}
