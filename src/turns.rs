use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::models::{random_id, GameMode, Side, TurnRecord};

/// Longest run of one side the random mode allows.
const MAX_STREAK: usize = 3;

/// Number of recent turns the random mode balances over.
const BALANCE_WINDOW: usize = 20;

const BALANCE_STEP: f64 = 0.05;
const MIN_CHANCE: f64 = 0.2;
const MAX_CHANCE: f64 = 0.8;

pub fn next_sequential(last: Option<Side>) -> Side {
    match last {
        None => Side::Red,
        Some(side) => side.opposite(),
    }
}

/// Picks a side at random while keeping the game fair.
///
/// `history` is ordered newest first. Three identical turns in a row force the
/// other side; otherwise the chance of red shrinks by 5% for every red turn it
/// is ahead of blue over the last 20 turns, clamped to 20%..80%.
pub fn next_constrained_random<R: Rng>(history: &[TurnRecord], rng: &mut R) -> Side {
    if history.len() >= MAX_STREAK {
        let newest = history[0].side;
        if history[..MAX_STREAK].iter().all(|turn| turn.side == newest) {
            return newest.opposite();
        }
    }

    if rng.gen::<f64>() < red_chance(history) {
        Side::Red
    } else {
        Side::Blue
    }
}

pub fn red_chance(history: &[TurnRecord]) -> f64 {
    let recent = &history[..history.len().min(BALANCE_WINDOW)];
    let red = recent.iter().filter(|turn| turn.side == Side::Red).count() as f64;
    let blue = recent.len() as f64 - red;

    let chance = 0.5 - (red - blue) * BALANCE_STEP;
    chance.max(MIN_CHANCE).min(MAX_CHANCE)
}

/// Turn history of the tag game, newest first.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct TurnHistory {
    records: Vec<TurnRecord>,
}

impl TurnHistory {
    pub fn last_side(&self) -> Option<Side> {
        self.records.first().map(|turn| turn.side)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn recent(&self, count: usize) -> &[TurnRecord] {
        &self.records[..self.records.len().min(count)]
    }

    pub fn take_turn<R: Rng>(&mut self, mode: GameMode, rng: &mut R) -> TurnRecord {
        let side = match mode {
            GameMode::Sequential => next_sequential(self.last_side()),
            GameMode::Random => next_constrained_random(&self.records, rng),
        };

        let turn = TurnRecord {
            id: random_id(),
            sequence: self.records.len() as u32 + 1,
            side,
        };
        self.records.insert(0, turn.clone());
        turn
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
