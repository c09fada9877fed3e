use rand::{seq::SliceRandom, Rng};
use serde::Serialize;
use std::{
    collections::{BTreeSet, VecDeque},
    ops::ControlFlow,
};

use crate::models::{Difficulty, TeamResult, TimerConfig, Topic};
use crate::timer::{Countdown, Tick, Ticking, TimerState};

pub const TOTAL_QUESTIONS: u32 = 10;
pub const MAX_PASSES: u32 = 2;
const WORD_POOL: usize = 50;

#[derive(Clone, Debug)]
pub struct Playing {
    topic: Topic,
    words: VecDeque<String>,
    correct: u32,
    passes: u32,
    questions: u32,
    started_at_ms: u64,
    real_started_at_ms: u64,
    countdown: Countdown,
}

impl Playing {
    fn timer_at(&self, now_ms: u64) -> Option<TimerState> {
        self.countdown
            .state()
            .map(|state| TimerState { now_ms, ..state })
    }

    fn next_question(&mut self, now_ms: u64) {
        self.words.pop_front();
        self.countdown.reset();
        self.countdown.start(now_ms);
    }
}

#[derive(Clone, Debug)]
pub enum QuizStep {
    TopicSelect,
    Ready { topic: Topic, words: VecDeque<String> },
    Playing(Box<Playing>),
    Result(TeamResult),
}

/// A speed quiz played by several teams in turn, one topic per team.
#[derive(Clone, Debug)]
pub struct QuizGame {
    team_count: usize,
    current_team: usize,
    results: Vec<TeamResult>,
    taken_topics: BTreeSet<String>,
    timer: TimerConfig,
    step: QuizStep,
    finished: Option<TeamResult>,
}

impl QuizGame {
    pub fn new(team_count: usize, timer: TimerConfig) -> QuizGame {
        QuizGame {
            team_count: team_count.max(1),
            current_team: 0,
            results: Vec::new(),
            taken_topics: BTreeSet::new(),
            timer,
            step: QuizStep::TopicSelect,
            finished: None,
        }
    }

    pub fn step(&self) -> &QuizStep {
        &self.step
    }

    pub fn current_team(&self) -> usize {
        self.current_team
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.step, QuizStep::Playing(_))
    }

    pub fn select_topic<R: Rng>(&mut self, topic: &Topic, rng: &mut R) -> bool {
        if !matches!(self.step, QuizStep::TopicSelect)
            || topic.words.is_empty()
            || self.taken_topics.contains(&topic.id)
        {
            return false;
        }

        let mut words = topic.words.clone();
        words.shuffle(rng);
        words.truncate(WORD_POOL);

        self.taken_topics.insert(topic.id.clone());
        self.step = QuizStep::Ready {
            topic: topic.clone(),
            words: words.into(),
        };
        true
    }

    pub fn start_round(&mut self, now_ms: u64) -> bool {
        let (topic, words) = match &self.step {
            QuizStep::Ready { topic, words } => (topic.clone(), words.clone()),
            _ => return false,
        };

        let mut countdown = Countdown::new(self.timer.limit_ms, self.timer.unlock_ms);
        countdown.start(now_ms);

        self.step = QuizStep::Playing(Box::new(Playing {
            started_at_ms: now_ms.saturating_sub(topic.difficulty.handicap_ms()),
            real_started_at_ms: now_ms,
            topic,
            words,
            correct: 0,
            passes: 0,
            questions: 0,
            countdown,
        }));
        true
    }

    pub fn correct(&mut self, now_ms: u64) -> bool {
        self.answer(true, now_ms)
    }

    /// Skips the word once the pass is unlocked. Counts as a wrong answer.
    pub fn pass(&mut self, now_ms: u64) -> bool {
        let allowed = match &self.step {
            QuizStep::Playing(playing) => {
                playing.passes < MAX_PASSES
                    && playing
                        .timer_at(now_ms)
                        .map_or(false, |timer| timer.is_unlocked())
            }
            _ => false,
        };
        if !allowed {
            return false;
        }

        if let QuizStep::Playing(playing) = &mut self.step {
            playing.passes += 1;
        }
        self.answer(false, now_ms)
    }

    /// Replaces the word without counting an answer and restarts its timer.
    pub fn swap(&mut self, now_ms: u64) -> bool {
        match &mut self.step {
            QuizStep::Playing(playing) if playing.words.len() > 1 => {
                playing.next_question(now_ms);
                true
            }
            _ => false,
        }
    }

    pub fn next_team(&mut self) -> bool {
        match self.step {
            QuizStep::Result(_) if self.current_team + 1 < self.team_count => {
                self.current_team += 1;
                self.step = QuizStep::TopicSelect;
                true
            }
            _ => false,
        }
    }

    /// Results ordered by score, then by handicapped time.
    pub fn ranking(&self) -> Vec<TeamResult> {
        let mut ranking = self.results.clone();
        ranking.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then(a.time_taken_ms.cmp(&b.time_taken_ms))
        });
        ranking
    }

    /// The result of a round that just ended, handed out once.
    pub fn take_finished(&mut self) -> Option<TeamResult> {
        self.finished.take()
    }

    fn answer(&mut self, correct: bool, now_ms: u64) -> bool {
        let playing = match &mut self.step {
            QuizStep::Playing(playing) => playing,
            _ => return false,
        };

        if correct {
            playing.correct += 1;
        }
        playing.questions += 1;

        if playing.questions >= TOTAL_QUESTIONS || playing.words.len() <= 1 {
            let result = TeamResult {
                team_index: self.current_team,
                time_taken_ms: now_ms.saturating_sub(playing.started_at_ms),
                real_time_taken_ms: now_ms.saturating_sub(playing.real_started_at_ms),
                score: playing.correct,
                topic_title: playing.topic.title.clone(),
                difficulty: playing.topic.difficulty,
            };
            self.results.push(result.clone());
            self.finished = Some(result.clone());
            self.step = QuizStep::Result(result);
        } else {
            playing.next_question(now_ms);
        }
        true
    }

    pub fn view(&self, now_ms: u64) -> QuizView {
        let mut view = QuizView {
            step: QuizPhase::TopicSelect,
            team_count: self.team_count,
            current_team: self.current_team,
            taken_topics: self.taken_topics.iter().cloned().collect(),
            topic: None,
            difficulty: None,
            word: None,
            question: 0,
            correct: 0,
            passes_left: MAX_PASSES,
            pass_unlocked: false,
            unlock_progress: 0.0,
            remaining_progress: 100.0,
            elapsed_ms: 0,
            result: None,
            ranking: self.ranking(),
        };

        match &self.step {
            QuizStep::TopicSelect => {}
            QuizStep::Ready { topic, .. } => {
                view.step = QuizPhase::Ready;
                view.topic = Some(topic.title.clone());
                view.difficulty = Some(topic.difficulty);
            }
            QuizStep::Playing(playing) => {
                view.step = QuizPhase::Playing;
                view.topic = Some(playing.topic.title.clone());
                view.difficulty = Some(playing.topic.difficulty);
                view.word = playing.words.front().cloned();
                view.question = playing.questions + 1;
                view.correct = playing.correct;
                view.passes_left = MAX_PASSES - playing.passes;
                view.elapsed_ms = now_ms.saturating_sub(playing.started_at_ms);

                if let Some(timer) = playing.timer_at(now_ms) {
                    view.pass_unlocked = timer.is_unlocked() && playing.passes < MAX_PASSES;
                    view.unlock_progress = timer.unlock_progress();
                    view.remaining_progress = timer.remaining_progress();
                }
            }
            QuizStep::Result(result) => {
                view.step = QuizPhase::Result;
                view.topic = Some(result.topic_title.clone());
                view.difficulty = Some(result.difficulty);
                view.correct = result.score;
                view.elapsed_ms = result.time_taken_ms;
                view.result = Some(result.clone());
            }
        }

        view
    }
}

impl Ticking for QuizGame {
    /// A question that runs out of time counts as a wrong answer.
    fn on_tick(&mut self, now_ms: u64) -> ControlFlow<()> {
        let tick = match &mut self.step {
            QuizStep::Playing(playing) => playing.countdown.tick(now_ms),
            _ => return ControlFlow::Break(()),
        };

        if let Tick::Expired(_) = tick {
            log::debug!("question timed out team:{}", self.current_team);
            self.answer(false, now_ms);
        }

        if self.is_playing() {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(())
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuizPhase {
    TopicSelect,
    Ready,
    Playing,
    Result,
}

#[derive(Clone, Debug, Serialize)]
pub struct QuizView {
    pub step: QuizPhase,
    pub team_count: usize,
    pub current_team: usize,
    pub taken_topics: Vec<String>,
    pub topic: Option<String>,
    pub difficulty: Option<Difficulty>,
    pub word: Option<String>,
    pub question: u32,
    pub correct: u32,
    pub passes_left: u32,
    pub pass_unlocked: bool,
    pub unlock_progress: f64,
    pub remaining_progress: f64,
    pub elapsed_ms: u64,
    pub result: Option<TeamResult>,
    pub ranking: Vec<TeamResult>,
}
