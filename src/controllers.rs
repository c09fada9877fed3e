use anyhow::{anyhow, Result};
use chrono::Utc;
use rand::prelude::*;
use ring::hmac;
use serde::Serialize;
use std::{
    collections::{BTreeMap, BTreeSet},
    fs::{File, OpenOptions},
    ops::ControlFlow,
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tokio::task::JoinHandle;

use crate::effects::{Effects, Waveform};
use crate::models::{
    Config, GameMode, Gender, GroupConstraint, MoveRecord, PairConstraint, ResultRecord, Roster,
    SessionId, Student, StudentId, TeamMode, TimerConfig, Topic, TurnRecord,
};
use crate::quiz::{QuizGame, QuizView};
use crate::roulette::{Spin, Wheel};
use crate::scoreboard::{ScoreCue, Scoreboard};
use crate::storage::{self, Persistence};
use crate::teams;
use crate::timer::{self, Clock, Ticking};
use crate::turns::TurnHistory;
use crate::rps;

const SPEECH_LOCALE: &str = "ko-KR";
const RECENT_TURNS: usize = 7;

/// Quiz sessions untouched for this long are dropped.
const SESSION_IDLE_MS: u64 = 3 * 60 * 60 * 1000;

#[derive(Clone, Debug, Serialize)]
pub struct TagView {
    pub turn: Option<TurnRecord>,
    pub total: usize,
    pub recent: Vec<TurnRecord>,
}

#[derive(Clone, Debug, Serialize)]
pub struct Team {
    pub name: &'static str,
    pub members: Vec<Student>,
}

#[derive(Debug, Default)]
struct Classroom {
    roster: Roster,
    wheel: Option<Wheel>,
    tag: TurnHistory,
    rps: Vec<MoveRecord>,
    scoreboard: Option<Scoreboard>,
}

impl Classroom {
    fn wheel(&mut self, penalties: &[String]) -> &mut Wheel {
        self.wheel
            .get_or_insert_with(|| Wheel::new(penalties.iter().cloned()))
    }
}

/// A quiz game that writes every finished round to the results log.
struct RecordedGame {
    session: SessionId,
    game: QuizGame,
    writer: ResultWriter,
}

impl RecordedGame {
    fn record(&mut self) {
        if let Some(result) = self.game.take_finished() {
            log::info!(
                "[QUIZ] round finished team:{} topic:{} score:{}",
                result.team_index,
                result.topic_title,
                result.score
            );

            self.writer.write_in_background(ResultRecord {
                session: hex::encode(&self.session.0),
                team: result.team_index,
                topic: result.topic_title,
                difficulty: result.difficulty,
                score: result.score,
                time_taken_ms: result.time_taken_ms,
                real_time_taken_ms: result.real_time_taken_ms,
                time: Utc::now(),
            });
        }
    }
}

impl Ticking for RecordedGame {
    fn on_tick(&mut self, now_ms: u64) -> ControlFlow<()> {
        let flow = self.game.on_tick(now_ms);
        self.record();
        flow
    }
}

struct QuizSession {
    game: Arc<Mutex<RecordedGame>>,
    ticker: Option<JoinHandle<()>>,
    touched_ms: u64,
}

impl QuizSession {
    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

impl Drop for QuizSession {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}

#[derive(Clone)]
pub struct GameController {
    secret_key: Arc<hmac::Key>,
    persistence: Persistence,
    effects: Arc<dyn Effects>,
    clock: Arc<dyn Clock>,
    timer: TimerConfig,
    penalties: Arc<Vec<String>>,
    topics: Arc<BTreeMap<String, Topic>>,
    classroom: Arc<Mutex<Classroom>>,
    sessions: Arc<Mutex<BTreeMap<SessionId, QuizSession>>>,
    result_writer: ResultWriter,
}

impl GameController {
    /// Builds the controller and loads saved classroom data.
    pub fn new(
        secret_key: hmac::Key,
        config: &Config,
        persistence: Persistence,
        effects: Arc<dyn Effects>,
        clock: Arc<dyn Clock>,
        result_writer: ResultWriter,
    ) -> GameController {
        let topics = config
            .topic
            .iter()
            .map(|topic| (topic.id.clone(), topic.clone()))
            .collect();

        let classroom = Classroom {
            roster: persistence.load(storage::ROSTER).unwrap_or_default(),
            wheel: persistence
                .load::<Vec<String>>(storage::PENALTIES)
                .map(Wheel::new),
            tag: persistence.load(storage::TAG_HISTORY).unwrap_or_default(),
            rps: persistence.load(storage::RPS_HISTORY).unwrap_or_default(),
            scoreboard: None,
        };

        log::info!(
            "loaded classroom students:{} conditions:{} turns:{}",
            classroom.roster.students.len(),
            classroom.roster.pair_conditions.len() + classroom.roster.group_conditions.len(),
            classroom.tag.len()
        );

        GameController {
            secret_key: Arc::new(secret_key),
            persistence,
            effects,
            clock,
            timer: config.timer,
            penalties: Arc::new(config.penalties.clone()),
            topics: Arc::new(topics),
            classroom: Arc::new(Mutex::new(classroom)),
            sessions: Arc::new(Mutex::new(BTreeMap::new())),
            result_writer,
        }
    }

    pub fn create_session(&self) -> SessionId {
        let mut id = [0u8; 16];
        rand::rngs::OsRng.fill(&mut id);
        SessionId(id)
    }

    pub fn decode_session(&self, token: &str) -> Result<SessionId> {
        let mut parts = token.splitn(2, ':');
        let session = parts
            .next()
            .ok_or_else(|| anyhow!("bad session token"))?;
        let session = base64::decode_config(session, base64::URL_SAFE_NO_PAD)?;

        let signature = parts
            .next()
            .ok_or_else(|| anyhow!("bad session token"))?;
        let signature = base64::decode_config(signature, base64::URL_SAFE_NO_PAD)?;

        hmac::verify(&self.secret_key, &session, &signature)
            .map_err(|_err| anyhow!("invalid signature"))?;

        let session = bincode::deserialize(&session)?;
        Ok(session)
    }

    pub fn encode_session(&self, session: &SessionId) -> Result<String> {
        let session = bincode::serialize(session)?;

        let signature = hmac::sign(&self.secret_key, &session);

        let token = format!(
            "{}:{}",
            base64::encode_config(session, base64::URL_SAFE_NO_PAD),
            base64::encode_config(signature, base64::URL_SAFE_NO_PAD),
        );

        Ok(token)
    }

    fn classroom(&self) -> Result<MutexGuard<'_, Classroom>> {
        self.classroom
            .lock()
            .map_err(|_err| anyhow!("couldn't lock classroom"))
    }

    fn sessions(&self) -> Result<MutexGuard<'_, BTreeMap<SessionId, QuizSession>>> {
        self.sessions
            .lock()
            .map_err(|_err| anyhow!("couldn't lock sessions"))
    }

    pub fn tag(&self) -> Result<TagView> {
        let classroom = self.classroom()?;
        Ok(tag_view(&classroom.tag, None))
    }

    pub fn take_turn(&self, mode: GameMode) -> Result<TagView> {
        let mut classroom = self.classroom()?;
        let turn = classroom.tag.take_turn(mode, &mut thread_rng());
        self.persistence
            .save_in_background(storage::TAG_HISTORY, &classroom.tag);

        self.effects.play_tone(800.0, Waveform::Sine, 100);
        self.effects.speak(turn.side.announcement(), SPEECH_LOCALE);

        Ok(tag_view(&classroom.tag, Some(turn)))
    }

    pub fn reset_tag(&self) -> Result<TagView> {
        let mut classroom = self.classroom()?;
        classroom.tag.clear();
        self.persistence
            .save_in_background(storage::TAG_HISTORY, &classroom.tag);

        self.effects.play_tone(800.0, Waveform::Sine, 100);
        Ok(tag_view(&classroom.tag, None))
    }

    pub fn rps_history(&self) -> Result<Vec<MoveRecord>> {
        Ok(self.classroom()?.rps.clone())
    }

    pub fn throw_move(&self) -> Result<MoveRecord> {
        self.effects.play_tone(800.0, Waveform::Triangle, 150);
        self.effects.speak("가위, 바위, 보!", SPEECH_LOCALE);

        let mut classroom = self.classroom()?;
        let record = rps::throw_into(&mut classroom.rps, &mut thread_rng());
        self.persistence
            .save_in_background(storage::RPS_HISTORY, &classroom.rps);
        Ok(record)
    }

    pub fn clear_rps(&self) -> Result<()> {
        let mut classroom = self.classroom()?;
        classroom.rps.clear();
        self.persistence
            .save_in_background(storage::RPS_HISTORY, &classroom.rps);
        Ok(())
    }

    /// The roster with students in name order.
    pub fn roster(&self) -> Result<Roster> {
        let mut roster = self.classroom()?.roster.clone();
        teams::sort_by_name(&mut roster.students);
        Ok(roster)
    }

    pub fn add_student(&self, name: &str, gender: Gender) -> Result<Option<Student>> {
        self.edit_roster(|roster| roster.add_student(name, gender).cloned())
    }

    pub fn remove_student(&self, id: &StudentId) -> Result<Option<Student>> {
        self.edit_roster(|roster| roster.remove_student(id))
    }

    pub fn add_pair(&self, ids: &[StudentId]) -> Result<Option<PairConstraint>> {
        self.edit_roster(|roster| roster.add_pair(ids).cloned())
    }

    pub fn add_group(&self, ids: &[StudentId]) -> Result<Option<GroupConstraint>> {
        self.edit_roster(|roster| roster.add_group(ids).cloned())
    }

    pub fn remove_condition(&self, id: &str) -> Result<bool> {
        let removed = self.edit_roster(|roster| {
            if roster.remove_condition(id) {
                Some(())
            } else {
                None
            }
        })?;
        Ok(removed.is_some())
    }

    /// Applies `edit` and saves the roster when it reports a change.
    fn edit_roster<T, F>(&self, edit: F) -> Result<Option<T>>
    where
        F: FnOnce(&mut Roster) -> Option<T>,
    {
        let mut classroom = self.classroom()?;
        let changed = edit(&mut classroom.roster);
        if changed.is_some() {
            self.persistence
                .save_in_background(storage::ROSTER, &classroom.roster);
        }
        Ok(changed)
    }

    pub fn assign_teams(&self, mode: TeamMode, absent: &[StudentId]) -> Result<Vec<Team>> {
        let absent = absent.iter().cloned().collect::<BTreeSet<_>>();
        let classroom = self.classroom()?;
        let buckets = teams::assign_teams(&classroom.roster, &absent, mode, &mut thread_rng());

        log::info!(
            "[TEAMS] assigned mode:{:?} present:{} sizes:{:?}",
            mode,
            buckets.iter().map(|team| team.len()).sum::<usize>(),
            buckets.iter().map(|team| team.len()).collect::<Vec<_>>()
        );

        Ok(mode
            .team_names()
            .iter()
            .zip(buckets)
            .map(|(&name, members)| Team { name, members })
            .collect())
    }

    pub fn wheel(&self) -> Result<Wheel> {
        let mut classroom = self.classroom()?;
        Ok(classroom.wheel(&self.penalties).clone())
    }

    pub fn add_slice(&self, label: &str) -> Result<Option<Wheel>> {
        self.edit_wheel(|wheel| wheel.add_slice(label))
    }

    pub fn remove_slice(&self, index: usize) -> Result<Option<Wheel>> {
        self.edit_wheel(|wheel| wheel.remove_slice(index).is_some())
    }

    fn edit_wheel<F>(&self, edit: F) -> Result<Option<Wheel>>
    where
        F: FnOnce(&mut Wheel) -> bool,
    {
        let mut classroom = self.classroom()?;
        let wheel = classroom.wheel(&self.penalties);
        if !edit(&mut *wheel) {
            return Ok(None);
        }

        self.persistence
            .save_in_background(storage::PENALTIES, wheel.slices());
        Ok(Some(wheel.clone()))
    }

    pub fn spin(&self) -> Result<Option<Spin>> {
        let mut classroom = self.classroom()?;
        let spin = classroom.wheel(&self.penalties).spin(&mut thread_rng());

        if let Some(spin) = &spin {
            log::info!("[WHEEL] spin rotation:{:.1} winner:{}", spin.rotation, spin.label);
        }
        Ok(spin)
    }

    pub fn scoreboard(&self) -> Result<Option<Scoreboard>> {
        Ok(self.classroom()?.scoreboard.clone())
    }

    /// Replaces the board with a zeroed one.
    pub fn new_scoreboard(&self, team_count: usize) -> Result<Scoreboard> {
        let board = Scoreboard::new(team_count);
        self.classroom()?.scoreboard = Some(board.clone());

        log::info!("[SCORE] new board teams:{}", board.teams().len());
        self.play_cue(ScoreCue::Set);
        Ok(board)
    }

    pub fn add_score(&self, team: usize, delta: i32) -> Result<Option<Scoreboard>> {
        self.edit_scoreboard(|board| board.add_score(team, delta))
    }

    pub fn reset_score(&self, team: usize) -> Result<Option<Scoreboard>> {
        self.edit_scoreboard(|board| board.reset_score(team).map(Some))
    }

    pub fn add_set(&self, team: usize, delta: i32) -> Result<Option<Scoreboard>> {
        self.edit_scoreboard(|board| board.add_set(team, delta))
    }

    /// `None` when there is no board or `edit` refuses the team.
    fn edit_scoreboard<F>(&self, edit: F) -> Result<Option<Scoreboard>>
    where
        F: FnOnce(&mut Scoreboard) -> Option<Option<ScoreCue>>,
    {
        let mut classroom = self.classroom()?;
        let board = match classroom.scoreboard.as_mut() {
            None => return Ok(None),
            Some(board) => board,
        };

        match edit(board) {
            None => Ok(None),
            Some(cue) => {
                if let Some(cue) = cue {
                    self.play_cue(cue);
                }
                Ok(Some(board.clone()))
            }
        }
    }

    fn play_cue(&self, cue: ScoreCue) {
        let (frequency_hz, duration_ms) = cue.tone();
        self.effects
            .play_tone(frequency_hz, Waveform::Sine, duration_ms);
    }

    pub fn topics(&self) -> Vec<&Topic> {
        self.topics.values().collect()
    }

    /// Starts a fresh quiz for the session, dropping any game in progress.
    pub fn new_quiz(&self, session: &SessionId, team_count: usize) -> Result<QuizView> {
        let now = self.clock.now_ms();
        let game = QuizGame::new(team_count, self.timer);
        let view = game.view(now);

        let recorded = RecordedGame {
            session: *session,
            game,
            writer: self.result_writer.clone(),
        };
        let mut sessions = self.sessions()?;
        let before = sessions.len();
        sessions.retain(|_id, quiz| now.saturating_sub(quiz.touched_ms) < SESSION_IDLE_MS);
        if sessions.len() < before {
            log::info!("[QUIZ] dropped {} idle sessions", before - sessions.len());
        }

        sessions.insert(
            *session,
            QuizSession {
                game: Arc::new(Mutex::new(recorded)),
                ticker: None,
                touched_ms: now,
            },
        );

        Ok(view)
    }

    pub fn quiz(&self, session: &SessionId) -> Result<Option<QuizView>> {
        self.with_quiz(session, |_game, _now| true)
    }

    pub fn select_topic(&self, session: &SessionId, topic_id: &str) -> Result<Option<QuizView>> {
        let topic = match self.topics.get(topic_id) {
            None => return Ok(None),
            Some(topic) => topic,
        };
        self.with_quiz(session, |game, _now| {
            game.select_topic(topic, &mut thread_rng())
        })
    }

    pub fn start_round(&self, session: &SessionId) -> Result<Option<QuizView>> {
        self.with_quiz(session, |game, now| game.start_round(now))
    }

    pub fn answer_correct(&self, session: &SessionId) -> Result<Option<QuizView>> {
        self.with_quiz(session, |game, now| game.correct(now))
    }

    pub fn pass(&self, session: &SessionId) -> Result<Option<QuizView>> {
        self.with_quiz(session, |game, now| game.pass(now))
    }

    pub fn swap(&self, session: &SessionId) -> Result<Option<QuizView>> {
        self.with_quiz(session, |game, now| game.swap(now))
    }

    pub fn next_team(&self, session: &SessionId) -> Result<Option<QuizView>> {
        self.with_quiz(session, |game, _now| game.next_team())
    }

    /// Runs `action` on the session's game and keeps its ticker in step: a
    /// ticker runs exactly while a round is being played.
    fn with_quiz<F>(&self, session: &SessionId, action: F) -> Result<Option<QuizView>>
    where
        F: FnOnce(&mut QuizGame, u64) -> bool,
    {
        let mut sessions = self.sessions()?;
        let quiz = match sessions.get_mut(session) {
            None => return Ok(None),
            Some(quiz) => quiz,
        };

        let now = self.clock.now_ms();
        quiz.touched_ms = now;
        let (view, playing) = {
            let mut recorded = quiz
                .game
                .lock()
                .map_err(|_err| anyhow!("couldn't lock quiz"))?;

            // Catch up on a timeout the ticker hasn't seen yet.
            recorded.on_tick(now);
            if !action(&mut recorded.game, now) {
                log::debug!("quiz action refused");
            }
            recorded.record();

            (recorded.game.view(now), recorded.game.is_playing())
        };

        let ticking = quiz
            .ticker
            .as_ref()
            .map_or(false, |ticker| !ticker.is_finished());
        if playing && !ticking {
            quiz.ticker = Some(timer::drive(
                Duration::from_millis(self.timer.tick_ms),
                self.clock.clone(),
                quiz.game.clone(),
            ));
        } else if !playing {
            quiz.stop_ticker();
        }

        Ok(Some(view))
    }
}

fn tag_view(history: &TurnHistory, turn: Option<TurnRecord>) -> TagView {
    TagView {
        turn,
        total: history.len(),
        recent: history.recent(RECENT_TURNS).to_vec(),
    }
}

#[derive(Clone, Debug)]
pub struct ResultWriter {
    writer: Arc<Mutex<csv::Writer<File>>>,
}

impl ResultWriter {
    pub fn new(path: impl AsRef<Path>) -> Result<ResultWriter> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        let writer = Arc::new(Mutex::new(writer));

        Ok(ResultWriter { writer })
    }

    pub fn write(&self, record: ResultRecord) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_err| anyhow!("couldn't lock writer"))?;
        writer.serialize(record)?;
        writer.flush()?;

        Ok(())
    }

    pub fn write_in_background(&self, record: ResultRecord) {
        let writer = self.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(err) = writer.write(record) {
                log::warn!("couldn't write quiz result: {}", err);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::testing::{Cue, RecordingEffects};
    use crate::models::{Difficulty, Side};
    use crate::quiz::QuizPhase;
    use crate::storage::{DocumentStore, FileStore};
    use crate::timer::testing::ManualClock;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        controller: GameController,
        clock: ManualClock,
        effects: Arc<RecordingEffects>,
        local: Arc<FileStore>,
        dir: TempDir,
    }

    fn config() -> Config {
        toml::de::from_str(
            r#"
            [timer]
            tick_ms = 5

            [[topic]]
            id = "fruit"
            title = "Fruit"
            difficulty = "hard"
            words = ["apple", "pear", "plum", "fig", "kiwi", "lime", "date", "lemon", "grape", "melon", "peach", "mango"]
            "#,
        )
        .unwrap()
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let local = Arc::new(FileStore::new(dir.path().join("local")));
        let persistence = Persistence::new(local.clone(), None);
        let clock = ManualClock::at(1_000_000);
        let effects = Arc::new(RecordingEffects::default());
        let writer = ResultWriter::new(dir.path().join("results.csv")).unwrap();

        let controller = GameController::new(
            hmac::Key::new(hmac::HMAC_SHA256, &[7u8; 32]),
            &config(),
            persistence,
            effects.clone(),
            Arc::new(clock.clone()),
            writer,
        );

        Fixture {
            controller,
            clock,
            effects,
            local,
            dir,
        }
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition never held");
    }

    #[tokio::test]
    async fn session_tokens_round_trip_and_reject_tampering() {
        let fixture = fixture();
        let controller = &fixture.controller;
        let session = controller.create_session();

        let token = controller.encode_session(&session).unwrap();
        assert_eq!(controller.decode_session(&token).unwrap(), session);

        let other = controller.encode_session(&controller.create_session()).unwrap();
        let forged = format!(
            "{}:{}",
            token.split(':').next().unwrap(),
            other.split(':').nth(1).unwrap()
        );
        assert!(controller.decode_session(&forged).is_err());
        assert!(controller.decode_session("garbage").is_err());
    }

    #[tokio::test]
    async fn tag_turns_alternate_announce_and_persist() {
        let fixture = fixture();
        let controller = &fixture.controller;

        let first = controller.take_turn(GameMode::Sequential).unwrap();
        let second = controller.take_turn(GameMode::Sequential).unwrap();
        assert_eq!(first.turn.unwrap().side, Side::Red);
        assert_eq!(second.turn.unwrap().side, Side::Blue);
        assert_eq!(second.total, 2);
        assert_eq!(second.recent[0].sequence, 2);

        assert!(fixture
            .effects
            .cues()
            .contains(&Cue::Speech("파랑 한걸음".into(), "ko-KR".into())));

        let local = fixture.local.clone();
        wait_for(|| {
            local
                .load(storage::TAG_HISTORY.local)
                .ok()
                .flatten()
                .map_or(false, |value| value.as_array().map_or(0, |a| a.len()) == 2)
        })
        .await;

        assert_eq!(controller.reset_tag().unwrap().total, 0);
    }

    #[tokio::test]
    async fn roster_edits_persist_and_cascade() {
        let fixture = fixture();
        let controller = &fixture.controller;

        let kim = controller.add_student("Kim", Gender::Male).unwrap().unwrap();
        let lee = controller.add_student("Lee", Gender::Female).unwrap().unwrap();
        assert!(controller.add_student(" ", Gender::Male).unwrap().is_none());

        let pair = controller
            .add_pair(&[kim.id.clone(), lee.id.clone()])
            .unwrap()
            .unwrap();
        assert_eq!(pair.student_ids[0], kim.id);

        controller.remove_student(&lee.id).unwrap().unwrap();
        let roster = controller.roster().unwrap();
        assert_eq!(roster.students.len(), 1);
        assert!(roster.pair_conditions.is_empty());
        assert!(!controller.remove_condition(&pair.id).unwrap());

        let local = fixture.local.clone();
        wait_for(|| {
            local
                .load(storage::ROSTER.local)
                .ok()
                .flatten()
                .map_or(false, |value| value["students"].as_array().map_or(0, |a| a.len()) == 1)
        })
        .await;
    }

    #[tokio::test]
    async fn teams_are_named_and_balanced() {
        let fixture = fixture();
        let controller = &fixture.controller;
        let mut ids = Vec::new();
        for name in &["Kim", "Lee", "Park", "Choi", "Jung"] {
            ids.push(controller.add_student(name, Gender::Male).unwrap().unwrap().id);
        }

        let teams = controller
            .assign_teams(TeamMode::FourTeams, &ids[..1])
            .unwrap();
        assert_eq!(
            teams.iter().map(|team| team.name).collect::<Vec<_>>(),
            vec!["Red", "Blue", "Green", "Clear"]
        );
        assert!(teams.iter().all(|team| team.members.len() == 1));
    }

    #[tokio::test]
    async fn wheel_starts_with_configured_penalties() {
        let fixture = fixture();
        let controller = &fixture.controller;

        let count = controller.wheel().unwrap().slices().len();
        assert_eq!(count, crate::models::default_penalties().len());

        let wheel = controller.add_slice("Moonwalk").unwrap().unwrap();
        assert_eq!(wheel.slices().len(), count + 1);
        assert!(controller.add_slice("").unwrap().is_none());

        let spin = controller.spin().unwrap().unwrap();
        assert_eq!(controller.wheel().unwrap().slices()[spin.index].label, spin.label);

        while controller.wheel().unwrap().slices().len() > 2 {
            controller.remove_slice(0).unwrap().unwrap();
        }
        assert!(controller.remove_slice(0).unwrap().is_none());
    }

    #[tokio::test]
    async fn scoreboard_beeps_on_every_change() {
        let fixture = fixture();
        let controller = &fixture.controller;

        assert!(controller.scoreboard().unwrap().is_none());
        assert!(controller.add_score(0, 1).unwrap().is_none());

        let board = controller.new_scoreboard(3).unwrap();
        assert_eq!(board.teams().len(), 3);

        controller.add_score(1, 1).unwrap().unwrap();
        controller.add_score(1, -1).unwrap().unwrap();
        controller.add_score(1, -1).unwrap().unwrap();
        controller.add_set(2, 1).unwrap().unwrap();
        let board = controller.reset_score(2).unwrap().unwrap();
        assert!(controller.add_set(3, 1).unwrap().is_none());

        assert_eq!(board.teams()[1].score, 0);
        assert_eq!(board.teams()[2].sets, 1);

        let tones = fixture
            .effects
            .cues()
            .into_iter()
            .filter_map(|cue| match cue {
                Cue::Tone(frequency_hz, _, duration_ms) => Some((frequency_hz, duration_ms)),
                Cue::Speech(..) => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(
            tones,
            vec![(1000.0, 80), (800.0, 100), (400.0, 150), (1000.0, 80), (400.0, 150)]
        );
    }

    #[tokio::test]
    async fn idle_quiz_sessions_are_dropped() {
        let fixture = fixture();
        let controller = &fixture.controller;

        let stale = controller.create_session();
        controller.new_quiz(&stale, 2).unwrap();
        let kept = controller.create_session();
        fixture.clock.set(1_000_000 + SESSION_IDLE_MS / 2);
        controller.new_quiz(&kept, 2).unwrap();

        fixture.clock.set(1_000_000 + SESSION_IDLE_MS);
        assert!(controller.quiz(&kept).unwrap().is_some());

        let fresh = controller.create_session();
        controller.new_quiz(&fresh, 2).unwrap();

        assert!(controller.quiz(&stale).unwrap().is_none());
        assert!(controller.quiz(&kept).unwrap().is_some());
        assert_eq!(controller.sessions().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn requests_catch_up_on_a_missed_timeout() {
        let fixture = fixture();
        let controller = &fixture.controller;
        let session = controller.create_session();

        controller.new_quiz(&session, 1).unwrap();
        controller.select_topic(&session, "fruit").unwrap().unwrap();
        controller.start_round(&session).unwrap().unwrap();

        // No await between the jump and the request, so the ticker can't run.
        fixture.clock.set(1_000_000 + 40_000);
        let view = controller.quiz(&session).unwrap().unwrap();
        assert_eq!(view.step, QuizPhase::Playing);
        assert_eq!(view.question, 2);
        assert_eq!(view.correct, 0);
    }

    #[tokio::test]
    async fn quiz_round_times_out_and_records_results() {
        let fixture = fixture();
        let controller = &fixture.controller;
        let session = controller.create_session();

        assert!(controller.quiz(&session).unwrap().is_none());
        controller.new_quiz(&session, 2).unwrap();
        assert!(controller.select_topic(&session, "missing").unwrap().is_none());

        let view = controller.select_topic(&session, "fruit").unwrap().unwrap();
        assert_eq!(view.step, QuizPhase::Ready);
        assert_eq!(view.difficulty, Some(Difficulty::Hard));

        let view = controller.start_round(&session).unwrap().unwrap();
        assert_eq!(view.step, QuizPhase::Playing);
        assert_eq!(view.question, 1);

        // Locked pass is refused and leaves the question in place.
        let view = controller.pass(&session).unwrap().unwrap();
        assert_eq!(view.question, 1);
        assert_eq!(view.passes_left, 2);

        for _ in 0..9 {
            controller.answer_correct(&session).unwrap().unwrap();
        }

        // The last question runs out of time; the ticker ends the round.
        fixture.clock.set(1_000_000 + 40_000);
        let game = controller.sessions().unwrap()[&session].game.clone();
        wait_for(|| !game.lock().unwrap().game.is_playing()).await;

        let view = controller.quiz(&session).unwrap().unwrap();
        assert_eq!(view.step, QuizPhase::Result);
        assert_eq!(view.correct, 9);
        assert_eq!(view.ranking.len(), 1);

        let results = fixture.dir.path().join("results.csv");
        wait_for(|| {
            std::fs::read_to_string(&results)
                .map(|contents| contents.lines().count() == 1)
                .unwrap_or(false)
        })
        .await;
        let contents = std::fs::read_to_string(&results).unwrap();
        assert!(contents.contains("Fruit"));

        let view = controller.next_team(&session).unwrap().unwrap();
        assert_eq!(view.step, QuizPhase::TopicSelect);
        assert_eq!(view.current_team, 1);
        assert_eq!(view.taken_topics, vec!["fruit".to_string()]);
    }
}
