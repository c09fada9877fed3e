use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub timer: TimerConfig,

    #[serde(default = "default_penalties")]
    pub penalties: Vec<String>,

    #[serde(default)]
    pub topic: Vec<Topic>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_local_dir")]
    pub local_dir: PathBuf,

    #[serde(default)]
    pub remote_dir: Option<PathBuf>,

    #[serde(default = "default_results_csv")]
    pub results_csv: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            local_dir: default_local_dir(),
            remote_dir: None,
            results_csv: default_results_csv(),
        }
    }
}

fn default_local_dir() -> PathBuf {
    "data".into()
}

fn default_results_csv() -> PathBuf {
    "results.csv".into()
}

/// Countdown settings shared by every timed quiz.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct TimerConfig {
    #[serde(default = "default_limit_ms")]
    pub limit_ms: u64,

    #[serde(default = "default_unlock_ms")]
    pub unlock_ms: u64,

    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        TimerConfig {
            limit_ms: default_limit_ms(),
            unlock_ms: default_unlock_ms(),
            tick_ms: default_tick_ms(),
        }
    }
}

fn default_limit_ms() -> u64 {
    40_000
}

fn default_unlock_ms() -> u64 {
    20_000
}

fn default_tick_ms() -> u64 {
    50
}

pub fn default_penalties() -> Vec<String> {
    [
        "Sing a song",
        "Dance for 10 seconds",
        "Tell a joke",
        "Compliment a friend",
        "Ten squats",
        "Animal impression",
    ]
    .iter()
    .map(|penalty| penalty.to_string())
    .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Red,
    Blue,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Red => Side::Blue,
            Side::Blue => Side::Red,
        }
    }

    /// Spoken announcement for the tag game.
    pub fn announcement(self) -> &'static str {
        match self {
            Side::Red => "빨강 한걸음",
            Side::Blue => "파랑 한걸음",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct TurnRecord {
    pub id: String,
    #[serde(rename = "turnNumber")]
    pub sequence: u32,
    #[serde(rename = "team")]
    pub side: Side,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GameMode {
    Sequential,
    Random,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct StudentId(pub String);

/// 16 random bytes, hex encoded.
pub fn random_id() -> String {
    use rand::Rng;

    let mut id = [0u8; 16];
    rand::rngs::OsRng.fill(&mut id);
    hex::encode(id)
}

impl StudentId {
    pub fn random() -> StudentId {
        StudentId(random_id())
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Gender {
    Male,
    Female,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Student {
    pub id: StudentId,
    pub name: String,
    pub gender: Gender,
}

/// Two students that must end up in different teams (2-team mode).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairConstraint {
    pub id: String,
    pub student_ids: [StudentId; 2],
}

/// Four students that must end up in four different teams (4-team mode).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupConstraint {
    pub id: String,
    pub student_ids: [StudentId; 4],
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Roster {
    #[serde(default)]
    pub students: Vec<Student>,

    #[serde(default)]
    pub pair_conditions: Vec<PairConstraint>,

    #[serde(default)]
    pub group_conditions: Vec<GroupConstraint>,

    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum TeamMode {
    #[serde(rename = "2TEAM")]
    TwoTeams,
    #[serde(rename = "4TEAM")]
    FourTeams,
}

impl TeamMode {
    pub fn team_count(self) -> usize {
        match self {
            TeamMode::TwoTeams => 2,
            TeamMode::FourTeams => 4,
        }
    }

    pub fn team_names(self) -> &'static [&'static str] {
        match self {
            TeamMode::TwoTeams => &["Red", "Blue"],
            TeamMode::FourTeams => &["Red", "Blue", "Green", "Clear"],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct WheelSlice {
    pub label: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Move {
    Scissors,
    Rock,
    Paper,
}

impl Move {
    pub const ALL: [Move; 3] = [Move::Scissors, Move::Rock, Move::Paper];
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct MoveRecord {
    pub id: String,
    #[serde(rename = "move")]
    pub mv: Move,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    /// Time credited to a team before its round starts.
    pub fn handicap_ms(self) -> u64 {
        match self {
            Difficulty::Easy => 60_000,
            Difficulty::Medium => 30_000,
            Difficulty::Hard => 0,
        }
    }
}

impl Default for Difficulty {
    fn default() -> Self {
        Difficulty::Medium
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Topic {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub difficulty: Difficulty,
    pub words: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct TeamResult {
    pub team_index: usize,
    pub time_taken_ms: u64,
    pub real_time_taken_ms: u64,
    pub score: u32,
    pub topic_title: String,
    pub difficulty: Difficulty,
}

#[derive(Clone, Debug, Serialize)]
pub struct ResultRecord {
    pub session: String,
    pub team: usize,
    pub topic: String,
    pub difficulty: Difficulty,
    pub score: u32,
    pub time_taken_ms: u64,
    pub real_time_taken_ms: u64,
    pub time: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
pub struct SessionId(pub [u8; 16]);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_sections_default() {
        let config: Config = toml::de::from_str(
            r#"
            [timer]
            limit_ms = 30000

            [[topic]]
            id = "animals"
            title = "Animals"
            difficulty = "easy"
            words = ["cat", "dog"]
            "#,
        )
        .unwrap();

        assert_eq!(config.timer.limit_ms, 30_000);
        assert_eq!(config.timer.unlock_ms, 20_000);
        assert_eq!(config.timer.tick_ms, 50);
        assert_eq!(config.storage.local_dir, PathBuf::from("data"));
        assert!(config.storage.remote_dir.is_none());
        assert_eq!(config.penalties, default_penalties());
        assert_eq!(config.topic[0].difficulty, Difficulty::Easy);
    }

    #[test]
    fn roster_blob_uses_camel_case() {
        let roster = Roster {
            students: vec![Student {
                id: StudentId("a".into()),
                name: "Kim".into(),
                gender: Gender::Female,
            }],
            pair_conditions: vec![PairConstraint {
                id: "p".into(),
                student_ids: [StudentId("a".into()), StudentId("b".into())],
            }],
            group_conditions: vec![],
            updated_at: None,
        };

        let value = serde_json::to_value(&roster).unwrap();
        assert_eq!(value["students"][0]["gender"], "FEMALE");
        assert_eq!(value["pairConditions"][0]["studentIds"][1], "b");
        assert!(value.get("groupConditions").is_some());
    }

    #[test]
    fn opposite_side_flips() {
        assert_eq!(Side::Red.opposite(), Side::Blue);
        assert_eq!(Side::Blue.opposite(), Side::Red);
    }
}
