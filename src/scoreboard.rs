use serde::Serialize;

pub const MIN_TEAMS: usize = 2;
pub const MAX_TEAMS: usize = 8;

/// Team colours in board order.
pub const TEAM_NAMES: [&str; MAX_TEAMS] = [
    "빨강", "파랑", "초록", "노랑", "주황", "보라", "민트", "핑크",
];

/// Which beep a board change plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScoreCue {
    Point,
    Minus,
    Set,
}

impl ScoreCue {
    /// Frequency in Hz and duration in milliseconds.
    pub fn tone(self) -> (f32, u32) {
        match self {
            ScoreCue::Point => (800.0, 100),
            ScoreCue::Minus => (400.0, 150),
            ScoreCue::Set => (1000.0, 80),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TeamScore {
    pub name: &'static str,
    pub score: u32,
    pub sets: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Scoreboard {
    teams: Vec<TeamScore>,
}

fn apply(value: u32, delta: i32) -> u32 {
    if delta >= 0 {
        value.saturating_add(delta as u32)
    } else {
        value.saturating_sub(delta.unsigned_abs())
    }
}

impl Scoreboard {
    /// A zeroed board; `team_count` is clamped to 2..=8.
    pub fn new(team_count: usize) -> Scoreboard {
        let team_count = team_count.max(MIN_TEAMS).min(MAX_TEAMS);
        Scoreboard {
            teams: TEAM_NAMES[..team_count]
                .iter()
                .map(|&name| TeamScore {
                    name,
                    score: 0,
                    sets: 0,
                })
                .collect(),
        }
    }

    pub fn teams(&self) -> &[TeamScore] {
        &self.teams
    }

    /// `None` for an unknown team. The inner cue is `None` when the score
    /// was already at zero and did not move.
    pub fn add_score(&mut self, team: usize, delta: i32) -> Option<Option<ScoreCue>> {
        let team = self.teams.get_mut(team)?;
        let score = apply(team.score, delta);
        if score == team.score {
            return Some(None);
        }

        team.score = score;
        Some(Some(if delta > 0 {
            ScoreCue::Point
        } else {
            ScoreCue::Minus
        }))
    }

    pub fn reset_score(&mut self, team: usize) -> Option<ScoreCue> {
        let team = self.teams.get_mut(team)?;
        team.score = 0;
        Some(ScoreCue::Minus)
    }

    pub fn add_set(&mut self, team: usize, delta: i32) -> Option<Option<ScoreCue>> {
        let team = self.teams.get_mut(team)?;
        let sets = apply(team.sets, delta);
        if sets == team.sets {
            return Some(None);
        }

        team.sets = sets;
        Some(Some(ScoreCue::Set))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn team_count_is_clamped() {
        assert_eq!(Scoreboard::new(0).teams().len(), 2);
        assert_eq!(Scoreboard::new(5).teams().len(), 5);
        assert_eq!(Scoreboard::new(12).teams().len(), 8);
        assert_eq!(Scoreboard::new(3).teams()[2].name, "초록");
    }

    #[test]
    fn scores_never_go_below_zero() {
        let mut board = Scoreboard::new(2);

        assert_eq!(board.add_score(0, -1), Some(None));
        assert_eq!(board.add_score(0, 1), Some(Some(ScoreCue::Point)));
        assert_eq!(board.add_score(0, 1), Some(Some(ScoreCue::Point)));
        assert_eq!(board.add_score(0, -5), Some(Some(ScoreCue::Minus)));
        assert_eq!(board.teams()[0].score, 0);
        assert_eq!(board.teams()[1].score, 0);
    }

    #[test]
    fn sets_are_counted_separately() {
        let mut board = Scoreboard::new(4);
        board.add_score(3, 2);

        assert_eq!(board.add_set(3, 1), Some(Some(ScoreCue::Set)));
        assert_eq!(board.add_set(3, -1), Some(Some(ScoreCue::Set)));
        assert_eq!(board.add_set(3, -1), Some(None));
        assert_eq!(board.teams()[3].score, 2);
        assert_eq!(board.teams()[3].sets, 0);
    }

    #[test]
    fn reset_always_beeps() {
        let mut board = Scoreboard::new(2);
        board.add_score(1, 7);

        assert_eq!(board.reset_score(1), Some(ScoreCue::Minus));
        assert_eq!(board.teams()[1].score, 0);
        assert_eq!(board.reset_score(1), Some(ScoreCue::Minus));
    }

    #[test]
    fn unknown_team_is_refused() {
        let mut board = Scoreboard::new(2);
        assert_eq!(board.add_score(2, 1), None);
        assert_eq!(board.add_set(9, 1), None);
        assert_eq!(board.reset_score(2), None);
    }

    #[test]
    fn tones_match_the_cue() {
        assert_eq!(ScoreCue::Point.tone(), (800.0, 100));
        assert_eq!(ScoreCue::Minus.tone(), (400.0, 150));
        assert_eq!(ScoreCue::Set.tone(), (1000.0, 80));
    }
}
