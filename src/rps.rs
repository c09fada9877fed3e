use chrono::Utc;
use rand::{seq::SliceRandom, Rng};

use crate::models::{random_id, Move, MoveRecord};

pub fn throw_move<R: Rng>(rng: &mut R) -> Move {
    *Move::ALL.choose(rng).unwrap_or(&Move::Rock)
}

/// Throws a move and records it at the front of `history`.
pub fn throw_into<R: Rng>(history: &mut Vec<MoveRecord>, rng: &mut R) -> MoveRecord {
    let record = MoveRecord {
        id: random_id(),
        mv: throw_move(rng),
        timestamp: Utc::now(),
    };
    history.insert(0, record.clone());
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn all_moves_come_up() {
        let mut rng = StdRng::seed_from_u64(12);
        let mut seen = Vec::new();

        for _ in 0..300 {
            let mv = throw_move(&mut rng);
            if !seen.contains(&mv) {
                seen.push(mv);
            }
        }

        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn newest_throw_comes_first() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut history = Vec::new();

        throw_into(&mut history, &mut rng);
        let newest = throw_into(&mut history, &mut rng);

        assert_eq!(history.len(), 2);
        assert_eq!(history[0], newest);
        assert_ne!(history[0].id, history[1].id);
    }
}
