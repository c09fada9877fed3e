use rand::Rng;
use serde::Serialize;

use crate::models::WheelSlice;

const FULL_TURN: f64 = 360.0;

/// Full turns every spin makes before the random offset.
const MIN_SPINS: f64 = 5.0;

pub const MIN_SLICES: usize = 2;

/// Index of the slice under the pointer at 12 o'clock.
///
/// The wheel turns clockwise while slices are laid out from the top in index
/// order, so the angle is measured backwards from the pointer. `slice_count`
/// must be at least 1.
pub fn resolve_winner(final_rotation: f64, slice_count: usize) -> usize {
    let normalized = final_rotation.rem_euclid(FULL_TURN);
    let effective = (FULL_TURN - normalized).rem_euclid(FULL_TURN);
    let slice_angle = FULL_TURN / slice_count as f64;

    ((effective / slice_angle).floor() as usize).min(slice_count - 1)
}

pub fn next_rotation<R: Rng>(current: f64, rng: &mut R) -> f64 {
    current + MIN_SPINS * FULL_TURN + rng.gen_range(0.0..FULL_TURN)
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Spin {
    pub rotation: f64,
    pub index: usize,
    pub label: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Wheel {
    #[serde(rename = "items")]
    slices: Vec<WheelSlice>,

    #[serde(skip)]
    rotation: f64,
}

impl Wheel {
    pub fn new(labels: impl IntoIterator<Item = String>) -> Wheel {
        Wheel {
            slices: labels
                .into_iter()
                .map(|label| WheelSlice { label })
                .collect(),
            rotation: 0.0,
        }
    }

    pub fn slices(&self) -> &[WheelSlice] {
        &self.slices
    }

    pub fn rotation(&self) -> f64 {
        self.rotation
    }

    pub fn add_slice(&mut self, label: &str) -> bool {
        let label = label.trim();
        if label.is_empty() {
            return false;
        }

        self.slices.push(WheelSlice {
            label: label.into(),
        });
        true
    }

    /// Refuses to go below the two slices a spin needs.
    pub fn remove_slice(&mut self, index: usize) -> Option<WheelSlice> {
        if self.slices.len() <= MIN_SLICES || index >= self.slices.len() {
            return None;
        }
        Some(self.slices.remove(index))
    }

    pub fn spin<R: Rng>(&mut self, rng: &mut R) -> Option<Spin> {
        if self.slices.len() < MIN_SLICES {
            return None;
        }

        self.rotation = next_rotation(self.rotation, rng);
        let index = resolve_winner(self.rotation, self.slices.len());

        Some(Spin {
            rotation: self.rotation,
            index,
            label: self.slices[index].label.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn wheel(count: usize) -> Wheel {
        Wheel::new((0..count).map(|i| format!("penalty {}", i)))
    }

    #[test]
    fn five_full_turns_lands_on_first_slice() {
        assert_eq!(resolve_winner(1800.0, 10), 0);
        assert_eq!(resolve_winner(0.0, 10), 0);
    }

    #[test]
    fn clockwise_rotation_walks_indices_backwards() {
        // A small clockwise turn brings the last slice under the pointer.
        assert_eq!(resolve_winner(10.0, 4), 3);
        assert_eq!(resolve_winner(100.0, 4), 2);
        assert_eq!(resolve_winner(1800.0 + 270.0, 4), 1);
        assert_eq!(resolve_winner(359.999, 4), 0);
    }

    #[test]
    fn winner_is_always_in_range() {
        for n in 2..13 {
            for step in 0..3600 {
                let rotation = step as f64 * 0.37 + 1800.0;
                assert!(resolve_winner(rotation, n) < n);
            }
        }
    }

    #[test]
    fn every_spin_turns_at_least_five_times() {
        let mut rng = StdRng::seed_from_u64(8);
        let mut wheel = wheel(6);
        let mut previous = wheel.rotation();

        for _ in 0..100 {
            let spin = wheel.spin(&mut rng).unwrap();
            assert!(spin.rotation >= previous + 1800.0);
            assert!(spin.rotation < previous + 2160.0);
            assert_eq!(spin.label, wheel.slices()[spin.index].label);
            previous = spin.rotation;
        }
    }

    #[test]
    fn spins_cover_every_slice() {
        let mut rng = StdRng::seed_from_u64(15);
        let mut wheel = wheel(5);
        let mut hits = [0u32; 5];

        for _ in 0..5000 {
            hits[wheel.spin(&mut rng).unwrap().index] += 1;
        }

        assert!(hits.iter().all(|&count| count > 800 && count < 1200));
    }

    #[test]
    fn wheel_keeps_two_slices() {
        let mut wheel = wheel(3);
        assert!(wheel.remove_slice(5).is_none());
        assert_eq!(wheel.remove_slice(0).unwrap().label, "penalty 0");
        assert!(wheel.remove_slice(0).is_none());
        assert_eq!(wheel.slices().len(), 2);

        assert!(!wheel.add_slice("  "));
        assert!(wheel.add_slice(" Hop on one foot "));
        assert_eq!(wheel.slices()[2].label, "Hop on one foot");
    }

    #[test]
    fn too_small_wheel_does_not_spin() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(wheel(1).spin(&mut rng).is_none());
        assert!(Wheel::new(Vec::new()).spin(&mut rng).is_none());
    }

    #[test]
    fn serializes_as_items() {
        let value = serde_json::to_value(wheel(2)).unwrap();
        assert_eq!(value, serde_json::json!({ "items": ["penalty 0", "penalty 1"] }));
    }
}
