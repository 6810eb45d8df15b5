//! Coin flips deciding how many ranks a freshly split bucket is linked at.

use std::collections::VecDeque;

/// Source of promotion outcomes. Injectable so chain shapes can be scripted.
pub trait Promotion: Send {
    /// True when the new bucket should also be linked at the next rank up.
    fn promote(&mut self, probability: f64) -> bool;
}

/// Geometric promotion backed by `fastrand`.
#[derive(Debug, Clone)]
pub struct RandomPromotion {
    rng: fastrand::Rng,
}

impl RandomPromotion {
    pub fn new() -> Self {
        Self {
            rng: fastrand::Rng::new(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: fastrand::Rng::with_seed(seed),
        }
    }
}

impl Default for RandomPromotion {
    fn default() -> Self {
        Self::new()
    }
}

impl Promotion for RandomPromotion {
    fn promote(&mut self, probability: f64) -> bool {
        self.rng.f64() < probability
    }
}

/// Replays a fixed sequence of outcomes, then never promotes.
#[derive(Debug, Clone, Default)]
pub struct ScriptedPromotion {
    outcomes: VecDeque<bool>,
}

impl ScriptedPromotion {
    pub fn new(outcomes: impl IntoIterator<Item = bool>) -> Self {
        Self {
            outcomes: outcomes.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.outcomes.len()
    }
}

impl Promotion for ScriptedPromotion {
    fn promote(&mut self, _probability: f64) -> bool {
        self.outcomes.pop_front().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_replays_then_stops() {
        let mut p = ScriptedPromotion::new([true, false, true]);
        assert!(p.promote(0.5));
        assert!(!p.promote(0.5));
        assert!(p.promote(0.5));
        assert_eq!(p.remaining(), 0);
        assert!(!p.promote(1.0));
    }

    #[test]
    fn test_random_respects_extremes() {
        let mut p = RandomPromotion::with_seed(7);
        for _ in 0..100 {
            assert!(!p.promote(0.0));
            assert!(p.promote(1.0));
        }
    }

    #[test]
    fn test_random_is_roughly_fair() {
        let mut p = RandomPromotion::with_seed(42);
        let hits = (0..10_000).filter(|_| p.promote(0.5)).count();
        assert!((4_000..6_000).contains(&hits), "hits = {hits}");
    }
}
