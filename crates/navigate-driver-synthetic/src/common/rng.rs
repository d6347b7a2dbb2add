//! Seeded RNG wrapper for reproducible behavior.

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Thread-safe seeded random number generator.
#[derive(Debug)]
pub struct SyntheticRng {
    inner: Mutex<ChaCha8Rng>,
}

impl SyntheticRng {
    /// Create a new RNG. `None` seeds from the OS.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            inner: Mutex::new(rng),
        }
    }

    /// True with probability `rate` (clamped to [0, 1]).
    pub fn should_fail(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        self.inner.lock().gen::<f64>() < rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_sequence() {
        let a = SyntheticRng::new(Some(7));
        let b = SyntheticRng::new(Some(7));
        let xs: Vec<bool> = (0..64).map(|_| a.should_fail(0.5)).collect();
        let ys: Vec<bool> = (0..64).map(|_| b.should_fail(0.5)).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn extreme_rates() {
        let rng = SyntheticRng::new(Some(1));
        assert!(!rng.should_fail(0.0));
        assert!(rng.should_fail(1.0));
    }
}
