//! Weighted random selection over eligible candidates.

use crate::catalog::Candidate;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Picks candidates with probability proportional to their weight.
///
/// The random source is owned by the selector so tests can pin it with a
/// seed; production uses OS entropy.
pub struct WeightedSelector {
    rng: Mutex<StdRng>,
}

impl WeightedSelector {
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn with_seed(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::seeded(seed),
            None => Self::from_entropy(),
        }
    }

    /// Index drawn from `weights`, or `None` if there is nothing to draw.
    pub fn pick_index(&self, weights: &[u32]) -> Option<usize> {
        let total: u64 = weights.iter().map(|w| u64::from(*w)).sum();
        if total == 0 {
            return None;
        }
        let mut roll = self.rng.lock().gen_range(0..total);
        for (i, weight) in weights.iter().enumerate() {
            let weight = u64::from(*weight);
            if roll < weight {
                return Some(i);
            }
            roll -= weight;
        }
        None
    }

    pub fn select<'a>(&self, candidates: &'a [Candidate]) -> Option<&'a Candidate> {
        let weights: Vec<u32> = candidates.iter().map(|c| c.ad.effective_weight()).collect();
        self.pick_index(&weights).map(|i| &candidates[i])
    }

    /// Up to `count` distinct candidates, sampled without replacement.
    pub fn select_many(&self, mut candidates: Vec<Candidate>, count: usize) -> Vec<Candidate> {
        let mut picked = Vec::with_capacity(count.min(candidates.len()));
        while picked.len() < count {
            let weights: Vec<u32> = candidates.iter().map(|c| c.ad.effective_weight()).collect();
            let Some(i) = self.pick_index(&weights) else {
                break;
            };
            picked.push(candidates.swap_remove(i));
        }
        picked
    }
}

impl Default for WeightedSelector {
    fn default() -> Self {
        Self::from_entropy()
    }
}
