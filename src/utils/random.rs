// src/utils/random.rs

//! Injectable randomness for identity rotation and delays.

use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;

/// Source of the two random choices the monitor makes.
pub trait RandomSource: Send + Sync {
    /// Uniform index in `0..n`. Only called with `n > 0`.
    fn pick(&self, n: usize) -> usize;

    /// Uniform float in `[min, max]`.
    fn uniform(&self, min: f64, max: f64) -> f64;
}

/// Thread-local RNG backed source.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn pick(&self, n: usize) -> usize {
        rand::rng().random_range(0..n)
    }

    fn uniform(&self, min: f64, max: f64) -> f64 {
        if max <= min {
            return min;
        }
        rand::rng().random_range(min..=max)
    }
}

/// Deterministic source replaying fixed values, for tests and dry runs.
///
/// `pick` cycles through `picks` (modulo `n`); `uniform` maps each value of
/// `ratios` (0.0–1.0) onto the requested range.
#[derive(Debug)]
pub struct FixedRandom {
    picks: Vec<usize>,
    ratios: Vec<f64>,
    cursor: Mutex<(usize, usize)>,
}

impl FixedRandom {
    pub fn new(picks: Vec<usize>, ratios: Vec<f64>) -> Self {
        Self {
            picks,
            ratios,
            cursor: Mutex::new((0, 0)),
        }
    }

    /// Always the first item, always the lower bound.
    pub fn lowest() -> Self {
        Self::new(vec![0], vec![0.0])
    }
}

impl RandomSource for FixedRandom {
    fn pick(&self, n: usize) -> usize {
        let mut cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());
        let value = self.picks.get(cursor.0 % self.picks.len().max(1)).copied().unwrap_or(0);
        cursor.0 += 1;
        value % n.max(1)
    }

    fn uniform(&self, min: f64, max: f64) -> f64 {
        let mut cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());
        let ratio = self
            .ratios
            .get(cursor.1 % self.ratios.len().max(1))
            .copied()
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);
        cursor.1 += 1;
        min + (max - min).max(0.0) * ratio
    }
}

/// Random pause within `[min_secs, max_secs]`.
pub fn random_delay(rng: &dyn RandomSource, min_secs: f64, max_secs: f64) -> Duration {
    Duration::from_secs_f64(rng.uniform(min_secs, max_secs).max(0.0))
}
