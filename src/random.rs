// Injectable randomness for jitter and mirror selection.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub trait RandomSource: Send + Sync {
    /// Uniform integer in `0..=max`.
    fn up_to(&self, max: u64) -> u64;

    /// Uniform index into a slice of length `len`. `len` must be non-zero.
    fn index(&self, len: usize) -> usize {
        self.up_to(len.saturating_sub(1) as u64) as usize
    }
}

/// Thread-local OS-seeded generator.
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn up_to(&self, max: u64) -> u64 {
        rand::rng().random_range(0..=max)
    }
}

/// Deterministic generator for tests.
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn up_to(&self, max: u64) -> u64 {
        match self.rng.lock() {
            Ok(mut rng) => rng.random_range(0..=max),
            Err(_) => 0,
        }
    }
}

/// Always returns zero: no jitter, always the first mirror.
pub struct NoRandom;

impl RandomSource for NoRandom {
    fn up_to(&self, _max: u64) -> u64 {
        0
    }
}
