//! Process-level entropy source behind an injectable handle.
//!
//! The shuffle stage of query execution and UUID assignment both draw from
//! one `Entropy` handle owned by the server, so tests can seed it and get
//! deterministic orderings while production servers seed from the OS.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A seedable random source shared by ID generation and result shuffling.
pub struct Entropy {
    rng: Mutex<StdRng>,
}

impl Entropy {
    /// Seed from the operating system.
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic seed, for tests.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Generate a random v4 UUID string (lowercase hyphenated).
    pub fn uuid_v4(&self) -> String {
        let mut bytes = [0u8; 16];
        self.rng.lock().unwrap_or_else(|e| e.into_inner()).fill(&mut bytes);
        uuid::Builder::from_random_bytes(bytes)
            .into_uuid()
            .to_string()
    }

    /// Uniform Fisher-Yates shuffle.
    pub fn shuffle<T>(&self, items: &mut [T]) {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        for i in (1..items.len()).rev() {
            let j = rng.gen_range(0..=i);
            items.swap(i, j);
        }
    }
}

impl Default for Entropy {
    fn default() -> Self {
        Self::new()
    }
}
