//! Most-recent-first list of seeds used by successful generations.

use super::{Storage, KEY_SEEDS};
use crate::error::StoreError;

pub const MAX_SEEDS: usize = 50;

/// Bounded, deduplicated seed history.
///
/// Not safe for concurrent writers; see the module docs of [`crate::storage`].
#[derive(Clone)]
pub struct SeedLedger {
    storage: Storage,
}

impl SeedLedger {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub fn list(&self) -> Vec<i64> {
        self.storage.load_or_default(KEY_SEEDS)
    }

    /// Moves `seed` to the front, dropping any earlier occurrence.
    pub fn record(&self, seed: i64) -> Result<(), StoreError> {
        let mut seeds = self.list();
        push_front_unique(&mut seeds, seed);
        self.storage.save(KEY_SEEDS, &seeds)
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.storage.remove(KEY_SEEDS)
    }
}

fn push_front_unique(seeds: &mut Vec<i64>, seed: i64) {
    seeds.retain(|existing| *existing != seed);
    seeds.insert(0, seed);
    seeds.truncate(MAX_SEEDS);
}
