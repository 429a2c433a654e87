//! Order-by canonicalization.
//!
//! Ordering is positional, so the canonical form preserves clause order;
//! the only normalization is dropping repeated fields (the first mention
//! wins — later mentions can never affect the sort).

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use trellis_core::OrderBy;

use super::{structural_hash, Canonical};

pub struct OrderByCanonicalizer {
    memo: Mutex<HashMap<[u8; 32], Canonical<OrderBy>>>,
}

impl OrderByCanonicalizer {
    pub fn new() -> Self {
        Self {
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn canonicalize(&self, raw: &OrderBy) -> Canonical<OrderBy> {
        let raw_hash = structural_hash(raw);
        if let Some(hit) = self.memo.lock().unwrap().get(&raw_hash) {
            return hit.clone();
        }

        let mut seen = HashSet::new();
        let normalized: OrderBy = raw
            .iter()
            .filter(|clause| seen.insert(clause.field.clone()))
            .cloned()
            .collect();

        let canonical = Canonical::new(normalized);
        self.memo
            .lock()
            .unwrap()
            .insert(raw_hash, canonical.clone());
        canonical
    }
}

impl Default for OrderByCanonicalizer {
    fn default() -> Self {
        Self::new()
    }
}
