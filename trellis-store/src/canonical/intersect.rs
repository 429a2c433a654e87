//! Intersect-with canonicalization.
//!
//! A list query may carry secondary object sets (each described by a where
//! clause over the same type) that are ANDed into the primary set.
//! Intersection is order-independent, so the canonical form sorts and
//! dedupes the member clauses after canonicalizing each one.

use std::collections::HashMap;
use std::sync::Mutex;

use trellis_core::WhereClause;

use super::where_clause::normalize_where;
use super::{structural_hash, Canonical};

/// Secondary object sets intersected into a list query.
pub type IntersectWith = Vec<WhereClause>;

pub struct IntersectCanonicalizer {
    memo: Mutex<HashMap<[u8; 32], Canonical<IntersectWith>>>,
}

impl IntersectCanonicalizer {
    pub fn new() -> Self {
        Self {
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn canonicalize(&self, raw: &IntersectWith) -> Canonical<IntersectWith> {
        let raw_hash = structural_hash(raw);
        if let Some(hit) = self.memo.lock().unwrap().get(&raw_hash) {
            return hit.clone();
        }

        let mut normalized: IntersectWith = raw.iter().map(normalize_where).collect();
        normalized.sort_by_cached_key(|clause| {
            serde_json::to_string(clause).expect("where clauses serialize infallibly")
        });
        normalized.dedup();

        let canonical = Canonical::new(normalized);
        self.memo
            .lock()
            .unwrap()
            .insert(raw_hash, canonical.clone());
        canonical
    }
}

impl Default for IntersectCanonicalizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_member_order_irrelevant() {
        let canonicalizer = IntersectCanonicalizer::new();
        let a = vec![
            WhereClause::eq("active", json!(true)),
            WhereClause::eq("remote", json!(false)),
        ];
        let b = vec![
            WhereClause::eq("remote", json!(false)),
            WhereClause::eq("active", json!(true)),
        ];

        assert_eq!(canonicalizer.canonicalize(&a), canonicalizer.canonicalize(&b));
    }

    #[test]
    fn test_duplicate_members_dropped() {
        let canonicalizer = IntersectCanonicalizer::new();
        let raw = vec![
            WhereClause::eq("active", json!(true)),
            WhereClause::eq("active", json!(true)),
        ];

        assert_eq!(canonicalizer.canonicalize(&raw).len(), 1);
    }
}
