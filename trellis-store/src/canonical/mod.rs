//! Canonical forms for query parameters.
//!
//! Logically-identical queries must share one cache key, so every
//! caller-supplied filter, ordering, derived-property clause and
//! intersection list is reduced to a stable, order-independent canonical
//! form before key construction. Canonicalization is pure, deterministic
//! and idempotent; each canonicalizer memoizes by a structural hash of the
//! raw input.

pub mod intersect;
pub mod order_by;
pub mod rdp;
pub mod where_clause;

pub use intersect::{IntersectCanonicalizer, IntersectWith};
pub use order_by::OrderByCanonicalizer;
pub use rdp::RdpCanonicalizer;
pub use where_clause::WhereClauseCanonicalizer;

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::ops::Deref;
use std::sync::Arc;

/// SHA-256 over the serialized form of a value. Used both as the memo-table
/// key for raw inputs and as the identity of a canonical form.
pub fn structural_hash<T: Serialize>(value: &T) -> [u8; 32] {
    let bytes = serde_json::to_vec(value).expect("canonical types serialize infallibly");
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// A canonicalized value.
///
/// Equality and hashing go through the structural digest, so a `Canonical`
/// can sit inside a cache key even when `T` itself is not hashable
/// (e.g. it contains `serde_json::Value`).
pub struct Canonical<T> {
    value: Arc<T>,
    digest: [u8; 32],
}

impl<T: Serialize> Canonical<T> {
    /// Wrap an already-normalized value.
    pub fn new(value: T) -> Self {
        let digest = structural_hash(&value);
        Self {
            value: Arc::new(value),
            digest,
        }
    }
}

impl<T> Canonical<T> {
    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }
}

impl<T> Clone for Canonical<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            digest: self.digest,
        }
    }
}

impl<T> Deref for Canonical<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> PartialEq for Canonical<T> {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest
    }
}

impl<T> Eq for Canonical<T> {}

impl<T> std::hash::Hash for Canonical<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.digest.hash(state);
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Canonical<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Canonical").field(&self.value).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_hash_is_deterministic() {
        let a = structural_hash(&vec![1, 2, 3]);
        let b = structural_hash(&vec![1, 2, 3]);
        assert_eq!(a, b);
        assert_ne!(a, structural_hash(&vec![3, 2, 1]));
    }

    #[test]
    fn test_canonical_equality_by_digest() {
        let a = Canonical::new(vec![1, 2]);
        let b = Canonical::new(vec![1, 2]);
        let c = Canonical::new(vec![2, 1]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
