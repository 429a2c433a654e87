//! The layered entry store.
//!
//! Entries live in a chain of layers: the truth layer (index 0) holds what
//! the server last said; each optimistic layer above it holds the writes of
//! one pending local mutation. A layer physically stores only the entries
//! written directly into it; the effective value for a key is found by
//! walking from the top layer toward truth and returning the first hit.
//!
//! The chain is kept as a vector ordered truth-first: a node's parent is
//! simply the node below it, which makes id-based splicing a `retain`.
//! The truth node has no [`OptimisticId`] and can never be removed —
//! removal takes a non-optional id, so "remove truth" is unrepresentable.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use trellis_core::{AggregationResult, ObjectHolder, Timestamp, TrellisError};

use crate::keys::CacheKey;
use crate::optimistic::OptimisticId;

/// Lifecycle status of a query / entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Init,
    Loading,
    Loaded,
    Error,
}

/// A list entry's payload: the member objects, by cache key. The store is
/// normalized; object property data lives only in object entries.
#[derive(Debug, Clone, PartialEq)]
pub struct ListValue {
    pub items: Vec<CacheKey>,
}

/// Cached payload of an entry.
///
/// `Tombstone` means "known to be deleted" — distinct from an absent entry,
/// which means "never fetched".
#[derive(Debug, Clone)]
pub enum CacheValue {
    Object(Arc<ObjectHolder>),
    List(Arc<ListValue>),
    Aggregation(Arc<AggregationResult>),
    Tombstone,
}

impl CacheValue {
    /// Reference identity; used everywhere the engine asks "did this key's
    /// value actually change".
    pub fn ptr_eq(a: &CacheValue, b: &CacheValue) -> bool {
        match (a, b) {
            (CacheValue::Object(x), CacheValue::Object(y)) => Arc::ptr_eq(x, y),
            (CacheValue::List(x), CacheValue::List(y)) => Arc::ptr_eq(x, y),
            (CacheValue::Aggregation(x), CacheValue::Aggregation(y)) => Arc::ptr_eq(x, y),
            (CacheValue::Tombstone, CacheValue::Tombstone) => true,
            _ => false,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, CacheValue::Tombstone)
    }

    pub fn as_object(&self) -> Option<&Arc<ObjectHolder>> {
        match self {
            CacheValue::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Arc<ListValue>> {
        match self {
            CacheValue::List(list) => Some(list),
            _ => None,
        }
    }
}

/// Reference identity over optional values.
pub fn value_opt_ptr_eq(a: Option<&CacheValue>, b: Option<&CacheValue>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => CacheValue::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// One immutable cache entry. Updates create new entries.
#[derive(Debug, Clone)]
pub struct Entry {
    pub cache_key: CacheKey,
    /// `None` means the key has never been fetched.
    pub value: Option<CacheValue>,
    pub last_updated: Timestamp,
    pub status: Status,
    /// Set when `status == Error`.
    pub error: Option<Arc<TrellisError>>,
}

impl Entry {
    /// The state a subscriber sees before anything was ever written.
    pub fn init(cache_key: CacheKey) -> Arc<Entry> {
        Arc::new(Entry {
            cache_key,
            value: None,
            last_updated: DateTime::UNIX_EPOCH,
            status: Status::Init,
            error: None,
        })
    }

    pub fn new(
        cache_key: CacheKey,
        value: Option<CacheValue>,
        status: Status,
        error: Option<Arc<TrellisError>>,
    ) -> Arc<Entry> {
        Arc::new(Entry {
            cache_key,
            value,
            last_updated: Utc::now(),
            status,
            error,
        })
    }
}

/// Reference identity over optional entries.
pub fn entry_opt_ptr_eq(a: Option<&Arc<Entry>>, b: Option<&Arc<Entry>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

struct LayerNode {
    /// `None` only for the truth node at index 0.
    layer_id: Option<OptimisticId>,
    entries: HashMap<CacheKey, Arc<Entry>>,
}

/// The layer chain. Truth sits at index 0; the top of the stack is the last
/// node. Only the `Store` mutates this.
pub struct Layers {
    chain: Vec<LayerNode>,
}

impl Layers {
    pub fn new() -> Self {
        Self {
            chain: vec![LayerNode {
                layer_id: None,
                entries: HashMap::new(),
            }],
        }
    }

    /// Number of layers including truth.
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        false // the truth layer always exists
    }

    pub fn top_is_truth(&self) -> bool {
        self.chain.len() == 1
    }

    /// Read directly from the truth layer.
    pub fn truth_get(&self, key: &CacheKey) -> Option<Arc<Entry>> {
        self.chain[0].entries.get(key).cloned()
    }

    /// Effective read: the first hit walking top → truth.
    pub fn top_get(&self, key: &CacheKey) -> Option<Arc<Entry>> {
        self.chain
            .iter()
            .rev()
            .find_map(|node| node.entries.get(key).cloned())
    }

    /// Write into the truth layer.
    pub fn set_truth(&mut self, key: CacheKey, entry: Arc<Entry>) {
        self.chain[0].entries.insert(key, entry);
    }

    /// Write into the current top layer.
    pub fn set_top(&mut self, key: CacheKey, entry: Arc<Entry>) {
        self.chain
            .last_mut()
            .expect("truth layer always exists")
            .entries
            .insert(key, entry);
    }

    /// Push a new layer on top of the current top.
    pub fn add_layer(&mut self, layer_id: OptimisticId) {
        self.chain.push(LayerNode {
            layer_id: Some(layer_id),
            entries: HashMap::new(),
        });
    }

    /// Splice out every layer with the given id, preserving the relative
    /// order of the rest. Never touches the truth layer.
    pub fn remove_layer(&mut self, layer_id: OptimisticId) {
        self.chain.retain(|node| node.layer_id != Some(layer_id));
    }

    /// Keys written into any layer with the given id, deduplicated,
    /// ordered top-down (first sighting wins).
    pub fn keys_in_layers(&self, layer_id: OptimisticId) -> Vec<CacheKey> {
        let mut seen = Vec::new();
        for node in self.chain.iter().rev() {
            if node.layer_id != Some(layer_id) {
                continue;
            }
            for key in node.entries.keys() {
                if !seen.contains(key) {
                    seen.push(key.clone());
                }
            }
        }
        seen
    }

    /// All keys present in the truth layer.
    pub fn truth_keys(&self) -> Vec<CacheKey> {
        self.chain[0].entries.keys().cloned().collect()
    }
}

impl Default for Layers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{CacheKeyData, CacheKeys, ObjectKey};
    use serde_json::json;

    fn make_key(keys: &CacheKeys, pk: &str) -> CacheKey {
        keys.get(CacheKeyData::Object(ObjectKey {
            api_name: "Employee".to_string(),
            primary_key: pk.into(),
            rdp: None,
            include_rid: false,
        }))
    }

    fn object_entry(key: &CacheKey, name: &str) -> Arc<Entry> {
        let obj = ObjectHolder::new("Employee", key.as_object().unwrap().primary_key.clone())
            .with_property("name", json!(name));
        Entry::new(
            key.clone(),
            Some(CacheValue::Object(Arc::new(obj))),
            Status::Loaded,
            None,
        )
    }

    #[test]
    fn test_effective_read_prefers_highest_layer() {
        let keys = CacheKeys::new();
        let key = make_key(&keys, "emp1");
        let mut layers = Layers::new();

        let truth_entry = object_entry(&key, "A");
        layers.set_truth(key.clone(), truth_entry.clone());
        assert!(entry_opt_ptr_eq(
            layers.top_get(&key).as_ref(),
            Some(&truth_entry)
        ));

        let l1 = OptimisticId::new();
        layers.add_layer(l1);
        let optimistic_entry = object_entry(&key, "B");
        layers.set_top(key.clone(), optimistic_entry.clone());

        assert!(entry_opt_ptr_eq(
            layers.top_get(&key).as_ref(),
            Some(&optimistic_entry)
        ));
        // Truth is untouched.
        assert!(entry_opt_ptr_eq(
            layers.truth_get(&key).as_ref(),
            Some(&truth_entry)
        ));
    }

    #[test]
    fn test_unknown_key_reads_none() {
        let keys = CacheKeys::new();
        let key = make_key(&keys, "emp1");
        let layers = Layers::new();
        assert!(layers.top_get(&key).is_none());
    }

    #[test]
    fn test_remove_layer_splices_middle_of_chain() {
        let keys = CacheKeys::new();
        let key = make_key(&keys, "emp1");
        let mut layers = Layers::new();

        let v0 = object_entry(&key, "v0");
        layers.set_truth(key.clone(), v0.clone());

        let l1 = OptimisticId::new();
        layers.add_layer(l1);
        let v1 = object_entry(&key, "v1");
        layers.set_top(key.clone(), v1.clone());

        let l2 = OptimisticId::new();
        layers.add_layer(l2);
        let v2 = object_entry(&key, "v2");
        layers.set_top(key.clone(), v2.clone());

        // Remove the middle layer: the top layer's value still wins.
        layers.remove_layer(l1);
        assert_eq!(layers.len(), 2);
        assert!(entry_opt_ptr_eq(layers.top_get(&key).as_ref(), Some(&v2)));

        layers.remove_layer(l2);
        assert!(layers.top_is_truth());
        assert!(entry_opt_ptr_eq(layers.top_get(&key).as_ref(), Some(&v0)));
    }

    #[test]
    fn test_remove_layer_removes_all_layers_with_id() {
        let keys = CacheKeys::new();
        let key = make_key(&keys, "emp1");
        let mut layers = Layers::new();

        let shared = OptimisticId::new();
        let other = OptimisticId::new();
        layers.add_layer(shared);
        layers.add_layer(other);
        layers.add_layer(shared);
        layers.set_top(key.clone(), object_entry(&key, "x"));
        assert_eq!(layers.len(), 4);

        layers.remove_layer(shared);
        assert_eq!(layers.len(), 2);
        assert!(layers.top_get(&key).is_none());
    }

    #[test]
    fn test_keys_in_layers_dedupes_top_down() {
        let keys = CacheKeys::new();
        let k1 = make_key(&keys, "emp1");
        let k2 = make_key(&keys, "emp2");
        let mut layers = Layers::new();

        let id = OptimisticId::new();
        layers.add_layer(id);
        layers.set_top(k1.clone(), object_entry(&k1, "a"));
        layers.add_layer(id);
        layers.set_top(k1.clone(), object_entry(&k1, "b"));
        layers.set_top(k2.clone(), object_entry(&k2, "c"));

        let collected = layers.keys_in_layers(id);
        assert_eq!(collected.len(), 2);
        assert!(collected.contains(&k1));
        assert!(collected.contains(&k2));
    }

    #[test]
    fn test_tombstone_distinct_from_absent() {
        let keys = CacheKeys::new();
        let key = make_key(&keys, "emp1");
        let mut layers = Layers::new();

        let tombstone = Entry::new(
            key.clone(),
            Some(CacheValue::Tombstone),
            Status::Loaded,
            None,
        );
        layers.set_truth(key.clone(), tombstone);

        let read = layers.top_get(&key).expect("tombstone entry present");
        assert!(read.value.as_ref().unwrap().is_tombstone());
    }
}
