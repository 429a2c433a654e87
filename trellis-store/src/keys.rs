//! Cache keys, interning, and the object variant registry.
//!
//! A [`CacheKey`] is an immutable, structurally-interned identifier for one
//! logical query. Two calls with logically-equivalent parameters yield the
//! same `Arc` (pointer equality holds), which makes map lookups cheap and
//! lets the engine compare entries by reference downstream.
//!
//! The same logical object can be cached under several key variants
//! (different derived-property projections, with or without rid); the
//! [`ObjectCacheKeyRegistry`] tracks those sets so a write to one variant
//! can be replayed to all of them.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use trellis_core::{
    AggregationSpec, ApiName, OrderBy, PrimaryKey, RdpConfig, WhereClause,
};

use crate::canonical::{Canonical, IntersectWith};

/// Key of a single-object query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub api_name: ApiName,
    pub primary_key: PrimaryKey,
    /// Derived-property projection, when the object was loaded through one.
    pub rdp: Option<Canonical<RdpConfig>>,
    pub include_rid: bool,
}

/// Key of a list query over a concrete type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListKey {
    pub api_name: ApiName,
    pub where_clause: Canonical<WhereClause>,
    pub order_by: Canonical<OrderBy>,
    pub rdp: Option<Canonical<RdpConfig>>,
    pub intersect: Option<Canonical<IntersectWith>>,
}

/// Key of a list query over an interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InterfaceListKey {
    pub api_name: ApiName,
    pub where_clause: Canonical<WhereClause>,
    pub order_by: Canonical<OrderBy>,
    pub rdp: Option<Canonical<RdpConfig>>,
    pub intersect: Option<Canonical<IntersectWith>>,
}

/// Key of an aggregation query. The aggregate spec itself participates so
/// two structurally different specs never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AggregationKey {
    pub api_name: ApiName,
    pub where_clause: Canonical<WhereClause>,
    pub rdp: Option<Canonical<RdpConfig>>,
    pub intersect: Option<Canonical<IntersectWith>>,
    pub spec: Canonical<AggregationSpec>,
}

/// Tagged union over the per-kind key shapes. Each variant carries a
/// fixed-width field set with explicit `Option`s for absent arguments, so
/// "no RDP" can never be confused with "RDP elided".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKeyData {
    Object(ObjectKey),
    List(ListKey),
    InterfaceList(InterfaceListKey),
    Aggregation(AggregationKey),
}

/// Discriminator of a cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKeyKind {
    Object,
    List,
    InterfaceList,
    Aggregation,
}

impl fmt::Display for CacheKeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheKeyKind::Object => "object",
            CacheKeyKind::List => "list",
            CacheKeyKind::InterfaceList => "interfaceList",
            CacheKeyKind::Aggregation => "aggregation",
        };
        write!(f, "{}", name)
    }
}

/// An interned cache key. Cheap to clone; never mutated after creation.
#[derive(Debug, Clone)]
pub struct CacheKey(Arc<CacheKeyData>);

impl CacheKey {
    fn new(data: CacheKeyData) -> Self {
        Self(Arc::new(data))
    }

    pub fn data(&self) -> &CacheKeyData {
        &self.0
    }

    pub fn kind(&self) -> CacheKeyKind {
        match &*self.0 {
            CacheKeyData::Object(_) => CacheKeyKind::Object,
            CacheKeyData::List(_) => CacheKeyKind::List,
            CacheKeyData::InterfaceList(_) => CacheKeyKind::InterfaceList,
            CacheKeyData::Aggregation(_) => CacheKeyKind::Aggregation,
        }
    }

    /// API name of the object or interface type this key is about.
    pub fn api_name(&self) -> &str {
        match &*self.0 {
            CacheKeyData::Object(k) => &k.api_name,
            CacheKeyData::List(k) => &k.api_name,
            CacheKeyData::InterfaceList(k) => &k.api_name,
            CacheKeyData::Aggregation(k) => &k.api_name,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectKey> {
        match &*self.0 {
            CacheKeyData::Object(k) => Some(k),
            _ => None,
        }
    }

    /// Reference identity. Interned keys with equal data are also
    /// pointer-equal.
    pub fn ptr_eq(a: &CacheKey, b: &CacheKey) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl Eq for CacheKey {}

impl std::hash::Hash for CacheKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

/// Intern table for cache keys.
///
/// Pure lookup/insert; the only side effect is growth of the table.
pub struct CacheKeys {
    intern: Mutex<HashMap<CacheKeyData, CacheKey>>,
}

impl CacheKeys {
    pub fn new() -> Self {
        Self {
            intern: Mutex::new(HashMap::new()),
        }
    }

    /// Return the interned key for `data`, creating it on first use.
    pub fn get(&self, data: CacheKeyData) -> CacheKey {
        let mut intern = self.intern.lock().unwrap();
        if let Some(existing) = intern.get(&data) {
            return existing.clone();
        }
        let key = CacheKey::new(data.clone());
        intern.insert(data, key.clone());
        key
    }

    pub fn len(&self) -> usize {
        self.intern.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.intern.lock().unwrap().is_empty()
    }
}

impl Default for CacheKeys {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry of object key variants.
///
/// Maps `(api_name, primary_key)` to every object cache key that represents
/// a projection of that logical object. A write through any variant is
/// replayed to all registered variants so projections never diverge on
/// shared fields.
pub struct ObjectCacheKeyRegistry {
    variants: Mutex<HashMap<(ApiName, PrimaryKey), HashSet<CacheKey>>>,
}

impl ObjectCacheKeyRegistry {
    pub fn new() -> Self {
        Self {
            variants: Mutex::new(HashMap::new()),
        }
    }

    /// Register an object cache key as a variant of its logical object.
    /// Non-object keys are ignored.
    pub fn register(&self, key: &CacheKey) {
        let Some(object_key) = key.as_object() else {
            return;
        };
        self.variants
            .lock()
            .unwrap()
            .entry((object_key.api_name.clone(), object_key.primary_key.clone()))
            .or_default()
            .insert(key.clone());
    }

    /// All registered variants of a logical object.
    pub fn variants(&self, api_name: &str, primary_key: &PrimaryKey) -> Vec<CacheKey> {
        self.variants
            .lock()
            .unwrap()
            .get(&(api_name.to_string(), primary_key.clone()))
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Variants related to `key` (including `key` itself if registered).
    pub fn related(&self, key: &CacheKey) -> Vec<CacheKey> {
        match key.as_object() {
            Some(object_key) => self.variants(&object_key.api_name, &object_key.primary_key),
            None => Vec::new(),
        }
    }

    pub fn variant_count(&self, api_name: &str, primary_key: &PrimaryKey) -> usize {
        self.variants
            .lock()
            .unwrap()
            .get(&(api_name.to_string(), primary_key.clone()))
            .map(|set| set.len())
            .unwrap_or(0)
    }
}

impl Default for ObjectCacheKeyRegistry {
    fn default() -> Self {
        Self::new()
    }
}
