//! TRELLIS Store - Layered Cache and Subscription Engine
//!
//! An in-process, in-memory cache for a typed object graph fetched from a
//! remote service. Consumers observe queries (objects, lists, interface
//! lists, aggregations) and receive push updates as server fetches and
//! optimistic local mutations land; optimistic mutations roll back
//! atomically by layer id.
//!
//! # Architecture
//!
//! ```text
//! consumer ──observe──▶ Store ──canonicalize──▶ CacheKeys (intern)
//!                        │                          │
//!                        ▼                          ▼
//!                      Query ──fetch──▶ Transport   CacheKey
//!                        │                          │
//!                        └──batch write──▶ Layers (truth + optimistic)
//!                                             │
//!                                             ▼
//!                                         Subjects ──▶ subscribers
//! ```
//!
//! The truth layer holds server state; each optimistic layer holds the
//! writes of one pending mutation. Subjects fan entry changes out with an
//! `is_optimistic` flag; after every batch, type-aware invalidation decides
//! which other queries must refetch.

pub mod batch;
pub mod canonical;
pub mod changes;
pub mod invalidation;
pub mod keys;
pub mod layer;
pub mod optimistic;
pub mod query;
pub mod store;
pub mod subject;

pub use batch::BatchContext;
pub use canonical::{
    Canonical, IntersectCanonicalizer, IntersectWith, OrderByCanonicalizer, RdpCanonicalizer,
    WhereClauseCanonicalizer,
};
pub use changes::Changes;
pub use invalidation::{object_types_that_invalidate, InvalidationInfo, ResolvedType};
pub use keys::{
    AggregationKey, CacheKey, CacheKeyData, CacheKeyKind, CacheKeys, InterfaceListKey, ListKey,
    ObjectCacheKeyRegistry, ObjectKey,
};
pub use layer::{CacheValue, Entry, Layers, ListValue, Status};
pub use optimistic::OptimisticId;
pub use query::{
    AggregationQuery, InterfaceListQuery, ListQuery, ObjectQuery, Query, QueryHandle, QueryState,
};
pub use store::{
    BatchOptions, BatchResult, ObserveAggregationOptions, ObserveListOptions,
    ObserveObjectOptions, Store, StoreConfig,
};
pub use subject::{SubjectPayload, Subjects, Subscription};
