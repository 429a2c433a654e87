//! The store: central coordinator of the layered cache.
//!
//! One `Store` owns the layer chain, the cache-key intern table, the query
//! registry and the subjects. Everything is per-instance state — multiple
//! independent stores can coexist in one process (tests rely on this).
//!
//! Control flow: a caller asks for a query given parameters → parameters
//! are canonicalized → the cache-key registry interns a key → the query is
//! created or reused and the caller subscribes to its subject. Fetches and
//! local mutations apply through [`Store::batch`]; after every batch the
//! store asynchronously fans revalidation out to the other live queries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

use futures_util::future::join_all;
use trellis_core::{
    AggregationSpec, ApiName, OntologyProvider, OrderBy, PrimaryKey, RdpConfig, Transport,
    WhereClause,
};

use crate::batch::BatchContext;
use crate::canonical::{
    Canonical, IntersectCanonicalizer, IntersectWith, OrderByCanonicalizer, RdpCanonicalizer,
    WhereClauseCanonicalizer,
};
use crate::changes::Changes;
use crate::keys::{
    AggregationKey, CacheKey, CacheKeyData, CacheKeys, InterfaceListKey, ListKey,
    ObjectCacheKeyRegistry, ObjectKey,
};
use crate::layer::{value_opt_ptr_eq, Entry, Layers};
use crate::optimistic::OptimisticId;
use crate::query::{
    AggregationQuery, InterfaceListQuery, ListQuery, ObjectQuery, QueryHandle,
};
use crate::subject::{SubjectPayload, Subjects, Subscription};

/// Store-wide tunables.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// A non-forced revalidate within this window of the last completed
    /// fetch for the same key is satisfied from cache.
    pub dedupe_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dedupe_interval: Duration::from_secs(2),
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dedupe_interval(mut self, interval: Duration) -> Self {
        self.dedupe_interval = interval;
        self
    }
}

/// Options for one batch.
#[derive(Default)]
pub struct BatchOptions {
    pub optimistic_id: Option<OptimisticId>,
    pub changes: Option<Arc<Changes>>,
}

impl BatchOptions {
    /// A batch whose writes land in an optimistic layer.
    pub fn optimistic(id: OptimisticId) -> Self {
        Self {
            optimistic_id: Some(id),
            changes: None,
        }
    }
}

/// What a batch returns: the closure's value plus the shared change set
/// (also handed to the async revalidation pass).
pub struct BatchResult<X> {
    pub ret_val: X,
    pub changes: Arc<Changes>,
}

/// Parameters of an object observation.
#[derive(Debug, Clone)]
pub struct ObserveObjectOptions {
    pub api_name: ApiName,
    pub primary_key: PrimaryKey,
    pub rdp: Option<RdpConfig>,
    pub include_rid: bool,
}

impl ObserveObjectOptions {
    pub fn new(api_name: impl Into<ApiName>, primary_key: PrimaryKey) -> Self {
        Self {
            api_name: api_name.into(),
            primary_key,
            rdp: None,
            include_rid: false,
        }
    }

    pub fn with_rdp(mut self, rdp: RdpConfig) -> Self {
        self.rdp = Some(rdp);
        self
    }

    pub fn with_rid(mut self) -> Self {
        self.include_rid = true;
        self
    }
}

/// Parameters of a list observation (concrete type or interface).
#[derive(Debug, Clone)]
pub struct ObserveListOptions {
    pub api_name: ApiName,
    pub where_clause: WhereClause,
    pub order_by: OrderBy,
    pub rdp: Option<RdpConfig>,
    pub intersect: Option<IntersectWith>,
}

impl ObserveListOptions {
    pub fn new(api_name: impl Into<ApiName>) -> Self {
        Self {
            api_name: api_name.into(),
            where_clause: WhereClause::always(),
            order_by: Vec::new(),
            rdp: None,
            intersect: None,
        }
    }

    pub fn with_where(mut self, where_clause: WhereClause) -> Self {
        self.where_clause = where_clause;
        self
    }

    pub fn with_order_by(mut self, order_by: OrderBy) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn with_rdp(mut self, rdp: RdpConfig) -> Self {
        self.rdp = Some(rdp);
        self
    }

    pub fn with_intersect(mut self, intersect: IntersectWith) -> Self {
        self.intersect = Some(intersect);
        self
    }
}

/// Parameters of an aggregation observation.
#[derive(Debug, Clone)]
pub struct ObserveAggregationOptions {
    pub api_name: ApiName,
    pub where_clause: WhereClause,
    pub rdp: Option<RdpConfig>,
    pub intersect: Option<IntersectWith>,
    pub spec: AggregationSpec,
}

impl ObserveAggregationOptions {
    pub fn new(api_name: impl Into<ApiName>, spec: AggregationSpec) -> Self {
        Self {
            api_name: api_name.into(),
            where_clause: WhereClause::always(),
            rdp: None,
            intersect: None,
            spec,
        }
    }

    pub fn with_where(mut self, where_clause: WhereClause) -> Self {
        self.where_clause = where_clause;
        self
    }

    pub fn with_rdp(mut self, rdp: RdpConfig) -> Self {
        self.rdp = Some(rdp);
        self
    }

    pub fn with_intersect(mut self, intersect: IntersectWith) -> Self {
        self.intersect = Some(intersect);
        self
    }
}

/// Central data store with layered cache architecture.
///
/// Truth layer: server state. Optimistic layers: pending local mutations.
/// Batches keep subscribers consistent; the subjects fan entry changes out.
pub struct Store {
    me: Weak<Store>,
    transport: Arc<dyn Transport>,
    ontology: Arc<dyn OntologyProvider>,
    config: StoreConfig,
    layers: RwLock<Layers>,
    cache_keys: CacheKeys,
    objects: ObjectCacheKeyRegistry,
    subjects: Subjects,
    queries: Mutex<HashMap<CacheKey, QueryHandle>>,
    where_canonicalizer: WhereClauseCanonicalizer,
    order_by_canonicalizer: OrderByCanonicalizer,
    rdp_canonicalizer: RdpCanonicalizer,
    intersect_canonicalizer: IntersectCanonicalizer,
}

impl Store {
    pub fn new(transport: Arc<dyn Transport>, ontology: Arc<dyn OntologyProvider>) -> Arc<Self> {
        Self::with_config(transport, ontology, StoreConfig::default())
    }

    pub fn with_config(
        transport: Arc<dyn Transport>,
        ontology: Arc<dyn OntologyProvider>,
        config: StoreConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            transport,
            ontology,
            config,
            layers: RwLock::new(Layers::new()),
            cache_keys: CacheKeys::new(),
            objects: ObjectCacheKeyRegistry::new(),
            subjects: Subjects::new(),
            queries: Mutex::new(HashMap::new()),
            where_canonicalizer: WhereClauseCanonicalizer::new(),
            order_by_canonicalizer: OrderByCanonicalizer::new(),
            rdp_canonicalizer: RdpCanonicalizer::new(),
            intersect_canonicalizer: IntersectCanonicalizer::new(),
        })
    }

    fn me(&self) -> Arc<Store> {
        self.me.upgrade().expect("store is alive while borrowed")
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn ontology(&self) -> &Arc<dyn OntologyProvider> {
        &self.ontology
    }

    /// The object variant registry.
    pub fn objects(&self) -> &ObjectCacheKeyRegistry {
        &self.objects
    }

    pub(crate) fn subjects(&self) -> &Subjects {
        &self.subjects
    }

    pub(crate) fn layers_ref(&self) -> RwLockReadGuard<'_, Layers> {
        self.layers.read().unwrap()
    }

    pub(crate) fn layers_mut(&self) -> RwLockWriteGuard<'_, Layers> {
        self.layers.write().unwrap()
    }

    // ========================================================================
    // CANONICALIZATION & CACHE KEYS
    // ========================================================================

    pub fn canonicalize_where_clause(&self, where_clause: &WhereClause) -> Canonical<WhereClause> {
        self.where_canonicalizer.canonicalize(where_clause)
    }

    pub fn object_cache_key(
        &self,
        api_name: &str,
        primary_key: PrimaryKey,
        rdp: Option<&RdpConfig>,
        include_rid: bool,
    ) -> CacheKey {
        let rdp = rdp.map(|config| self.rdp_canonicalizer.canonicalize(config));
        self.object_cache_key_canonical(api_name, primary_key, rdp, include_rid)
    }

    pub(crate) fn object_cache_key_canonical(
        &self,
        api_name: &str,
        primary_key: PrimaryKey,
        rdp: Option<Canonical<RdpConfig>>,
        include_rid: bool,
    ) -> CacheKey {
        self.cache_keys.get(CacheKeyData::Object(ObjectKey {
            api_name: api_name.to_string(),
            primary_key,
            rdp,
            include_rid,
        }))
    }

    pub fn list_cache_key(&self, options: &ObserveListOptions) -> CacheKey {
        self.cache_keys.get(CacheKeyData::List(ListKey {
            api_name: options.api_name.clone(),
            where_clause: self.where_canonicalizer.canonicalize(&options.where_clause),
            order_by: self.order_by_canonicalizer.canonicalize(&options.order_by),
            rdp: options
                .rdp
                .as_ref()
                .map(|config| self.rdp_canonicalizer.canonicalize(config)),
            intersect: options
                .intersect
                .as_ref()
                .map(|members| self.intersect_canonicalizer.canonicalize(members)),
        }))
    }

    pub fn interface_list_cache_key(&self, options: &ObserveListOptions) -> CacheKey {
        self.cache_keys
            .get(CacheKeyData::InterfaceList(InterfaceListKey {
                api_name: options.api_name.clone(),
                where_clause: self.where_canonicalizer.canonicalize(&options.where_clause),
                order_by: self.order_by_canonicalizer.canonicalize(&options.order_by),
                rdp: options
                    .rdp
                    .as_ref()
                    .map(|config| self.rdp_canonicalizer.canonicalize(config)),
                intersect: options
                    .intersect
                    .as_ref()
                    .map(|members| self.intersect_canonicalizer.canonicalize(members)),
            }))
    }

    pub fn aggregation_cache_key(&self, options: &ObserveAggregationOptions) -> CacheKey {
        self.cache_keys
            .get(CacheKeyData::Aggregation(AggregationKey {
                api_name: options.api_name.clone(),
                where_clause: self.where_canonicalizer.canonicalize(&options.where_clause),
                rdp: options
                    .rdp
                    .as_ref()
                    .map(|config| self.rdp_canonicalizer.canonicalize(config)),
                intersect: options
                    .intersect
                    .as_ref()
                    .map(|members| self.intersect_canonicalizer.canonicalize(members)),
                spec: Canonical::new(options.spec.clone().canonicalized()),
            }))
    }

    // ========================================================================
    // QUERY REGISTRY
    // ========================================================================

    /// Get or lazily create the object query for these parameters.
    pub fn object_query(&self, options: ObserveObjectOptions) -> Arc<ObjectQuery> {
        let key = self.object_cache_key(
            &options.api_name,
            options.primary_key,
            options.rdp.as_ref(),
            options.include_rid,
        );
        // Register the variant relationship up front so the very first
        // write propagates correctly.
        self.objects.register(&key);

        let mut queries = self.queries.lock().unwrap();
        if let Some(QueryHandle::Object(existing)) = queries.get(&key) {
            return Arc::clone(existing);
        }
        let query = ObjectQuery::new(&self.me(), key.clone());
        queries.insert(key, QueryHandle::Object(Arc::clone(&query)));
        query
    }

    pub fn list_query(&self, options: ObserveListOptions) -> Arc<ListQuery> {
        let key = self.list_cache_key(&options);
        let mut queries = self.queries.lock().unwrap();
        if let Some(QueryHandle::List(existing)) = queries.get(&key) {
            return Arc::clone(existing);
        }
        let query = ListQuery::new(&self.me(), key.clone());
        queries.insert(key, QueryHandle::List(Arc::clone(&query)));
        query
    }

    pub fn interface_list_query(
        &self,
        options: ObserveListOptions,
    ) -> Arc<InterfaceListQuery> {
        let key = self.interface_list_cache_key(&options);
        let mut queries = self.queries.lock().unwrap();
        if let Some(QueryHandle::InterfaceList(existing)) = queries.get(&key) {
            return Arc::clone(existing);
        }
        let query = InterfaceListQuery::new(&self.me(), key.clone());
        queries.insert(key, QueryHandle::InterfaceList(Arc::clone(&query)));
        query
    }

    pub fn aggregation_query(
        &self,
        options: ObserveAggregationOptions,
    ) -> Arc<AggregationQuery> {
        let key = self.aggregation_cache_key(&options);
        let mut queries = self.queries.lock().unwrap();
        if let Some(QueryHandle::Aggregation(existing)) = queries.get(&key) {
            return Arc::clone(existing);
        }
        let query = AggregationQuery::new(&self.me(), key.clone());
        queries.insert(key, QueryHandle::Aggregation(Arc::clone(&query)));
        query
    }

    /// The live query for a key, if one was created.
    pub fn peek_query(&self, key: &CacheKey) -> Option<QueryHandle> {
        self.queries.lock().unwrap().get(key).cloned()
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }

    /// Explicitly drop a query and its subject. Queries are never evicted
    /// implicitly.
    pub fn evict_query(&self, key: &CacheKey) {
        self.queries.lock().unwrap().remove(key);
        self.subjects.remove(key);
    }

    // ========================================================================
    // READS & SUBSCRIPTIONS
    // ========================================================================

    /// The effective entry for a key (top of the layer stack).
    pub fn get_value(&self, key: &CacheKey) -> Option<Arc<Entry>> {
        self.layers_ref().top_get(key)
    }

    /// Subscribe to a key. The subscriber immediately receives the current
    /// effective state (an init entry when nothing was ever stored).
    pub fn subscribe(&self, key: &CacheKey) -> Subscription {
        let initial = {
            let layers = self.layers_ref();
            match layers.top_get(key) {
                Some(entry) => {
                    let truth = layers.truth_get(key);
                    let is_optimistic = !value_opt_ptr_eq(
                        entry.value.as_ref(),
                        truth.as_ref().and_then(|truth| truth.value.as_ref()),
                    );
                    SubjectPayload {
                        entry,
                        is_optimistic,
                    }
                }
                None => SubjectPayload {
                    entry: Entry::init(key.clone()),
                    is_optimistic: false,
                },
            }
        };
        self.subjects.subscribe(key, initial)
    }

    // ========================================================================
    // BATCHING
    // ========================================================================

    /// Apply a set of reads and writes as one atomic unit.
    ///
    /// Synchronous: the cache is fully updated and subscribers notified by
    /// the time this returns. The revalidation of other queries happens off
    /// the critical path in a spawned task; its failure is logged, never
    /// surfaced through the return value.
    pub fn batch<X, F>(&self, options: BatchOptions, batch_fn: F) -> BatchResult<X>
    where
        F: FnOnce(&mut BatchContext<'_>) -> X,
    {
        let changes = options.changes.unwrap_or_else(Changes::new);
        let mut context = BatchContext::new(self, options.optimistic_id, Arc::clone(&changes));
        let ret_val = batch_fn(&mut context);
        context.flush();

        let store = self.me();
        let task_changes = Arc::clone(&changes);
        let optimistic_id = options.optimistic_id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    store
                        .maybe_revalidate_queries(task_changes, optimistic_id)
                        .await;
                });
            }
            Err(_) => {
                tracing::debug!("no async runtime; skipping post-batch revalidation");
            }
        }

        BatchResult { ret_val, changes }
    }

    /// Roll back an optimistic mutation: splice out every layer carrying
    /// `layer_id` and notify each affected key whose effective entry
    /// changed. Truth is never touched.
    pub fn remove_layer(&self, layer_id: OptimisticId) {
        let notifications = {
            let mut layers = self.layers_mut();

            // Effective entries before removal, first sighting per key.
            let affected: Vec<(CacheKey, Option<Arc<Entry>>)> = layers
                .keys_in_layers(layer_id)
                .into_iter()
                .map(|key| {
                    let effective = layers.top_get(&key);
                    (key, effective)
                })
                .collect();

            layers.remove_layer(layer_id);

            affected
                .into_iter()
                .filter_map(|(key, old_entry)| {
                    let new_entry = layers.top_get(&key);
                    if crate::layer::entry_opt_ptr_eq(old_entry.as_ref(), new_entry.as_ref()) {
                        return None;
                    }
                    let entry = new_entry.unwrap_or_else(|| Entry::init(key.clone()));
                    let truth = layers.truth_get(&key);
                    let is_optimistic = !value_opt_ptr_eq(
                        entry.value.as_ref(),
                        truth.as_ref().and_then(|truth| truth.value.as_ref()),
                    );
                    Some((
                        key,
                        SubjectPayload {
                            entry,
                            is_optimistic,
                        },
                    ))
                })
                .collect::<Vec<_>>()
        };

        for (key, payload) in notifications {
            // Only keys someone asked about get a subject here.
            self.subjects.next(&key, payload, /* create */ false);
        }
    }

    // ========================================================================
    // INVALIDATION
    // ========================================================================

    /// Force-revalidate the plain object query for one object.
    pub async fn invalidate_object(&self, api_name: &str, primary_key: PrimaryKey) {
        let query = self.object_query(ObserveObjectOptions::new(api_name, primary_key));
        query.revalidate(/* force */ true).await;
    }

    /// Fan a type-level invalidation out to every live query. Queries whose
    /// keys are already in `changes.modified` are skipped. Individual query
    /// failures are logged and do not abort the fan-out.
    pub async fn invalidate_object_type(
        &self,
        api_name: &str,
        changes: Option<Arc<Changes>>,
    ) -> Arc<Changes> {
        let changes = changes.unwrap_or_else(Changes::new);
        let handles: Vec<QueryHandle> =
            self.queries.lock().unwrap().values().cloned().collect();

        let tasks = handles
            .into_iter()
            .filter(|handle| !changes.is_modified(handle.cache_key()))
            .map(|handle| {
                let changes = Arc::clone(&changes);
                let api_name = api_name.to_string();
                async move {
                    if let Err(error) = handle
                        .as_query()
                        .invalidate_object_type(&api_name, changes)
                        .await
                    {
                        tracing::debug!(%error, "type invalidation failed for a query");
                    }
                }
            });
        join_all(tasks).await;
        changes
    }

    /// Post-batch pass: let every live query react to the batch's changes.
    pub(crate) async fn maybe_revalidate_queries(
        self: Arc<Self>,
        changes: Arc<Changes>,
        optimistic_id: Option<OptimisticId>,
    ) {
        if changes.is_empty() {
            tracing::debug!("no changes, skipping post-batch revalidation");
            return;
        }
        tracing::debug!(summary = %changes.summary(), "revalidating queries after batch");

        let handles: Vec<QueryHandle> =
            self.queries.lock().unwrap().values().cloned().collect();
        let tasks = handles.into_iter().map(|handle| {
            let changes = Arc::clone(&changes);
            async move {
                if let Err(error) = handle
                    .as_query()
                    .maybe_update_and_revalidate(changes, optimistic_id)
                    .await
                {
                    tracing::error!(%error, "post-batch revalidation failed for a query");
                }
            }
        });
        join_all(tasks).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{CacheValue, Status};
    use serde_json::json;
    use trellis_core::ObjectHolder;
    use trellis_test_utils::{MockOntology, MockTransport};

    fn make_store() -> Arc<Store> {
        Store::new(
            Arc::new(MockTransport::new()),
            Arc::new(MockOntology::new()),
        )
    }

    fn employee_value(name: &str) -> CacheValue {
        CacheValue::Object(Arc::new(
            ObjectHolder::new("Employee", "emp1").with_property("name", json!(name)),
        ))
    }

    fn entry_name(entry: &Entry) -> String {
        entry
            .value
            .as_ref()
            .and_then(|value| value.as_object())
            .and_then(|object| object.property("name"))
            .and_then(|value| value.as_str())
            .unwrap_or_default()
            .to_string()
    }

    #[tokio::test]
    async fn test_end_to_end_optimistic_write_and_rollback() {
        let store = make_store();
        let key = store.object_cache_key("Employee", "emp1".into(), None, false);

        // Truth: name = "A".
        store.batch(BatchOptions::default(), |batch| {
            batch.write(&key, Some(employee_value("A")), Status::Loaded);
        });

        let mut sub = store.subscribe(&key);
        let initial = sub.recv().await.unwrap();
        assert_eq!(entry_name(&initial.entry), "A");
        assert!(!initial.is_optimistic);

        // Optimistic layer: name = "B".
        let o1 = OptimisticId::new();
        store.batch(BatchOptions::optimistic(o1), |batch| {
            batch.write(&key, Some(employee_value("B")), Status::Loaded);
        });

        let optimistic = sub.try_recv().expect("optimistic payload");
        assert_eq!(entry_name(&optimistic.entry), "B");
        assert!(optimistic.is_optimistic);
        assert_eq!(
            entry_name(&store.get_value(&key).unwrap()),
            "B",
            "effective read sees the optimistic value"
        );

        // Roll back.
        store.remove_layer(o1);
        let rolled_back = sub.try_recv().expect("rollback payload");
        assert_eq!(entry_name(&rolled_back.entry), "A");
        assert!(!rolled_back.is_optimistic);
        assert_eq!(entry_name(&store.get_value(&key).unwrap()), "A");
    }

    #[tokio::test]
    async fn test_removal_recomputation_across_stacked_layers() {
        let store = make_store();
        let key = store.object_cache_key("Employee", "emp1".into(), None, false);

        store.batch(BatchOptions::default(), |batch| {
            batch.write(&key, Some(employee_value("v0")), Status::Loaded);
        });

        let l1 = OptimisticId::new();
        store.batch(BatchOptions::optimistic(l1), |batch| {
            batch.write(&key, Some(employee_value("v1")), Status::Loaded);
        });
        let l2 = OptimisticId::new();
        store.batch(BatchOptions::optimistic(l2), |batch| {
            batch.write(&key, Some(employee_value("v2")), Status::Loaded);
        });

        let mut sub = store.subscribe(&key);
        sub.recv().await.unwrap(); // current state: v2

        store.remove_layer(l2);
        let after_l2 = sub.try_recv().expect("notified once for l2 removal");
        assert_eq!(entry_name(&after_l2.entry), "v1");
        assert!(after_l2.is_optimistic);
        assert!(sub.try_recv().is_none(), "at most one emission per removal");

        store.remove_layer(l1);
        let after_l1 = sub.try_recv().expect("notified once for l1 removal");
        assert_eq!(entry_name(&after_l1.entry), "v0");
        assert!(!after_l1.is_optimistic);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_remove_layer_is_silent_when_shadowed() {
        let store = make_store();
        let key = store.object_cache_key("Employee", "emp1".into(), None, false);

        let lower = OptimisticId::new();
        store.batch(BatchOptions::optimistic(lower), |batch| {
            batch.write(&key, Some(employee_value("lower")), Status::Loaded);
        });
        let upper = OptimisticId::new();
        store.batch(BatchOptions::optimistic(upper), |batch| {
            batch.write(&key, Some(employee_value("upper")), Status::Loaded);
        });

        let mut sub = store.subscribe(&key);
        sub.recv().await.unwrap();

        // Removing the shadowed layer leaves the effective entry untouched:
        // no notification.
        store.remove_layer(lower);
        assert!(sub.try_recv().is_none());
        assert_eq!(entry_name(&store.get_value(&key).unwrap()), "upper");
    }

    #[tokio::test]
    async fn test_rollback_to_unknown_emits_init_entry() {
        let store = make_store();
        let key = store.object_cache_key("Employee", "emp1".into(), None, false);

        let id = OptimisticId::new();
        store.batch(BatchOptions::optimistic(id), |batch| {
            batch.write(&key, Some(employee_value("only-optimistic")), Status::Loaded);
        });

        let mut sub = store.subscribe(&key);
        sub.recv().await.unwrap();

        store.remove_layer(id);
        let payload = sub.try_recv().expect("rollback payload");
        assert_eq!(payload.entry.status, Status::Init);
        assert!(payload.entry.value.is_none());
        assert!(!payload.is_optimistic);
    }

    #[tokio::test]
    async fn test_queries_are_deduplicated_by_canonical_parameters() {
        let store = make_store();

        let a = store.list_query(
            ObserveListOptions::new("Employee").with_where(WhereClause::and(vec![
                WhereClause::eq("a", json!(1)),
                WhereClause::eq("b", json!(2)),
            ])),
        );
        let b = store.list_query(
            ObserveListOptions::new("Employee").with_where(WhereClause::and(vec![
                WhereClause::eq("b", json!(2)),
                WhereClause::eq("a", json!(1)),
            ])),
        );

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.query_count(), 1);
    }

    #[tokio::test]
    async fn test_list_and_interface_list_keys_never_collide() {
        let store = make_store();
        let list = store.list_cache_key(&ObserveListOptions::new("Foo"));
        let interface = store.interface_list_cache_key(&ObserveListOptions::new("Foo"));
        assert_ne!(list, interface);
    }

    #[tokio::test]
    async fn test_evict_query_drops_query_and_subject() {
        let store = make_store();
        let query = store.object_query(ObserveObjectOptions::new("Employee", "emp1".into()));
        let key = query.cache_key().clone();
        assert!(store.peek_query(&key).is_some());

        store.evict_query(&key);
        assert!(store.peek_query(&key).is_none());
    }

    #[tokio::test]
    async fn test_batch_returns_changes_synchronously() {
        let store = make_store();
        let key = store.object_cache_key("Employee", "emp1".into(), None, false);

        let result = store.batch(BatchOptions::default(), |batch| {
            batch.write(&key, Some(employee_value("A")), Status::Loaded);
            42
        });

        assert_eq!(result.ret_val, 42);
        assert!(result.changes.is_modified(&key));
    }
}
