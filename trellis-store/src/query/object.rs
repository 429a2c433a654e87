//! Single-object queries and variant write propagation.
//!
//! The cache can hold the same logical object under several key variants
//! (plain, RDP-projected, rid-included). Every write funnels through
//! [`propagate_object_write`], which registers the source key, writes it,
//! and replays the value to every actively-observed variant — merging
//! derived fields so projections never show stale data relative to each
//! other on shared fields.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures_util::FutureExt;
use trellis_core::{
    ApiName, FetchError, ObjectHolder, PrimaryKey, TrellisError, TrellisResult,
};

use crate::batch::BatchContext;
use crate::canonical::Canonical;
use crate::changes::Changes;
use crate::keys::CacheKey;
use crate::layer::{CacheValue, Entry, Status};
use crate::optimistic::OptimisticId;
use crate::store::{BatchOptions, Store};
use crate::subject::Subscription;

use super::{Query, QueryState};

/// Query for one object by primary key.
pub struct ObjectQuery {
    me: Weak<ObjectQuery>,
    store: Weak<Store>,
    state: Arc<QueryState>,
    cache_key: CacheKey,
    api_name: ApiName,
    primary_key: PrimaryKey,
    include_rid: bool,
}

impl ObjectQuery {
    pub(crate) fn new(store: &Arc<Store>, cache_key: CacheKey) -> Arc<Self> {
        let key = cache_key
            .as_object()
            .expect("ObjectQuery requires an object cache key");
        let api_name = key.api_name.clone();
        let primary_key = key.primary_key.clone();
        let include_rid = key.include_rid;
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            store: Arc::downgrade(store),
            state: QueryState::new(store.config().dedupe_interval),
            api_name,
            primary_key,
            include_rid,
            cache_key,
        })
    }

    pub fn cache_key(&self) -> &CacheKey {
        &self.cache_key
    }

    pub fn status(&self) -> Status {
        self.state.status()
    }

    pub fn api_name(&self) -> &str {
        &self.api_name
    }

    pub fn primary_key(&self) -> &PrimaryKey {
        &self.primary_key
    }

    /// Subscribe to this query's cache key.
    pub fn subscribe(&self) -> Option<Subscription> {
        self.store.upgrade().map(|store| store.subscribe(&self.cache_key))
    }

    /// Fetch and store, deduped against concurrent and recent fetches.
    pub async fn revalidate(&self, force: bool) {
        let Some(this) = self.me.upgrade() else {
            return;
        };
        Arc::clone(&self.state)
            .revalidate(force, move || this.fetch_and_store().boxed())
            .await;
    }

    async fn fetch_and_store(self: Arc<Self>) {
        let Some(store) = self.store.upgrade() else {
            return;
        };

        // Variants must be registered before the write so the very first
        // propagation already reaches them.
        store.objects().register(&self.cache_key);

        let fetched = store
            .transport()
            .fetch_object(&self.api_name, &self.primary_key, self.include_rid)
            .await;

        match fetched {
            Ok(object) => {
                let object = Arc::new(object);
                store.batch(BatchOptions::default(), |batch| {
                    propagate_object_write(&self.cache_key, Some(object), Status::Loaded, batch);
                });
                self.state.set_status(Status::Loaded);
            }
            Err(TrellisError::Fetch(FetchError::ObjectNotFound { .. })) => {
                store.batch(BatchOptions::default(), |batch| {
                    propagate_object_write(&self.cache_key, None, Status::Loaded, batch);
                });
                self.state.set_status(Status::Loaded);
            }
            Err(error) => {
                let error = Arc::new(error);
                store.batch(BatchOptions::default(), |batch| {
                    let existing = store.get_value(&self.cache_key).and_then(|e| e.value.clone());
                    batch.write_with_error(
                        &self.cache_key,
                        existing,
                        Status::Error,
                        Some(Arc::clone(&error)),
                    );
                });
                self.state.set_status(Status::Error);
            }
        }
    }

    /// Apply an externally-sourced object value (e.g. from an action
    /// response) without a fetch.
    pub fn write_to_store(
        &self,
        value: Arc<ObjectHolder>,
        status: Status,
        batch: &mut BatchContext<'_>,
    ) -> Arc<Entry> {
        batch.store().objects().register(&self.cache_key);
        propagate_object_write(&self.cache_key, Some(value), status, batch);
        batch
            .read(&self.cache_key)
            .unwrap_or_else(|| Entry::init(self.cache_key.clone()))
    }

    /// Apply an externally-sourced deletion without a fetch.
    pub fn delete_from_store(&self, status: Status, batch: &mut BatchContext<'_>) -> Arc<Entry> {
        batch.store().objects().register(&self.cache_key);
        propagate_object_write(&self.cache_key, None, status, batch);
        batch
            .read(&self.cache_key)
            .unwrap_or_else(|| Entry::init(self.cache_key.clone()))
    }
}

#[async_trait]
impl Query for ObjectQuery {
    fn cache_key(&self) -> &CacheKey {
        &self.cache_key
    }

    fn status(&self) -> Status {
        self.state.status()
    }

    async fn revalidate(&self, force: bool) {
        ObjectQuery::revalidate(self, force).await;
    }

    async fn invalidate_object_type(
        &self,
        api_name: &str,
        changes: Arc<Changes>,
    ) -> TrellisResult<()> {
        if api_name == self.api_name {
            changes.mark_modified(&self.cache_key);
            ObjectQuery::revalidate(self, /* force */ true).await;
        }
        Ok(())
    }

    async fn maybe_update_and_revalidate(
        &self,
        _changes: Arc<Changes>,
        _optimistic_id: Option<OptimisticId>,
    ) -> TrellisResult<()> {
        // Object entries are updated in place by write propagation; a batch
        // never requires an object refetch on its own.
        Ok(())
    }
}

/// Write an object value (or `None` for a tombstone) through a source key
/// and replay it to every registered, actively-observed variant.
pub(crate) fn propagate_object_write(
    source_key: &CacheKey,
    value: Option<Arc<ObjectHolder>>,
    status: Status,
    batch: &mut BatchContext<'_>,
) {
    let store = batch.store();
    let existing = batch.read(source_key);

    let data_changed = match (&existing, &value) {
        (None, _) => true,
        (Some(_), None) => true,
        (Some(entry), Some(new_object)) => match entry.value.as_ref().and_then(|v| v.as_object())
        {
            Some(old_object) => **old_object != **new_object,
            None => true,
        },
    };
    let status_changed = existing
        .as_ref()
        .map(|entry| entry.status != status)
        .unwrap_or(true);

    if !data_changed && !status_changed {
        return;
    }

    // Unchanged data keeps its identity so subscribers comparing by
    // reference do not see a phantom update.
    let value_to_write = if !data_changed {
        existing.as_ref().and_then(|entry| entry.value.clone())
    } else {
        Some(match &value {
            Some(object) => CacheValue::Object(Arc::clone(object)),
            None => CacheValue::Tombstone,
        })
    };
    batch.write(source_key, value_to_write, status);

    if let Some(object) = &value {
        batch.changes().register_object(
            &object.api_name,
            Arc::clone(object),
            /* is_new */ existing.is_none(),
        );
    }

    for target_key in store.objects().related(source_key) {
        if CacheKey::ptr_eq(&target_key, source_key) {
            continue;
        }
        if !store.subjects().observed(&target_key) {
            continue;
        }

        match &value {
            None => {
                batch.write(&target_key, Some(CacheValue::Tombstone), status);
            }
            Some(object) => {
                let target_current = batch
                    .read(&target_key)
                    .and_then(|entry| entry.value.as_ref().and_then(|v| v.as_object()).cloned());
                let merged =
                    merge_for_target(object, target_current.as_deref(), source_key, &target_key);
                batch.write(&target_key, Some(CacheValue::Object(Arc::new(merged))), status);
            }
        }
    }
}

/// Store a page of fetched objects under their object cache keys, returning
/// the keys in page order. Used by collection queries to normalize rows.
pub(crate) fn store_object_holders(
    objects: Vec<ObjectHolder>,
    rdp: Option<Canonical<trellis_core::RdpConfig>>,
    batch: &mut BatchContext<'_>,
) -> Vec<CacheKey> {
    let store = batch.store();
    objects
        .into_iter()
        .map(|object| {
            let key = store.object_cache_key_canonical(
                &object.api_name,
                object.primary_key.clone(),
                rdp.clone(),
                /* include_rid */ false,
            );
            store.objects().register(&key);
            propagate_object_write(&key, Some(Arc::new(object)), Status::Loaded, batch);
            key
        })
        .collect()
}

fn rdp_names(key: &CacheKey) -> HashSet<String> {
    key.as_object()
        .and_then(|object_key| object_key.rdp.as_ref())
        .map(|config| config.keys().cloned().collect())
        .unwrap_or_default()
}

/// Merge a written value for a target variant: the source's derived-only
/// fields are stripped unless the target asked for them, and derived values
/// the source cannot supply are preserved from the target's current entry.
fn merge_for_target(
    source_value: &ObjectHolder,
    target_current: Option<&ObjectHolder>,
    source_key: &CacheKey,
    target_key: &CacheKey,
) -> ObjectHolder {
    let source_rdp = rdp_names(source_key);
    let target_rdp = rdp_names(target_key);

    let mut properties = source_value.properties.clone();
    for name in &source_rdp {
        if !target_rdp.contains(name) {
            properties.remove(name);
        }
    }
    for name in &target_rdp {
        if !properties.contains_key(name) {
            if let Some(current_value) =
                target_current.and_then(|current| current.properties.get(name))
            {
                properties.insert(name.clone(), current_value.clone());
            }
        }
    }

    let include_rid = target_key
        .as_object()
        .map(|object_key| object_key.include_rid)
        .unwrap_or(false);
    let rid = if include_rid {
        source_value
            .rid
            .clone()
            .or_else(|| target_current.and_then(|current| current.rid.clone()))
    } else {
        None
    };

    ObjectHolder {
        api_name: source_value.api_name.clone(),
        primary_key: source_value.primary_key.clone(),
        rid,
        properties,
    }
}
