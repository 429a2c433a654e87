//! Aggregation queries.
//!
//! The canonical aggregate specification (group-by plus metrics) is part of
//! the cache key, so two structurally different aggregations never collide.
//! Unlike lists, aggregation results depend on property values as well as
//! membership, so modified objects of a relevant type also trigger a
//! refetch.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::OnceCell;
use trellis_core::{
    AggregationSpec, ApiName, ObjectSetSpec, RdpConfig, StoreError, TrellisResult, WhereClause,
};

use crate::canonical::{Canonical, IntersectWith};
use crate::changes::Changes;
use crate::invalidation::object_types_that_invalidate;
use crate::keys::{CacheKey, CacheKeyData};
use crate::layer::{CacheValue, Status};
use crate::optimistic::OptimisticId;
use crate::store::{BatchOptions, Store};
use crate::subject::Subscription;

use super::list::build_object_set;
use super::{Query, QueryState};

/// Query for an aggregation over a filtered object set.
pub struct AggregationQuery {
    me: Weak<AggregationQuery>,
    store: Weak<Store>,
    state: Arc<QueryState>,
    cache_key: CacheKey,
    api_name: ApiName,
    where_clause: Canonical<WhereClause>,
    rdp: Option<Canonical<RdpConfig>>,
    intersect: Option<Canonical<IntersectWith>>,
    spec: Canonical<AggregationSpec>,
    invalidation_types: OnceCell<HashSet<ApiName>>,
}

impl AggregationQuery {
    pub(crate) fn new(store: &Arc<Store>, cache_key: CacheKey) -> Arc<Self> {
        let CacheKeyData::Aggregation(key) = cache_key.data().clone() else {
            panic!("AggregationQuery requires an aggregation cache key");
        };
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            store: Arc::downgrade(store),
            state: QueryState::new(store.config().dedupe_interval),
            api_name: key.api_name,
            where_clause: key.where_clause,
            rdp: key.rdp,
            intersect: key.intersect,
            spec: key.spec,
            invalidation_types: OnceCell::new(),
            cache_key,
        })
    }

    pub fn cache_key(&self) -> &CacheKey {
        &self.cache_key
    }

    pub fn status(&self) -> Status {
        self.state.status()
    }

    pub fn spec(&self) -> &AggregationSpec {
        &self.spec
    }

    pub fn subscribe(&self) -> Option<Subscription> {
        self.store.upgrade().map(|store| store.subscribe(&self.cache_key))
    }

    pub fn object_set(&self) -> ObjectSetSpec {
        build_object_set(
            ObjectSetSpec::base(&self.api_name),
            |clause| ObjectSetSpec::base(&self.api_name).filtered(clause),
            &self.where_clause,
            self.rdp.as_ref(),
            self.intersect.as_ref(),
        )
    }

    pub async fn ensure_invalidation_types_ready(&self) -> TrellisResult<&HashSet<ApiName>> {
        self.invalidation_types
            .get_or_try_init(|| async {
                let store = self.store.upgrade().ok_or(StoreError::StoreDropped)?;
                let info =
                    object_types_that_invalidate(store.ontology(), &self.object_set()).await?;
                Ok(info.invalidation_set)
            })
            .await
    }

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

        let fetched = store
            .transport()
            .aggregate(&self.object_set(), &self.spec)
            .await;

        match fetched {
            Ok(result) => {
                store.batch(BatchOptions::default(), |batch| {
                    batch.write(
                        &self.cache_key,
                        Some(CacheValue::Aggregation(Arc::new(result))),
                        Status::Loaded,
                    );
                });
                self.state.set_status(Status::Loaded);
            }
            Err(error) => {
                let error = Arc::new(error);
                store.batch(BatchOptions::default(), |batch| {
                    let existing = store.get_value(&self.cache_key).and_then(|e| e.value.clone());
                    batch.write_with_error(&self.cache_key, existing, Status::Error, Some(error));
                });
                self.state.set_status(Status::Error);
            }
        }
    }

    async fn depends_on(&self, api_name: &str) -> TrellisResult<bool> {
        if api_name == self.api_name {
            return Ok(true);
        }
        Ok(self.ensure_invalidation_types_ready().await?.contains(api_name))
    }
}

#[async_trait]
impl Query for AggregationQuery {
    fn cache_key(&self) -> &CacheKey {
        &self.cache_key
    }

    fn status(&self) -> Status {
        self.state.status()
    }

    async fn revalidate(&self, force: bool) {
        AggregationQuery::revalidate(self, force).await;
    }

    async fn invalidate_object_type(
        &self,
        api_name: &str,
        changes: Arc<Changes>,
    ) -> TrellisResult<()> {
        if self.depends_on(api_name).await? {
            changes.mark_modified(&self.cache_key);
            AggregationQuery::revalidate(self, /* force */ true).await;
        }
        Ok(())
    }

    async fn maybe_update_and_revalidate(
        &self,
        changes: Arc<Changes>,
        _optimistic_id: Option<OptimisticId>,
    ) -> TrellisResult<()> {
        if changes.is_modified(&self.cache_key) {
            return Ok(());
        }
        // Bucket values shift on any write of a relevant type.
        let mut touched = changes.added_api_names();
        touched.extend(changes.modified_api_names());
        for api_name in &touched {
            if self.depends_on(api_name).await? {
                changes.mark_modified(&self.cache_key);
                AggregationQuery::revalidate(self, /* force */ true).await;
                return Ok(());
            }
        }
        Ok(())
    }
}
