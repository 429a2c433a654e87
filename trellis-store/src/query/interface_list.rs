//! List queries over an interface.
//!
//! Interface pages return heterogeneous concrete-typed rows with only the
//! interface's property set, so after every fetch the rows are upgraded to
//! full objects by re-querying each distinct concrete type by primary key —
//! one `$in` request per type present in the page, not one per row.
//! Invalidation additionally matches any concrete type whose metadata maps
//! it to this interface.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::OnceCell;
use trellis_core::{
    ApiName, ObjectHolder, ObjectSetSpec, OrderBy, PrimaryKey, RdpConfig, StoreError,
    TrellisError, TrellisResult, WhereClause,
};

use crate::canonical::{Canonical, IntersectWith};
use crate::changes::Changes;
use crate::invalidation::object_types_that_invalidate;
use crate::keys::{CacheKey, CacheKeyData};
use crate::layer::{CacheValue, ListValue, Status};
use crate::optimistic::OptimisticId;
use crate::store::{BatchOptions, Store};
use crate::subject::Subscription;

use super::list::build_object_set;
use super::object::store_object_holders;
use super::{Query, QueryState};

/// Query for a filtered list of all objects implementing an interface.
pub struct InterfaceListQuery {
    me: Weak<InterfaceListQuery>,
    store: Weak<Store>,
    state: Arc<QueryState>,
    cache_key: CacheKey,
    /// API name of the interface.
    api_name: ApiName,
    where_clause: Canonical<WhereClause>,
    order_by: Canonical<OrderBy>,
    rdp: Option<Canonical<RdpConfig>>,
    intersect: Option<Canonical<IntersectWith>>,
    next_page_token: Mutex<Option<String>>,
    invalidation_types: OnceCell<HashSet<ApiName>>,
}

impl InterfaceListQuery {
    pub(crate) fn new(store: &Arc<Store>, cache_key: CacheKey) -> Arc<Self> {
        let CacheKeyData::InterfaceList(key) = cache_key.data().clone() else {
            panic!("InterfaceListQuery requires an interface list cache key");
        };
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            store: Arc::downgrade(store),
            state: QueryState::new(store.config().dedupe_interval),
            api_name: key.api_name,
            where_clause: key.where_clause,
            order_by: key.order_by,
            rdp: key.rdp,
            intersect: key.intersect,
            next_page_token: Mutex::new(None),
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

    pub fn has_more(&self) -> bool {
        self.next_page_token.lock().unwrap().is_some()
    }

    pub fn subscribe(&self) -> Option<Subscription> {
        self.store.upgrade().map(|store| store.subscribe(&self.cache_key))
    }

    pub fn object_set(&self) -> ObjectSetSpec {
        build_object_set(
            ObjectSetSpec::interface_base(&self.api_name),
            |clause| ObjectSetSpec::interface_base(&self.api_name).filtered(clause),
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

    pub async fn fetch_more(&self) {
        if let Some(in_flight) = self.state.in_flight() {
            in_flight.await;
        }
        if !self.has_more() {
            return;
        }
        let Some(this) = self.me.upgrade() else {
            return;
        };
        Arc::clone(&self.state)
            .run(move || this.fetch_next_page().boxed())
            .await;
    }

    async fn fetch_and_store(self: Arc<Self>) {
        let Some(store) = self.store.upgrade() else {
            return;
        };

        let result = self.fetch_page_upgraded(&store, None).await;
        match result {
            Ok((rows, next_page_token)) => {
                *self.next_page_token.lock().unwrap() = next_page_token;
                store.batch(BatchOptions::default(), |batch| {
                    let items = store_object_holders(rows, self.rdp.clone(), batch);
                    batch.write(
                        &self.cache_key,
                        Some(CacheValue::List(Arc::new(ListValue { items }))),
                        Status::Loaded,
                    );
                });
                self.state.set_status(Status::Loaded);
            }
            Err(error) => self.store_fetch_error(&store, error),
        }
    }

    async fn fetch_next_page(self: Arc<Self>) {
        let Some(store) = self.store.upgrade() else {
            return;
        };
        let token = self.next_page_token.lock().unwrap().clone();
        let Some(token) = token else {
            return;
        };

        let result = self.fetch_page_upgraded(&store, Some(&token)).await;
        match result {
            Ok((rows, next_page_token)) => {
                *self.next_page_token.lock().unwrap() = next_page_token;
                store.batch(BatchOptions::default(), |batch| {
                    let mut items = store
                        .get_value(&self.cache_key)
                        .and_then(|entry| entry.value.as_ref().and_then(|v| v.as_list()).cloned())
                        .map(|list| list.items.clone())
                        .unwrap_or_default();
                    items.extend(store_object_holders(rows, self.rdp.clone(), batch));
                    batch.write(
                        &self.cache_key,
                        Some(CacheValue::List(Arc::new(ListValue { items }))),
                        Status::Loaded,
                    );
                });
                self.state.set_status(Status::Loaded);
            }
            Err(error) => self.store_fetch_error(&store, error),
        }
    }

    async fn fetch_page_upgraded(
        &self,
        store: &Arc<Store>,
        page_token: Option<&str>,
    ) -> TrellisResult<(Vec<ObjectHolder>, Option<String>)> {
        let page = store
            .transport()
            .fetch_page(&self.object_set(), &self.order_by, page_token)
            .await?;
        let rows = reload_as_full_objects(store, page.data).await?;
        Ok((rows, page.next_page_token))
    }

    fn store_fetch_error(&self, store: &Arc<Store>, error: TrellisError) {
        let error = Arc::new(error);
        store.batch(BatchOptions::default(), |batch| {
            let existing = store.get_value(&self.cache_key).and_then(|e| e.value.clone());
            batch.write_with_error(&self.cache_key, existing, Status::Error, Some(error));
        });
        self.state.set_status(Status::Error);
    }

    async fn depends_on(&self, store: &Arc<Store>, api_name: &str) -> TrellisResult<bool> {
        if api_name == self.api_name {
            return Ok(true);
        }
        if self.ensure_invalidation_types_ready().await?.contains(api_name) {
            return Ok(true);
        }
        // A concrete type implementing this interface invalidates it.
        let metadata = store.ontology().object_metadata(api_name).await?;
        Ok(metadata.implements(&self.api_name))
    }
}

#[async_trait]
impl Query for InterfaceListQuery {
    fn cache_key(&self) -> &CacheKey {
        &self.cache_key
    }

    fn status(&self) -> Status {
        self.state.status()
    }

    async fn revalidate(&self, force: bool) {
        InterfaceListQuery::revalidate(self, force).await;
    }

    async fn invalidate_object_type(
        &self,
        api_name: &str,
        changes: Arc<Changes>,
    ) -> TrellisResult<()> {
        let Some(store) = self.store.upgrade() else {
            return Ok(());
        };
        if self.depends_on(&store, api_name).await? {
            changes.mark_modified(&self.cache_key);
            InterfaceListQuery::revalidate(self, /* force */ true).await;
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
        let Some(store) = self.store.upgrade() else {
            return Ok(());
        };
        for api_name in &changes.added_api_names() {
            if self.depends_on(&store, api_name).await? {
                changes.mark_modified(&self.cache_key);
                InterfaceListQuery::revalidate(self, /* force */ true).await;
                return Ok(());
            }
        }
        Ok(())
    }
}

/// Upgrade interface rows to full objects: group by concrete type, issue
/// one primary-key `$in` query per distinct type, and map the results back
/// in page order.
async fn reload_as_full_objects(
    store: &Arc<Store>,
    rows: Vec<ObjectHolder>,
) -> TrellisResult<Vec<ObjectHolder>> {
    if rows.is_empty() {
        return Ok(rows);
    }

    let mut groups: BTreeMap<ApiName, Vec<PrimaryKey>> = BTreeMap::new();
    for row in &rows {
        groups
            .entry(row.api_name.clone())
            .or_default()
            .push(row.primary_key.clone());
    }

    let mut full: BTreeMap<(ApiName, PrimaryKey), ObjectHolder> = BTreeMap::new();
    for (api_name, primary_keys) in groups {
        let metadata = store.ontology().object_metadata(&api_name).await?;
        let where_clause = WhereClause::in_values(
            metadata.primary_key_api_name.clone(),
            primary_keys.iter().map(PrimaryKey::to_value).collect(),
        );
        let page = store
            .transport()
            .fetch_page(
                &ObjectSetSpec::base(&api_name).filtered(where_clause),
                &[],
                None,
            )
            .await?;
        for object in page.data {
            full.insert((api_name.clone(), object.primary_key.clone()), object);
        }
    }

    rows.into_iter()
        .map(|row| {
            full.remove(&(row.api_name.clone(), row.primary_key.clone()))
                .ok_or_else(|| {
                    StoreError::UpgradeMissingObject {
                        api_name: row.api_name.clone(),
                        primary_key: row.primary_key.to_string(),
                    }
                    .into()
                })
        })
        .collect()
}
