//! List queries over a concrete object type.
//!
//! A list entry stores only object cache keys; the rows themselves live in
//! the normalized object entries, so an object write is immediately visible
//! through every list that references it. The query owns pagination state
//! and the asynchronously-computed set of object types whose mutations
//! invalidate it (types reached through derived-property traversals).

use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::OnceCell;
use trellis_core::{
    ApiName, ObjectSetSpec, OrderBy, RdpConfig, StoreError, TrellisResult, WhereClause,
};

use crate::batch::BatchContext;
use crate::canonical::{Canonical, IntersectWith};
use crate::changes::Changes;
use crate::invalidation::object_types_that_invalidate;
use crate::keys::{CacheKey, CacheKeyData};
use crate::layer::{CacheValue, Entry, ListValue, Status};
use crate::optimistic::OptimisticId;
use crate::store::{BatchOptions, Store};
use crate::subject::Subscription;

use super::object::store_object_holders;
use super::{Query, QueryState};

/// Query for a filtered, ordered list of one object type.
pub struct ListQuery {
    me: Weak<ListQuery>,
    store: Weak<Store>,
    state: Arc<QueryState>,
    cache_key: CacheKey,
    api_name: ApiName,
    where_clause: Canonical<WhereClause>,
    order_by: Canonical<OrderBy>,
    rdp: Option<Canonical<RdpConfig>>,
    intersect: Option<Canonical<IntersectWith>>,
    next_page_token: Mutex<Option<String>>,
    invalidation_types: OnceCell<HashSet<ApiName>>,
}

impl ListQuery {
    pub(crate) fn new(store: &Arc<Store>, cache_key: CacheKey) -> Arc<Self> {
        let CacheKeyData::List(key) = cache_key.data().clone() else {
            panic!("ListQuery requires a list cache key");
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

    /// Whether another page is available.
    pub fn has_more(&self) -> bool {
        self.next_page_token.lock().unwrap().is_some()
    }

    pub fn subscribe(&self) -> Option<Subscription> {
        self.store.upgrade().map(|store| store.subscribe(&self.cache_key))
    }

    /// The server-side object set this query describes. Derived properties
    /// are applied before the filter; intersected sets are ANDed in last.
    pub fn object_set(&self) -> ObjectSetSpec {
        build_object_set(
            ObjectSetSpec::base(&self.api_name),
            |clause| ObjectSetSpec::base(&self.api_name).filtered(clause),
            &self.where_clause,
            self.rdp.as_ref(),
            self.intersect.as_ref(),
        )
    }

    /// Types whose mutation invalidates this list, resolved lazily from
    /// ontology metadata. Invalidation checks await this, so an event that
    /// arrives before extraction completes is buffered, not dropped.
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
            .revalidate(force, move || this.fetch_first_page().boxed())
            .await;
    }

    /// Fetch the next page and append it to the list entry. Returns
    /// immediately when the result set is exhausted. A concurrent initial
    /// fetch is awaited first rather than raced.
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

    async fn fetch_first_page(self: Arc<Self>) {
        let Some(store) = self.store.upgrade() else {
            return;
        };

        let fetched = store
            .transport()
            .fetch_page(&self.object_set(), &self.order_by, None)
            .await;

        match fetched {
            Ok(page) => {
                *self.next_page_token.lock().unwrap() = page.next_page_token.clone();
                store.batch(BatchOptions::default(), |batch| {
                    let items = store_object_holders(page.data, self.rdp.clone(), batch);
                    self.write_list(items, Status::Loaded, batch);
                });
                self.state.set_status(Status::Loaded);
            }
            Err(error) => {
                self.store_fetch_error(&store, error);
            }
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

        let fetched = store
            .transport()
            .fetch_page(&self.object_set(), &self.order_by, Some(&token))
            .await;

        match fetched {
            Ok(page) => {
                *self.next_page_token.lock().unwrap() = page.next_page_token.clone();
                store.batch(BatchOptions::default(), |batch| {
                    let mut items = store
                        .get_value(&self.cache_key)
                        .and_then(|entry| entry.value.as_ref().and_then(|v| v.as_list()).cloned())
                        .map(|list| list.items.clone())
                        .unwrap_or_default();
                    let appended = store_object_holders(page.data, self.rdp.clone(), batch);
                    items.extend(appended);
                    self.write_list(items, Status::Loaded, batch);
                });
                self.state.set_status(Status::Loaded);
            }
            Err(error) => {
                self.store_fetch_error(&store, error);
            }
        }
    }

    /// Write the list entry itself. Also used to apply externally-sourced
    /// list updates without a fetch.
    pub fn write_list(
        &self,
        items: Vec<CacheKey>,
        status: Status,
        batch: &mut BatchContext<'_>,
    ) -> Arc<Entry> {
        batch.write(
            &self.cache_key,
            Some(CacheValue::List(Arc::new(ListValue { items }))),
            status,
        )
    }

    fn store_fetch_error(&self, store: &Arc<Store>, error: trellis_core::TrellisError) {
        let error = Arc::new(error);
        store.batch(BatchOptions::default(), |batch| {
            let existing = store.get_value(&self.cache_key).and_then(|e| e.value.clone());
            batch.write_with_error(&self.cache_key, existing, Status::Error, Some(error));
        });
        self.state.set_status(Status::Error);
    }

    async fn depends_on(&self, api_name: &str) -> TrellisResult<bool> {
        if api_name == self.api_name {
            return Ok(true);
        }
        Ok(self.ensure_invalidation_types_ready().await?.contains(api_name))
    }
}

#[async_trait]
impl Query for ListQuery {
    fn cache_key(&self) -> &CacheKey {
        &self.cache_key
    }

    fn status(&self) -> Status {
        self.state.status()
    }

    async fn revalidate(&self, force: bool) {
        ListQuery::revalidate(self, force).await;
    }

    async fn invalidate_object_type(
        &self,
        api_name: &str,
        changes: Arc<Changes>,
    ) -> TrellisResult<()> {
        if self.depends_on(api_name).await? {
            changes.mark_modified(&self.cache_key);
            ListQuery::revalidate(self, /* force */ true).await;
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
        // Updates to known objects flow through the normalized entries;
        // only newly-seen objects can change membership.
        let added = changes.added_api_names();
        if added.is_empty() {
            return Ok(());
        }
        for api_name in &added {
            if self.depends_on(api_name).await? {
                changes.mark_modified(&self.cache_key);
                ListQuery::revalidate(self, /* force */ true).await;
                return Ok(());
            }
        }
        Ok(())
    }
}

/// Assemble the object set shared by list-shaped queries.
pub(super) fn build_object_set(
    base: ObjectSetSpec,
    make_intersect_member: impl Fn(WhereClause) -> ObjectSetSpec,
    where_clause: &Canonical<WhereClause>,
    rdp: Option<&Canonical<RdpConfig>>,
    intersect: Option<&Canonical<IntersectWith>>,
) -> ObjectSetSpec {
    let mut spec = base;
    if let Some(rdp) = rdp {
        spec = spec.with_properties((**rdp).clone());
    }
    spec = spec.filtered((**where_clause).clone());
    if let Some(intersect) = intersect {
        if !intersect.is_empty() {
            let members = intersect
                .iter()
                .map(|clause| make_intersect_member(clause.clone()))
                .collect();
            spec = spec.intersect(members);
        }
    }
    spec
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ObserveListOptions;
    use serde_json::json;
    use trellis_core::{DerivedPropertyDefinition, ObjectHolder, SelectionOperation};
    use trellis_test_utils::{MockOntology, MockTransport, ObjectMetadataBuilder};

    fn employee(pk: &str, name: &str) -> ObjectHolder {
        ObjectHolder::new("Employee", pk).with_property("name", json!(name))
    }

    fn make_store(transport: &MockTransport) -> Arc<Store> {
        let ontology = MockOntology::new();
        ontology.add_object(
            ObjectMetadataBuilder::new("Employee", "id")
                .link_to_object("office", "Office")
                .build(),
        );
        ontology.add_object(
            ObjectMetadataBuilder::new("Office", "id")
                .link_to_object("occupants", "Employee")
                .build(),
        );
        Store::new(Arc::new(transport.clone()), Arc::new(ontology))
    }

    fn list_options() -> ObserveListOptions {
        ObserveListOptions::new("Employee")
    }

    #[tokio::test]
    async fn test_fetch_normalizes_rows_into_object_entries() {
        let transport = MockTransport::new();
        transport.add_page(
            vec![employee("emp1", "Alice"), employee("emp2", "Bea")],
            None,
        );
        let store = make_store(&transport);

        let query = store.list_query(list_options());
        query.revalidate(false).await;

        assert_eq!(query.status(), Status::Loaded);
        let entry = store.get_value(query.cache_key()).expect("list stored");
        let list = entry.value.as_ref().unwrap().as_list().unwrap().clone();
        assert_eq!(list.items.len(), 2);

        // Rows live in normalized object entries.
        let first = store.get_value(&list.items[0]).expect("object entry");
        let object = first.value.as_ref().unwrap().as_object().unwrap();
        assert_eq!(object.property("name"), Some(&json!("Alice")));
    }

    #[tokio::test]
    async fn test_fetch_more_appends_and_stops_when_exhausted() {
        let transport = MockTransport::new();
        transport.add_page(vec![employee("emp1", "Alice")], Some("page2"));
        transport.add_page(vec![employee("emp2", "Bea")], None);
        let store = make_store(&transport);

        let query = store.list_query(list_options());
        query.revalidate(false).await;
        assert!(query.has_more());

        query.fetch_more().await;
        assert!(!query.has_more());

        let entry = store.get_value(query.cache_key()).expect("list stored");
        let list = entry.value.as_ref().unwrap().as_list().unwrap().clone();
        assert_eq!(list.items.len(), 2);

        // Exhausted: fetch_more is now a no-op.
        let pages_before = transport.fetch_page_calls();
        query.fetch_more().await;
        assert_eq!(transport.fetch_page_calls(), pages_before);
    }

    #[tokio::test]
    async fn test_fetch_failure_sets_error_entry() {
        let transport = MockTransport::new();
        transport.fail_next_page("boom");
        let store = make_store(&transport);

        let query = store.list_query(list_options());
        query.revalidate(false).await;

        assert_eq!(query.status(), Status::Error);
        let entry = store.get_value(query.cache_key()).expect("error entry");
        assert_eq!(entry.status, Status::Error);
        assert!(entry.error.is_some());
    }

    #[tokio::test]
    async fn test_invalidate_on_own_type() {
        let transport = MockTransport::new();
        transport.add_page(vec![], None);
        let store = make_store(&transport);

        let query = store.list_query(list_options());
        let changes = Changes::new();
        Arc::clone(&query)
            .invalidate_object_type("Employee", changes.clone())
            .await
            .unwrap();

        assert!(changes.is_modified(query.cache_key()));
        assert_eq!(transport.fetch_page_calls(), 1);

        // Unrelated type: no refetch.
        Arc::clone(&query)
            .invalidate_object_type("Building", changes.clone())
            .await
            .unwrap();
        assert_eq!(transport.fetch_page_calls(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_on_rdp_traversed_type() {
        let transport = MockTransport::new();
        transport.add_page(vec![], None);
        let store = make_store(&transport);

        let mut derived = RdpConfig::new();
        derived.insert(
            "officeCount".to_string(),
            DerivedPropertyDefinition::Selection {
                object_set: ObjectSetSpec::MethodInput.search_around("office"),
                operation: SelectionOperation::Count,
            },
        );
        let query = store.list_query(list_options().with_rdp(derived));

        // The derived property pivots to Office, so Office mutations
        // invalidate this list. Readiness resolves inside the call.
        let changes = Changes::new();
        Arc::clone(&query)
            .invalidate_object_type("Office", changes.clone())
            .await
            .unwrap();

        assert!(changes.is_modified(query.cache_key()));
        assert_eq!(transport.fetch_page_calls(), 1);
    }

    #[tokio::test]
    async fn test_modified_key_is_skipped_by_post_batch_hook() {
        let transport = MockTransport::new();
        transport.add_page(vec![], None);
        let store = make_store(&transport);

        let query = store.list_query(list_options());
        let changes = Changes::new();
        changes.mark_modified(query.cache_key());
        changes.register_object("Employee", Arc::new(employee("emp9", "New")), true);

        Arc::clone(&query)
            .maybe_update_and_revalidate(changes, None)
            .await
            .unwrap();
        assert_eq!(transport.fetch_page_calls(), 0);
    }

    #[tokio::test]
    async fn test_added_object_of_own_type_triggers_refetch() {
        let transport = MockTransport::new();
        transport.add_page(vec![], None);
        let store = make_store(&transport);

        let query = store.list_query(list_options());
        let changes = Changes::new();
        changes.register_object("Employee", Arc::new(employee("emp9", "New")), true);

        Arc::clone(&query)
            .maybe_update_and_revalidate(changes, None)
            .await
            .unwrap();
        assert_eq!(transport.fetch_page_calls(), 1);
    }
}
