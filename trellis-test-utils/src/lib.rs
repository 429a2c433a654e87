//! TRELLIS Test Utilities
//!
//! Centralized test infrastructure for the TRELLIS workspace:
//! - Mock transport with programmable responses and call counters
//! - Mock ontology provider with registered metadata
//! - Builders for object and interface metadata fixtures

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use trellis_core::{
    AggregationResult, AggregationSpec, ApiName, FetchError, InterfaceMetadata, LinkCardinality,
    LinkMetadata, ObjectHolder, ObjectMetadata, ObjectPage, ObjectSetSpec, OntologyError,
    OntologyProvider, OrderByClause, PrimaryKey, TargetTypeKind, Transport, TrellisResult,
};

// ============================================================================
// MOCK TRANSPORT
// ============================================================================

#[derive(Default)]
struct MockTransportInner {
    objects: HashMap<(ApiName, PrimaryKey), ObjectHolder>,
    pages: VecDeque<ObjectPage>,
    aggregations: VecDeque<AggregationResult>,
    fail_next_fetch: Option<String>,
    fail_next_page: Option<String>,
    fail_next_aggregate: Option<String>,
    fetch_object_calls: usize,
    fetch_page_calls: usize,
    aggregate_calls: usize,
}

/// Programmable in-memory transport.
///
/// Objects are looked up by `(api_name, primary_key)`; pages and
/// aggregation results are served in the order they were queued. Clones
/// share state, so a test can keep a handle for assertions after moving a
/// clone into the store.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an object for `fetch_object`.
    pub fn add_object(&self, object: ObjectHolder) {
        let key = (object.api_name.clone(), object.primary_key.clone());
        self.inner.lock().unwrap().objects.insert(key, object);
    }

    /// Remove a registered object (subsequent fetches see "not found").
    pub fn remove_object(&self, api_name: &str, primary_key: &PrimaryKey) {
        self.inner
            .lock()
            .unwrap()
            .objects
            .remove(&(api_name.to_string(), primary_key.clone()));
    }

    /// Queue one page for `fetch_page`.
    pub fn add_page(&self, data: Vec<ObjectHolder>, next_page_token: Option<&str>) {
        self.inner.lock().unwrap().pages.push_back(ObjectPage::new(
            data,
            next_page_token.map(|token| token.to_string()),
        ));
    }

    /// Queue one result for `aggregate`.
    pub fn add_aggregation(&self, result: AggregationResult) {
        self.inner.lock().unwrap().aggregations.push_back(result);
    }

    /// Make the next `fetch_object` fail.
    pub fn fail_next_fetch(&self, reason: &str) {
        self.inner.lock().unwrap().fail_next_fetch = Some(reason.to_string());
    }

    /// Make the next `fetch_page` fail.
    pub fn fail_next_page(&self, reason: &str) {
        self.inner.lock().unwrap().fail_next_page = Some(reason.to_string());
    }

    /// Make the next `aggregate` fail.
    pub fn fail_next_aggregate(&self, reason: &str) {
        self.inner.lock().unwrap().fail_next_aggregate = Some(reason.to_string());
    }

    pub fn fetch_object_calls(&self) -> usize {
        self.inner.lock().unwrap().fetch_object_calls
    }

    pub fn fetch_page_calls(&self) -> usize {
        self.inner.lock().unwrap().fetch_page_calls
    }

    pub fn aggregate_calls(&self) -> usize {
        self.inner.lock().unwrap().aggregate_calls
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch_object(
        &self,
        api_name: &str,
        primary_key: &PrimaryKey,
        include_rid: bool,
    ) -> TrellisResult<ObjectHolder> {
        let mut inner = self.inner.lock().unwrap();
        inner.fetch_object_calls += 1;

        if let Some(reason) = inner.fail_next_fetch.take() {
            return Err(FetchError::RequestFailed {
                api_name: api_name.to_string(),
                reason,
            }
            .into());
        }

        let found = inner
            .objects
            .get(&(api_name.to_string(), primary_key.clone()))
            .cloned();
        match found {
            Some(mut object) => {
                if !include_rid {
                    object.rid = None;
                }
                Ok(object)
            }
            None => Err(FetchError::ObjectNotFound {
                api_name: api_name.to_string(),
                primary_key: primary_key.to_string(),
            }
            .into()),
        }
    }

    async fn fetch_page(
        &self,
        _object_set: &ObjectSetSpec,
        _order_by: &[OrderByClause],
        _page_token: Option<&str>,
    ) -> TrellisResult<ObjectPage> {
        let mut inner = self.inner.lock().unwrap();
        inner.fetch_page_calls += 1;

        if let Some(reason) = inner.fail_next_page.take() {
            return Err(FetchError::PageFailed { reason }.into());
        }

        Ok(inner.pages.pop_front().unwrap_or_else(ObjectPage::empty))
    }

    async fn aggregate(
        &self,
        _object_set: &ObjectSetSpec,
        spec: &AggregationSpec,
    ) -> TrellisResult<AggregationResult> {
        let mut inner = self.inner.lock().unwrap();
        inner.aggregate_calls += 1;

        if let Some(reason) = inner.fail_next_aggregate.take() {
            return Err(FetchError::AggregationFailed {
                api_name: format!("{:?}", spec.group_by),
                reason,
            }
            .into());
        }

        Ok(inner.aggregations.pop_front().unwrap_or_default())
    }
}

// ============================================================================
// MOCK ONTOLOGY PROVIDER
// ============================================================================

#[derive(Default)]
struct MockOntologyInner {
    objects: HashMap<ApiName, Arc<ObjectMetadata>>,
    interfaces: HashMap<ApiName, Arc<InterfaceMetadata>>,
}

/// In-memory ontology provider fed by registered metadata.
#[derive(Clone, Default)]
pub struct MockOntology {
    inner: Arc<Mutex<MockOntologyInner>>,
}

impl MockOntology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_object(&self, metadata: ObjectMetadata) {
        self.inner
            .lock()
            .unwrap()
            .objects
            .insert(metadata.api_name.clone(), Arc::new(metadata));
    }

    pub fn add_interface(&self, metadata: InterfaceMetadata) {
        self.inner
            .lock()
            .unwrap()
            .interfaces
            .insert(metadata.api_name.clone(), Arc::new(metadata));
    }
}

#[async_trait]
impl OntologyProvider for MockOntology {
    async fn object_metadata(&self, api_name: &str) -> TrellisResult<Arc<ObjectMetadata>> {
        self.inner
            .lock()
            .unwrap()
            .objects
            .get(api_name)
            .cloned()
            .ok_or_else(|| {
                OntologyError::ObjectTypeNotFound {
                    api_name: api_name.to_string(),
                }
                .into()
            })
    }

    async fn interface_metadata(&self, api_name: &str) -> TrellisResult<Arc<InterfaceMetadata>> {
        self.inner
            .lock()
            .unwrap()
            .interfaces
            .get(api_name)
            .cloned()
            .ok_or_else(|| {
                OntologyError::InterfaceTypeNotFound {
                    api_name: api_name.to_string(),
                }
                .into()
            })
    }
}

// ============================================================================
// METADATA BUILDERS
// ============================================================================

/// Builder for object metadata fixtures.
pub struct ObjectMetadataBuilder {
    api_name: ApiName,
    primary_key_api_name: String,
    properties: BTreeSet<String>,
    links: BTreeMap<String, LinkMetadata>,
    interface_map: BTreeMap<ApiName, BTreeMap<String, String>>,
}

impl ObjectMetadataBuilder {
    pub fn new(api_name: impl Into<ApiName>, primary_key_api_name: impl Into<String>) -> Self {
        Self {
            api_name: api_name.into(),
            primary_key_api_name: primary_key_api_name.into(),
            properties: BTreeSet::new(),
            links: BTreeMap::new(),
            interface_map: BTreeMap::new(),
        }
    }

    pub fn property(mut self, name: impl Into<String>) -> Self {
        self.properties.insert(name.into());
        self
    }

    pub fn link_to_object(mut self, name: impl Into<String>, target: impl Into<ApiName>) -> Self {
        let name = name.into();
        self.links.insert(
            name.clone(),
            LinkMetadata {
                api_name: name,
                target_api_name: target.into(),
                target_kind: TargetTypeKind::Object,
                cardinality: LinkCardinality::Many,
            },
        );
        self
    }

    pub fn link_to_interface(
        mut self,
        name: impl Into<String>,
        target: impl Into<ApiName>,
    ) -> Self {
        let name = name.into();
        self.links.insert(
            name.clone(),
            LinkMetadata {
                api_name: name,
                target_api_name: target.into(),
                target_kind: TargetTypeKind::Interface,
                cardinality: LinkCardinality::Many,
            },
        );
        self
    }

    pub fn implements(mut self, interface: impl Into<ApiName>) -> Self {
        self.interface_map.insert(interface.into(), BTreeMap::new());
        self
    }

    pub fn build(self) -> ObjectMetadata {
        ObjectMetadata {
            api_name: self.api_name,
            primary_key_api_name: self.primary_key_api_name,
            properties: self.properties,
            links: self.links,
            interface_map: self.interface_map,
        }
    }
}

/// Builder for interface metadata fixtures.
pub struct InterfaceMetadataBuilder {
    api_name: ApiName,
    implemented_by: Vec<ApiName>,
    properties: BTreeSet<String>,
    links: BTreeMap<String, LinkMetadata>,
}

impl InterfaceMetadataBuilder {
    pub fn new(api_name: impl Into<ApiName>) -> Self {
        Self {
            api_name: api_name.into(),
            implemented_by: Vec::new(),
            properties: BTreeSet::new(),
            links: BTreeMap::new(),
        }
    }

    pub fn implemented_by(mut self, api_name: impl Into<ApiName>) -> Self {
        self.implemented_by.push(api_name.into());
        self
    }

    pub fn property(mut self, name: impl Into<String>) -> Self {
        self.properties.insert(name.into());
        self
    }

    pub fn link_to_object(mut self, name: impl Into<String>, target: impl Into<ApiName>) -> Self {
        let name = name.into();
        self.links.insert(
            name.clone(),
            LinkMetadata {
                api_name: name,
                target_api_name: target.into(),
                target_kind: TargetTypeKind::Object,
                cardinality: LinkCardinality::Many,
            },
        );
        self
    }

    pub fn build(self) -> InterfaceMetadata {
        InterfaceMetadata {
            api_name: self.api_name,
            implemented_by: self.implemented_by,
            properties: self.properties,
            links: self.links,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_transport_serves_registered_objects() {
        let transport = MockTransport::new();
        transport.add_object(
            ObjectHolder::new("Employee", "emp1")
                .with_property("name", json!("Alice"))
                .with_rid("ri.emp1"),
        );

        let fetched = transport
            .fetch_object("Employee", &"emp1".into(), false)
            .await
            .unwrap();
        assert_eq!(fetched.property("name"), Some(&json!("Alice")));
        assert!(fetched.rid.is_none(), "rid stripped unless requested");

        let with_rid = transport
            .fetch_object("Employee", &"emp1".into(), true)
            .await
            .unwrap();
        assert_eq!(with_rid.rid.as_deref(), Some("ri.emp1"));
        assert_eq!(transport.fetch_object_calls(), 2);
    }

    #[tokio::test]
    async fn test_mock_transport_not_found_and_failure() {
        let transport = MockTransport::new();

        let missing = transport
            .fetch_object("Employee", &"ghost".into(), false)
            .await;
        assert!(matches!(
            missing,
            Err(trellis_core::TrellisError::Fetch(
                FetchError::ObjectNotFound { .. }
            ))
        ));

        transport.fail_next_fetch("boom");
        transport.add_object(ObjectHolder::new("Employee", "emp1"));
        let failed = transport
            .fetch_object("Employee", &"emp1".into(), false)
            .await;
        assert!(failed.is_err());

        // The failure is consumed; the next call succeeds.
        let ok = transport
            .fetch_object("Employee", &"emp1".into(), false)
            .await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn test_mock_transport_pages_served_in_order() {
        let transport = MockTransport::new();
        transport.add_page(vec![ObjectHolder::new("Employee", "emp1")], Some("next"));
        transport.add_page(vec![ObjectHolder::new("Employee", "emp2")], None);

        let set = ObjectSetSpec::base("Employee");
        let first = transport.fetch_page(&set, &[], None).await.unwrap();
        assert_eq!(first.next_page_token.as_deref(), Some("next"));

        let second = transport.fetch_page(&set, &[], Some("next")).await.unwrap();
        assert!(second.next_page_token.is_none());

        let exhausted = transport.fetch_page(&set, &[], None).await.unwrap();
        assert!(exhausted.data.is_empty());
    }

    #[tokio::test]
    async fn test_mock_ontology_lookup_and_builders() {
        let ontology = MockOntology::new();
        ontology.add_object(
            ObjectMetadataBuilder::new("Employee", "id")
                .property("name")
                .link_to_object("office", "Office")
                .implements("Nameable")
                .build(),
        );
        ontology.add_interface(
            InterfaceMetadataBuilder::new("Nameable")
                .implemented_by("Employee")
                .property("name")
                .build(),
        );

        let object = ontology.object_metadata("Employee").await.unwrap();
        assert!(object.implements("Nameable"));
        assert_eq!(object.links["office"].target_api_name, "Office");

        let interface = ontology.interface_metadata("Nameable").await.unwrap();
        assert_eq!(interface.implemented_by, vec!["Employee".to_string()]);

        assert!(ontology.object_metadata("Ghost").await.is_err());
    }
}
