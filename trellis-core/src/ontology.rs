//! Ontology metadata and the provider seam.
//!
//! The engine consults metadata to answer two questions: which object types
//! a link traversal reaches (for invalidation), and which concrete types
//! implement an interface (for interface queries). Providers must be
//! idempotent and safely callable repeatedly; implementations typically
//! memoize.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::TrellisResult;
use crate::ApiName;

/// Whether a link targets a concrete object type or an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetTypeKind {
    Object,
    Interface,
}

/// Link multiplicity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkCardinality {
    One,
    Many,
}

/// Metadata for a single link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkMetadata {
    pub api_name: String,
    pub target_api_name: ApiName,
    pub target_kind: TargetTypeKind,
    pub cardinality: LinkCardinality,
}

/// Metadata for a concrete object type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub api_name: ApiName,
    /// API name of the primary key property.
    pub primary_key_api_name: String,
    /// Declared property API names.
    pub properties: BTreeSet<String>,
    /// Outgoing links, keyed by link API name.
    pub links: BTreeMap<String, LinkMetadata>,
    /// Implemented interfaces: interface API name to the mapping from
    /// interface property name to local property name.
    pub interface_map: BTreeMap<ApiName, BTreeMap<String, String>>,
}

impl ObjectMetadata {
    /// Whether this type implements the given interface.
    pub fn implements(&self, interface_api_name: &str) -> bool {
        self.interface_map.contains_key(interface_api_name)
    }
}

/// Metadata for an interface type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceMetadata {
    pub api_name: ApiName,
    /// Concrete types implementing this interface.
    pub implemented_by: Vec<ApiName>,
    /// Declared interface property API names.
    pub properties: BTreeSet<String>,
    /// Interface links, keyed by link API name.
    pub links: BTreeMap<String, LinkMetadata>,
}

/// Source of ontology metadata.
///
/// Consulted when resolving link-traversal invalidation and interface
/// membership. No caching obligation is placed on the engine for this
/// data.
#[async_trait]
pub trait OntologyProvider: Send + Sync {
    async fn object_metadata(&self, api_name: &str) -> TrellisResult<Arc<ObjectMetadata>>;

    async fn interface_metadata(&self, api_name: &str) -> TrellisResult<Arc<InterfaceMetadata>>;
}
