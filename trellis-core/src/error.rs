//! Error types for TRELLIS operations

use thiserror::Error;

/// Transport/fetch layer errors.
///
/// Any of these surfaces on a query as `status: Error`; the engine never
/// retries on its own.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Object not found: {api_name} with primary key {primary_key}")]
    ObjectNotFound {
        api_name: String,
        primary_key: String,
    },

    #[error("Request failed for {api_name}: {reason}")]
    RequestFailed { api_name: String, reason: String },

    #[error("Page fetch failed: {reason}")]
    PageFailed { reason: String },

    #[error("Aggregation failed for {api_name}: {reason}")]
    AggregationFailed { api_name: String, reason: String },
}

/// Ontology metadata errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OntologyError {
    #[error("Object type not found: {api_name}")]
    ObjectTypeNotFound { api_name: String },

    #[error("Interface type not found: {api_name}")]
    InterfaceTypeNotFound { api_name: String },

    #[error("Link {link} not found on {api_name}")]
    LinkNotFound { api_name: String, link: String },
}

/// Object set analysis errors.
///
/// Constructing one of these mid-extraction indicates a bug in the
/// query-building layer, not a runtime condition to recover from.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ObjectSetError {
    #[error("Unsupported object set shape: {shape}")]
    UnsupportedShape { shape: String },

    #[error("Set operation has no operands")]
    EmptySetOperation,

    #[error("Incompatible result types in set operation: {left} vs {right}")]
    IncompatibleSetOperands { left: String, right: String },

    #[error("methodInput referenced outside a derived property")]
    MethodInputOutsideRdp,
}

/// Cache/store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Upgraded page is missing object {api_name} with primary key {primary_key}")]
    UpgradeMissingObject {
        api_name: String,
        primary_key: String,
    },

    #[error("Store has been dropped")]
    StoreDropped,
}

/// Master error type for all TRELLIS errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TrellisError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Ontology error: {0}")]
    Ontology(#[from] OntologyError),

    #[error("Object set error: {0}")]
    ObjectSet(#[from] ObjectSetError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type alias for TRELLIS operations.
pub type TrellisResult<T> = Result<T, TrellisError>;

// =============================================================================
// TESTS
// =============================================================================
