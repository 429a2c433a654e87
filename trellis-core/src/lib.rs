//! TRELLIS Core - Data Types and Boundary Traits
//!
//! Pure data structures with no engine behavior. All other crates depend on
//! this. The cache engine itself lives in trellis-store; this crate defines
//! what flows across its boundaries: object holders, filter expressions,
//! derived-property definitions, object set specs, aggregation specs,
//! ontology metadata, and the `Transport` / `OntologyProvider` seams.

use chrono::{DateTime, Utc};

pub mod error;
pub mod filter;
pub mod object;
pub mod objectset;
pub mod ontology;
pub mod rdp;
pub mod transport;

pub use error::{
    FetchError, ObjectSetError, OntologyError, StoreError, TrellisError, TrellisResult,
};
pub use filter::{FilterOperator, OrderBy, OrderByClause, SortDirection, WhereClause};
pub use object::{ObjectHolder, ObjectPage, PrimaryKey};
pub use objectset::ObjectSetSpec;
pub use ontology::{
    InterfaceMetadata, LinkCardinality, LinkMetadata, ObjectMetadata, OntologyProvider,
    TargetTypeKind,
};
pub use rdp::{
    AggregationBucket, AggregationResult, AggregationSpec, DerivedPropertyDefinition,
    ExtractPart, GroupByClause, MetricSelector, RdpConfig, SelectionOperation,
};
pub use transport::Transport;

/// API name of an object or interface type, e.g. `"Employee"`.
pub type ApiName = String;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;
