//! Runtime derived properties and aggregations.
//!
//! A derived property is computed server-side at query time, usually by
//! traversing links to other object types ("selection" over a pivoted
//! object set). The engine needs the full definition shape for two
//! reasons: the definition participates in the cache key, and the set of
//! object types the definition traverses drives invalidation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::objectset::ObjectSetSpec;

/// A derived-property clause: property name to definition.
///
/// `BTreeMap` keeps the serialized form key-ordered, which the
/// canonicalizers rely on.
pub type RdpConfig = BTreeMap<String, DerivedPropertyDefinition>;

/// Aggregation applied to a selection over a pivoted object set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SelectionOperation {
    Count,
    Sum { property: String },
    Avg { property: String },
    Min { property: String },
    Max { property: String },
}

/// Date/timestamp part for an extract operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractPart {
    Years,
    Months,
    Days,
    Hours,
    Minutes,
    Seconds,
}

/// Definition of a single runtime derived property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DerivedPropertyDefinition {
    /// Aggregate over an object set (typically one that pivots through
    /// links, rooted at `methodInput`).
    Selection {
        object_set: ObjectSetSpec,
        operation: SelectionOperation,
    },
    /// A plain property of the input object.
    Property { api_name: String },
    Negate {
        property: Box<DerivedPropertyDefinition>,
    },
    AbsoluteValue {
        property: Box<DerivedPropertyDefinition>,
    },
    Extract {
        part: ExtractPart,
        property: Box<DerivedPropertyDefinition>,
    },
    /// Commutative n-ary operations. Operand order is not significant.
    Least {
        properties: Vec<DerivedPropertyDefinition>,
    },
    Greatest {
        properties: Vec<DerivedPropertyDefinition>,
    },
    Add {
        properties: Vec<DerivedPropertyDefinition>,
    },
    Multiply {
        properties: Vec<DerivedPropertyDefinition>,
    },
    /// Ordered binary operations.
    Subtract {
        left: Box<DerivedPropertyDefinition>,
        right: Box<DerivedPropertyDefinition>,
    },
    Divide {
        left: Box<DerivedPropertyDefinition>,
        right: Box<DerivedPropertyDefinition>,
    },
}

// ============================================================================
// AGGREGATIONS
// ============================================================================

/// Grouping key of an aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GroupByClause {
    /// One bucket per distinct value.
    Exact { field: String },
    /// Numeric bucketing with a fixed width.
    FixedWidth { field: String, width: i64 },
}

/// One requested metric.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MetricSelector {
    Count,
    Sum { property: String },
    Avg { property: String },
    Min { property: String },
    Max { property: String },
    ApproximateDistinct { property: String },
}

/// Complete aggregation request: grouping plus metrics.
///
/// Two structurally different specs must never share a cache key, so the
/// spec participates in key construction after [`Self::canonicalized`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationSpec {
    /// Group-by clauses. Order is significant (it shapes the result rows).
    pub group_by: Vec<GroupByClause>,
    /// Requested metrics. Order is not significant.
    pub metrics: Vec<MetricSelector>,
}

impl AggregationSpec {
    /// Normalize the spec: metrics sorted and deduplicated, group-by order
    /// preserved. Idempotent.
    pub fn canonicalized(mut self) -> Self {
        self.metrics.sort();
        self.metrics.dedup();
        self
    }
}

/// One result bucket of an aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationBucket {
    /// Group key values, keyed by field name.
    pub group: BTreeMap<String, Value>,
    /// Metric values, keyed by a metric label (e.g. `"count"`, `"sum_salary"`).
    pub metrics: BTreeMap<String, f64>,
}

/// Result of an aggregation request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AggregationResult {
    pub buckets: Vec<AggregationBucket>,
}
