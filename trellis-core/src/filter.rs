//! Filter and ordering expressions for object queries.
//!
//! A [`WhereClause`] is a recursive boolean tree over field comparisons.
//! The engine canonicalizes these before keying the cache, so two clauses
//! that differ only in operand order resolve to the same query.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Filter operator for field comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    /// Equal to
    Eq,
    /// Not equal to
    Ne,
    /// Greater than
    Gt,
    /// Less than
    Lt,
    /// Greater than or equal
    Gte,
    /// Less than or equal
    Lte,
    /// Contains substring (for strings)
    Contains,
    /// Starts with prefix (for strings)
    StartsWith,
    /// In list of values
    In,
    /// Field is null / absent
    IsNull,
}

/// Recursive filter expression for object queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WhereClause {
    /// All children must match.
    And { clauses: Vec<WhereClause> },
    /// Any child must match.
    Or { clauses: Vec<WhereClause> },
    /// The child must not match.
    Not { clause: Box<WhereClause> },
    /// Single field comparison.
    Comparison {
        field: String,
        op: FilterOperator,
        value: Value,
    },
}

impl WhereClause {
    pub fn and(clauses: Vec<WhereClause>) -> Self {
        WhereClause::And { clauses }
    }

    pub fn or(clauses: Vec<WhereClause>) -> Self {
        WhereClause::Or { clauses }
    }

    pub fn not(clause: WhereClause) -> Self {
        WhereClause::Not {
            clause: Box::new(clause),
        }
    }

    pub fn comparison(field: impl Into<String>, op: FilterOperator, value: Value) -> Self {
        WhereClause::Comparison {
            field: field.into(),
            op,
            value,
        }
    }

    /// Create an equality comparison.
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self::comparison(field, FilterOperator::Eq, value)
    }

    /// Create an `$in` comparison over a list of values.
    pub fn in_values(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::comparison(field, FilterOperator::In, Value::Array(values))
    }

    /// The always-true filter (an empty conjunction).
    pub fn always() -> Self {
        WhereClause::And {
            clauses: Vec::new(),
        }
    }
}

/// Sort direction for an order-by clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// One field of an ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderByClause {
    pub field: String,
    pub direction: SortDirection,
}

impl OrderByClause {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Ordering of a list query. Clause order is significant.
pub type OrderBy = Vec<OrderByClause>;
