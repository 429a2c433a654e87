//! Object holders and primary keys.
//!
//! An [`ObjectHolder`] is the engine's view of a single remote entity: its
//! type, primary key, optional resource identifier and a flat property map.
//! Holders are produced by the transport layer and stored by reference; the
//! cache never mutates one.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::ApiName;

/// Primary key of an object.
///
/// Keys are compared structurally; `Integer(1)` and `String("1")` are
/// distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryKey {
    Integer(i64),
    String(String),
    Boolean(bool),
}

impl PrimaryKey {
    /// The key as a JSON value, e.g. for building an `$in` filter.
    pub fn to_value(&self) -> Value {
        match self {
            PrimaryKey::Integer(v) => Value::from(*v),
            PrimaryKey::String(v) => Value::from(v.clone()),
            PrimaryKey::Boolean(v) => Value::from(*v),
        }
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimaryKey::Integer(v) => write!(f, "{}", v),
            PrimaryKey::String(v) => write!(f, "{}", v),
            PrimaryKey::Boolean(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for PrimaryKey {
    fn from(v: i64) -> Self {
        PrimaryKey::Integer(v)
    }
}

impl From<&str> for PrimaryKey {
    fn from(v: &str) -> Self {
        PrimaryKey::String(v.to_string())
    }
}

impl From<String> for PrimaryKey {
    fn from(v: String) -> Self {
        PrimaryKey::String(v)
    }
}

impl From<bool> for PrimaryKey {
    fn from(v: bool) -> Self {
        PrimaryKey::Boolean(v)
    }
}

/// A single remote object as returned by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectHolder {
    /// API name of the concrete object type.
    pub api_name: ApiName,
    /// Primary key value.
    pub primary_key: PrimaryKey,
    /// Resource identifier, present only when the fetch requested it.
    pub rid: Option<String>,
    /// Property values keyed by property API name. Derived (RDP) property
    /// values appear here alongside regular ones.
    pub properties: BTreeMap<String, Value>,
}

impl ObjectHolder {
    pub fn new(api_name: impl Into<ApiName>, primary_key: impl Into<PrimaryKey>) -> Self {
        Self {
            api_name: api_name.into(),
            primary_key: primary_key.into(),
            rid: None,
            properties: BTreeMap::new(),
        }
    }

    /// Set a property value, builder style.
    pub fn with_property(mut self, name: impl Into<String>, value: Value) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    /// Set the resource identifier, builder style.
    pub fn with_rid(mut self, rid: impl Into<String>) -> Self {
        self.rid = Some(rid.into());
        self
    }

    /// Look up a property value by API name.
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}

/// One page of list results from the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectPage {
    pub data: Vec<ObjectHolder>,
    /// Token for the next page; `None` when the result set is exhausted.
    pub next_page_token: Option<String>,
}

impl ObjectPage {
    pub fn new(data: Vec<ObjectHolder>, next_page_token: Option<String>) -> Self {
        Self {
            data,
            next_page_token,
        }
    }

    /// A terminal page with no data.
    pub fn empty() -> Self {
        Self {
            data: Vec::new(),
            next_page_token: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_primary_key_from_conversions() {
        assert_eq!(PrimaryKey::from(42), PrimaryKey::Integer(42));
        assert_eq!(PrimaryKey::from("emp1"), PrimaryKey::String("emp1".into()));
        assert_eq!(PrimaryKey::from(true), PrimaryKey::Boolean(true));
    }

    #[test]
    fn test_primary_key_integer_and_string_distinct() {
        assert_ne!(PrimaryKey::Integer(1), PrimaryKey::String("1".into()));
    }

    #[test]
    fn test_object_holder_builder() {
        let obj = ObjectHolder::new("Employee", "emp1")
            .with_property("name", json!("Alice"))
            .with_rid("ri.employee.emp1");

        assert_eq!(obj.api_name, "Employee");
        assert_eq!(obj.primary_key, PrimaryKey::String("emp1".into()));
        assert_eq!(obj.property("name"), Some(&json!("Alice")));
        assert_eq!(obj.rid.as_deref(), Some("ri.employee.emp1"));
        assert!(obj.property("missing").is_none());
    }

    #[test]
    fn test_object_page_empty_is_terminal() {
        let page = ObjectPage::empty();
        assert!(page.data.is_empty());
        assert!(page.next_page_token.is_none());
    }
}
