//! Object set specifications.
//!
//! An [`ObjectSetSpec`] describes a server-evaluated set of objects: a base
//! type, filtered, pivoted through links, combined with set operations, or
//! augmented with derived properties. The engine builds these from query
//! parameters and walks them to compute invalidation sets; it never
//! evaluates one locally.

use serde::{Deserialize, Serialize};

use crate::filter::WhereClause;
use crate::rdp::RdpConfig;
use crate::ApiName;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ObjectSetSpec {
    /// All objects of a concrete type.
    Base { object_type: ApiName },
    /// All objects implementing an interface.
    InterfaceBase { interface_type: ApiName },
    /// Pivot through an object link.
    SearchAround {
        object_set: Box<ObjectSetSpec>,
        link: String,
    },
    /// Pivot through an interface link.
    InterfaceLinkSearchAround {
        object_set: Box<ObjectSetSpec>,
        interface_link: String,
    },
    /// Filter by a where clause.
    Filter {
        object_set: Box<ObjectSetSpec>,
        where_clause: WhereClause,
    },
    Union { object_sets: Vec<ObjectSetSpec> },
    Intersect { object_sets: Vec<ObjectSetSpec> },
    Subtract { object_sets: Vec<ObjectSetSpec> },
    /// Attach runtime derived properties.
    WithProperties {
        object_set: Box<ObjectSetSpec>,
        derived_properties: RdpConfig,
    },
    /// Similarity search; does not change the member type.
    NearestNeighbors {
        object_set: Box<ObjectSetSpec>,
        num_neighbors: u32,
    },
    /// Placeholder for the input set inside a derived-property definition.
    MethodInput,
    /// The following shapes cannot be analyzed without loading remote
    /// state; the invalidation walker rejects them as hard failures.
    AsType {
        object_set: Box<ObjectSetSpec>,
        type_api_name: ApiName,
    },
    AsBaseObjectTypes { object_set: Box<ObjectSetSpec> },
    Reference { rid: String },
    Static { rids: Vec<String> },
}

impl ObjectSetSpec {
    pub fn base(object_type: impl Into<ApiName>) -> Self {
        ObjectSetSpec::Base {
            object_type: object_type.into(),
        }
    }

    pub fn interface_base(interface_type: impl Into<ApiName>) -> Self {
        ObjectSetSpec::InterfaceBase {
            interface_type: interface_type.into(),
        }
    }

    pub fn search_around(self, link: impl Into<String>) -> Self {
        ObjectSetSpec::SearchAround {
            object_set: Box::new(self),
            link: link.into(),
        }
    }

    pub fn filtered(self, where_clause: WhereClause) -> Self {
        ObjectSetSpec::Filter {
            object_set: Box::new(self),
            where_clause,
        }
    }

    pub fn with_properties(self, derived_properties: RdpConfig) -> Self {
        ObjectSetSpec::WithProperties {
            object_set: Box::new(self),
            derived_properties,
        }
    }

    pub fn intersect(self, others: Vec<ObjectSetSpec>) -> Self {
        let mut object_sets = vec![self];
        object_sets.extend(others);
        ObjectSetSpec::Intersect { object_sets }
    }

    /// Discriminant name, for error messages.
    pub fn shape_name(&self) -> &'static str {
        match self {
            ObjectSetSpec::Base { .. } => "base",
            ObjectSetSpec::InterfaceBase { .. } => "interfaceBase",
            ObjectSetSpec::SearchAround { .. } => "searchAround",
            ObjectSetSpec::InterfaceLinkSearchAround { .. } => "interfaceLinkSearchAround",
            ObjectSetSpec::Filter { .. } => "filter",
            ObjectSetSpec::Union { .. } => "union",
            ObjectSetSpec::Intersect { .. } => "intersect",
            ObjectSetSpec::Subtract { .. } => "subtract",
            ObjectSetSpec::WithProperties { .. } => "withProperties",
            ObjectSetSpec::NearestNeighbors { .. } => "nearestNeighbors",
            ObjectSetSpec::MethodInput => "methodInput",
            ObjectSetSpec::AsType { .. } => "asType",
            ObjectSetSpec::AsBaseObjectTypes { .. } => "asBaseObjectTypes",
            ObjectSetSpec::Reference { .. } => "reference",
            ObjectSetSpec::Static { .. } => "static",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_chain_nests_correctly() {
        let spec = ObjectSetSpec::base("Employee")
            .filtered(WhereClause::eq("active", json!(true)))
            .search_around("manager");

        match spec {
            ObjectSetSpec::SearchAround { object_set, link } => {
                assert_eq!(link, "manager");
                assert!(matches!(*object_set, ObjectSetSpec::Filter { .. }));
            }
            _ => panic!("expected SearchAround"),
        }
    }

    #[test]
    fn test_intersect_keeps_self_first() {
        let spec = ObjectSetSpec::base("A").intersect(vec![ObjectSetSpec::base("B")]);
        match spec {
            ObjectSetSpec::Intersect { object_sets } => {
                assert_eq!(object_sets.len(), 2);
                assert_eq!(object_sets[0], ObjectSetSpec::base("A"));
            }
            _ => panic!("expected Intersect"),
        }
    }

    #[test]
    fn test_shape_name_matches_discriminant() {
        assert_eq!(ObjectSetSpec::MethodInput.shape_name(), "methodInput");
        assert_eq!(
            ObjectSetSpec::Static { rids: vec![] }.shape_name(),
            "static"
        );
    }
}
