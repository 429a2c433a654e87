//! Derived-property canonicalization.
//!
//! A derived-property clause participates in cache keys, so two clauses
//! that differ only in commutative-operand order or in the operand order of
//! an embedded filter must canonicalize identically. Object sets embedded
//! in selections are normalized recursively.

use std::collections::HashMap;
use std::sync::Mutex;

use trellis_core::{DerivedPropertyDefinition, ObjectSetSpec, RdpConfig};

use super::where_clause::normalize_where;
use super::{structural_hash, Canonical};

pub struct RdpCanonicalizer {
    memo: Mutex<HashMap<[u8; 32], Canonical<RdpConfig>>>,
}

impl RdpCanonicalizer {
    pub fn new() -> Self {
        Self {
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn canonicalize(&self, raw: &RdpConfig) -> Canonical<RdpConfig> {
        let raw_hash = structural_hash(raw);
        if let Some(hit) = self.memo.lock().unwrap().get(&raw_hash) {
            return hit.clone();
        }

        let canonical = Canonical::new(normalize_rdp_config(raw));
        self.memo
            .lock()
            .unwrap()
            .insert(raw_hash, canonical.clone());
        canonical
    }
}

impl Default for RdpCanonicalizer {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn normalize_rdp_config(config: &RdpConfig) -> RdpConfig {
    config
        .iter()
        .map(|(name, def)| (name.clone(), normalize_rdp_def(def)))
        .collect()
}

fn normalize_rdp_def(def: &DerivedPropertyDefinition) -> DerivedPropertyDefinition {
    use DerivedPropertyDefinition as D;
    match def {
        D::Selection {
            object_set,
            operation,
        } => D::Selection {
            object_set: normalize_object_set(object_set),
            operation: operation.clone(),
        },
        D::Property { api_name } => D::Property {
            api_name: api_name.clone(),
        },
        D::Negate { property } => D::Negate {
            property: Box::new(normalize_rdp_def(property)),
        },
        D::AbsoluteValue { property } => D::AbsoluteValue {
            property: Box::new(normalize_rdp_def(property)),
        },
        D::Extract { part, property } => D::Extract {
            part: *part,
            property: Box::new(normalize_rdp_def(property)),
        },
        D::Least { properties } => D::Least {
            properties: normalize_commutative(properties),
        },
        D::Greatest { properties } => D::Greatest {
            properties: normalize_commutative(properties),
        },
        D::Add { properties } => D::Add {
            properties: normalize_commutative(properties),
        },
        D::Multiply { properties } => D::Multiply {
            properties: normalize_commutative(properties),
        },
        D::Subtract { left, right } => D::Subtract {
            left: Box::new(normalize_rdp_def(left)),
            right: Box::new(normalize_rdp_def(right)),
        },
        D::Divide { left, right } => D::Divide {
            left: Box::new(normalize_rdp_def(left)),
            right: Box::new(normalize_rdp_def(right)),
        },
    }
}

fn normalize_commutative(
    properties: &[DerivedPropertyDefinition],
) -> Vec<DerivedPropertyDefinition> {
    let mut normalized: Vec<_> = properties.iter().map(normalize_rdp_def).collect();
    normalized.sort_by_cached_key(|d| {
        serde_json::to_string(d).expect("derived property definitions serialize infallibly")
    });
    normalized
}

/// Normalize an object set: embedded filters and derived properties are
/// canonicalized, and the operand lists of the order-independent set
/// operations (union, intersect) are sorted. Subtraction operand order is
/// significant and preserved.
pub(crate) fn normalize_object_set(spec: &ObjectSetSpec) -> ObjectSetSpec {
    use ObjectSetSpec as S;
    match spec {
        S::Base { .. } | S::InterfaceBase { .. } | S::MethodInput => spec.clone(),
        S::SearchAround { object_set, link } => S::SearchAround {
            object_set: Box::new(normalize_object_set(object_set)),
            link: link.clone(),
        },
        S::InterfaceLinkSearchAround {
            object_set,
            interface_link,
        } => S::InterfaceLinkSearchAround {
            object_set: Box::new(normalize_object_set(object_set)),
            interface_link: interface_link.clone(),
        },
        S::Filter {
            object_set,
            where_clause,
        } => S::Filter {
            object_set: Box::new(normalize_object_set(object_set)),
            where_clause: normalize_where(where_clause),
        },
        S::Union { object_sets } => S::Union {
            object_sets: normalize_set_operands(object_sets, /* sort */ true),
        },
        S::Intersect { object_sets } => S::Intersect {
            object_sets: normalize_set_operands(object_sets, /* sort */ true),
        },
        S::Subtract { object_sets } => S::Subtract {
            object_sets: normalize_set_operands(object_sets, /* sort */ false),
        },
        S::WithProperties {
            object_set,
            derived_properties,
        } => S::WithProperties {
            object_set: Box::new(normalize_object_set(object_set)),
            derived_properties: normalize_rdp_config(derived_properties),
        },
        S::NearestNeighbors {
            object_set,
            num_neighbors,
        } => S::NearestNeighbors {
            object_set: Box::new(normalize_object_set(object_set)),
            num_neighbors: *num_neighbors,
        },
        S::AsType {
            object_set,
            type_api_name,
        } => S::AsType {
            object_set: Box::new(normalize_object_set(object_set)),
            type_api_name: type_api_name.clone(),
        },
        S::AsBaseObjectTypes { object_set } => S::AsBaseObjectTypes {
            object_set: Box::new(normalize_object_set(object_set)),
        },
        S::Reference { .. } | S::Static { .. } => spec.clone(),
    }
}

fn normalize_set_operands(operands: &[ObjectSetSpec], sort: bool) -> Vec<ObjectSetSpec> {
    let mut normalized: Vec<_> = operands.iter().map(normalize_object_set).collect();
    if sort {
        normalized.sort_by_cached_key(|s| {
            serde_json::to_string(s).expect("object set specs serialize infallibly")
        });
    }
    normalized
}
