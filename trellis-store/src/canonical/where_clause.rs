//! Where-clause canonicalization.
//!
//! The canonical form is a quotient over operand order: `$and`/`$or`
//! operands and `$in` value lists are sorted by their serialized form,
//! nested conjunctions of the same kind are flattened, duplicates dropped,
//! and single-operand conjunctions collapsed. Two semantically-equal
//! clauses therefore canonicalize to deep-equal output.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use trellis_core::{FilterOperator, WhereClause};

use super::{structural_hash, Canonical};

pub struct WhereClauseCanonicalizer {
    memo: Mutex<HashMap<[u8; 32], Canonical<WhereClause>>>,
}

impl WhereClauseCanonicalizer {
    pub fn new() -> Self {
        Self {
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn canonicalize(&self, raw: &WhereClause) -> Canonical<WhereClause> {
        let raw_hash = structural_hash(raw);
        if let Some(hit) = self.memo.lock().unwrap().get(&raw_hash) {
            return hit.clone();
        }

        let canonical = Canonical::new(normalize_where(raw));
        self.memo
            .lock()
            .unwrap()
            .insert(raw_hash, canonical.clone());
        canonical
    }
}

impl Default for WhereClauseCanonicalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Pure normalization, shared with the RDP and intersect canonicalizers.
pub(crate) fn normalize_where(clause: &WhereClause) -> WhereClause {
    match clause {
        WhereClause::And { clauses } => normalize_junction(clauses, /* is_and */ true),
        WhereClause::Or { clauses } => normalize_junction(clauses, /* is_and */ false),
        WhereClause::Not { clause } => match normalize_where(clause) {
            // Double negation cancels.
            WhereClause::Not { clause: inner } => *inner,
            other => WhereClause::Not {
                clause: Box::new(other),
            },
        },
        WhereClause::Comparison { field, op, value } => WhereClause::Comparison {
            field: field.clone(),
            op: *op,
            value: normalize_value(*op, value),
        },
    }
}

fn normalize_junction(clauses: &[WhereClause], is_and: bool) -> WhereClause {
    let mut flattened: Vec<WhereClause> = Vec::with_capacity(clauses.len());
    for child in clauses {
        let normalized = normalize_where(child);
        match normalized {
            WhereClause::And { clauses } if is_and => flattened.extend(clauses),
            WhereClause::Or { clauses } if !is_and => flattened.extend(clauses),
            other => flattened.push(other),
        }
    }

    flattened.sort_by_cached_key(serialized);
    flattened.dedup();

    if flattened.len() == 1 {
        return flattened.into_iter().next().expect("len checked");
    }

    if is_and {
        WhereClause::And { clauses: flattened }
    } else {
        WhereClause::Or { clauses: flattened }
    }
}

fn normalize_value(op: FilterOperator, value: &Value) -> Value {
    // `$in` lists are sets: order-independent, duplicates meaningless.
    if op == FilterOperator::In {
        if let Value::Array(items) = value {
            let mut items = items.clone();
            items.sort_by_cached_key(serialized);
            items.dedup();
            return Value::Array(items);
        }
    }
    value.clone()
}

fn serialized<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).expect("filter values serialize infallibly")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn eq(field: &str, value: Value) -> WhereClause {
        WhereClause::eq(field, value)
    }

    #[test]
    fn test_and_operand_order_is_irrelevant() {
        let canonicalizer = WhereClauseCanonicalizer::new();
        let a = WhereClause::and(vec![eq("a", json!(1)), eq("b", json!(2))]);
        let b = WhereClause::and(vec![eq("b", json!(2)), eq("a", json!(1))]);

        assert_eq!(canonicalizer.canonicalize(&a), canonicalizer.canonicalize(&b));
    }

    #[test]
    fn test_nested_and_is_flattened() {
        let canonicalizer = WhereClauseCanonicalizer::new();
        let nested = WhereClause::and(vec![
            WhereClause::and(vec![eq("a", json!(1)), eq("b", json!(2))]),
            eq("c", json!(3)),
        ]);
        let flat = WhereClause::and(vec![
            eq("c", json!(3)),
            eq("a", json!(1)),
            eq("b", json!(2)),
        ]);

        assert_eq!(
            canonicalizer.canonicalize(&nested),
            canonicalizer.canonicalize(&flat)
        );
    }

    #[test]
    fn test_single_operand_conjunction_collapses() {
        let normalized = normalize_where(&WhereClause::and(vec![eq("a", json!(1))]));
        assert!(matches!(normalized, WhereClause::Comparison { .. }));
    }

    #[test]
    fn test_in_values_sorted_and_deduped() {
        let clause = WhereClause::in_values("id", vec![json!(3), json!(1), json!(3)]);
        let normalized = normalize_where(&clause);
        match normalized {
            WhereClause::Comparison { value, .. } => {
                assert_eq!(value, json!([1, 3]));
            }
            _ => panic!("expected Comparison"),
        }
    }

    #[test]
    fn test_double_negation_cancels() {
        let clause = WhereClause::not(WhereClause::not(eq("a", json!(1))));
        let normalized = normalize_where(&clause);
        assert!(matches!(normalized, WhereClause::Comparison { .. }));
    }

    #[test]
    fn test_or_and_and_do_not_collide() {
        let canonicalizer = WhereClauseCanonicalizer::new();
        let a = WhereClause::and(vec![eq("a", json!(1)), eq("b", json!(2))]);
        let o = WhereClause::or(vec![eq("a", json!(1)), eq("b", json!(2))]);

        assert_ne!(canonicalizer.canonicalize(&a), canonicalizer.canonicalize(&o));
    }

    #[test]
    fn test_memoized_result_is_stable() {
        let canonicalizer = WhereClauseCanonicalizer::new();
        let clause = eq("a", json!(1));
        let first = canonicalizer.canonicalize(&clause);
        let second = canonicalizer.canonicalize(&clause);
        assert_eq!(first, second);
    }

    // Proptest strategy over small where-clause trees.
    fn arb_where() -> impl Strategy<Value = WhereClause> {
        let leaf = ("[a-d]", 0i64..5).prop_map(|(field, v)| WhereClause::eq(field, json!(v)));
        leaf.prop_recursive(3, 16, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(WhereClause::and),
                prop::collection::vec(inner.clone(), 0..4).prop_map(WhereClause::or),
                inner.prop_map(WhereClause::not),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_normalization_is_idempotent(clause in arb_where()) {
            let once = normalize_where(&clause);
            let twice = normalize_where(&once);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_operand_permutation_is_a_quotient(
            mut clauses in prop::collection::vec(arb_where(), 1..5),
            seed in any::<u64>(),
        ) {
            let original = WhereClause::and(clauses.clone());
            // Deterministic pseudo-shuffle.
            let len = clauses.len();
            for i in 0..len {
                let j = ((seed as usize).wrapping_mul(31).wrapping_add(i * 7)) % len;
                clauses.swap(i, j);
            }
            let shuffled = WhereClause::and(clauses);
            prop_assert_eq!(normalize_where(&original), normalize_where(&shuffled));
        }
    }
}
