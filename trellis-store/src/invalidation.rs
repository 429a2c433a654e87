//! Which object types invalidate an object set.
//!
//! A list backed by `A.where(..).pivot(B).where(..)` must refetch when a B
//! changes, even though its rows are As. This walker computes, for an
//! object set (including its derived-property selections), how often each
//! object type is touched, then derives the invalidation set: every type
//! with a remaining count after uncounting the set's own result type.
//!
//! The walk stays conservative: a pivot chain counts every type along the
//! chain, and set operations merge their operands' counts as a per-type
//! maximum so `Union(A->B, A->B)` does not double-count.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use trellis_core::{
    ApiName, DerivedPropertyDefinition, InterfaceMetadata, ObjectMetadata, ObjectSetError,
    ObjectSetSpec, OntologyError, OntologyProvider, TargetTypeKind, TrellisResult,
};

/// What an object set resolves to: a concrete type or an interface.
pub enum ResolvedType {
    Object(Arc<ObjectMetadata>),
    Interface(Arc<InterfaceMetadata>),
}

impl ResolvedType {
    pub fn api_name(&self) -> &str {
        match self {
            ResolvedType::Object(meta) => &meta.api_name,
            ResolvedType::Interface(meta) => &meta.api_name,
        }
    }
}

/// Outcome of the walk.
#[derive(Debug)]
pub struct InvalidationInfo {
    /// API name of the set's member type.
    pub result_type: ApiName,
    /// How often each type was touched.
    pub counts: HashMap<ApiName, usize>,
    /// Types whose mutation must invalidate queries over this set.
    pub invalidation_set: HashSet<ApiName>,
}

/// Walk an object set and compute its invalidation info.
pub async fn object_types_that_invalidate(
    ontology: &Arc<dyn OntologyProvider>,
    object_set: &ObjectSetSpec,
) -> TrellisResult<InvalidationInfo> {
    let mut counts = HashMap::new();
    let result = calc_object_set(ontology, object_set, &mut counts, None).await?;

    // The result type itself only invalidates when it appears again
    // upstream of the final pivot.
    let mut tweaked = counts.clone();
    if let Some(count) = tweaked.get_mut(result.api_name()) {
        *count = count.saturating_sub(1);
    }

    let invalidation_set = tweaked
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(api_name, _)| api_name)
        .collect();

    Ok(InvalidationInfo {
        result_type: result.api_name().to_string(),
        counts,
        invalidation_set,
    })
}

async fn bump_object(
    ontology: &Arc<dyn OntologyProvider>,
    api_name: &str,
    counts: &mut HashMap<ApiName, usize>,
) -> TrellisResult<ResolvedType> {
    let meta = ontology.object_metadata(api_name).await?;
    *counts.entry(api_name.to_string()).or_insert(0) += 1;
    Ok(ResolvedType::Object(meta))
}

async fn bump_interface(
    ontology: &Arc<dyn OntologyProvider>,
    api_name: &str,
    counts: &mut HashMap<ApiName, usize>,
) -> TrellisResult<ResolvedType> {
    let meta = ontology.interface_metadata(api_name).await?;
    for implementer in &meta.implemented_by {
        *counts.entry(implementer.clone()).or_insert(0) += 1;
    }
    Ok(ResolvedType::Interface(meta))
}

fn calc_object_set<'a>(
    ontology: &'a Arc<dyn OntologyProvider>,
    os: &'a ObjectSetSpec,
    counts: &'a mut HashMap<ApiName, usize>,
    method_input: Option<&'a ObjectSetSpec>,
) -> BoxFuture<'a, TrellisResult<ResolvedType>> {
    use ObjectSetSpec as S;
    async move {
        match os {
            S::Base { object_type } => bump_object(ontology, object_type, counts).await,

            S::InterfaceBase { interface_type } => {
                bump_interface(ontology, interface_type, counts).await
            }

            S::SearchAround { object_set, link } => {
                let src = calc_object_set(ontology, object_set, counts, method_input).await?;
                let ResolvedType::Object(meta) = src else {
                    return Err(ObjectSetError::UnsupportedShape {
                        shape: "searchAround over an interface set".to_string(),
                    }
                    .into());
                };
                let link_meta = meta.links.get(link).ok_or_else(|| {
                    OntologyError::LinkNotFound {
                        api_name: meta.api_name.clone(),
                        link: link.clone(),
                    }
                })?;
                match link_meta.target_kind {
                    TargetTypeKind::Object => {
                        bump_object(ontology, &link_meta.target_api_name, counts).await
                    }
                    TargetTypeKind::Interface => {
                        bump_interface(ontology, &link_meta.target_api_name, counts).await
                    }
                }
            }

            S::InterfaceLinkSearchAround {
                object_set,
                interface_link,
            } => {
                let src = calc_object_set(ontology, object_set, counts, method_input).await?;
                let ResolvedType::Interface(meta) = src else {
                    return Err(ObjectSetError::UnsupportedShape {
                        shape: "interfaceLinkSearchAround over an object set".to_string(),
                    }
                    .into());
                };
                let link_meta = meta.links.get(interface_link).ok_or_else(|| {
                    OntologyError::LinkNotFound {
                        api_name: meta.api_name.clone(),
                        link: interface_link.clone(),
                    }
                })?;
                match link_meta.target_kind {
                    TargetTypeKind::Object => {
                        bump_object(ontology, &link_meta.target_api_name, counts).await
                    }
                    TargetTypeKind::Interface => {
                        bump_interface(ontology, &link_meta.target_api_name, counts).await
                    }
                }
            }

            // Filters based on derived properties are covered by the
            // withProperties walk; the filter itself adds nothing.
            S::Filter { object_set, .. } => {
                calc_object_set(ontology, object_set, counts, method_input).await
            }

            S::Union { object_sets }
            | S::Intersect { object_sets }
            | S::Subtract { object_sets } => {
                if object_sets.is_empty() {
                    return Err(ObjectSetError::EmptySetOperation.into());
                }

                // Operands get fresh count maps, merged back as a per-type
                // maximum: Union(A->B, A->B) needs A:1 B:1, not A:2 B:2.
                let mut results = Vec::with_capacity(object_sets.len());
                for operand in object_sets {
                    let mut operand_counts = HashMap::new();
                    let resolved =
                        calc_object_set(ontology, operand, &mut operand_counts, method_input)
                            .await?;
                    for (api_name, count) in operand_counts {
                        let merged = counts.entry(api_name).or_insert(0);
                        *merged = (*merged).max(count);
                    }
                    results.push(resolved);
                }

                let first = results[0].api_name().to_string();
                if let Some(mismatch) =
                    results.iter().find(|resolved| resolved.api_name() != first)
                {
                    return Err(ObjectSetError::IncompatibleSetOperands {
                        left: first,
                        right: mismatch.api_name().to_string(),
                    }
                    .into());
                }
                Ok(results.remove(0))
            }

            S::WithProperties {
                object_set,
                derived_properties,
            } => {
                // Everything an RDP chain touches invalidates us.
                for definition in derived_properties.values() {
                    calc_rdp(ontology, definition, counts, Some(object_set)).await?;
                }
                calc_object_set(ontology, object_set, counts, Some(object_set)).await
            }

            S::MethodInput => {
                let input = method_input.ok_or(ObjectSetError::MethodInputOutsideRdp)?;
                // Only consulted for the member type; fresh counts so the
                // input set is not counted twice.
                let mut scratch = HashMap::new();
                calc_object_set(ontology, input, &mut scratch, method_input).await
            }

            S::NearestNeighbors { object_set, .. } => {
                calc_object_set(ontology, object_set, counts, method_input).await
            }

            // These cannot be analyzed without loading remote state.
            S::AsType { .. }
            | S::AsBaseObjectTypes { .. }
            | S::Reference { .. }
            | S::Static { .. } => Err(ObjectSetError::UnsupportedShape {
                shape: os.shape_name().to_string(),
            }
            .into()),
        }
    }
    .boxed()
}

fn calc_rdp<'a>(
    ontology: &'a Arc<dyn OntologyProvider>,
    definition: &'a DerivedPropertyDefinition,
    counts: &'a mut HashMap<ApiName, usize>,
    method_input: Option<&'a ObjectSetSpec>,
) -> BoxFuture<'a, TrellisResult<()>> {
    use DerivedPropertyDefinition as D;
    async move {
        match definition {
            D::Selection { object_set, .. } => {
                calc_object_set(ontology, object_set, counts, method_input).await?;
                Ok(())
            }

            D::Property { .. } => Ok(()),

            D::Negate { property }
            | D::AbsoluteValue { property }
            | D::Extract { property, .. } => {
                calc_rdp(ontology, property, counts, method_input).await
            }

            D::Least { properties }
            | D::Greatest { properties }
            | D::Add { properties }
            | D::Multiply { properties } => {
                for property in properties {
                    calc_rdp(ontology, property, counts, method_input).await?;
                }
                Ok(())
            }

            D::Subtract { left, right } | D::Divide { left, right } => {
                calc_rdp(ontology, left, counts, method_input).await?;
                calc_rdp(ontology, right, counts, method_input).await
            }
        }
    }
    .boxed()
}
