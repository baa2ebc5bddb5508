//! Reachability builder: matched bundles → bindings → subjects.

use ahash::AHashSet;
use rayon::prelude::*;
use std::collections::BTreeSet;

use crate::config::QueryRequest;
use crate::graph::{
    aggregation_node_id, permission_node_id, subject_node_id, EdgeKind, GraphBuilder, GraphNode,
    NodeKind, PermissionDetails, RoleDetails,
};
use crate::rules::{dedupe_rule_refs, RuleRef};
use crate::types::{non_empty, Binding, Bundle, BundleKind};

use super::aggregation::AggregationIndex;
use super::matcher::RuleMatcher;
use super::scope::NamespaceFilter;
use super::CatalogIndex;

/// Below this many candidate bundles matching runs sequentially.
pub const MATCH_PARALLEL_THRESHOLD: usize = 50;

const EXPLAIN_AGGREGATES: &str = "ClusterRole contributes rules via aggregationRule";
const EXPLAIN_AGGREGATION_TARGET: &str = "Aggregated rules flow into the target ClusterRole";
const EXPLAIN_GRANTS: &str = "Role referenced by binding";
const EXPLAIN_SUBJECTS: &str = "Binding targets subject";
const EXPLAIN_PERMITS: &str = "Role grants permission";

/// Matching result for one bundle. `refs` is empty when nothing matched.
#[derive(Debug)]
pub struct BundleMatch<'a> {
    pub id: &'a str,
    pub bundle: &'a Bundle,
    pub refs: Vec<RuleRef>,
    pub warnings: Vec<String>,
}

/// A reached service-account subject; ordered by (namespace, name, node id).
/// `namespace` is empty when neither the subject nor its binding names one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServiceAccountRef {
    pub namespace: String,
    pub name: String,
    pub node_id: String,
}

#[derive(Debug, Default)]
pub struct Reached {
    pub matched_roles: usize,
    pub matched_bindings: usize,
    pub matched_subjects: usize,
    pub service_accounts: Vec<ServiceAccountRef>,
}

/// Match every in-scope bundle's effective rules, in bundle-id order.
pub fn match_bundles<'a>(
    index: &'a CatalogIndex<'_>,
    aggregation: &AggregationIndex<'a>,
    matcher: &RuleMatcher<'_>,
    filter: &NamespaceFilter,
) -> Vec<BundleMatch<'a>> {
    let candidates: Vec<(&'a str, &'a Bundle)> = index
        .bundles
        .iter()
        .filter(|(_, bundle)| filter.allows_bundle(bundle))
        .map(|(id, bundle)| (id.as_str(), *bundle))
        .collect();

    let run = |&(id, bundle): &(&'a str, &'a Bundle)| {
        let rules = aggregation.effective_rules(id, bundle);
        let outcome = matcher.match_rules(&rules);
        BundleMatch {
            id,
            bundle,
            refs: outcome.refs,
            warnings: outcome.warnings,
        }
    };

    let matches: Vec<BundleMatch<'a>> = if candidates.len() < MATCH_PARALLEL_THRESHOLD {
        candidates.iter().map(run).collect()
    } else {
        candidates.par_iter().map(run).collect()
    };

    tracing::debug!(
        candidates = candidates.len(),
        matched = matches.iter().filter(|m| !m.refs.is_empty()).count(),
        "matched bundles"
    );
    matches
}

fn role_node(
    id: &str,
    bundle: &Bundle,
    aggregation: &AggregationIndex<'_>,
    refs: Vec<RuleRef>,
) -> GraphNode {
    let details = RoleDetails {
        aggregated: aggregation.is_aggregated(id),
        aggregation_sources: aggregation.sources(id).to_vec(),
        matched_rule_refs: refs,
        labels: bundle.labels.clone(),
        annotations: bundle.annotations.clone(),
    };
    match bundle.kind {
        BundleKind::Role => GraphNode::new(
            id.to_string(),
            &bundle.name,
            non_empty(&bundle.namespace),
            NodeKind::Role(details),
        ),
        BundleKind::ClusterRole => {
            GraphNode::new(id.to_string(), &bundle.name, None, NodeKind::ClusterRole(details))
        }
    }
}

fn binding_node(binding: &Binding, id: String) -> GraphNode {
    let kind = if binding.is_cluster_scoped() {
        NodeKind::ClusterRoleBinding
    } else {
        NodeKind::RoleBinding
    };
    GraphNode::new(id, &binding.name, binding.scope_namespace(), kind)
}

fn permission_node(rule_ref: &RuleRef) -> GraphNode {
    let (group, resource) = if rule_ref.is_non_resource() {
        (String::new(), rule_ref.non_resource_urls.join(","))
    } else {
        (rule_ref.api_group.clone(), rule_ref.resource_key())
    };
    let name = if group.is_empty() {
        format!("{} {}", rule_ref.verb, resource)
    } else {
        format!("{} {}/{}", rule_ref.verb, group, resource)
    };
    GraphNode::new(
        permission_node_id(&group, &resource, &rule_ref.verb),
        &name,
        None,
        NodeKind::Permission(PermissionDetails {
            api_group: group,
            resource,
            verb: rule_ref.verb.clone(),
            non_resource: rule_ref.is_non_resource(),
            phantom: rule_ref.phantom,
        }),
    )
}

/// Emit role, binding and subject nodes for every matched bundle that
/// survives the scope filter, plus aggregation and permission extras.
pub fn build(
    builder: &mut GraphBuilder,
    index: &CatalogIndex<'_>,
    aggregation: &AggregationIndex<'_>,
    matches: Vec<BundleMatch<'_>>,
    filter: &NamespaceFilter,
    request: &QueryRequest,
) -> Reached {
    let mut reached = Reached::default();
    let mut bindings_seen: AHashSet<String> = AHashSet::new();
    let mut subjects_seen: AHashSet<String> = AHashSet::new();
    let mut service_accounts: BTreeSet<ServiceAccountRef> = BTreeSet::new();

    for bundle_match in matches {
        if bundle_match.refs.is_empty() {
            continue;
        }
        let BundleMatch {
            id,
            bundle,
            mut refs,
            ..
        } = bundle_match;

        let bindings: Vec<&Binding> = index
            .bindings_for(id)
            .iter()
            .copied()
            .filter(|binding| filter.allows_binding(binding))
            .collect();
        if bundle.is_cluster_scoped() && !filter.keeps_cluster_bundle(bindings.len()) {
            tracing::trace!(bundle = id, "skipped by strict namespace scope");
            continue;
        }

        if !request.include_rule_metadata {
            refs.iter_mut().for_each(RuleRef::strip_metadata);
        }
        let refs = dedupe_rule_refs(refs);

        builder.upsert_role_node(role_node(id, bundle, aggregation, refs.clone()));
        reached.matched_roles += 1;

        for binding in bindings {
            let binding_id = binding.id();
            builder.add_node(binding_node(binding, binding_id.clone()));
            builder.add_edge(id, &binding_id, EdgeKind::Grants, EXPLAIN_GRANTS, refs.clone());

            for subject in &binding.subjects {
                let namespace = subject.effective_namespace(binding);
                let subject_id = subject_node_id(subject, namespace);
                builder.add_node(GraphNode::new(
                    subject_id.clone(),
                    &subject.name,
                    namespace,
                    NodeKind::Subject {
                        subject_kind: subject.kind,
                    },
                ));
                builder.add_edge(
                    &binding_id,
                    &subject_id,
                    EdgeKind::Subjects,
                    EXPLAIN_SUBJECTS,
                    Vec::new(),
                );

                if subject.is_service_account() && filter.allows_runtime_subject(subject, binding)
                {
                    service_accounts.insert(ServiceAccountRef {
                        namespace: namespace.unwrap_or_default().to_string(),
                        name: subject.name.clone(),
                        node_id: subject_id.clone(),
                    });
                }
                subjects_seen.insert(subject_id);
            }
            bindings_seen.insert(binding_id);
        }

        let sources = aggregation.sources(id);
        for source_id in sources {
            let Some(source) = index.bundles.get(source_id) else {
                continue;
            };
            builder.upsert_role_node(role_node(source_id, source, aggregation, Vec::new()));
            builder.add_edge(source_id, id, EdgeKind::Aggregates, EXPLAIN_AGGREGATES, Vec::new());
        }

        // Sources that are aggregation targets themselves show up as their
        // own relation; only leaf sources feed this one.
        let leaves: Vec<&String> = if request.include_aggregates {
            sources
                .iter()
                .filter(|source| !aggregation.is_aggregated(source))
                .collect()
        } else {
            Vec::new()
        };
        if !leaves.is_empty() {
            let relation_id = aggregation_node_id(id);
            builder.add_node(GraphNode::new(
                relation_id.clone(),
                &format!("aggregate -> {}", bundle.name),
                None,
                NodeKind::AggregationRelation {
                    target: id.to_string(),
                    source_count: leaves.len(),
                },
            ));
            for source_id in leaves {
                builder.add_edge(
                    source_id,
                    &relation_id,
                    EdgeKind::Aggregates,
                    EXPLAIN_AGGREGATES,
                    Vec::new(),
                );
            }
            builder.add_edge(
                &relation_id,
                id,
                EdgeKind::Aggregates,
                EXPLAIN_AGGREGATION_TARGET,
                Vec::new(),
            );
        }

        if request.include_permissions {
            for rule_ref in &refs {
                let node = permission_node(rule_ref);
                let permission_id = node.id.clone();
                builder.add_node(node);
                builder.add_edge(
                    id,
                    &permission_id,
                    EdgeKind::Permits,
                    EXPLAIN_PERMITS,
                    Vec::new(),
                );
            }
        }
    }

    reached.matched_bindings = bindings_seen.len();
    reached.matched_subjects = subjects_seen.len();
    reached.service_accounts = service_accounts.into_iter().collect();
    tracing::debug!(
        roles = reached.matched_roles,
        bindings = reached.matched_bindings,
        subjects = reached.matched_subjects,
        "built reachability graph"
    );
    reached
}
