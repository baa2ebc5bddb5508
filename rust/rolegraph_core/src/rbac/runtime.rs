//! Runtime correlator: service-account subjects → pods → owning workloads.

use ahash::AHashSet;

use crate::config::{PodPhaseMode, QueryRequest};
use crate::graph::{
    pod_node_id, pod_overflow_node_id, workload_node_id, workload_overflow_node_id, EdgeKind,
    GraphBuilder, GraphNode, NodeKind,
};
use crate::types::{OwnerReference, Pod, PodPhase, Workload};

use super::reachability::ServiceAccountRef;
use super::scope::NamespaceFilter;
use super::{CatalogIndex, Diagnostics};

/// Owner references followed per pod before the chain is cut.
pub const MAX_OWNER_DEPTH: usize = 8;

const EXPLAIN_RUNS_AS: &str = "ServiceAccount used by pod";
const EXPLAIN_OWNED_BY: &str = "Owner reference chain";
const EXPLAIN_PODS_TRUNCATED: &str = "Pod list truncated by limit";
const EXPLAIN_WORKLOADS_TRUNCATED: &str = "Workload chain truncated by limit";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeCounts {
    pub matched_pods: usize,
    pub matched_workloads: usize,
}

pub fn phase_matches(phase: PodPhase, mode: PodPhaseMode) -> bool {
    match mode {
        PodPhaseMode::All => true,
        PodPhaseMode::Active => matches!(phase, PodPhase::Pending | PodPhase::Running),
        PodPhaseMode::Running => phase == PodPhase::Running,
    }
}

fn owner_sort_key(owner: &OwnerReference) -> String {
    format!(
        "{}|{}|{}|{}",
        owner.api_version.to_lowercase(),
        owner.kind.to_lowercase(),
        owner.name.to_lowercase(),
        owner.uid
    )
}

/// The owner to follow: the controller reference if any, otherwise the
/// lowest by (apiVersion, kind, name, uid).
pub fn choose_owner(owners: &[OwnerReference]) -> Option<&OwnerReference> {
    owners
        .iter()
        .min_by_key(|owner| (!owner.controller, owner_sort_key(owner)))
}

/// Follow owner references upward from a pod. Stops at a missing owner, an
/// owner without uid, a cycle, or `MAX_OWNER_DEPTH`, warning in each case.
pub(crate) fn resolve_owner_chain<'a>(
    index: &CatalogIndex<'a>,
    pod: &Pod,
    diagnostics: &mut Diagnostics,
) -> Vec<&'a Workload> {
    let Some(mut owner) = choose_owner(&pod.owner_references) else {
        diagnostics.warn(format!(
            "pod {}/{} has no owner reference; workload chain cannot be expanded",
            pod.namespace, pod.name
        ));
        return Vec::new();
    };

    let mut chain: Vec<&'a Workload> = Vec::new();
    let mut seen: AHashSet<&str> = AHashSet::new();
    loop {
        if chain.len() == MAX_OWNER_DEPTH {
            diagnostics.warn(format!(
                "pod {}/{} owner chain was truncated at depth {}",
                pod.namespace, pod.name, MAX_OWNER_DEPTH
            ));
            return chain;
        }
        if owner.uid.is_empty() {
            diagnostics.warn(format!(
                "pod {}/{} owner reference {}/{} has empty UID",
                pod.namespace, pod.name, owner.kind, owner.name
            ));
            return chain;
        }
        if !seen.insert(owner.uid.as_str()) {
            diagnostics.warn(format!(
                "pod {}/{} owner chain has cycle at UID {}",
                pod.namespace, pod.name, owner.uid
            ));
            return chain;
        }
        let Some(&workload) = index.workloads_by_uid.get(owner.uid.as_str()) else {
            diagnostics.warn(format!(
                "pod {}/{} owner {}/{} ({}) not found in workload catalog",
                pod.namespace, pod.name, owner.kind, owner.name, owner.uid
            ));
            return chain;
        };
        chain.push(workload);
        match choose_owner(&workload.owner_references) {
            Some(next) => owner = next,
            None => return chain,
        }
    }
}

/// Attach pods (and optionally workloads) to every reached service account.
pub(crate) fn correlate(
    builder: &mut GraphBuilder,
    index: &CatalogIndex<'_>,
    service_accounts: &[ServiceAccountRef],
    filter: &NamespaceFilter,
    request: &QueryRequest,
    diagnostics: &mut Diagnostics,
) -> RuntimeCounts {
    let mut pods_seen: AHashSet<String> = AHashSet::new();
    let mut workloads_seen: AHashSet<String> = AHashSet::new();

    for account in service_accounts {
        if account.namespace.is_empty() {
            diagnostics.warn(format!(
                "subject {} has empty namespace and was skipped for runtime expansion",
                account.node_id
            ));
            continue;
        }
        if !filter.allows_namespace(&account.namespace) {
            continue;
        }

        let pods: Vec<&Pod> = index
            .pods_for(&account.namespace, &account.name)
            .iter()
            .copied()
            .filter(|pod| phase_matches(pod.phase, request.pod_phase_mode))
            .collect();
        let visible = pods.len().min(request.max_pods_per_subject);

        for pod in &pods[..visible] {
            let pod_id = pod_node_id(&pod.namespace, &pod.name);
            if builder.add_node(GraphNode::new(
                pod_id.clone(),
                &pod.name,
                Some(pod.namespace.as_str()),
                NodeKind::Pod { phase: pod.phase },
            )) {
                pods_seen.insert(pod_id.clone());
            }
            builder.add_edge(
                &account.node_id,
                &pod_id,
                EdgeKind::RunsAs,
                EXPLAIN_RUNS_AS,
                Vec::new(),
            );

            if request.include_workloads {
                attach_workloads(
                    builder,
                    index,
                    pod,
                    &pod_id,
                    request.max_workloads_per_pod,
                    &mut workloads_seen,
                    diagnostics,
                );
            }
        }

        let hidden = pods.len() - visible;
        if hidden > 0 {
            let overflow_id = pod_overflow_node_id(&account.node_id);
            builder.add_node(GraphNode::new(
                overflow_id.clone(),
                &format!("+{} pods", hidden),
                Some(account.namespace.as_str()),
                NodeKind::PodOverflow {
                    hidden_count: hidden,
                },
            ));
            builder.add_edge(
                &account.node_id,
                &overflow_id,
                EdgeKind::RunsAs,
                EXPLAIN_PODS_TRUNCATED,
                Vec::new(),
            );
        }
    }

    tracing::debug!(
        service_accounts = service_accounts.len(),
        pods = pods_seen.len(),
        workloads = workloads_seen.len(),
        "correlated runtime objects"
    );
    RuntimeCounts {
        matched_pods: pods_seen.len(),
        matched_workloads: workloads_seen.len(),
    }
}

fn attach_workloads(
    builder: &mut GraphBuilder,
    index: &CatalogIndex<'_>,
    pod: &Pod,
    pod_id: &str,
    max_workloads: usize,
    workloads_seen: &mut AHashSet<String>,
    diagnostics: &mut Diagnostics,
) {
    let chain = resolve_owner_chain(index, pod, diagnostics);
    let visible = chain.len().min(max_workloads);

    let mut parent_id = pod_id.to_string();
    for workload in &chain[..visible] {
        let workload_id = workload_node_id(&workload.kind, &workload.namespace, &workload.name);
        if builder.add_node(GraphNode::new(
            workload_id.clone(),
            &workload.name,
            Some(workload.namespace.as_str()),
            NodeKind::Workload {
                workload_kind: workload.kind.clone(),
            },
        )) {
            workloads_seen.insert(workload_id.clone());
        }
        builder.add_edge(
            &parent_id,
            &workload_id,
            EdgeKind::OwnedBy,
            EXPLAIN_OWNED_BY,
            Vec::new(),
        );
        parent_id = workload_id;
    }

    let hidden = chain.len() - visible;
    if hidden > 0 {
        let overflow_id = workload_overflow_node_id(pod_id);
        builder.add_node(GraphNode::new(
            overflow_id.clone(),
            &format!("+{} workloads", hidden),
            Some(pod.namespace.as_str()),
            NodeKind::WorkloadOverflow {
                hidden_count: hidden,
            },
        ));
        builder.add_edge(
            &parent_id,
            &overflow_id,
            EdgeKind::OwnedBy,
            EXPLAIN_WORKLOADS_TRUNCATED,
            Vec::new(),
        );
    }
}
