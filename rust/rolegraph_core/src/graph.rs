//! Result graph — tagged node and edge kinds plus a de-duplicating builder.
//!
//! Node ids are stable strings so repeated queries against an unchanged
//! catalog produce identical graphs:
//!
//! - bundles: their bundle id (`clusterrole:view`, `role:ns/edit`)
//! - bindings: `clusterrolebinding:<name>`, `rolebinding:<ns>/<name>`
//! - subjects: `subject:<kind>:<name>`, `subject:serviceAccount:<ns>/<name>`
//! - pods / workloads: `pod:<ns>/<name>`, `workload:<kind>:<ns>/<name>`
//! - overflow: `overflow:pod:<subject id>`, `overflow:workload:<pod id>`
//! - derived: `permission:<group>|<resource>|<verb>`, `aggregation:<target>`

use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{QueryError, Result};
use crate::rules::{dedupe_rule_refs, RuleRef};
use crate::types::{PodPhase, Subject, SubjectKind};

fn is_false(value: &bool) -> bool {
    !*value
}

/// Column hint for the presentation layer, in left-to-right order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Lane {
    Permissions,
    Aggregation,
    Roles,
    Bindings,
    Subjects,
    Pods,
    Workloads,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleDetails {
    #[serde(default, skip_serializing_if = "is_false")]
    pub aggregated: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aggregation_sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched_rule_refs: Vec<RuleRef>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionDetails {
    pub api_group: String,
    pub resource: String,
    pub verb: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub non_resource: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub phantom: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NodeKind {
    Role(RoleDetails),
    ClusterRole(RoleDetails),
    RoleBinding,
    ClusterRoleBinding,
    #[serde(rename_all = "camelCase")]
    Subject { subject_kind: SubjectKind },
    Pod { phase: PodPhase },
    #[serde(rename_all = "camelCase")]
    PodOverflow { hidden_count: usize },
    #[serde(rename_all = "camelCase")]
    Workload { workload_kind: String },
    #[serde(rename_all = "camelCase")]
    WorkloadOverflow { hidden_count: usize },
    Permission(PermissionDetails),
    #[serde(rename_all = "camelCase")]
    AggregationRelation { target: String, source_count: usize },
}

impl NodeKind {
    pub fn lane(&self) -> Lane {
        match self {
            NodeKind::Permission(_) => Lane::Permissions,
            NodeKind::AggregationRelation { .. } => Lane::Aggregation,
            NodeKind::Role(_) | NodeKind::ClusterRole(_) => Lane::Roles,
            NodeKind::RoleBinding | NodeKind::ClusterRoleBinding => Lane::Bindings,
            NodeKind::Subject { .. } => Lane::Subjects,
            NodeKind::Pod { .. } | NodeKind::PodOverflow { .. } => Lane::Pods,
            NodeKind::Workload { .. } | NodeKind::WorkloadOverflow { .. } => Lane::Workloads,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub lane: Lane,
    #[serde(flatten)]
    pub kind: NodeKind,
}

impl GraphNode {
    pub fn new(id: String, name: &str, namespace: Option<&str>, kind: NodeKind) -> Self {
        Self {
            id,
            name: name.to_string(),
            namespace: namespace.map(str::to_string),
            lane: kind.lane(),
            kind,
        }
    }

    pub fn role_details(&self) -> Option<&RoleDetails> {
        match &self.kind {
            NodeKind::Role(details) | NodeKind::ClusterRole(details) => Some(details),
            _ => None,
        }
    }

    fn role_details_mut(&mut self) -> Option<&mut RoleDetails> {
        match &mut self.kind {
            NodeKind::Role(details) | NodeKind::ClusterRole(details) => Some(details),
            _ => None,
        }
    }

    pub fn hidden_count(&self) -> Option<usize> {
        match self.kind {
            NodeKind::PodOverflow { hidden_count }
            | NodeKind::WorkloadOverflow { hidden_count } => Some(hidden_count),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EdgeKind {
    /// bundle -> binding
    Grants,
    /// binding -> subject
    Subjects,
    /// aggregation source -> target (or via a derived relation node)
    Aggregates,
    /// subject -> pod
    RunsAs,
    /// pod/workload -> owning workload
    OwnedBy,
    /// bundle -> derived permission
    Permits,
}

impl EdgeKind {
    fn as_str(self) -> &'static str {
        match self {
            EdgeKind::Grants => "grants",
            EdgeKind::Subjects => "subjects",
            EdgeKind::Aggregates => "aggregates",
            EdgeKind::RunsAs => "runsAs",
            EdgeKind::OwnedBy => "ownedBy",
            EdgeKind::Permits => "permits",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub kind: EdgeKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rule_refs: Vec<RuleRef>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub explain: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl Graph {
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn nodes_in(&self, lane: Lane) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter().filter(move |n| n.lane == lane)
    }

    pub fn edges_of(&self, kind: EdgeKind) -> impl Iterator<Item = &GraphEdge> {
        self.edges.iter().filter(move |e| e.kind == kind)
    }

    /// Check the structural invariants: unique node ids, every edge endpoint
    /// resolves.
    pub fn validate(&self) -> Result<()> {
        let mut ids = AHashSet::with_capacity(self.nodes.len());
        for node in &self.nodes {
            if !ids.insert(node.id.as_str()) {
                return Err(QueryError::Internal(format!(
                    "duplicate node id {}",
                    node.id
                )));
            }
        }
        for edge in &self.edges {
            for endpoint in [&edge.from, &edge.to] {
                if !ids.contains(endpoint.as_str()) {
                    return Err(QueryError::Internal(format!(
                        "edge {} references missing node {}",
                        edge.id, endpoint
                    )));
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Node / edge ids
// ============================================================================

pub fn subject_node_id(subject: &Subject, namespace: Option<&str>) -> String {
    match (subject.kind, namespace) {
        (SubjectKind::ServiceAccount, Some(ns)) => {
            format!("subject:serviceAccount:{}/{}", ns, subject.name)
        }
        (SubjectKind::ServiceAccount, None) => format!("subject:serviceAccount:{}", subject.name),
        (SubjectKind::Group, _) => format!("subject:group:{}", subject.name),
        (SubjectKind::User, _) => format!("subject:user:{}", subject.name),
    }
}

pub fn pod_node_id(namespace: &str, name: &str) -> String {
    format!("pod:{}/{}", namespace, name)
}

pub fn workload_node_id(kind: &str, namespace: &str, name: &str) -> String {
    format!("workload:{}:{}/{}", kind.to_lowercase(), namespace, name)
}

pub fn pod_overflow_node_id(subject_node_id: &str) -> String {
    format!("overflow:pod:{}", subject_node_id)
}

pub fn workload_overflow_node_id(pod_node_id: &str) -> String {
    format!("overflow:workload:{}", pod_node_id)
}

pub fn permission_node_id(api_group: &str, resource: &str, verb: &str) -> String {
    format!("permission:{}|{}|{}", api_group, resource, verb)
}

pub fn aggregation_node_id(target_node_id: &str) -> String {
    format!("aggregation:{}", target_node_id)
}

pub fn edge_id(from: &str, to: &str, kind: EdgeKind) -> String {
    format!("edge:{}->{}:{}", from, to, kind.as_str())
}

// ============================================================================
// Builder
// ============================================================================

/// Accumulates nodes and edges, de-duplicating both by id.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: Vec<GraphNode>,
    node_index: AHashMap<String, usize>,
    edges: Vec<GraphEdge>,
    edge_seen: AHashSet<String>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.node_index.get(id).map(|&idx| &self.nodes[idx])
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    /// Insert a node unless one with the same id exists. Returns whether it
    /// was inserted.
    pub fn add_node(&mut self, node: GraphNode) -> bool {
        if self.node_index.contains_key(&node.id) {
            return false;
        }
        self.node_index.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
        true
    }

    /// Insert a role node, or merge aggregation sources and matched refs
    /// into the existing one.
    pub fn upsert_role_node(&mut self, node: GraphNode) {
        let Some(&idx) = self.node_index.get(&node.id) else {
            self.add_node(node);
            return;
        };
        let (Some(existing), Some(incoming)) =
            (self.nodes[idx].role_details_mut(), node.role_details())
        else {
            return;
        };
        existing.aggregated |= incoming.aggregated;
        if !incoming.aggregation_sources.is_empty() {
            existing
                .aggregation_sources
                .extend(incoming.aggregation_sources.iter().cloned());
            existing.aggregation_sources.sort();
            existing.aggregation_sources.dedup();
        }
        if !incoming.matched_rule_refs.is_empty() {
            let mut merged = std::mem::take(&mut existing.matched_rule_refs);
            merged.extend(incoming.matched_rule_refs.iter().cloned());
            existing.matched_rule_refs = dedupe_rule_refs(merged);
        }
    }

    /// Append an edge unless one with the same id exists.
    pub fn add_edge(
        &mut self,
        from: &str,
        to: &str,
        kind: EdgeKind,
        explain: &str,
        rule_refs: Vec<RuleRef>,
    ) -> bool {
        let id = edge_id(from, to, kind);
        if !self.edge_seen.insert(id.clone()) {
            return false;
        }
        self.edges.push(GraphEdge {
            id,
            from: from.to_string(),
            to: to.to_string(),
            kind,
            rule_refs,
            explain: explain.to_string(),
        });
        true
    }

    /// Sort into presentation order: nodes by lane, case-insensitive name,
    /// then id; edges by kind, endpoints, then id.
    pub fn finish(self) -> Graph {
        let mut nodes = self.nodes;
        let mut edges = self.edges;
        nodes.sort_by_cached_key(|n| (n.lane, n.name.to_lowercase(), n.id.clone()));
        edges.sort_by(|a, b| {
            (a.kind, &a.from, &a.to, &a.id).cmp(&(b.kind, &b.from, &b.to, &b.id))
        });
        Graph { nodes, edges }
    }
}
