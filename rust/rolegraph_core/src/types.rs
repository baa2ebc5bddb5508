//! Catalog types shared across rolegraph_core modules.
//!
//! Everything here is a plain snapshot record: the engine reads a
//! `CatalogSnapshot` per query and never mutates it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Wildcard token used by policy rules for group, resource and verb.
pub const WILDCARD: &str = "*";

/// Service account assumed when a pod does not name one.
pub const DEFAULT_SERVICE_ACCOUNT: &str = "default";

/// Bundle identifier: `clusterrole:<name>` or `role:<namespace>/<name>`.
pub type BundleId = String;

/// Returns the namespace when it is set and not blank.
pub fn non_empty(namespace: &Option<String>) -> Option<&str> {
    namespace
        .as_deref()
        .map(str::trim)
        .filter(|ns| !ns.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BundleKind {
    Role,
    ClusterRole,
}

impl BundleKind {
    fn id_prefix(self) -> &'static str {
        match self {
            BundleKind::Role => "role",
            BundleKind::ClusterRole => "clusterrole",
        }
    }
}

/// Build a bundle id from its kind, namespace and name.
pub fn bundle_id(kind: BundleKind, namespace: Option<&str>, name: &str) -> BundleId {
    match namespace {
        Some(ns) if kind == BundleKind::Role => format!("{}:{}/{}", kind.id_prefix(), ns, name),
        _ => format!("{}:{}", kind.id_prefix(), name),
    }
}

/// One raw policy rule as stored on a Role or ClusterRole.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicyRule {
    pub api_groups: Vec<String>,
    pub resources: Vec<String>,
    pub verbs: Vec<String>,
    pub resource_names: Vec<String>,
    #[serde(rename = "nonResourceURLs")]
    pub non_resource_urls: Vec<String>,
}

impl PolicyRule {
    pub fn is_non_resource(&self) -> bool {
        self.resources.is_empty() && !self.non_resource_urls.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelSelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelectorRequirement {
    pub key: String,
    pub operator: LabelSelectorOperator,
    #[serde(default)]
    pub values: Vec<String>,
}

/// Kubernetes-style label selector. All `match_labels` and every expression
/// must hold; an empty selector matches every label set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LabelSelector {
    pub match_labels: BTreeMap<String, String>,
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AggregationRule {
    pub cluster_role_selectors: Vec<LabelSelector>,
}

/// A Role or ClusterRole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub kind: BundleKind,
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
    #[serde(default)]
    pub aggregation_rule: Option<AggregationRule>,
}

impl Bundle {
    pub fn id(&self) -> BundleId {
        bundle_id(self.kind, non_empty(&self.namespace), &self.name)
    }

    pub fn is_cluster_scoped(&self) -> bool {
        self.kind == BundleKind::ClusterRole
    }

    pub fn has_aggregation_rule(&self) -> bool {
        self.is_cluster_scoped()
            && self
                .aggregation_rule
                .as_ref()
                .is_some_and(|rule| !rule.cluster_role_selectors.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BindingKind {
    RoleBinding,
    ClusterRoleBinding,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleRef {
    pub kind: BundleKind,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SubjectKind {
    User,
    Group,
    ServiceAccount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub kind: SubjectKind,
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

impl Subject {
    pub fn is_service_account(&self) -> bool {
        self.kind == SubjectKind::ServiceAccount
    }

    /// Namespace of a service-account subject, falling back to the binding's
    /// own namespace. Users and groups are cluster-wide.
    pub fn effective_namespace<'a>(&'a self, binding: &'a Binding) -> Option<&'a str> {
        if !self.is_service_account() {
            return None;
        }
        non_empty(&self.namespace).or_else(|| binding.scope_namespace())
    }
}

/// A RoleBinding or ClusterRoleBinding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    pub kind: BindingKind,
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    pub role_ref: RoleRef,
    #[serde(default)]
    pub subjects: Vec<Subject>,
}

impl Binding {
    pub fn id(&self) -> String {
        match (self.kind, non_empty(&self.namespace)) {
            (BindingKind::RoleBinding, Some(ns)) => format!("rolebinding:{}/{}", ns, self.name),
            (BindingKind::RoleBinding, None) => format!("rolebinding:{}", self.name),
            (BindingKind::ClusterRoleBinding, _) => format!("clusterrolebinding:{}", self.name),
        }
    }

    pub fn is_cluster_scoped(&self) -> bool {
        self.kind == BindingKind::ClusterRoleBinding
    }

    /// Namespace the binding lives in; always `None` for cluster bindings.
    pub fn scope_namespace(&self) -> Option<&str> {
        if self.is_cluster_scoped() {
            None
        } else {
            non_empty(&self.namespace)
        }
    }

    /// Id of the bundle this binding grants, or `None` when the reference
    /// cannot be valid (a cluster binding pointing at a namespaced Role, or
    /// a RoleBinding without a namespace referencing a Role).
    pub fn bundle_ref(&self) -> Option<BundleId> {
        match self.role_ref.kind {
            BundleKind::ClusterRole => Some(bundle_id(
                BundleKind::ClusterRole,
                None,
                &self.role_ref.name,
            )),
            BundleKind::Role => self
                .scope_namespace()
                .map(|ns| bundle_id(BundleKind::Role, Some(ns), &self.role_ref.name)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    #[serde(default)]
    pub uid: String,
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub controller: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    #[serde(alias = "id")]
    pub uid: String,
    pub namespace: String,
    pub name: String,
    pub phase: PodPhase,
    #[serde(default)]
    pub service_account_name: String,
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
}

impl Pod {
    pub fn effective_service_account(&self) -> &str {
        let name = self.service_account_name.trim();
        if name.is_empty() {
            DEFAULT_SERVICE_ACCOUNT
        } else {
            name
        }
    }
}

/// Any owning controller object: ReplicaSet, Deployment, Job, CronJob, ...
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workload {
    #[serde(alias = "id")]
    pub uid: String,
    #[serde(default)]
    pub api_version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
}

/// Everything the engine reads for one query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CatalogSnapshot {
    pub bundles: Vec<Bundle>,
    pub bindings: Vec<Binding>,
    pub pods: Vec<Pod>,
    pub workloads: Vec<Workload>,
}
