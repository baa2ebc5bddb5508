//! Namespace scope filter.

use std::collections::BTreeSet;

use crate::config::NamespaceScope;
use crate::types::{non_empty, Binding, Bundle, Subject};

/// Restricts which bundles, bindings and runtime objects take part in a
/// query. An unset scope, or one naming no namespaces, filters nothing.
#[derive(Debug, Clone, Default)]
pub struct NamespaceFilter {
    namespaces: Option<BTreeSet<String>>,
    strict: bool,
}

impl NamespaceFilter {
    pub fn new(scope: Option<&NamespaceScope>) -> Self {
        let Some(scope) = scope else {
            return Self::default();
        };
        let namespaces: BTreeSet<String> = scope
            .namespaces
            .iter()
            .map(|ns| ns.trim())
            .filter(|ns| !ns.is_empty())
            .map(str::to_string)
            .collect();
        Self {
            namespaces: (!namespaces.is_empty()).then_some(namespaces),
            strict: scope.strict,
        }
    }

    pub fn is_active(&self) -> bool {
        self.namespaces.is_some()
    }

    pub fn is_strict(&self) -> bool {
        self.is_active() && self.strict
    }

    pub fn allows_namespace(&self, namespace: &str) -> bool {
        match &self.namespaces {
            Some(set) => set.contains(namespace.trim()),
            None => true,
        }
    }

    /// Cluster bundles always pass here; strict mode prunes them later by
    /// their surviving bindings.
    pub fn allows_bundle(&self, bundle: &Bundle) -> bool {
        if bundle.is_cluster_scoped() {
            return true;
        }
        match non_empty(&bundle.namespace) {
            Some(ns) => self.allows_namespace(ns),
            None => !self.is_active(),
        }
    }

    pub fn allows_binding(&self, binding: &Binding) -> bool {
        if !self.is_active() {
            return true;
        }
        if !binding.is_cluster_scoped() {
            return binding
                .scope_namespace()
                .is_some_and(|ns| self.allows_namespace(ns));
        }
        if !self.strict {
            return true;
        }
        binding.subjects.iter().any(|subject| {
            subject
                .effective_namespace(binding)
                .is_some_and(|ns| self.allows_namespace(ns))
        })
    }

    /// In strict mode a cluster bundle is only shown through bindings that
    /// survived the filter.
    pub fn keeps_cluster_bundle(&self, surviving_bindings: usize) -> bool {
        !self.is_strict() || surviving_bindings > 0
    }

    /// Whether a subject may be correlated with runtime objects.
    pub fn allows_runtime_subject(&self, subject: &Subject, binding: &Binding) -> bool {
        match subject.effective_namespace(binding) {
            Some(ns) => self.allows_namespace(ns),
            None => !subject.is_service_account() || !self.is_active(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BindingKind, BundleKind, RoleRef, SubjectKind};
    use std::collections::BTreeMap;

    fn scope(namespaces: &[&str], strict: bool) -> NamespaceFilter {
        NamespaceFilter::new(Some(&NamespaceScope {
            namespaces: namespaces.iter().map(|s| s.to_string()).collect(),
            strict,
        }))
    }

    fn sa(name: &str, ns: Option<&str>) -> Subject {
        Subject {
            kind: SubjectKind::ServiceAccount,
            name: name.to_string(),
            namespace: ns.map(str::to_string),
        }
    }

    fn binding(kind: BindingKind, ns: Option<&str>, subjects: Vec<Subject>) -> Binding {
        Binding {
            kind,
            name: "b".to_string(),
            namespace: ns.map(str::to_string),
            role_ref: RoleRef {
                kind: BundleKind::ClusterRole,
                name: "view".to_string(),
            },
            subjects,
        }
    }

    fn role(ns: &str) -> Bundle {
        Bundle {
            kind: BundleKind::Role,
            name: "r".to_string(),
            namespace: Some(ns.to_string()),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            rules: Vec::new(),
            aggregation_rule: None,
        }
    }

    #[test]
    fn unset_scope_filters_nothing() {
        for filter in [NamespaceFilter::new(None), scope(&[" "], true)] {
            assert!(!filter.is_active());
            assert!(filter.allows_bundle(&role("anywhere")));
            assert!(filter.allows_binding(&binding(BindingKind::ClusterRoleBinding, None, vec![])));
            assert!(filter.keeps_cluster_bundle(0));
        }
    }

    #[test]
    fn lenient_scope_keeps_cluster_bindings() {
        let filter = scope(&["ns1"], false);
        assert!(filter.allows_bundle(&role("ns1")));
        assert!(!filter.allows_bundle(&role("ns2")));
        assert!(filter.allows_binding(&binding(BindingKind::RoleBinding, Some("ns1"), vec![])));
        assert!(!filter.allows_binding(&binding(BindingKind::RoleBinding, Some("ns2"), vec![])));
        assert!(filter.allows_binding(&binding(BindingKind::ClusterRoleBinding, None, vec![])));
        assert!(filter.keeps_cluster_bundle(0));
    }

    #[test]
    fn strict_scope_needs_a_service_account_in_scope() {
        let filter = scope(&["ns1"], true);
        let group = Subject {
            kind: SubjectKind::Group,
            name: "viewers".to_string(),
            namespace: None,
        };
        assert!(!filter.allows_binding(&binding(
            BindingKind::ClusterRoleBinding,
            None,
            vec![group.clone()]
        )));
        assert!(!filter.allows_binding(&binding(
            BindingKind::ClusterRoleBinding,
            None,
            vec![sa("sa-x", Some("ns2"))]
        )));
        assert!(filter.allows_binding(&binding(
            BindingKind::ClusterRoleBinding,
            None,
            vec![group, sa("sa-x", Some("ns1"))]
        )));
        assert!(!filter.keeps_cluster_bundle(0));
        assert!(filter.keeps_cluster_bundle(1));
    }

    #[test]
    fn runtime_subjects_respect_scope() {
        let filter = scope(&["ns1"], false);
        let rb = binding(BindingKind::RoleBinding, Some("ns1"), vec![sa("sa-x", None)]);
        assert!(filter.allows_runtime_subject(&rb.subjects[0], &rb));
        let crb = binding(BindingKind::ClusterRoleBinding, None, vec![sa("sa-x", Some("ns2"))]);
        assert!(!filter.allows_runtime_subject(&crb.subjects[0], &crb));
    }
}
