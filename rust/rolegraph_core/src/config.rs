//! Query request configuration and JSON parsing helpers.
//!
//! A `QueryRequest` is the only knob the engine has: there is no ambient or
//! global configuration. Defaults follow the public API: `matchMode=any`,
//! `wildcardMode=expand`, `podPhaseMode=active`, 20 pods per subject and 10
//! workloads per pod.

use serde::{Deserialize, Serialize};

use crate::discovery::DiscoveryCatalog;
use crate::error::{QueryError, Result};
use crate::types::{CatalogSnapshot, WILDCARD};

pub const DEFAULT_MAX_PODS_PER_SUBJECT: usize = 20;
pub const DEFAULT_MAX_WORKLOADS_PER_POD: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchMode {
    #[default]
    Any,
    All,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WildcardMode {
    #[default]
    Expand,
    #[serde(alias = "exact")]
    Literal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PodPhaseMode {
    /// Pending or Running.
    #[default]
    Active,
    All,
    Running,
}

/// Each field is a set; an empty set leaves that dimension unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Selector {
    pub api_groups: Vec<String>,
    pub resources: Vec<String>,
    pub verbs: Vec<String>,
    pub resource_names: Vec<String>,
    #[serde(rename = "nonResourceURLs")]
    pub non_resource_urls: Vec<String>,
}

impl Selector {
    fn validate(&self) -> Result<()> {
        let non_blank = [
            ("resources", &self.resources),
            ("verbs", &self.verbs),
            ("resourceNames", &self.resource_names),
            ("nonResourceURLs", &self.non_resource_urls),
        ];
        for (field, values) in non_blank {
            if values.iter().any(|v| v.trim().is_empty()) {
                return Err(QueryError::InvalidRequest(format!(
                    "selector.{} contains an empty value",
                    field
                )));
            }
        }
        for resource in &self.resources {
            if resource.matches('/').count() > 1 {
                return Err(QueryError::InvalidRequest(format!(
                    "selector.resources value {:?} has more than one '/'",
                    resource
                )));
            }
        }
        for url in &self.non_resource_urls {
            let url = url.trim();
            if url != WILDCARD && !url.starts_with('/') {
                return Err(QueryError::InvalidRequest(format!(
                    "selector.nonResourceURLs value {:?} must start with '/'",
                    url
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NamespaceScope {
    pub namespaces: Vec<String>,
    pub strict: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryRequest {
    pub selector: Selector,
    pub match_mode: MatchMode,
    pub wildcard_mode: WildcardMode,
    pub include_rule_metadata: bool,
    pub include_pods: bool,
    pub include_workloads: bool,
    #[serde(rename = "filterPhantomAPIs")]
    pub filter_phantom_apis: bool,
    pub pod_phase_mode: PodPhaseMode,
    pub max_pods_per_subject: usize,
    pub max_workloads_per_pod: usize,
    pub namespace_scope: Option<NamespaceScope>,
    /// Emit derived aggregation-relation nodes.
    pub include_aggregates: bool,
    /// Emit derived permission nodes.
    pub include_permissions: bool,
    pub include_resource_map: bool,
}

impl Default for QueryRequest {
    fn default() -> Self {
        Self {
            selector: Selector::default(),
            match_mode: MatchMode::default(),
            wildcard_mode: WildcardMode::default(),
            include_rule_metadata: false,
            include_pods: false,
            include_workloads: false,
            filter_phantom_apis: false,
            pod_phase_mode: PodPhaseMode::default(),
            max_pods_per_subject: DEFAULT_MAX_PODS_PER_SUBJECT,
            max_workloads_per_pod: DEFAULT_MAX_WORKLOADS_PER_POD,
            namespace_scope: None,
            include_aggregates: false,
            include_permissions: false,
            include_resource_map: false,
        }
    }
}

impl QueryRequest {
    /// Reject malformed input before any resolution runs.
    pub fn validate(&self) -> Result<()> {
        if self.max_pods_per_subject == 0 {
            return Err(QueryError::InvalidRequest(
                "maxPodsPerSubject must be greater than 0".to_string(),
            ));
        }
        if self.max_workloads_per_pod == 0 {
            return Err(QueryError::InvalidRequest(
                "maxWorkloadsPerPod must be greater than 0".to_string(),
            ));
        }
        self.selector.validate()
    }

    /// Workloads hang off pods, so asking for one implies the other.
    /// Returns the warning to surface when the flag had to be flipped.
    pub(crate) fn normalize_runtime_flags(&mut self) -> Option<String> {
        if self.include_workloads && !self.include_pods {
            self.include_pods = true;
            return Some(
                "includeWorkloads=true requires includePods=true; includePods was enabled automatically"
                    .to_string(),
            );
        }
        None
    }
}

/// Parse and validate a query request from JSON.
pub fn parse_request(json: &str) -> Result<QueryRequest> {
    let request: QueryRequest = serde_json::from_str(json)?;
    request.validate()?;
    Ok(request)
}

/// Parse a catalog snapshot from JSON.
pub fn parse_catalog(json: &str) -> Result<CatalogSnapshot> {
    Ok(serde_json::from_str(json)?)
}

/// Parse an API discovery catalog from JSON.
pub fn parse_discovery(json: &str) -> Result<DiscoveryCatalog> {
    Ok(serde_json::from_str(json)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_applies_defaults() {
        let request = parse_request(r#"{"selector":{"resources":["pods"]}}"#).unwrap();
        assert_eq!(request.match_mode, MatchMode::Any);
        assert_eq!(request.wildcard_mode, WildcardMode::Expand);
        assert_eq!(request.pod_phase_mode, PodPhaseMode::Active);
        assert_eq!(request.max_pods_per_subject, DEFAULT_MAX_PODS_PER_SUBJECT);
        assert_eq!(request.max_workloads_per_pod, DEFAULT_MAX_WORKLOADS_PER_POD);
        assert!(request.namespace_scope.is_none());
    }

    #[test]
    fn parse_accepts_exact_as_literal() {
        let request = parse_request(r#"{"wildcardMode":"exact"}"#).unwrap();
        assert_eq!(request.wildcard_mode, WildcardMode::Literal);
    }

    #[test]
    fn unknown_enum_value_is_client_error() {
        let err = parse_request(r#"{"matchMode":"most"}"#).unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn negative_cap_is_client_error() {
        let err = parse_request(r#"{"maxPodsPerSubject":-1}"#).unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn zero_cap_rejected() {
        let err = parse_request(r#"{"maxWorkloadsPerPod":0}"#).unwrap_err();
        assert!(matches!(err, QueryError::InvalidRequest(_)));
    }

    #[test]
    fn malformed_selector_rejected() {
        for json in [
            r#"{"selector":{"verbs":[" "]}}"#,
            r#"{"selector":{"resources":["a/b/c"]}}"#,
            r#"{"selector":{"nonResourceURLs":["healthz"]}}"#,
        ] {
            let err = parse_request(json).unwrap_err();
            assert!(matches!(err, QueryError::InvalidRequest(_)), "{}", json);
        }
    }

    #[test]
    fn core_group_is_a_valid_selector_value() {
        let request = parse_request(r#"{"selector":{"apiGroups":[""]}}"#).unwrap();
        assert_eq!(request.selector.api_groups, vec![String::new()]);
    }

    #[test]
    fn workloads_imply_pods() {
        let mut request = QueryRequest {
            include_workloads: true,
            ..QueryRequest::default()
        };
        assert!(request.normalize_runtime_flags().is_some());
        assert!(request.include_pods);
        assert!(request.normalize_runtime_flags().is_none());
    }

    #[test]
    fn parse_catalog_reads_runtime_objects() {
        let catalog = parse_catalog(
            r#"{
            "bundles":[{"kind":"Role","name":"reader","namespace":"ns1",
                "rules":[{"apiGroups":[""],"resources":["pods"],"verbs":["get"]}]}],
            "pods":[{"uid":"p-1","namespace":"ns1","name":"web-0","phase":"Running",
                "ownerReferences":[{"uid":"rs-1","kind":"ReplicaSet","name":"web","controller":true}]}],
            "workloads":[{"id":"rs-1","kind":"ReplicaSet","namespace":"ns1","name":"web"}]
        }"#,
        )
        .unwrap();
        assert_eq!(catalog.bundles[0].id(), "role:ns1/reader");
        assert!(catalog.bindings.is_empty());
        assert_eq!(catalog.pods[0].effective_service_account(), "default");
        assert_eq!(catalog.pods[0].owner_references[0].uid, "rs-1");
        assert_eq!(catalog.workloads[0].uid, "rs-1");

        let err = parse_catalog(r#"{"bundles":[{"kind":"Role"}]}"#).unwrap_err();
        assert!(matches!(err, QueryError::Json(_)));
    }

    #[test]
    fn parse_discovery_normalizes_entries() {
        let discovery = parse_discovery(
            r#"{"resources":[{"group":"Apps","resource":"Deployments","verbs":["GET","list"]}],
            "nonResourceURLs":["/healthz"]}"#,
        )
        .unwrap();
        assert!(discovery.has_resource("apps", "deployments"));
        assert_eq!(
            discovery.verbs_for("apps", "deployments"),
            Some(&["get".to_string(), "list".to_string()][..])
        );
        assert!(discovery.has_non_resource_url("/healthz"));

        let err = parse_discovery(r#"{"resources":"nope"}"#).unwrap_err();
        assert!(err.is_client_error());
    }
}
