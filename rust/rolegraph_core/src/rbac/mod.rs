//! Role graph query engine.
//!
//! Answers "who can do what, and where does it run": given a selector over
//! (apiGroup, resource, verb, resourceName, nonResourceURL), find the roles
//! whose effective rules match, the bindings that grant them, the subjects
//! those bindings target and, optionally, the pods and workloads running as
//! those subjects.
//!
//! The engine is a pure function over a catalog snapshot, an optional
//! discovery catalog and a request. Pipeline:
//! validate → index → aggregation → match → scope → reachability →
//! runtime → resource map → graph check.

pub mod aggregation;
pub mod matcher;
pub mod reachability;
pub mod resource_map;
pub mod runtime;
pub mod scope;


use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::QueryRequest;
use crate::discovery::DiscoveryCatalog;
use crate::error::Result;
use crate::graph::{Graph, GraphBuilder};
use crate::types::{Binding, Bundle, BundleId, CatalogSnapshot, Pod, Workload};

use self::aggregation::AggregationIndex;
use self::matcher::RuleMatcher;
use self::scope::NamespaceFilter;

pub use self::resource_map::ResourceMapRow;

const URL_PREFIX_GAP: &str = "non-resource URL wildcard prefixes are matched literally";
const RUNTIME_SUBJECT_GAP: &str = "runtime chain is currently limited to serviceAccount subjects; \
     user/group subject to workload mapping is not included";

// ============================================================================
// Diagnostics
// ============================================================================

/// Warnings and known gaps, de-duplicated in insertion order.
#[derive(Debug, Default)]
pub(crate) struct Diagnostics {
    warnings: Vec<String>,
    known_gaps: Vec<String>,
    seen: AHashSet<String>,
}

impl Diagnostics {
    pub(crate) fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        if self.seen.insert(format!("w:{}", message)) {
            tracing::warn!(warning = %message, "role graph query");
            self.warnings.push(message);
        }
    }

    pub(crate) fn known_gap(&mut self, message: impl Into<String>) {
        let message = message.into();
        if self.seen.insert(format!("g:{}", message)) {
            tracing::debug!(known_gap = %message, "role graph query");
            self.known_gaps.push(message);
        }
    }
}

// ============================================================================
// Catalog index
// ============================================================================

/// Lookup tables over one catalog snapshot, built once per query.
#[derive(Debug, Default)]
pub struct CatalogIndex<'a> {
    /// bundle id -> bundle; first occurrence wins on duplicate ids
    pub bundles: BTreeMap<BundleId, &'a Bundle>,
    /// bundle id -> bindings that resolve to it, in catalog order
    pub bindings_by_bundle: BTreeMap<BundleId, Vec<&'a Binding>>,
    /// (namespace, service account) -> pods sorted by (namespace, name, uid)
    pub pods_by_service_account: AHashMap<(String, String), Vec<&'a Pod>>,
    pub workloads_by_uid: AHashMap<&'a str, &'a Workload>,
}

impl<'a> CatalogIndex<'a> {
    pub(crate) fn build(catalog: &'a CatalogSnapshot, diagnostics: &mut Diagnostics) -> Self {
        let mut index = CatalogIndex::default();

        for bundle in &catalog.bundles {
            let id = bundle.id();
            if index.bundles.contains_key(&id) {
                diagnostics.warn(format!("duplicate bundle {} ignored", id));
                continue;
            }
            index.bundles.insert(id, bundle);
        }

        for binding in &catalog.bindings {
            let Some(bundle_id) = binding.bundle_ref() else {
                diagnostics.warn(format!(
                    "binding {} references {:?} {} which cannot be resolved from its scope",
                    binding.id(),
                    binding.role_ref.kind,
                    binding.role_ref.name
                ));
                continue;
            };
            if !index.bundles.contains_key(&bundle_id) {
                diagnostics.warn(format!(
                    "binding {} references missing {}",
                    binding.id(),
                    bundle_id
                ));
                continue;
            }
            index
                .bindings_by_bundle
                .entry(bundle_id)
                .or_default()
                .push(binding);
        }

        for pod in &catalog.pods {
            index
                .pods_by_service_account
                .entry((
                    pod.namespace.clone(),
                    pod.effective_service_account().to_string(),
                ))
                .or_default()
                .push(pod);
        }
        for pods in index.pods_by_service_account.values_mut() {
            pods.sort_by(|a, b| {
                (&a.namespace, &a.name, &a.uid).cmp(&(&b.namespace, &b.name, &b.uid))
            });
        }

        for workload in &catalog.workloads {
            if workload.uid.is_empty() {
                diagnostics.warn(format!(
                    "workload {}/{} {} has no uid and cannot be linked",
                    workload.namespace, workload.name, workload.kind
                ));
                continue;
            }
            index
                .workloads_by_uid
                .entry(workload.uid.as_str())
                .or_insert(workload);
        }

        tracing::debug!(
            bundles = index.bundles.len(),
            bound_bundles = index.bindings_by_bundle.len(),
            pods = catalog.pods.len(),
            workloads = index.workloads_by_uid.len(),
            "indexed catalog"
        );
        index
    }

    /// Bindings that resolve to `bundle_id`.
    pub fn bindings_for(&self, bundle_id: &str) -> &[&'a Binding] {
        self.bindings_by_bundle
            .get(bundle_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn pods_for(&self, namespace: &str, service_account: &str) -> &[&'a Pod] {
        self.pods_by_service_account
            .get(&(namespace.to_string(), service_account.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

// ============================================================================
// Query
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub graph: Graph,
    pub matched_roles: usize,
    pub matched_bindings: usize,
    pub matched_subjects: usize,
    pub matched_pods: usize,
    pub matched_workloads: usize,
    #[serde(default)]
    pub resource_map: Vec<ResourceMapRow>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub known_gaps: Vec<String>,
}

/// Run one query against a catalog snapshot.
///
/// `discovery` enables wildcard expansion and phantom / unsupported-verb
/// annotation; without it rules are matched as written.
pub fn query(
    catalog: &CatalogSnapshot,
    discovery: Option<&DiscoveryCatalog>,
    request: &QueryRequest,
) -> Result<QueryResponse> {
    request.validate()?;
    let mut request = request.clone();
    let mut diagnostics = Diagnostics::default();
    if let Some(warning) = request.normalize_runtime_flags() {
        diagnostics.warn(warning);
    }

    let index = CatalogIndex::build(catalog, &mut diagnostics);
    let aggregation = AggregationIndex::resolve(&index.bundles);
    for warning in &aggregation.warnings {
        diagnostics.warn(warning.as_str());
    }
    for gap in &aggregation.known_gaps {
        diagnostics.known_gap(gap.as_str());
    }

    let matcher = RuleMatcher::new(&request, discovery);
    let filter = NamespaceFilter::new(request.namespace_scope.as_ref());
    let matches = reachability::match_bundles(&index, &aggregation, &matcher, &filter);
    for bundle_match in &matches {
        for warning in &bundle_match.warnings {
            diagnostics.warn(warning.as_str());
        }
    }

    let mut builder = GraphBuilder::new();
    let reached = reachability::build(
        &mut builder,
        &index,
        &aggregation,
        matches,
        &filter,
        &request,
    );

    let mut response = QueryResponse {
        matched_roles: reached.matched_roles,
        matched_bindings: reached.matched_bindings,
        matched_subjects: reached.matched_subjects,
        ..QueryResponse::default()
    };

    if request.include_pods {
        let runtime = runtime::correlate(
            &mut builder,
            &index,
            &reached.service_accounts,
            &filter,
            &request,
            &mut diagnostics,
        );
        response.matched_pods = runtime.matched_pods;
        response.matched_workloads = runtime.matched_workloads;
        diagnostics.known_gap(RUNTIME_SUBJECT_GAP);
    }

    if request.include_resource_map {
        response.resource_map = resource_map::build(&index, &aggregation);
    }

    if !request.selector.non_resource_urls.is_empty() {
        diagnostics.known_gap(URL_PREFIX_GAP);
    }

    let graph = builder.finish();
    graph.validate().map_err(|err| {
        tracing::error!(error = %err, "role graph failed validation");
        err
    })?;

    response.graph = graph;
    response.warnings = diagnostics.warnings;
    response.known_gaps = diagnostics.known_gaps;
    Ok(response)
}

/// Parse a request from JSON and run it.
pub fn query_json(
    catalog: &CatalogSnapshot,
    discovery: Option<&DiscoveryCatalog>,
    request_json: &str,
) -> Result<QueryResponse> {
    let request = crate::config::parse_request(request_json)?;
    query(catalog, discovery, &request)
}
