//! Resource map: per (apiGroup, resource, verb), how many roles grant it and
//! how many bindings and subjects those roles reach.
//!
//! Independent of the selector and namespace scope. Wildcards are counted as
//! written; they are not expanded.

use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::graph::subject_node_id;
use crate::rules::normalize_rule;

use super::aggregation::AggregationIndex;
use super::CatalogIndex;

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMapRow {
    pub api_group: String,
    /// `resource`, `resource/subresource`, or a non-resource URL.
    pub resource: String,
    pub verb: String,
    pub role_count: usize,
    pub binding_count: usize,
    pub subject_count: usize,
    #[serde(default, skip_serializing_if = "is_false")]
    pub non_resource: bool,
}

/// (apiGroup, resource, verb, nonResource)
type RowKey = (String, String, String, bool);

pub fn build<'a>(
    index: &'a CatalogIndex<'_>,
    aggregation: &AggregationIndex<'a>,
) -> Vec<ResourceMapRow> {
    let mut bundles_by_key: BTreeMap<RowKey, BTreeSet<&str>> = BTreeMap::new();

    for (id, bundle) in &index.bundles {
        for sourced in aggregation.effective_rules(id, bundle) {
            for rule_ref in normalize_rule(sourced.rule, sourced.source, sourced.index) {
                let key = if rule_ref.is_non_resource() {
                    (
                        String::new(),
                        rule_ref.non_resource_urls.join(","),
                        rule_ref.verb,
                        true,
                    )
                } else {
                    let resource = rule_ref.resource_key();
                    (rule_ref.api_group, resource, rule_ref.verb, false)
                };
                bundles_by_key.entry(key).or_default().insert(id.as_str());
            }
        }
    }

    let rows: Vec<ResourceMapRow> = bundles_by_key
        .into_iter()
        .map(|((api_group, resource, verb, non_resource), bundle_ids)| {
            let mut bindings: AHashSet<String> = AHashSet::new();
            let mut subjects: AHashSet<String> = AHashSet::new();
            for bundle_id in &bundle_ids {
                for binding in index.bindings_for(bundle_id) {
                    bindings.insert(binding.id());
                    for subject in &binding.subjects {
                        subjects.insert(subject_node_id(
                            subject,
                            subject.effective_namespace(binding),
                        ));
                    }
                }
            }
            ResourceMapRow {
                api_group,
                resource,
                verb,
                role_count: bundle_ids.len(),
                binding_count: bindings.len(),
                subject_count: subjects.len(),
                non_resource,
            }
        })
        .collect();

    tracing::debug!(rows = rows.len(), "built resource map");
    rows
}
