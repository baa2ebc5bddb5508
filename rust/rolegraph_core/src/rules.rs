//! Rule model — normalizes raw policy rules into structured `RuleRef`s.
//!
//! A policy rule is a cross product (groups × resources × verbs, or
//! URLs × verbs). Matching, expansion and counting all work one concrete
//! combination at a time, so the first step is to flatten every rule into
//! one `RuleRef` per combination.

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use crate::types::{PolicyRule, WILDCARD};

fn is_false(value: &bool) -> bool {
    !*value
}

/// One (group, resource, verb) or (URL, verb) grant carried by a rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleRef {
    #[serde(default)]
    pub api_group: String,
    #[serde(default)]
    pub resource: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subresource: String,
    pub verb: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_names: Vec<String>,
    #[serde(
        rename = "nonResourceURLs",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub non_resource_urls: Vec<String>,
    /// Bundle the rule came from; differs from the owning node for
    /// aggregated rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_bundle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_rule_index: Option<usize>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub phantom: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub unsupported_verb: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expanded_refs: Vec<RuleRef>,
}

/// Identity of a rule ref for de-duplication:
/// (apiGroup, resource, subresource, verb, resourceNames, nonResourceURLs).
pub type RuleRefKey = (String, String, String, String, Vec<String>, Vec<String>);

impl RuleRef {
    pub fn is_non_resource(&self) -> bool {
        !self.non_resource_urls.is_empty()
    }

    /// `resource` or `resource/subresource`.
    pub fn resource_key(&self) -> String {
        if self.subresource.is_empty() {
            self.resource.clone()
        } else {
            format!("{}/{}", self.resource, self.subresource)
        }
    }

    pub fn has_wildcard(&self) -> bool {
        !self.is_non_resource()
            && (self.api_group == WILDCARD
                || self.resource == WILDCARD
                || self.subresource == WILDCARD
                || self.verb == WILDCARD)
    }

    pub fn dedupe_key(&self) -> RuleRefKey {
        (
            self.api_group.clone(),
            self.resource.clone(),
            self.subresource.clone(),
            self.verb.clone(),
            self.resource_names.clone(),
            self.non_resource_urls.clone(),
        )
    }

    /// Drop source metadata, recursively.
    pub fn strip_metadata(&mut self) {
        self.source_bundle = None;
        self.source_rule_index = None;
        for expanded in &mut self.expanded_refs {
            expanded.strip_metadata();
        }
    }
}

/// Split `pods/exec` into (`pods`, `exec`).
pub fn split_resource(resource: &str) -> (String, String) {
    match resource.split_once('/') {
        Some((base, sub)) => (base.to_string(), sub.to_string()),
        None => (resource.to_string(), String::new()),
    }
}

fn normalized_values(values: &[String], lowercase: bool) -> Vec<String> {
    let mut seen = AHashSet::new();
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        let value = value.trim();
        let value = if lowercase {
            value.to_lowercase()
        } else {
            value.to_string()
        };
        if seen.insert(value.clone()) {
            out.push(value);
        }
    }
    out
}

/// Flatten one policy rule into rule refs, tagged with its source.
///
/// A resource rule without apiGroups or verbs grants nothing and yields no
/// refs, matching API server semantics.
pub fn normalize_rule(rule: &PolicyRule, source_bundle: &str, rule_index: usize) -> Vec<RuleRef> {
    let verbs = normalized_values(&rule.verbs, true);
    let mut resource_names = normalized_values(&rule.resource_names, false);
    resource_names.sort();

    let mut refs = Vec::new();
    let resources: Vec<String> = normalized_values(&rule.resources, true)
        .into_iter()
        .filter(|r| !r.is_empty())
        .collect();
    if !resources.is_empty() {
        let groups = normalized_values(&rule.api_groups, true);
        for group in &groups {
            for resource in &resources {
                let (base, sub) = split_resource(resource);
                for verb in verbs.iter().filter(|v| !v.is_empty()) {
                    refs.push(RuleRef {
                        api_group: group.clone(),
                        resource: base.clone(),
                        subresource: sub.clone(),
                        verb: verb.clone(),
                        resource_names: resource_names.clone(),
                        source_bundle: Some(source_bundle.to_string()),
                        source_rule_index: Some(rule_index),
                        ..RuleRef::default()
                    });
                }
            }
        }
    }

    for url in normalized_values(&rule.non_resource_urls, false) {
        if url.is_empty() {
            continue;
        }
        for verb in verbs.iter().filter(|v| !v.is_empty()) {
            refs.push(RuleRef {
                verb: verb.clone(),
                non_resource_urls: vec![url.clone()],
                source_bundle: Some(source_bundle.to_string()),
                source_rule_index: Some(rule_index),
                ..RuleRef::default()
            });
        }
    }

    refs
}

/// Keep the first occurrence of every `RuleRefKey`, preserving order.
pub fn dedupe_rule_refs(refs: Vec<RuleRef>) -> Vec<RuleRef> {
    let mut seen = AHashSet::with_capacity(refs.len());
    refs.into_iter()
        .filter(|r| seen.insert(r.dedupe_key()))
        .collect()
}
