//! Aggregation resolver.
//!
//! A ClusterRole with an `aggregationRule` absorbs the rules of every other
//! ClusterRole whose labels match one of its selectors. The relation is a
//! directed graph keyed by bundle id and may contain cycles; every traversal
//! here carries an explicit visited set, and no bundle holds a reference to
//! another.

use ahash::AHashSet;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::types::{Bundle, BundleId, LabelSelector, LabelSelectorOperator, PolicyRule};

/// A rule together with the bundle and position it came from.
#[derive(Debug, Clone, Copy)]
pub struct SourcedRule<'a> {
    pub rule: &'a PolicyRule,
    pub source: &'a str,
    pub index: usize,
}

/// Resolved aggregation state for one catalog snapshot.
#[derive(Debug, Default)]
pub struct AggregationIndex<'a> {
    /// target -> every cluster bundle its selectors matched (self excluded)
    direct: BTreeMap<&'a str, BTreeSet<&'a str>>,
    /// target -> sources shown in the graph (cycle-free)
    sources: BTreeMap<&'a str, Vec<BundleId>>,
    /// aggregated target -> own rules followed by merged source rules
    merged: BTreeMap<&'a str, Vec<SourcedRule<'a>>>,
    pub warnings: Vec<String>,
    pub known_gaps: Vec<String>,
}

/// Evaluate a label selector. An empty selector matches everything; a
/// malformed requirement is an error.
pub fn selector_matches(
    selector: &LabelSelector,
    labels: &BTreeMap<String, String>,
) -> Result<bool, String> {
    for (key, value) in &selector.match_labels {
        if labels.get(key) != Some(value) {
            return Ok(false);
        }
    }
    for req in &selector.match_expressions {
        let present = labels.get(&req.key);
        let matched = match req.operator {
            LabelSelectorOperator::In | LabelSelectorOperator::NotIn if req.values.is_empty() => {
                return Err(format!(
                    "operator {:?} on key {:?} requires at least one value",
                    req.operator, req.key
                ));
            }
            LabelSelectorOperator::Exists | LabelSelectorOperator::DoesNotExist
                if !req.values.is_empty() =>
            {
                return Err(format!(
                    "operator {:?} on key {:?} must not have values",
                    req.operator, req.key
                ));
            }
            LabelSelectorOperator::In => present.is_some_and(|v| req.values.contains(v)),
            LabelSelectorOperator::NotIn => !present.is_some_and(|v| req.values.contains(v)),
            LabelSelectorOperator::Exists => present.is_some(),
            LabelSelectorOperator::DoesNotExist => present.is_none(),
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

impl<'a> AggregationIndex<'a> {
    /// Resolve aggregation for every bundle. `bundles` must be keyed by
    /// bundle id.
    pub fn resolve(bundles: &'a BTreeMap<BundleId, &'a Bundle>) -> Self {
        let mut index = AggregationIndex::default();

        let cluster_bundles: Vec<(&'a str, &'a Bundle)> = bundles
            .iter()
            .filter(|(_, b)| b.is_cluster_scoped())
            .map(|(id, b)| (id.as_str(), *b))
            .collect();

        for &(target_id, target) in &cluster_bundles {
            if !target.has_aggregation_rule() {
                continue;
            }
            let selectors = target
                .aggregation_rule
                .as_ref()
                .map(|rule| rule.cluster_role_selectors.as_slice())
                .unwrap_or_default();

            let mut matched = BTreeSet::new();
            for selector in selectors {
                for &(candidate_id, candidate) in &cluster_bundles {
                    if candidate_id == target_id {
                        continue;
                    }
                    match selector_matches(selector, &candidate.labels) {
                        Ok(true) => {
                            matched.insert(candidate_id);
                        }
                        Ok(false) => {}
                        Err(err) => {
                            push_unique(
                                &mut index.warnings,
                                format!(
                                    "clusterrole/{} has invalid aggregation selector: {}",
                                    target.name, err
                                ),
                            );
                            break;
                        }
                    }
                }
            }
            if matched.is_empty() {
                push_unique(
                    &mut index.warnings,
                    format!(
                        "clusterrole/{} aggregation selectors matched no cluster roles",
                        target.name
                    ),
                );
            }
            index.direct.insert(target_id, matched);
        }

        let targets: Vec<&'a str> = index.direct.keys().copied().collect();
        for target_id in targets {
            let shown: Vec<BundleId> = index.direct[target_id]
                .iter()
                .filter(|&&source| !index.reaches(source, target_id))
                .map(|source| source.to_string())
                .collect();

            let merged = index.merge_rules(target_id, bundles);
            if merged.is_empty() {
                if let Some(target) = bundles.get(target_id) {
                    push_unique(
                        &mut index.known_gaps,
                        format!(
                            "clusterrole/{} has aggregationRule but resolved rules are empty",
                            target.name
                        ),
                    );
                }
            }
            tracing::debug!(
                target = target_id,
                matched = index.direct[target_id].len(),
                shown = shown.len(),
                rules = merged.len(),
                "resolved aggregation"
            );
            index.sources.insert(target_id, shown);
            index.merged.insert(target_id, merged);
        }

        index
    }

    /// Whether `from` aggregates `to`, directly or transitively.
    fn reaches(&self, from: &str, to: &str) -> bool {
        let mut visited: AHashSet<&str> = AHashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([from]);
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            let Some(next) = self.direct.get(current) else {
                continue;
            };
            for &n in next {
                if n == to {
                    return true;
                }
                queue.push_back(n);
            }
        }
        false
    }

    /// Target's own rules, then the rules of every bundle reachable through
    /// the aggregation relation in breadth-first order, de-duplicated.
    fn merge_rules(
        &self,
        target_id: &'a str,
        bundles: &'a BTreeMap<BundleId, &'a Bundle>,
    ) -> Vec<SourcedRule<'a>> {
        let mut seen_rules: AHashSet<&'a PolicyRule> = AHashSet::new();
        let mut merged = Vec::new();
        let mut visited: AHashSet<&'a str> = AHashSet::new();
        let mut queue: VecDeque<&'a str> = VecDeque::from([target_id]);

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            if let Some(bundle) = bundles.get(current) {
                for (idx, rule) in bundle.rules.iter().enumerate() {
                    if seen_rules.insert(rule) {
                        merged.push(SourcedRule {
                            rule,
                            source: current,
                            index: idx,
                        });
                    }
                }
            }
            if let Some(next) = self.direct.get(current) {
                queue.extend(next.iter().copied().filter(|n| !visited.contains(n)));
            }
        }
        merged
    }

    pub fn is_aggregated(&self, bundle_id: &str) -> bool {
        self.direct.contains_key(bundle_id)
    }

    /// Cycle-free sources shown for `bundle_id`; empty when not aggregated.
    pub fn sources(&self, bundle_id: &str) -> &[BundleId] {
        self.sources
            .get(bundle_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Own rules plus merged aggregated rules.
    pub fn effective_rules(&self, bundle_id: &'a str, bundle: &'a Bundle) -> Vec<SourcedRule<'a>> {
        if let Some(merged) = self.merged.get(bundle_id) {
            return merged.clone();
        }
        bundle
            .rules
            .iter()
            .enumerate()
            .map(|(index, rule)| SourcedRule {
                rule,
                source: bundle_id,
                index,
            })
            .collect()
    }
}

fn push_unique(list: &mut Vec<String>, message: String) {
    if !list.contains(&message) {
        list.push(message);
    }
}
