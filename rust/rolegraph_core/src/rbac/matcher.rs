//! Selector matching, wildcard expansion and discovery annotation.
//!
//! A `RuleMatcher` is built once per query and shared read-only across the
//! per-bundle workers, so it holds nothing but the normalized selector and
//! a borrowed discovery catalog.

use crate::config::{MatchMode, QueryRequest, Selector, WildcardMode};
use crate::discovery::DiscoveryCatalog;
use crate::rules::{normalize_rule, split_resource, RuleRef};
use crate::types::WILDCARD;

use super::aggregation::SourcedRule;

/// Upper bound on expanded refs attached to one wildcard ref.
pub const MAX_EXPANDED_REFS_PER_PARENT: usize = 2000;

/// Selector values trimmed once; group, resource and verb also lowercased.
#[derive(Debug, Clone, Default)]
struct NormalizedSelector {
    api_groups: Vec<String>,
    resources: Vec<String>,
    verbs: Vec<String>,
    resource_names: Vec<String>,
    non_resource_urls: Vec<String>,
}

impl NormalizedSelector {
    fn new(selector: &Selector) -> Self {
        let fold = |values: &[String]| -> Vec<String> {
            values.iter().map(|v| v.trim().to_lowercase()).collect()
        };
        let keep = |values: &[String]| -> Vec<String> {
            values.iter().map(|v| v.trim().to_string()).collect()
        };
        Self {
            api_groups: fold(&selector.api_groups),
            resources: fold(&selector.resources),
            verbs: fold(&selector.verbs),
            resource_names: keep(&selector.resource_names),
            non_resource_urls: keep(&selector.non_resource_urls),
        }
    }

    fn is_empty(&self) -> bool {
        self.api_groups.is_empty()
            && self.resources.is_empty()
            && self.verbs.is_empty()
            && self.resource_names.is_empty()
            && self.non_resource_urls.is_empty()
    }
}

/// Rule refs matched for one bundle plus the warnings raised on the way.
#[derive(Debug, Default)]
pub struct MatchOutcome {
    pub refs: Vec<RuleRef>,
    pub warnings: Vec<String>,
}

impl MatchOutcome {
    fn warn(&mut self, message: String) {
        if !self.warnings.contains(&message) {
            self.warnings.push(message);
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuleMatcher<'a> {
    selector: NormalizedSelector,
    match_mode: MatchMode,
    wildcard_mode: WildcardMode,
    discovery: Option<&'a DiscoveryCatalog>,
    filter_phantom: bool,
}

fn segment_matches(pattern: &str, value: &str) -> bool {
    pattern == WILDCARD || pattern == value
}

impl<'a> RuleMatcher<'a> {
    pub fn new(request: &QueryRequest, discovery: Option<&'a DiscoveryCatalog>) -> Self {
        Self {
            selector: NormalizedSelector::new(&request.selector),
            match_mode: request.match_mode,
            wildcard_mode: request.wildcard_mode,
            // An empty catalog knows nothing; treat it as absent rather than
            // flagging every ref as phantom.
            discovery: discovery.filter(|d| !d.is_empty()),
            filter_phantom: request.filter_phantom_apis,
        }
    }

    fn expand_mode(&self) -> bool {
        self.wildcard_mode == WildcardMode::Expand
    }

    fn value_matches(&self, wanted: &[String], value: &str) -> bool {
        if wanted.is_empty() || wanted.iter().any(|w| w == value) {
            return true;
        }
        self.expand_mode() && (value == WILDCARD || wanted.iter().any(|w| w == WILDCARD))
    }

    fn resource_matches(&self, rule_ref: &RuleRef) -> bool {
        let wanted = &self.selector.resources;
        if wanted.is_empty() {
            return true;
        }
        let key = rule_ref.resource_key();
        wanted.iter().any(|w| {
            if *w == key {
                return true;
            }
            if !self.expand_mode() {
                return false;
            }
            if w == WILDCARD || key == WILDCARD {
                return true;
            }
            let (wanted_base, wanted_sub) = split_resource(w);
            (segment_matches(&rule_ref.resource, &wanted_base)
                || segment_matches(&wanted_base, &rule_ref.resource))
                && wanted_sub.is_empty() == rule_ref.subresource.is_empty()
                && (segment_matches(&rule_ref.subresource, &wanted_sub)
                    || segment_matches(&wanted_sub, &rule_ref.subresource))
        })
    }

    fn resource_names_match(&self, rule_ref: &RuleRef) -> bool {
        self.selector.resource_names.is_empty()
            || rule_ref.resource_names.is_empty()
            || rule_ref
                .resource_names
                .iter()
                .any(|name| self.selector.resource_names.contains(name))
    }

    fn url_matches(&self, rule_ref: &RuleRef) -> bool {
        rule_ref
            .non_resource_urls
            .iter()
            .any(|url| self.value_matches(&self.selector.non_resource_urls, url))
    }

    /// Whether one rule ref satisfies the selector under the configured
    /// match and wildcard modes.
    pub fn matches(&self, rule_ref: &RuleRef) -> bool {
        let sel = &self.selector;
        let mut checks: Vec<bool> = Vec::with_capacity(4);
        if rule_ref.is_non_resource() {
            if !sel.non_resource_urls.is_empty() {
                checks.push(self.url_matches(rule_ref));
            }
        } else {
            if !sel.api_groups.is_empty() {
                checks.push(self.value_matches(&sel.api_groups, &rule_ref.api_group));
            }
            if !sel.resources.is_empty() {
                checks.push(self.resource_matches(rule_ref));
            }
            if !sel.verbs.is_empty() {
                checks.push(self.value_matches(&sel.verbs, &rule_ref.verb));
            }
            if !sel.resource_names.is_empty() {
                checks.push(self.resource_names_match(rule_ref));
            }
        }
        if checks.is_empty() {
            return sel.is_empty();
        }
        match self.match_mode {
            MatchMode::All => checks.iter().all(|&c| c),
            MatchMode::Any => checks.iter().any(|&c| c),
        }
    }

    /// Normalize, match, annotate and expand every rule of one bundle.
    pub fn match_rules(&self, rules: &[SourcedRule<'_>]) -> MatchOutcome {
        let mut outcome = MatchOutcome::default();
        for sourced in rules {
            for mut rule_ref in normalize_rule(sourced.rule, sourced.source, sourced.index) {
                if !self.matches(&rule_ref) {
                    continue;
                }
                self.annotate(&mut rule_ref, &mut outcome);
                if self.filter_phantom && rule_ref.phantom {
                    continue;
                }
                if self.expand_mode() && rule_ref.has_wildcard() {
                    rule_ref.expanded_refs = self.expand(&rule_ref, &mut outcome);
                }
                outcome.refs.push(rule_ref);
            }
        }
        outcome
    }

    /// Set `phantom` and `unsupported_verb` from discovery.
    fn annotate(&self, rule_ref: &mut RuleRef, outcome: &mut MatchOutcome) {
        let Some(discovery) = self.discovery else {
            return;
        };

        if rule_ref.is_non_resource() {
            if discovery.knows_non_resource_urls() {
                let unknown: Vec<&String> = rule_ref
                    .non_resource_urls
                    .iter()
                    .filter(|url| *url != WILDCARD && !discovery.has_non_resource_url(url))
                    .collect();
                if !unknown.is_empty() {
                    for url in unknown {
                        outcome.warn(format!(
                            "non-resource URL {:?} referenced in role rules is not served by the cluster",
                            url
                        ));
                    }
                    rule_ref.phantom = true;
                }
            }
            return;
        }

        if rule_ref.api_group != WILDCARD && rule_ref.resource != WILDCARD {
            if !discovery.has_group(&rule_ref.api_group) {
                rule_ref.phantom = true;
                outcome.warn(format!(
                    "API group {:?} referenced in role rules is not installed in the cluster",
                    rule_ref.api_group
                ));
                return;
            }
            let key = rule_ref.resource_key();
            if rule_ref.subresource != WILDCARD
                && !discovery.has_resource(&rule_ref.api_group, &key)
                && !discovery.has_resource(&rule_ref.api_group, &rule_ref.resource)
            {
                rule_ref.phantom = true;
                outcome.warn(format!(
                    "resource {:?} in API group {:?} is not registered in the cluster",
                    key, rule_ref.api_group
                ));
                return;
            }
        }

        if rule_ref.verb == WILDCARD
            || rule_ref.resource == WILDCARD
            || rule_ref.subresource == WILDCARD
        {
            return;
        }
        let key = rule_ref.resource_key();
        let groups: Vec<&str> = if rule_ref.api_group == WILDCARD {
            discovery.groups().collect()
        } else {
            vec![rule_ref.api_group.as_str()]
        };
        let mut found = false;
        for group in groups {
            if let Some(verbs) = discovery.verbs_for(group, &key) {
                found = true;
                if verbs.iter().any(|v| *v == rule_ref.verb) {
                    return;
                }
            }
        }
        rule_ref.unsupported_verb = found;
    }

    /// Enumerate the concrete refs a wildcard ref stands for, keeping only
    /// those that satisfy the selector on their own.
    fn expand(&self, parent: &RuleRef, outcome: &mut MatchOutcome) -> Vec<RuleRef> {
        let Some(discovery) = self.discovery else {
            return Vec::new();
        };
        let groups: Vec<String> = if parent.api_group == WILDCARD {
            discovery.groups().map(str::to_string).collect()
        } else {
            vec![parent.api_group.clone()]
        };

        let mut expanded = Vec::new();
        let mut truncated = false;
        'groups: for group in &groups {
            for (resource, subresource) in resources_for(discovery, group, parent) {
                let key = if subresource.is_empty() {
                    resource.clone()
                } else {
                    format!("{}/{}", resource, subresource)
                };
                for verb in verbs_for(discovery, group, &key, &parent.verb) {
                    let candidate = RuleRef {
                        api_group: group.clone(),
                        resource: resource.clone(),
                        subresource: subresource.clone(),
                        verb,
                        resource_names: parent.resource_names.clone(),
                        source_bundle: parent.source_bundle.clone(),
                        source_rule_index: parent.source_rule_index,
                        ..RuleRef::default()
                    };
                    if !self.matches(&candidate) {
                        continue;
                    }
                    if expanded.len() == MAX_EXPANDED_REFS_PER_PARENT {
                        truncated = true;
                        break 'groups;
                    }
                    expanded.push(candidate);
                }
            }
        }

        if truncated {
            let message = format!(
                "wildcard expansion for {}/{}/{} truncated at {} entries",
                parent.api_group,
                parent.resource_key(),
                parent.verb,
                MAX_EXPANDED_REFS_PER_PARENT
            );
            tracing::warn!(
                source = parent.source_bundle.as_deref().unwrap_or_default(),
                "{}",
                message
            );
            outcome.warn(message);
        }
        expanded
    }
}

/// Concrete (resource, subresource) pairs of `group` covered by the parent.
/// A bare `*` covers top-level resources only; `*/scale` or `pods/*` cover
/// the matching subresource entries.
fn resources_for(
    discovery: &DiscoveryCatalog,
    group: &str,
    parent: &RuleRef,
) -> Vec<(String, String)> {
    if parent.resource != WILDCARD && parent.subresource != WILDCARD {
        return vec![(parent.resource.clone(), parent.subresource.clone())];
    }
    discovery
        .resources(group)
        .filter_map(|key| {
            let (base, sub) = split_resource(key);
            let covered = segment_matches(&parent.resource, &base)
                && parent.subresource.is_empty() == sub.is_empty()
                && segment_matches(&parent.subresource, &sub);
            covered.then_some((base, sub))
        })
        .collect()
}

/// Verbs of a concrete resource covered by `verb`. Unknown groups pass a
/// concrete verb through and expand `*` to every verb discovery knows; a
/// known group that does not serve the resource yields nothing.
fn verbs_for(discovery: &DiscoveryCatalog, group: &str, key: &str, verb: &str) -> Vec<String> {
    match discovery.verbs_for(group, key) {
        Some(supported) if verb == WILDCARD => supported.to_vec(),
        Some(supported) => supported
            .iter()
            .filter(|v| *v == verb)
            .cloned()
            .collect(),
        None if discovery.has_group(group) => Vec::new(),
        None if verb == WILDCARD => discovery.all_verbs().map(str::to_string).collect(),
        None => vec![verb.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PolicyRule;

    fn strs(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn request(groups: &[&str], resources: &[&str], verbs: &[&str]) -> QueryRequest {
        QueryRequest {
            selector: Selector {
                api_groups: strs(groups),
                resources: strs(resources),
                verbs: strs(verbs),
                ..Selector::default()
            },
            ..QueryRequest::default()
        }
    }

    fn rule_ref(group: &str, resource: &str, verb: &str) -> RuleRef {
        let (resource, subresource) = split_resource(resource);
        RuleRef {
            api_group: group.to_string(),
            resource,
            subresource,
            verb: verb.to_string(),
            ..RuleRef::default()
        }
    }

    fn discovery() -> DiscoveryCatalog {
        let mut catalog = DiscoveryCatalog::new();
        catalog.insert("", "pods", &["get", "list", "delete"]);
        catalog.insert("", "pods/exec", &["create"]);
        catalog.insert("", "secrets", &["get", "list"]);
        catalog.insert("apps", "deployments", &["get", "list", "patch"]);
        catalog.insert("apps", "deployments/scale", &["get", "patch"]);
        catalog.insert_non_resource_url("/healthz");
        catalog
    }

    fn run(
        matcher: &RuleMatcher<'_>,
        groups: &[&str],
        resources: &[&str],
        verbs: &[&str],
    ) -> MatchOutcome {
        let rule = PolicyRule {
            api_groups: strs(groups),
            resources: strs(resources),
            verbs: strs(verbs),
            ..PolicyRule::default()
        };
        let sourced = [SourcedRule {
            rule: &rule,
            source: "clusterrole:test",
            index: 0,
        }];
        matcher.match_rules(&sourced)
    }

    #[test]
    fn any_vs_all() {
        let mut req = request(&[""], &["pods"], &["delete"]);
        let any = RuleMatcher::new(&req, None);
        assert!(any.matches(&rule_ref("", "pods", "get")));

        req.match_mode = MatchMode::All;
        let all = RuleMatcher::new(&req, None);
        assert!(!all.matches(&rule_ref("", "pods", "get")));
        assert!(all.matches(&rule_ref("", "pods", "delete")));
    }

    #[test]
    fn case_insensitive_fields() {
        let mut req = request(&["Apps"], &["Deployments"], &["GET"]);
        req.match_mode = MatchMode::All;
        assert!(RuleMatcher::new(&req, None).matches(&rule_ref("apps", "deployments", "get")));
    }

    #[test]
    fn wildcard_modes() {
        let mut req = request(&[], &["secrets"], &[]);
        let star = rule_ref("*", "*", "*");
        assert!(RuleMatcher::new(&req, None).matches(&star));

        req.wildcard_mode = WildcardMode::Literal;
        assert!(!RuleMatcher::new(&req, None).matches(&star));

        let mut literal_star = request(&[], &["*"], &[]);
        literal_star.wildcard_mode = WildcardMode::Literal;
        let matcher = RuleMatcher::new(&literal_star, None);
        assert!(matcher.matches(&star));
        assert!(!matcher.matches(&rule_ref("", "pods", "get")));
    }

    #[test]
    fn subresource_wildcards() {
        let matcher = RuleMatcher::new(&request(&[], &["pods/exec"], &[]), None);
        assert!(matcher.matches(&rule_ref("", "pods/*", "create")));
        assert!(!matcher.matches(&rule_ref("", "pods", "create")));
        assert!(matcher.matches(&rule_ref("", "pods/exec", "create")));
    }

    #[test]
    fn resource_names_overlap() {
        let mut req = request(&[], &["secrets"], &[]);
        req.selector.resource_names = strs(&["db-password"]);
        req.match_mode = MatchMode::All;
        let matcher = RuleMatcher::new(&req, None);

        let mut unrestricted = rule_ref("", "secrets", "get");
        assert!(matcher.matches(&unrestricted));
        unrestricted.resource_names = strs(&["other"]);
        assert!(!matcher.matches(&unrestricted));
        unrestricted.resource_names = strs(&["other", "db-password"]);
        assert!(matcher.matches(&unrestricted));
    }

    #[test]
    fn non_resource_rules_only_match_urls() {
        let url_ref = RuleRef {
            verb: "get".to_string(),
            non_resource_urls: strs(&["/healthz"]),
            ..RuleRef::default()
        };
        let by_verb = RuleMatcher::new(&request(&[], &[], &["get"]), None);
        assert!(!by_verb.matches(&url_ref));

        let mut by_url = QueryRequest::default();
        by_url.selector.non_resource_urls = strs(&["/healthz"]);
        let matcher = RuleMatcher::new(&by_url, None);
        assert!(matcher.matches(&url_ref));
        assert!(!matcher.matches(&rule_ref("", "pods", "get")));

        let everything = RuleMatcher::new(&QueryRequest::default(), None);
        assert!(everything.matches(&url_ref));
        assert!(everything.matches(&rule_ref("", "pods", "get")));
    }

    #[test]
    fn expansion_keeps_only_selected_refs() {
        let catalog = discovery();
        let matcher = RuleMatcher::new(&request(&[], &["deployments"], &["get"]), Some(&catalog));
        let outcome = run(&matcher, &["*"], &["*"], &["*"]);
        assert_eq!(outcome.refs.len(), 1);
        let expanded = &outcome.refs[0].expanded_refs;
        // `any` mode: every ref touching deployments or get.
        assert!(expanded
            .iter()
            .any(|r| r.api_group == "apps" && r.resource == "deployments" && r.verb == "get"));
        assert!(expanded.iter().all(|r| matcher.matches(r)));
        assert!(!expanded.iter().any(|r| r.subresource == "exec"));
    }

    #[test]
    fn expansion_is_deterministic() {
        let catalog = discovery();
        let matcher = RuleMatcher::new(&QueryRequest::default(), Some(&catalog));
        let first = run(&matcher, &["*"], &["*"], &["*"]);
        let second = run(&matcher, &["*"], &["*"], &["*"]);
        assert_eq!(first.refs, second.refs);
        // Bare `*` covers top-level resources only: pods, secrets, deployments.
        let resources: Vec<String> = first.refs[0]
            .expanded_refs
            .iter()
            .map(|r| r.resource_key())
            .collect();
        assert!(resources.iter().all(|r| !r.contains('/')));
        assert_eq!(first.refs[0].expanded_refs.len(), 3 + 2 + 3);
    }

    #[test]
    fn wildcard_group_expands_only_to_serving_groups() {
        let catalog = discovery();
        let matcher = RuleMatcher::new(&QueryRequest::default(), Some(&catalog));
        let outcome = run(&matcher, &["*"], &["pods"], &["*"]);
        let expanded: Vec<String> = outcome.refs[0]
            .expanded_refs
            .iter()
            .map(|r| format!("{}/{}/{}", r.api_group, r.resource_key(), r.verb))
            .collect();
        // apps is known but does not serve pods.
        assert_eq!(expanded, vec!["/pods/delete", "/pods/get", "/pods/list"]);

        let outcome = run(&matcher, &["apps"], &["pods"], &["*"]);
        assert!(outcome.refs[0].expanded_refs.is_empty());
    }

    #[test]
    fn unknown_group_wildcard_verb_uses_every_known_verb() {
        let catalog = discovery();
        let matcher = RuleMatcher::new(&QueryRequest::default(), Some(&catalog));
        let outcome = run(&matcher, &["example.io"], &["widgets"], &["*"]);
        let verbs: Vec<&str> = outcome.refs[0]
            .expanded_refs
            .iter()
            .map(|r| r.verb.as_str())
            .collect();
        assert_eq!(verbs, catalog.all_verbs().collect::<Vec<_>>());
    }

    #[test]
    fn subresource_wildcard_expands_to_subresources() {
        let catalog = discovery();
        let matcher = RuleMatcher::new(&QueryRequest::default(), Some(&catalog));
        let outcome = run(&matcher, &["apps"], &["*/scale"], &["get"]);
        let expanded = &outcome.refs[0].expanded_refs;
        assert_eq!(expanded.len(), 1);
        assert_eq!(expanded[0].resource_key(), "deployments/scale");
    }

    #[test]
    fn phantom_and_unsupported_annotation() {
        let catalog = discovery();
        let matcher = RuleMatcher::new(&QueryRequest::default(), Some(&catalog));

        let outcome = run(&matcher, &["example.io"], &["widgets"], &["get"]);
        assert!(outcome.refs[0].phantom);
        assert!(outcome.warnings.iter().any(|w| w.contains("example.io")));

        let outcome = run(&matcher, &[""], &["configmaps"], &["get"]);
        assert!(outcome.refs[0].phantom);

        let outcome = run(&matcher, &[""], &["secrets"], &["delete"]);
        assert!(!outcome.refs[0].phantom);
        assert!(outcome.refs[0].unsupported_verb);

        let outcome = run(&matcher, &["*"], &["deployments"], &["patch"]);
        assert!(!outcome.refs[0].phantom);
        assert!(!outcome.refs[0].unsupported_verb);
    }

    #[test]
    fn filter_phantom_drops_refs() {
        let catalog = discovery();
        let req = QueryRequest {
            filter_phantom_apis: true,
            ..QueryRequest::default()
        };
        let matcher = RuleMatcher::new(&req, Some(&catalog));
        assert!(run(&matcher, &["example.io"], &["widgets"], &["get"]).refs.is_empty());
        assert_eq!(run(&matcher, &[""], &["pods"], &["get"]).refs.len(), 1);
    }

    #[test]
    fn unknown_url_is_phantom_when_discovery_lists_urls() {
        let catalog = discovery();
        let matcher = RuleMatcher::new(&QueryRequest::default(), Some(&catalog));
        let rule = PolicyRule {
            verbs: strs(&["get"]),
            non_resource_urls: strs(&["/healthz", "/debug"]),
            ..PolicyRule::default()
        };
        let outcome = matcher.match_rules(&[SourcedRule {
            rule: &rule,
            source: "clusterrole:probe",
            index: 0,
        }]);
        let phantom: Vec<bool> = outcome.refs.iter().map(|r| r.phantom).collect();
        assert_eq!(phantom, vec![false, true]);
    }

    #[test]
    fn expansion_is_capped() {
        let mut catalog = DiscoveryCatalog::new();
        for i in 0..30 {
            for j in 0..40 {
                catalog.insert(&format!("g{}.io", i), &format!("r{}", j), &["get", "list"]);
            }
        }
        let matcher = RuleMatcher::new(&QueryRequest::default(), Some(&catalog));
        let outcome = run(&matcher, &["*"], &["*"], &["*"]);
        assert_eq!(
            outcome.refs[0].expanded_refs.len(),
            MAX_EXPANDED_REFS_PER_PARENT
        );
        assert!(outcome.warnings.iter().any(|w| w.contains("truncated")));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn field() -> impl Strategy<Value = Vec<String>> {
            prop::collection::vec(
                prop::sample::select(vec!["", "apps", "pods", "deployments", "get", "list", "*"]),
                0..3,
            )
            .prop_map(|v| v.into_iter().map(str::to_string).collect::<Vec<String>>())
        }

        fn value() -> impl Strategy<Value = String> {
            prop::sample::select(vec!["", "apps", "pods", "deployments", "get", "list", "*"])
                .prop_map(str::to_string)
        }

        proptest! {
            #[test]
            fn all_implies_any(
                groups in field(),
                resources in field(),
                verbs in field(),
                group in value(),
                resource in value(),
                verb in value(),
                literal in any::<bool>(),
            ) {
                let resources: Vec<String> =
                    resources.into_iter().filter(|r| !r.is_empty()).collect();
                let verbs: Vec<String> = verbs.into_iter().filter(|v| !v.is_empty()).collect();
                let mut req = QueryRequest {
                    selector: Selector {
                        api_groups: groups,
                        resources,
                        verbs,
                        ..Selector::default()
                    },
                    ..QueryRequest::default()
                };
                if literal {
                    req.wildcard_mode = WildcardMode::Literal;
                }
                let rule_ref = RuleRef {
                    api_group: group,
                    resource,
                    verb,
                    ..RuleRef::default()
                };
                req.match_mode = MatchMode::All;
                let all = RuleMatcher::new(&req, None).matches(&rule_ref);
                req.match_mode = MatchMode::Any;
                let any = RuleMatcher::new(&req, None).matches(&rule_ref);
                prop_assert!(!all || any);
            }

            #[test]
            fn expanded_refs_satisfy_selector(
                resources in field(),
                verbs in field(),
                all_mode in any::<bool>(),
            ) {
                let catalog = discovery();
                let mut req = request(&[], &[], &[]);
                req.selector.resources = resources.into_iter().filter(|r| !r.is_empty()).collect();
                req.selector.verbs = verbs.into_iter().filter(|v| !v.is_empty()).collect();
                if all_mode {
                    req.match_mode = MatchMode::All;
                }
                let matcher = RuleMatcher::new(&req, Some(&catalog));
                let first = run(&matcher, &["*"], &["*"], &["*"]);
                let second = run(&matcher, &["*"], &["*"], &["*"]);
                prop_assert_eq!(&first.refs, &second.refs);
                for parent in &first.refs {
                    for expanded in &parent.expanded_refs {
                        prop_assert!(matcher.matches(expanded));
                        prop_assert!(!expanded.has_wildcard());
                    }
                }
            }
        }
    }
}
