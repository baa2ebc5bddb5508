//! API discovery catalog — the concrete (group, resource, verb) surface the
//! cluster serves, plus the non-resource URL patterns it knows about.
//!
//! Used for wildcard expansion and for phantom / unsupported-verb
//! annotation. Keys are lowercased on insert; every lookup lowercases too.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::types::WILDCARD;

/// One discovery entry. `resource` may name a subresource (`pods/exec`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResource {
    #[serde(default)]
    pub group: String,
    pub resource: String,
    #[serde(default)]
    pub verbs: Vec<String>,
}

/// Wire form of the discovery catalog.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscoveryDocument {
    pub resources: Vec<ApiResource>,
    #[serde(rename = "nonResourceURLs")]
    pub non_resource_urls: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "DiscoveryDocument")]
pub struct DiscoveryCatalog {
    /// group -> resource -> sorted, deduplicated verbs
    verbs_by_group_resource: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    all_verbs: BTreeSet<String>,
    non_resource_urls: BTreeSet<String>,
}

impl From<DiscoveryDocument> for DiscoveryCatalog {
    fn from(doc: DiscoveryDocument) -> Self {
        DiscoveryCatalog::from_resources(doc.resources, doc.non_resource_urls)
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

impl DiscoveryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_resources<R, U>(resources: R, non_resource_urls: U) -> Self
    where
        R: IntoIterator<Item = ApiResource>,
        U: IntoIterator<Item = String>,
    {
        let mut catalog = Self::new();
        for entry in resources {
            catalog.insert(&entry.group, &entry.resource, &entry.verbs);
        }
        for url in non_resource_urls {
            catalog.insert_non_resource_url(&url);
        }
        catalog
    }

    /// Register a resource and merge its verbs into any existing entry.
    pub fn insert<S: AsRef<str>>(&mut self, group: &str, resource: &str, verbs: &[S]) {
        let resource = normalize(resource);
        if resource.is_empty() {
            return;
        }
        let entry = self
            .verbs_by_group_resource
            .entry(normalize(group))
            .or_default()
            .entry(resource)
            .or_default();
        for verb in verbs {
            let verb = normalize(verb.as_ref());
            if verb.is_empty() {
                continue;
            }
            self.all_verbs.insert(verb.clone());
            if let Err(pos) = entry.binary_search(&verb) {
                entry.insert(pos, verb);
            }
        }
    }

    pub fn insert_non_resource_url(&mut self, url: &str) {
        let url = url.trim();
        if !url.is_empty() {
            self.non_resource_urls.insert(url.to_string());
        }
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.verbs_by_group_resource.contains_key(&normalize(group))
    }

    /// All known groups, sorted.
    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.verbs_by_group_resource.keys().map(String::as_str)
    }

    /// Whether `resource` (optionally `resource/subresource`) exists in `group`.
    pub fn has_resource(&self, group: &str, resource: &str) -> bool {
        self.verbs_for(group, resource).is_some()
    }

    /// Every resource key of a group (`pods`, `pods/exec`), sorted.
    pub fn resources<'a>(&'a self, group: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.verbs_by_group_resource
            .get(&normalize(group))
            .into_iter()
            .flat_map(|resources| resources.keys())
            .map(String::as_str)
    }

    pub fn verbs_for(&self, group: &str, resource: &str) -> Option<&[String]> {
        self.verbs_by_group_resource
            .get(&normalize(group))?
            .get(&normalize(resource))
            .map(Vec::as_slice)
    }

    /// Every verb any resource supports, sorted.
    pub fn all_verbs(&self) -> impl Iterator<Item = &str> {
        self.all_verbs.iter().map(String::as_str)
    }

    pub fn knows_non_resource_urls(&self) -> bool {
        !self.non_resource_urls.is_empty()
    }

    /// True when `url` equals a known URL or falls under a `prefix*` pattern.
    pub fn has_non_resource_url(&self, url: &str) -> bool {
        let url = url.trim();
        self.non_resource_urls.iter().any(|known| {
            if known == WILDCARD || known == url {
                return true;
            }
            match known.strip_suffix('*') {
                Some(prefix) => url.starts_with(prefix),
                None => false,
            }
        })
    }

    pub fn is_empty(&self) -> bool {
        self.verbs_by_group_resource.is_empty() && self.non_resource_urls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> DiscoveryCatalog {
        let mut catalog = DiscoveryCatalog::new();
        catalog.insert("", "pods", &["get", "list", "watch", "delete"]);
        catalog.insert("", "pods/exec", &["create", "get"]);
        catalog.insert("apps", "deployments", &["GET", "list"]);
        catalog.insert("apps", "deployments/scale", &["get", "patch"]);
        catalog.insert_non_resource_url("/healthz");
        catalog.insert_non_resource_url("/metrics/*");
        catalog
    }

    #[test]
    fn verbs_are_lowercased_and_sorted() {
        let catalog = catalog();
        assert_eq!(
            catalog.verbs_for("apps", "deployments").unwrap(),
            &["get".to_string(), "list".to_string()]
        );
        assert!(catalog.all_verbs().any(|v| v == "patch"));
    }

    #[test]
    fn resources_include_subresources_in_order() {
        let catalog = catalog();
        let core: Vec<&str> = catalog.resources("").collect();
        assert_eq!(core, vec!["pods", "pods/exec"]);
        assert_eq!(catalog.resources("batch").count(), 0);
    }

    #[test]
    fn non_resource_url_patterns() {
        let catalog = catalog();
        assert!(catalog.has_non_resource_url("/healthz"));
        assert!(catalog.has_non_resource_url("/metrics/cadvisor"));
        assert!(!catalog.has_non_resource_url("/debug/pprof"));
    }

    #[test]
    fn parses_discovery_document() {
        let json = r#"{"resources":[{"group":"batch","resource":"jobs","verbs":["get","create"]}],
            "nonResourceURLs":["/version"]}"#;
        let catalog: DiscoveryCatalog = serde_json::from_str(json).unwrap();
        assert!(catalog.has_group("batch"));
        assert!(catalog.has_resource("batch", "jobs"));
        assert!(catalog.knows_non_resource_urls());
    }
}
