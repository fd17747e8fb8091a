// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Resource kind resolution for Kubernetes clusters.
//!
//! Turns server discovery output into a lookup table of kind descriptors and
//! resolves user-supplied names (kind, plural, singular, short form) against it.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResourceList;
use kube::discovery::ApiResource;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};

/// API groups shipped with Kubernetes itself
const BUILTIN_GROUPS: &[&str] = &[
    "apps",
    "batch",
    "networking.k8s.io",
    "policy",
    "rbac.authorization.k8s.io",
    "storage.k8s.io",
    "autoscaling",
    "coordination.k8s.io",
];

/// A concrete, listable resource kind advertised by the server
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KindDescriptor {
    /// API group (empty string for core v1)
    pub group: String,
    pub version: String,
    pub kind: String,
    /// Lowercase plural used in URLs (e.g., "deployments")
    pub plural: String,
    pub singular: String,
    pub short_names: Vec<String>,
    pub namespaced: bool,
}

impl KindDescriptor {
    /// Get the full API group/version string
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Dynamic API handle description for kube
    pub fn api_resource(&self) -> ApiResource {
        ApiResource {
            group: self.group.clone(),
            version: self.version.clone(),
            api_version: self.api_version(),
            kind: self.kind.clone(),
            plural: self.plural.clone(),
        }
    }

    /// Every lowercase name this kind answers to, without repeats
    fn lookup_keys(&self) -> Vec<String> {
        let mut keys = vec![self.kind.to_lowercase(), self.plural.to_lowercase()];
        if !self.singular.is_empty() {
            keys.push(self.singular.to_lowercase());
        }
        keys.extend(self.short_names.iter().map(|s| s.to_lowercase()));
        let mut seen = HashSet::new();
        keys.retain(|k| seen.insert(k.clone()));
        keys
    }

    fn group_tier(&self) -> u8 {
        if self.group.is_empty() {
            2
        } else if BUILTIN_GROUPS.contains(&self.group.as_str()) {
            1
        } else {
            0
        }
    }

    /// Ordering used when two kinds share a name: greater wins
    fn precedence(&self, other: &Self) -> Ordering {
        self.group_tier()
            .cmp(&other.group_tier())
            .then_with(|| version_rank(&self.version).cmp(&version_rank(&other.version)))
            // alphabetically earlier group wins the final tie
            .then_with(|| other.group.cmp(&self.group))
    }
}

/// Rank a Kubernetes API version: stable > beta > alpha, then by number
fn version_rank(version: &str) -> (u8, u32, u32) {
    let Some(rest) = version.strip_prefix('v') else {
        return (0, 0, 0);
    };
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    let Ok(major) = digits.parse::<u32>() else {
        return (0, 0, 0);
    };
    let suffix = &rest[digits.len()..];
    if suffix.is_empty() {
        return (3, major, 0);
    }
    let (stage, minor) = if let Some(n) = suffix.strip_prefix("beta") {
        (2, n)
    } else if let Some(n) = suffix.strip_prefix("alpha") {
        (1, n)
    } else {
        return (0, 0, 0);
    };
    (stage, major, minor.parse().unwrap_or(0))
}

/// Convert one discovery response into descriptors
///
/// Skips subresources (e.g., pods/log, pods/exec) and anything that cannot be listed.
pub fn descriptors_from_resource_list(list: &APIResourceList) -> Vec<KindDescriptor> {
    let (group, version) = match list.group_version.split_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), list.group_version.clone()),
    };

    list.resources
        .iter()
        .filter(|r| !r.name.contains('/'))
        .filter(|r| r.verbs.iter().any(|v| v == "list"))
        .map(|r| KindDescriptor {
            group: r.group.clone().unwrap_or_else(|| group.clone()),
            version: r.version.clone().unwrap_or_else(|| version.clone()),
            kind: r.kind.clone(),
            plural: r.name.clone(),
            singular: r.singular_name.clone(),
            short_names: r.short_names.clone().unwrap_or_default(),
            namespaced: r.namespaced,
        })
        .collect()
}

/// Lookup table of every kind the server advertises, built once per scan
#[derive(Debug, Clone, Default)]
pub struct ResourceCatalog {
    kinds: Vec<KindDescriptor>,
    /// Lowercase name to index into `kinds`
    by_name: HashMap<String, usize>,
}

impl ResourceCatalog {
    pub fn new(descriptors: impl IntoIterator<Item = KindDescriptor>) -> Self {
        let mut catalog = Self::default();
        for descriptor in descriptors {
            catalog.add(descriptor);
        }
        catalog
    }

    /// Add a kind to the catalog
    /// A name already claimed by a higher-precedence kind keeps pointing there
    pub fn add(&mut self, descriptor: KindDescriptor) {
        // Same group/kind seen in another version: keep the preferred version only
        if let Some(idx) = self
            .kinds
            .iter()
            .position(|k| k.group == descriptor.group && k.kind == descriptor.kind)
        {
            if descriptor.precedence(&self.kinds[idx]) == Ordering::Greater {
                self.kinds[idx] = descriptor;
                self.register(idx);
            }
            return;
        }

        self.kinds.push(descriptor);
        self.register(self.kinds.len() - 1);
    }

    /// Point every name of `kinds[idx]` at it unless a stronger kind holds the name
    fn register(&mut self, idx: usize) {
        let descriptor = &self.kinds[idx];
        for key in descriptor.lookup_keys() {
            let keep = match self.by_name.get(&key) {
                Some(&existing) if existing != idx => {
                    self.kinds[existing].precedence(descriptor) != Ordering::Less
                }
                _ => false,
            };
            if !keep {
                self.by_name.insert(key, idx);
            }
        }
    }

    /// Look up a kind by any of its names, case-insensitively
    pub fn get(&self, name: &str) -> Option<&KindDescriptor> {
        let idx = self.by_name.get(&name.trim().to_lowercase())?;
        self.kinds.get(*idx)
    }

    /// Resolve a list of possibly comma-separated names into unique kinds
    ///
    /// Keeps first-occurrence order. An empty input resolves to an empty set,
    /// which callers treat as "every listable kind".
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<KindDescriptor>> {
        let mut resolved: Vec<KindDescriptor> = Vec::new();
        for name in names
            .iter()
            .flat_map(|n| n.as_ref().split(','))
            .map(str::trim)
            .filter(|n| !n.is_empty())
        {
            let descriptor = self
                .get(name)
                .ok_or_else(|| Error::UnknownResourceKind(name.to_string()))?;
            if !resolved.contains(descriptor) {
                resolved.push(descriptor.clone());
            }
        }
        Ok(resolved)
    }

    /// Every listable kind, sorted by kind name
    pub fn listable(&self, namespaced_only: bool) -> Vec<KindDescriptor> {
        let mut kinds: Vec<_> = self
            .kinds
            .iter()
            .filter(|k| !namespaced_only || k.namespaced)
            .cloned()
            .collect();
        kinds.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.group.cmp(&b.group)));
        kinds
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}
