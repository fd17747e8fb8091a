// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Immutable, chainable description of what to list

use crate::config::Config;

/// Which namespaces a query covers
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NamespaceScope {
    /// The connection's current namespace
    #[default]
    Current,
    Named(String),
    All,
}

/// Filter description for a listing
///
/// Every chain call consumes a copy and returns a new query, so one base
/// query can serve as a template for differently scoped scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceQuery {
    scope: NamespaceScope,
    /// Unresolved resource names; empty means every listable kind
    kinds: Vec<String>,
    exclude_owned: bool,
}

impl Default for ResourceQuery {
    fn default() -> Self {
        Self {
            scope: NamespaceScope::Current,
            kinds: Vec::new(),
            exclude_owned: true,
        }
    }
}

impl ResourceQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from the configured ownership policy
    pub fn from_config(config: &Config) -> Self {
        Self::default().exclude_owned(config.exclude_owned)
    }

    #[must_use]
    pub fn namespace(&self, namespace: impl Into<String>) -> Self {
        Self {
            scope: NamespaceScope::Named(namespace.into()),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn all_namespaces(&self) -> Self {
        Self {
            scope: NamespaceScope::All,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn current_namespace(&self) -> Self {
        Self {
            scope: NamespaceScope::Current,
            ..self.clone()
        }
    }

    /// Restrict to a comma-separated kind list (e.g., "cm,pods")
    #[must_use]
    pub fn resources(&self, kinds: &str) -> Self {
        Self {
            kinds: kinds
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(String::from)
                .collect(),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn exclude_owned(&self, exclude: bool) -> Self {
        Self {
            exclude_owned: exclude,
            ..self.clone()
        }
    }

    pub fn scope(&self) -> &NamespaceScope {
        &self.scope
    }

    pub fn kinds(&self) -> &[String] {
        &self.kinds
    }

    pub fn excludes_owned(&self) -> bool {
        self.exclude_owned
    }

    /// Namespace for single-object lookups; `All` falls back to the current one
    pub fn target_namespace<'a>(&'a self, current: &'a str) -> &'a str {
        match &self.scope {
            NamespaceScope::Named(ns) => ns,
            NamespaceScope::Current | NamespaceScope::All => current,
        }
    }
}
