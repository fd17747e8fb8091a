// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Normalized artifact records built from heterogeneous cluster objects

pub mod bom;
pub mod lister;
pub mod ownership;
pub mod query;

use kube::api::DynamicObject;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub use bom::Bom;
pub use lister::{ArtifactLister, ScanReport};
pub use ownership::OwnershipResolver;
pub use query::{NamespaceScope, ResourceQuery};

/// Synthetic kind produced by node probing
pub const NODE_INFO_KIND: &str = "NodeInfo";

/// Container list fields that can appear in a pod spec
const CONTAINER_FIELDS: &[&str] = &["containers", "initContainers", "ephemeralContainers"];

/// Identity of an artifact within one scan
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactId {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{}", self.kind, self.name)
        } else {
            write!(f, "{}/{}/{}", self.namespace, self.kind, self.name)
        }
    }
}

/// Back-link to the controller that created an object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerRef {
    pub kind: String,
    pub name: String,
    pub uid: String,
}

/// One cluster object (or node report) in normalized form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    kind: String,
    name: String,
    namespace: String,
    images: Vec<String>,
    owner_references: Vec<OwnerRef>,
    raw_resource: Value,
}

impl Artifact {
    pub fn new(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        images: Vec<String>,
        owner_references: Vec<OwnerRef>,
        raw_resource: Value,
    ) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
            images,
            owner_references,
            raw_resource,
        }
    }

    /// Normalize a listed object
    ///
    /// `namespaced` decides whether the object's namespace is kept, so
    /// cluster-scoped objects always carry an empty namespace.
    pub fn from_object(kind: &str, namespaced: bool, object: DynamicObject) -> Self {
        let name = object.metadata.name.clone().unwrap_or_default();
        let namespace = if namespaced {
            object.metadata.namespace.clone().unwrap_or_default()
        } else {
            String::new()
        };
        let owner_references = object
            .metadata
            .owner_references
            .iter()
            .flatten()
            .map(|o| OwnerRef {
                kind: o.kind.clone(),
                name: o.name.clone(),
                uid: o.uid.clone(),
            })
            .collect();
        let images = object
            .data
            .get("spec")
            .map(extract_images)
            .unwrap_or_default();

        let mut raw = serde_json::to_value(&object).unwrap_or(Value::Null);
        // List responses omit per-item kind
        if let Value::Object(ref mut map) = raw {
            map.entry("kind")
                .or_insert_with(|| Value::String(kind.to_string()));
        }

        Self::new(kind, namespace, name, images, owner_references, raw)
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn images(&self) -> &[String] {
        &self.images
    }

    pub fn owner_references(&self) -> &[OwnerRef] {
        &self.owner_references
    }

    pub fn raw_resource(&self) -> &Value {
        &self.raw_resource
    }

    pub fn id(&self) -> ArtifactId {
        ArtifactId {
            kind: self.kind.clone(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    /// Sort key: kind, then namespace, then name
    pub(crate) fn sort_key(&self) -> (&str, &str, &str) {
        (&self.kind, &self.namespace, &self.name)
    }
}

/// Order artifacts by kind, then namespace, then name
pub fn sort_artifacts(artifacts: &mut [Artifact]) {
    artifacts.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
}

/// Collect container images from every pod spec nested under `spec`
///
/// Handles Pod (`spec`), workload templates (`spec.template.spec`) and
/// CronJob (`spec.jobTemplate.spec.template.spec`) without knowing the kind.
pub fn extract_images(spec: &Value) -> Vec<String> {
    let mut images = Vec::new();
    walk_pod_specs(spec, &mut images);
    images
}

fn walk_pod_specs(value: &Value, images: &mut Vec<String>) {
    let Value::Object(map) = value else {
        return;
    };

    for field in CONTAINER_FIELDS {
        if let Some(Value::Array(containers)) = map.get(*field) {
            images.extend(
                containers
                    .iter()
                    .filter_map(|c| c.get("image").and_then(Value::as_str))
                    .map(String::from),
            );
        }
    }

    for (key, child) in map {
        if CONTAINER_FIELDS.contains(&key.as_str()) {
            continue;
        }
        if child.is_object() {
            walk_pod_specs(child, images);
        }
    }
}
