// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Probe pod template and taint/toleration matching

use k8s_openapi::api::core::v1::{
    Affinity, Container, EnvVar, EnvVarSource, HostPathVolumeSource, Node, NodeAffinity,
    NodeSelector, NodeSelectorRequirement, NodeSelectorTerm, ObjectFieldSelector, Pod, PodSpec,
    SecurityContext, Taint, Toleration, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

use crate::config::ProbeConfig;

/// Label carrying the node a probe was pinned to
pub const PROBE_NODE_LABEL: &str = "k8sinv.io/probe-node";

const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Max length of a pod name (DNS-1123 label)
const MAX_NAME_LEN: usize = 63;

/// Read-only host paths exposed to the probe
const HOST_PATHS: &[(&str, &str)] = &[
    ("kubelet", "/var/lib/kubelet"),
    ("kubernetes", "/etc/kubernetes"),
];

/// Template for the per-node probe workloads
#[derive(Debug, Clone)]
pub struct NodeProbeSpec {
    pub name_prefix: String,
    /// Target namespace; the connection's current namespace when `None`
    pub namespace: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub tolerations: Vec<Toleration>,
    pub image: String,
    /// Image entrypoint is used when empty
    pub command: Vec<String>,
    /// Pod-side deadline so a leaked probe still terminates
    pub active_deadline_secs: Option<i64>,
}

impl NodeProbeSpec {
    pub fn from_config(name_prefix: impl Into<String>, config: &ProbeConfig) -> Self {
        Self {
            name_prefix: name_prefix.into(),
            namespace: config.namespace.clone(),
            labels: BTreeMap::new(),
            tolerations: default_tolerations(),
            image: config.image.clone(),
            command: config.command.clone(),
            active_deadline_secs: i64::try_from(config.timeout_secs).ok(),
        }
    }

    #[must_use]
    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    #[must_use]
    pub fn with_tolerations(mut self, tolerations: Vec<Toleration>) -> Self {
        self.tolerations = tolerations;
        self
    }

    #[must_use]
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Build the probe pod pinned to `node`
    pub fn pod_for(&self, index: usize, node: &str, namespace: &str) -> Pod {
        let mut labels = self.labels.clone();
        labels.insert(PROBE_NODE_LABEL.to_string(), sanitize_label_value(node));
        labels.insert(MANAGED_BY_LABEL.to_string(), "k8sinv".to_string());

        let node_affinity = NodeAffinity {
            required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                node_selector_terms: vec![NodeSelectorTerm {
                    match_fields: Some(vec![NodeSelectorRequirement {
                        key: "metadata.name".to_string(),
                        operator: "In".to_string(),
                        values: Some(vec![node.to_string()]),
                    }]),
                    ..Default::default()
                }],
            }),
            ..Default::default()
        };

        let container = Container {
            name: "probe".to_string(),
            image: Some(self.image.clone()),
            command: (!self.command.is_empty()).then(|| self.command.clone()),
            env: Some(vec![EnvVar {
                name: "NODE_NAME".to_string(),
                value_from: Some(EnvVarSource {
                    field_ref: Some(ObjectFieldSelector {
                        field_path: "spec.nodeName".to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            security_context: Some(SecurityContext {
                read_only_root_filesystem: Some(true),
                allow_privilege_escalation: Some(false),
                ..Default::default()
            }),
            volume_mounts: Some(
                HOST_PATHS
                    .iter()
                    .map(|(name, path)| VolumeMount {
                        name: name.to_string(),
                        mount_path: path.to_string(),
                        read_only: Some(true),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        };

        Pod {
            metadata: ObjectMeta {
                name: Some(probe_name(&self.name_prefix, index, node)),
                namespace: Some(namespace.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: Some(PodSpec {
                restart_policy: Some("Never".to_string()),
                host_pid: Some(true),
                active_deadline_seconds: self.active_deadline_secs,
                affinity: Some(Affinity {
                    node_affinity: Some(node_affinity),
                    ..Default::default()
                }),
                tolerations: Some(self.tolerations.clone()),
                containers: vec![container],
                volumes: Some(
                    HOST_PATHS
                        .iter()
                        .map(|(name, path)| Volume {
                            name: name.to_string(),
                            host_path: Some(HostPathVolumeSource {
                                path: path.to_string(),
                                ..Default::default()
                            }),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// Tolerations that let a probe land on tainted, not-ready and unreachable nodes
pub fn default_tolerations() -> Vec<Toleration> {
    vec![
        Toleration {
            effect: Some("NoSchedule".to_string()),
            operator: Some("Exists".to_string()),
            ..Default::default()
        },
        Toleration {
            effect: Some("NoExecute".to_string()),
            operator: Some("Exists".to_string()),
            ..Default::default()
        },
        Toleration {
            effect: Some("NoExecute".to_string()),
            key: Some("node.kubernetes.io/not-ready".to_string()),
            operator: Some("Exists".to_string()),
            toleration_seconds: Some(300),
            ..Default::default()
        },
        Toleration {
            effect: Some("NoExecute".to_string()),
            key: Some("node.kubernetes.io/unreachable".to_string()),
            operator: Some("Exists".to_string()),
            toleration_seconds: Some(300),
            ..Default::default()
        },
    ]
}

/// Kubernetes toleration matching for a single taint
pub fn tolerates(toleration: &Toleration, taint: &Taint) -> bool {
    if let Some(effect) = toleration.effect.as_deref()
        && !effect.is_empty()
        && effect != taint.effect
    {
        return false;
    }

    let operator = toleration.operator.as_deref().unwrap_or("Equal");
    match toleration.key.as_deref().unwrap_or("") {
        // Empty key with Exists matches every taint
        "" => operator == "Exists",
        key if key != taint.key => false,
        _ => match operator {
            "Exists" => true,
            "Equal" => {
                toleration.value.as_deref().unwrap_or("") == taint.value.as_deref().unwrap_or("")
            }
            _ => false,
        },
    }
}

/// First scheduling-relevant taint on `node` that no toleration covers
pub fn untolerated_taint<'a>(node: &'a Node, tolerations: &[Toleration]) -> Option<&'a Taint> {
    node.spec
        .as_ref()
        .and_then(|s| s.taints.as_ref())
        .into_iter()
        .flatten()
        .filter(|t| t.effect == "NoSchedule" || t.effect == "NoExecute")
        .find(|taint| !tolerations.iter().any(|t| tolerates(t, taint)))
}

/// DNS-1123 safe probe name: `<prefix>-<index>-<node>`
///
/// Prefix and node are shortened to fit, the index never is, so names stay
/// unique within one run.
pub fn probe_name(prefix: &str, index: usize, node: &str) -> String {
    let prefix = dns_safe(prefix);
    let prefix = prefix.trim_start_matches('-');
    let node = dns_safe(node);
    let index = format!("-{}-", index);

    let budget = MAX_NAME_LEN.saturating_sub(index.len());
    let prefix_len = prefix
        .len()
        .min((budget / 2).max(budget.saturating_sub(node.len())));
    let node_len = budget - prefix_len;

    let mut name = format!("{}{}{}", &prefix[..prefix_len], index, truncate(&node, node_len));
    while name.ends_with('-') {
        name.pop();
    }
    name
}

/// Lowercase ASCII with every other character replaced by `-`
fn dns_safe(value: &str) -> String {
    value
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

fn truncate(value: &str, len: usize) -> &str {
    &value[..value.len().min(len)]
}

/// Node names may exceed the 63-char label value limit
fn sanitize_label_value(value: &str) -> String {
    let mut v: String = value.chars().take(MAX_NAME_LEN).collect();
    while v.ends_with(|c: char| !c.is_ascii_alphanumeric()) {
        v.pop();
    }
    v
}
