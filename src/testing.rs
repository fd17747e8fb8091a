// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! In-memory cluster used by unit tests

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, NodeSpec, Pod, PodStatus, Taint};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::kubernetes::{ClusterApi, KindDescriptor};
use crate::nodeinfo::{PROBE_NODE_LABEL, untolerated_taint};

/// Descriptors for the kinds every cluster serves, from k8s-openapi type info
pub fn builtin_descriptors() -> Vec<KindDescriptor> {
    use k8s_openapi::api::{
        apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet},
        batch::v1::{CronJob, Job},
        core::v1::{ConfigMap, Event, Namespace, PersistentVolume, Secret, Service},
        networking::v1::Ingress,
    };
    use kube::Resource;

    let mut descriptors = Vec::new();

    macro_rules! add_kind {
        ($type:ty, namespaced, [$($short:expr),* $(,)?]) => {
            add_kind!(@inner $type, true, [$($short),*])
        };
        ($type:ty, cluster, [$($short:expr),* $(,)?]) => {
            add_kind!(@inner $type, false, [$($short),*])
        };
        (@inner $type:ty, $namespaced:expr, [$($short:expr),*]) => {
            descriptors.push(KindDescriptor {
                group: <$type>::group(&()).to_string(),
                version: <$type>::version(&()).to_string(),
                kind: <$type>::kind(&()).to_string(),
                plural: <$type>::plural(&()).to_string(),
                singular: <$type>::kind(&()).to_lowercase(),
                short_names: vec![$($short.to_string()),*],
                namespaced: $namespaced,
            })
        };
    }

    add_kind!(Pod, namespaced, ["po"]);
    add_kind!(Service, namespaced, ["svc"]);
    add_kind!(ConfigMap, namespaced, ["cm"]);
    add_kind!(Secret, namespaced, []);
    add_kind!(Event, namespaced, ["ev"]);
    add_kind!(Node, cluster, ["no"]);
    add_kind!(Namespace, cluster, ["ns"]);
    add_kind!(PersistentVolume, cluster, ["pv"]);
    add_kind!(Deployment, namespaced, ["deploy"]);
    add_kind!(StatefulSet, namespaced, ["sts"]);
    add_kind!(DaemonSet, namespaced, ["ds"]);
    add_kind!(ReplicaSet, namespaced, ["rs"]);
    add_kind!(Job, namespaced, []);
    add_kind!(CronJob, namespaced, ["cj"]);
    add_kind!(Ingress, namespaced, ["ing"]);

    descriptors
}

#[derive(Default)]
struct MockState {
    descriptors: Vec<KindDescriptor>,
    namespaces: Vec<String>,
    objects: Vec<Value>,
    nodes: Vec<Node>,
    list_delays: HashMap<String, u64>,
    forbidden: HashSet<(String, Option<String>)>,
    unavailable: HashSet<String>,
    list_calls: Vec<(String, Option<String>)>,
    stuck_nodes: HashSet<String>,
    crashing_nodes: HashSet<String>,
    undeletable_nodes: HashSet<String>,
    slow_delete_nodes: HashSet<String>,
    missing_namespaces: HashSet<String>,
    created: Vec<Pod>,
    /// (namespace, name) of probe pods still present
    live: BTreeMap<(String, String), Pod>,
}

/// Cluster double with shared state, so clones observe the same calls
#[derive(Clone)]
pub struct MockCluster {
    current: String,
    state: Arc<Mutex<MockState>>,
}

fn node(name: &str) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            uid: Some(format!("uid-{}", name)),
            ..Default::default()
        },
        spec: Some(NodeSpec::default()),
        ..Default::default()
    }
}

fn orion_objects() -> Vec<Value> {
    let template = json!({
        "metadata": {"labels": {"app": "orion"}},
        "spec": {"containers": [{"name": "orion", "image": "orion:2.0"}]}
    });
    let pod = |name: &str| {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": name,
                "namespace": "default",
                "uid": format!("uid-{}", name),
                "ownerReferences": [{
                    "apiVersion": "apps/v1",
                    "kind": "ReplicaSet",
                    "name": "orion-5f7",
                    "uid": "uid-orion-5f7",
                    "controller": true
                }]
            },
            "spec": {"containers": [{"name": "orion", "image": "orion:2.0"}]}
        })
    };

    vec![
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "orion", "namespace": "default", "uid": "uid-orion"},
            "spec": {"replicas": 2, "template": template}
        }),
        json!({
            "apiVersion": "apps/v1",
            "kind": "ReplicaSet",
            "metadata": {
                "name": "orion-5f7",
                "namespace": "default",
                "uid": "uid-orion-5f7",
                "ownerReferences": [{
                    "apiVersion": "apps/v1",
                    "kind": "Deployment",
                    "name": "orion",
                    "uid": "uid-orion",
                    "controller": true
                }]
            },
            "spec": {"replicas": 2, "template": template}
        }),
        pod("orion-5f7-a"),
        pod("orion-5f7-b"),
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "orion-settings", "namespace": "default", "uid": "uid-cm"},
            "data": {"mode": "fast"}
        }),
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "coredns-0", "namespace": "kube-system", "uid": "uid-coredns"},
            "spec": {"containers": [{"name": "coredns", "image": "coredns:1.11"}]}
        }),
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "prometheus-0", "namespace": "monitoring", "uid": "uid-prom"},
            "spec": {
                "initContainers": [{"name": "init", "image": "busybox:1.36"}],
                "containers": [{"name": "prometheus", "image": "prometheus:2.53"}]
            }
        }),
    ]
}

fn to_dynamic(value: &Value) -> Result<DynamicObject> {
    serde_json::from_value(value.clone()).map_err(|e| Error::Api {
        code: 0,
        message: e.to_string(),
    })
}

fn object_matches(value: &Value, kind: &str, namespace: Option<&str>) -> bool {
    value["kind"] == kind
        && namespace.is_none_or(|ns| value["metadata"]["namespace"].as_str() == Some(ns))
}

impl MockCluster {
    /// Empty cluster with the builtin kinds, three namespaces and three nodes
    pub fn with_nodes() -> Self {
        let state = MockState {
            descriptors: builtin_descriptors(),
            namespaces: vec![
                "default".to_string(),
                "kube-system".to_string(),
                "monitoring".to_string(),
            ],
            nodes: vec![node("node-a"), node("node-b"), node("node-c")],
            ..Default::default()
        };
        Self {
            current: "default".to_string(),
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Deployment `orion` with its ReplicaSet and two pods in `default`
    pub fn with_orion() -> Self {
        let cluster = Self::with_nodes();
        cluster.state().objects = orion_objects();
        cluster
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn current(mut self, namespace: &str) -> Self {
        self.current = namespace.to_string();
        self
    }

    pub fn with_list_delay(self, kind: &str, millis: u64) -> Self {
        self.state().list_delays.insert(kind.to_string(), millis);
        self
    }

    /// List of `kind` in `namespace` answers 403
    pub fn forbid(self, kind: &str, namespace: Option<&str>) -> Self {
        self.state()
            .forbidden
            .insert((kind.to_string(), namespace.map(String::from)));
        self
    }

    /// List of `kind` fails as if the connection dropped
    pub fn unavailable_for(self, kind: &str) -> Self {
        self.state().unavailable.insert(kind.to_string());
        self
    }

    pub fn taint_node(self, node: &str, key: &str, value: Option<&str>, effect: &str) -> Self {
        {
            let mut state = self.state();
            if let Some(spec) = state
                .nodes
                .iter_mut()
                .find(|n| n.metadata.name.as_deref() == Some(node))
                .and_then(|n| n.spec.as_mut())
            {
                spec.taints.get_or_insert_with(Vec::new).push(Taint {
                    key: key.to_string(),
                    value: value.map(String::from),
                    effect: effect.to_string(),
                    ..Default::default()
                });
            }
        }
        self
    }

    /// Probes on this node never leave Pending
    pub fn stuck_node(self, node: &str) -> Self {
        self.state().stuck_nodes.insert(node.to_string());
        self
    }

    /// Probes on this node end in phase Failed
    pub fn crashing_node(self, node: &str) -> Self {
        self.state().crashing_nodes.insert(node.to_string());
        self
    }

    /// Deleting probes on this node fails
    pub fn undeletable_node(self, node: &str) -> Self {
        self.state().undeletable_nodes.insert(node.to_string());
        self
    }

    /// Deleting probes on this node never returns
    pub fn slow_delete_node(self, node: &str) -> Self {
        self.state().slow_delete_nodes.insert(node.to_string());
        self
    }

    /// Pod creation in this namespace answers 404
    pub fn missing_namespace(self, namespace: &str) -> Self {
        self.state().missing_namespaces.insert(namespace.to_string());
        self
    }

    pub fn list_calls(&self) -> Vec<(String, Option<String>)> {
        self.state().list_calls.clone()
    }

    pub fn created_pods(&self) -> Vec<Pod> {
        self.state().created.clone()
    }

    /// Names of probe pods not yet deleted
    pub fn live_pods(&self) -> Vec<String> {
        self.state().live.keys().map(|(_, name)| name.clone()).collect()
    }
}

fn probe_node(pod: &Pod) -> String {
    pod.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(PROBE_NODE_LABEL))
        .cloned()
        .unwrap_or_default()
}

#[async_trait]
impl ClusterApi for MockCluster {
    fn current_namespace(&self) -> &str {
        &self.current
    }

    async fn discover(&self) -> Result<Vec<KindDescriptor>> {
        Ok(self.state().descriptors.clone())
    }

    async fn list(
        &self,
        kind: &KindDescriptor,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        let delay = {
            let mut state = self.state();
            state
                .list_calls
                .push((kind.kind.clone(), namespace.map(String::from)));
            if state.unavailable.contains(&kind.kind) {
                return Err(Error::ClusterUnavailable("connection refused".to_string()));
            }
            if state
                .forbidden
                .contains(&(kind.kind.clone(), namespace.map(String::from)))
            {
                return Err(Error::Api {
                    code: 403,
                    message: format!("{} is forbidden", kind.plural),
                });
            }
            state.list_delays.get(&kind.kind).copied()
        };
        if let Some(millis) = delay {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }

        let state = self.state();
        if kind.kind == "Node" {
            return state
                .nodes
                .iter()
                .map(|n| {
                    let value = serde_json::to_value(n).map_err(|e| Error::Api {
                        code: 0,
                        message: e.to_string(),
                    })?;
                    to_dynamic(&value)
                })
                .collect();
        }
        state
            .objects
            .iter()
            .filter(|o| object_matches(o, &kind.kind, namespace))
            .map(to_dynamic)
            .collect()
    }

    async fn get(
        &self,
        kind: &KindDescriptor,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        let state = self.state();
        state
            .objects
            .iter()
            .find(|o| object_matches(o, &kind.kind, namespace) && o["metadata"]["name"] == name)
            .map(to_dynamic)
            .transpose()
    }

    async fn list_namespaces(&self) -> Result<Vec<String>> {
        Ok(self.state().namespaces.clone())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.state().nodes.clone())
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod> {
        let mut state = self.state();
        if state.missing_namespaces.contains(namespace) {
            return Err(Error::Api {
                code: 404,
                message: format!("namespaces \"{}\" not found", namespace),
            });
        }

        let name = pod.metadata.name.clone().unwrap_or_default();
        if state
            .live
            .contains_key(&(namespace.to_string(), name.clone()))
        {
            return Err(Error::Api {
                code: 409,
                message: format!("pods \"{}\" already exists", name),
            });
        }

        let node_name = probe_node(pod);
        let tolerations = pod
            .spec
            .as_ref()
            .and_then(|s| s.tolerations.clone())
            .unwrap_or_default();
        let schedulable = state
            .nodes
            .iter()
            .find(|n| n.metadata.name.as_deref() == Some(node_name.as_str()))
            .is_some_and(|n| untolerated_taint(n, &tolerations).is_none());

        let (phase, reason) = if !schedulable || state.stuck_nodes.contains(&node_name) {
            ("Pending", None)
        } else if state.crashing_nodes.contains(&node_name) {
            ("Failed", Some("Error".to_string()))
        } else {
            ("Succeeded", None)
        };

        let mut stored = pod.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.status = Some(PodStatus {
            phase: Some(phase.to_string()),
            reason,
            ..Default::default()
        });

        state.created.push(stored.clone());
        state
            .live
            .insert((namespace.to_string(), name), stored.clone());
        Ok(stored)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        Ok(self
            .state()
            .live
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn pod_logs(&self, namespace: &str, name: &str) -> Result<String> {
        let state = self.state();
        let pod = state
            .live
            .get(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| Error::Api {
                code: 404,
                message: format!("pods \"{}\" not found", name),
            })?;
        Ok(json!({
            "node": probe_node(pod),
            "kubeletVersion": "v1.30.1",
        })
        .to_string())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let key = (namespace.to_string(), name.to_string());
        let hangs = {
            let state = self.state();
            state
                .live
                .get(&key)
                .is_some_and(|pod| state.slow_delete_nodes.contains(&probe_node(pod)))
        };
        if hangs {
            std::future::pending::<()>().await;
        }

        let mut state = self.state();
        let Some(pod) = state.live.get(&key) else {
            return Ok(());
        };
        if state.undeletable_nodes.contains(&probe_node(pod)) {
            return Err(Error::Api {
                code: 500,
                message: "etcdserver: request timed out".to_string(),
            });
        }
        state.live.remove(&key);
        Ok(())
    }
}
