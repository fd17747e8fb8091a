// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Host-level information gathered by short-lived probe pods, one per node.
//!
//! Every probe that may have been created is recorded on a cleanup stack
//! before the create call is issued, and the stack is drained on every exit
//! path with its own grace period.

mod probe;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use k8s_openapi::api::core::v1::Pod;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use probe::{
    NodeProbeSpec, PROBE_NODE_LABEL, default_tolerations, probe_name, tolerates,
    untolerated_taint,
};

use crate::artifacts::{Artifact, NODE_INFO_KIND};
use crate::cancel::cancellable;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::kubernetes::ClusterApi;
use crate::progress::{ProgressHandle, create_progress_handle};

/// Outcome of one node collection run
#[derive(Debug, Clone, Default)]
pub struct NodeCollection {
    /// One `NodeInfo` artifact per node that reported, sorted by node name
    pub artifacts: Vec<Artifact>,
    /// Per-node timeouts and failures
    pub failures: Vec<Error>,
    /// `namespace/name` of probes that could not be deleted
    pub leaked: Vec<String>,
}

/// Probe names that may exist on the cluster and must be deleted
struct CleanupStack {
    namespace: String,
    pending: Mutex<Vec<String>>,
}

impl CleanupStack {
    fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            pending: Mutex::new(Vec::new()),
        }
    }

    fn push(&self, name: &str) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.push(name.to_string());
        }
    }

    /// The create call definitely did not make the pod
    ///
    /// Drops one entry only: an earlier push of the same name may belong to a
    /// pod that does exist.
    fn forget(&self, name: &str) {
        if let Ok(mut pending) = self.pending.lock()
            && let Some(pos) = pending.iter().rposition(|n| n == name)
        {
            pending.remove(pos);
        }
    }

    fn take(&self) -> Vec<String> {
        self.pending
            .lock()
            .map(|mut pending| std::mem::take(&mut *pending))
            .unwrap_or_default()
    }

    /// Delete everything recorded; returns (deleted, leaked)
    ///
    /// Not tied to the caller's cancellation token; bounded by `grace` instead.
    async fn release(&self, cluster: &dyn ClusterApi, grace: Duration) -> (usize, Vec<String>) {
        let names = self.take();
        if names.is_empty() {
            return (0, Vec::new());
        }

        let mut deletes: FuturesUnordered<_> = names
            .iter()
            .map(|name| async move {
                let result = cluster.delete_pod(&self.namespace, name).await;
                (name, result)
            })
            .collect();

        let mut finished: HashSet<&str> = HashSet::new();
        let mut leaked = Vec::new();
        let mut deleted = 0;
        let drain = async {
            while let Some((name, result)) = deletes.next().await {
                finished.insert(name.as_str());
                match result {
                    Ok(()) => deleted += 1,
                    Err(e) => {
                        warn!(
                            namespace = %self.namespace,
                            pod = %name,
                            error = %e,
                            "Failed to delete probe"
                        );
                        leaked.push(format!("{}/{}", self.namespace, name));
                    }
                }
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!(
                namespace = %self.namespace,
                grace = ?grace,
                "Probe cleanup exceeded grace period"
            );
            leaked.extend(
                names
                    .iter()
                    .filter(|n| !finished.contains(n.as_str()))
                    .map(|n| format!("{}/{}", self.namespace, n)),
            );
        }
        (deleted, leaked)
    }
}

/// Result of running the probe for one node
enum ProbeOutcome {
    Collected(Artifact),
    /// Create call failed; nothing runs on this node
    NotCreated(Error),
    Failed(Error),
}

pub struct NodeInfoCollector {
    cluster: Arc<dyn ClusterApi>,
    max_concurrency: usize,
    timeout: Duration,
    poll_interval: Duration,
    cleanup_grace: Duration,
    progress: ProgressHandle,
}

impl NodeInfoCollector {
    pub fn new(cluster: Arc<dyn ClusterApi>, config: &Config) -> Self {
        Self {
            cluster,
            max_concurrency: config.max_concurrency.max(1),
            timeout: config.probe.timeout(),
            poll_interval: config.probe.poll_interval(),
            cleanup_grace: config.probe.cleanup_grace(),
            progress: create_progress_handle(),
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: ProgressHandle) -> Self {
        self.progress = progress;
        self
    }

    /// Collect node reports, logging per-node failures and leaked probes
    pub async fn collect(
        &self,
        spec: &NodeProbeSpec,
        cancel: &CancellationToken,
    ) -> Result<Vec<Artifact>> {
        Ok(self.collect_report(spec, cancel).await?.artifacts)
    }

    pub async fn collect_report(
        &self,
        spec: &NodeProbeSpec,
        cancel: &CancellationToken,
    ) -> Result<NodeCollection> {
        let namespace = spec
            .namespace
            .clone()
            .unwrap_or_else(|| self.cluster.current_namespace().to_string());

        let nodes = cancellable(cancel, self.cluster.list_nodes()).await?;
        let mut failures = Vec::new();
        let mut targets = Vec::new();
        for node in &nodes {
            let Some(name) = node.metadata.name.clone() else {
                continue;
            };
            if let Some(taint) = untolerated_taint(node, &spec.tolerations) {
                debug!(node = %name, taint = %taint.key, "Skipping node with untolerated taint");
                failures.push(Error::NodeProbeFailed {
                    node: name,
                    reason: format!("untolerated taint {}:{}", taint.key, taint.effect),
                });
                continue;
            }
            targets.push(name);
        }

        info!(
            nodes = nodes.len(),
            probes = targets.len(),
            namespace = %namespace,
            "Collecting node info"
        );

        let cleanup = CleanupStack::new(&namespace);
        let outcome = cancellable(
            cancel,
            self.run_probes(spec, &namespace, &targets, &cleanup),
        )
        .await;

        let (deleted, leaked) = cleanup.release(&*self.cluster, self.cleanup_grace).await;
        self.progress.cleanup_complete(deleted, leaked.len());
        if !leaked.is_empty() {
            let err = Error::CleanupFailure {
                leaked: leaked.clone(),
            };
            error!(error = %err, "Probe resources left on the cluster");
        }

        let (mut artifacts, probe_failures) = outcome?;
        failures.extend(probe_failures);
        for failure in &failures {
            warn!(error = %failure, "Node omitted from results");
        }
        artifacts.sort_by(|a, b| a.name().cmp(b.name()));

        Ok(NodeCollection {
            artifacts,
            failures,
            leaked,
        })
    }

    async fn run_probes(
        &self,
        spec: &NodeProbeSpec,
        namespace: &str,
        targets: &[String],
        cleanup: &CleanupStack,
    ) -> Result<(Vec<Artifact>, Vec<Error>)> {
        let mut results = futures::stream::iter(targets.iter().enumerate())
            .map(|(index, node)| async move {
                let pod = spec.pod_for(index, node, namespace);
                self.probe_node(node, namespace, pod, cleanup).await
            })
            .buffer_unordered(self.max_concurrency);

        let mut artifacts = Vec::new();
        let mut failures = Vec::new();
        let mut creation_errors = Vec::new();
        let mut created = 0usize;

        while let Some(outcome) = results.next().await {
            match outcome? {
                ProbeOutcome::Collected(artifact) => {
                    created += 1;
                    artifacts.push(artifact);
                }
                ProbeOutcome::Failed(e) => {
                    created += 1;
                    failures.push(e);
                }
                ProbeOutcome::NotCreated(e) => creation_errors.push(e),
            }
        }
        self.progress.probes_created(created);

        if created == 0
            && let Some(first) = creation_errors.first()
        {
            // e.g. target namespace missing; nothing could run anywhere
            return Err(first.clone());
        }
        failures.extend(creation_errors);

        Ok((artifacts, failures))
    }

    /// Create, await and harvest the probe for one node
    async fn probe_node(
        &self,
        node: &str,
        namespace: &str,
        pod: Pod,
        cleanup: &CleanupStack,
    ) -> Result<ProbeOutcome> {
        let name = pod.metadata.name.clone().unwrap_or_default();

        // Record first: a cancelled create may still land on the server
        cleanup.push(&name);
        match self.cluster.create_pod(namespace, &pod).await {
            Ok(_) => debug!(node = %node, pod = %name, "Probe created"),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                if matches!(e, Error::Api { .. }) {
                    cleanup.forget(&name);
                }
                warn!(node = %node, error = %e, "Failed to create probe");
                return Ok(ProbeOutcome::NotCreated(Error::NodeProbeFailed {
                    node: node.to_string(),
                    reason: e.to_string(),
                }));
            }
        }

        let outcome = match self.wait_for_probe(node, namespace, &name).await {
            Ok(()) => match self.cluster.pod_logs(namespace, &name).await {
                Ok(output) => ProbeOutcome::Collected(node_info_artifact(node, &output)),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => ProbeOutcome::Failed(Error::NodeProbeFailed {
                    node: node.to_string(),
                    reason: format!("cannot read probe output: {}", e),
                }),
            },
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => ProbeOutcome::Failed(e),
        };

        self.progress
            .probe_complete(node, matches!(outcome, ProbeOutcome::Collected(_)));
        Ok(outcome)
    }

    /// Poll until the probe finishes or the deadline passes
    async fn wait_for_probe(&self, node: &str, namespace: &str, name: &str) -> Result<()> {
        match tokio::time::timeout(self.timeout, self.poll_probe(node, namespace, name)).await {
            Ok(result) => result,
            Err(_) => Err(Error::NodeProbeTimeout {
                node: node.to_string(),
                timeout: self.timeout,
            }),
        }
    }

    async fn poll_probe(&self, node: &str, namespace: &str, name: &str) -> Result<()> {
        loop {
            let pod = self
                .cluster
                .get_pod(namespace, name)
                .await?
                .ok_or_else(|| Error::NodeProbeFailed {
                    node: node.to_string(),
                    reason: "probe pod disappeared".to_string(),
                })?;
            let status = pod.status.as_ref();
            match status.and_then(|s| s.phase.as_deref()) {
                Some("Succeeded") => return Ok(()),
                Some("Failed") => {
                    let reason = status
                        .and_then(|s| s.reason.clone().or_else(|| s.message.clone()))
                        .unwrap_or_else(|| "probe pod failed".to_string());
                    return Err(Error::NodeProbeFailed {
                        node: node.to_string(),
                        reason,
                    });
                }
                _ => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }
}

/// Wrap probe output as a `NodeInfo` artifact; non-JSON output is kept as a string
fn node_info_artifact(node: &str, output: &str) -> Artifact {
    let raw = serde_json::from_str::<Value>(output.trim())
        .unwrap_or_else(|_| Value::String(output.to_string()));
    Artifact::new(NODE_INFO_KIND, "", node, Vec::new(), Vec::new(), raw)
}
