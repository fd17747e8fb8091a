// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Execute a [`ResourceQuery`] against the cluster and normalize the results

use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Artifact, Bom, NamespaceScope, OwnershipResolver, ResourceQuery, sort_artifacts};
use crate::cancel::cancellable;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::kubernetes::{ClusterApi, KindDescriptor, ResourceCatalog};
use crate::progress::{ProgressHandle, create_progress_handle};

/// Result of a listing, including the units that could not be fetched
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub artifacts: Vec<Artifact>,
    /// `PartialListFailure` entries for skipped kind/namespace combinations
    pub failures: Vec<Error>,
}

/// One list call: a kind in a namespace, or cluster-wide when `None`
type ListUnit = (KindDescriptor, Option<String>);

pub struct ArtifactLister {
    cluster: Arc<dyn ClusterApi>,
    max_concurrency: usize,
    progress: ProgressHandle,
}

impl ArtifactLister {
    pub fn new(cluster: Arc<dyn ClusterApi>, config: &Config) -> Self {
        Self {
            cluster,
            max_concurrency: config.max_concurrency.max(1),
            progress: create_progress_handle(),
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: ProgressHandle) -> Self {
        self.progress = progress;
        self
    }

    pub fn progress(&self) -> &ProgressHandle {
        &self.progress
    }

    /// Discover the kinds the server currently advertises
    pub async fn catalog(&self, cancel: &CancellationToken) -> Result<ResourceCatalog> {
        self.progress.discovering();
        let start = Instant::now();
        let descriptors = cancellable(cancel, self.cluster.discover()).await?;
        let catalog = ResourceCatalog::new(descriptors);
        self.progress
            .discovery_complete(catalog.len(), start.elapsed().as_millis() as u64);
        Ok(catalog)
    }

    /// List artifacts, logging and dropping per-unit failures
    pub async fn list(
        &self,
        query: &ResourceQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<Artifact>> {
        let report = self.list_report(query, cancel).await?;
        Ok(report.artifacts)
    }

    /// List artifacts and return the failures alongside them
    pub async fn list_report(
        &self,
        query: &ResourceQuery,
        cancel: &CancellationToken,
    ) -> Result<ScanReport> {
        let catalog = self.catalog(cancel).await?;

        let kinds = if query.kinds().is_empty() {
            catalog.listable(query.scope() != &NamespaceScope::All)
        } else {
            catalog.resolve(query.kinds())?
        };

        let units = self.plan_units(&kinds, query.scope(), cancel).await?;
        info!(
            kinds = kinds.len(),
            units = units.len(),
            scope = ?query.scope(),
            "Listing artifacts"
        );
        self.progress.start_scan(units.len());

        let cluster = &self.cluster;
        let mut results = futures::stream::iter(units)
            .map(|(kind, namespace)| async move {
                let result = cluster.list(&kind, namespace.as_deref()).await;
                (kind, namespace, result)
            })
            .buffer_unordered(self.max_concurrency);

        let mut report = ScanReport::default();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                next = results.next() => next,
            };
            let Some((kind, namespace, result)) = next else {
                break;
            };

            match result {
                Ok(objects) => {
                    self.progress
                        .unit_complete(&kind.kind, namespace.as_deref(), objects.len());
                    report.artifacts.extend(
                        objects
                            .into_iter()
                            .map(|obj| Artifact::from_object(&kind.kind, kind.namespaced, obj)),
                    );
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(
                        kind = %kind.kind,
                        namespace = ?namespace,
                        error = %e,
                        "Skipping resource list"
                    );
                    self.progress.unit_complete(&kind.kind, namespace.as_deref(), 0);
                    report.failures.push(Error::PartialListFailure {
                        kind: kind.kind.clone(),
                        namespace,
                        message: e.to_string(),
                    });
                }
            }
        }

        sort_artifacts(&mut report.artifacts);
        // Same kind served by two groups (e.g. core and events.k8s.io Event)
        report
            .artifacts
            .dedup_by(|a, b| a.sort_key() == b.sort_key());

        if query.excludes_owned() {
            let before = report.artifacts.len();
            report.artifacts = OwnershipResolver::filter(report.artifacts);
            debug!(
                before = before,
                after = report.artifacts.len(),
                "Excluded owned artifacts"
            );
        }

        Ok(report)
    }

    /// Expand kinds and scope into individual list calls
    async fn plan_units(
        &self,
        kinds: &[KindDescriptor],
        scope: &NamespaceScope,
        cancel: &CancellationToken,
    ) -> Result<Vec<ListUnit>> {
        let namespaces: Option<Vec<String>> = match scope {
            NamespaceScope::Current => Some(vec![self.cluster.current_namespace().to_string()]),
            NamespaceScope::Named(ns) => Some(vec![ns.clone()]),
            NamespaceScope::All if kinds.iter().any(|k| k.namespaced) => {
                match cancellable(cancel, self.cluster.list_namespaces()).await {
                    Ok(mut namespaces) => {
                        namespaces.sort();
                        Some(namespaces)
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    // Fall back to one cluster-wide call per kind
                    Err(e) => {
                        warn!(error = %e, "Cannot enumerate namespaces, listing cluster-wide");
                        None
                    }
                }
            }
            NamespaceScope::All => Some(Vec::new()),
        };

        let mut units = Vec::new();
        for kind in kinds {
            match (&namespaces, kind.namespaced) {
                (Some(namespaces), true) => {
                    units.extend(namespaces.iter().map(|ns| (kind.clone(), Some(ns.clone()))));
                }
                _ => units.push((kind.clone(), None)),
            }
        }
        Ok(units)
    }

    /// Fetch a single artifact by kind and name
    pub async fn get(
        &self,
        query: &ResourceQuery,
        kind: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Artifact> {
        let catalog = self.catalog(cancel).await?;
        let descriptor = catalog
            .get(kind)
            .ok_or_else(|| Error::UnknownResourceKind(kind.to_string()))?;

        let namespace = descriptor
            .namespaced
            .then(|| query.target_namespace(self.cluster.current_namespace()));

        let not_found = || Error::NotFound {
            kind: descriptor.kind.clone(),
            namespace: namespace.map(String::from),
            name: name.to_string(),
        };

        match cancellable(cancel, self.cluster.get(descriptor, namespace, name)).await {
            Ok(Some(object)) => Ok(Artifact::from_object(
                &descriptor.kind,
                descriptor.namespaced,
                object,
            )),
            Ok(None) => Err(not_found()),
            Err(e) if e.is_not_found() => Err(not_found()),
            Err(e) => Err(e),
        }
    }

    /// List artifacts and aggregate their images
    pub async fn list_bom(&self, query: &ResourceQuery, cancel: &CancellationToken) -> Result<Bom> {
        let artifacts = self.list(query, cancel).await?;
        Ok(Bom::aggregate(&artifacts))
    }
}
