// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Kubernetes artifact discovery and normalization
//!
//! Lists cluster objects as [`Artifact`]s, drops those owned by other listed
//! objects, collects host-level node information through short-lived probe
//! pods, and aggregates container images into a [`Bom`].

pub mod artifacts;
mod cancel;
pub mod config;
pub mod error;
pub mod kubernetes;
pub mod nodeinfo;
pub mod progress;
#[cfg(test)]
mod testing;

pub use artifacts::{
    Artifact, ArtifactId, ArtifactLister, Bom, NamespaceScope, OwnershipResolver, ResourceQuery,
    ScanReport,
};
pub use config::Config;
pub use error::{Error, Result};
pub use kubernetes::{ClusterApi, KindDescriptor, KubeCluster, ResourceCatalog};
pub use nodeinfo::{NodeCollection, NodeInfoCollector, NodeProbeSpec};
