// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

mod client;
pub mod discovery;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::DynamicObject;

pub use client::KubeCluster;
pub use discovery::{KindDescriptor, ResourceCatalog};

use crate::error::Result;

/// Operations the scanner needs from a cluster connection
///
/// Implementations must be safe to call concurrently from many tasks.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Namespace used when a query does not name one
    fn current_namespace(&self) -> &str;

    /// Run server discovery and return every listable resource kind
    async fn discover(&self) -> Result<Vec<KindDescriptor>>;

    /// List objects of one kind; `None` namespace means cluster-wide
    async fn list(&self, kind: &KindDescriptor, namespace: Option<&str>)
    -> Result<Vec<DynamicObject>>;

    /// Fetch a single object, `Ok(None)` when absent
    async fn get(
        &self,
        kind: &KindDescriptor,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>>;

    async fn list_namespaces(&self) -> Result<Vec<String>>;

    async fn list_nodes(&self) -> Result<Vec<Node>>;

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>>;

    async fn pod_logs(&self, namespace: &str, name: &str) -> Result<String>;

    /// Delete a pod; deleting a pod that no longer exists succeeds
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;
}
