// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Node, Pod};
use kube::api::{DeleteParams, DynamicObject, ListParams, LogParams, ObjectList, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::ClusterApi;
use super::discovery::{KindDescriptor, descriptors_from_resource_list};
use crate::error::{Error, Result};

/// Timeout for connecting to K8s API
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for reading K8s API responses
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum retry attempts for transient failures
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (doubles each retry)
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Page size for paginated list requests
/// Smaller pages reduce memory pressure and allow faster initial response
const PAGE_SIZE: u32 = 500;

/// Map a kube error onto the scanner taxonomy
pub(crate) fn classify(err: kube::Error) -> Error {
    match err {
        kube::Error::Api(resp) if resp.code == 401 => Error::ClusterUnavailable(resp.message),
        kube::Error::Api(resp) => Error::Api {
            code: resp.code,
            message: resp.message,
        },
        e @ (kube::Error::HyperError(_)
        | kube::Error::Service(_)
        | kube::Error::Auth(_)
        | kube::Error::InferConfig(_)) => Error::ClusterUnavailable(e.to_string()),
        other => Error::Api {
            code: 0,
            message: other.to_string(),
        },
    }
}

/// Check if an error is retryable (transient failures)
fn is_retryable_error(err: &kube::Error) -> bool {
    match err {
        // Network/connection errors are retryable
        kube::Error::HyperError(_) => true,
        // API errors: retry on 429 (rate limit), 503 (unavailable), 504 (timeout)
        kube::Error::Api(api_err) => matches!(api_err.code, 429 | 503 | 504),
        _ => false,
    }
}

/// Cluster connection backed by a kube client
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    namespace: String,
}

impl KubeCluster {
    /// Connect using kubeconfig (optionally a specific context), or in-cluster config
    pub async fn connect(context: Option<&str>) -> Result<Self> {
        let mut config = match Kubeconfig::read() {
            Ok(kubeconfig) => {
                if let Some(ctx) = context
                    && !kubeconfig.contexts.iter().any(|c| c.name == ctx)
                {
                    return Err(Error::ClusterUnavailable(format!(
                        "Context '{}' not found in kubeconfig",
                        ctx
                    )));
                }
                Config::from_custom_kubeconfig(
                    kubeconfig,
                    &KubeConfigOptions {
                        context: context.map(String::from),
                        ..Default::default()
                    },
                )
                .await
                .map_err(|e| {
                    Error::ClusterUnavailable(format!("Failed to load kubeconfig: {}", e))
                })?
            }
            Err(e) => {
                debug!(error = %e, "No usable kubeconfig, trying in-cluster config");
                Config::incluster().map_err(|e| {
                    Error::ClusterUnavailable(format!("No cluster configuration found: {}", e))
                })?
            }
        };

        // Set timeouts for reliability
        config.connect_timeout = Some(CONNECT_TIMEOUT);
        config.read_timeout = Some(READ_TIMEOUT);

        let namespace = config.default_namespace.clone();
        let client = Client::try_from(config).map_err(classify)?;

        info!(namespace = %namespace, "Connected to Kubernetes API");
        Ok(Self::from_client(client, namespace))
    }

    pub fn from_client(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn dynamic_api(&self, kind: &KindDescriptor, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = kind.api_resource();
        match namespace {
            Some(ns) if kind.namespaced => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        }
    }

    /// List resources with pagination and retry logic
    /// Uses continue tokens to fetch all pages
    async fn list_with_retry(
        &self,
        api: &Api<DynamicObject>,
        kind: &str,
    ) -> Result<Vec<DynamicObject>> {
        let mut all_items: Vec<DynamicObject> = Vec::new();
        let mut continue_token: Option<String> = None;
        let mut page_count = 0u32;

        loop {
            let mut params = ListParams::default().limit(PAGE_SIZE);
            if let Some(ref token) = continue_token {
                params = params.continue_token(token);
            }

            let list = self.list_page_with_retry(api, &params, kind).await?;

            let items_count = list.items.len();
            all_items.extend(list.items);
            page_count += 1;

            match list.metadata.continue_ {
                Some(token) if !token.is_empty() => {
                    debug!(
                        kind = %kind,
                        page = page_count,
                        items_this_page = items_count,
                        total_so_far = all_items.len(),
                        "Fetched page, continuing"
                    );
                    continue_token = Some(token);
                }
                _ => break,
            }
        }

        Ok(all_items)
    }

    /// Fetch a single page with retry logic
    async fn list_page_with_retry(
        &self,
        api: &Api<DynamicObject>,
        params: &ListParams,
        kind: &str,
    ) -> Result<ObjectList<DynamicObject>> {
        let mut attempt = 0;
        loop {
            match api.list(params).await {
                Ok(list) => return Ok(list),
                Err(e) if is_retryable_error(&e) && attempt + 1 < MAX_RETRIES => {
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt);
                    warn!(
                        kind = %kind,
                        attempt = attempt + 1,
                        max_attempts = MAX_RETRIES,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Retryable error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    debug!(kind = %kind, error = %e, "List failed");
                    return Err(classify(e));
                }
            }
        }
    }

    /// Resources of one named group at its preferred version
    async fn discover_group(&self, group_version: &str) -> Result<Vec<KindDescriptor>> {
        let list = self
            .client
            .list_api_group_resources(group_version)
            .await
            .map_err(classify)?;
        Ok(descriptors_from_resource_list(&list))
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    fn current_namespace(&self) -> &str {
        &self.namespace
    }

    async fn discover(&self) -> Result<Vec<KindDescriptor>> {
        let mut descriptors = Vec::new();

        // Core legacy group has its own endpoint
        let core = self
            .client
            .list_core_api_versions()
            .await
            .map_err(classify)?;
        for version in &core.versions {
            let list = self
                .client
                .list_core_api_resources(version)
                .await
                .map_err(classify)?;
            descriptors.extend(descriptors_from_resource_list(&list));
        }

        let groups = self.client.list_api_groups().await.map_err(classify)?;
        let group_versions: Vec<String> = groups
            .groups
            .iter()
            .filter_map(|g| {
                g.preferred_version
                    .as_ref()
                    .or_else(|| g.versions.first())
                    .map(|v| v.group_version.clone())
            })
            .collect();

        let results =
            futures::future::join_all(group_versions.iter().map(|gv| self.discover_group(gv)))
                .await;

        for (gv, result) in group_versions.iter().zip(results) {
            match result {
                Ok(found) => descriptors.extend(found),
                Err(e) if e.is_fatal() => return Err(e),
                // Aggregated APIs (e.g. metrics) may be down; skip them like kubectl does
                Err(e) => warn!(group_version = %gv, error = %e, "Skipping API group"),
            }
        }

        debug!(kinds = descriptors.len(), "Discovery complete");
        Ok(descriptors)
    }

    async fn list(
        &self,
        kind: &KindDescriptor,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        debug!(
            kind = %kind.kind,
            group = %kind.group,
            version = %kind.version,
            namespace = ?namespace,
            "Fetching K8s resource"
        );
        let api = self.dynamic_api(kind, namespace);
        self.list_with_retry(&api, &kind.kind).await
    }

    async fn get(
        &self,
        kind: &KindDescriptor,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        let api = self.dynamic_api(kind, namespace);
        api.get_opt(name).await.map_err(classify)
    }

    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await.map_err(classify)?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await.map_err(classify)?;
        Ok(list.items)
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), pod)
            .await
            .map_err(classify)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).await.map_err(classify)
    }

    async fn pod_logs(&self, namespace: &str, name: &str) -> Result<String> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.logs(name, &LogParams::default())
            .await
            .map_err(classify)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(classify(e)),
        }
    }
}
