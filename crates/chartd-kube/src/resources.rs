//! Kubernetes resource operations for applying and deleting manifests
//!
//! [`ResourceManager`] works like `kubectl apply -f` / `kubectl delete -f`:
//! - Server-Side Apply for idempotent resource management
//! - Dynamic resource handling through API discovery, run on first use
//! - Ordering for creation (dependencies first) and deletion (reverse)
//! - `helm.sh/resource-policy: keep` honoured on delete
//!
//! [`MockResourceClient`] records what would have been applied.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{
    Client,
    api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams, PropagationPolicy},
    core::GroupVersionKind,
    discovery::{ApiCapabilities, ApiResource, Discovery, Scope},
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OnceCell;

use crate::error::{KubeError, Result};
use crate::manifest::{self, ManifestDocument, ResourceKey};

/// Field manager name for Server-Side Apply
pub const FIELD_MANAGER: &str = "chartd";

/// Summary of apply/delete operations
#[derive(Debug, Clone, Default)]
pub struct OperationSummary {
    /// Successfully processed resources
    pub succeeded: Vec<String>,
    /// Failed resources with errors
    pub failed: Vec<(String, String)>,
    /// Skipped resources (e.g., due to policy)
    pub skipped: Vec<(String, String)>,
}

impl OperationSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len() + self.skipped.len()
    }

    /// Format as human-readable summary
    pub fn summary(&self) -> String {
        let mut parts = Vec::with_capacity(3);
        if !self.succeeded.is_empty() {
            parts.push(format!("{} succeeded", self.succeeded.len()));
        }
        if !self.failed.is_empty() {
            parts.push(format!("{} failed", self.failed.len()));
        }
        if !self.skipped.is_empty() {
            parts.push(format!("{} skipped", self.skipped.len()));
        }
        if parts.is_empty() {
            "No resources processed".to_string()
        } else {
            parts.join(", ")
        }
    }

    /// Turn per-resource failures into an error
    pub fn into_result(self, operation: &str) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        let details = self
            .failed
            .iter()
            .map(|(name, err)| format!("{}: {}", name, err))
            .collect::<Vec<_>>()
            .join("; ");
        Err(KubeError::Resources {
            operation: operation.to_string(),
            details,
        })
    }
}

/// Cluster-side resource operations used by lifecycle actions
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Create the namespace unless it already exists
    async fn ensure_namespace(&self, namespace: &str) -> Result<()>;

    /// Apply every resource in a manifest, defaulting to `namespace`
    async fn apply_manifest(&self, namespace: &str, manifest: &str) -> Result<OperationSummary>;

    /// Delete every resource in a manifest that is not marked keep
    async fn delete_manifest(&self, namespace: &str, manifest: &str) -> Result<OperationSummary>;
}

/// Parsed resource ready for Kubernetes operations
struct ParsedResource {
    obj: DynamicObject,
    key: ResourceKey,
    api_resource: ApiResource,
    capabilities: ApiCapabilities,
}

/// Resource manager for applying and deleting Kubernetes resources
pub struct ResourceManager {
    client: Client,
    /// Filled on first apply or delete
    discovery: OnceCell<Discovery>,
}

impl ResourceManager {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            discovery: OnceCell::new(),
        }
    }

    async fn discovery(&self) -> Result<&Discovery> {
        self.discovery
            .get_or_try_init(|| async {
                tracing::debug!("Running API discovery");
                Discovery::new(self.client.clone())
                    .run()
                    .await
                    .map_err(KubeError::Api)
            })
            .await
    }

    /// Resolve documents to dynamic objects through discovery
    async fn resolve(
        &self,
        documents: Vec<ManifestDocument>,
        default_namespace: &str,
    ) -> Result<Vec<ParsedResource>> {
        let discovery = self.discovery().await?;

        documents
            .into_iter()
            .map(|doc| -> Result<ParsedResource> {
                let mut obj: DynamicObject = serde_yaml::from_str(&doc.body)
                    .map_err(|e| KubeError::InvalidManifest(format!("{}: {}", doc.key, e)))?;

                let gvk = gvk_from_api_version(&doc.key.api_version, &doc.key.kind);
                let (api_resource, capabilities) =
                    discovery.resolve_gvk(&gvk).ok_or_else(|| {
                        KubeError::InvalidManifest(format!(
                            "Unknown resource type: {}/{}",
                            doc.key.api_version, doc.key.kind
                        ))
                    })?;

                if capabilities.scope == Scope::Namespaced && obj.metadata.namespace.is_none() {
                    obj.metadata.namespace = Some(default_namespace.to_string());
                }

                Ok(ParsedResource {
                    obj,
                    key: doc.key,
                    api_resource,
                    capabilities,
                })
            })
            .collect()
    }

    fn api_for_resource(&self, resource: &ParsedResource) -> Api<DynamicObject> {
        if resource.capabilities.scope == Scope::Namespaced {
            let ns = resource.obj.metadata.namespace.as_deref().unwrap_or("default");
            Api::namespaced_with(self.client.clone(), ns, &resource.api_resource)
        } else {
            Api::all_with(self.client.clone(), &resource.api_resource)
        }
    }

    async fn apply_single_resource(&self, resource: &ParsedResource) -> Result<bool> {
        let api = self.api_for_resource(resource);
        let name = &resource.key.name;

        let exists = api.get_opt(name).await?.is_some();

        // Take ownership of fields
        let params = PatchParams::apply(FIELD_MANAGER).force();
        api.patch(name, &params, &Patch::Apply(&resource.obj)).await?;

        Ok(!exists)
    }
}

#[async_trait]
impl ResourceClient for ResourceManager {
    async fn ensure_namespace(&self, namespace: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        if api.get_opt(namespace).await?.is_some() {
            return Ok(());
        }

        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        match api.create(&PostParams::default(), &ns).await {
            Ok(_) => {
                tracing::info!(namespace, "Created namespace");
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn apply_manifest(&self, namespace: &str, manifest: &str) -> Result<OperationSummary> {
        let mut documents = manifest::parse(manifest)?;
        manifest::sort_for_apply(&mut documents);
        let resources = self.resolve(documents, namespace).await?;

        let mut summary = OperationSummary::default();
        for resource in &resources {
            let name = resource.key.to_string();
            match self.apply_single_resource(resource).await {
                Ok(true) => summary.succeeded.push(format!("{} (created)", name)),
                Ok(false) => summary.succeeded.push(format!("{} (configured)", name)),
                Err(e) => summary.failed.push((name, e.to_string())),
            }
        }

        tracing::debug!(namespace, summary = %summary.summary(), "Applied manifest");
        Ok(summary)
    }

    async fn delete_manifest(&self, namespace: &str, manifest: &str) -> Result<OperationSummary> {
        let mut documents = manifest::parse(manifest)?;
        manifest::sort_for_delete(&mut documents);

        let mut summary = OperationSummary::default();
        let (kept, deletable): (Vec<_>, Vec<_>) = documents.into_iter().partition(|d| d.keep);
        for doc in kept {
            summary
                .skipped
                .push((doc.key.to_string(), "resource-policy: keep".to_string()));
        }

        let params = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Background),
            ..Default::default()
        };

        for resource in self.resolve(deletable, namespace).await? {
            let name = resource.key.to_string();
            match self
                .api_for_resource(&resource)
                .delete(&resource.key.name, &params)
                .await
            {
                Ok(_) => summary.succeeded.push(format!("{} (deleted)", name)),
                Err(kube::Error::Api(e)) if e.code == 404 => {
                    summary.skipped.push((name, "not found".to_string()))
                }
                Err(e) => summary.failed.push((name, e.to_string())),
            }
        }

        tracing::debug!(namespace, summary = %summary.summary(), "Deleted manifest");
        Ok(summary)
    }
}

/// Convert an `apiVersion` and kind to a GroupVersionKind
///
/// - "apps/v1" -> group="apps", version="v1"
/// - "v1" -> group="", version="v1" (core API)
fn gvk_from_api_version(api_version: &str, kind: &str) -> GroupVersionKind {
    let (group, version) = api_version.rsplit_once('/').unwrap_or(("", api_version));
    GroupVersionKind::gvk(group, version, kind)
}

/// A call recorded by [`MockResourceClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceCall {
    EnsureNamespace(String),
    Apply(ResourceKey),
    Delete(ResourceKey),
}

/// In-memory resource client that records applies and deletes
#[derive(Clone, Default)]
pub struct MockResourceClient {
    calls: Arc<Mutex<Vec<ResourceCall>>>,
    /// Sleep before each apply
    delay: Option<Duration>,
    /// Fail applies of resources with this name
    fail_on: Option<String>,
}

impl MockResourceClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing_on(mut self, resource_name: impl Into<String>) -> Self {
        self.fail_on = Some(resource_name.into());
        self
    }

    pub fn calls(&self) -> Vec<ResourceCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Namespaces that were ensured
    pub fn namespaces(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ResourceCall::EnsureNamespace(ns) => Some(ns),
                _ => None,
            })
            .collect()
    }

    /// Resource names deleted, in order
    pub fn deleted(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ResourceCall::Delete(key) => Some(key.name),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: ResourceCall) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(call);
    }
}

#[async_trait]
impl ResourceClient for MockResourceClient {
    async fn ensure_namespace(&self, namespace: &str) -> Result<()> {
        self.record(ResourceCall::EnsureNamespace(namespace.to_string()));
        Ok(())
    }

    async fn apply_manifest(&self, _namespace: &str, manifest: &str) -> Result<OperationSummary> {
        let mut documents = manifest::parse(manifest)?;
        manifest::sort_for_apply(&mut documents);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut summary = OperationSummary::default();
        for doc in documents {
            let name = doc.key.to_string();
            if self.fail_on.as_deref() == Some(doc.key.name.as_str()) {
                summary.failed.push((name, "injected failure".to_string()));
                continue;
            }
            self.record(ResourceCall::Apply(doc.key));
            summary.succeeded.push(name);
        }
        Ok(summary)
    }

    async fn delete_manifest(&self, _namespace: &str, manifest: &str) -> Result<OperationSummary> {
        let mut documents = manifest::parse(manifest)?;
        manifest::sort_for_delete(&mut documents);

        let mut summary = OperationSummary::default();
        for doc in documents {
            let name = doc.key.to_string();
            if doc.keep {
                summary.skipped.push((name, "resource-policy: keep".to_string()));
                continue;
            }
            self.record(ResourceCall::Delete(doc.key));
            summary.succeeded.push(name);
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gvk_from_api_version() {
        let gvk = gvk_from_api_version("apps/v1", "Deployment");
        assert_eq!(gvk.group, "apps");
        assert_eq!(gvk.version, "v1");
        assert_eq!(gvk.kind, "Deployment");

        let core = gvk_from_api_version("v1", "ConfigMap");
        assert_eq!(core.group, "");
        assert_eq!(core.version, "v1");

        let ingress = gvk_from_api_version("networking.k8s.io/v1", "Ingress");
        assert_eq!(ingress.group, "networking.k8s.io");
    }

    #[test]
    fn test_operation_summary() {
        let mut summary = OperationSummary::default();
        summary.succeeded.push("Deployment/nginx".to_string());
        summary.succeeded.push("Service/nginx".to_string());
        summary
            .skipped
            .push(("Secret/keep-me".to_string(), "resource-policy: keep".to_string()));

        assert!(summary.is_success());
        assert_eq!(summary.total(), 3);
        assert_eq!(summary.summary(), "2 succeeded, 1 skipped");
        assert!(summary.into_result("apply").is_ok());
    }

    #[test]
    fn test_operation_summary_with_failures() {
        let mut summary = OperationSummary::default();
        summary
            .failed
            .push(("Service/broken".to_string(), "connection refused".to_string()));

        assert_eq!(OperationSummary::default().summary(), "No resources processed");
        let err = summary.into_result("apply").unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to apply resources: Service/broken: connection refused"
        );
    }

    #[tokio::test]
    async fn test_mock_client_honours_keep_policy() {
        let client = MockResourceClient::new();
        let manifest = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n  annotations:\n    helm.sh/resource-policy: keep\n---\napiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: b\n";

        let summary = client.delete_manifest("default", manifest).await.unwrap();

        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(client.deleted(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_client_injected_failure() {
        let client = MockResourceClient::new().failing_on("b");
        let manifest = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: b\n";

        let summary = client.apply_manifest("default", manifest).await.unwrap();

        assert!(!summary.is_success());
        assert_eq!(client.calls().len(), 1);
    }
}
