//! Rendered manifest handling
//!
//! A release manifest is a multi-document YAML stream. This module splits it
//! into documents, identifies each resource, orders them for apply and
//! delete, and computes what an upgrade dropped.

use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};

use crate::error::{KubeError, Result};

/// Annotation to keep a resource on uninstall (Helm-compatible)
pub const RESOURCE_POLICY_ANNOTATION: &str = "helm.sh/resource-policy";
pub const RESOURCE_POLICY_KEEP: &str = "keep";

/// Identity of a resource within a manifest
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", ns, self.kind, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// One resource document from a manifest
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestDocument {
    pub key: ResourceKey,
    /// The document text as rendered
    pub body: String,
    /// Carries `helm.sh/resource-policy: keep`
    pub keep: bool,
}

impl ManifestDocument {
    pub fn category(&self) -> ResourceCategory {
        ResourceCategory::from_resource(&self.key.kind, &self.key.api_version)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentHeader {
    api_version: Option<String>,
    kind: Option<String>,
    #[serde(default)]
    metadata: HeaderMetadata,
}

#[derive(Default, Deserialize)]
struct HeaderMetadata {
    name: Option<String>,
    namespace: Option<String>,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

/// Split a manifest into its resource documents
///
/// Empty and comment-only documents are skipped. Every remaining document
/// must carry `apiVersion`, `kind` and `metadata.name`.
pub fn parse(manifest: &str) -> Result<Vec<ManifestDocument>> {
    let mut documents = Vec::new();

    for (index, doc) in split_documents(manifest).into_iter().enumerate() {
        if doc
            .lines()
            .all(|l| l.trim().is_empty() || l.trim().starts_with('#'))
        {
            continue;
        }

        let header: DocumentHeader = serde_yaml::from_str(&doc).map_err(|e| {
            KubeError::InvalidManifest(format!("document {}: {}", index, e))
        })?;

        let missing = |field: &str| {
            KubeError::InvalidManifest(format!("document {}: missing {}", index, field))
        };
        let api_version = header.api_version.ok_or_else(|| missing("apiVersion"))?;
        let kind = header.kind.ok_or_else(|| missing("kind"))?;
        let name = header.metadata.name.ok_or_else(|| missing("metadata.name"))?;
        let keep = header
            .metadata
            .annotations
            .get(RESOURCE_POLICY_ANNOTATION)
            .is_some_and(|v| v == RESOURCE_POLICY_KEEP);

        documents.push(ManifestDocument {
            key: ResourceKey {
                api_version,
                kind,
                namespace: header.metadata.namespace,
                name,
            },
            body: doc,
            keep,
        });
    }

    Ok(documents)
}

/// Split on `---` separator lines
fn split_documents(manifest: &str) -> Vec<String> {
    let mut documents = Vec::new();
    let mut current = String::new();

    for line in manifest.lines() {
        if line.trim_end() == "---" || line.starts_with("--- ") {
            documents.push(std::mem::take(&mut current));
            continue;
        }
        current.push_str(line);
        current.push('\n');
    }
    documents.push(current);

    documents
        .into_iter()
        .filter(|d| !d.trim().is_empty())
        .collect()
}

/// Join documents back into a manifest
pub fn join<'a>(documents: impl IntoIterator<Item = &'a ManifestDocument>) -> String {
    documents
        .into_iter()
        .map(|d| format!("---\n{}", d.body))
        .collect()
}

/// Documents of `previous` whose resource no longer appears in `current`
pub fn removed_documents(previous: &str, current: &str) -> Result<Vec<ManifestDocument>> {
    let kept: HashSet<ResourceKey> = parse(current)?.into_iter().map(|d| d.key).collect();
    Ok(parse(previous)?
        .into_iter()
        .filter(|d| !kept.contains(&d.key))
        .collect())
}

/// Order documents for creation: dependencies first
pub fn sort_for_apply(documents: &mut [ManifestDocument]) {
    documents.sort_by_key(|d| d.category());
}

/// Order documents for deletion: reverse of creation
pub fn sort_for_delete(documents: &mut [ManifestDocument]) {
    documents.sort_by_key(|d| std::cmp::Reverse(d.category()));
}

/// Resource category for install ordering
///
/// CRDs → Namespaces → RBAC → Config → Storage → Network → Workloads →
/// Batch → Autoscaling → Custom Resources → everything else
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceCategory {
    Crd = 0,
    Namespace = 1,
    /// ResourceQuota, LimitRange
    NamespaceConfig = 2,
    ClusterRbac = 10,
    /// Role, RoleBinding, ServiceAccount
    NamespacedRbac = 11,
    Config = 20,
    Storage = 21,
    Network = 30,
    Workload = 40,
    Batch = 50,
    Autoscaling = 60,
    CustomResource = 70,
    Other = 100,
}

impl ResourceCategory {
    pub fn from_resource(kind: &str, api_version: &str) -> Self {
        match kind {
            "CustomResourceDefinition" => Self::Crd,
            "Namespace" => Self::Namespace,
            "ResourceQuota" | "LimitRange" => Self::NamespaceConfig,
            "ClusterRole" | "ClusterRoleBinding" => Self::ClusterRbac,
            "Role" | "RoleBinding" | "ServiceAccount" => Self::NamespacedRbac,
            "ConfigMap" | "Secret" => Self::Config,
            "PersistentVolume" | "PersistentVolumeClaim" | "StorageClass" => Self::Storage,
            "NetworkPolicy" | "Service" | "Endpoints" | "Ingress" | "IngressClass" => Self::Network,
            "Deployment" | "StatefulSet" | "DaemonSet" | "ReplicaSet" | "Pod" => Self::Workload,
            "Job" | "CronJob" => Self::Batch,
            "HorizontalPodAutoscaler" | "PodDisruptionBudget" => Self::Autoscaling,
            _ if is_custom_api_version(api_version) => Self::CustomResource,
            _ => Self::Other,
        }
    }
}

/// Custom APIs have a dotted group outside `*.k8s.io`
fn is_custom_api_version(api_version: &str) -> bool {
    match api_version.split_once('/') {
        Some((group, _)) => group.contains('.') && !group.ends_with(".k8s.io"),
        None => false,
    }
}
