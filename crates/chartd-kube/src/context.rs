//! Per-request action contexts
//!
//! An [`ActionContext`] bundles everything one lifecycle action needs: the
//! target namespace, release storage, a resource client and a registry
//! client. A fresh context is built for every request by an
//! [`ActionContextFactory`] and dropped when the request ends.

use base64::Engine as _;
use chartd_repo::{RegistryClient, RepoSettings};
use kube::Client;
use kube::config::{AuthInfo, KubeConfigOptions, Kubeconfig};
use std::path::Path;
use std::sync::Arc;

use crate::error::ContextError;
use crate::resources::{MockResourceClient, ResourceClient, ResourceManager};
use crate::storage::{MockStorageDriver, SecretsDriver, StorageDriver};

/// Everything a lifecycle action needs, scoped to one namespace
#[derive(Clone)]
pub struct ActionContext {
    pub namespace: String,
    pub storage: Arc<dyn StorageDriver>,
    pub resources: Arc<dyn ResourceClient>,
    pub registry: RegistryClient,
}

impl std::fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionContext")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

/// Builds a context for a namespace
pub trait ActionContextFactory: Send + Sync {
    fn create(&self, namespace: &str) -> Result<ActionContext, ContextError>;
}

/// Cluster connection parameters, read once at startup
#[derive(Clone)]
pub struct ClusterCredentials {
    /// API server URL
    pub host: String,
    /// DER-encoded CA certificates; `None` uses the system roots
    pub root_certs: Option<Vec<Vec<u8>>>,
    /// Bearer token, token file, client certificate or exec plugin
    pub auth: AuthInfo,
    pub accept_invalid_certs: bool,
}

impl std::fmt::Debug for ClusterCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterCredentials")
            .field("host", &self.host)
            .field("root_certs", &self.root_certs.as_ref().map(Vec::len))
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .finish_non_exhaustive()
    }
}

impl ClusterCredentials {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            root_certs: None,
            auth: AuthInfo::default(),
            accept_invalid_certs: false,
        }
    }

    /// Trust the certificates in a PEM bundle
    pub fn with_ca_pem(mut self, pem: &str) -> Result<Self, ContextError> {
        self.root_certs = Some(pem_to_der(pem)?);
        Ok(self)
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.auth.token = Some(token.into().into());
        self
    }

    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Load from an explicit kubeconfig, or infer (in-cluster, then
    /// `$KUBECONFIG`/`~/.kube/config`) when no path is given
    pub async fn load(kubeconfig: Option<&Path>) -> Result<Self, ContextError> {
        let config = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)
                    .map_err(|e| ContextError::Kubeconfig(format!("{}: {}", path.display(), e)))?;
                kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| ContextError::Kubeconfig(e.to_string()))?
            }
            None => kube::Config::infer()
                .await
                .map_err(|e| ContextError::Kubeconfig(e.to_string()))?,
        };

        Ok(Self::from_config(&config))
    }

    pub fn from_config(config: &kube::Config) -> Self {
        Self {
            host: config.cluster_url.to_string(),
            root_certs: config.root_cert.clone(),
            auth: config.auth_info.clone(),
            accept_invalid_certs: config.accept_invalid_certs,
        }
    }

    /// Client configuration defaulting to `namespace`
    pub fn to_config(&self, namespace: &str) -> Result<kube::Config, ContextError> {
        let invalid = |reason: String| ContextError::InvalidHost {
            host: self.host.clone(),
            reason,
        };

        if self.host.trim().is_empty() {
            return Err(invalid("host is empty".to_string()));
        }
        let uri: http::Uri = self.host.parse().map_err(|e: http::uri::InvalidUri| invalid(e.to_string()))?;
        if uri.scheme().is_none() || uri.host().is_none() {
            return Err(invalid("expected an absolute URL such as https://host:6443".to_string()));
        }

        let mut config = kube::Config::new(uri);
        config.default_namespace = namespace.to_string();
        config.root_cert = self.root_certs.clone();
        config.auth_info = self.auth.clone();
        config.accept_invalid_certs = self.accept_invalid_certs;
        Ok(config)
    }
}

/// Decode every certificate of a PEM bundle
fn pem_to_der(pem: &str) -> Result<Vec<Vec<u8>>, ContextError> {
    const BEGIN: &str = "-----BEGIN CERTIFICATE-----";
    const END: &str = "-----END CERTIFICATE-----";

    let mut certs = Vec::new();
    let mut rest = pem;
    while let Some(start) = rest.find(BEGIN) {
        let body_start = start + BEGIN.len();
        let end = rest[body_start..]
            .find(END)
            .ok_or_else(|| ContextError::InvalidCertificate("unterminated PEM block".to_string()))?;

        let body: String = rest[body_start..body_start + end]
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let der = base64::engine::general_purpose::STANDARD
            .decode(body)
            .map_err(|e| ContextError::InvalidCertificate(e.to_string()))?;
        certs.push(der);

        rest = &rest[body_start + end + END.len()..];
    }

    if certs.is_empty() {
        return Err(ContextError::InvalidCertificate(
            "no PEM certificate found".to_string(),
        ));
    }
    Ok(certs)
}

/// Contexts backed by a real cluster
///
/// Each context gets its own client, Secrets storage and resource manager;
/// API discovery waits until the first manifest is applied.
pub struct KubeContextFactory {
    credentials: ClusterCredentials,
    settings: Arc<RepoSettings>,
}

impl KubeContextFactory {
    pub fn new(credentials: ClusterCredentials, settings: Arc<RepoSettings>) -> Self {
        Self {
            credentials,
            settings,
        }
    }
}

impl ActionContextFactory for KubeContextFactory {
    fn create(&self, namespace: &str) -> Result<ActionContext, ContextError> {
        let config = self.credentials.to_config(namespace)?;
        let client = Client::try_from(config).map_err(ContextError::Client)?;
        let registry = RegistryClient::from_credentials_file(&self.settings.registry_config)?;

        tracing::debug!(namespace, host = %self.credentials.host, "Created action context");

        Ok(ActionContext {
            namespace: namespace.to_string(),
            storage: Arc::new(SecretsDriver::with_client(client.clone())),
            resources: Arc::new(ResourceManager::new(client)),
            registry,
        })
    }
}

/// Contexts over shared in-memory storage, for tests and local runs
#[derive(Clone, Default)]
pub struct InMemoryContextFactory {
    pub storage: MockStorageDriver,
    pub resources: MockResourceClient,
}

impl InMemoryContextFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resources(resources: MockResourceClient) -> Self {
        Self {
            storage: MockStorageDriver::new(),
            resources,
        }
    }
}

impl ActionContextFactory for InMemoryContextFactory {
    fn create(&self, namespace: &str) -> Result<ActionContext, ContextError> {
        Ok(ActionContext {
            namespace: namespace.to_string(),
            storage: Arc::new(self.storage.clone()),
            resources: Arc::new(self.resources.clone()),
            registry: RegistryClient::anonymous(),
        })
    }
}
