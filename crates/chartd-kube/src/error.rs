//! Error types for chartd-kube
//!
//! [`KubeError`] covers storage, cluster API, rendering and manifest failures.
//! [`ContextError`] covers building an action context. [`ReleaseError`] is
//! what lifecycle callers see: any failure from resolution to apply, tagged
//! once with its [`ErrorKind`] and the [`ErrorContext`] it happened in.

use chartd_core::ReleaseReference;
use chartd_repo::{RepoError, ResolveError};
use thiserror::Error;

/// Result type for chartd-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur during Kubernetes operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    #[error("release '{name}' not found in namespace '{namespace}'")]
    ReleaseNotFound { name: String, namespace: String },

    #[error("release '{name}' already exists in namespace '{namespace}'")]
    ReleaseAlreadyExists { name: String, namespace: String },

    #[error("another operation is in progress for release '{name}': {status}")]
    OperationInProgress { name: String, status: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("compression error: {0}")]
    Compression(String),

    #[error("template error: {0}")]
    Template(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("operation timed out after {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// One or more resources could not be applied or deleted
    #[error("failed to {operation} resources: {details}")]
    Resources { operation: String, details: String },
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl KubeError {
    /// Check if this is a Kubernetes 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, KubeError::ReleaseNotFound { .. })
            || matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 404)
    }

    /// Check if this is a conflict error (409)
    pub fn is_conflict(&self) -> bool {
        matches!(self, KubeError::ReleaseAlreadyExists { .. })
            || matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 409)
    }
}

/// Failure to build a per-request action context
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("invalid cluster host '{host}': {reason}")]
    InvalidHost { host: String, reason: String },

    #[error("invalid cluster CA certificate: {0}")]
    InvalidCertificate(String),

    #[error("failed to load kubeconfig: {0}")]
    Kubeconfig(String),

    #[error("failed to build cluster client: {0}")]
    Client(#[source] kube::Error),

    #[error("failed to build registry client: {0}")]
    Registry(#[from] RepoError),
}

/// Coarse classification of a lifecycle failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Context or registry construction failed
    Configuration,
    /// Locating, loading, validating or reloading the chart failed
    ChartResolution,
    /// Dependencies are unmet and updating them was not allowed
    Dependency,
    /// Fetching missing dependencies failed
    DependencyUpdate,
    /// The action itself was rejected or failed
    Action,
    /// The target release does not exist
    NotFound,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::ChartResolution => "chart-resolution",
            Self::Dependency => "dependency",
            Self::DependencyUpdate => "dependency-update",
            Self::Action => "action",
            Self::NotFound => "not-found",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle action being served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    List,
    Retrieve,
    Install,
    Upgrade,
    Uninstall,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Retrieve => "get",
            Self::Install => "install",
            Self::Upgrade => "upgrade",
            Self::Uninstall => "uninstall",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What was being done, and to which release, when an error happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    pub action: Action,
    pub release: Option<ReleaseReference>,
}

impl ErrorContext {
    pub fn new(action: Action, release: Option<ReleaseReference>) -> Self {
        Self { action, release }
    }

    pub fn for_release(action: Action, release: &ReleaseReference) -> Self {
        Self::new(action, Some(release.clone()))
    }
}

impl std::fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.release {
            Some(release) => write!(f, "{} {}", self.action, release),
            None => write!(f, "{}", self.action),
        }
    }
}

/// A lifecycle failure, classified and placed in context
#[derive(Debug, Error)]
#[error("{context}: {source}")]
pub struct ReleaseError {
    pub kind: ErrorKind,
    pub context: ErrorContext,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl ReleaseError {
    pub fn new(
        kind: ErrorKind,
        context: ErrorContext,
        source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        Self {
            kind,
            context,
            source: source.into(),
        }
    }

    pub fn configuration(context: ErrorContext, source: ContextError) -> Self {
        Self::new(ErrorKind::Configuration, context, source)
    }

    /// Classify a chart resolution failure by the step that failed
    pub fn resolution(context: ErrorContext, source: ResolveError) -> Self {
        let kind = match &source {
            ResolveError::Unmet(_) => ErrorKind::Dependency,
            ResolveError::Update(_) => ErrorKind::DependencyUpdate,
            ResolveError::Locate { .. }
            | ResolveError::Load { .. }
            | ResolveError::NotInstallable { .. }
            | ResolveError::Reload(_) => ErrorKind::ChartResolution,
        };
        Self::new(kind, context, source)
    }

    /// A missing release is `NotFound`, everything else is an action failure
    pub fn action(context: ErrorContext, source: KubeError) -> Self {
        let kind = match &source {
            KubeError::ReleaseNotFound { .. } => ErrorKind::NotFound,
            _ => ErrorKind::Action,
        };
        Self::new(kind, context, source)
    }

    /// The underlying failure message without the context prefix
    pub fn reason(&self) -> String {
        self.source.to_string()
    }

    /// The release already exists (or a concurrent create won the race)
    pub fn is_conflict(&self) -> bool {
        self.kind == ErrorKind::Action
            && self
                .source
                .downcast_ref::<KubeError>()
                .is_some_and(KubeError::is_conflict)
    }

    /// The chart was resolved but its type cannot be installed
    pub fn is_not_installable(&self) -> bool {
        matches!(
            self.source.downcast_ref::<ResolveError>(),
            Some(ResolveError::NotInstallable { .. })
        )
    }
}
