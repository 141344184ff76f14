//! chartd Kube - Kubernetes integration for chartd
//!
//! This crate provides:
//! - **Action contexts**: per-request cluster, storage and registry access
//! - **Release storage**: revisions persisted in Secrets (or in memory)
//! - **Release state machine**: pending, deployed, superseded, failed, uninstalling
//! - **Rendering**: MiniJinja templates with scoped subchart values
//! - **Resources**: server-side apply and ordered deletion of rendered manifests
//! - **Orchestration**: install, upgrade, uninstall, get and list

pub mod context;
pub mod error;
pub mod manifest;
pub mod orchestrator;
pub mod release;
pub mod render;
pub mod resources;
pub mod storage;

pub use context::{
    ActionContext, ActionContextFactory, ClusterCredentials, InMemoryContextFactory,
    KubeContextFactory,
};
pub use error::{
    Action, ContextError, ErrorContext, ErrorKind, KubeError, ReleaseError, Result,
};
pub use manifest::{ManifestDocument, ResourceCategory, ResourceKey};
pub use orchestrator::{DEFAULT_TIMEOUT, NamespaceFilter, ReleaseOrchestrator};
pub use release::{ReleaseState, StoredRelease};
pub use render::{RenderedRelease, render_chart};
pub use resources::{MockResourceClient, OperationSummary, ResourceCall, ResourceClient, ResourceManager};
pub use storage::{MockStorageDriver, OperationCounts, SecretsDriver, StorageDriver};
