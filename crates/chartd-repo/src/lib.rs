//! chartd chart resolution
//!
//! This crate turns chart references into installable chart bundles:
//!
//! - **Local charts**: directories and `.tgz` archives
//! - **HTTP repositories**: Helm-style repos with `index.yaml`, configured in
//!   `repositories.yaml` and cached per repository
//! - **OCI registries**: `oci://` references, authenticated from a docker-style
//!   `config.json`
//! - **Dependencies**: `Chart.lock` checks and on-demand updates into `charts/`
//!
//! ## Example
//!
//! ```rust,no_run
//! use chartd_repo::{ChartResolver, RegistryClient, RepoSettings};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Arc::new(RepoSettings::default());
//! let registry = RegistryClient::from_credentials_file(&settings.registry_config)?;
//! let resolver = ChartResolver::from_settings(settings, registry)?;
//!
//! let resolved = resolver.resolve("bitnami/nginx@^15", false).await?;
//! println!("{} {}", resolved.chart.name(), resolved.chart.metadata.version);
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod config;
pub mod credentials;
pub mod error;
pub mod fetcher;
pub mod http;
pub mod index;
pub mod lock;
pub mod oci;
pub mod resolver;
pub mod settings;

pub use config::{Repository, RepositoryConfig};
pub use credentials::DockerConfig;
pub use error::{RepoError, ResolveError, Result};
pub use fetcher::{DependencyCheck, DependencyFetcher, RepoFetcher};
pub use index::{ChartEntry, RepositoryIndex};
pub use lock::{LockFile, LockedDependency};
pub use oci::RegistryClient;
pub use resolver::{ChartResolver, ResolvedChart};
pub use settings::RepoSettings;
