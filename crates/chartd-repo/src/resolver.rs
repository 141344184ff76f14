//! Chart resolution
//!
//! Turns a chart reference into a loaded, installable chart whose
//! dependencies are all materialized. Dependencies are checked first and only
//! fetched when the check fails and the caller allows it, after which the
//! chart is reloaded so the returned bundle matches what is on disk.

use chartd_core::ChartBundle;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{RepoError, ResolveError};
use crate::fetcher::{DependencyCheck, DependencyFetcher, RepoFetcher};
use crate::oci::RegistryClient;
use crate::settings::RepoSettings;

/// A chart ready to install
#[derive(Debug, Clone)]
pub struct ResolvedChart {
    pub chart: ChartBundle,

    /// Local chart directory the bundle was loaded from
    pub path: PathBuf,

    /// Non-fatal advisories (e.g. deprecation)
    pub warnings: Vec<String>,
}

pub struct ChartResolver<F> {
    fetcher: F,
}

impl ChartResolver<RepoFetcher> {
    /// Resolver over the configured repositories and registry
    pub fn from_settings(
        settings: Arc<RepoSettings>,
        registry: RegistryClient,
    ) -> Result<Self, RepoError> {
        Ok(Self::new(RepoFetcher::new(settings, registry)?))
    }
}

impl<F: DependencyFetcher> ChartResolver<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Locate, load, validate and dependency-resolve a chart
    pub async fn resolve(
        &self,
        reference: &str,
        allow_dependency_update: bool,
    ) -> Result<ResolvedChart, ResolveError> {
        let path = self
            .fetcher
            .locate(reference)
            .await
            .map_err(|source| ResolveError::Locate {
                reference: reference.to_string(),
                source,
            })?;
        tracing::debug!(chart = %reference, path = %path.display(), "Located chart");

        let chart = load(&path).map_err(|source| ResolveError::Load {
            path: path.display().to_string(),
            source,
        })?;

        if !chart.metadata.chart_type.is_installable() {
            return Err(ResolveError::NotInstallable {
                chart_type: chart.metadata.chart_type.to_string(),
            });
        }

        let mut warnings = Vec::new();
        if chart.metadata.deprecated {
            tracing::warn!(chart = %chart.name(), version = %chart.metadata.version, "This chart is deprecated");
            warnings.push(format!("chart {} {} is deprecated", chart.name(), chart.metadata.version));
        }

        if chart.dependencies().is_empty() {
            return Ok(ResolvedChart {
                chart,
                path,
                warnings,
            });
        }

        let check = self
            .fetcher
            .check_satisfied(&path, chart.dependencies())
            .await
            .map_err(|source| ResolveError::Load {
                path: path.display().to_string(),
                source,
            })?;

        let unmet = match check {
            DependencyCheck::Satisfied => {
                return Ok(ResolvedChart {
                    chart,
                    path,
                    warnings,
                });
            }
            DependencyCheck::Unmet(unmet) => unmet,
        };

        if !allow_dependency_update {
            return Err(ResolveError::Unmet(unmet));
        }

        tracing::info!(chart = %chart.name(), unmet = ?unmet, "Updating chart dependencies");
        let path = self
            .fetcher
            .update(&path)
            .await
            .map_err(ResolveError::Update)?;

        let chart = load(&path).map_err(ResolveError::Reload)?;

        Ok(ResolvedChart {
            chart,
            path,
            warnings,
        })
    }
}

fn load(path: &Path) -> Result<ChartBundle, RepoError> {
    Ok(ChartBundle::load(path)?)
}
