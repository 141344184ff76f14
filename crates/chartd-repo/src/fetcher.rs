//! Chart location and dependency materialization
//!
//! [`DependencyFetcher`] is the seam between chart resolution and the outside
//! world: it turns a chart reference into a local directory, decides whether a
//! chart's dependencies are satisfied, and downloads them when asked.

use async_trait::async_trait;
use chartd_core::chart::{CHART_FILE, CHARTS_DIR, LOCK_FILE};
use chartd_core::{ChartBundle, ChartMetadata, CoreError, Dependency};
use semver::{Version, VersionReq};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::archive::{is_published, publish, staging_dir, unpack_cached};
use crate::config::{Repository, RepositoryConfig};
use crate::credentials::{ScopedCredentials, SecureHttpClient};
use crate::error::{RepoError, Result};
use crate::http::HttpRepository;
use crate::lock::{LockFile, LockedDependency};
use crate::oci::{self, RegistryClient};
use crate::settings::RepoSettings;

/// Outcome of a dependency check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyCheck {
    Satisfied,
    /// Names of the dependencies that are missing or out of date
    Unmet(Vec<String>),
}

impl DependencyCheck {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied)
    }
}

/// Locates charts and materializes their dependencies
#[async_trait]
pub trait DependencyFetcher: Send + Sync {
    /// Resolve a chart reference to a local chart directory
    async fn locate(&self, reference: &str) -> Result<PathBuf>;

    /// Compare the lock and `charts/` against the declared dependencies
    ///
    /// Never touches the network.
    async fn check_satisfied(
        &self,
        chart_dir: &Path,
        dependencies: &[Dependency],
    ) -> Result<DependencyCheck>;

    /// Download every enabled dependency into `charts/` and rewrite the lock
    ///
    /// Returns the directory now holding the updated chart, which is not
    /// `chart_dir` when that directory is shared with other requests.
    async fn update(&self, chart_dir: &Path) -> Result<PathBuf>;
}

/// How a chart reference is interpreted
#[derive(Debug, PartialEq, Eq)]
enum ChartSource<'a> {
    Local(&'a Path),
    Oci(&'a str),
    Url(&'a str),
    Named {
        repo: &'a str,
        chart: &'a str,
        constraint: &'a str,
    },
}

impl<'a> ChartSource<'a> {
    fn classify(reference: &'a str) -> Result<Self> {
        let path = Path::new(reference);
        if path.exists() {
            return Ok(Self::Local(path));
        }
        if reference.starts_with("oci://") {
            return Ok(Self::Oci(reference));
        }
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return Ok(Self::Url(reference));
        }
        if reference.starts_with('.') || reference.starts_with('/') || reference.ends_with(".tgz") {
            return Err(CoreError::ChartNotFound {
                path: reference.to_string(),
            }
            .into());
        }

        match reference.split_once('/') {
            Some((repo, rest)) if !repo.is_empty() && !rest.is_empty() && !rest.contains('/') => {
                let (chart, constraint) = rest.split_once('@').unwrap_or((rest, ""));
                Ok(Self::Named {
                    repo,
                    chart,
                    constraint,
                })
            }
            _ => Err(RepoError::UnknownReference {
                reference: reference.to_string(),
            }),
        }
    }
}

/// A dependency ready to be written under `charts/`
enum Materialized {
    /// Already vendored, nothing to write
    Vendored,
    Archive { file_name: String, data: Vec<u8> },
    Directory(PathBuf),
}

/// Fetcher backed by `repositories.yaml`, the repository cache, HTTP
/// repositories, OCI registries and local paths
pub struct RepoFetcher {
    settings: Arc<RepoSettings>,
    registry: RegistryClient,
    http: SecureHttpClient,
}

impl RepoFetcher {
    pub fn new(settings: Arc<RepoSettings>, registry: RegistryClient) -> Result<Self> {
        Ok(Self {
            settings,
            registry,
            http: SecureHttpClient::new()?,
        })
    }

    fn repositories(&self) -> Result<RepositoryConfig> {
        RepositoryConfig::load_from(&self.settings.repository_config)
    }

    fn named_repository(&self, config: &RepositoryConfig, name: &str) -> Result<Repository> {
        config
            .get(name)
            .cloned()
            .ok_or_else(|| RepoError::RepositoryNotFound {
                name: name.to_string(),
            })
    }

    fn http_repository(&self, repo: Repository) -> HttpRepository {
        let cache = (!repo.name.is_empty()).then(|| self.settings.index_cache_path(&repo.name));
        HttpRepository::new(repo, self.http.clone(), cache)
    }

    async fn pull_oci(&self, reference: &str) -> Result<(String, Vec<u8>)> {
        let tagged = if oci::has_tag(reference) {
            reference.to_string()
        } else {
            let tag = self.registry.resolve_tag(reference, "").await?;
            format!("{}:{}", reference, tag)
        };
        let data = self.registry.pull_chart(&tagged).await?;
        Ok((tagged, data))
    }

    /// Materialize dependencies directly into `chart_dir`
    async fn update_in_place(&self, chart_dir: &Path) -> Result<()> {
        let metadata: ChartMetadata =
            serde_yaml::from_str(&std::fs::read_to_string(chart_dir.join(CHART_FILE))?)?;
        let has_vendored = metadata
            .dependencies
            .iter()
            .any(|d| d.enabled && d.repository.trim().is_empty());
        let current = if has_vendored {
            Some(ChartBundle::load(chart_dir)?)
        } else {
            None
        };
        let repositories = self.repositories()?;

        // Fetch everything before touching charts/, so a failed download
        // leaves the chart as it was
        let mut fetched = Vec::new();
        let mut locked = Vec::new();
        for dep in metadata.dependencies.iter().filter(|d| d.enabled) {
            let (version, materialized) = self
                .fetch_dependency(
                    dep,
                    chart_dir,
                    current.as_ref().and_then(|c| c.subchart(&dep.name)),
                    &repositories,
                )
                .await?;
            tracing::info!(
                dependency = %dep.effective_name(),
                version = %version,
                repository = %dep.repository,
                "Resolved dependency"
            );
            locked.push(LockedDependency {
                name: dep.name.clone(),
                version,
                repository: dep.repository.clone(),
            });
            fetched.push((dep.name.clone(), materialized));
        }

        let charts_dir = chart_dir.join(CHARTS_DIR);
        std::fs::create_dir_all(&charts_dir)?;

        let mut written = HashSet::new();
        for (name, materialized) in fetched {
            if matches!(materialized, Materialized::Vendored) {
                continue;
            }
            if written.insert(name.clone()) {
                remove_stale(&charts_dir, &name)?;
            }
            match materialized {
                Materialized::Archive { file_name, data } => {
                    std::fs::write(charts_dir.join(file_name), data)?;
                }
                Materialized::Directory(source) => {
                    copy_dir(&source, &charts_dir.join(&name))?;
                }
                Materialized::Vendored => {}
            }
        }

        LockFile::new(&metadata.dependencies, locked).save(&chart_dir.join(LOCK_FILE))?;
        Ok(())
    }

    /// Resolve a dependency against its repository and fetch it
    async fn fetch_dependency(
        &self,
        dep: &Dependency,
        chart_dir: &Path,
        vendored: Option<&ChartBundle>,
        repositories: &RepositoryConfig,
    ) -> Result<(Version, Materialized)> {
        let repository = dep.repository.trim();

        if repository.is_empty() {
            let subchart = vendored.ok_or_else(|| RepoError::NotVendored {
                name: dep.name.clone(),
            })?;
            return Ok((subchart.metadata.version.clone(), Materialized::Vendored));
        }

        if let Some(relative) = repository.strip_prefix("file://") {
            let source = chart_dir.join(relative);
            let chart = ChartBundle::load(&source)?;
            ensure_matches(dep, &chart.metadata.version)?;
            return Ok((chart.metadata.version.clone(), Materialized::Directory(source)));
        }

        let repo = if let Some(name) = repository
            .strip_prefix('@')
            .or_else(|| repository.strip_prefix("alias:"))
        {
            self.named_repository(repositories, name)?
        } else {
            repositories
                .find_by_url(repository)
                .cloned()
                .unwrap_or_else(|| Repository::new("", repository))
        };

        if repo.url.starts_with("oci://") {
            let base = format!("{}/{}", repo.url.trim_end_matches('/'), dep.name);
            let tag = match Version::parse(&dep.version) {
                Ok(_) => dep.version.clone(),
                Err(_) => self.registry.resolve_tag(&base, &dep.version).await?,
            };
            let data = self.registry.pull_chart(&format!("{}:{}", base, tag)).await?;
            let version = Version::parse(&tag.replace('_', "+"))?;
            return Ok((
                version,
                Materialized::Archive {
                    file_name: format!("{}-{}.tgz", dep.name, tag),
                    data,
                },
            ));
        }

        if !(repo.url.starts_with("http://") || repo.url.starts_with("https://")) {
            return Err(RepoError::InvalidRepositoryUrl {
                url: repository.to_string(),
                reason: "unsupported repository scheme".to_string(),
            });
        }

        let http = self.http_repository(repo);
        let entry = http.find(&dep.name, &dep.version, true).await?;
        let version = entry.parsed_version().ok_or_else(|| RepoError::IndexParseError {
            message: format!("invalid version '{}' for {}", entry.version, entry.name),
        })?;
        let data = http.download(&entry).await?;

        Ok((
            version,
            Materialized::Archive {
                file_name: format!("{}-{}.tgz", dep.name, entry.version),
                data,
            },
        ))
    }
}

#[async_trait]
impl DependencyFetcher for RepoFetcher {
    async fn locate(&self, reference: &str) -> Result<PathBuf> {
        match ChartSource::classify(reference)? {
            ChartSource::Local(path) if path.is_dir() => Ok(path.to_path_buf()),
            ChartSource::Local(path) => {
                let data = std::fs::read(path)?;
                unpack_cached(&data, &self.settings.unpack_root())
            }
            ChartSource::Oci(reference) => {
                let (tagged, data) = self.pull_oci(reference).await?;
                tracing::debug!(chart = %tagged, "Pulled chart from registry");
                unpack_cached(&data, &self.settings.unpack_root())
            }
            ChartSource::Url(url) => {
                let repositories = self.repositories()?;
                let credentials = repositories
                    .repositories
                    .iter()
                    .find(|r| url.starts_with(r.url.trim_end_matches('/')))
                    .and_then(|r| {
                        r.basic_auth()
                            .map(|(user, pass)| ScopedCredentials::new(&r.url, user, pass))
                    });
                let data = self.http.get_bytes(url, credentials.as_ref()).await?;
                unpack_cached(&data, &self.settings.unpack_root())
            }
            ChartSource::Named {
                repo,
                chart,
                constraint,
            } => {
                let repositories = self.repositories()?;
                let repository = self.named_repository(&repositories, repo)?;
                if repository.url.starts_with("oci://") {
                    let base = format!("{}/{}", repository.url.trim_end_matches('/'), chart);
                    let tag = self.registry.resolve_tag(&base, constraint).await?;
                    let data = self.registry.pull_chart(&format!("{}:{}", base, tag)).await?;
                    return unpack_cached(&data, &self.settings.unpack_root());
                }

                let http = self.http_repository(repository);
                let entry = http.find(chart, constraint, false).await?;
                tracing::debug!(chart = %chart, version = %entry.version, repo = %repo, "Resolved chart");
                let data = http.download(&entry).await?;
                unpack_cached(&data, &self.settings.unpack_root())
            }
        }
    }

    async fn check_satisfied(
        &self,
        chart_dir: &Path,
        dependencies: &[Dependency],
    ) -> Result<DependencyCheck> {
        let enabled: Vec<&Dependency> = dependencies.iter().filter(|d| d.enabled).collect();
        if enabled.is_empty() {
            return Ok(DependencyCheck::Satisfied);
        }

        let chart = ChartBundle::load(chart_dir)?;
        let mut unmet: Vec<String> = enabled
            .iter()
            .filter(|d| chart.subchart(&d.name).is_none())
            .map(|d| d.name.clone())
            .collect();

        // Vendored-only charts carry no lock
        if enabled.iter().any(|d| !d.repository.trim().is_empty()) {
            let lock_path = chart_dir.join(LOCK_FILE);
            let current = match LockFile::load(&lock_path) {
                Ok(Some(lock)) if lock.is_native() => lock.matches(dependencies),
                Ok(Some(lock)) => enabled
                    .iter()
                    .filter(|d| !d.repository.trim().is_empty())
                    .all(|d| vendored_as_locked(&lock, d, chart.subchart(&d.name))),
                Ok(None) => false,
                Err(e) => {
                    tracing::warn!(path = %lock_path.display(), error = %e, "Unreadable lock file");
                    false
                }
            };
            if !current {
                for dep in enabled.iter().filter(|d| !d.repository.trim().is_empty()) {
                    if !unmet.contains(&dep.name) {
                        unmet.push(dep.name.clone());
                    }
                }
            }
        }

        if unmet.is_empty() {
            Ok(DependencyCheck::Satisfied)
        } else {
            Ok(DependencyCheck::Unmet(unmet))
        }
    }

    async fn update(&self, chart_dir: &Path) -> Result<PathBuf> {
        let unpack_root = self.settings.unpack_root();
        let key = match chart_dir.strip_prefix(&unpack_root) {
            Ok(relative) => format!("{}-deps", relative.display()),
            Err(_) => {
                self.update_in_place(chart_dir).await?;
                return Ok(chart_dir.to_path_buf());
            }
        };

        // Unpacked charts are shared by every request for the same archive;
        // dependencies go into a private copy published under its own key
        let dest = unpack_root.join(&key);
        if is_published(&dest) {
            return Ok(dest);
        }

        let staging = staging_dir(&unpack_root, &key)?;
        copy_dir(chart_dir, &staging)?;
        if let Err(e) = self.update_in_place(&staging).await {
            if let Err(cleanup) = std::fs::remove_dir_all(&staging) {
                tracing::debug!(path = %staging.display(), error = %cleanup, "Failed to remove staging directory");
            }
            return Err(e);
        }
        publish(&staging, &dest)
    }
}

/// A lock from another tool is current when each repository dependency is
/// pinned and the subchart under `charts/` is the pinned version
fn vendored_as_locked(lock: &LockFile, dep: &Dependency, vendored: Option<&ChartBundle>) -> bool {
    match (lock.pins(dep), vendored) {
        (Some(locked), Some(chart)) => chart.metadata.version == locked.version,
        _ => false,
    }
}

fn ensure_matches(dep: &Dependency, version: &Version) -> Result<()> {
    let constraint = dep.version.trim();
    if constraint.is_empty() {
        return Ok(());
    }
    let req = VersionReq::parse(constraint)?;
    if req.matches(version) {
        Ok(())
    } else {
        Err(RepoError::UnsatisfiableConstraint {
            name: dep.name.clone(),
            constraint: constraint.to_string(),
            available: version.to_string(),
        })
    }
}

/// Remove earlier materializations of a dependency from `charts/`
fn remove_stale(charts_dir: &Path, name: &str) -> Result<()> {
    let prefix = format!("{}-", name);
    for entry in std::fs::read_dir(charts_dir)? {
        let entry = entry?;
        let file_name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();

        if path.is_dir() && file_name == name {
            std::fs::remove_dir_all(&path)?;
        } else if let Some(version) = file_name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(".tgz"))
        {
            if Version::parse(&version.replace('_', "+")).is_ok() {
                std::fs::remove_file(&path)?;
            }
        }
    }
    Ok(())
}

fn copy_dir(source: &Path, dest: &Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(source) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
