//! Process-wide repository and registry locations
//!
//! Built once at startup and shared read-only (behind an `Arc`) by every
//! request that needs to locate charts or talk to a registry.

use std::path::{Path, PathBuf};

/// Where repository configuration, registry credentials and caches live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSettings {
    /// Docker-style `config.json` with registry credentials
    pub registry_config: PathBuf,

    /// Helm-compatible `repositories.yaml`
    pub repository_config: PathBuf,

    /// Directory holding downloaded indexes and chart archives
    pub repository_cache: PathBuf,
}

impl Default for RepoSettings {
    fn default() -> Self {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from(".config"));
        let cache_dir = dirs::cache_dir().unwrap_or_else(|| PathBuf::from(".cache"));

        Self {
            registry_config: config_dir.join("helm").join("registry").join("config.json"),
            repository_config: config_dir.join("helm").join("repositories.yaml"),
            repository_cache: cache_dir.join("helm").join("repository"),
        }
    }
}

impl RepoSettings {
    pub fn new(
        registry_config: impl Into<PathBuf>,
        repository_config: impl Into<PathBuf>,
        repository_cache: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry_config: registry_config.into(),
            repository_config: repository_config.into(),
            repository_cache: repository_cache.into(),
        }
    }

    /// Settings rooted in a single directory, handy for tests
    pub fn rooted_at(root: &Path) -> Self {
        Self::new(
            root.join("registry").join("config.json"),
            root.join("repositories.yaml"),
            root.join("cache"),
        )
    }

    /// Cached index for a named repository (`<cache>/<name>-index.yaml`)
    pub fn index_cache_path(&self, repo_name: &str) -> PathBuf {
        self.repository_cache.join(format!("{}-index.yaml", repo_name))
    }

    /// Directory where fetched chart archives are unpacked
    pub fn unpack_root(&self) -> PathBuf {
        self.repository_cache.join("chartd")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_helm_layout() {
        let settings = RepoSettings::default();
        assert!(settings.registry_config.ends_with("helm/registry/config.json"));
        assert!(settings.repository_config.ends_with("helm/repositories.yaml"));
        assert!(settings.repository_cache.ends_with("helm/repository"));
    }

    #[test]
    fn test_index_cache_path() {
        let settings = RepoSettings::rooted_at(Path::new("/tmp/chartd"));
        assert_eq!(
            settings.index_cache_path("bitnami"),
            PathBuf::from("/tmp/chartd/cache/bitnami-index.yaml")
        );
    }
}
