//! Repository configuration (`repositories.yaml`)
//!
//! Reads the Helm-compatible file so repositories added with other tooling
//! are visible to chartd without conversion.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

/// Repository configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryConfig {
    #[serde(default)]
    pub api_version: String,

    /// Configured repositories
    #[serde(default)]
    pub repositories: Vec<Repository>,
}

impl RepositoryConfig {
    /// Load configuration from a path
    ///
    /// A missing file is an empty configuration.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    #[cfg(test)]
    pub(crate) fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get a repository by name
    pub fn get(&self, name: &str) -> Option<&Repository> {
        self.repositories.iter().find(|r| r.name == name)
    }

    /// Find the repository registered for a URL, ignoring trailing slashes
    pub fn find_by_url(&self, url: &str) -> Option<&Repository> {
        let wanted = url.trim_end_matches('/');
        self.repositories
            .iter()
            .find(|r| r.url.trim_end_matches('/') == wanted)
    }
}

/// Repository definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    /// Unique name for this repository
    pub name: String,

    /// Repository URL
    pub url: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,

    #[serde(default, rename = "insecure_skip_tls_verify")]
    pub insecure_skip_tls_verify: bool,
}

impl Repository {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    /// Get the index URL
    pub fn index_url(&self) -> String {
        format!("{}/index.yaml", self.url.trim_end_matches('/'))
    }

    /// Basic auth pair, when the repository has credentials
    pub fn basic_auth(&self) -> Option<(&str, &str)> {
        if self.username.is_empty() {
            None
        } else {
            Some((&self.username, &self.password))
        }
    }
}
