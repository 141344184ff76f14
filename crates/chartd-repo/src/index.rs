//! Repository index types (Helm `index.yaml`)

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{RepoError, Result};

/// Repository index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryIndex {
    #[serde(default)]
    pub api_version: String,

    /// Charts indexed by name
    #[serde(default)]
    pub entries: HashMap<String, Vec<ChartEntry>>,
}

impl RepositoryIndex {
    /// Parse index from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_yaml::from_slice(bytes).map_err(|e| RepoError::IndexParseError {
            message: e.to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_bytes(&data)
    }

    /// Find the highest version matching a constraint
    ///
    /// An empty constraint means the latest stable version.
    pub fn find_best_match(&self, name: &str, constraint: &str, repo: &str) -> Result<&ChartEntry> {
        let entries = self.entries.get(name).ok_or_else(|| RepoError::ChartNotFound {
            name: name.to_string(),
            repo: repo.to_string(),
        })?;

        let constraint = constraint.trim();
        let req = VersionReq::parse(if constraint.is_empty() { "*" } else { constraint })
            .map_err(|e| RepoError::UnsatisfiableConstraint {
                name: name.to_string(),
                constraint: constraint.to_string(),
                available: e.to_string(),
            })?;

        entries
            .iter()
            .filter_map(|e| e.parsed_version().map(|v| (v, e)))
            .filter(|(v, _)| req.matches(v))
            .max_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, e)| e)
            .ok_or_else(|| RepoError::UnsatisfiableConstraint {
                name: name.to_string(),
                constraint: constraint.to_string(),
                available: entries
                    .iter()
                    .map(|e| e.version.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

/// One chart version in the index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartEntry {
    pub name: String,

    pub version: String,

    #[serde(default)]
    pub app_version: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// URLs to download the chart archive, absolute or relative to the repository
    #[serde(default)]
    pub urls: Vec<String>,

    /// SHA256 digest of the archive
    #[serde(default)]
    pub digest: Option<String>,

    #[serde(default)]
    pub deprecated: bool,

    #[serde(default, rename = "type")]
    pub chart_type: Option<String>,
}

impl ChartEntry {
    /// Get the primary download URL
    pub fn download_url(&self) -> Option<&str> {
        self.urls.first().map(|s| s.as_str())
    }

    /// Parse version as semver
    pub fn parsed_version(&self) -> Option<Version> {
        Version::parse(self.version.trim_start_matches('v')).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> RepositoryIndex {
        let yaml = r#"
apiVersion: v1
generated: "2024-01-01T00:00:00Z"
entries:
  nginx:
    - name: nginx
      version: "15.0.0"
      appVersion: "1.25.0"
      urls:
        - https://example.com/charts/nginx-15.0.0.tgz
      digest: "sha256:abc123"
    - name: nginx
      version: "14.0.0"
      urls:
        - nginx-14.0.0.tgz
    - name: nginx
      version: "16.0.0-beta.1"
      urls:
        - nginx-16.0.0-beta.1.tgz
  redis:
    - name: redis
      version: "17.0.0"
      urls:
        - https://example.com/charts/redis-17.0.0.tgz
"#;
        RepositoryIndex::from_bytes(yaml.as_bytes()).unwrap()
    }

    #[test]
    fn test_parse_index() {
        let index = sample_index();
        assert_eq!(index.entries.len(), 2);
        assert_eq!(index.entries["nginx"].len(), 3);
    }

    #[test]
    fn test_find_best_match() {
        let index = sample_index();

        assert_eq!(index.find_best_match("nginx", ">=14.0.0", "r").unwrap().version, "15.0.0");
        assert_eq!(index.find_best_match("nginx", "^14", "r").unwrap().version, "14.0.0");
        // Empty constraint skips prereleases
        assert_eq!(index.find_best_match("nginx", "", "r").unwrap().version, "15.0.0");
    }

    #[test]
    fn test_find_best_match_errors() {
        let index = sample_index();

        assert!(matches!(
            index.find_best_match("postgresql", "*", "r"),
            Err(RepoError::ChartNotFound { .. })
        ));

        let err = index.find_best_match("redis", "^18", "r").unwrap_err();
        match err {
            RepoError::UnsatisfiableConstraint { available, .. } => assert_eq!(available, "17.0.0"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_index() {
        assert!(matches!(
            RepositoryIndex::from_bytes(b"entries: [not, a, map"),
            Err(RepoError::IndexParseError { .. })
        ));
    }
}
