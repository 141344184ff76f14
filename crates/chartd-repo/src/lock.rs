//! `Chart.lock` handling
//!
//! The lock records the exact versions last resolved for a chart's declared
//! dependencies, plus a digest of the declarations themselves. A digest
//! mismatch means `Chart.yaml` changed since the last update.
//!
//! Locks written by Helm carry a digest computed differently; those are
//! judged entry by entry through [`LockFile::pins`].

use chartd_core::Dependency;
use chrono::{DateTime, Utc};
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::error::Result;

/// Prefix marking digests produced by [`digest_dependencies`]
const DIGEST_PREFIX: &str = "chartd-sha256:";

/// Lock file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockFile {
    /// Resolved dependencies
    #[serde(default)]
    pub dependencies: Vec<LockedDependency>,

    /// Digest of the declared dependency set
    pub digest: String,

    /// When this lock file was generated
    pub generated: DateTime<Utc>,
}

/// A dependency pinned to an exact version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockedDependency {
    pub name: String,

    #[serde(with = "version_serde")]
    pub version: Version,

    #[serde(default)]
    pub repository: String,
}

impl LockFile {
    /// Create a lock for a set of declarations
    pub fn new(declared: &[Dependency], dependencies: Vec<LockedDependency>) -> Self {
        Self {
            dependencies,
            digest: digest_dependencies(declared),
            generated: Utc::now(),
        }
    }

    /// Load lock file from path; `None` when it does not exist
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        let lock: Self = serde_yaml::from_str(&content)?;
        Ok(Some(lock))
    }

    /// Save lock file to path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Whether the digest was written by chartd
    pub fn is_native(&self) -> bool {
        self.digest.starts_with(DIGEST_PREFIX)
    }

    /// Whether the lock was generated for exactly these declarations
    pub fn matches(&self, declared: &[Dependency]) -> bool {
        self.digest == digest_dependencies(declared)
    }

    /// Whether a declaration is pinned by an entry with the same name and
    /// repository, at a version its constraint accepts
    pub fn pins(&self, dep: &Dependency) -> Option<&LockedDependency> {
        let locked = self.get(&dep.name)?;
        if !same_repository(&dep.repository, &locked.repository) {
            return None;
        }

        let constraint = dep.version.trim();
        if constraint.is_empty() {
            return Some(locked);
        }
        match VersionReq::parse(constraint) {
            Ok(req) if req.matches(&locked.version) => Some(locked),
            Ok(_) => None,
            Err(e) => {
                // Range syntax semver does not parse; the tool that wrote the
                // lock resolved it
                tracing::debug!(dependency = %dep.name, constraint, error = %e, "Trusting locked version");
                Some(locked)
            }
        }
    }

    /// Get a locked dependency by name
    pub fn get(&self, name: &str) -> Option<&LockedDependency> {
        self.dependencies.iter().find(|d| d.name == name)
    }
}

/// SHA256 over the fields that affect resolution, in declaration order
pub fn digest_dependencies(declared: &[Dependency]) -> String {
    let mut hasher = Sha256::new();
    for dep in declared {
        hasher.update(dep.name.as_bytes());
        hasher.update([0]);
        hasher.update(dep.version.as_bytes());
        hasher.update([0]);
        hasher.update(dep.repository.as_bytes());
        hasher.update([0]);
        hasher.update(dep.alias.as_deref().unwrap_or("").as_bytes());
        hasher.update([b'\n']);
    }
    format!("{}{}", DIGEST_PREFIX, hex::encode(hasher.finalize()))
}

/// Repository aliases (`@name`, `alias:name`) are resolved to URLs in locks
fn same_repository(declared: &str, locked: &str) -> bool {
    let declared = declared.trim();
    declared.starts_with('@')
        || declared.starts_with("alias:")
        || declared.trim_end_matches('/') == locked.trim().trim_end_matches('/')
}

/// Serde helper for semver::Version
mod version_serde {
    use semver::{Version, VersionReq};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(version: &Version, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&version.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Version, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Version::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn dep(name: &str, version: &str) -> Dependency {
        Dependency {
            name: name.to_string(),
            version: version.to_string(),
            repository: "https://charts.example.com".to_string(),
            condition: None,
            enabled: true,
            alias: None,
            tags: Vec::new(),
        }
    }

    #[test]
    fn test_digest_tracks_declarations() {
        let declared = vec![dep("redis", "^17.0.0")];
        let lock = LockFile::new(&declared, Vec::new());

        assert!(lock.is_native());
        assert!(lock.matches(&declared));
        assert!(!lock.matches(&[dep("redis", "^18.0.0")]));
        assert!(!lock.matches(&[dep("redis", "^17.0.0"), dep("postgresql", "^12")]));

        // Conditions do not affect resolution
        let mut with_condition = dep("redis", "^17.0.0");
        with_condition.condition = Some("redis.enabled".to_string());
        assert!(lock.matches(&[with_condition]));
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("Chart.lock");
        let declared = vec![dep("redis", "^17.0.0")];

        let lock = LockFile::new(
            &declared,
            vec![LockedDependency {
                name: "redis".to_string(),
                version: Version::new(17, 3, 1),
                repository: "https://charts.example.com".to_string(),
            }],
        );
        lock.save(&path).unwrap();

        let loaded = LockFile::load(&path).unwrap().unwrap();
        assert!(loaded.matches(&declared));
        assert_eq!(loaded.get("redis").unwrap().version, Version::new(17, 3, 1));
    }

    #[test]
    fn test_load_missing() {
        let temp = TempDir::new().unwrap();
        assert!(LockFile::load(&temp.path().join("Chart.lock")).unwrap().is_none());
    }

    #[test]
    fn test_reads_helm_lock_format() {
        let yaml = r#"
dependencies:
- name: postgresql
  repository: https://charts.bitnami.com/bitnami
  version: 12.1.6
digest: sha256:0123
generated: "2023-01-10T12:00:00.000000+01:00"
"#;
        let lock: LockFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(lock.dependencies.len(), 1);
        assert_eq!(lock.digest, "sha256:0123");
        assert!(!lock.is_native());
    }

    #[test]
    fn test_pins_checks_each_entry() {
        let lock = LockFile {
            dependencies: vec![LockedDependency {
                name: "redis".to_string(),
                version: Version::new(17, 3, 1),
                repository: "https://charts.example.com/".to_string(),
            }],
            digest: "sha256:0123".to_string(),
            generated: Utc::now(),
        };

        assert!(lock.pins(&dep("redis", "^17.0.0")).is_some());
        assert!(lock.pins(&dep("redis", "17.x.x")).is_some());
        assert!(lock.pins(&dep("redis", "")).is_some());
        assert!(lock.pins(&dep("redis", "^18.0.0")).is_none());
        assert!(lock.pins(&dep("postgresql", "^12")).is_none());

        let mut moved = dep("redis", "^17.0.0");
        moved.repository = "oci://registry.example.com/charts".to_string();
        assert!(lock.pins(&moved).is_none());

        let mut aliased = dep("redis", "^17.0.0");
        aliased.repository = "@example".to_string();
        assert!(lock.pins(&aliased).is_some());
    }
}
