//! Stored releases and their state machine

use chartd_core::{ChartMetadata, ReleaseRecord, ReleaseStatus, ValuesDocument};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix of every storage key
pub const STORAGE_KEY_PREFIX: &str = "sh.chartd.release.v1";

/// One revision of a release as persisted in the cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRelease {
    pub name: String,

    pub namespace: String,

    /// Revision number (1-indexed, increments with each upgrade)
    pub version: u32,

    pub state: ReleaseState,

    /// Chart metadata at deploy time
    pub chart: ChartMetadata,

    /// Caller-supplied values for this revision
    pub values: ValuesDocument,

    /// Rendered manifest (all Kubernetes resources)
    #[serde(default)]
    pub manifest: String,

    /// When the first revision was deployed; carried across upgrades
    pub deployed_at: DateTime<Utc>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub description: String,

    /// Rendered NOTES.txt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl StoredRelease {
    /// Revision 1 of a new release, pending install
    pub fn for_install(
        name: impl Into<String>,
        namespace: impl Into<String>,
        chart: ChartMetadata,
        values: ValuesDocument,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            namespace: namespace.into(),
            version: 1,
            state: ReleaseState::PendingInstall { started_at: now },
            chart,
            values,
            manifest: String::new(),
            deployed_at: now,
            created_at: now,
            updated_at: now,
            description: "Initial install underway".to_string(),
            notes: None,
        }
    }

    /// The next revision after `previous`, pending upgrade
    ///
    /// Values are not carried forward: the new revision holds exactly the
    /// values it was upgraded with.
    pub fn for_upgrade(previous: &StoredRelease, chart: ChartMetadata, values: ValuesDocument) -> Self {
        let now = Utc::now();
        Self {
            name: previous.name.clone(),
            namespace: previous.namespace.clone(),
            version: previous.version + 1,
            state: ReleaseState::PendingUpgrade {
                started_at: now,
                previous_version: previous.version,
            },
            chart,
            values,
            manifest: String::new(),
            deployed_at: previous.deployed_at,
            created_at: now,
            updated_at: now,
            description: "Preparing upgrade".to_string(),
            notes: None,
        }
    }

    /// Storage key for this release
    pub fn storage_key(&self) -> String {
        storage_key(&self.name, self.version)
    }

    pub fn status(&self) -> ReleaseStatus {
        self.state.status()
    }

    pub fn mark_deployed(&mut self, description: &str) {
        self.set_state(ReleaseState::Deployed, description);
    }

    pub fn mark_failed(&mut self, reason: String, description: String) {
        self.set_state(
            ReleaseState::Failed {
                reason,
                failed_at: Utc::now(),
            },
            &description,
        );
    }

    pub fn mark_superseded(&mut self) {
        self.state = ReleaseState::Superseded;
        self.updated_at = Utc::now();
    }

    pub fn mark_uninstalling(&mut self) {
        self.set_state(
            ReleaseState::Uninstalling {
                started_at: Utc::now(),
            },
            "Deletion in progress",
        );
    }

    fn set_state(&mut self, state: ReleaseState, description: &str) {
        self.state = state;
        self.description = description.to_string();
        self.updated_at = Utc::now();
    }

    /// Caller-facing summary of this revision
    pub fn to_record(&self) -> ReleaseRecord {
        ReleaseRecord {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            version: self.version,
            status: self.status(),
            deployed_at: self.deployed_at,
            description: self.description.clone(),
        }
    }
}

/// Storage key of a release revision
pub fn storage_key(name: &str, version: u32) -> String {
    format!("{}.{}.v{}", STORAGE_KEY_PREFIX, name, version)
}

/// Release state with timing information for pending operations
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ReleaseState {
    #[default]
    Deployed,

    Failed {
        reason: String,
        failed_at: DateTime<Utc>,
    },

    Uninstalled,

    /// Replaced by a newer revision
    Superseded,

    PendingInstall {
        started_at: DateTime<Utc>,
    },

    PendingUpgrade {
        started_at: DateTime<Utc>,
        previous_version: u32,
    },

    PendingRollback {
        started_at: DateTime<Utc>,
        target_version: u32,
    },

    Uninstalling {
        started_at: DateTime<Utc>,
    },

    /// Written by a newer or foreign writer
    #[serde(other)]
    Unknown,
}

impl ReleaseState {
    /// Check if this is a pending (transitional) state
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            Self::PendingInstall { .. }
                | Self::PendingUpgrade { .. }
                | Self::PendingRollback { .. }
                | Self::Uninstalling { .. }
        )
    }

    pub fn status(&self) -> ReleaseStatus {
        match self {
            Self::Deployed => ReleaseStatus::Deployed,
            Self::Failed { .. } => ReleaseStatus::Failed,
            Self::Uninstalled => ReleaseStatus::Uninstalled,
            Self::Superseded => ReleaseStatus::Superseded,
            Self::PendingInstall { .. } => ReleaseStatus::PendingInstall,
            Self::PendingUpgrade { .. } => ReleaseStatus::PendingUpgrade,
            Self::PendingRollback { .. } => ReleaseStatus::PendingRollback,
            Self::Uninstalling { .. } => ReleaseStatus::Uninstalling,
            Self::Unknown => ReleaseStatus::Unknown,
        }
    }
}

impl std::fmt::Display for ReleaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed { reason, .. } => write!(f, "failed: {}", reason),
            other => write!(f, "{}", other.status()),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn metadata(name: &str) -> ChartMetadata {
        serde_yaml::from_str(&format!("apiVersion: v2\nname: {}\nversion: 1.0.0\n", name)).unwrap()
    }

    pub(crate) fn deployed(name: &str, namespace: &str, version: u32) -> StoredRelease {
        let mut release = StoredRelease::for_install(name, namespace, metadata("app"), ValuesDocument::new());
        release.version = version;
        release.mark_deployed("Install complete");
        release
    }

    #[test]
    fn test_install_starts_pending() {
        let release = StoredRelease::for_install("myapp", "default", metadata("app"), ValuesDocument::new());
        assert_eq!(release.version, 1);
        assert_eq!(release.status(), ReleaseStatus::PendingInstall);
        assert!(release.state.is_pending());
        assert_eq!(release.storage_key(), "sh.chartd.release.v1.myapp.v1");
    }

    #[test]
    fn test_upgrade_keeps_first_deploy_time() {
        let previous = deployed("myapp", "prod", 3);
        let values = ValuesDocument::from_json(r#"{"replicaCount": 2}"#).unwrap();
        let next = StoredRelease::for_upgrade(&previous, metadata("app"), values.clone());

        assert_eq!(next.version, 4);
        assert_eq!(next.deployed_at, previous.deployed_at);
        assert_eq!(next.values, values);
        assert_eq!(
            next.state,
            ReleaseState::PendingUpgrade {
                started_at: next.created_at,
                previous_version: 3
            }
        );
    }

    #[test]
    fn test_state_serialization_is_tagged() {
        let mut release = deployed("myapp", "default", 1);
        release.mark_failed("boom".to_string(), "Install failed: boom".to_string());

        let json = serde_json::to_value(&release).unwrap();
        assert_eq!(json["state"]["status"], "failed");
        assert_eq!(json["state"]["reason"], "boom");

        let back: StoredRelease = serde_json::from_value(json).unwrap();
        assert_eq!(back.status(), ReleaseStatus::Failed);
        assert_eq!(back.description, "Install failed: boom");
    }

    #[test]
    fn test_unrecognized_state_is_unknown() {
        let state: ReleaseState = serde_json::from_str(r#"{"status": "recovering"}"#).unwrap();
        assert_eq!(state, ReleaseState::Unknown);
        assert_eq!(state.status(), ReleaseStatus::Unknown);
    }

    #[test]
    fn test_record_projection() {
        let release = deployed("myapp", "default", 2);
        let record = release.to_record();
        assert_eq!(record.name, "myapp");
        assert_eq!(record.version, 2);
        assert_eq!(record.status, ReleaseStatus::Deployed);
        assert_eq!(record.description, "Install complete");
    }
}
