//! Release identity and the caller-facing release record

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Namespace used when a caller does not name one
pub const DEFAULT_NAMESPACE: &str = "default";

/// Longest accepted release name; resource names derived from it need room
/// for suffixes
pub const MAX_RELEASE_NAME_LEN: usize = 53;

/// DNS-1123 subdomain
const RELEASE_NAME_PATTERN: &str =
    r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$";

/// Check a release name against the rules storage and resource names impose
pub fn validate_release_name(name: &str) -> Result<()> {
    if name.len() > MAX_RELEASE_NAME_LEN {
        return Err(CoreError::InvalidReleaseName {
            name: name.to_string(),
            reason: format!("must be at most {} characters", MAX_RELEASE_NAME_LEN),
        });
    }
    if !Regex::new(RELEASE_NAME_PATTERN)?.is_match(name) {
        return Err(CoreError::InvalidReleaseName {
            name: name.to_string(),
            reason: "must consist of lower case alphanumeric characters, '-' or '.', \
                     and must start and end with an alphanumeric character"
                .to_string(),
        });
    }
    Ok(())
}

/// Lifecycle status of a release revision
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReleaseStatus {
    #[default]
    Unknown,
    Deployed,
    Uninstalled,
    Superseded,
    Failed,
    Uninstalling,
    PendingInstall,
    PendingUpgrade,
    PendingRollback,
}

impl ReleaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Deployed => "deployed",
            Self::Uninstalled => "uninstalled",
            Self::Superseded => "superseded",
            Self::Failed => "failed",
            Self::Uninstalling => "uninstalling",
            Self::PendingInstall => "pending-install",
            Self::PendingUpgrade => "pending-upgrade",
            Self::PendingRollback => "pending-rollback",
        }
    }

    /// Statuses shown by a listing: anything that is not history
    pub fn is_listed(&self) -> bool {
        !matches!(self, Self::Superseded | Self::Uninstalled)
    }
}

impl std::fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReleaseStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "unknown" => Self::Unknown,
            "deployed" => Self::Deployed,
            "uninstalled" => Self::Uninstalled,
            "superseded" => Self::Superseded,
            "failed" => Self::Failed,
            "uninstalling" | "pending-uninstall" => Self::Uninstalling,
            "pending-install" => Self::PendingInstall,
            "pending-upgrade" => Self::PendingUpgrade,
            "pending-rollback" => Self::PendingRollback,
            other => return Err(format!("unknown release status '{}'", other)),
        })
    }
}

/// `(namespace, name)` identity of a release
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReleaseReference {
    pub namespace: String,
    pub name: String,
}

impl ReleaseReference {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ReleaseReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Summary of the latest revision of a release
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    pub name: String,
    pub namespace: String,
    pub version: u32,
    pub status: ReleaseStatus,

    /// When revision 1 was first deployed
    pub deployed_at: DateTime<Utc>,

    #[serde(default)]
    pub description: String,
}

impl ReleaseRecord {
    pub fn reference(&self) -> ReleaseReference {
        ReleaseReference::new(&self.namespace, &self.name)
    }
}

/// Release information exposed to templates as `release`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseInfo {
    pub name: String,
    pub namespace: String,
    pub revision: u32,
    pub is_install: bool,
    pub is_upgrade: bool,
    pub service: String,
}

impl ReleaseInfo {
    pub fn for_install(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            revision: 1,
            is_install: true,
            is_upgrade: false,
            service: "chartd".to_string(),
        }
    }

    pub fn for_upgrade(name: &str, namespace: &str, revision: u32) -> Self {
        Self {
            revision,
            is_install: false,
            is_upgrade: true,
            ..Self::for_install(name, namespace)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_name_rules() {
        for name in ["myapp", "my-app", "web.v2", "a", "0db"] {
            assert!(validate_release_name(name).is_ok(), "{}", name);
        }
        for name in ["", "My_App", "a/b", "-app", "app-", "app..x", "my app"] {
            assert!(
                matches!(validate_release_name(name), Err(CoreError::InvalidReleaseName { .. })),
                "{}",
                name
            );
        }

        assert!(validate_release_name(&"a".repeat(MAX_RELEASE_NAME_LEN)).is_ok());
        let err = validate_release_name(&"a".repeat(MAX_RELEASE_NAME_LEN + 1)).unwrap_err();
        assert!(err.to_string().contains("at most 53"));
    }

    #[test]
    fn test_status_round_trip_names() {
        assert_eq!(ReleaseStatus::PendingInstall.to_string(), "pending-install");
        assert_eq!(
            serde_json::to_string(&ReleaseStatus::PendingUpgrade).unwrap(),
            "\"pending-upgrade\""
        );
        assert_eq!("deployed".parse::<ReleaseStatus>(), Ok(ReleaseStatus::Deployed));
        assert!("sleeping".parse::<ReleaseStatus>().is_err());
    }

    #[test]
    fn test_listed_statuses() {
        assert!(ReleaseStatus::Deployed.is_listed());
        assert!(ReleaseStatus::Failed.is_listed());
        assert!(ReleaseStatus::PendingInstall.is_listed());
        assert!(!ReleaseStatus::Superseded.is_listed());
        assert!(!ReleaseStatus::Uninstalled.is_listed());
    }

    #[test]
    fn test_reference_display() {
        let reference = ReleaseReference::new("apps", "web");
        assert_eq!(reference.to_string(), "apps/web");
    }

    #[test]
    fn test_release_info_for_upgrade() {
        let info = ReleaseInfo::for_upgrade("web", "apps", 4);
        assert_eq!(info.revision, 4);
        assert!(info.is_upgrade);
        assert!(!info.is_install);
        assert_eq!(info.service, "chartd");
    }
}
