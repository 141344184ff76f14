//! Error types for repository operations and chart resolution

use chartd_core::CoreError;
use thiserror::Error;

/// Repository operation errors
#[derive(Debug, Error)]
pub enum RepoError {
    // ============ Configuration Errors ============
    #[error("Repository not found: {name}")]
    RepositoryNotFound { name: String },

    #[error("Invalid repository URL: {url} - {reason}")]
    InvalidRepositoryUrl { url: String, reason: String },

    #[error("Invalid repository configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Invalid registry credentials file {path}: {message}")]
    InvalidCredentials { path: String, message: String },

    // ============ Network Errors ============
    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Request timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Authentication required for {url}")]
    AuthRequired { url: String },

    #[error("Authentication failed: {message}")]
    AuthFailed { message: String },

    // ============ Index Errors ============
    #[error("Index parse error: {message}")]
    IndexParseError { message: String },

    // ============ Chart Errors ============
    #[error("Chart not found: {name} in repository {repo}")]
    ChartNotFound { name: String, repo: String },

    #[error("Chart reference could not be located: {reference}")]
    UnknownReference { reference: String },

    #[error("Version constraint unsatisfiable: {name} requires {constraint}, available: {available}")]
    UnsatisfiableConstraint {
        name: String,
        constraint: String,
        available: String,
    },

    #[error("Dependency '{name}' has no repository and is not vendored under charts/")]
    NotVendored { name: String },

    #[error("Invalid chart archive: {message}")]
    InvalidArchive { message: String },

    // ============ Lock File Errors ============
    #[error("Integrity check failed for {name}: expected {expected}, got {actual}")]
    IntegrityCheckFailed {
        name: String,
        expected: String,
        actual: String,
    },

    // ============ OCI Errors ============
    #[error("OCI registry error: {message}")]
    OciError { message: String },

    #[error("Invalid OCI reference: {reference}")]
    InvalidOciReference { reference: String },

    // ============ Wrapped Errors ============
    #[error(transparent)]
    Chart(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for repository operations
pub type Result<T> = std::result::Result<T, RepoError>;

impl From<reqwest::Error> for RepoError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RepoError::Timeout { seconds: 30 }
        } else if e.is_connect() {
            RepoError::NetworkError {
                message: format!("Connection failed: {}", e),
            }
        } else if let Some(status) = e.status() {
            RepoError::HttpError {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            RepoError::NetworkError {
                message: e.to_string(),
            }
        }
    }
}

impl From<serde_yaml::Error> for RepoError {
    fn from(e: serde_yaml::Error) -> Self {
        RepoError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(e: serde_json::Error) -> Self {
        RepoError::Serialization(e.to_string())
    }
}

impl From<url::ParseError> for RepoError {
    fn from(e: url::ParseError) -> Self {
        RepoError::InvalidRepositoryUrl {
            url: String::new(),
            reason: e.to_string(),
        }
    }
}

impl From<semver::Error> for RepoError {
    fn from(e: semver::Error) -> Self {
        RepoError::InvalidConfig {
            message: format!("Invalid semver: {}", e),
        }
    }
}

impl From<walkdir::Error> for RepoError {
    fn from(e: walkdir::Error) -> Self {
        RepoError::Io(e.into())
    }
}

/// Failure of one chart resolution step
///
/// Each variant names the step that failed, so callers can tell a bad chart
/// reference from an unmet dependency without parsing messages.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("failed to locate chart '{reference}': {source}")]
    Locate {
        reference: String,
        #[source]
        source: RepoError,
    },

    #[error("failed to load chart from {path}: {source}")]
    Load {
        path: String,
        #[source]
        source: RepoError,
    },

    #[error("{chart_type} charts are not installable")]
    NotInstallable { chart_type: String },

    #[error("unmet dependencies: {}", .0.join(", "))]
    Unmet(Vec<String>),

    #[error("failed to update dependencies: {0}")]
    Update(#[source] RepoError),

    #[error("failed to reload chart after dependency update: {0}")]
    Reload(#[source] RepoError),
}

impl ResolveError {
    /// Short machine-friendly name of the failed step
    pub fn step(&self) -> &'static str {
        match self {
            Self::Locate { .. } => "locate",
            Self::Load { .. } => "load",
            Self::NotInstallable { .. } => "validate",
            Self::Unmet(_) => "dependencies",
            Self::Update(_) => "dependency-update",
            Self::Reload(_) => "reload",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_installable_message() {
        let err = ResolveError::NotInstallable {
            chart_type: "library".to_string(),
        };
        assert_eq!(err.to_string(), "library charts are not installable");
        assert_eq!(err.step(), "validate");
    }

    #[test]
    fn test_unmet_lists_names() {
        let err = ResolveError::Unmet(vec!["redis".to_string(), "postgresql".to_string()]);
        assert_eq!(err.to_string(), "unmet dependencies: redis, postgresql");
    }
}
