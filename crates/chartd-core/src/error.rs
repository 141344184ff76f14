//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("chart not found: {path}")]
    ChartNotFound { path: String },

    #[error("invalid chart: {message}")]
    InvalidChart { message: String },

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid version: {0}")]
    InvalidVersion(#[from] semver::Error),

    #[error("invalid release name '{name}': {reason}")]
    InvalidReleaseName { name: String, reason: String },

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("missing required field: {field}")]
    MissingField { field: String },
}

pub type Result<T> = std::result::Result<T, CoreError>;
