//! Request bodies and response projections

use chartd_core::{DEFAULT_NAMESPACE, ReleaseRecord, ValuesDocument, validate_release_name};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ApiError;

/// Layout of `ReleaseInfo::deployed_at`
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

/// Absent and `null` both mean the default namespace
fn namespace_or_default<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let namespace = Option::<String>::deserialize(deserializer)?;
    Ok(namespace.unwrap_or_else(default_namespace))
}

/// Body of `POST /`
#[derive(Debug, Clone, Deserialize)]
pub struct InstallRequest {
    pub name: String,

    /// Absent means `default`; resolved here and nowhere else
    #[serde(default = "default_namespace", deserialize_with = "namespace_or_default")]
    pub namespace: String,

    pub chart: String,

    #[serde(default)]
    pub values: Option<ValuesDocument>,
}

impl InstallRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        require("name", &self.name)?;
        validate_release_name(&self.name).map_err(|e| ApiError::BadRequest(e.to_string()))?;
        require("namespace", &self.namespace)?;
        require("chart", &self.chart)?;
        check_values(self.values.as_ref())
    }

    pub fn values(&self) -> ValuesDocument {
        self.values.clone().unwrap_or_default()
    }
}

/// Body of `PUT /{namespace}/{name}`
#[derive(Debug, Clone, Deserialize)]
pub struct UpgradeRequest {
    pub chart: String,

    #[serde(default)]
    pub values: Option<ValuesDocument>,
}

impl UpgradeRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        require("chart", &self.chart)?;
        check_values(self.values.as_ref())
    }

    pub fn values(&self) -> ValuesDocument {
        self.values.clone().unwrap_or_default()
    }
}

fn require(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{} must not be empty", field)));
    }
    Ok(())
}

fn check_values(values: Option<&ValuesDocument>) -> Result<(), ApiError> {
    match values {
        None | Some(ValuesDocument::Mapping(_)) => Ok(()),
        Some(_) => Err(ApiError::BadRequest("values must be an object".to_string())),
    }
}

/// One release as returned by the API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    pub version: u32,

    pub deployed_at: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl From<&ReleaseRecord> for ReleaseInfo {
    fn from(record: &ReleaseRecord) -> Self {
        Self {
            name: record.name.clone(),
            status: record.status.to_string(),
            namespace: record.namespace.clone(),
            version: record.version,
            deployed_at: record.deployed_at.format(TIMESTAMP_FORMAT).to_string(),
            description: record.description.clone(),
        }
    }
}

/// Body of the listing endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseList {
    pub total_items: usize,
    pub releases: Vec<ReleaseInfo>,
}

impl From<&[ReleaseRecord]> for ReleaseList {
    fn from(records: &[ReleaseRecord]) -> Self {
        let releases: Vec<ReleaseInfo> = records.iter().map(ReleaseInfo::from).collect();
        Self {
            total_items: releases.len(),
            releases,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chartd_core::ReleaseStatus;
    use chrono::{TimeZone, Utc};

    fn record() -> ReleaseRecord {
        ReleaseRecord {
            name: "myapp".to_string(),
            namespace: "default".to_string(),
            version: 2,
            status: ReleaseStatus::Deployed,
            deployed_at: Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap(),
            description: "Upgrade complete".to_string(),
        }
    }

    #[test]
    fn test_namespace_defaults_once_at_parse() {
        let req: InstallRequest = serde_json::from_str(r#"{"name": "myapp", "chart": "./app"}"#).unwrap();
        assert_eq!(req.namespace, "default");
        assert_eq!(req.values(), ValuesDocument::new());
        assert!(req.validate().is_ok());

        let req: InstallRequest =
            serde_json::from_str(r#"{"name": "myapp", "namespace": "team-a", "chart": "./app"}"#).unwrap();
        assert_eq!(req.namespace, "team-a");
    }

    #[test]
    fn test_null_namespace_is_default() {
        let req: InstallRequest =
            serde_json::from_str(r#"{"name": "myapp", "namespace": null, "chart": "./app"}"#).unwrap();
        assert_eq!(req.namespace, "default");
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_release_names() {
        for name in ["My_App", "a/b", "web-"] {
            let req: InstallRequest =
                serde_json::from_str(&format!(r#"{{"name": "{}", "chart": "./app"}}"#, name)).unwrap();
            assert!(
                matches!(req.validate(), Err(ApiError::BadRequest(m)) if m.contains("invalid release name")),
                "{}",
                name
            );
        }

        let long = "a".repeat(54);
        let req: InstallRequest =
            serde_json::from_str(&format!(r#"{{"name": "{}", "chart": "./app"}}"#, long)).unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_empty_fields() {
        let req: InstallRequest = serde_json::from_str(r#"{"name": "", "chart": "./app"}"#).unwrap();
        assert!(matches!(req.validate(), Err(ApiError::BadRequest(m)) if m.contains("name")));

        let req: UpgradeRequest = serde_json::from_str(r#"{"chart": " "}"#).unwrap();
        assert!(req.validate().is_err());

        let req: UpgradeRequest = serde_json::from_str(r#"{"chart": "./app", "values": [1, 2]}"#).unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_release_info_projection() {
        let info = ReleaseInfo::from(&record());
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "name": "myapp",
                "status": "deployed",
                "namespace": "default",
                "version": 2,
                "deployed_at": "2024-03-09 14:05:07",
                "description": "Upgrade complete",
            })
        );
    }

    #[test]
    fn test_empty_fields_are_omitted() {
        let mut record = record();
        record.description.clear();
        record.namespace.clear();

        let json = serde_json::to_value(ReleaseInfo::from(&record)).unwrap();
        assert!(json.get("description").is_none());
        assert!(json.get("namespace").is_none());
        assert_eq!(json["status"], "deployed");
    }

    #[test]
    fn test_list_counts_items() {
        let list = ReleaseList::from(&[record(), record()][..]);
        assert_eq!(list.total_items, 2);

        let none: Vec<ReleaseRecord> = Vec::new();
        let empty = serde_json::to_value(ReleaseList::from(none.as_slice())).unwrap();
        assert_eq!(empty, serde_json::json!({"total_items": 0, "releases": []}));
    }
}
