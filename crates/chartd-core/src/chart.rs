//! Chart definition and loading
//!
//! A chart is read from a directory or a gzipped tarball into an in-memory
//! file map first, so both sources (and subchart archives nested under
//! `charts/`) go through the same loader.

use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Component, Path};

use crate::error::{CoreError, Result};
use crate::values::ValuesDocument;

pub const CHART_FILE: &str = "Chart.yaml";
pub const VALUES_FILE: &str = "values.yaml";
pub const LOCK_FILE: &str = "Chart.lock";
pub const CHARTS_DIR: &str = "charts";
pub const TEMPLATES_DIR: &str = "templates";

/// Declared chart type
///
/// Only untyped and `application` charts can be installed; `library` charts
/// only contribute helpers to their parents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChartType {
    #[default]
    Unspecified,
    Application,
    Library,
    Other(String),
}

impl ChartType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Unspecified => "",
            Self::Application => "application",
            Self::Library => "library",
            Self::Other(other) => other,
        }
    }

    pub fn is_installable(&self) -> bool {
        matches!(self, Self::Unspecified | Self::Application)
    }
}

impl From<String> for ChartType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "" => Self::Unspecified,
            "application" => Self::Application,
            "library" => Self::Library,
            _ => Self::Other(value),
        }
    }
}

impl From<ChartType> for String {
    fn from(value: ChartType) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for ChartType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contents of `Chart.yaml`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    /// Chart API version (`v1` or `v2`)
    pub api_version: String,

    /// Chart name (required)
    pub name: String,

    /// Chart version (required, SemVer)
    #[serde(with = "version_serde")]
    pub version: Version,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,

    #[serde(rename = "type", default)]
    pub chart_type: ChartType,

    /// Deprecated charts still install, with a warning
    #[serde(default)]
    pub deprecated: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
}

/// Chart dependency declared in `Chart.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    /// Chart name of the dependency
    pub name: String,

    /// Version constraint (semver)
    pub version: String,

    /// Repository URL, `@name`/`alias:name` reference, or empty when vendored
    #[serde(default)]
    pub repository: String,

    /// Comma-separated value paths; the first one that exists decides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Dependency {
    /// Get the effective name (alias if set, otherwise name)
    #[inline]
    pub fn effective_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Whether the dependency takes part in rendering for these values
    pub fn is_enabled_for(&self, values: &ValuesDocument) -> bool {
        if !self.enabled {
            return false;
        }
        let Some(condition) = &self.condition else {
            return true;
        };
        condition
            .split(',')
            .map(str::trim)
            .filter(|path| !path.is_empty())
            .find_map(|path| values.get(path))
            .map(ValuesDocument::is_truthy)
            .unwrap_or(true)
    }
}

/// A file belonging to a chart, keyed by its slash-separated relative path
#[derive(Debug, Clone, PartialEq)]
pub struct ChartFile {
    pub name: String,
    pub data: Vec<u8>,
}

impl ChartFile {
    pub fn contents(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }

    /// File name without its directory
    pub fn base_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

/// A loaded chart ready for validation and rendering
#[derive(Debug, Clone)]
pub struct ChartBundle {
    pub metadata: ChartMetadata,

    /// Default values from `values.yaml`
    pub values: ValuesDocument,

    /// Everything under `templates/`
    pub templates: Vec<ChartFile>,

    /// Charts materialized under `charts/`, sorted by name
    pub subcharts: Vec<ChartBundle>,
}

impl ChartBundle {
    /// Load a chart from a directory or a `.tgz` archive
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CoreError::ChartNotFound {
                path: path.display().to_string(),
            });
        }

        if path.is_file() {
            let data = std::fs::read(path)?;
            return Self::from_archive(&data);
        }

        Self::from_files(read_directory(path)?)
    }

    /// Load a chart from gzipped tarball bytes
    ///
    /// The archive holds a single top-level directory named after the chart.
    pub fn from_archive(data: &[u8]) -> Result<Self> {
        let gz = flate2::read::GzDecoder::new(data);
        let mut archive = tar::Archive::new(gz);
        let mut files = BTreeMap::new();

        for entry in archive.entries()? {
            let mut entry = entry?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let path = entry.path()?.into_owned();
            let Some(name) = relative_name(path.components().skip(1)) else {
                continue;
            };
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            files.insert(name, data);
        }

        if files.is_empty() {
            return Err(CoreError::InvalidChart {
                message: "archive contains no chart files".to_string(),
            });
        }

        Self::from_files(files)
    }

    fn from_files(mut files: BTreeMap<String, Vec<u8>>) -> Result<Self> {
        let chart_yaml = files.remove(CHART_FILE).ok_or_else(|| CoreError::InvalidChart {
            message: format!("{} not found", CHART_FILE),
        })?;
        let metadata: ChartMetadata = serde_yaml::from_slice(&chart_yaml)?;
        validate_metadata(&metadata)?;

        let values = match files.remove(VALUES_FILE) {
            Some(data) => ValuesDocument::from_yaml(&String::from_utf8_lossy(&data))?,
            None => ValuesDocument::new(),
        };

        let templates_prefix = format!("{}/", TEMPLATES_DIR);
        let charts_prefix = format!("{}/", CHARTS_DIR);

        let mut templates = Vec::new();
        let mut subchart_dirs: BTreeMap<String, BTreeMap<String, Vec<u8>>> = BTreeMap::new();
        let mut subchart_archives = Vec::new();

        for (name, data) in files {
            if name.starts_with(&templates_prefix) {
                templates.push(ChartFile { name, data });
            } else if let Some(rest) = name.strip_prefix(&charts_prefix) {
                match rest.split_once('/') {
                    Some((dir, inner)) => {
                        subchart_dirs
                            .entry(dir.to_string())
                            .or_default()
                            .insert(inner.to_string(), data);
                    }
                    None if rest.ends_with(".tgz") || rest.ends_with(".tar.gz") => {
                        subchart_archives.push(data);
                    }
                    None => {}
                }
            }
        }

        let mut subcharts = Vec::new();
        for (_, dir_files) in subchart_dirs {
            if dir_files.contains_key(CHART_FILE) {
                subcharts.push(Self::from_files(dir_files)?);
            }
        }
        for data in subchart_archives {
            subcharts.push(Self::from_archive(&data)?);
        }
        subcharts.sort_by(|a, b| a.name().cmp(b.name()));

        Ok(Self {
            metadata,
            values,
            templates,
            subcharts,
        })
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.metadata.dependencies
    }

    /// Find a materialized subchart by chart name
    pub fn subchart(&self, name: &str) -> Option<&ChartBundle> {
        self.subcharts.iter().find(|s| s.name() == name)
    }

    /// Enabled declared dependencies that have no materialized subchart
    pub fn unmet_dependencies(&self) -> Vec<String> {
        self.dependencies()
            .iter()
            .filter(|dep| dep.enabled && self.subchart(&dep.name).is_none())
            .map(|dep| dep.name.clone())
            .collect()
    }
}

fn validate_metadata(metadata: &ChartMetadata) -> Result<()> {
    if metadata.name.trim().is_empty() {
        return Err(CoreError::MissingField {
            field: "name".to_string(),
        });
    }
    if !matches!(metadata.api_version.as_str(), "v1" | "v2") {
        return Err(CoreError::InvalidChart {
            message: format!(
                "unsupported apiVersion '{}' for chart '{}'",
                metadata.api_version, metadata.name
            ),
        });
    }
    Ok(())
}

/// Read every regular file below `root`, skipping hidden entries
fn read_directory(root: &Path) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut files = BTreeMap::new();

    for entry in walkdir::WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
    {
        let entry = entry.map_err(|e| CoreError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if let Some(name) = relative_name(relative.components()) {
            files.insert(name, std::fs::read(entry.path())?);
        }
    }

    Ok(files)
}

/// Join normal path components with `/`, rejecting anything that escapes
fn relative_name<'a>(components: impl Iterator<Item = Component<'a>>) -> Option<String> {
    let mut parts = Vec::new();
    for component in components {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Serde helper for semver::Version
mod version_serde {
    use semver::Version;
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
        Version::parse(s.trim_start_matches('v')).map_err(serde::de::Error::custom)
    }
}
