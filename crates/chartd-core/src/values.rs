//! Values documents with deep merge support

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::Result;

/// A recursive configuration document supplied by callers or by a chart's
/// `values.yaml`
///
/// Serializes to and from plain JSON/YAML, so request bodies and values files
/// map onto it directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "JsonValue", into = "JsonValue")]
pub enum ValuesDocument {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Sequence(Vec<ValuesDocument>),
    Mapping(BTreeMap<String, ValuesDocument>),
}

impl Default for ValuesDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl ValuesDocument {
    /// Create an empty mapping
    pub fn new() -> Self {
        Self::Mapping(BTreeMap::new())
    }

    /// Load values from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse values from a YAML string
    ///
    /// An empty or comment-only document yields an empty mapping.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::new());
        }
        let value: JsonValue = serde_yaml::from_str(yaml)?;
        Ok(Self::from(value).null_as_empty())
    }

    /// Parse values from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let value: JsonValue = serde_json::from_str(json)?;
        Ok(Self::from(value))
    }

    fn null_as_empty(self) -> Self {
        match self {
            Self::Null => Self::new(),
            other => other,
        }
    }

    /// Borrow the entries when this document is a mapping
    pub fn as_mapping(&self) -> Option<&BTreeMap<String, ValuesDocument>> {
        match self {
            Self::Mapping(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// True for `null` and for an empty mapping
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Mapping(map) => map.is_empty(),
            _ => false,
        }
    }

    /// Get a value by dotted path (e.g. `image.tag`)
    pub fn get(&self, path: &str) -> Option<&ValuesDocument> {
        path.split('.')
            .filter(|segment| !segment.is_empty())
            .try_fold(self, |current, segment| match current {
                Self::Mapping(map) => map.get(segment),
                _ => None,
            })
    }

    /// Deep merge another document into this one
    ///
    /// Mappings merge recursively; scalars and sequences from the overlay
    /// replace what is in `self`.
    pub fn merge(&mut self, overlay: &ValuesDocument) {
        match (self, overlay) {
            (Self::Mapping(base), Self::Mapping(overlay)) => {
                for (key, value) in overlay {
                    match base.get_mut(key) {
                        Some(existing) => existing.merge(value),
                        None => {
                            base.insert(key.clone(), value.clone());
                        }
                    }
                }
            }
            (base, overlay) => *base = overlay.clone(),
        }
    }

    /// Helm-style truthiness used to evaluate dependency conditions
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            Self::String(s) => !s.is_empty() && s != "false" && s != "0",
            Self::Sequence(items) => !items.is_empty(),
            Self::Mapping(map) => !map.is_empty(),
        }
    }

    /// Scope parent values for a subchart
    ///
    /// The subchart sees the entries under its own key as root values, plus
    /// the parent's `global` block.
    ///
    /// ```yaml
    /// global: {registry: docker.io}
    /// redis: {replicas: 3}
    /// ```
    ///
    /// scoped for `redis` becomes `{global: {registry: docker.io}, replicas: 3}`.
    pub fn scope_for_subchart(&self, subchart_name: &str) -> ValuesDocument {
        let mut scoped = BTreeMap::new();

        if let Self::Mapping(parent) = self {
            if let Some(global) = parent.get("global") {
                scoped.insert("global".to_string(), global.clone());
            }
            if let Some(Self::Mapping(own)) = parent.get(subchart_name) {
                for (key, value) in own {
                    scoped.insert(key.clone(), value.clone());
                }
            }
        }

        Self::Mapping(scoped)
    }

    /// Subchart defaults overlaid with the scoped parent values
    pub fn for_subchart(
        subchart_defaults: &ValuesDocument,
        parent: &ValuesDocument,
        subchart_name: &str,
    ) -> ValuesDocument {
        let mut result = subchart_defaults.clone();
        result.merge(&parent.scope_for_subchart(subchart_name));
        result
    }

    pub fn to_json(&self) -> JsonValue {
        JsonValue::from(self.clone())
    }
}

impl From<JsonValue> for ValuesDocument {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(b),
            JsonValue::Number(n) => Self::Number(n),
            JsonValue::String(s) => Self::String(s),
            JsonValue::Array(items) => Self::Sequence(items.into_iter().map(Self::from).collect()),
            JsonValue::Object(map) => {
                Self::Mapping(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<ValuesDocument> for JsonValue {
    fn from(value: ValuesDocument) -> Self {
        match value {
            ValuesDocument::Null => JsonValue::Null,
            ValuesDocument::Bool(b) => JsonValue::Bool(b),
            ValuesDocument::Number(n) => JsonValue::Number(n),
            ValuesDocument::String(s) => JsonValue::String(s),
            ValuesDocument::Sequence(items) => {
                JsonValue::Array(items.into_iter().map(JsonValue::from).collect())
            }
            ValuesDocument::Mapping(map) => JsonValue::Object(
                map.into_iter()
                    .map(|(k, v)| (k, JsonValue::from(v)))
                    .collect(),
            ),
        }
    }
}
