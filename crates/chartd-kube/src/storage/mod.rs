//! Storage drivers for persisting release information
//!
//! Releases are stored as gzip-compressed, base64-encoded JSON:
//! - **Secrets**: one Kubernetes Secret per revision (the source of truth)
//! - **Mock**: in memory, for tests and local runs without a cluster

mod mock;
mod secrets;

pub use mock::{MockStorageDriver, OperationCounts};
pub use secrets::SecretsDriver;

use async_trait::async_trait;
use base64::Engine as _;
use std::collections::BTreeMap;
use std::io::{Read, Write};

use crate::error::{KubeError, Result};
use crate::release::StoredRelease;

/// Label selecting every release this service owns
pub const OWNER_LABEL: &str = "owner";
pub const OWNER: &str = "chartd";

/// Storage driver trait for release persistence
///
/// Implementations must be Send + Sync for use across async tasks.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Get a specific release by name and version
    async fn get(&self, namespace: &str, name: &str, version: u32) -> Result<StoredRelease>;

    /// Get the latest release for a name
    async fn get_latest(&self, namespace: &str, name: &str) -> Result<StoredRelease>;

    /// List the latest revision of every release, optionally in one namespace
    async fn list(&self, namespace: Option<&str>) -> Result<Vec<StoredRelease>>;

    /// All revisions of a release, newest first
    async fn history(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>>;

    /// Create a new revision; fails with `ReleaseAlreadyExists` if it is taken
    async fn create(&self, release: &StoredRelease) -> Result<()>;

    /// Replace an existing revision
    async fn update(&self, release: &StoredRelease) -> Result<()>;

    /// Delete all versions of a release
    async fn delete_all(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>>;

    /// Check if a release exists
    async fn exists(&self, namespace: &str, name: &str) -> Result<bool> {
        match self.get_latest(namespace, name).await {
            Ok(_) => Ok(true),
            Err(KubeError::ReleaseNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Keep only the newest revision of each `(namespace, name)`
pub(crate) fn latest_revisions(mut releases: Vec<StoredRelease>) -> Vec<StoredRelease> {
    releases.sort_by(|a, b| b.version.cmp(&a.version));
    let mut seen = std::collections::HashSet::new();
    releases.retain(|r| seen.insert((r.namespace.clone(), r.name.clone())));
    releases
}

pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| KubeError::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| KubeError::Compression(e.to_string()))
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = flate2::read::GzDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| KubeError::Compression(e.to_string()))?;
    Ok(decompressed)
}

/// Encode a release for storage (serialize + gzip + base64)
pub fn encode_for_storage(release: &StoredRelease) -> Result<String> {
    let json = serde_json::to_vec(release)?;
    let compressed = compress(&json)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(compressed))
}

/// Decode a release from storage (base64 + gunzip + deserialize)
pub fn decode_from_storage(data: &str) -> Result<StoredRelease> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| KubeError::Serialization(format!("base64 decode error: {}", e)))?;
    let json = decompress(&decoded)?;
    Ok(serde_json::from_slice(&json)?)
}

/// Labels applied to every stored revision
pub fn storage_labels(release: &StoredRelease) -> BTreeMap<String, String> {
    BTreeMap::from([
        (OWNER_LABEL.to_string(), OWNER.to_string()),
        ("name".to_string(), release.name.clone()),
        ("version".to_string(), release.version.to_string()),
        ("status".to_string(), release.status().to_string()),
    ])
}
