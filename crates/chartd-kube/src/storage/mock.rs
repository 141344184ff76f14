//! Mock storage driver for testing
//!
//! This driver stores releases in memory, useful for unit tests
//! without requiring a Kubernetes cluster.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{StorageDriver, latest_revisions};
use crate::error::{KubeError, Result};
use crate::release::StoredRelease;

/// namespace -> name -> version -> release
type Store = HashMap<String, HashMap<String, HashMap<u32, StoredRelease>>>;

/// In-memory storage driver for testing
#[derive(Clone, Default)]
pub struct MockStorageDriver {
    store: Arc<RwLock<Store>>,
    /// Track operation counts for assertions
    operations: Arc<RwLock<OperationCounts>>,
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub gets: usize,
    pub lists: usize,
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
}

impl MockStorageDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-populated releases
    pub fn with_releases(releases: Vec<StoredRelease>) -> Self {
        let driver = Self::new();
        {
            let mut store = driver.store_mut();
            for release in releases {
                store
                    .entry(release.namespace.clone())
                    .or_default()
                    .entry(release.name.clone())
                    .or_default()
                    .insert(release.version, release);
            }
        }
        driver
    }

    pub fn operation_counts(&self) -> OperationCounts {
        self.operations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Every stored revision, in no particular order
    pub fn all_releases(&self) -> Vec<StoredRelease> {
        self.store()
            .values()
            .flat_map(|ns| ns.values())
            .flat_map(|versions| versions.values())
            .cloned()
            .collect()
    }

    pub fn release_count(&self) -> usize {
        self.store()
            .values()
            .flat_map(|ns| ns.values())
            .map(|versions| versions.len())
            .sum()
    }

    fn store(&self) -> RwLockReadGuard<'_, Store> {
        self.store.read().unwrap_or_else(|e| e.into_inner())
    }

    fn store_mut(&self) -> RwLockWriteGuard<'_, Store> {
        self.store.write().unwrap_or_else(|e| e.into_inner())
    }

    fn count(&self, bump: impl FnOnce(&mut OperationCounts)) {
        bump(&mut self.operations.write().unwrap_or_else(|e| e.into_inner()));
    }

    fn not_found(namespace: &str, name: &str) -> KubeError {
        KubeError::ReleaseNotFound {
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }
}

#[async_trait]
impl StorageDriver for MockStorageDriver {
    async fn get(&self, namespace: &str, name: &str, version: u32) -> Result<StoredRelease> {
        self.count(|ops| ops.gets += 1);

        self.store()
            .get(namespace)
            .and_then(|ns| ns.get(name))
            .and_then(|versions| versions.get(&version))
            .cloned()
            .ok_or_else(|| Self::not_found(namespace, name))
    }

    async fn get_latest(&self, namespace: &str, name: &str) -> Result<StoredRelease> {
        self.count(|ops| ops.gets += 1);

        self.store()
            .get(namespace)
            .and_then(|ns| ns.get(name))
            .and_then(|versions| versions.values().max_by_key(|r| r.version))
            .cloned()
            .ok_or_else(|| Self::not_found(namespace, name))
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<StoredRelease>> {
        self.count(|ops| ops.lists += 1);

        let releases: Vec<StoredRelease> = self
            .store()
            .iter()
            .filter(|(ns, _)| namespace.is_none_or(|n| n == ns.as_str()))
            .flat_map(|(_, names)| names.values())
            .flat_map(|versions| versions.values())
            .cloned()
            .collect();

        Ok(latest_revisions(releases))
    }

    async fn history(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>> {
        self.count(|ops| ops.lists += 1);

        let mut releases: Vec<StoredRelease> = self
            .store()
            .get(namespace)
            .and_then(|ns| ns.get(name))
            .map(|versions| versions.values().cloned().collect())
            .unwrap_or_default();

        if releases.is_empty() {
            return Err(Self::not_found(namespace, name));
        }

        releases.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(releases)
    }

    async fn create(&self, release: &StoredRelease) -> Result<()> {
        self.count(|ops| ops.creates += 1);

        let mut store = self.store_mut();
        let versions = store
            .entry(release.namespace.clone())
            .or_default()
            .entry(release.name.clone())
            .or_default();

        if versions.contains_key(&release.version) {
            return Err(KubeError::ReleaseAlreadyExists {
                name: release.name.clone(),
                namespace: release.namespace.clone(),
            });
        }

        versions.insert(release.version, release.clone());
        Ok(())
    }

    async fn update(&self, release: &StoredRelease) -> Result<()> {
        self.count(|ops| ops.updates += 1);

        let mut store = self.store_mut();
        let versions = store
            .get_mut(&release.namespace)
            .and_then(|ns| ns.get_mut(&release.name))
            .filter(|versions| versions.contains_key(&release.version))
            .ok_or_else(|| Self::not_found(&release.namespace, &release.name))?;

        versions.insert(release.version, release.clone());
        Ok(())
    }

    async fn delete_all(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>> {
        self.count(|ops| ops.deletes += 1);

        let releases: Vec<StoredRelease> = self
            .store_mut()
            .get_mut(namespace)
            .and_then(|ns| ns.remove(name))
            .map(|versions| versions.into_values().collect())
            .unwrap_or_default();

        if releases.is_empty() {
            return Err(Self::not_found(namespace, name));
        }

        Ok(releases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::tests::deployed;

    #[tokio::test]
    async fn test_mock_create_and_get() {
        let driver = MockStorageDriver::new();

        driver.create(&deployed("myapp", "default", 1)).await.unwrap();

        let retrieved = driver.get("default", "myapp", 1).await.unwrap();
        assert_eq!(retrieved.name, "myapp");
        assert_eq!(retrieved.version, 1);

        let counts = driver.operation_counts();
        assert_eq!(counts.creates, 1);
        assert_eq!(counts.gets, 1);
    }

    #[tokio::test]
    async fn test_mock_create_conflict() {
        let driver = MockStorageDriver::new();
        let release = deployed("myapp", "default", 1);

        driver.create(&release).await.unwrap();
        let err = driver.create(&release).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_mock_update_requires_existing() {
        let driver = MockStorageDriver::new();
        let err = driver.update(&deployed("myapp", "default", 1)).await.unwrap_err();
        assert!(matches!(err, KubeError::ReleaseNotFound { .. }));
    }

    #[tokio::test]
    async fn test_mock_latest_and_history() {
        let driver = MockStorageDriver::with_releases(vec![
            deployed("myapp", "default", 1),
            deployed("myapp", "default", 2),
            deployed("myapp", "default", 3),
        ]);

        assert_eq!(driver.get_latest("default", "myapp").await.unwrap().version, 3);

        let history = driver.history("default", "myapp").await.unwrap();
        let versions: Vec<u32> = history.iter().map(|r| r.version).collect();
        assert_eq!(versions, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn test_mock_list_by_namespace() {
        let driver = MockStorageDriver::with_releases(vec![
            deployed("app1", "ns1", 1),
            deployed("app1", "ns1", 2),
            deployed("app2", "ns1", 1),
            deployed("app3", "ns2", 1),
        ]);

        assert_eq!(driver.list(None).await.unwrap().len(), 3);
        assert_eq!(driver.list(Some("ns1")).await.unwrap().len(), 2);
        assert!(driver.list(Some("empty")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mock_delete_all() {
        let driver = MockStorageDriver::with_releases(vec![
            deployed("myapp", "default", 1),
            deployed("myapp", "default", 2),
            deployed("other", "default", 1),
        ]);

        let deleted = driver.delete_all("default", "myapp").await.unwrap();
        assert_eq!(deleted.len(), 2);
        assert_eq!(driver.release_count(), 1);
        assert!(!driver.exists("default", "myapp").await.unwrap());

        let err = driver.delete_all("default", "myapp").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
