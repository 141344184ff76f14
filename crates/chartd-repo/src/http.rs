//! HTTP repository implementation
//!
//! Supports Helm-style HTTP repositories with `index.yaml`. Indexes of named
//! repositories are cached as `<cache>/<name>-index.yaml`.

use std::path::PathBuf;

use crate::archive::{compute_digest, digest_matches};
use crate::config::Repository;
use crate::credentials::{ScopedCredentials, SecureHttpClient};
use crate::error::{RepoError, Result};
use crate::index::{ChartEntry, RepositoryIndex};

/// HTTP repository client
pub struct HttpRepository {
    repo: Repository,
    client: SecureHttpClient,
    /// Index cache file; `None` for ad-hoc repositories
    index_cache: Option<PathBuf>,
}

impl HttpRepository {
    pub fn new(repo: Repository, client: SecureHttpClient, index_cache: Option<PathBuf>) -> Self {
        Self {
            repo,
            client,
            index_cache,
        }
    }

    pub fn name(&self) -> &str {
        &self.repo.name
    }

    pub fn url(&self) -> &str {
        &self.repo.url
    }

    fn credentials(&self) -> Option<ScopedCredentials> {
        self.repo
            .basic_auth()
            .map(|(user, pass)| ScopedCredentials::new(&self.repo.url, user, pass))
    }

    /// Download the index and refresh the cache file
    pub async fn fetch_index(&self) -> Result<RepositoryIndex> {
        let index_url = self.repo.index_url();
        tracing::debug!(repo = %self.repo.name, url = %index_url, "Fetching repository index");

        let data = self
            .client
            .get_bytes(&index_url, self.credentials().as_ref())
            .await?;
        let index = RepositoryIndex::from_bytes(&data)?;

        if let Some(path) = &self.index_cache {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &data)?;
        }

        Ok(index)
    }

    /// Cached index when present, otherwise a fresh download
    pub async fn load_index(&self) -> Result<RepositoryIndex> {
        match &self.index_cache {
            Some(path) if path.exists() => match RepositoryIndex::load(path) {
                Ok(index) => Ok(index),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable index cache");
                    self.fetch_index().await
                }
            },
            _ => self.fetch_index().await,
        }
    }

    /// Find the best entry for a constraint
    ///
    /// With `refresh` the index is always downloaded. Otherwise the cached
    /// index is tried first and refreshed once on a miss.
    pub async fn find(&self, name: &str, constraint: &str, refresh: bool) -> Result<ChartEntry> {
        if !refresh && self.index_cache.as_ref().is_some_and(|p| p.exists()) {
            let cached = self.load_index().await?;
            if let Ok(entry) = cached.find_best_match(name, constraint, &self.repo.name) {
                return Ok(entry.clone());
            }
        }

        let index = self.fetch_index().await?;
        index
            .find_best_match(name, constraint, &self.repo.name)
            .cloned()
    }

    /// Download a chart archive and verify its digest
    pub async fn download(&self, entry: &ChartEntry) -> Result<Vec<u8>> {
        let url = entry.download_url().ok_or_else(|| RepoError::ChartNotFound {
            name: entry.name.clone(),
            repo: self.repo.name.clone(),
        })?;

        // Relative URLs are relative to the repository root
        let full_url = if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}/{}", self.repo.url.trim_end_matches('/'), url)
        };

        let data = self
            .client
            .get_bytes(&full_url, self.credentials().as_ref())
            .await?;

        if let Some(expected_digest) = &entry.digest {
            let actual_digest = compute_digest(&data);
            if !digest_matches(expected_digest, &actual_digest) {
                return Err(RepoError::IntegrityCheckFailed {
                    name: entry.name.clone(),
                    expected: expected_digest.clone(),
                    actual: actual_digest,
                });
            }
        }

        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::chart_archive;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn index_yaml(digest: &str) -> String {
        format!(
            r#"apiVersion: v1
entries:
  redis:
    - name: redis
      version: 17.1.0
      urls: [charts/redis-17.1.0.tgz]
      digest: "{digest}"
    - name: redis
      version: 16.0.0
      urls: [charts/redis-16.0.0.tgz]
"#
        )
    }

    #[tokio::test]
    async fn test_find_and_download_with_digest() {
        let server = MockServer::start().await;
        let archive = chart_archive("redis", &[("Chart.yaml", "apiVersion: v2\nname: redis\nversion: 17.1.0\n")]);

        Mock::given(method("GET"))
            .and(path("/index.yaml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(index_yaml(&compute_digest(&archive))))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/charts/redis-17.1.0.tgz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(archive.clone()))
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let cache = temp.path().join("cache").join("test-index.yaml");
        let repo = HttpRepository::new(
            Repository::new("test", server.uri()),
            SecureHttpClient::new().unwrap(),
            Some(cache.clone()),
        );

        let entry = repo.find("redis", "^17", false).await.unwrap();
        assert_eq!(entry.version, "17.1.0");
        assert!(cache.exists());

        // Served from the cache this time
        let entry = repo.find("redis", "~17.1", false).await.unwrap();
        let data = repo.download(&entry).await.unwrap();
        assert_eq!(data, archive);
    }

    #[tokio::test]
    async fn test_download_rejects_digest_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.yaml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(index_yaml("sha256:deadbeef")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/charts/redis-17.1.0.tgz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"tampered".to_vec()))
            .mount(&server)
            .await;

        let repo = HttpRepository::new(
            Repository::new("test", server.uri()),
            SecureHttpClient::new().unwrap(),
            None,
        );

        let entry = repo.find("redis", "^17", false).await.unwrap();
        let err = repo.download(&entry).await.unwrap_err();
        assert!(matches!(err, RepoError::IntegrityCheckFailed { .. }));
    }
}
