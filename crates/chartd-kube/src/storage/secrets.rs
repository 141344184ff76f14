//! Kubernetes Secrets storage driver
//!
//! One Secret per revision, named `sh.chartd.release.v1.<name>.v<version>`
//! and labelled so a release's history can be listed with a selector.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Client;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use std::collections::BTreeMap;

use super::{
    OWNER, OWNER_LABEL, StorageDriver, decode_from_storage, encode_for_storage,
    latest_revisions, storage_labels,
};
use crate::error::{KubeError, Result};
use crate::release::{StoredRelease, storage_key};

/// Secret type marking release storage
const SECRET_TYPE: &str = "chartd.sh/release.v1";

/// Data key holding the encoded release
const RELEASE_KEY: &str = "release";

/// Kubernetes Secrets storage driver
#[derive(Clone)]
pub struct SecretsDriver {
    client: Client,
}

impl SecretsDriver {
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn secrets_api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn build_secret(release: &StoredRelease) -> Result<Secret> {
        let encoded = encode_for_storage(release)?;
        let data = BTreeMap::from([(
            RELEASE_KEY.to_string(),
            k8s_openapi::ByteString(encoded.into_bytes()),
        )]);

        Ok(Secret {
            metadata: ObjectMeta {
                name: Some(release.storage_key()),
                namespace: Some(release.namespace.clone()),
                labels: Some(storage_labels(release)),
                ..Default::default()
            },
            type_: Some(SECRET_TYPE.to_string()),
            data: Some(data),
            ..Default::default()
        })
    }

    fn parse_secret(secret: &Secret) -> Result<StoredRelease> {
        let data = secret
            .data
            .as_ref()
            .and_then(|d| d.get(RELEASE_KEY))
            .ok_or_else(|| KubeError::Storage("Secret missing 'release' data".to_string()))?;

        let encoded = std::str::from_utf8(&data.0)
            .map_err(|e| KubeError::Storage(format!("Invalid UTF-8 in secret: {}", e)))?;

        decode_from_storage(encoded)
    }

    /// Decode every release Secret, skipping ones that cannot be read
    fn parse_all(secrets: &[Secret]) -> Vec<StoredRelease> {
        secrets
            .iter()
            .filter_map(|secret| match Self::parse_secret(secret) {
                Ok(release) => Some(release),
                Err(e) => {
                    tracing::warn!(
                        secret = secret.metadata.name.as_deref().unwrap_or("unnamed"),
                        error = %e,
                        "Skipping unreadable release secret"
                    );
                    None
                }
            })
            .collect()
    }

    fn not_found(namespace: &str, name: &str) -> KubeError {
        KubeError::ReleaseNotFound {
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }
}

#[async_trait]
impl StorageDriver for SecretsDriver {
    async fn get(&self, namespace: &str, name: &str, version: u32) -> Result<StoredRelease> {
        match self.secrets_api(namespace).get(&storage_key(name, version)).await {
            Ok(secret) => Self::parse_secret(&secret),
            Err(kube::Error::Api(e)) if e.code == 404 => Err(Self::not_found(namespace, name)),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_latest(&self, namespace: &str, name: &str) -> Result<StoredRelease> {
        let history = self.history(namespace, name).await?;
        history
            .into_iter()
            .next()
            .ok_or_else(|| Self::not_found(namespace, name))
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<StoredRelease>> {
        let lp = ListParams::default().labels(&format!("{}={}", OWNER_LABEL, OWNER));

        let secrets = match namespace {
            Some(ns) => self.secrets_api(ns).list(&lp).await?,
            None => Api::<Secret>::all(self.client.clone()).list(&lp).await?,
        };

        Ok(latest_revisions(Self::parse_all(&secrets.items)))
    }

    async fn history(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>> {
        let lp = ListParams::default().labels(&format!("{}={},name={}", OWNER_LABEL, OWNER, name));
        let secrets = self.secrets_api(namespace).list(&lp).await?;

        let mut releases = Self::parse_all(&secrets.items);
        releases.sort_by(|a, b| b.version.cmp(&a.version));

        if releases.is_empty() {
            return Err(Self::not_found(namespace, name));
        }
        Ok(releases)
    }

    async fn create(&self, release: &StoredRelease) -> Result<()> {
        let secret = Self::build_secret(release)?;

        // The API server rejects a second create of the same key, which is
        // what settles concurrent installs of one name
        match self
            .secrets_api(&release.namespace)
            .create(&PostParams::default(), &secret)
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 409 => Err(KubeError::ReleaseAlreadyExists {
                name: release.name.clone(),
                namespace: release.namespace.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, release: &StoredRelease) -> Result<()> {
        let secret = Self::build_secret(release)?;
        self.secrets_api(&release.namespace)
            .replace(&release.storage_key(), &PostParams::default(), &secret)
            .await?;
        Ok(())
    }

    async fn delete_all(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>> {
        let releases = self.history(namespace, name).await?;
        let api = self.secrets_api(namespace);

        let results = futures::future::join_all(releases.iter().map(|release| {
            let api = api.clone();
            let key = release.storage_key();
            async move {
                match api.delete(&key, &DeleteParams::default()).await {
                    Ok(_) => Ok(()),
                    Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
                    Err(e) => Err(KubeError::from(e)),
                }
            }
        }))
        .await;

        results.into_iter().collect::<Result<Vec<()>>>()?;
        Ok(releases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::tests::deployed;

    #[test]
    fn test_secret_layout() {
        let release = deployed("myapp", "prod", 2);
        let secret = SecretsDriver::build_secret(&release).unwrap();

        assert_eq!(
            secret.metadata.name.as_deref(),
            Some("sh.chartd.release.v1.myapp.v2")
        );
        assert_eq!(secret.metadata.namespace.as_deref(), Some("prod"));
        assert_eq!(secret.type_.as_deref(), Some(SECRET_TYPE));

        let labels = secret.metadata.labels.as_ref().unwrap();
        assert_eq!(labels["owner"], "chartd");
        assert_eq!(labels["status"], "deployed");

        let parsed = SecretsDriver::parse_secret(&secret).unwrap();
        assert_eq!(parsed.name, "myapp");
        assert_eq!(parsed.version, 2);
    }

    #[test]
    fn test_unreadable_secrets_are_skipped() {
        let good = SecretsDriver::build_secret(&deployed("myapp", "prod", 1)).unwrap();
        let empty = Secret {
            metadata: ObjectMeta {
                name: Some("sh.chartd.release.v1.broken.v1".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let parsed = SecretsDriver::parse_all(&[good, empty]);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].name, "myapp");
    }
}
