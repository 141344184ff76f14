//! OCI registry client for chart pulls

use oci_distribution::Reference;
use oci_distribution::client::{Client, ClientConfig, ClientProtocol};
use oci_distribution::secrets::RegistryAuth;
use semver::{Version, VersionReq};
use std::path::Path;
use std::sync::Arc;

use crate::credentials::DockerConfig;
use crate::error::{RepoError, Result};

/// Media types for Helm charts in OCI
pub mod media_types {
    /// Helm chart config
    pub const HELM_CONFIG: &str = "application/vnd.cncf.helm.config.v1+json";
    /// Helm chart content layer
    pub const HELM_CONTENT: &str = "application/vnd.cncf.helm.chart.content.v1.tar+gzip";
}

/// Authenticated OCI registry access
///
/// Cheap to clone; the underlying client keeps its token cache behind an
/// `Arc`.
#[derive(Clone)]
pub struct RegistryClient {
    client: Arc<Client>,
    credentials: Arc<DockerConfig>,
}

impl std::fmt::Debug for RegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryClient")
            .field("registries", &self.credentials.auths.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RegistryClient {
    pub fn new(credentials: DockerConfig) -> Self {
        let config = ClientConfig {
            protocol: ClientProtocol::Https,
            ..Default::default()
        };
        Self {
            client: Arc::new(Client::new(config)),
            credentials: Arc::new(credentials),
        }
    }

    /// Registry access without credentials
    pub fn anonymous() -> Self {
        Self::new(DockerConfig::default())
    }

    /// Build a client from a docker-style credentials file
    ///
    /// A missing file yields an anonymous client.
    pub fn from_credentials_file(path: &Path) -> Result<Self> {
        Ok(Self::new(DockerConfig::load(path)?))
    }

    /// Registry authentication for a host
    pub fn auth_for(&self, registry: &str) -> RegistryAuth {
        match self.credentials.credentials_for_host(registry) {
            Some((username, password)) => RegistryAuth::Basic(username, password),
            None => RegistryAuth::Anonymous,
        }
    }

    /// Pull the chart archive for `oci://host/path/chart:tag`
    pub async fn pull_chart(&self, reference: &str) -> Result<Vec<u8>> {
        let reference = parse_reference(reference)?;
        let auth = self.auth_for(reference.registry());

        tracing::debug!(reference = %reference, "Pulling chart from registry");

        let image_data = self
            .client
            .pull(
                &reference,
                &auth,
                vec![media_types::HELM_CONFIG, media_types::HELM_CONTENT],
            )
            .await
            .map_err(|e| RepoError::OciError {
                message: format!("Failed to pull {}: {}", reference, e),
            })?;

        let chart_layer = image_data
            .layers
            .into_iter()
            .find(|l| l.media_type == media_types::HELM_CONTENT)
            .ok_or_else(|| RepoError::OciError {
                message: "No chart content layer found in manifest".to_string(),
            })?;

        Ok(chart_layer.data)
    }

    /// List tags of `oci://host/path/chart`
    pub async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        let reference = parse_reference(&format!("{}:latest", strip_tag(repository)))?;
        let auth = self.auth_for(reference.registry());

        let tags = self
            .client
            .list_tags(&reference, &auth, None, None)
            .await
            .map_err(|e| RepoError::OciError {
                message: format!("Failed to list tags: {}", e),
            })?;

        Ok(tags.tags)
    }

    /// Highest tag of a chart repository satisfying a semver constraint
    pub async fn resolve_tag(&self, repository: &str, constraint: &str) -> Result<String> {
        let tags = self.list_tags(repository).await?;
        best_matching_tag(repository, &tags, constraint)
    }
}

/// Parse an OCI reference, with or without the `oci://` prefix
pub fn parse_reference(reference: &str) -> Result<Reference> {
    let clean = reference.trim_start_matches("oci://");
    Reference::try_from(clean).map_err(|e| RepoError::InvalidOciReference {
        reference: format!("{}: {}", reference, e),
    })
}

/// Whether the last path segment carries a `:tag` or `@digest`
pub fn has_tag(reference: &str) -> bool {
    let last = reference.rsplit('/').next().unwrap_or(reference);
    last.contains(':') || last.contains('@')
}

fn strip_tag(reference: &str) -> &str {
    match reference.rsplit_once('/') {
        Some((base, last)) => match last.find([':', '@']) {
            Some(idx) => &reference[..base.len() + 1 + idx],
            None => reference,
        },
        None => reference,
    }
}

/// Pick the highest semver tag matching a constraint
///
/// Helm stores `+` build metadata as `_` in tags, so both spellings parse.
pub fn best_matching_tag(repository: &str, tags: &[String], constraint: &str) -> Result<String> {
    let req = VersionReq::parse(if constraint.trim().is_empty() { "*" } else { constraint })
        .map_err(|e| RepoError::UnsatisfiableConstraint {
            name: repository.to_string(),
            constraint: constraint.to_string(),
            available: e.to_string(),
        })?;

    tags.iter()
        .filter_map(|tag| {
            Version::parse(&tag.replace('_', "+"))
                .ok()
                .map(|version| (version, tag))
        })
        .filter(|(version, _)| req.matches(version))
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, tag)| tag.clone())
        .ok_or_else(|| RepoError::UnsatisfiableConstraint {
            name: repository.to_string(),
            constraint: constraint.to_string(),
            available: tags.join(", "),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use tempfile::TempDir;

    #[test]
    fn test_parse_reference() {
        let reference = parse_reference("oci://ghcr.io/acme/charts/web:1.2.0").unwrap();
        assert_eq!(reference.registry(), "ghcr.io");
        assert_eq!(reference.repository(), "acme/charts/web");
        assert_eq!(reference.tag(), Some("1.2.0"));
    }

    #[test]
    fn test_has_tag() {
        assert!(has_tag("oci://ghcr.io/acme/web:1.0.0"));
        assert!(has_tag("oci://localhost:5000/acme/web@sha256:abc"));
        assert!(!has_tag("oci://localhost:5000/acme/web"));
    }

    #[test]
    fn test_strip_tag() {
        assert_eq!(strip_tag("oci://ghcr.io/acme/web:1.0.0"), "oci://ghcr.io/acme/web");
        assert_eq!(strip_tag("oci://localhost:5000/acme/web"), "oci://localhost:5000/acme/web");
    }

    #[test]
    fn test_best_matching_tag() {
        let tags: Vec<String> = ["1.0.0", "1.4.2", "2.0.0", "latest", "1.5.0-rc.1"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        assert_eq!(best_matching_tag("web", &tags, "^1.0.0").unwrap(), "1.4.2");
        assert_eq!(best_matching_tag("web", &tags, "").unwrap(), "2.0.0");
        assert!(matches!(
            best_matching_tag("web", &tags, "^3"),
            Err(RepoError::UnsatisfiableConstraint { .. })
        ));
    }

    #[test]
    fn test_auth_from_credentials_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(
            &path,
            format!(
                r#"{{"auths": {{"registry.example.com": {{"auth": "{}"}}}}}}"#,
                base64::engine::general_purpose::STANDARD.encode("bot:secret")
            ),
        )
        .unwrap();

        let client = RegistryClient::from_credentials_file(&path).unwrap();
        assert!(matches!(
            client.auth_for("registry.example.com"),
            RegistryAuth::Basic(user, pass) if user == "bot" && pass == "secret"
        ));
        assert!(matches!(client.auth_for("ghcr.io"), RegistryAuth::Anonymous));

        let anonymous = RegistryClient::from_credentials_file(&temp.path().join("none.json")).unwrap();
        assert!(matches!(
            anonymous.auth_for("registry.example.com"),
            RegistryAuth::Anonymous
        ));
    }
}
