//! Credential handling
//!
//! Registry credentials come from a docker-style `config.json`; repository
//! credentials come from `repositories.yaml`. HTTP requests never forward
//! credentials across an origin change on redirect.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use url::Url;

use crate::error::{RepoError, Result};

/// Docker-style registry credentials file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DockerConfig {
    #[serde(default)]
    pub auths: HashMap<String, DockerAuth>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DockerAuth {
    /// base64 of `username:password`
    #[serde(default)]
    pub auth: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl DockerAuth {
    /// Decode to a username/password pair
    pub fn credentials(&self) -> Option<(String, String)> {
        if let Some(encoded) = &self.auth {
            let decoded = STANDARD.decode(encoded.trim()).ok()?;
            let pair = String::from_utf8(decoded).ok()?;
            let (user, pass) = pair.split_once(':')?;
            return Some((user.to_string(), pass.to_string()));
        }
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => Some((u.clone(), p.clone())),
            _ => None,
        }
    }
}

impl DockerConfig {
    /// Load a credentials file
    ///
    /// A missing file means anonymous access. An unreadable or malformed file
    /// is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let invalid = |message: String| RepoError::InvalidCredentials {
            path: path.display().to_string(),
            message,
        };

        let content = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))
    }

    /// Credentials for a registry host such as `ghcr.io` or `localhost:5000`
    pub fn credentials_for_host(&self, host: &str) -> Option<(String, String)> {
        let mut candidates = vec![
            host.to_string(),
            format!("https://{}", host),
            format!("http://{}", host),
        ];
        if matches!(host, "docker.io" | "index.docker.io" | "registry-1.docker.io") {
            candidates.push("https://index.docker.io/v1/".to_string());
        }

        candidates
            .iter()
            .filter_map(|candidate| self.auths.get(candidate))
            .find_map(DockerAuth::credentials)
    }
}

/// Basic credentials bound to the origin they were configured for
#[derive(Debug, Clone)]
pub struct ScopedCredentials {
    origin: String,
    username: String,
    password: String,
}

impl ScopedCredentials {
    pub fn new(url: &str, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            origin: url.to_string(),
            username: username.into(),
            password: password.into(),
        }
    }

    fn applies_to(&self, url: &str) -> bool {
        same_origin(&self.origin, url)
    }
}

/// Check if two URLs share scheme, host and port
pub fn same_origin(url1: &str, url2: &str) -> bool {
    match (Url::parse(url1), Url::parse(url2)) {
        (Ok(u1), Ok(u2)) => {
            u1.scheme() == u2.scheme()
                && u1.host() == u2.host()
                && u1.port_or_known_default() == u2.port_or_known_default()
        }
        _ => false,
    }
}

/// HTTP client with manual redirect handling
#[derive(Debug, Clone)]
pub struct SecureHttpClient {
    client: reqwest::Client,
}

impl SecureHttpClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            // Redirects are followed by hand so credentials stay on their origin
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| RepoError::NetworkError {
                message: e.to_string(),
            })?;

        Ok(Self { client })
    }

    /// Fetch bytes from a URL, following up to 10 redirects
    pub async fn get_bytes(
        &self,
        url: &str,
        credentials: Option<&ScopedCredentials>,
    ) -> Result<Vec<u8>> {
        let mut current_url = url.to_string();
        let mut redirects = 0;

        loop {
            let mut request = self.client.get(&current_url);

            match credentials {
                Some(creds) if creds.applies_to(&current_url) => {
                    request = request.basic_auth(&creds.username, Some(&creds.password));
                }
                Some(_) => {
                    tracing::warn!(
                        from = %url,
                        to = %current_url,
                        "Cross-origin redirect - credentials not forwarded"
                    );
                }
                None => {}
            }

            let response = request.send().await?;
            let status = response.status();

            if status.is_redirection() {
                redirects += 1;
                if redirects > 10 {
                    return Err(RepoError::NetworkError {
                        message: "Too many redirects (max 10)".to_string(),
                    });
                }

                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| RepoError::NetworkError {
                        message: "Redirect without Location header".to_string(),
                    })?;

                current_url = Url::parse(&current_url)?.join(location)?.to_string();
                continue;
            }

            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(RepoError::AuthRequired { url: current_url });
            }
            if status == reqwest::StatusCode::FORBIDDEN {
                return Err(RepoError::AuthFailed {
                    message: format!("Access denied to {}", current_url),
                });
            }
            if !status.is_success() {
                return Err(RepoError::HttpError {
                    status: status.as_u16(),
                    message: format!("Request to {} failed", current_url),
                });
            }

            let bytes = response.bytes().await?;
            return Ok(bytes.to_vec());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_docker_auth_encoded() {
        let auth = DockerAuth {
            auth: Some(STANDARD.encode("robot:token123")),
            ..Default::default()
        };
        assert_eq!(
            auth.credentials(),
            Some(("robot".to_string(), "token123".to_string()))
        );
    }

    #[test]
    fn test_docker_auth_plain_fields() {
        let auth = DockerAuth {
            auth: None,
            username: Some("user".to_string()),
            password: Some("pass".to_string()),
        };
        assert_eq!(auth.credentials(), Some(("user".to_string(), "pass".to_string())));
    }

    #[test]
    fn test_credentials_for_host_variants() {
        let config: DockerConfig = serde_json::from_str(&format!(
            r#"{{"auths": {{
                "https://ghcr.io": {{"auth": "{}"}},
                "localhost:5000": {{"username": "local", "password": "pw"}},
                "https://index.docker.io/v1/": {{"auth": "{}"}}
            }}}}"#,
            STANDARD.encode("gh:tok"),
            STANDARD.encode("hub:tok")
        ))
        .unwrap();

        assert_eq!(config.credentials_for_host("ghcr.io").unwrap().0, "gh");
        assert_eq!(config.credentials_for_host("localhost:5000").unwrap().0, "local");
        assert_eq!(config.credentials_for_host("docker.io").unwrap().0, "hub");
        assert!(config.credentials_for_host("quay.io").is_none());
    }

    #[test]
    fn test_load_missing_and_malformed() {
        let temp = TempDir::new().unwrap();

        let missing = DockerConfig::load(&temp.path().join("config.json")).unwrap();
        assert!(missing.auths.is_empty());

        let broken = temp.path().join("broken.json");
        std::fs::write(&broken, "{not json").unwrap();
        let err = DockerConfig::load(&broken).unwrap_err();
        assert!(matches!(err, RepoError::InvalidCredentials { .. }));
    }

    #[test]
    fn test_same_origin() {
        assert!(same_origin("https://a.example.com/x", "https://a.example.com:443/y"));
        assert!(!same_origin("https://a.example.com", "http://a.example.com"));
        assert!(!same_origin("https://a.example.com", "https://b.example.com"));
    }

    #[tokio::test]
    async fn test_get_bytes_sends_basic_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.yaml"))
            .and(header("authorization", "Basic dXNlcjpwYXNz"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let client = SecureHttpClient::new().unwrap();
        let url = format!("{}/index.yaml", server.uri());
        let creds = ScopedCredentials::new(&server.uri(), "user", "pass");

        let body = client.get_bytes(&url, Some(&creds)).await.unwrap();
        assert_eq!(body, b"ok");
    }

    #[tokio::test]
    async fn test_get_bytes_follows_redirect_and_maps_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/new"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"moved".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/private"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = SecureHttpClient::new().unwrap();

        let body = client
            .get_bytes(&format!("{}/old", server.uri()), None)
            .await
            .unwrap();
        assert_eq!(body, b"moved");

        let err = client
            .get_bytes(&format!("{}/private", server.uri()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::AuthRequired { .. }));
    }
}
