//! HTTP error responses
//!
//! Errors leave the server as `text/plain` bodies holding the message and a
//! trailing newline. Lifecycle failures are logged here, once, with their
//! action and release.

use axum::extract::rejection::JsonRejection;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use chartd_kube::{ErrorKind, ReleaseError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// A missing, empty or malformed request field
    #[error("{0}")]
    BadRequest(String),

    #[error("invalid request body: {0}")]
    Body(#[from] JsonRejection),

    #[error(transparent)]
    Release(#[from] ReleaseError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::Body(_) => StatusCode::BAD_REQUEST,
            Self::Release(err) => release_status(err),
        }
    }
}

fn release_status(err: &ReleaseError) -> StatusCode {
    match err.kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Dependency => StatusCode::BAD_REQUEST,
        ErrorKind::ChartResolution if err.is_not_installable() => StatusCode::BAD_REQUEST,
        ErrorKind::Action if err.is_conflict() => StatusCode::CONFLICT,
        ErrorKind::Configuration
        | ErrorKind::ChartResolution
        | ErrorKind::DependencyUpdate
        | ErrorKind::Action => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        match &self {
            Self::Release(err) => {
                let release = err
                    .context
                    .release
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                if status.is_server_error() {
                    tracing::error!(action = %err.context.action, release = %release, kind = %err.kind, reason = %err.reason(), "Release action failed");
                } else {
                    tracing::warn!(action = %err.context.action, release = %release, kind = %err.kind, reason = %err.reason(), "Release action rejected");
                }
            }
            other => tracing::warn!(reason = %other, "Bad request"),
        }

        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            format!("{}\n", self),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chartd_core::ReleaseReference;
    use chartd_kube::{Action, ContextError, ErrorContext, KubeError};
    use chartd_repo::ResolveError;

    fn context(action: Action) -> ErrorContext {
        ErrorContext::for_release(action, &ReleaseReference::new("default", "myapp"))
    }

    fn status_of(err: ReleaseError) -> StatusCode {
        ApiError::from(err).status()
    }

    #[test]
    fn test_status_mapping() {
        let not_found = ReleaseError::action(
            context(Action::Uninstall),
            KubeError::ReleaseNotFound {
                name: "myapp".into(),
                namespace: "default".into(),
            },
        );
        assert_eq!(status_of(not_found), StatusCode::NOT_FOUND);

        let exists = ReleaseError::action(
            context(Action::Install),
            KubeError::ReleaseAlreadyExists {
                name: "myapp".into(),
                namespace: "default".into(),
            },
        );
        assert_eq!(status_of(exists), StatusCode::CONFLICT);

        let library = ReleaseError::resolution(
            context(Action::Install),
            ResolveError::NotInstallable {
                chart_type: "library".into(),
            },
        );
        assert_eq!(status_of(library), StatusCode::BAD_REQUEST);

        let unmet = ReleaseError::resolution(context(Action::Install), ResolveError::Unmet(vec!["redis".into()]));
        assert_eq!(status_of(unmet), StatusCode::BAD_REQUEST);

        let config = ReleaseError::configuration(
            context(Action::Install),
            ContextError::InvalidHost {
                host: String::new(),
                reason: "host is empty".into(),
            },
        );
        assert_eq!(status_of(config), StatusCode::INTERNAL_SERVER_ERROR);

        let timeout = ReleaseError::action(context(Action::Upgrade), KubeError::Timeout("300s".into()));
        assert_eq!(status_of(timeout), StatusCode::INTERNAL_SERVER_ERROR);

        assert_eq!(ApiError::BadRequest("name must not be empty".into()).status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_error_body_is_plain_text_line() {
        let response = ApiError::BadRequest("chart must not be empty".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
    }
}
