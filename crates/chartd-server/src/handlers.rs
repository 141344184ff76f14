//! REST API handlers
//!
//! Each handler builds a fresh action context, resolves the chart when the
//! action needs one, runs the action and projects the result. Steps run in
//! order and stop at the first failure.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chartd_core::{ChartBundle, DEFAULT_NAMESPACE, ReleaseReference};
use chartd_kube::{
    Action, ActionContext, ContextError, ErrorContext, NamespaceFilter, ReleaseError,
};
use chartd_repo::ChartResolver;

use crate::AppState;
use crate::dto::{InstallRequest, ReleaseInfo, ReleaseList, UpgradeRequest};
use crate::error::ApiError;

type ApiResult<T> = Result<T, ApiError>;

fn context(state: &AppState, namespace: &str, error_context: &ErrorContext) -> Result<ActionContext, ReleaseError> {
    state
        .factory
        .create(namespace)
        .map_err(|e| ReleaseError::configuration(error_context.clone(), e))
}

/// Locate, load, validate and dependency-resolve a chart reference
async fn resolve_chart(
    state: &AppState,
    ctx: &ActionContext,
    reference: &str,
    error_context: &ErrorContext,
) -> Result<ChartBundle, ReleaseError> {
    let resolver = ChartResolver::from_settings(state.settings.clone(), ctx.registry.clone())
        .map_err(|e| ReleaseError::configuration(error_context.clone(), ContextError::Registry(e)))?;

    let resolved = resolver
        .resolve(reference, state.dependency_update)
        .await
        .map_err(|e| ReleaseError::resolution(error_context.clone(), e))?;

    tracing::debug!(chart = %reference, path = %resolved.path.display(), "Resolved chart");
    Ok(resolved.chart)
}

/// GET /
pub async fn list_all(State(state): State<AppState>) -> ApiResult<Json<ReleaseList>> {
    list(&state, DEFAULT_NAMESPACE, NamespaceFilter::All).await
}

/// GET /{namespace}
pub async fn list_namespace(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
) -> ApiResult<Json<ReleaseList>> {
    let filter = NamespaceFilter::Namespace(namespace.clone());
    list(&state, &namespace, filter).await
}

async fn list(state: &AppState, namespace: &str, filter: NamespaceFilter) -> ApiResult<Json<ReleaseList>> {
    let error_context = ErrorContext::new(Action::List, None);
    let ctx = context(state, namespace, &error_context)?;

    let records = state.orchestrator.list(&ctx, &filter).await?;
    tracing::debug!(filter = ?filter, count = records.len(), "Listed releases");
    Ok(Json(ReleaseList::from(records.as_slice())))
}

/// GET /{namespace}/{name}
pub async fn get_release(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<Json<ReleaseInfo>> {
    let reference = ReleaseReference::new(&namespace, &name);
    let error_context = ErrorContext::for_release(Action::Retrieve, &reference);
    let ctx = context(&state, &namespace, &error_context)?;

    let record = state.orchestrator.get(&ctx, &name).await?;
    Ok(Json(ReleaseInfo::from(&record)))
}

/// POST /
pub async fn install(
    State(state): State<AppState>,
    payload: Result<Json<InstallRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ReleaseInfo>)> {
    let Json(request) = payload?;
    request.validate()?;

    let reference = ReleaseReference::new(&request.namespace, &request.name);
    let error_context = ErrorContext::for_release(Action::Install, &reference);
    tracing::info!(release = %reference, chart = %request.chart, "Install requested");

    let ctx = context(&state, &request.namespace, &error_context)?;
    let chart = resolve_chart(&state, &ctx, &request.chart, &error_context).await?;
    let record = state
        .orchestrator
        .install(&ctx, &request.name, &chart, &request.values())
        .await?;

    tracing::info!(release = %reference, version = record.version, "Successfully installed release");
    Ok((StatusCode::CREATED, Json(ReleaseInfo::from(&record))))
}

/// PUT /{namespace}/{name}
pub async fn upgrade(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    payload: Result<Json<UpgradeRequest>, JsonRejection>,
) -> ApiResult<Json<ReleaseInfo>> {
    let Json(request) = payload?;
    request.validate()?;

    let reference = ReleaseReference::new(&namespace, &name);
    let error_context = ErrorContext::for_release(Action::Upgrade, &reference);
    tracing::info!(release = %reference, chart = %request.chart, "Upgrade requested");

    let ctx = context(&state, &namespace, &error_context)?;
    let chart = resolve_chart(&state, &ctx, &request.chart, &error_context).await?;
    let record = state
        .orchestrator
        .upgrade(&ctx, &name, &chart, &request.values())
        .await?;

    tracing::info!(release = %reference, version = record.version, "Successfully upgraded release");
    Ok(Json(ReleaseInfo::from(&record)))
}

/// DELETE /{namespace}/{name}
pub async fn uninstall(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let reference = ReleaseReference::new(&namespace, &name);
    let error_context = ErrorContext::for_release(Action::Uninstall, &reference);
    tracing::info!(release = %reference, "Uninstall requested");

    let ctx = context(&state, &namespace, &error_context)?;
    state.orchestrator.uninstall(&ctx, &name).await?;

    tracing::info!(release = %reference, "Successfully uninstalled release");
    Ok(StatusCode::NO_CONTENT)
}
