//! Release lifecycle actions
//!
//! [`ReleaseOrchestrator`] runs one action per call against an
//! [`ActionContext`]. Every failure leaves the action as a [`ReleaseError`]
//! carrying the action and release it belongs to; the stored revision is
//! marked `failed` first when the failure happened after it was written.

use chartd_core::{ChartBundle, ReleaseInfo, ReleaseRecord, ReleaseReference, ValuesDocument};
use std::future::Future;
use std::time::Duration;

use crate::context::ActionContext;
use crate::error::{Action, ErrorContext, KubeError, ReleaseError, Result};
use crate::manifest;
use crate::release::StoredRelease;
use crate::render::render_chart;

/// Upper bound for render + apply (or delete) of one action
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Which releases a listing covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceFilter {
    /// Every namespace the credentials can see
    All,
    Namespace(String),
}

impl NamespaceFilter {
    fn as_option(&self) -> Option<&str> {
        match self {
            Self::All => None,
            Self::Namespace(ns) => Some(ns),
        }
    }
}

/// Runs install, upgrade, uninstall, get and list
#[derive(Debug, Clone)]
pub struct ReleaseOrchestrator {
    timeout: Duration,
}

impl Default for ReleaseOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl ReleaseOrchestrator {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Latest revision of a release
    pub async fn get(&self, ctx: &ActionContext, name: &str) -> std::result::Result<ReleaseRecord, ReleaseError> {
        let reference = ReleaseReference::new(&ctx.namespace, name);
        ctx.storage
            .get_latest(&ctx.namespace, name)
            .await
            .map(|release| release.to_record())
            .map_err(|e| ReleaseError::action(ErrorContext::for_release(Action::Retrieve, &reference), e))
    }

    /// Latest revision of every listed release, sorted by namespace then name
    pub async fn list(
        &self,
        ctx: &ActionContext,
        filter: &NamespaceFilter,
    ) -> std::result::Result<Vec<ReleaseRecord>, ReleaseError> {
        let releases = ctx
            .storage
            .list(filter.as_option())
            .await
            .map_err(|e| ReleaseError::action(ErrorContext::new(Action::List, None), e))?;

        let mut records: Vec<ReleaseRecord> = releases
            .iter()
            .map(StoredRelease::to_record)
            .filter(|r| r.status.is_listed())
            .collect();
        records.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        Ok(records)
    }

    /// Install revision 1 of a new release
    pub async fn install(
        &self,
        ctx: &ActionContext,
        name: &str,
        chart: &ChartBundle,
        values: &ValuesDocument,
    ) -> std::result::Result<ReleaseRecord, ReleaseError> {
        let reference = ReleaseReference::new(&ctx.namespace, name);
        tracing::info!(release = %reference, chart = %chart.name(), version = %chart.metadata.version, "Installing release");

        self.try_install(ctx, name, chart, values)
            .await
            .map(|release| release.to_record())
            .map_err(|e| ReleaseError::action(ErrorContext::for_release(Action::Install, &reference), e))
    }

    async fn try_install(
        &self,
        ctx: &ActionContext,
        name: &str,
        chart: &ChartBundle,
        values: &ValuesDocument,
    ) -> Result<StoredRelease> {
        if ctx.storage.exists(&ctx.namespace, name).await? {
            return Err(KubeError::ReleaseAlreadyExists {
                name: name.to_string(),
                namespace: ctx.namespace.clone(),
            });
        }

        ctx.resources.ensure_namespace(&ctx.namespace).await?;

        let mut release = StoredRelease::for_install(name, &ctx.namespace, chart.metadata.clone(), values.clone());
        ctx.storage.create(&release).await?;

        let info = ReleaseInfo::for_install(name, &ctx.namespace);
        let outcome = self
            .timed(async {
                let rendered = render_chart(chart, values, &info)?;
                release.manifest = rendered.manifest;
                release.notes = rendered.notes;

                let summary = ctx
                    .resources
                    .apply_manifest(&ctx.namespace, &release.manifest)
                    .await?
                    .into_result("apply")?;
                tracing::info!(release = %name, namespace = %ctx.namespace, "{}", summary.summary());
                Ok(())
            })
            .await;

        if let Err(e) = outcome {
            record_failure(ctx, &mut release, "Install", &e).await;
            return Err(e);
        }

        release.mark_deployed("Install complete");
        ctx.storage.update(&release).await?;
        Ok(release)
    }

    /// Deploy a new revision of an existing release
    ///
    /// The new revision holds exactly `values`; nothing is carried over from
    /// the previous revision. Resources the new manifest no longer contains
    /// are deleted.
    pub async fn upgrade(
        &self,
        ctx: &ActionContext,
        name: &str,
        chart: &ChartBundle,
        values: &ValuesDocument,
    ) -> std::result::Result<ReleaseRecord, ReleaseError> {
        let reference = ReleaseReference::new(&ctx.namespace, name);
        tracing::info!(release = %reference, chart = %chart.name(), version = %chart.metadata.version, "Upgrading release");

        self.try_upgrade(ctx, name, chart, values)
            .await
            .map(|release| release.to_record())
            .map_err(|e| ReleaseError::action(ErrorContext::for_release(Action::Upgrade, &reference), e))
    }

    async fn try_upgrade(
        &self,
        ctx: &ActionContext,
        name: &str,
        chart: &ChartBundle,
        values: &ValuesDocument,
    ) -> Result<StoredRelease> {
        let mut previous = ctx.storage.get_latest(&ctx.namespace, name).await?;
        if previous.state.is_pending() {
            return Err(KubeError::OperationInProgress {
                name: name.to_string(),
                status: previous.status().to_string(),
            });
        }

        let mut release = StoredRelease::for_upgrade(&previous, chart.metadata.clone(), values.clone());
        ctx.storage.create(&release).await?;

        let info = ReleaseInfo::for_upgrade(name, &ctx.namespace, release.version);
        let outcome = self
            .timed(async {
                let rendered = render_chart(chart, values, &info)?;
                release.manifest = rendered.manifest;
                release.notes = rendered.notes;

                let summary = ctx
                    .resources
                    .apply_manifest(&ctx.namespace, &release.manifest)
                    .await?
                    .into_result("apply")?;
                tracing::info!(release = %name, namespace = %ctx.namespace, "{}", summary.summary());

                let removed = manifest::removed_documents(&previous.manifest, &release.manifest)?;
                if !removed.is_empty() {
                    let pruned = ctx
                        .resources
                        .delete_manifest(&ctx.namespace, &manifest::join(&removed))
                        .await?
                        .into_result("prune")?;
                    tracing::info!(release = %name, namespace = %ctx.namespace, "Pruned: {}", pruned.summary());
                }
                Ok(())
            })
            .await;

        if let Err(e) = outcome {
            record_failure(ctx, &mut release, "Upgrade", &e).await;
            return Err(e);
        }

        previous.mark_superseded();
        ctx.storage.update(&previous).await?;

        release.mark_deployed("Upgrade complete");
        ctx.storage.update(&release).await?;
        Ok(release)
    }

    /// Delete a release's resources and purge its whole history
    pub async fn uninstall(&self, ctx: &ActionContext, name: &str) -> std::result::Result<(), ReleaseError> {
        let reference = ReleaseReference::new(&ctx.namespace, name);
        tracing::info!(release = %reference, "Uninstalling release");

        self.try_uninstall(ctx, name)
            .await
            .map_err(|e| ReleaseError::action(ErrorContext::for_release(Action::Uninstall, &reference), e))
    }

    async fn try_uninstall(&self, ctx: &ActionContext, name: &str) -> Result<()> {
        let mut release = ctx.storage.get_latest(&ctx.namespace, name).await?;

        release.mark_uninstalling();
        ctx.storage.update(&release).await?;

        let outcome = self
            .timed(async {
                ctx.resources
                    .delete_manifest(&ctx.namespace, &release.manifest)
                    .await?
                    .into_result("delete")
            })
            .await;

        match outcome {
            Ok(summary) => {
                tracing::info!(release = %name, namespace = %ctx.namespace, "{}", summary.summary());
            }
            Err(e) => {
                record_failure(ctx, &mut release, "Uninstall", &e).await;
                return Err(e);
            }
        }

        let purged = ctx.storage.delete_all(&ctx.namespace, name).await?;
        tracing::debug!(release = %name, namespace = %ctx.namespace, revisions = purged.len(), "Purged release history");
        Ok(())
    }

    async fn timed<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(KubeError::Timeout(format!("{:?}", self.timeout))),
        }
    }
}

/// Mark the revision failed; a storage error here is logged, not returned
async fn record_failure(ctx: &ActionContext, release: &mut StoredRelease, operation: &str, err: &KubeError) {
    let reason = err.to_string();
    release.mark_failed(reason.clone(), format!("{} failed: {}", operation, reason));

    if let Err(store_err) = ctx.storage.update(release).await {
        tracing::warn!(
            release = %release.name,
            namespace = %release.namespace,
            error = %store_err,
            "Failed to record release failure"
        );
    }
}
