//! Operation reconciler - applies an Operation through the release manager

use crate::backend::{
    get_resource, update_resource, InstallRequest, Release, ReleaseManager, ResourceStore,
    UpgradeRequest,
};
use crate::core::config::Settings;
use crate::core::meta::FINALIZER;
use crate::core::operation::Operation;
use crate::core::state::ReconcileAction;
use crate::error::PipelineResult;
use crate::repo::{version_greater_than, ChartLocation, RepoRegistry};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What the reconciler decided to do with an existing release
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleasePlan {
    /// The release matches the operation
    Keep,
    /// The release was moved ahead of the operation out of band; only the
    /// recorded version needs updating
    RecordOnly { version: String },
    /// Upgrade the release to this chart version
    Upgrade { version: String },
}

/// Decide how to bring an installed release in line with its operation
pub fn plan_release(operation: &Operation, release: &Release) -> ReleasePlan {
    let declared = operation.spec.chart_version.as_str();
    let recorded = operation.recorded_version().unwrap_or_default();
    let installed = release.chart_version.as_str();
    let values_changed = release.values != operation.spec.values;

    let version_drift = declared != installed && recorded != installed;
    if !version_drift && !values_changed {
        return ReleasePlan::Keep;
    }

    if !values_changed && version_greater_than(installed, recorded) {
        return ReleasePlan::RecordOnly {
            version: installed.to_string(),
        };
    }

    let version = if version_greater_than(recorded, declared) {
        recorded.to_string()
    } else {
        declared.to_string()
    };
    ReleasePlan::Upgrade { version }
}

pub struct OperationReconciler {
    store: Arc<dyn ResourceStore>,
    releases: Arc<dyn ReleaseManager>,
    registry: Arc<RepoRegistry>,
    retry_delay: Duration,
}

impl OperationReconciler {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        releases: Arc<dyn ReleaseManager>,
        registry: Arc<RepoRegistry>,
    ) -> Self {
        Self {
            store,
            releases,
            registry,
            retry_delay: Settings::default().sync_retry_delay(),
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub async fn reconcile(&self, namespace: &str, name: &str) -> PipelineResult<ReconcileAction> {
        let mut operation =
            match get_resource::<Operation>(self.store.as_ref(), namespace, name).await {
                Ok(op) => op,
                Err(e) if e.is_not_found() => return Ok(ReconcileAction::Done),
                Err(e) => return Err(e.into()),
            };

        if operation.metadata.is_deleting() {
            return self.finalize(operation).await;
        }

        if operation.metadata.add_finalizer(FINALIZER) {
            operation = update_resource(self.store.as_ref(), &operation).await?;
        }

        let installed = match self.releases.get(name, namespace).await {
            Ok(release) => Some(release),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };

        match installed {
            None => self.install(operation).await,
            Some(release) => match plan_release(&operation, &release) {
                ReleasePlan::Keep => Ok(ReconcileAction::Done),
                ReleasePlan::RecordOnly { version } => {
                    debug!(release = %name, version = %version, "Recording out-of-band release version");
                    operation.record_release(&version, &release.status);
                    Ok(self.save_status(&operation).await)
                }
                ReleasePlan::Upgrade { version } => self.upgrade(operation, &version).await,
            },
        }
    }

    async fn locate(&self, operation: &Operation, version: &str) -> Option<ChartLocation> {
        let spec = &operation.spec;
        let Some(source) = self.registry.source(&spec.chart_repo_name) else {
            info!(repo = %spec.chart_repo_name, release = %operation.release_name(), "Repository not registered yet");
            return None;
        };
        match source.chart_exists(&spec.chart_name, version).await {
            Ok(true) => {}
            Ok(false) => {
                info!(chart = %spec.chart_name, version = %version, "Chart version not found in repository");
                return None;
            }
            Err(e) => {
                warn!(repo = %spec.chart_repo_name, error = %e, "Failed to list repository charts");
                return None;
            }
        }
        match source.locate(&spec.chart_name, version).await {
            Ok(location) => Some(location),
            Err(e) => {
                warn!(chart = %spec.chart_name, version = %version, error = %e, "Failed to locate chart");
                None
            }
        }
    }

    async fn install(&self, mut operation: Operation) -> PipelineResult<ReconcileAction> {
        let version = operation.spec.chart_version.clone();
        let Some(location) = self.locate(&operation, &version).await else {
            return Ok(ReconcileAction::RequeueAfter(self.retry_delay));
        };

        info!(
            release = %operation.release_name(),
            namespace = %operation.namespace(),
            chart = %operation.spec.chart_name,
            version = %version,
            "Installing release"
        );
        let release = self
            .releases
            .install(InstallRequest {
                release_name: operation.release_name().to_string(),
                namespace: operation.namespace().to_string(),
                chart_name: operation.spec.chart_name.clone(),
                chart_version: version,
                chart: location,
                values: operation.spec.values.clone(),
                options: operation.spec.create.clone(),
            })
            .await?;

        operation.record_release(&release.chart_version, &release.status);
        Ok(self.save_status(&operation).await)
    }

    async fn upgrade(&self, mut operation: Operation, version: &str) -> PipelineResult<ReconcileAction> {
        let Some(location) = self.locate(&operation, version).await else {
            return Ok(ReconcileAction::RequeueAfter(self.retry_delay));
        };

        info!(
            release = %operation.release_name(),
            namespace = %operation.namespace(),
            version = %version,
            "Upgrading release"
        );
        let release = self
            .releases
            .upgrade(UpgradeRequest {
                release_name: operation.release_name().to_string(),
                namespace: operation.namespace().to_string(),
                chart_name: operation.spec.chart_name.clone(),
                chart_version: version.to_string(),
                chart: location,
                values: operation.spec.values.clone(),
                options: operation.spec.upgrade.clone(),
            })
            .await?;

        operation.record_release(&release.chart_version, &release.status);
        Ok(self.save_status(&operation).await)
    }

    async fn finalize(&self, mut operation: Operation) -> PipelineResult<ReconcileAction> {
        if !operation.metadata.has_finalizer(FINALIZER) {
            return Ok(ReconcileAction::Done);
        }

        if !operation.spec.uninstall.do_not_delete_release {
            match self
                .releases
                .uninstall(
                    operation.release_name(),
                    operation.namespace(),
                    &operation.spec.uninstall,
                )
                .await
            {
                Ok(()) => info!(release = %operation.release_name(), "Release uninstalled"),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }

        operation.metadata.remove_finalizer(FINALIZER);
        update_resource(self.store.as_ref(), &operation).await?;
        Ok(ReconcileAction::Done)
    }

    async fn save_status(&self, operation: &Operation) -> ReconcileAction {
        match update_resource(self.store.as_ref(), operation).await {
            Ok(_) => ReconcileAction::Done,
            Err(e) => {
                warn!(release = %operation.release_name(), error = %e, "Failed to record release status");
                ReconcileAction::RequeueAfter(self.retry_delay)
            }
        }
    }
}
