//! Update dispatch: turns repository polls into release upgrades
//!
//! Pollers report the latest chart versions over a channel. The dispatcher
//! matches them against auto-updating operations and enqueues [`SyncJob`]s,
//! which a fixed pool of workers drains through the [`SyncHandler`].

use crate::backend::{
    get_resource, list_resources, update_resource, ReleaseManager, ResourceStore, UpgradeRequest,
};
use crate::core::config::Settings;
use crate::core::meta::FINALIZER;
use crate::core::operation::Operation;
use crate::core::repository::Repository;
use crate::core::state::ReconcileAction;
use crate::error::PipelineResult;
use crate::repo::handle::{ChartUpdate, RepoHandle};
use crate::repo::queue::WorkQueue;
use crate::repo::registry::RepoRegistry;
use crate::repo::source::{build_source, ChartSource};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// One release to bring up to a newly published chart version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SyncJob {
    pub release_name: String,
    pub namespace: String,
    pub chart_name: String,
    pub chart_repo: String,
    /// Target chart version
    pub version: String,
}

/// Jobs implied by an update: every auto-updating operation on the
/// repository whose chart has a version other than the one it asks for.
pub fn jobs_for_update(operations: &[Operation], update: &ChartUpdate) -> Vec<SyncJob> {
    operations
        .iter()
        .filter(|op| op.spec.auto_update && op.spec.chart_repo_name == update.repo)
        .filter_map(|op| {
            let latest = update.latest.get(&op.spec.chart_name)?;
            (latest != &op.spec.chart_version).then(|| SyncJob {
                release_name: op.release_name().to_string(),
                namespace: op.namespace().to_string(),
                chart_name: op.spec.chart_name.clone(),
                chart_repo: update.repo.clone(),
                version: latest.clone(),
            })
        })
        .collect()
}

/// Processes one sync job against the store and release manager
pub struct SyncHandler {
    store: Arc<dyn ResourceStore>,
    releases: Arc<dyn ReleaseManager>,
    registry: Arc<RepoRegistry>,
    retry_delay: Duration,
}

impl SyncHandler {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        releases: Arc<dyn ReleaseManager>,
        registry: Arc<RepoRegistry>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            store,
            releases,
            registry,
            retry_delay,
        }
    }

    pub async fn process(&self, job: &SyncJob) -> PipelineResult<ReconcileAction> {
        let mut operation = match get_resource::<Operation>(
            self.store.as_ref(),
            &job.namespace,
            &job.release_name,
        )
        .await
        {
            Ok(op) => op,
            Err(e) if e.is_not_found() => return Ok(ReconcileAction::Done),
            Err(e) => return Err(e.into()),
        };
        if operation.metadata.is_deleting() {
            return Ok(ReconcileAction::Done);
        }

        let release = match self.releases.get(&job.release_name, &job.namespace).await {
            Ok(release) => release,
            Err(e) if e.is_not_found() => {
                debug!(release = %job.release_name, "Release not installed, nothing to sync");
                return Ok(ReconcileAction::Done);
            }
            Err(e) => return Err(e.into()),
        };

        let Some(source) = self.registry.source(&job.chart_repo) else {
            info!(repo = %job.chart_repo, "Repository not registered yet, retrying");
            return Ok(ReconcileAction::RequeueAfter(self.retry_delay));
        };
        let location = match locate_target(source.as_ref(), job).await {
            Some(location) => location,
            None => return Ok(ReconcileAction::RequeueAfter(self.retry_delay)),
        };

        if release.chart_version == job.version {
            if operation.recorded_version() != Some(job.version.as_str()) {
                operation.record_release(&job.version, &release.status);
                return Ok(self.save_status(&operation).await);
            }
            return Ok(ReconcileAction::Done);
        }

        let behind = operation.spec.chart_version != job.version
            && operation.recorded_version() != Some(job.version.as_str());
        if !behind {
            return Ok(ReconcileAction::Done);
        }

        info!(
            release = %job.release_name,
            namespace = %job.namespace,
            from = %release.chart_version,
            to = %job.version,
            "Upgrading release to latest chart version"
        );
        let upgraded = self
            .releases
            .upgrade(UpgradeRequest {
                release_name: job.release_name.clone(),
                namespace: job.namespace.clone(),
                chart_name: job.chart_name.clone(),
                chart_version: job.version.clone(),
                chart: location,
                values: release.values.clone(),
                options: operation.spec.upgrade.clone(),
            })
            .await?;

        operation.record_release(&job.version, &upgraded.status);
        Ok(self.save_status(&operation).await)
    }

    async fn save_status(&self, operation: &Operation) -> ReconcileAction {
        match update_resource(self.store.as_ref(), operation).await {
            Ok(_) => ReconcileAction::Done,
            Err(e) => {
                warn!(release = %operation.release_name(), error = %e, "Failed to record sync status");
                ReconcileAction::RequeueAfter(self.retry_delay)
            }
        }
    }
}

/// Location of the job's target version, or `None` when it is not
/// (yet) published in the repository.
async fn locate_target(
    source: &dyn ChartSource,
    job: &SyncJob,
) -> Option<crate::repo::source::ChartLocation> {
    match source.chart_exists(&job.chart_name, &job.version).await {
        Ok(true) => {}
        Ok(false) => {
            info!(chart = %job.chart_name, version = %job.version, "Chart version not in repository yet");
            return None;
        }
        Err(e) => {
            warn!(repo = %job.chart_repo, error = %e, "Failed to list repository charts");
            return None;
        }
    }
    match source.locate(&job.chart_name, &job.version).await {
        Ok(location) => Some(location),
        Err(e) => {
            warn!(chart = %job.chart_name, version = %job.version, error = %e, "Failed to locate chart");
            None
        }
    }
}

/// Owns the repository registry, the sync queue and its workers
pub struct SyncEngine {
    store: Arc<dyn ResourceStore>,
    registry: Arc<RepoRegistry>,
    queue: Arc<WorkQueue<SyncJob>>,
    handler: Arc<SyncHandler>,
    updates_tx: mpsc::UnboundedSender<ChartUpdate>,
    updates_rx: Mutex<Option<mpsc::UnboundedReceiver<ChartUpdate>>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    period: Duration,
    workers: usize,
    cache_path: PathBuf,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        releases: Arc<dyn ReleaseManager>,
        settings: &Settings,
    ) -> Self {
        let registry = Arc::new(RepoRegistry::new());
        let handler = Arc::new(SyncHandler::new(
            store.clone(),
            releases,
            registry.clone(),
            settings.sync_retry_delay(),
        ));
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        Self {
            store,
            registry,
            queue: Arc::new(WorkQueue::new()),
            handler,
            updates_tx,
            updates_rx: Mutex::new(Some(updates_rx)),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            period: settings.repo_period(),
            workers: settings.max_concurrent_sync.max(1),
            cache_path: settings.local_cache_path.clone(),
        }
    }

    pub fn registry(&self) -> Arc<RepoRegistry> {
        self.registry.clone()
    }

    pub fn queue(&self) -> Arc<WorkQueue<SyncJob>> {
        self.queue.clone()
    }

    pub fn handler(&self) -> Arc<SyncHandler> {
        self.handler.clone()
    }

    /// Start the dispatcher and the worker pool. Calling it again is a no-op.
    pub fn start(&self) {
        let Some(mut updates) = self
            .updates_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        else {
            return;
        };

        let mut tasks = Vec::with_capacity(self.workers + 1);

        let store = self.store.clone();
        let queue = self.queue.clone();
        let cancel = self.cancel.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    update = updates.recv() => {
                        let Some(update) = update else { break };
                        if let Err(e) = enqueue_update(store.as_ref(), &queue, &update).await {
                            warn!(repo = %update.repo, error = %e, "Failed to dispatch chart update");
                        }
                    }
                }
            }
            debug!("Update dispatcher stopped");
        }));

        for worker in 0..self.workers {
            tasks.push(tokio::spawn(run_worker(
                worker,
                self.queue.clone(),
                self.handler.clone(),
            )));
        }

        info!(workers = self.workers, "Sync engine started");
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend(tasks);
    }

    /// Start polling a chart source, replacing any poller of the same name
    pub fn register_source(&self, source: Arc<dyn ChartSource>, period: Duration) {
        self.registry
            .register(RepoHandle::spawn(source, period, self.updates_tx.clone()));
    }

    /// Match an update against current operations and enqueue sync jobs.
    /// Returns how many jobs were enqueued.
    pub async fn dispatch(&self, update: &ChartUpdate) -> PipelineResult<usize> {
        enqueue_update(self.store.as_ref(), &self.queue, update).await
    }

    /// Bring the poller of a repository resource in line with it
    pub async fn reconcile_repository(
        &self,
        namespace: &str,
        name: &str,
    ) -> PipelineResult<ReconcileAction> {
        let mut repo = match get_resource::<Repository>(self.store.as_ref(), namespace, name).await {
            Ok(repo) => repo,
            Err(e) if e.is_not_found() => {
                self.registry.remove(name);
                return Ok(ReconcileAction::Done);
            }
            Err(e) => return Err(e.into()),
        };

        if repo.metadata.is_deleting() {
            self.registry.remove(name);
            if repo.metadata.remove_finalizer(FINALIZER) {
                update_resource(self.store.as_ref(), &repo).await?;
            }
            info!(repo = %name, "Repository finalized");
            return Ok(ReconcileAction::Done);
        }

        if repo.metadata.add_finalizer(FINALIZER) {
            repo = update_resource(self.store.as_ref(), &repo).await?;
        }

        let period = repo
            .spec
            .period_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(self.period);
        let source = build_source(&repo, &self.cache_path)?;
        self.register_source(source, period);
        Ok(ReconcileAction::Done)
    }

    /// Stop pollers, the dispatcher and the workers
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.queue.shut_down();
        self.registry.close_all();

        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            let _ = task.await;
        }
        info!("Sync engine stopped");
    }
}

async fn enqueue_update(
    store: &dyn ResourceStore,
    queue: &WorkQueue<SyncJob>,
    update: &ChartUpdate,
) -> PipelineResult<usize> {
    let operations = list_resources::<Operation>(store, None).await?;
    let jobs = jobs_for_update(&operations, update);
    let count = jobs.len();
    for job in jobs {
        debug!(release = %job.release_name, version = %job.version, "Enqueueing sync job");
        queue.add(job);
    }
    Ok(count)
}

async fn run_worker(id: usize, queue: Arc<WorkQueue<SyncJob>>, handler: Arc<SyncHandler>) {
    debug!(worker = id, "Sync worker started");
    while let Some(job) = queue.get().await {
        let task = {
            let handler = handler.clone();
            let job = job.clone();
            tokio::spawn(async move { handler.process(&job).await })
        };

        match task.await {
            Ok(Ok(ReconcileAction::Done)) => queue.forget(&job),
            Ok(Ok(ReconcileAction::RequeueAfter(delay))) => {
                queue.forget(&job);
                queue.add_after(job.clone(), delay);
            }
            Ok(Err(e)) => {
                warn!(
                    release = %job.release_name,
                    retries = queue.num_requeues(&job),
                    error = %e,
                    "Sync job failed"
                );
                queue.add_rate_limited(job.clone());
            }
            Err(e) => {
                error!(release = %job.release_name, error = %e, "Sync job panicked");
                queue.add_rate_limited(job.clone());
            }
        }
        queue.done(&job);
    }
    debug!(worker = id, "Sync worker stopped");
}
