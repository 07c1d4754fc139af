//! Test: Repository sync - new chart versions upgrade auto-updating releases

use crate::helpers::*;
use chartflow::backend::{create_resource, get_resource, InMemoryReleaseManager, InMemoryStore, ReleaseCall, ReleaseManager};
use chartflow::core::{Operation, OperationSpec, ReconcileAction, Settings};
use chartflow::repo::{
    jobs_for_update, ChartUpdate, RepoHandle, RepoRegistry, SyncEngine, SyncHandler, SyncJob,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const RETRY: Duration = Duration::from_millis(250);

fn operation(release: &str, chart: &str, version: &str, auto_update: bool) -> Operation {
    let mut op = Operation::new(
        release,
        "prod",
        OperationSpec {
            chart_repo_name: "stable".to_string(),
            chart_name: chart.to_string(),
            chart_version: version.to_string(),
            values: as_map(json!({"replicas": 2})),
            auto_update,
            ..Default::default()
        },
    );
    op.record_release(version, "deployed");
    op
}

fn update(charts: &[(&str, &str)]) -> ChartUpdate {
    ChartUpdate {
        repo: "stable".to_string(),
        latest: charts
            .iter()
            .map(|(chart, version)| (chart.to_string(), version.to_string()))
            .collect::<BTreeMap<_, _>>(),
    }
}

fn job(release: &str, chart: &str, version: &str) -> SyncJob {
    SyncJob {
        release_name: release.to_string(),
        namespace: "prod".to_string(),
        chart_name: chart.to_string(),
        chart_repo: "stable".to_string(),
        version: version.to_string(),
    }
}

struct Fixture {
    store: Arc<InMemoryStore>,
    releases: Arc<InMemoryReleaseManager>,
    source: Arc<FakeChartSource>,
}

impl Fixture {
    /// An auto-updating `web` release installed at 1.0.0
    async fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        create_resource(store.as_ref(), &operation("web", "web", "1.0.0", true))
            .await
            .unwrap();

        let releases = Arc::new(InMemoryReleaseManager::new());
        releases
            .seed(release("web", "prod", "web", "1.0.0", json!({"replicas": 2})))
            .await;

        let source = Arc::new(FakeChartSource::new("stable"));
        source.publish("web", "1.0.0").await;

        Self {
            store,
            releases,
            source,
        }
    }

    fn handler(&self, registry: Arc<RepoRegistry>) -> SyncHandler {
        SyncHandler::new(self.store.clone(), self.releases.clone(), registry, RETRY)
    }

    async fn operation(&self, name: &str) -> Operation {
        get_resource(self.store.as_ref(), "prod", name).await.unwrap()
    }
}

/// Only auto-updating operations on the polled repository get jobs
#[test]
fn test_jobs_for_update_filters_operations() {
    let mut other_repo = operation("api", "api", "1.0.0", true);
    other_repo.spec.chart_repo_name = "private".to_string();
    let operations = vec![
        operation("web", "web", "1.0.0", true),
        operation("pinned", "web", "1.0.0", false),
        operation("cache", "redis", "17.0.1", true),
        other_repo,
    ];

    let jobs = jobs_for_update(
        &operations,
        &update(&[("web", "1.1.0"), ("redis", "17.0.1"), ("api", "2.0.0")]),
    );
    assert_eq!(jobs, vec![job("web", "web", "1.1.0")]);
}

/// A newer published version upgrades the release and is recorded
#[tokio::test]
async fn test_sync_job_upgrades_release() {
    let fixture = Fixture::new().await;
    fixture.source.publish("web", "1.1.0").await;
    let handler = fixture.handler(registry_with(fixture.source.clone()));

    let action = handler.process(&job("web", "web", "1.1.0")).await.unwrap();
    assert_eq!(action, ReconcileAction::Done);

    assert_eq!(
        fixture.releases.calls(),
        vec![ReleaseCall::Upgrade {
            name: "web".to_string(),
            namespace: "prod".to_string(),
            version: "1.1.0".to_string(),
        }]
    );
    let installed = fixture.releases.get("web", "prod").await.unwrap();
    assert_eq!(installed.chart_version, "1.1.0");
    assert_eq!(installed.values["replicas"], json!(2));

    let op = fixture.operation("web").await;
    assert_eq!(op.recorded_version(), Some("1.1.0"));
    // The declared version is left for the pipeline to own.
    assert_eq!(op.spec.chart_version, "1.0.0");

    // Running the same job again has nothing left to do.
    let action = handler.process(&job("web", "web", "1.1.0")).await.unwrap();
    assert_eq!(action, ReconcileAction::Done);
    assert_eq!(fixture.releases.calls().len(), 1);
}

/// Without a registered repository the job waits and retries
#[tokio::test]
async fn test_sync_job_requeues_without_repository() {
    let fixture = Fixture::new().await;
    let handler = fixture.handler(Arc::new(RepoRegistry::new()));

    let action = handler.process(&job("web", "web", "1.1.0")).await.unwrap();
    assert_eq!(action, ReconcileAction::RequeueAfter(RETRY));
    assert!(fixture.releases.calls().is_empty());
}

/// A version the repository does not serve yet is retried later
#[tokio::test]
async fn test_sync_job_requeues_unpublished_version() {
    let fixture = Fixture::new().await;
    let handler = fixture.handler(registry_with(fixture.source.clone()));

    let action = handler.process(&job("web", "web", "2.0.0")).await.unwrap();
    assert_eq!(action, ReconcileAction::RequeueAfter(RETRY));
    assert!(fixture.releases.calls().is_empty());
}

/// A release installed out of band at the target only has its status recorded
#[tokio::test]
async fn test_sync_job_records_release_already_at_target() {
    let fixture = Fixture::new().await;
    fixture.source.publish("web", "1.1.0").await;
    fixture
        .releases
        .seed(release("web", "prod", "web", "1.1.0", json!({"replicas": 2})))
        .await;
    let handler = fixture.handler(registry_with(fixture.source.clone()));

    let action = handler.process(&job("web", "web", "1.1.0")).await.unwrap();
    assert_eq!(action, ReconcileAction::Done);
    assert!(fixture.releases.calls().is_empty());
    assert_eq!(fixture.operation("web").await.recorded_version(), Some("1.1.0"));
}

/// Jobs for releases that are gone are dropped
#[tokio::test]
async fn test_sync_job_for_missing_operation_is_done() {
    let fixture = Fixture::new().await;
    let handler = fixture.handler(registry_with(fixture.source.clone()));

    let action = handler.process(&job("ghost", "web", "1.1.0")).await.unwrap();
    assert_eq!(action, ReconcileAction::Done);
}

/// Release manager failures surface so the worker can back off
#[tokio::test]
async fn test_sync_job_upgrade_failure_is_an_error() {
    let fixture = Fixture::new().await;
    fixture.source.publish("web", "1.1.0").await;
    fixture.releases.set_failure(Some("cluster unreachable"));
    let handler = fixture.handler(registry_with(fixture.source.clone()));

    let err = handler.process(&job("web", "web", "1.1.0")).await.unwrap_err();
    assert!(err.to_string().contains("cluster unreachable"));
    assert_eq!(fixture.operation("web").await.recorded_version(), Some("1.0.0"));
}

/// Repeated updates for the same version coalesce into one queued job
#[tokio::test]
async fn test_dispatch_coalesces_jobs() {
    let fixture = Fixture::new().await;
    let engine = SyncEngine::new(fixture.store.clone(), fixture.releases.clone(), &Settings::default());

    let latest = update(&[("web", "1.1.0")]);
    assert_eq!(engine.dispatch(&latest).await.unwrap(), 1);
    assert_eq!(engine.dispatch(&latest).await.unwrap(), 1);
    assert_eq!(engine.queue().len(), 1);

    engine.shutdown().await;
}

/// A running engine picks up a newly published version on its own
#[tokio::test]
async fn test_engine_upgrades_on_poll() {
    let fixture = Fixture::new().await;
    fixture.source.publish("web", "1.2.0").await;

    let settings = Settings {
        max_concurrent_sync: 2,
        ..Settings::default()
    };
    let engine = SyncEngine::new(fixture.store.clone(), fixture.releases.clone(), &settings);
    engine.start();
    engine.register_source(fixture.source.clone(), Duration::from_secs(3600));

    let upgraded = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let installed = fixture.releases.get("web", "prod").await.unwrap();
            if installed.chart_version == "1.2.0" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(upgraded.is_ok(), "release was not upgraded");

    engine.shutdown().await;
    assert!(engine.registry().is_empty());
    assert_eq!(fixture.operation("web").await.recorded_version(), Some("1.2.0"));
}

/// Failed jobs back off per item until they succeed, then their retries are forgotten
#[tokio::test]
async fn test_failed_job_backs_off_until_upgrade_succeeds() {
    let fixture = Fixture::new().await;
    fixture.source.publish("web", "1.1.0").await;
    fixture.releases.set_failure(Some("cluster unreachable"));

    let engine = SyncEngine::new(fixture.store.clone(), fixture.releases.clone(), &Settings::default());
    let queue = engine.queue();
    let target = job("web", "web", "1.1.0");
    engine.start();
    engine.register_source(fixture.source.clone(), Duration::from_secs(3600));

    let retried = tokio::time::timeout(Duration::from_secs(5), async {
        while queue.num_requeues(&target) < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(retried.is_ok(), "failing job was not retried");
    assert_eq!(fixture.operation("web").await.recorded_version(), Some("1.0.0"));

    fixture.releases.set_failure(None);
    let settled = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let installed = fixture.releases.get("web", "prod").await.unwrap();
            if installed.chart_version == "1.1.0" && queue.num_requeues(&target) == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(settled.is_ok(), "job did not recover after the failure cleared");

    engine.shutdown().await;
    assert_eq!(fixture.operation("web").await.recorded_version(), Some("1.1.0"));
}

/// A job asking for a delay comes back after it without counting as a failure
#[tokio::test]
async fn test_delayed_job_returns_without_backoff() {
    let fixture = Fixture::new().await;
    fixture.source.publish("web", "1.1.0").await;

    let settings = Settings {
        sync_retry_delay_secs: 1,
        ..Settings::default()
    };
    let engine = SyncEngine::new(fixture.store.clone(), fixture.releases.clone(), &settings);
    let queue = engine.queue();
    let target = job("web", "web", "1.1.0");
    engine.start();

    // No repository is registered yet, so the job waits out the retry delay.
    assert_eq!(engine.dispatch(&update(&[("web", "1.1.0")])).await.unwrap(), 1);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(fixture.releases.calls().is_empty());
    assert_eq!(queue.num_requeues(&target), 0);
    assert!(queue.is_empty());

    // The poller's updates go nowhere: only the delayed job can upgrade.
    let (tx, _rx) = mpsc::unbounded_channel();
    engine
        .registry()
        .register(RepoHandle::spawn(fixture.source.clone(), Duration::from_secs(3600), tx));

    let upgraded = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let installed = fixture.releases.get("web", "prod").await.unwrap();
            if installed.chart_version == "1.1.0" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(upgraded.is_ok(), "delayed job never came back");
    assert_eq!(queue.num_requeues(&target), 0);

    engine.shutdown().await;
}
