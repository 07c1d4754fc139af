//! Test utility functions for chartflow
#![allow(dead_code)]

use async_trait::async_trait;
use chartflow::backend::{InMemoryReleaseManager, InMemoryStore, Release};
use chartflow::core::{DocumentMap, ManifestSet};
use chartflow::execution::{LoopSummary, OperationReconciler, PipelineEngine, PipelineEvent, ReconcileLoop};
use chartflow::repo::{
    ChartLocation, ChartSource, ChartVersion, LocatorKind, RepoHandle, RepoRegistry, SourceError,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

/// Chart source backed by an in-memory version list
pub struct FakeChartSource {
    name: String,
    charts: RwLock<BTreeMap<String, Vec<ChartVersion>>>,
}

impl FakeChartSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            charts: RwLock::new(BTreeMap::new()),
        }
    }

    /// Make a chart version available
    pub async fn publish(&self, chart: &str, version: &str) {
        self.charts
            .write()
            .await
            .entry(chart.to_string())
            .or_default()
            .push(ChartVersion {
                name: chart.to_string(),
                version: version.to_string(),
                urls: vec![format!("{}-{}.tgz", chart, version)],
                digest: None,
            });
    }
}

#[async_trait]
impl ChartSource for FakeChartSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn refresh(&self) -> Result<(), SourceError> {
        Ok(())
    }

    async fn list_charts(&self) -> Result<BTreeMap<String, Vec<ChartVersion>>, SourceError> {
        Ok(self.charts.read().await.clone())
    }

    async fn locate(&self, chart: &str, version: &str) -> Result<ChartLocation, SourceError> {
        let charts = self.charts.read().await;
        let found = charts
            .get(chart)
            .and_then(|versions| versions.iter().find(|v| v.version == version))
            .ok_or_else(|| SourceError::VersionNotFound {
                repo: self.name.clone(),
                chart: chart.to_string(),
                version: version.to_string(),
            })?;
        Ok(ChartLocation {
            locator: format!("memory://{}/{}", self.name, found.urls[0]),
            kind: LocatorKind::Http,
        })
    }
}

/// Registry holding a poller for `source`. The poller's updates are dropped.
pub fn registry_with(source: Arc<FakeChartSource>) -> Arc<RepoRegistry> {
    let registry = Arc::new(RepoRegistry::new());
    let (tx, _rx) = mpsc::unbounded_channel();
    registry.register(RepoHandle::spawn(source, Duration::from_secs(3600), tx));
    registry
}

/// Everything a rollout test needs, wired together
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub releases: Arc<InMemoryReleaseManager>,
    pub source: Arc<FakeChartSource>,
    pub registry: Arc<RepoRegistry>,
    pub engine: Arc<PipelineEngine>,
    pub events: Arc<Mutex<Vec<PipelineEvent>>>,
}

impl Harness {
    /// Load `manifests` into a fresh store and publish every chart version
    /// its components declare to a repository named `repo`
    pub async fn new(manifests: &str, repo: &str) -> Self {
        let manifests = ManifestSet::from_yaml(manifests).expect("manifests should be valid");
        let store = Arc::new(InMemoryStore::new());
        store.load_manifests(&manifests).await.unwrap();

        let source = Arc::new(FakeChartSource::new(repo));
        for component in &manifests.components {
            source
                .publish(&component.spec.chart.name, &component.spec.chart.version)
                .await;
        }

        let engine = Arc::new(PipelineEngine::new(store.clone()));
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        engine.add_event_handler(move |event| sink.lock().unwrap().push(event));

        Self {
            store,
            releases: Arc::new(InMemoryReleaseManager::new()),
            registry: registry_with(source.clone()),
            source,
            engine,
            events,
        }
    }

    pub fn operations(&self) -> Arc<OperationReconciler> {
        Arc::new(
            OperationReconciler::new(self.store.clone(), self.releases.clone(), self.registry.clone())
                .with_retry_delay(Duration::from_millis(10)),
        )
    }

    /// Drive an application to a settled state, installing releases as it goes
    pub async fn roll_out(&self, namespace: &str, application: &str) -> LoopSummary {
        ReconcileLoop::new(self.store.clone(), self.engine.clone())
            .with_operations(self.operations())
            .with_max_passes(20)
            .without_delays()
            .run(namespace, application)
            .await
            .unwrap()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().unwrap().clone()
    }
}

/// An installed release as the release manager would report it
pub fn release(name: &str, namespace: &str, chart: &str, version: &str, values: Value) -> Release {
    Release {
        name: name.to_string(),
        namespace: namespace.to_string(),
        chart_name: chart.to_string(),
        chart_version: version.to_string(),
        values: as_map(values),
        status: "deployed".to_string(),
        revision: 1,
    }
}

pub fn as_map(value: Value) -> DocumentMap {
    value.as_object().cloned().unwrap_or_default()
}
