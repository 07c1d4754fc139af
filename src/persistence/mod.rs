//! Persistence layer for reconcile history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteHistoryStore;

use crate::core::state::OutcomeKind;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tokio::sync::RwLock;
use uuid::Uuid;

/// One recorded pipeline pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileRecord {
    /// Unique pass ID
    pub id: Uuid,

    /// Reconcile loop run this pass belongs to
    pub run_id: Uuid,

    /// Pass number within the run, starting at 1
    pub pass: u32,

    pub application: String,
    pub namespace: String,

    pub outcome: OutcomeKind,

    /// Step the pass ended on
    pub step: Option<String>,

    /// Halt reason, stop reason or error text
    pub message: Option<String>,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// Steps that were ready during the pass
    pub completed_steps: usize,
    pub total_steps: usize,
}

impl ReconcileRecord {
    /// Fraction of steps ready, 0.0 to 1.0
    pub fn progress(&self) -> f64 {
        if self.total_steps == 0 {
            return 1.0;
        }
        self.completed_steps as f64 / self.total_steps as f64
    }
}

/// Trait for history backends
#[async_trait::async_trait]
pub trait HistoryBackend: Send + Sync {
    async fn save_record(&self, record: &ReconcileRecord) -> Result<()>;

    /// Records of an application, newest first
    async fn list_records(&self, namespace: &str, application: &str) -> Result<Vec<ReconcileRecord>>;

    /// Records of one reconcile loop run, in pass order
    async fn list_run(&self, run_id: Uuid) -> Result<Vec<ReconcileRecord>>;

    /// Every application with recorded history, as `(namespace, name)`
    async fn list_applications(&self) -> Result<Vec<(String, String)>>;
}

/// In-memory history (for testing or ephemeral use)
#[derive(Default)]
pub struct InMemoryHistory {
    records: RwLock<Vec<ReconcileRecord>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl HistoryBackend for InMemoryHistory {
    async fn save_record(&self, record: &ReconcileRecord) -> Result<()> {
        let mut records = self.records.write().await;
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        Ok(())
    }

    async fn list_records(&self, namespace: &str, application: &str) -> Result<Vec<ReconcileRecord>> {
        let records = self.records.read().await;
        let mut matching: Vec<_> = records
            .iter()
            .filter(|r| r.namespace == namespace && r.application == application)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.pass.cmp(&a.pass)));
        Ok(matching)
    }

    async fn list_run(&self, run_id: Uuid) -> Result<Vec<ReconcileRecord>> {
        let records = self.records.read().await;
        let mut run: Vec<_> = records.iter().filter(|r| r.run_id == run_id).cloned().collect();
        run.sort_by_key(|r| r.pass);
        Ok(run)
    }

    async fn list_applications(&self) -> Result<Vec<(String, String)>> {
        let records = self.records.read().await;
        let apps: BTreeSet<_> = records
            .iter()
            .map(|r| (r.namespace.clone(), r.application.clone()))
            .collect();
        Ok(apps.into_iter().collect())
    }
}
