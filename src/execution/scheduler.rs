//! Reconcile loop - drives an application pass after pass until it settles
//!
//! Each pass is recorded in the history backend and summarised onto the
//! application's status. When an operation reconciler is attached, the
//! operation a pass halted on is applied before the next pass, which is
//! what a controller watching operations would do.

use crate::backend::{get_resource, update_resource, ResourceStore};
use crate::core::application::Application;
use crate::core::state::{set_condition, Condition, OutcomeKind, ReconcileOutcome};
use crate::error::PipelineResult;
use crate::execution::engine::{PipelineEngine, PipelinePass};
use crate::execution::operation::OperationReconciler;
use crate::persistence::{HistoryBackend, ReconcileRecord};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Passes attempted before the loop gives up on a run
pub const DEFAULT_MAX_PASSES: u32 = 50;

/// Condition type summarising the last pass
pub const READY_CONDITION: &str = "Ready";

/// How a loop run ended
#[derive(Debug, Clone)]
pub struct LoopSummary {
    pub run_id: Uuid,
    pub passes: u32,
    /// Outcome of the last pass that did not fail
    pub outcome: Option<ReconcileOutcome>,
    /// Values gathered by the last pass
    pub last_pass: Option<PipelinePass>,
}

impl LoopSummary {
    /// Whether the run ended on a terminal outcome
    pub fn settled(&self) -> bool {
        self.outcome
            .as_ref()
            .is_some_and(|outcome| outcome.kind().is_terminal())
    }

    pub fn completed(&self) -> bool {
        matches!(self.outcome, Some(ReconcileOutcome::Completed))
    }
}

pub struct ReconcileLoop {
    store: Arc<dyn ResourceStore>,
    engine: Arc<PipelineEngine>,
    operations: Option<Arc<OperationReconciler>>,
    history: Option<Arc<dyn HistoryBackend>>,
    max_passes: u32,
    honor_delays: bool,
}

impl ReconcileLoop {
    pub fn new(store: Arc<dyn ResourceStore>, engine: Arc<PipelineEngine>) -> Self {
        Self {
            store,
            engine,
            operations: None,
            history: None,
            max_passes: DEFAULT_MAX_PASSES,
            honor_delays: true,
        }
    }

    pub fn with_operations(mut self, reconciler: Arc<OperationReconciler>) -> Self {
        self.operations = Some(reconciler);
        self
    }

    pub fn with_history(mut self, history: Arc<dyn HistoryBackend>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_max_passes(mut self, max_passes: u32) -> Self {
        self.max_passes = max_passes.max(1);
        self
    }

    /// Run passes back to back instead of sleeping for requeue delays
    pub fn without_delays(mut self) -> Self {
        self.honor_delays = false;
        self
    }

    /// Reconcile the application until a pass settles or the pass budget
    /// runs out. A failed final pass is returned as the error.
    pub async fn run(&self, namespace: &str, name: &str) -> PipelineResult<LoopSummary> {
        let run_id = Uuid::new_v4();
        let mut summary = LoopSummary {
            run_id,
            passes: 0,
            outcome: None,
            last_pass: None,
        };
        let mut failures: u32 = 0;

        info!(application = %name, namespace = %namespace, run = %run_id, "Starting reconcile loop");

        for pass in 1..=self.max_passes {
            summary.passes = pass;
            let started_at = Utc::now();
            let result = self.engine.reconcile(namespace, name).await;

            let delay = match result {
                Ok(pipeline_pass) => {
                    failures = 0;
                    self.record(run_id, pass, namespace, name, started_at, Ok(&pipeline_pass))
                        .await;
                    self.update_status(namespace, name, &pipeline_pass).await;

                    let outcome = pipeline_pass.outcome.clone();
                    summary.outcome = Some(outcome.clone());
                    summary.last_pass = Some(pipeline_pass);

                    if outcome.kind().is_terminal() {
                        info!(application = %name, passes = pass, outcome = outcome.kind().as_str(), "Reconcile loop settled");
                        return Ok(summary);
                    }

                    if let (Some(operations), Some(step)) = (&self.operations, outcome.step()) {
                        match operations.reconcile(namespace, step).await {
                            Ok(action) => debug!(release = %step, action = ?action, "Operation reconciled"),
                            Err(e) => warn!(release = %step, error = %e, "Operation reconcile failed"),
                        }
                    }
                    outcome.requeue_after().unwrap_or_default()
                }
                Err(e) => {
                    failures += 1;
                    warn!(application = %name, pass = pass, error = %e, "Reconcile pass failed");
                    self.record(run_id, pass, namespace, name, started_at, Err(&e.to_string()))
                        .await;
                    if pass == self.max_passes {
                        return Err(e);
                    }
                    backoff(failures)
                }
            };

            if self.honor_delays && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        warn!(application = %name, passes = self.max_passes, "Reconcile loop did not settle");
        Ok(summary)
    }

    async fn record(
        &self,
        run_id: Uuid,
        pass: u32,
        namespace: &str,
        name: &str,
        started_at: chrono::DateTime<Utc>,
        result: Result<&PipelinePass, &str>,
    ) {
        let Some(history) = &self.history else {
            return;
        };

        let (outcome, step, message, completed_steps, total_steps) = match result {
            Ok(pass) => (
                pass.outcome.kind(),
                pass.outcome.step().map(str::to_string),
                outcome_message(&pass.outcome),
                pass.values.len(),
                pass.total_steps,
            ),
            Err(error) => (OutcomeKind::Failed, None, Some(error.to_string()), 0, 0),
        };

        let record = ReconcileRecord {
            id: Uuid::new_v4(),
            run_id,
            pass,
            application: name.to_string(),
            namespace: namespace.to_string(),
            outcome,
            step,
            message,
            started_at,
            finished_at: Utc::now(),
            completed_steps,
            total_steps,
        };
        if let Err(e) = history.save_record(&record).await {
            warn!(application = %name, error = %e, "Failed to save reconcile record");
        }
    }

    async fn update_status(&self, namespace: &str, name: &str, pass: &PipelinePass) {
        if matches!(
            pass.outcome,
            ReconcileOutcome::Missing | ReconcileOutcome::Finalized
        ) {
            return;
        }

        let mut application =
            match get_resource::<Application>(self.store.as_ref(), namespace, name).await {
                Ok(app) => app,
                Err(e) => {
                    debug!(application = %name, error = %e, "Skipping status update");
                    return;
                }
            };

        let status = &mut application.status;
        status.phase = Some(pass.outcome.kind().as_str().to_string());
        status.current_step_name = pass.outcome.step().map(str::to_string);
        status.step_returns = pass.values.clone().into_inner();
        let ready = matches!(pass.outcome, ReconcileOutcome::Completed);
        set_condition(
            &mut status.conditions,
            Condition::new(
                READY_CONDITION,
                ready,
                pass.outcome.kind().as_str(),
                outcome_message(&pass.outcome).unwrap_or_default(),
            ),
        );

        if let Err(e) = update_resource(self.store.as_ref(), &application).await {
            warn!(application = %name, error = %e, "Failed to update application status");
        }
    }
}

fn outcome_message(outcome: &ReconcileOutcome) -> Option<String> {
    match outcome {
        ReconcileOutcome::Halted { reason, .. } => Some(reason.to_string()),
        ReconcileOutcome::Stopped { reason, .. } => Some(reason.clone()),
        _ => None,
    }
}

/// Retry delay after consecutive failed passes: 100ms doubling to 30s
fn backoff(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    Duration::from_millis(100)
        .saturating_mul(1 << exponent)
        .min(Duration::from_secs(30))
}
