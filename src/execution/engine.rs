//! Pipeline engine - walks an application's steps in order, one pass at a time
//!
//! A pass is level-triggered: it re-derives everything from the store, makes
//! at most one change, and reports whether the caller should come back later.

use crate::backend::{
    create_resource, delete_resource, get_resource, update_resource, ResourceStore,
};
use crate::core::application::Application;
use crate::core::component::Component;
use crate::core::config::Settings;
use crate::core::context::{PipelineValues, ReleaseContext};
use crate::core::document::DocumentMap;
use crate::core::meta::{LabelSelector, Resource, FINALIZER};
use crate::core::operation::Operation;
use crate::core::state::{HaltReason, ReconcileOutcome};
use crate::error::{PipelineError, PipelineResult};
use crate::evaluator::ResourceEvaluator;
use crate::execution::builder::{OperationBuilder, APPLICATION_LABEL};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Events emitted while a pass runs
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    PassStarted {
        application: String,
        namespace: String,
    },
    StepSkipped {
        release: String,
        reason: String,
    },
    OperationCreated {
        release: String,
    },
    OperationUpdated {
        release: String,
    },
    StepNotReady {
        release: String,
    },
    StepCompleted {
        release: String,
        values: DocumentMap,
    },
    PipelineCompleted {
        application: String,
    },
    PipelineStopped {
        application: String,
        step: Option<String>,
        reason: String,
    },
    PipelineFinalized {
        application: String,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(PipelineEvent) + Send + Sync>;

/// Result of one pass: how it ended and the values gathered on the way
#[derive(Debug, Clone, PartialEq)]
pub struct PipelinePass {
    pub outcome: ReconcileOutcome,
    pub values: PipelineValues,
    pub total_steps: usize,
}

impl PipelinePass {
    fn new(outcome: ReconcileOutcome, values: PipelineValues, total_steps: usize) -> Self {
        Self {
            outcome,
            values,
            total_steps,
        }
    }
}

enum StepFlow {
    Continue,
    Halt(ReconcileOutcome),
}

/// Reconciles applications against the store
pub struct PipelineEngine {
    store: Arc<dyn ResourceStore>,
    evaluator: ResourceEvaluator,
    builder: OperationBuilder,
    halt_delay: Duration,
    component_namespace: Option<String>,
    cascade_delete: bool,
    event_handlers: RwLock<Vec<EventHandler>>,
}

impl PipelineEngine {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self::with_settings(store, &Settings::default())
    }

    pub fn with_settings(store: Arc<dyn ResourceStore>, settings: &Settings) -> Self {
        Self {
            evaluator: ResourceEvaluator::new(store.clone()),
            store,
            builder: OperationBuilder::new(),
            halt_delay: settings.halt_delay(),
            component_namespace: settings.component_namespace.clone(),
            cascade_delete: false,
            event_handlers: RwLock::new(Vec::new()),
        }
    }

    /// Delete the application's operations when the application is deleted
    pub fn with_cascade_delete(mut self, cascade: bool) -> Self {
        self.cascade_delete = cascade;
        self
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(PipelineEvent) + Send + Sync + 'static,
    {
        if let Ok(mut handlers) = self.event_handlers.write() {
            handlers.push(Arc::new(handler));
        }
    }

    /// Emit an event to all handlers
    fn emit_event(&self, event: PipelineEvent) {
        if let Ok(handlers) = self.event_handlers.read() {
            for handler in handlers.iter() {
                handler(event.clone());
            }
        }
    }

    /// Run one pass over the named application.
    ///
    /// `Ok` carries the outcome classification, including definition errors
    /// that retrying cannot fix. `Err` means the pass failed for a reason
    /// that may go away, and the caller should retry with backoff.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> PipelineResult<PipelinePass> {
        let application = match get_resource::<Application>(self.store.as_ref(), namespace, name).await {
            Ok(app) => app,
            Err(e) if e.is_not_found() => {
                debug!(application = %name, namespace = %namespace, "application no longer exists");
                return Ok(PipelinePass::new(ReconcileOutcome::Missing, PipelineValues::new(), 0));
            }
            Err(e) => return Err(e.into()),
        };

        if application.metadata.is_deleting() {
            self.finalize(application).await?;
            return Ok(PipelinePass::new(ReconcileOutcome::Finalized, PipelineValues::new(), 0));
        }

        let application = self.ensure_finalizer(application).await?;
        self.run_steps(&application).await
    }

    async fn ensure_finalizer(&self, mut application: Application) -> PipelineResult<Application> {
        if application.metadata.add_finalizer(FINALIZER) {
            debug!(application = %application.name(), "adding finalizer");
            application = update_resource(self.store.as_ref(), &application).await?;
        }
        Ok(application)
    }

    async fn finalize(&self, mut application: Application) -> PipelineResult<()> {
        if !application.metadata.has_finalizer(FINALIZER) {
            return Ok(());
        }

        info!(application = %application.name(), namespace = %application.namespace(), "finalizing application");
        self.teardown(&application).await?;

        application.metadata.remove_finalizer(FINALIZER);
        update_resource(self.store.as_ref(), &application).await?;
        self.emit_event(PipelineEvent::PipelineFinalized {
            application: application.name().to_string(),
        });
        Ok(())
    }

    /// Teardown hook run before an application's finalizer is released
    async fn teardown(&self, application: &Application) -> PipelineResult<()> {
        if !self.cascade_delete {
            return Ok(());
        }

        let mut selector = LabelSelector::new();
        selector.insert(APPLICATION_LABEL.to_string(), application.name().to_string());
        let operations = self
            .store
            .list(&Operation::resource_kind(), Some(application.namespace()), &selector)
            .await?;

        for operation in operations {
            let Some(name) = operation["metadata"]["name"].as_str() else {
                continue;
            };
            info!(application = %application.name(), release = %name, "deleting operation");
            match delete_resource::<Operation>(self.store.as_ref(), application.namespace(), name).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn run_steps(&self, application: &Application) -> PipelineResult<PipelinePass> {
        let total = application.spec.steps.len();
        let mut values = PipelineValues::new();

        self.emit_event(PipelineEvent::PassStarted {
            application: application.name().to_string(),
            namespace: application.namespace().to_string(),
        });

        for (index, step) in application.spec.steps.iter().enumerate() {
            debug!(
                application = %application.name(),
                step = index,
                component = %step.component_name,
                "evaluating step"
            );
            match self.run_step(application, index, &mut values).await? {
                StepFlow::Continue => {}
                StepFlow::Halt(outcome) => {
                    if let ReconcileOutcome::Stopped { step, reason } = &outcome {
                        warn!(application = %application.name(), step = ?step, reason = %reason, "pipeline stopped");
                        self.emit_event(PipelineEvent::PipelineStopped {
                            application: application.name().to_string(),
                            step: step.clone(),
                            reason: reason.clone(),
                        });
                    }
                    return Ok(PipelinePass::new(outcome, values, total));
                }
            }
        }

        info!(application = %application.name(), steps = total, "all steps ready");
        self.emit_event(PipelineEvent::PipelineCompleted {
            application: application.name().to_string(),
        });
        Ok(PipelinePass::new(ReconcileOutcome::Completed, values, total))
    }

    async fn run_step(
        &self,
        application: &Application,
        index: usize,
        values: &mut PipelineValues,
    ) -> PipelineResult<StepFlow> {
        let step = &application.spec.steps[index];
        let component_namespace = self
            .component_namespace
            .as_deref()
            .unwrap_or(application.namespace());

        let component = match get_resource::<Component>(self.store.as_ref(), component_namespace, &step.component_name).await {
            Ok(component) => component,
            Err(e) if e.is_not_found() => {
                let err = PipelineError::ComponentNotFound {
                    name: step.component_name.clone(),
                    namespace: component_namespace.to_string(),
                };
                return Ok(stopped(Some(step.component_name.clone()), &err));
            }
            Err(e) => return Err(e.into()),
        };

        let release = step.release_name(application.name(), &component.spec.chart.name);

        if let Some(probe) = &component.spec.operator {
            if self.evaluator.operator_present(probe, application.namespace()).await? {
                info!(application = %application.name(), release = %release, "operator already present, skipping step");
                self.emit_event(PipelineEvent::StepSkipped {
                    release,
                    reason: format!("{} already present", probe.kind),
                });
                return Ok(StepFlow::Continue);
            }
        }

        let desired = match self.builder.build(application, step, &component, values) {
            Ok(operation) => operation,
            Err(e) if e.is_configuration() => return Ok(stopped(Some(release), &e)),
            Err(e) => return Err(e),
        };

        let current = match get_resource::<Operation>(self.store.as_ref(), application.namespace(), &release).await {
            Ok(existing) => existing,
            Err(e) if e.is_not_found() => {
                create_resource(self.store.as_ref(), &desired).await?;
                info!(application = %application.name(), release = %release, "operation created");
                self.emit_event(PipelineEvent::OperationCreated {
                    release: release.clone(),
                });
                return Ok(self.halt(release, HaltReason::OperationCreated));
            }
            Err(e) => return Err(e.into()),
        };

        if current.spec != desired.spec {
            let mut updated = current;
            updated.spec = desired.spec;
            updated.metadata.labels.extend(desired.metadata.labels);
            update_resource(self.store.as_ref(), &updated).await?;
            info!(application = %application.name(), release = %release, "operation updated");
            self.emit_event(PipelineEvent::OperationUpdated {
                release: release.clone(),
            });
            return Ok(self.halt(release, HaltReason::OperationUpdated));
        }

        let context = ReleaseContext::from_operation(&current);
        let ready = match self
            .evaluator
            .check_ready(&context, component.spec.stable_status.as_ref())
            .await
        {
            Ok(ready) => ready,
            Err(e) if e.is_configuration() => return Ok(stopped(Some(release), &e)),
            Err(e) => return Err(e),
        };
        if !ready {
            debug!(application = %application.name(), release = %release, "release not ready");
            self.emit_event(PipelineEvent::StepNotReady {
                release: release.clone(),
            });
            return Ok(self.halt(release, HaltReason::NotReady));
        }

        let returned = match self
            .evaluator
            .extract_return_values(&context, &component.spec.return_values)
            .await
        {
            Ok(returned) => returned,
            Err(e) if e.is_configuration() => return Ok(stopped(Some(release), &e)),
            Err(e) if e.is_not_found() => {
                debug!(application = %application.name(), release = %release, error = %e, "return value source missing");
                self.emit_event(PipelineEvent::StepNotReady {
                    release: release.clone(),
                });
                return Ok(self.halt(release, HaltReason::NotReady));
            }
            Err(e) => return Err(e),
        };

        info!(application = %application.name(), release = %release, values = returned.len(), "step ready");
        self.emit_event(PipelineEvent::StepCompleted {
            release: release.clone(),
            values: returned.clone(),
        });
        values.record(release, returned);
        Ok(StepFlow::Continue)
    }

    fn halt(&self, step: String, reason: HaltReason) -> StepFlow {
        StepFlow::Halt(ReconcileOutcome::Halted {
            step,
            reason,
            requeue_after: self.halt_delay,
        })
    }
}

fn stopped(step: Option<String>, err: &PipelineError) -> StepFlow {
    StepFlow::Halt(ReconcileOutcome::Stopped {
        step,
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryStore;
    use crate::core::application::Step;
    use crate::core::component::{ChartCoordinates, OperatorProbe, WatchScope};
    use serde_json::json;
    use std::sync::Mutex;

    fn component(name: &str) -> Component {
        Component::new(
            name,
            "prod",
            ChartCoordinates {
                repository: "stable".to_string(),
                name: name.to_string(),
                version: "1.0.0".to_string(),
            },
        )
    }

    async fn seeded(app: Application, components: Vec<Component>) -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        create_resource(store.as_ref(), &app).await.unwrap();
        for c in components {
            create_resource(store.as_ref(), &c).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_missing_application() {
        let engine = PipelineEngine::new(Arc::new(InMemoryStore::new()));
        let pass = engine.reconcile("prod", "ghost").await.unwrap();
        assert_eq!(pass.outcome, ReconcileOutcome::Missing);
    }

    #[tokio::test]
    async fn test_empty_steps_complete_and_add_finalizer() {
        let store = seeded(Application::new("shop", "prod", vec![]), vec![]).await;
        let engine = PipelineEngine::new(store.clone());

        let pass = engine.reconcile("prod", "shop").await.unwrap();
        assert_eq!(pass.outcome, ReconcileOutcome::Completed);

        let app: Application = get_resource(store.as_ref(), "prod", "shop").await.unwrap();
        assert!(app.metadata.has_finalizer(FINALIZER));
    }

    #[tokio::test]
    async fn test_first_pass_creates_operation_and_halts() {
        let app = Application::new("shop", "prod", vec![Step::new("db").with_release_name("db")]);
        let store = seeded(app, vec![component("db")]).await;
        let engine = PipelineEngine::new(store.clone());

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        engine.add_event_handler(move |e| sink.lock().unwrap().push(e));

        let pass = engine.reconcile("prod", "shop").await.unwrap();
        assert_eq!(
            pass.outcome,
            ReconcileOutcome::Halted {
                step: "db".to_string(),
                reason: HaltReason::OperationCreated,
                requeue_after: Duration::from_secs(1),
            }
        );

        let op: Operation = get_resource(store.as_ref(), "prod", "db").await.unwrap();
        assert_eq!(op.spec.chart_name, "db");
        assert!(events
            .lock()
            .unwrap()
            .contains(&PipelineEvent::OperationCreated { release: "db".to_string() }));

        // No readiness rule: the second pass finds the operation in place and completes.
        let pass = engine.reconcile("prod", "shop").await.unwrap();
        assert_eq!(pass.outcome, ReconcileOutcome::Completed);
        assert!(pass.values.get("db").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_changed_component_updates_operation() {
        let app = Application::new("shop", "prod", vec![Step::new("db").with_release_name("db")]);
        let store = seeded(app, vec![component("db")]).await;
        let engine = PipelineEngine::new(store.clone());
        engine.reconcile("prod", "shop").await.unwrap();

        let mut changed = component("db");
        changed.spec.chart.version = "1.1.0".to_string();
        let mut stored: Component = get_resource(store.as_ref(), "prod", "db").await.unwrap();
        stored.spec = changed.spec;
        update_resource(store.as_ref(), &stored).await.unwrap();

        let pass = engine.reconcile("prod", "shop").await.unwrap();
        assert!(matches!(
            pass.outcome,
            ReconcileOutcome::Halted { reason: HaltReason::OperationUpdated, .. }
        ));
        let op: Operation = get_resource(store.as_ref(), "prod", "db").await.unwrap();
        assert_eq!(op.spec.chart_version, "1.1.0");
    }

    #[tokio::test]
    async fn test_missing_component_stops_without_error() {
        let app = Application::new("shop", "prod", vec![Step::new("nope")]);
        let store = seeded(app, vec![]).await;
        let engine = PipelineEngine::new(store);

        let pass = engine.reconcile("prod", "shop").await.unwrap();
        match pass.outcome {
            ReconcileOutcome::Stopped { step, reason } => {
                assert_eq!(step.as_deref(), Some("nope"));
                assert!(reason.contains("not found"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_operator_present_skips_step() {
        let app = Application::new("shop", "prod", vec![Step::new("pg-operator")]);
        let mut operator = component("pg-operator");
        operator.spec.operator = Some(OperatorProbe {
            api_group: "apps".to_string(),
            version: "v1".to_string(),
            kind: "Deployment".to_string(),
            meta_name: Some("pg-operator".to_string()),
            match_labels: None,
            watch_type: WatchScope::Namespace,
        });
        let store = seeded(app, vec![operator]).await;
        store
            .apply(json!({
                "apiVersion": "apps/v1",
                "kind": "Deployment",
                "metadata": {"name": "pg-operator", "namespace": "prod"}
            }))
            .await
            .unwrap();

        let engine = PipelineEngine::new(store.clone());
        let pass = engine.reconcile("prod", "shop").await.unwrap();
        assert_eq!(pass.outcome, ReconcileOutcome::Completed);

        let missing = get_resource::<Operation>(store.as_ref(), "prod", "shop-pg-operator").await;
        assert!(missing.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_deletion_runs_cascade_and_releases_finalizer() {
        let app = Application::new("shop", "prod", vec![Step::new("db").with_release_name("db")]);
        let store = seeded(app, vec![component("db")]).await;
        let engine = PipelineEngine::new(store.clone()).with_cascade_delete(true);
        engine.reconcile("prod", "shop").await.unwrap();

        delete_resource::<Application>(store.as_ref(), "prod", "shop").await.unwrap();
        let pass = engine.reconcile("prod", "shop").await.unwrap();
        assert_eq!(pass.outcome, ReconcileOutcome::Finalized);

        assert!(get_resource::<Application>(store.as_ref(), "prod", "shop")
            .await
            .unwrap_err()
            .is_not_found());
        let op: Operation = get_resource(store.as_ref(), "prod", "db").await.unwrap();
        assert!(op.metadata.is_deleting());
    }
}
