//! Test: Readiness rules, return values and operator detection

use crate::helpers::*;
use chartflow::backend::get_resource;
use chartflow::core::{HaltReason, Operation, ReconcileOutcome};
use chartflow::execution::PipelineEvent;
use serde_json::json;

const CACHE: &str = r#"
apiVersion: chartflow.io/v1alpha1
kind: Component
metadata:
  name: cache
  namespace: prod
spec:
  chart:
    repository: bitnami
    name: redis
    version: 17.0.1
  stableStatus:
    apiGroup: apps
    version: v1
    kind: StatefulSet
    name: "{{ Release.Name }}-master"
    jsonPath: status.readyReplicas
    valueJsonPath: status.replicas
  returnValues:
    - name: host
      version: v1
      kind: Service
      resourceName: "{{ Release.Name }}-master"
      jsonPaths: ["metadata.name", "metadata.namespace"]
      joinSeparator: "."
    - name: port
      version: v1
      kind: Service
      resourceName: "{{ Release.Name }}-master"
      jsonPaths: ["spec.ports[0].port"]
---
apiVersion: chartflow.io/v1alpha1
kind: Application
metadata:
  name: store
  namespace: prod
spec:
  steps:
    - componentName: cache
      componentReleaseName: cache
---
apiVersion: v1
kind: Service
metadata:
  name: cache-master
  namespace: prod
spec:
  ports:
    - port: 6379
"#;

fn statefulset(ready: u64, replicas: u64) -> serde_json::Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "StatefulSet",
        "metadata": {"name": "cache-master", "namespace": "prod"},
        "status": {"readyReplicas": ready, "replicas": replicas}
    })
}

/// A step waits until its readiness rule holds, then hands its values on
#[tokio::test]
async fn test_step_waits_for_readiness() {
    let harness = Harness::new(CACHE, "bitnami").await;
    harness.store.apply(statefulset(1, 3)).await.unwrap();

    let pass = harness.engine.reconcile("prod", "store").await.unwrap();
    assert!(matches!(
        pass.outcome,
        ReconcileOutcome::Halted { reason: HaltReason::OperationCreated, .. }
    ));

    let pass = harness.engine.reconcile("prod", "store").await.unwrap();
    assert!(matches!(
        pass.outcome,
        ReconcileOutcome::Halted { reason: HaltReason::NotReady, .. }
    ));
    assert_eq!(pass.outcome.requeue_after(), Some(std::time::Duration::from_secs(1)));
    assert!(pass.values.is_empty());

    harness.store.apply(statefulset(3, 3)).await.unwrap();
    let pass = harness.engine.reconcile("prod", "store").await.unwrap();
    assert_eq!(pass.outcome, ReconcileOutcome::Completed);

    let returned = pass.values.get("cache").unwrap();
    assert_eq!(returned["host"], json!("cache-master.prod"));
    assert_eq!(returned["port"], json!(6379));
    assert!(harness.events().contains(&PipelineEvent::StepCompleted {
        release: "cache".to_string(),
        values: returned.clone(),
    }));
}

/// Literal readiness values compare against the field's text form
#[tokio::test]
async fn test_literal_readiness_value() {
    let manifests = CACHE.replace(
        "    valueJsonPath: status.replicas",
        "    value: \"3\"",
    );
    let harness = Harness::new(&manifests, "bitnami").await;
    harness.store.apply(statefulset(2, 3)).await.unwrap();

    harness.engine.reconcile("prod", "store").await.unwrap();
    let pass = harness.engine.reconcile("prod", "store").await.unwrap();
    assert!(matches!(
        pass.outcome,
        ReconcileOutcome::Halted { reason: HaltReason::NotReady, .. }
    ));

    harness.store.apply(statefulset(3, 5)).await.unwrap();
    let pass = harness.engine.reconcile("prod", "store").await.unwrap();
    assert_eq!(pass.outcome, ReconcileOutcome::Completed);
}

/// A name template rendering to nothing stops the pipeline at the step
#[tokio::test]
async fn test_empty_resource_name_stops() {
    let manifests = CACHE.replace(
        "    name: \"{{ Release.Name }}-master\"",
        "    name: \"{{ '' }}\"",
    );
    let harness = Harness::new(&manifests, "bitnami").await;

    harness.engine.reconcile("prod", "store").await.unwrap();
    let pass = harness.engine.reconcile("prod", "store").await.unwrap();
    match pass.outcome {
        ReconcileOutcome::Stopped { step, .. } => assert_eq!(step.as_deref(), Some("cache")),
        other => panic!("unexpected outcome {:?}", other),
    }
}

const OPERATOR: &str = r#"
apiVersion: chartflow.io/v1alpha1
kind: Component
metadata:
  name: pg-operator
  namespace: prod
spec:
  chart:
    repository: bitnami
    name: postgres-operator
    version: 1.9.0
  operator:
    apiGroup: apps
    version: v1
    kind: Deployment
    matchLabels:
      app.kubernetes.io/name: postgres-operator
    watchType: Cluster
---
apiVersion: chartflow.io/v1alpha1
kind: Application
metadata:
  name: store
  namespace: prod
spec:
  steps:
    - componentName: pg-operator
"#;

/// An operator already running anywhere in the cluster skips its step
#[tokio::test]
async fn test_cluster_operator_skips_step() {
    let harness = Harness::new(OPERATOR, "bitnami").await;
    harness
        .store
        .apply(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": "postgres-operator",
                "namespace": "operators",
                "labels": {"app.kubernetes.io/name": "postgres-operator"}
            }
        }))
        .await
        .unwrap();

    let pass = harness.engine.reconcile("prod", "store").await.unwrap();
    assert_eq!(pass.outcome, ReconcileOutcome::Completed);
    assert!(get_resource::<Operation>(harness.store.as_ref(), "prod", "store-postgres-operator")
        .await
        .unwrap_err()
        .is_not_found());
    assert!(harness.events().iter().any(|e| matches!(
        e,
        PipelineEvent::StepSkipped { release, .. } if release == "store-postgres-operator"
    )));
}

/// Without the operator the step is applied like any other
#[tokio::test]
async fn test_missing_operator_creates_operation() {
    let harness = Harness::new(OPERATOR, "bitnami").await;

    let pass = harness.engine.reconcile("prod", "store").await.unwrap();
    assert!(matches!(
        pass.outcome,
        ReconcileOutcome::Halted { ref step, reason: HaltReason::OperationCreated, .. }
            if step == "store-postgres-operator"
    ));
}
