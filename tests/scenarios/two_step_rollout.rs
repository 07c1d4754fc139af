//! Test: Two-step rollout - a database feeds its endpoint to the web tier

use crate::helpers::*;
use chartflow::backend::{get_resource, update_resource, ReleaseCall, ReleaseManager};
use chartflow::core::{Application, Operation, ReconcileOutcome};
use chartflow::execution::PipelineEvent;
use serde_json::json;

const SHOP: &str = r#"
apiVersion: chartflow.io/v1alpha1
kind: Component
metadata:
  name: postgres
  namespace: shop
spec:
  chart:
    repository: stable
    name: postgresql
    version: 12.1.0
  returnValues:
    - name: endpoint
      version: v1
      kind: Service
      resourceName: "{{ Release.Name }}-postgresql"
      jsonPaths: ["spec.clusterIP", "spec.ports[0].port"]
      valueTemplate: "%s:%d"
---
apiVersion: chartflow.io/v1alpha1
kind: Component
metadata:
  name: web
  namespace: shop
spec:
  chart:
    repository: stable
    name: web
    version: 1.0.0
  valuesTemplate: |
    replicas: {{ parameter.replicas }}
    database:
      url: "postgres://{{ parameter.endpoint }}/{{ Release.Namespace }}"
---
apiVersion: chartflow.io/v1alpha1
kind: Application
metadata:
  name: shop
  namespace: shop
spec:
  steps:
    - componentName: postgres
      componentReleaseName: db
    - componentName: web
      valuesRefComponentRelease: [db]
      parameters:
        replicas: 2
---
apiVersion: v1
kind: Service
metadata:
  name: db-postgresql
  namespace: shop
spec:
  clusterIP: 10.0.0.12
  ports:
    - port: 5432
"#;

/// Steps are installed strictly in order and returned values reach the next step
#[tokio::test]
async fn test_two_step_rollout() {
    let harness = Harness::new(SHOP, "stable").await;

    let summary = harness.roll_out("shop", "shop").await;

    // create db, create web, complete
    assert!(summary.completed());
    assert_eq!(summary.passes, 3);
    assert_eq!(summary.outcome, Some(ReconcileOutcome::Completed));

    assert_eq!(
        harness.releases.calls(),
        vec![
            ReleaseCall::Install {
                name: "db".to_string(),
                namespace: "shop".to_string(),
                version: "12.1.0".to_string(),
            },
            ReleaseCall::Install {
                name: "shop-web".to_string(),
                namespace: "shop".to_string(),
                version: "1.0.0".to_string(),
            },
        ]
    );

    let web: Operation = get_resource(harness.store.as_ref(), "shop", "shop-web")
        .await
        .unwrap();
    assert_eq!(web.spec.values["replicas"], json!(2));
    assert_eq!(
        web.spec.values["database"]["url"],
        json!("postgres://10.0.0.12:5432/shop")
    );
    assert_eq!(web.recorded_version(), Some("1.0.0"));

    let installed = harness.releases.get("shop-web", "shop").await.unwrap();
    assert_eq!(installed.values, web.spec.values);
}

/// The application status mirrors the last pass
#[tokio::test]
async fn test_rollout_records_application_status() {
    let harness = Harness::new(SHOP, "stable").await;
    harness.roll_out("shop", "shop").await;

    let app: Application = get_resource(harness.store.as_ref(), "shop", "shop")
        .await
        .unwrap();
    assert_eq!(app.status.phase.as_deref(), Some("Completed"));
    assert_eq!(
        app.status.step_returns["db"]["endpoint"],
        json!("10.0.0.12:5432")
    );
    assert!(app.status.step_returns["shop-web"].is_empty());
    assert!(app.status.conditions.iter().any(|c| c.is_true()));
}

/// Without the database's service the web step never starts
#[tokio::test]
async fn test_missing_return_source_blocks_next_step() {
    let manifests = SHOP.split("\n---\napiVersion: v1\nkind: Service").next().unwrap();
    let harness = Harness::new(manifests, "stable").await;

    let pass = harness.engine.reconcile("shop", "shop").await.unwrap();
    assert!(matches!(pass.outcome, ReconcileOutcome::Halted { ref step, .. } if step == "db"));

    let pass = harness.engine.reconcile("shop", "shop").await.unwrap();
    match pass.outcome {
        ReconcileOutcome::Halted { step, .. } => assert_eq!(step, "db"),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(get_resource::<Operation>(harness.store.as_ref(), "shop", "shop-web")
        .await
        .unwrap_err()
        .is_not_found());
    assert!(harness
        .events()
        .contains(&PipelineEvent::StepNotReady { release: "db".to_string() }));
}

/// Changing a step's parameters re-applies its operation and upgrades the release
#[tokio::test]
async fn test_parameter_change_upgrades_release() {
    let harness = Harness::new(SHOP, "stable").await;
    harness.roll_out("shop", "shop").await;

    let mut app: Application = get_resource(harness.store.as_ref(), "shop", "shop")
        .await
        .unwrap();
    app.spec.steps[1]
        .parameters
        .insert("replicas".to_string(), json!(3));
    update_resource(harness.store.as_ref(), &app).await.unwrap();

    let summary = harness.roll_out("shop", "shop").await;
    assert!(summary.completed());
    assert_eq!(
        harness.releases.calls().last(),
        Some(&ReleaseCall::Upgrade {
            name: "shop-web".to_string(),
            namespace: "shop".to_string(),
            version: "1.0.0".to_string(),
        })
    );
    let installed = harness.releases.get("shop-web", "shop").await.unwrap();
    assert_eq!(installed.values["replicas"], json!(3));
    assert_eq!(installed.revision, 2);
}

/// A release that was moved ahead out of band is recorded, not rolled back
#[tokio::test]
async fn test_out_of_band_upgrade_is_recorded() {
    let harness = Harness::new(SHOP, "stable").await;
    harness.roll_out("shop", "shop").await;

    let db: Operation = get_resource(harness.store.as_ref(), "shop", "db").await.unwrap();
    harness
        .releases
        .seed(release("db", "shop", "postgresql", "12.2.0", json!(db.spec.values)))
        .await;

    harness.operations().reconcile("shop", "db").await.unwrap();

    let db: Operation = get_resource(harness.store.as_ref(), "shop", "db").await.unwrap();
    assert_eq!(db.recorded_version(), Some("12.2.0"));
    assert!(!harness
        .releases
        .calls()
        .iter()
        .any(|call| matches!(call, ReleaseCall::Upgrade { name, .. } if name == "db")));
}
