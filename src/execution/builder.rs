//! Builds the concrete operation a pipeline step wants applied

use crate::core::application::{Application, Step};
use crate::core::component::Component;
use crate::core::context::PipelineValues;
use crate::core::document::{Document, DocumentMap};
use crate::core::meta::{ObjectMeta, FINALIZER};
use crate::core::operation::{Operation, OperationSpec, OperationStatus};
use crate::error::PipelineResult;
use crate::evaluator::TemplateRenderer;
use serde_json::json;

/// Label naming the application an operation belongs to
pub const APPLICATION_LABEL: &str = "chartflow.io/application";

/// Label naming the component an operation was built from
pub const COMPONENT_LABEL: &str = "chartflow.io/component";

/// Context a values template renders against: the merged inputs as
/// `parameter`, plus `Release` and `Chart`.
pub fn values_context(
    parameters: &DocumentMap,
    release: &str,
    namespace: &str,
    chart_name: &str,
    chart_version: &str,
) -> Document {
    json!({
        "parameter": parameters,
        "Release": {"Name": release, "Namespace": namespace},
        "Chart": {"Name": chart_name, "Version": chart_version},
    })
}

/// Turns a step, its component and upstream values into an [`Operation`].
///
/// Building is pure: the same inputs always produce an equal operation.
pub struct OperationBuilder {
    renderer: TemplateRenderer,
}

impl OperationBuilder {
    pub fn new() -> Self {
        Self {
            renderer: TemplateRenderer::new(),
        }
    }

    pub fn build(
        &self,
        application: &Application,
        step: &Step,
        component: &Component,
        upstream: &PipelineValues,
    ) -> PipelineResult<Operation> {
        let chart = &component.spec.chart;
        let release = step.release_name(application.name(), &chart.name);
        let namespace = application.namespace();

        let inputs = upstream.merged(&step.parameters, &step.values_ref_component_release);

        let values = match component.spec.values_template.as_deref() {
            Some(template) if !template.trim().is_empty() => {
                let context = values_context(&inputs, &release, namespace, &chart.name, &chart.version);
                self.renderer.render_values(template, &context)?
            }
            _ => inputs,
        };

        let mut metadata = ObjectMeta::new(&release, namespace);
        metadata
            .labels
            .insert(APPLICATION_LABEL.to_string(), application.name().to_string());
        metadata
            .labels
            .insert(COMPONENT_LABEL.to_string(), component.name().to_string());
        metadata.add_finalizer(FINALIZER);

        Ok(Operation {
            metadata,
            spec: OperationSpec {
                chart_repo_name: chart.repository.clone(),
                chart_name: chart.name.clone(),
                chart_version: chart.version.clone(),
                values,
                auto_update: component.spec.auto_update,
                create: component.spec.create.clone(),
                upgrade: component.spec.upgrade.clone(),
                uninstall: component.spec.uninstall.clone(),
            },
            status: OperationStatus::default(),
        })
    }
}

impl Default for OperationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::component::ChartCoordinates;
    use crate::error::PipelineError;

    fn component(template: Option<&str>) -> Component {
        let mut component = Component::new(
            "web",
            "default",
            ChartCoordinates {
                repository: "stable".to_string(),
                name: "web".to_string(),
                version: "1.0.0".to_string(),
            },
        );
        component.spec.values_template = template.map(str::to_string);
        component.spec.auto_update = true;
        component
    }

    fn map(value: serde_json::Value) -> DocumentMap {
        value.as_object().cloned().unwrap()
    }

    fn upstream() -> PipelineValues {
        let mut values = PipelineValues::new();
        values.record("db", map(json!({"host": "db.prod", "port": 5432})));
        values.record("cache", map(json!({"host": "cache.prod"})));
        values
    }

    #[test]
    fn test_build_renders_template_with_merged_values() {
        let app = Application::new("shop", "prod", vec![]);
        let step = Step::new("web").with_value_refs(["db", "cache"]);
        let template = "backend:\n  host: {{ parameter.host }}\n  port: {{ parameter.port }}\nname: {{ Release.Name }}\n";

        let op = OperationBuilder::new()
            .build(&app, &step, &component(Some(template)), &upstream())
            .unwrap();

        assert_eq!(op.metadata.name, "shop-web");
        assert_eq!(op.metadata.namespace, "prod");
        assert_eq!(op.spec.values["backend"]["host"], json!("cache.prod"));
        assert_eq!(op.spec.values["backend"]["port"], json!(5432));
        assert_eq!(op.spec.values["name"], json!("shop-web"));
        assert_eq!(op.spec.chart_repo_name, "stable");
        assert!(op.spec.auto_update);
        assert_eq!(op.metadata.labels[APPLICATION_LABEL], "shop");
        assert!(op.metadata.has_finalizer(FINALIZER));
    }

    #[test]
    fn test_build_is_deterministic() {
        let app = Application::new("shop", "prod", vec![]);
        let step = Step::new("web").with_value_refs(["db"]);
        let builder = OperationBuilder::new();
        let c = component(Some("host: {{ parameter.host }}"));

        let a = builder.build(&app, &step, &c, &upstream()).unwrap();
        let b = builder.build(&app, &step, &c, &upstream()).unwrap();
        assert_eq!(a.spec, b.spec);
        assert_eq!(a.metadata, b.metadata);
    }

    #[test]
    fn test_missing_refs_contribute_nothing() {
        let app = Application::new("shop", "prod", vec![]);
        let step = Step::new("web").with_value_refs(["unknown"]);

        let op = OperationBuilder::new()
            .build(&app, &step, &component(None), &upstream())
            .unwrap();
        assert!(op.spec.values.is_empty());
    }

    #[test]
    fn test_parameters_are_base_layer() {
        let app = Application::new("shop", "prod", vec![]);
        let mut step = Step::new("web").with_value_refs(["db"]);
        step.parameters = map(json!({"host": "override-me", "replicas": 2}));

        let op = OperationBuilder::new()
            .build(&app, &step, &component(None), &upstream())
            .unwrap();
        assert_eq!(op.spec.values["host"], json!("db.prod"));
        assert_eq!(op.spec.values["replicas"], json!(2));
    }

    #[test]
    fn test_template_failure_is_configuration_error() {
        let app = Application::new("shop", "prod", vec![]);
        let step = Step::new("web");

        let err = OperationBuilder::new()
            .build(&app, &step, &component(Some("host: {{ parameter.host }}")), &upstream())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Template(_)));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_values_context_binds_release_and_chart() {
        let context = values_context(&map(json!({"replicas": 2})), "shop-web", "prod", "web", "1.0.0");
        let values = TemplateRenderer::new()
            .render_values(
                "name: {{ Chart.Name }}-{{ Chart.Version }}\nrelease: {{ Release.Name }}.{{ Release.Namespace }}\nreplicas: {{ parameter.replicas }}\n",
                &context,
            )
            .unwrap();
        assert_eq!(values["name"], json!("web-1.0.0"));
        assert_eq!(values["release"], json!("shop-web.prod"));
        assert_eq!(values["replicas"], json!(2));
    }
}
