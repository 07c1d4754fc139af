//! Readiness checks, return-value extraction and operator detection
//! against live resources in the store

use crate::backend::{ObjectKey, ResourceStore};
use crate::core::component::{OperatorProbe, ReturnValue, StableStatus, WatchScope};
use crate::core::context::ReleaseContext;
use crate::core::document::{display_value, matches_literal, values_equal, Document, DocumentMap};
use crate::core::meta::LabelSelector;
use crate::error::{PipelineError, PipelineResult};
use crate::evaluator::path::extract_path;
use crate::evaluator::template::{format_positional, TemplateRenderer};
use std::sync::Arc;
use tracing::debug;

/// Evaluates the state of live resources belonging to a release
pub struct ResourceEvaluator {
    store: Arc<dyn ResourceStore>,
    renderer: TemplateRenderer,
}

impl ResourceEvaluator {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self {
            store,
            renderer: TemplateRenderer::new(),
        }
    }

    pub fn renderer(&self) -> &TemplateRenderer {
        &self.renderer
    }

    fn render_name(&self, template: &str, release: &ReleaseContext) -> PipelineResult<String> {
        let name = self.renderer.render(template, &release.to_document())?;
        let name = name.trim();
        if name.is_empty() {
            return Err(PipelineError::EmptyResourceName {
                template: template.to_string(),
            });
        }
        Ok(name.to_string())
    }

    /// Whether the release satisfies its readiness rule.
    ///
    /// No rule means ready. A resource that cannot be fetched or a path that
    /// resolves to nothing means not ready. Template problems are errors.
    pub async fn check_ready(
        &self,
        release: &ReleaseContext,
        stable: Option<&StableStatus>,
    ) -> PipelineResult<bool> {
        let Some(stable) = stable else {
            return Ok(true);
        };

        let name = self.render_name(&stable.name, release)?;
        let key = ObjectKey::new(stable.resource_kind(), &release.namespace, &name);
        let resource = match self.store.get(&key).await {
            Ok(resource) => resource,
            Err(e) => {
                debug!(release = %release.release_name, resource = %key, error = %e, "readiness resource unavailable");
                return Ok(false);
            }
        };

        let Some(actual) = extract_path(&resource, &stable.json_path)? else {
            debug!(release = %release.release_name, path = %stable.json_path, "readiness path absent");
            return Ok(false);
        };

        let ready = match (&stable.value, &stable.value_json_path) {
            (Some(expected), _) => matches_literal(&actual, expected),
            (None, Some(expected_path)) => match extract_path(&resource, expected_path)? {
                Some(expected) => values_equal(&expected, &actual),
                None => false,
            },
            (None, None) => true,
        };

        debug!(
            release = %release.release_name,
            actual = %display_value(&actual),
            ready,
            "readiness evaluated"
        );
        Ok(ready)
    }

    /// Extract the named values a ready release hands to later steps.
    ///
    /// A missing resource surfaces as a not-found error so the caller can
    /// wait for it like any other not-ready condition.
    pub async fn extract_return_values(
        &self,
        release: &ReleaseContext,
        definitions: &[ReturnValue],
    ) -> PipelineResult<DocumentMap> {
        let mut result = DocumentMap::new();

        for definition in definitions {
            let name = self.render_name(&definition.resource_name, release)?;
            let key = ObjectKey::new(definition.resource_kind(), &release.namespace, &name);
            let resource = self.store.get(&key).await?;

            let mut values: Vec<Document> = Vec::new();
            for path in &definition.json_paths {
                if let Some(value) = extract_path(&resource, path)? {
                    values.push(value);
                }
            }

            let value = match definition.value_template.as_deref() {
                Some(format) if !format.is_empty() => {
                    Document::String(format_positional(format, &values))
                }
                _ if values.len() == 1 => values.remove(0),
                _ => {
                    let parts: Vec<String> = values.iter().map(display_value).collect();
                    Document::String(parts.join(definition.separator()))
                }
            };
            result.insert(definition.name.clone(), value);
        }

        Ok(result)
    }

    /// Whether the marker resource of an operator exists.
    ///
    /// Cluster-scoped probes look across all namespaces; namespace-scoped
    /// probes only in `namespace`.
    pub async fn operator_present(&self, probe: &OperatorProbe, namespace: &str) -> PipelineResult<bool> {
        let scope = match probe.watch_type {
            WatchScope::Namespace => Some(namespace),
            WatchScope::Cluster => None,
        };

        if let Some(name) = probe.meta_name.as_deref().filter(|n| !n.is_empty()) {
            let key = ObjectKey::new(probe.resource_kind(), scope.unwrap_or(""), name);
            return match self.store.get(&key).await {
                Ok(_) => Ok(true),
                Err(e) if e.is_not_found() => Ok(false),
                Err(e) => Err(e.into()),
            };
        }

        if let Some(labels) = &probe.match_labels {
            let selector: LabelSelector = labels.clone();
            let found = self
                .store
                .list(&probe.resource_kind(), scope, &selector)
                .await?;
            return Ok(!found.is_empty());
        }

        Ok(false)
    }
}
