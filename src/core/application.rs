//! Application - an ordered pipeline of chart release steps

use crate::core::document::DocumentMap;
use crate::core::meta::{ObjectMeta, Resource};
use crate::core::state::Condition;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A user-declared application composed of ordered steps
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Application {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: ApplicationSpec,

    #[serde(default)]
    pub status: ApplicationStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    /// Steps run strictly in order; a step never starts before its
    /// predecessor's release is ready
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// One unit of the pipeline: install a component as a named release
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Component (reusable chart definition) to release
    pub component_name: String,

    /// Release name; defaults to `<application>-<chart>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_release_name: Option<String>,

    /// Releases of earlier steps whose returned values feed this step,
    /// merged in list order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values_ref_component_release: Vec<String>,

    /// Static parameters forming the base layer of the step's input values
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub parameters: DocumentMap,
}

impl Step {
    pub fn new(component_name: impl Into<String>) -> Self {
        Self {
            component_name: component_name.into(),
            ..Default::default()
        }
    }

    pub fn with_release_name(mut self, name: impl Into<String>) -> Self {
        self.component_release_name = Some(name.into());
        self
    }

    pub fn with_value_refs<I, S>(mut self, refs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.values_ref_component_release = refs.into_iter().map(Into::into).collect();
        self
    }

    /// The release name this step produces
    pub fn release_name(&self, application: &str, chart_name: &str) -> String {
        match &self.component_release_name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("{}-{}", application, chart_name),
        }
    }
}

/// Observed progress of an application
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Values returned by each completed step, keyed by release name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub step_returns: BTreeMap<String, DocumentMap>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

impl Resource for Application {
    const KIND: &'static str = "Application";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Application {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            metadata: ObjectMeta::new(name, namespace),
            spec: ApplicationSpec { steps },
            status: ApplicationStatus::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }
}
