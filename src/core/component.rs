//! Component - a reusable chart definition with readiness and output rules

use crate::core::meta::{LabelSelector, ObjectMeta, Resource, ResourceKind};
use crate::core::operation::{InstallOptions, UninstallOptions, UpgradeOptions};
use serde::{Deserialize, Serialize};

/// A reusable chart definition referenced by application steps
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Component {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: ComponentSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    pub chart: ChartCoordinates,

    /// Template producing the release values. The merged input values are
    /// bound as `parameter`; the rendered text must be a YAML mapping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values_template: Option<String>,

    /// Follow newer chart versions published by the repository
    #[serde(default)]
    pub auto_update: bool,

    /// Skip the step when this operator is already present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<OperatorProbe>,

    /// Readiness rule; without one the release counts as ready once applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stable_status: Option<StableStatus>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub return_values: Vec<ReturnValue>,

    #[serde(default)]
    pub create: InstallOptions,

    #[serde(default)]
    pub upgrade: UpgradeOptions,

    #[serde(default)]
    pub uninstall: UninstallOptions,
}

/// Where a chart comes from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartCoordinates {
    /// Repository resource name
    pub repository: String,
    pub name: String,
    pub version: String,
}

/// Scope in which an operator probe looks for its marker resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchScope {
    #[default]
    Cluster,
    Namespace,
}

/// Detects an already-installed operator by a marker resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorProbe {
    #[serde(default)]
    pub api_group: String,
    pub version: String,
    pub kind: String,

    /// Exact name of the marker resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_name: Option<String>,

    /// Labels any marker resource must carry, used when no name is given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_labels: Option<LabelSelector>,

    #[serde(default)]
    pub watch_type: WatchScope,
}

impl OperatorProbe {
    pub fn resource_kind(&self) -> ResourceKind {
        ResourceKind::new(&self.api_group, &self.version, &self.kind)
    }
}

/// Readiness rule: a field of a live resource must hold an expected value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StableStatus {
    #[serde(default)]
    pub api_group: String,
    pub version: String,
    pub kind: String,

    /// Template for the resource name, rendered with `Release` and `Chart`
    pub name: String,

    pub json_path: String,

    /// Literal expected value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Path in the same resource holding the expected value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_json_path: Option<String>,
}

impl StableStatus {
    pub fn resource_kind(&self) -> ResourceKind {
        ResourceKind::new(&self.api_group, &self.version, &self.kind)
    }
}

/// Extracts a named value from a live resource for downstream steps
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnValue {
    pub name: String,

    #[serde(default)]
    pub api_group: String,
    pub version: String,
    pub kind: String,

    /// Template for the resource name, rendered with `Release` and `Chart`
    pub resource_name: String,

    #[serde(default)]
    pub json_paths: Vec<String>,

    /// Positional format (`%s`, `%v`, `%d`) applied to the extracted values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_template: Option<String>,

    /// Separator used when several values are joined; defaults to `-`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_separator: Option<String>,
}

impl ReturnValue {
    pub fn resource_kind(&self) -> ResourceKind {
        ResourceKind::new(&self.api_group, &self.version, &self.kind)
    }

    pub fn separator(&self) -> &str {
        match self.join_separator.as_deref() {
            Some(sep) if !sep.is_empty() => sep,
            _ => "-",
        }
    }
}

impl Resource for Component {
    const KIND: &'static str = "Component";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Component {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, chart: ChartCoordinates) -> Self {
        Self {
            metadata: ObjectMeta::new(name, namespace),
            spec: ComponentSpec {
                chart,
                ..Default::default()
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}
