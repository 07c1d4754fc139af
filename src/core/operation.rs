//! Operation - the concrete desired release the pipeline hands to the release manager

use crate::core::document::DocumentMap;
use crate::core::meta::{ObjectMeta, Resource};
use crate::core::state::Condition;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Desired state of one chart release
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Operation {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: OperationSpec,

    #[serde(default)]
    pub status: OperationStatus,
}

/// Everything that decides whether a release must change. Two operations
/// with equal specs describe the same release.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSpec {
    pub chart_repo_name: String,
    pub chart_name: String,
    pub chart_version: String,

    #[serde(default)]
    pub values: DocumentMap,

    #[serde(default)]
    pub auto_update: bool,

    #[serde(default)]
    pub create: InstallOptions,

    #[serde(default)]
    pub upgrade: UpgradeOptions,

    #[serde(default)]
    pub uninstall: UninstallOptions,
}

/// Options applied when the release is first installed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallOptions {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub skip_crds: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub no_hooks: bool,
    #[serde(default)]
    pub generate_name: bool,
    #[serde(default)]
    pub create_namespace: bool,
    #[serde(default)]
    pub disable_openapi_validation: bool,
    #[serde(default)]
    pub is_upgrade: bool,
    #[serde(default)]
    pub wait_for_jobs: bool,
    #[serde(default)]
    pub replace: bool,
    #[serde(default)]
    pub wait: bool,
}

/// Options applied when an existing release is upgraded
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeOptions {
    #[serde(default)]
    pub install: bool,
    #[serde(default)]
    pub devel: bool,
    #[serde(default)]
    pub skip_crds: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub wait: bool,
    #[serde(default)]
    pub disable_hooks: bool,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub reset_values: bool,
    #[serde(default)]
    pub reuse_values: bool,
    #[serde(default)]
    pub recreate: bool,
    #[serde(default)]
    pub max_history: u32,
    #[serde(default)]
    pub atomic: bool,
    #[serde(default)]
    pub cleanup_on_fail: bool,
    #[serde(default)]
    pub sub_notes: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub disable_openapi_validation: bool,
    #[serde(default)]
    pub wait_for_jobs: bool,
    #[serde(default)]
    pub upgrade_crds: bool,
}

/// Options applied when the release is removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UninstallOptions {
    #[serde(default)]
    pub disable_hooks: bool,
    #[serde(default)]
    pub keep_history: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Leave the release installed when the operation is deleted
    #[serde(default)]
    pub do_not_delete_release: bool,
}

/// Observed state of the release behind an operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_chart_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Resource for Operation {
    const KIND: &'static str = "Operation";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Operation {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, spec: OperationSpec) -> Self {
        Self {
            metadata: ObjectMeta::new(name, namespace),
            spec,
            status: OperationStatus::default(),
        }
    }

    /// The release this operation manages (same as the operation name)
    pub fn release_name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    /// The chart version last recorded as installed, if any
    pub fn recorded_version(&self) -> Option<&str> {
        self.status
            .current_chart_version
            .as_deref()
            .filter(|v| !v.is_empty())
    }

    /// Record the installed version and release status
    pub fn record_release(&mut self, version: &str, release_status: &str) {
        self.status.current_chart_version = Some(version.to_string());
        self.status.release_status = Some(release_status.to_string());
        self.status.update_time = Some(Utc::now());
    }
}
