//! Object metadata shared by every stored resource

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// API group of the pipeline's own resource kinds
pub const API_GROUP: &str = "chartflow.io";

/// API version of the pipeline's own resource kinds
pub const API_VERSION: &str = "v1alpha1";

/// Finalizer placed on applications, operations and repositories
pub const FINALIZER: &str = "chartflow.io/finalizer";

/// Label selector: every key must be present with an equal value
pub type LabelSelector = BTreeMap<String, String>;

/// Identifies a resource type by group, version and kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceKind {
    #[serde(default)]
    pub api_group: String,
    pub version: String,
    pub kind: String,
}

impl ResourceKind {
    pub fn new(api_group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            api_group: api_group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// Parse an `apiVersion` string (`group/version` or bare `version`)
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        match api_version.split_once('/') {
            Some((group, version)) => Self::new(group, version, kind),
            None => Self::new("", api_version, kind),
        }
    }

    /// The `apiVersion` form of this kind
    pub fn api_version(&self) -> String {
        if self.api_group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.api_group, self.version)
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, Kind={}", self.api_version(), self.kind)
    }
}

/// Standard object metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,

    #[serde(default)]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,

    /// Opaque version used for optimistic concurrency on update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

impl ObjectMeta {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Whether the object has been marked for deletion
    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// Returns true if the finalizer was added
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.finalizers.push(finalizer.to_string());
        true
    }

    /// Returns true if the finalizer was present
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|f| f != finalizer);
        self.finalizers.len() != before
    }
}

/// Whether `labels` satisfies every entry of `selector`
pub fn labels_match(labels: &BTreeMap<String, String>, selector: &LabelSelector) -> bool {
    selector
        .iter()
        .all(|(key, value)| labels.get(key).is_some_and(|v| v == value))
}

/// A typed resource owned by the pipeline
pub trait Resource: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// Kind name under [`API_GROUP`]/[`API_VERSION`]
    const KIND: &'static str;

    fn resource_kind() -> ResourceKind {
        ResourceKind::new(API_GROUP, API_VERSION, Self::KIND)
    }

    fn metadata(&self) -> &ObjectMeta;

    fn metadata_mut(&mut self) -> &mut ObjectMeta;
}
