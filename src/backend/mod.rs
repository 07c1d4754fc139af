//! External collaborators: the resource store and the release manager
//!
//! The pipeline never talks to a cluster directly. It reads and writes
//! documents through [`ResourceStore`] and installs charts through
//! [`ReleaseManager`]; both are traits so hosts can plug in real clients.

pub mod memory;

pub use memory::{InMemoryReleaseManager, InMemoryStore, ReleaseCall};

use crate::core::document::{Document, DocumentMap};
use crate::core::meta::{LabelSelector, Resource, ResourceKind};
use crate::core::operation::{InstallOptions, UninstallOptions, UpgradeOptions};
use crate::repo::ChartLocation;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors reported by a [`ResourceStore`]
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("conflict updating {kind} {namespace}/{name}: object was modified")]
    Conflict {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("invalid object: {0}")]
    Invalid(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Identity of a stored object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Read the key out of a document's `apiVersion`, `kind` and `metadata`
    pub fn of(document: &Document) -> Result<Self, StoreError> {
        let api_version = document["apiVersion"]
            .as_str()
            .ok_or_else(|| StoreError::Invalid("missing apiVersion".to_string()))?;
        let kind = document["kind"]
            .as_str()
            .ok_or_else(|| StoreError::Invalid("missing kind".to_string()))?;
        let name = document["metadata"]["name"]
            .as_str()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| StoreError::Invalid("missing metadata.name".to_string()))?;
        let namespace = document["metadata"]["namespace"].as_str().unwrap_or("");

        Ok(Self::new(
            ResourceKind::from_api_version(api_version, kind),
            namespace,
            name,
        ))
    }

    pub fn not_found(&self) -> StoreError {
        StoreError::NotFound {
            kind: self.kind.kind.clone(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind.kind, self.namespace, self.name)
    }
}

/// Document store holding both pipeline resources and live cluster objects.
///
/// Updates are optimistic: an update carrying a stale
/// `metadata.resourceVersion` fails with [`StoreError::Conflict`].
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> Result<Document, StoreError>;

    /// List objects of a kind. `None` lists every namespace.
    async fn list(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<Document>, StoreError>;

    async fn create(&self, object: Document) -> Result<Document, StoreError>;

    async fn update(&self, object: Document) -> Result<Document, StoreError>;

    /// Delete an object. Objects holding finalizers are only marked for
    /// deletion until their finalizers are removed.
    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError>;
}

fn to_document<R: Resource>(resource: &R) -> Result<Document, StoreError> {
    let mut document =
        serde_json::to_value(resource).map_err(|e| StoreError::Invalid(e.to_string()))?;
    let kind = R::resource_kind();
    if let Some(object) = document.as_object_mut() {
        object.insert("apiVersion".to_string(), Document::String(kind.api_version()));
        object.insert("kind".to_string(), Document::String(kind.kind));
    }
    Ok(document)
}

fn from_document<R: Resource>(document: Document) -> Result<R, StoreError> {
    serde_json::from_value(document)
        .map_err(|e| StoreError::Invalid(format!("{}: {}", R::KIND, e)))
}

/// Fetch a typed pipeline resource
pub async fn get_resource<R: Resource>(
    store: &dyn ResourceStore,
    namespace: &str,
    name: &str,
) -> Result<R, StoreError> {
    let key = ObjectKey::new(R::resource_kind(), namespace, name);
    from_document(store.get(&key).await?)
}

/// List typed pipeline resources
pub async fn list_resources<R: Resource>(
    store: &dyn ResourceStore,
    namespace: Option<&str>,
) -> Result<Vec<R>, StoreError> {
    store
        .list(&R::resource_kind(), namespace, &LabelSelector::new())
        .await?
        .into_iter()
        .map(from_document)
        .collect()
}

pub async fn create_resource<R: Resource>(store: &dyn ResourceStore, resource: &R) -> Result<R, StoreError> {
    from_document(store.create(to_document(resource)?).await?)
}

pub async fn update_resource<R: Resource>(store: &dyn ResourceStore, resource: &R) -> Result<R, StoreError> {
    from_document(store.update(to_document(resource)?).await?)
}

pub async fn delete_resource<R: Resource>(
    store: &dyn ResourceStore,
    namespace: &str,
    name: &str,
) -> Result<(), StoreError> {
    store
        .delete(&ObjectKey::new(R::resource_kind(), namespace, name))
        .await
}

/// Errors reported by a [`ReleaseManager`]
#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("release {namespace}/{name} not found")]
    NotFound { name: String, namespace: String },

    #[error("release {namespace}/{name} already exists")]
    AlreadyExists { name: String, namespace: String },

    #[error("release operation failed: {0}")]
    Failed(String),
}

impl ReleaseError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ReleaseError::NotFound { .. })
    }
}

/// An installed release as reported by the release manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub name: String,
    pub namespace: String,
    pub chart_name: String,
    pub chart_version: String,
    pub values: DocumentMap,
    pub status: String,
    pub revision: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstallRequest {
    pub release_name: String,
    pub namespace: String,
    pub chart_name: String,
    pub chart_version: String,
    pub chart: ChartLocation,
    pub values: DocumentMap,
    pub options: InstallOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpgradeRequest {
    pub release_name: String,
    pub namespace: String,
    pub chart_name: String,
    pub chart_version: String,
    pub chart: ChartLocation,
    pub values: DocumentMap,
    pub options: UpgradeOptions,
}

/// Installs, upgrades and removes chart releases
#[async_trait]
pub trait ReleaseManager: Send + Sync {
    async fn get(&self, name: &str, namespace: &str) -> Result<Release, ReleaseError>;

    async fn install(&self, request: InstallRequest) -> Result<Release, ReleaseError>;

    async fn upgrade(&self, request: UpgradeRequest) -> Result<Release, ReleaseError>;

    async fn uninstall(
        &self,
        name: &str,
        namespace: &str,
        options: &UninstallOptions,
    ) -> Result<(), ReleaseError>;
}
