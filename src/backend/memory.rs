//! In-memory store and release manager (for testing or local simulation)

use super::{
    create_resource, InstallRequest, ObjectKey, Release, ReleaseError, ReleaseManager,
    ResourceStore, StoreError, UpgradeRequest,
};
use crate::core::config::ManifestSet;
use crate::core::document::{Document, DocumentMap};
use crate::core::meta::{labels_match, LabelSelector, ResourceKind};
use crate::core::operation::UninstallOptions;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::RwLock;

/// Document store with finalizer-aware deletion and optimistic concurrency
pub struct InMemoryStore {
    objects: RwLock<BTreeMap<ObjectKey, Document>>,
    revision: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            revision: AtomicU64::new(0),
        }
    }

    /// Create or replace an object without version checks
    pub async fn apply(&self, mut object: Document) -> Result<Document, StoreError> {
        let key = ObjectKey::of(&object)?;
        self.stamp(&mut object);
        self.objects.write().await.insert(key, object.clone());
        Ok(object)
    }

    /// Load every document of a manifest set. Returns how many were stored.
    pub async fn load_manifests(&self, manifests: &ManifestSet) -> Result<usize, StoreError> {
        for repository in &manifests.repositories {
            create_resource(self, repository).await?;
        }
        for component in &manifests.components {
            create_resource(self, component).await?;
        }
        for operation in &manifests.operations {
            create_resource(self, operation).await?;
        }
        for application in &manifests.applications {
            create_resource(self, application).await?;
        }
        for resource in &manifests.resources {
            self.apply(resource.clone()).await?;
        }
        Ok(manifests.repositories.len()
            + manifests.components.len()
            + manifests.operations.len()
            + manifests.applications.len()
            + manifests.resources.len())
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    fn stamp(&self, object: &mut Document) {
        let version = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(meta) = metadata_mut(object) {
            meta.insert(
                "resourceVersion".to_string(),
                Document::String(version.to_string()),
            );
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn metadata_mut(object: &mut Document) -> Option<&mut DocumentMap> {
    let object = object.as_object_mut()?;
    object
        .entry("metadata")
        .or_insert_with(|| Document::Object(DocumentMap::new()))
        .as_object_mut()
}

fn has_finalizers(object: &Document) -> bool {
    object["metadata"]["finalizers"]
        .as_array()
        .is_some_and(|f| !f.is_empty())
}

fn labels_of(object: &Document) -> BTreeMap<String, String> {
    object["metadata"]["labels"]
        .as_object()
        .map(|labels| {
            labels
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<Document, StoreError> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| key.not_found())
    }

    async fn list(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<Document>, StoreError> {
        let objects = self.objects.read().await;
        Ok(objects
            .iter()
            .filter(|(key, _)| &key.kind == kind)
            .filter(|(key, _)| namespace.map_or(true, |ns| key.namespace == ns))
            .filter(|(_, object)| labels_match(&labels_of(object), selector))
            .map(|(_, object)| object.clone())
            .collect())
    }

    async fn create(&self, mut object: Document) -> Result<Document, StoreError> {
        let key = ObjectKey::of(&object)?;
        let mut objects = self.objects.write().await;
        if objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: key.kind.kind,
                namespace: key.namespace,
                name: key.name,
            });
        }
        self.stamp(&mut object);
        objects.insert(key, object.clone());
        Ok(object)
    }

    async fn update(&self, mut object: Document) -> Result<Document, StoreError> {
        let key = ObjectKey::of(&object)?;
        let mut objects = self.objects.write().await;
        let stored = objects.get(&key).ok_or_else(|| key.not_found())?;

        let stored_version = stored["metadata"]["resourceVersion"].as_str();
        let incoming_version = object["metadata"]["resourceVersion"]
            .as_str()
            .filter(|v| !v.is_empty());
        if incoming_version.is_some() && incoming_version != stored_version {
            return Err(StoreError::Conflict {
                kind: key.kind.kind,
                namespace: key.namespace,
                name: key.name,
            });
        }

        // A deletion mark cannot be cleared by an update.
        let deletion = stored["metadata"]["deletionTimestamp"].clone();
        if !deletion.is_null() {
            if let Some(meta) = metadata_mut(&mut object) {
                meta.insert("deletionTimestamp".to_string(), deletion);
            }
            if !has_finalizers(&object) {
                objects.remove(&key);
                return Ok(object);
            }
        }

        self.stamp(&mut object);
        objects.insert(key, object.clone());
        Ok(object)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        let mut objects = self.objects.write().await;
        let stored = objects.get(key).ok_or_else(|| key.not_found())?;

        if !has_finalizers(stored) {
            objects.remove(key);
            return Ok(());
        }

        let mut marked = stored.clone();
        if marked["metadata"]["deletionTimestamp"].is_null() {
            if let Some(meta) = metadata_mut(&mut marked) {
                meta.insert(
                    "deletionTimestamp".to_string(),
                    Document::String(Utc::now().to_rfc3339()),
                );
            }
            self.stamp(&mut marked);
            objects.insert(key.clone(), marked);
        }
        Ok(())
    }
}

/// A call made against [`InMemoryReleaseManager`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseCall {
    Install { name: String, namespace: String, version: String },
    Upgrade { name: String, namespace: String, version: String },
    Uninstall { name: String, namespace: String },
}

/// Release manager that keeps releases in memory and records every call
pub struct InMemoryReleaseManager {
    releases: RwLock<HashMap<(String, String), Release>>,
    calls: Mutex<Vec<ReleaseCall>>,
    failure: Mutex<Option<String>>,
}

impl InMemoryReleaseManager {
    pub fn new() -> Self {
        Self {
            releases: RwLock::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
        }
    }

    /// Register an already installed release
    pub async fn seed(&self, release: Release) {
        self.releases
            .write()
            .await
            .insert((release.namespace.clone(), release.name.clone()), release);
    }

    /// Make every mutating call fail with `message` until cleared
    pub fn set_failure(&self, message: Option<&str>) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = message.map(str::to_string);
        }
    }

    /// Calls made so far, in order
    pub fn calls(&self) -> Vec<ReleaseCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: ReleaseCall) -> Result<(), ReleaseError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
        match self.failure.lock().ok().and_then(|f| f.clone()) {
            Some(message) => Err(ReleaseError::Failed(message)),
            None => Ok(()),
        }
    }
}

impl Default for InMemoryReleaseManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReleaseManager for InMemoryReleaseManager {
    async fn get(&self, name: &str, namespace: &str) -> Result<Release, ReleaseError> {
        self.releases
            .read()
            .await
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ReleaseError::NotFound {
                name: name.to_string(),
                namespace: namespace.to_string(),
            })
    }

    async fn install(&self, request: InstallRequest) -> Result<Release, ReleaseError> {
        self.record(ReleaseCall::Install {
            name: request.release_name.clone(),
            namespace: request.namespace.clone(),
            version: request.chart_version.clone(),
        })?;

        let key = (request.namespace.clone(), request.release_name.clone());
        let mut releases = self.releases.write().await;
        if releases.contains_key(&key) && !request.options.replace {
            return Err(ReleaseError::AlreadyExists {
                name: request.release_name,
                namespace: request.namespace,
            });
        }

        let release = Release {
            name: request.release_name,
            namespace: request.namespace,
            chart_name: request.chart_name,
            chart_version: request.chart_version,
            values: request.values,
            status: "deployed".to_string(),
            revision: 1,
        };
        releases.insert(key, release.clone());
        Ok(release)
    }

    async fn upgrade(&self, request: UpgradeRequest) -> Result<Release, ReleaseError> {
        self.record(ReleaseCall::Upgrade {
            name: request.release_name.clone(),
            namespace: request.namespace.clone(),
            version: request.chart_version.clone(),
        })?;

        let key = (request.namespace.clone(), request.release_name.clone());
        let mut releases = self.releases.write().await;
        let revision = match releases.get(&key) {
            Some(existing) => existing.revision + 1,
            None if request.options.install => 1,
            None => {
                return Err(ReleaseError::NotFound {
                    name: request.release_name,
                    namespace: request.namespace,
                })
            }
        };

        let release = Release {
            name: request.release_name,
            namespace: request.namespace,
            chart_name: request.chart_name,
            chart_version: request.chart_version,
            values: request.values,
            status: "deployed".to_string(),
            revision,
        };
        releases.insert(key, release.clone());
        Ok(release)
    }

    async fn uninstall(
        &self,
        name: &str,
        namespace: &str,
        _options: &UninstallOptions,
    ) -> Result<(), ReleaseError> {
        self.record(ReleaseCall::Uninstall {
            name: name.to_string(),
            namespace: namespace.to_string(),
        })?;

        match self
            .releases
            .write()
            .await
            .remove(&(namespace.to_string(), name.to_string()))
        {
            Some(_) => Ok(()),
            None => Err(ReleaseError::NotFound {
                name: name.to_string(),
                namespace: namespace.to_string(),
            }),
        }
    }
}
