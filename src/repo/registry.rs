//! Registry of live repository pollers, keyed by repository name

use crate::repo::handle::RepoHandle;
use crate::repo::source::ChartSource;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

#[derive(Default)]
pub struct RepoRegistry {
    handles: DashMap<String, RepoHandle>,
}

impl RepoRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a poller, closing any poller previously held under the
    /// same repository name.
    pub fn register(&self, handle: RepoHandle) {
        let name = handle.name().to_string();
        if let Some(previous) = self.handles.insert(name.clone(), handle) {
            previous.close();
            info!(repo = %name, "Replaced repository poller");
        } else {
            info!(repo = %name, "Registered repository poller");
        }
    }

    /// Close and forget a poller. Returns whether one was registered.
    pub fn remove(&self, name: &str) -> bool {
        match self.handles.remove(name) {
            Some((_, handle)) => {
                handle.close();
                info!(repo = %name, "Removed repository poller");
                true
            }
            None => false,
        }
    }

    pub fn source(&self, name: &str) -> Option<Arc<dyn ChartSource>> {
        self.handles.get(name).map(|handle| handle.source())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handles.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handles.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn close_all(&self) {
        for entry in self.handles.iter() {
            entry.value().close();
        }
        self.handles.clear();
    }
}
