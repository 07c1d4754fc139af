//! Repository - a chart source the sync engine polls

use crate::core::meta::{ObjectMeta, Resource};
use serde::{Deserialize, Serialize};

/// Kind of chart repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepoType {
    /// A git repository laid out as `charts/<chart>/<version>/`
    Git,
    /// An HTTP repository serving `index.yaml`
    ChartMuseum,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub metadata: ObjectMeta,
    pub spec: RepositorySpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositorySpec {
    #[serde(rename = "type")]
    pub repo_type: RepoType,

    pub url: String,

    /// Git branch; defaults to `master`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default)]
    pub insecure_skip_tls_verify: bool,

    /// Poll period override in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_secs: Option<u64>,
}

impl RepositorySpec {
    pub fn branch(&self) -> &str {
        match self.branch.as_deref() {
            Some(b) if !b.is_empty() => b,
            _ => "master",
        }
    }
}

impl Resource for Repository {
    const KIND: &'static str = "Repository";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Repository {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}
