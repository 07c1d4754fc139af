//! Chart sources - where published chart versions are discovered

use crate::core::repository::{RepoType, Repository};
use crate::repo::git::GitChartSource;
use crate::repo::index::IndexChartSource;
use crate::repo::version::latest_version;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by chart sources
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("repository {0} is not registered")]
    RepoNotRegistered(String),

    #[error("chart {chart} not found in repository {repo}")]
    ChartNotFound { repo: String, chart: String },

    #[error("chart {chart} version {version} not found in repository {repo}")]
    VersionNotFound {
        repo: String,
        chart: String,
        version: String,
    },

    #[error("git command failed: {0}")]
    Git(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid repository index: {0}")]
    Index(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceError {
    /// The repository, chart or version is not (yet) available
    pub fn is_missing(&self) -> bool {
        matches!(
            self,
            SourceError::RepoNotRegistered(_)
                | SourceError::ChartNotFound { .. }
                | SourceError::VersionNotFound { .. }
        )
    }
}

/// How a chart location should be read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocatorKind {
    /// A local directory
    File,
    /// A downloadable archive URL
    Http,
}

/// Where the release manager can load a chart version from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartLocation {
    pub locator: String,
    pub kind: LocatorKind,
}

/// One published version of a chart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartVersion {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// A chart repository. Implementations cache what they last fetched;
/// [`ChartSource::refresh`] brings the cache up to date.
#[async_trait]
pub trait ChartSource: Send + Sync {
    /// Repository name this source serves
    fn name(&self) -> &str;

    /// Fetch the current state of the remote repository
    async fn refresh(&self) -> Result<(), SourceError>;

    /// Every chart and its versions, as of the last refresh
    async fn list_charts(&self) -> Result<BTreeMap<String, Vec<ChartVersion>>, SourceError>;

    /// Location of a chart version
    async fn locate(&self, chart: &str, version: &str) -> Result<ChartLocation, SourceError>;

    /// Highest version of every chart
    async fn latest_versions(&self) -> Result<BTreeMap<String, String>, SourceError> {
        let charts = self.list_charts().await?;
        Ok(charts
            .into_iter()
            .filter_map(|(name, versions)| {
                latest_version(versions.iter().map(|v| v.version.as_str())).map(|latest| (name, latest))
            })
            .collect())
    }

    /// Highest version of one chart
    async fn latest_version(&self, chart: &str) -> Result<String, SourceError> {
        let charts = self.list_charts().await?;
        charts
            .get(chart)
            .and_then(|versions| latest_version(versions.iter().map(|v| v.version.as_str())))
            .ok_or_else(|| SourceError::ChartNotFound {
                repo: self.name().to_string(),
                chart: chart.to_string(),
            })
    }

    async fn chart_exists(&self, chart: &str, version: &str) -> Result<bool, SourceError> {
        let charts = self.list_charts().await?;
        Ok(charts
            .get(chart)
            .is_some_and(|versions| versions.iter().any(|v| v.version == version)))
    }
}

/// Build the source for a repository resource. Git checkouts live under
/// `<cache_dir>/<repository name>`.
pub fn build_source(repo: &Repository, cache_dir: &Path) -> Result<Arc<dyn ChartSource>, SourceError> {
    match repo.spec.repo_type {
        RepoType::Git => Ok(Arc::new(GitChartSource::new(
            repo.name(),
            &repo.spec,
            cache_dir.join(repo.name()),
        ))),
        RepoType::ChartMuseum => Ok(Arc::new(IndexChartSource::new(repo.name(), &repo.spec)?)),
    }
}
