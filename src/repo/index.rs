//! Index-backed chart source
//!
//! Serves an HTTP chart repository that publishes an `index.yaml` listing
//! every chart and the archive URLs of each version.

use crate::core::repository::RepositorySpec;
use crate::repo::source::{ChartLocation, ChartSource, ChartVersion, LocatorKind, SourceError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

const USER_AGENT: &str = concat!("chartflow/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Default, Deserialize)]
struct RepoIndex {
    #[serde(default)]
    entries: BTreeMap<String, Vec<IndexEntry>>,
}

#[derive(Debug, Deserialize)]
struct IndexEntry {
    version: String,
    #[serde(default)]
    urls: Vec<String>,
    #[serde(default)]
    digest: Option<String>,
}

fn parse_index(text: &str) -> Result<BTreeMap<String, Vec<ChartVersion>>, SourceError> {
    let index: RepoIndex = serde_yaml::from_str(text).map_err(|e| SourceError::Index(e.to_string()))?;
    Ok(index
        .entries
        .into_iter()
        .map(|(name, entries)| {
            let versions = entries
                .into_iter()
                .map(|entry| ChartVersion {
                    name: name.clone(),
                    version: entry.version,
                    urls: entry.urls,
                    digest: entry.digest,
                })
                .collect();
            (name, versions)
        })
        .collect())
}

/// Resolve an archive URL from the index against the repository URL.
/// Absolute URLs are kept as they are.
pub fn resolve_chart_url(repo_url: &str, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        return url.to_string();
    }
    format!(
        "{}/{}",
        repo_url.trim_end_matches('/'),
        url.trim_start_matches("./").trim_start_matches('/')
    )
}

pub struct IndexChartSource {
    name: String,
    url: String,
    username: Option<String>,
    password: Option<String>,
    token: Option<String>,
    client: Client,
    charts: RwLock<Option<BTreeMap<String, Vec<ChartVersion>>>>,
}

impl IndexChartSource {
    pub fn new(name: &str, spec: &RepositorySpec) -> Result<Self, SourceError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(spec.insecure_skip_tls_verify)
            .build()?;

        Ok(Self {
            name: name.to_string(),
            url: spec.url.trim_end_matches('/').to_string(),
            username: spec.username.clone().filter(|u| !u.is_empty()),
            password: spec.password.clone(),
            token: spec.token.clone().filter(|t| !t.is_empty()),
            client,
            charts: RwLock::new(None),
        })
    }

    /// Replace the cached index with the given `index.yaml` content
    pub async fn load_index(&self, text: &str) -> Result<(), SourceError> {
        let charts = parse_index(text)?;
        *self.charts.write().await = Some(charts);
        Ok(())
    }

    async fn fetch_index(&self) -> Result<String, SourceError> {
        let url = format!("{}/index.yaml", self.url);
        let mut request = self.client.get(&url);
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_ref());
        } else if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?.error_for_status()?;
        Ok(response.text().await?)
    }
}

#[async_trait]
impl ChartSource for IndexChartSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn refresh(&self) -> Result<(), SourceError> {
        debug!(repo = %self.name, url = %self.url, "Downloading repository index");
        let text = self.fetch_index().await?;
        self.load_index(&text).await
    }

    async fn list_charts(&self) -> Result<BTreeMap<String, Vec<ChartVersion>>, SourceError> {
        if let Some(charts) = self.charts.read().await.as_ref() {
            return Ok(charts.clone());
        }
        self.refresh().await?;
        Ok(self.charts.read().await.clone().unwrap_or_default())
    }

    async fn locate(&self, chart: &str, version: &str) -> Result<ChartLocation, SourceError> {
        let charts = self.list_charts().await?;
        let versions = charts.get(chart).ok_or_else(|| SourceError::ChartNotFound {
            repo: self.name.clone(),
            chart: chart.to_string(),
        })?;
        let url = versions
            .iter()
            .find(|v| v.version == version)
            .and_then(|v| v.urls.first())
            .ok_or_else(|| SourceError::VersionNotFound {
                repo: self.name.clone(),
                chart: chart.to_string(),
                version: version.to_string(),
            })?;

        Ok(ChartLocation {
            locator: resolve_chart_url(&self.url, url),
            kind: LocatorKind::Http,
        })
    }
}
