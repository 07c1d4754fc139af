//! Git-backed chart source
//!
//! The repository is shallow-cloned into a local cache directory and
//! charts are read from `charts/<chart>/<version>/`.

use crate::core::repository::RepositorySpec;
use crate::repo::source::{ChartLocation, ChartSource, ChartVersion, LocatorKind, SourceError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, info};

/// Formats a failed git invocation from its stderr and stdout
fn format_git_error(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

    match (stderr.is_empty(), stdout.is_empty()) {
        (true, true) => format!(
            "git exited with code {}",
            output.status.code().unwrap_or(-1)
        ),
        (true, false) => stdout,
        (false, true) => stderr,
        (false, false) => format!("{}\n{}", stderr, stdout),
    }
}

/// Embed basic-auth credentials into an http(s) remote URL
fn remote_with_credentials(url: &str, username: Option<&str>, password: Option<&str>) -> String {
    let Some(username) = username.filter(|u| !u.is_empty()) else {
        return url.to_string();
    };
    match reqwest::Url::parse(url) {
        Ok(mut parsed) if parsed.scheme().starts_with("http") => {
            if parsed.set_username(username).is_err() || parsed.set_password(password).is_err() {
                return url.to_string();
            }
            parsed.to_string()
        }
        _ => url.to_string(),
    }
}

pub struct GitChartSource {
    name: String,
    url: String,
    branch: String,
    token: Option<String>,
    insecure: bool,
    checkout: PathBuf,
}

impl GitChartSource {
    pub fn new(name: &str, spec: &RepositorySpec, checkout: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            url: remote_with_credentials(&spec.url, spec.username.as_deref(), spec.password.as_deref()),
            branch: spec.branch().to_string(),
            token: spec.token.clone().filter(|t| !t.is_empty()),
            insecure: spec.insecure_skip_tls_verify,
            checkout: checkout.into(),
        }
    }

    /// Local checkout directory
    pub fn checkout(&self) -> &Path {
        &self.checkout
    }

    fn charts_dir(&self) -> PathBuf {
        self.checkout.join("charts")
    }

    fn is_cloned(&self) -> bool {
        self.checkout.join(".git").exists()
    }

    /// Global `-c` options carrying auth and TLS settings
    fn config_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(token) = &self.token {
            args.push("-c".to_string());
            args.push(format!("http.extraHeader=Authorization: Bearer {}", token));
        }
        if self.insecure {
            args.push("-c".to_string());
            args.push("http.sslVerify=false".to_string());
        }
        args
    }

    async fn run_git(&self, cwd: Option<&Path>, args: &[&str]) -> Result<Output, SourceError> {
        let mut command = Command::new("git");
        command.args(self.config_args()).args(args);
        command.env("GIT_TERMINAL_PROMPT", "0");
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        let output = command.output().await?;
        if !output.status.success() {
            return Err(SourceError::Git(format_git_error(&output)));
        }
        Ok(output)
    }

    async fn clone_repo(&self) -> Result<(), SourceError> {
        if let Some(parent) = self.checkout.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let target = self.checkout.to_string_lossy().to_string();
        info!(repo = %self.name, branch = %self.branch, "Cloning chart repository");
        self.run_git(
            None,
            &["clone", "--depth", "1", "--branch", &self.branch, &self.url, &target],
        )
        .await?;
        Ok(())
    }

    async fn pull(&self) -> Result<(), SourceError> {
        debug!(repo = %self.name, "Fetching chart repository");
        self.run_git(
            Some(&self.checkout),
            &["fetch", "--depth", "1", "origin", &self.branch],
        )
        .await?;
        self.run_git(Some(&self.checkout), &["reset", "--hard", "FETCH_HEAD"])
            .await?;
        Ok(())
    }
}

async fn subdirectories(dir: &Path) -> Result<Vec<String>, SourceError> {
    let mut names = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with('.') {
                names.push(name);
            }
        }
    }
    names.sort();
    Ok(names)
}

#[async_trait]
impl ChartSource for GitChartSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn refresh(&self) -> Result<(), SourceError> {
        if self.is_cloned() {
            self.pull().await
        } else {
            self.clone_repo().await
        }
    }

    async fn list_charts(&self) -> Result<BTreeMap<String, Vec<ChartVersion>>, SourceError> {
        let charts_dir = self.charts_dir();
        let mut charts = BTreeMap::new();
        for chart in subdirectories(&charts_dir).await? {
            let chart_dir = charts_dir.join(&chart);
            let versions = subdirectories(&chart_dir)
                .await?
                .into_iter()
                .map(|version| ChartVersion {
                    urls: vec![chart_dir.join(&version).to_string_lossy().to_string()],
                    name: chart.clone(),
                    version,
                    digest: None,
                })
                .collect();
            charts.insert(chart, versions);
        }
        Ok(charts)
    }

    async fn locate(&self, chart: &str, version: &str) -> Result<ChartLocation, SourceError> {
        let chart_dir = self.charts_dir().join(chart);
        if !chart_dir.is_dir() {
            return Err(SourceError::ChartNotFound {
                repo: self.name.clone(),
                chart: chart.to_string(),
            });
        }
        let version_dir = chart_dir.join(version);
        if !version_dir.is_dir() {
            return Err(SourceError::VersionNotFound {
                repo: self.name.clone(),
                chart: chart.to_string(),
                version: version.to_string(),
            });
        }
        Ok(ChartLocation {
            locator: version_dir.to_string_lossy().to_string(),
            kind: LocatorKind::File,
        })
    }
}
