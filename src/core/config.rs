//! Operator settings and manifest loading from YAML

use crate::core::application::Application;
use crate::core::component::Component;
use crate::core::document::{from_yaml, Document};
use crate::core::meta::{ObjectMeta, Resource, API_GROUP, API_VERSION};
use crate::core::operation::Operation;
use crate::core::repository::Repository;
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

/// Namespace assigned to manifests that do not name one
pub const DEFAULT_NAMESPACE: &str = "default";

/// Longest release name the release manager accepts
const MAX_RELEASE_NAME_LEN: usize = 53;

static RE_RELEASE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap());

/// Operator-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// How often repositories are polled for new chart versions
    pub repo_period_secs: u64,

    /// Number of concurrent repository sync workers
    pub max_concurrent_sync: usize,

    /// Where git repositories are cloned
    pub local_cache_path: PathBuf,

    /// Delay before re-running a pipeline halted at a step
    pub halt_delay_ms: u64,

    /// Delay before retrying a sync job whose repository or chart is missing
    pub sync_retry_delay_secs: u64,

    /// Namespace components are looked up in; the application's own
    /// namespace when unset
    pub component_namespace: Option<String>,

    /// SQLite file for reconcile history
    pub history_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        let cache = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("chartflow");
        Self {
            repo_period_secs: 30,
            max_concurrent_sync: 1,
            local_cache_path: cache,
            halt_delay_ms: 1000,
            sync_retry_delay_secs: 10,
            component_namespace: None,
            history_path: None,
        }
    }
}

impl Settings {
    /// Load settings from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse settings from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let settings: Settings = serde_yaml::from_str(yaml)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.repo_period_secs == 0 {
            anyhow::bail!("repo_period_secs must be greater than zero");
        }
        if self.max_concurrent_sync == 0 {
            anyhow::bail!("max_concurrent_sync must be at least 1");
        }
        if self.halt_delay_ms == 0 {
            anyhow::bail!("halt_delay_ms must be greater than zero");
        }
        if self.sync_retry_delay_secs == 0 {
            anyhow::bail!("sync_retry_delay_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn repo_period(&self) -> Duration {
        Duration::from_secs(self.repo_period_secs)
    }

    pub fn halt_delay(&self) -> Duration {
        Duration::from_millis(self.halt_delay_ms)
    }

    pub fn sync_retry_delay(&self) -> Duration {
        Duration::from_secs(self.sync_retry_delay_secs)
    }
}

/// Every document of a multi-document manifest stream
#[derive(Debug, Clone, Default)]
pub struct ManifestSet {
    pub applications: Vec<Application>,
    pub components: Vec<Component>,
    pub repositories: Vec<Repository>,
    pub operations: Vec<Operation>,
    /// Documents of any other kind, taken as live cluster resources
    pub resources: Vec<Document>,
}

impl ManifestSet {
    /// Load manifests from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest file {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse and validate a `---` separated manifest stream
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let set = Self::parse(yaml)?;
        set.validate()?;
        Ok(set)
    }

    /// Parse without validation
    pub fn parse(yaml: &str) -> Result<Self> {
        let own_api_version = format!("{}/{}", API_GROUP, API_VERSION);
        let mut set = ManifestSet::default();

        for (index, document) in serde_yaml::Deserializer::from_str(yaml).enumerate() {
            let value = serde_yaml::Value::deserialize(document)
                .with_context(|| format!("Invalid YAML in document {}", index + 1))?;
            if value.is_null() {
                continue;
            }

            let api_version = value.get("apiVersion").and_then(|v| v.as_str()).unwrap_or("");
            let kind = value
                .get("kind")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            if kind.is_empty() {
                anyhow::bail!("Document {} has no kind", index + 1);
            }

            if api_version != own_api_version {
                set.resources.push(from_yaml(value)?);
                continue;
            }

            match kind.as_str() {
                Application::KIND => set.applications.push(typed(value, index)?),
                Component::KIND => set.components.push(typed(value, index)?),
                Repository::KIND => set.repositories.push(typed(value, index)?),
                Operation::KIND => set.operations.push(typed(value, index)?),
                other => anyhow::bail!("Document {} has unknown kind '{}'", index + 1, other),
            }
        }

        Ok(set)
    }

    /// Validate cross-document references
    pub fn validate(&self) -> Result<()> {
        check_unique("Application", self.applications.iter().map(|a| &a.metadata))?;
        check_unique("Component", self.components.iter().map(|c| &c.metadata))?;
        check_unique("Repository", self.repositories.iter().map(|r| &r.metadata))?;
        check_unique("Operation", self.operations.iter().map(|o| &o.metadata))?;

        for component in &self.components {
            let spec = &component.spec;
            if spec.chart.name.is_empty() || spec.chart.version.is_empty() {
                anyhow::bail!(
                    "Component '{}' must declare a chart name and version",
                    component.name()
                );
            }
            if let Some(stable) = &spec.stable_status {
                if stable.value.is_some() == stable.value_json_path.is_some() {
                    anyhow::bail!(
                        "Component '{}' stableStatus must set exactly one of value or valueJsonPath",
                        component.name()
                    );
                }
            }
            if let Some(operator) = &spec.operator {
                if operator.meta_name.is_none() && operator.match_labels.is_none() {
                    anyhow::bail!(
                        "Component '{}' operator probe needs metaName or matchLabels",
                        component.name()
                    );
                }
            }
        }

        for app in &self.applications {
            self.validate_application(app)?;
        }

        Ok(())
    }

    fn validate_application(&self, app: &Application) -> Result<()> {
        let mut earlier: HashSet<String> = HashSet::new();

        for step in &app.spec.steps {
            let component = self
                .components
                .iter()
                .find(|c| c.name() == step.component_name)
                .with_context(|| {
                    format!(
                        "Application '{}' step references non-existent component '{}'",
                        app.name(),
                        step.component_name
                    )
                })?;

            let release = step.release_name(app.name(), &component.spec.chart.name);
            if !is_valid_release_name(&release) {
                anyhow::bail!(
                    "Application '{}' has invalid release name '{}'",
                    app.name(),
                    release
                );
            }

            for reference in &step.values_ref_component_release {
                if !earlier.contains(reference) {
                    anyhow::bail!(
                        "Application '{}' release '{}' references '{}' which is not an earlier step",
                        app.name(),
                        release,
                        reference
                    );
                }
            }

            if !earlier.insert(release.clone()) {
                anyhow::bail!(
                    "Application '{}' declares release '{}' twice",
                    app.name(),
                    release
                );
            }
        }

        Ok(())
    }

    pub fn application(&self, name: &str) -> Option<&Application> {
        self.applications.iter().find(|a| a.name() == name)
    }
}

fn typed<R: Resource>(value: serde_yaml::Value, index: usize) -> Result<R> {
    let mut resource: R = serde_yaml::from_value(value)
        .with_context(|| format!("Invalid {} in document {}", R::KIND, index + 1))?;
    let meta = resource.metadata_mut();
    if meta.namespace.is_empty() {
        meta.namespace = DEFAULT_NAMESPACE.to_string();
    }
    Ok(resource)
}

fn check_unique<'a>(kind: &str, metas: impl Iterator<Item = &'a ObjectMeta>) -> Result<()> {
    let mut seen = HashSet::new();
    for meta in metas {
        if meta.name.is_empty() {
            anyhow::bail!("{} without a name", kind);
        }
        if !seen.insert((meta.namespace.as_str(), meta.name.as_str())) {
            anyhow::bail!("Duplicate {} '{}/{}'", kind, meta.namespace, meta.name);
        }
    }
    Ok(())
}

/// Release names are DNS-1123 labels of at most 53 characters
pub fn is_valid_release_name(name: &str) -> bool {
    name.len() <= MAX_RELEASE_NAME_LEN && RE_RELEASE_NAME.is_match(name)
}
