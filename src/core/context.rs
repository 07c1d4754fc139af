//! Pipeline context - values flowing between steps and template bindings

use crate::core::document::{shallow_merge, Document, DocumentMap};
use crate::core::operation::Operation;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

/// Values returned by completed steps, keyed by release name.
///
/// Rebuilt from scratch on every pass: only steps that are ready during
/// the current pass contribute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineValues {
    values: BTreeMap<String, DocumentMap>,
}

impl PipelineValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the values a release returned
    pub fn record(&mut self, release: impl Into<String>, values: DocumentMap) {
        self.values.insert(release.into(), values);
    }

    pub fn get(&self, release: &str) -> Option<&DocumentMap> {
        self.values.get(release)
    }

    /// Overlay the values of `refs` onto `base`, in list order.
    /// Unknown releases contribute nothing.
    pub fn merged(&self, base: &DocumentMap, refs: &[String]) -> DocumentMap {
        let mut merged = base.clone();
        for release in refs {
            if let Some(values) = self.values.get(release) {
                shallow_merge(&mut merged, values);
            }
        }
        merged
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DocumentMap)> {
        self.values.iter()
    }

    pub fn into_inner(self) -> BTreeMap<String, DocumentMap> {
        self.values
    }
}

/// Release identity bound into readiness and return-value templates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseContext {
    pub release_name: String,
    pub namespace: String,
    pub chart_name: String,
    pub chart_version: String,
}

impl ReleaseContext {
    pub fn from_operation(operation: &Operation) -> Self {
        Self {
            release_name: operation.metadata.name.clone(),
            namespace: operation.metadata.namespace.clone(),
            chart_name: operation.spec.chart_name.clone(),
            chart_version: operation.spec.chart_version.clone(),
        }
    }

    /// `{Release: {Name, Namespace}, Chart: {Name, Version}}`
    pub fn to_document(&self) -> Document {
        json!({
            "Release": {
                "Name": self.release_name,
                "Namespace": self.namespace,
            },
            "Chart": {
                "Name": self.chart_name,
                "Version": self.chart_version,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::operation::OperationSpec;

    fn map(value: Document) -> DocumentMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_merged_order_and_missing_refs() {
        let mut values = PipelineValues::new();
        values.record("db", map(json!({"host": "db.svc", "port": 5432})));
        values.record("cache", map(json!({"host": "cache.svc"})));

        let refs = vec!["db".to_string(), "missing".to_string(), "cache".to_string()];
        let merged = values.merged(&DocumentMap::new(), &refs);

        assert_eq!(merged["host"], json!("cache.svc"));
        assert_eq!(merged["port"], json!(5432));
    }

    #[test]
    fn test_merged_overrides_base() {
        let mut values = PipelineValues::new();
        values.record("db", map(json!({"replicas": 3})));

        let base = map(json!({"replicas": 1, "tier": "web"}));
        let merged = values.merged(&base, &["db".to_string()]);

        assert_eq!(merged["replicas"], json!(3));
        assert_eq!(merged["tier"], json!("web"));
    }

    #[test]
    fn test_release_context_document() {
        let op = Operation::new(
            "cache",
            "prod",
            OperationSpec {
                chart_name: "redis".to_string(),
                chart_version: "17.0.1".to_string(),
                ..Default::default()
            },
        );
        let doc = ReleaseContext::from_operation(&op).to_document();
        assert_eq!(doc["Release"]["Name"], json!("cache"));
        assert_eq!(doc["Release"]["Namespace"], json!("prod"));
        assert_eq!(doc["Chart"]["Version"], json!("17.0.1"));
    }
}
