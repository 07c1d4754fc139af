//! Error taxonomy for pipeline reconciliation

use crate::backend::{ReleaseError, StoreError};
use crate::evaluator::TemplateError;
use crate::repo::SourceError;
use thiserror::Error;

/// Errors raised while evaluating, building or reconciling releases
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("component {name} not found in namespace {namespace}")]
    ComponentNotFound { name: String, namespace: String },

    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    #[error("template for resource name rendered empty: {template:?}")]
    EmptyResourceName { template: String },

    #[error("invalid definition: {0}")]
    InvalidDefinition(String),

    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Release(#[from] ReleaseError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    /// Errors caused by user-authored definitions. Retrying will not help
    /// until the definitions change.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            PipelineError::ComponentNotFound { .. }
                | PipelineError::Template(_)
                | PipelineError::EmptyResourceName { .. }
                | PipelineError::InvalidDefinition(_)
                | PipelineError::InvalidPath { .. }
        )
    }

    /// Not-found conditions reported by the store or the release manager
    pub fn is_not_found(&self) -> bool {
        match self {
            PipelineError::Store(e) => e.is_not_found(),
            PipelineError::Release(e) => e.is_not_found(),
            PipelineError::ComponentNotFound { .. } => true,
            _ => false,
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_classification() {
        let err = PipelineError::EmptyResourceName {
            template: "{{ Release.Missing }}".to_string(),
        };
        assert!(err.is_configuration());
        assert!(!err.is_not_found());

        let err: PipelineError = StoreError::Unavailable("connection reset".to_string()).into();
        assert!(!err.is_configuration());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_not_found_classification() {
        let err: PipelineError = StoreError::NotFound {
            kind: "Operation".to_string(),
            namespace: "default".to_string(),
            name: "redis".to_string(),
        }
        .into();
        assert!(err.is_not_found());

        let err: PipelineError = ReleaseError::NotFound {
            name: "redis".to_string(),
            namespace: "default".to_string(),
        }
        .into();
        assert!(err.is_not_found());
        assert!(!err.is_configuration());
    }
}
