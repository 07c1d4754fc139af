//! chartflow - declarative multi-step chart release pipelines
//!
//! An application lists steps; each step installs a chart (a component)
//! with values built from what earlier steps returned, waits for it to
//! become ready, and hands its outputs to the next step. Chart repositories
//! are polled so auto-updating releases follow newly published versions.

pub mod backend;
pub mod cli;
pub mod core;
pub mod error;
pub mod evaluator;
pub mod execution;
pub mod persistence;
pub mod repo;

// Re-export commonly used types
pub use crate::core::{Application, Component, ManifestSet, Operation, Repository, Settings, Step};
pub use backend::{InMemoryReleaseManager, InMemoryStore, ReleaseManager, ResourceStore};
pub use error::{PipelineError, PipelineResult};
pub use execution::{OperationReconciler, PipelineEngine, PipelineEvent, ReconcileLoop};
pub use repo::{version_greater_than, SyncEngine};
