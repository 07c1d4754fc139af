//! Pipeline execution: operation building, the step engine and its drivers

pub mod builder;
pub mod engine;
pub mod operation;
pub mod scheduler;

pub use builder::{values_context, OperationBuilder, APPLICATION_LABEL, COMPONENT_LABEL};
pub use engine::{EventHandler, PipelineEngine, PipelineEvent, PipelinePass};
pub use operation::{plan_release, OperationReconciler, ReleasePlan};
pub use scheduler::{LoopSummary, ReconcileLoop, DEFAULT_MAX_PASSES, READY_CONDITION};
