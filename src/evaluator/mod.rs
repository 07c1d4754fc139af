//! Resource-state evaluation
//!
//! Renders templates, extracts values from live resources by path, and
//! decides whether a release is ready and what it returns to later steps.

pub mod path;
pub mod probe;
pub mod template;

pub use path::{extract_path, extract_path_bytes};
pub use probe::ResourceEvaluator;
pub use template::{format_positional, TemplateError, TemplateRenderer};
