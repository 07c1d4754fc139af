//! Core domain models
//!
//! Applications, components, operations and repositories as stored
//! resources, plus the values and outcomes that flow through a reconcile pass.

pub mod application;
pub mod component;
pub mod config;
pub mod context;
pub mod document;
pub mod meta;
pub mod operation;
pub mod repository;
pub mod state;

pub use application::*;
pub use component::*;
pub use config::{ManifestSet, Settings, DEFAULT_NAMESPACE};
pub use context::*;
pub use document::{Document, DocumentMap};
pub use meta::{labels_match, LabelSelector, ObjectMeta, Resource, ResourceKind, FINALIZER};
pub use operation::*;
pub use repository::*;
pub use state::*;
