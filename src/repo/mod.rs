//! Repository sync and update dispatch
//!
//! Chart repositories are polled for new versions; releases of operations
//! that opt into auto-update are upgraded when their chart moves.

pub mod dispatch;
pub mod git;
pub mod handle;
pub mod index;
pub mod queue;
pub mod registry;
pub mod source;
pub mod version;

pub use dispatch::{jobs_for_update, SyncEngine, SyncHandler, SyncJob};
pub use git::GitChartSource;
pub use handle::{poll_once, ChartUpdate, RepoHandle};
pub use index::{resolve_chart_url, IndexChartSource};
pub use queue::WorkQueue;
pub use registry::RepoRegistry;
pub use source::{build_source, ChartLocation, ChartSource, ChartVersion, LocatorKind, SourceError};
pub use version::{latest_version, parse_version, version_greater_than};
