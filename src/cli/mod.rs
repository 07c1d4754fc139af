//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{ChartsCommand, HistoryCommand, RenderCommand, RunCommand, ValidateCommand};
use std::ffi::OsString;

/// Declarative multi-step chart release pipelines
#[derive(Debug, Parser, Clone)]
#[command(name = "chartflow")]
#[command(version)]
#[command(about = "Declarative multi-step chart release pipelines", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to operator settings file
    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Validate a manifest file
    Validate(ValidateCommand),

    /// Roll out applications from a manifest file against a simulated cluster
    Run(RunCommand),

    /// Render a values template against a values file
    Render(RenderCommand),

    /// List the latest chart versions of a repository
    Charts(ChartsCommand),

    /// Show reconcile history
    History(HistoryCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
