//! CLI command definitions

use clap::Args;

/// Validate a manifest file
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to manifest YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Roll out applications
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to manifest YAML file
    #[arg(short, long)]
    pub file: String,

    /// Application to roll out (all applications when omitted)
    #[arg(short, long)]
    pub application: Option<String>,

    /// Passes per application before giving up
    #[arg(long, default_value_t = 50)]
    pub max_passes: u32,

    /// Register the manifest's repositories and install releases through
    /// the simulated release manager
    #[arg(long)]
    pub apply: bool,

    /// Sleep for requeue delays between passes
    #[arg(long)]
    pub wait: bool,

    /// Don't save passes to history
    #[arg(long)]
    pub no_history: bool,
}

/// Render a values template
#[derive(Debug, Args, Clone)]
pub struct RenderCommand {
    /// Path to the template file
    #[arg(short, long)]
    pub template: String,

    /// YAML file bound as `parameter`
    #[arg(long)]
    pub values: Option<String>,

    /// Value overrides (key=value), applied on top of the values file
    #[arg(long, value_parser = parse_key_value)]
    pub set: Vec<(String, String)>,

    /// Release name bound as `Release.Name`
    #[arg(long, default_value = "release")]
    pub release: String,

    /// Namespace bound as `Release.Namespace`
    #[arg(long, default_value = "default")]
    pub namespace: String,

    /// Chart name bound as `Chart.Name`
    #[arg(long, default_value = "chart")]
    pub chart: String,

    /// Chart version bound as `Chart.Version`
    #[arg(long, default_value = "0.1.0")]
    pub chart_version: String,
}

/// List chart versions of a repository
#[derive(Debug, Args, Clone)]
pub struct ChartsCommand {
    /// Manifest file declaring the repository
    #[arg(short, long)]
    pub file: String,

    /// Repository name
    #[arg(short, long)]
    pub repository: String,

    /// Show every version, not only the latest
    #[arg(long)]
    pub all: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show reconcile history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Application name to filter by
    #[arg(short, long)]
    pub application: Option<String>,

    /// Namespace of the application
    #[arg(short, long, default_value = "default")]
    pub namespace: String,

    /// Number of recent passes to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show the passes of one run
    #[arg(long)]
    pub run_id: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("a=b=c").unwrap(),
            ("a".to_string(), "b=c".to_string())
        );
        assert_eq!(parse_key_value("empty=").unwrap().1, "");
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }
}
