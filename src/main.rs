use anyhow::{Context, Result};
use chartflow::backend::{InMemoryReleaseManager, InMemoryStore, ReleaseCall};
use chartflow::cli::commands::{
    ChartsCommand, HistoryCommand, RenderCommand, RunCommand, ValidateCommand,
};
use chartflow::cli::output::*;
use chartflow::cli::{Cli, Command};
use chartflow::core::{Document, DocumentMap, ManifestSet, Settings};
use chartflow::evaluator::TemplateRenderer;
use chartflow::execution::{values_context, OperationReconciler, PipelineEngine, ReconcileLoop};
use chartflow::persistence::{HistoryBackend, InMemoryHistory, ReconcileRecord};
use chartflow::repo::{build_source, latest_version, poll_once, SyncEngine};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    let settings = match &cli.config {
        Some(path) => Settings::from_file(path).context("Failed to load settings")?,
        None => Settings::default(),
    };

    match &cli.command {
        Command::Validate(cmd) => validate_manifests(cmd)?,
        Command::Run(cmd) => run_rollout(cmd, &settings).await?,
        Command::Render(cmd) => render_template(cmd)?,
        Command::Charts(cmd) => list_charts(cmd, &settings).await?,
        Command::History(cmd) => show_history(cmd, &settings).await?,
    }

    Ok(())
}

#[cfg(feature = "sqlite")]
async fn open_history(settings: &Settings) -> Result<Arc<dyn HistoryBackend>> {
    use chartflow::persistence::SqliteHistoryStore;

    let store = match &settings.history_path {
        Some(path) => SqliteHistoryStore::new(path).await?,
        None => SqliteHistoryStore::with_default_path().await?,
    };
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn open_history(_settings: &Settings) -> Result<Arc<dyn HistoryBackend>> {
    warn!("Built without sqlite support, history is not persisted");
    Ok(Arc::new(InMemoryHistory::new()))
}

fn validate_manifests(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating manifests...", INFO);

    match ManifestSet::from_file(&cmd.file) {
        Ok(manifests) => {
            println!("{} Manifests are valid!", CHECK);
            println!("  Applications: {}", style(manifests.applications.len()).cyan());
            println!("  Components: {}", style(manifests.components.len()).cyan());
            println!("  Repositories: {}", style(manifests.repositories.len()).cyan());
            println!("  Operations: {}", style(manifests.operations.len()).cyan());
            println!("  Other resources: {}", style(manifests.resources.len()).cyan());

            if cmd.json {
                let data = json!({
                    "applications": qualified(manifests.applications.iter().map(|a| (a.namespace(), a.name()))),
                    "components": qualified(manifests.components.iter().map(|c| (c.metadata.namespace.as_str(), c.name()))),
                    "repositories": qualified(manifests.repositories.iter().map(|r| (r.metadata.namespace.as_str(), r.name()))),
                    "operations": qualified(manifests.operations.iter().map(|o| (o.namespace(), o.release_name()))),
                    "resources": manifests.resources.len(),
                });
                println!("\n{}", serde_json::to_string_pretty(&data)?);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

fn qualified<'a>(names: impl Iterator<Item = (&'a str, &'a str)>) -> Vec<String> {
    names
        .map(|(namespace, name)| format!("{}/{}", namespace, name))
        .collect()
}

async fn run_rollout(cmd: &RunCommand, settings: &Settings) -> Result<()> {
    let manifests = ManifestSet::from_file(&cmd.file).context("Failed to load manifests")?;

    let applications: Vec<_> = match &cmd.application {
        Some(name) => vec![manifests
            .application(name)
            .with_context(|| format!("Application '{}' not found in manifests", name))?
            .clone()],
        None => manifests.applications.clone(),
    };
    if applications.is_empty() {
        println!("{} No applications to roll out", WARN);
        return Ok(());
    }

    let store = Arc::new(InMemoryStore::new());
    let loaded = store
        .load_manifests(&manifests)
        .await
        .context("Failed to load manifests into the simulated cluster")?;
    println!("{} Loaded {} manifests", INFO, style(loaded).cyan());

    let history: Arc<dyn HistoryBackend> = if cmd.no_history {
        Arc::new(InMemoryHistory::new())
    } else {
        open_history(settings).await?
    };

    let engine = Arc::new(PipelineEngine::with_settings(store.clone(), settings));
    engine.add_event_handler(|event| println!("{}", format_pipeline_event(&event)));

    let releases = Arc::new(InMemoryReleaseManager::new());
    let sync = cmd
        .apply
        .then(|| SyncEngine::new(store.clone(), releases.clone(), settings));
    let mut operations = None;
    if let Some(sync) = &sync {
        for repo in &manifests.repositories {
            sync.reconcile_repository(&repo.metadata.namespace, repo.name())
                .await
                .with_context(|| format!("Failed to register repository '{}'", repo.name()))?;
        }
        let registry = sync.registry();
        for name in registry.names() {
            if let Some(source) = registry.source(&name) {
                if let Err(e) = poll_once(source.as_ref()).await {
                    warn!(repo = %name, error = %e, "Initial repository poll failed");
                }
            }
        }
        sync.start();
        operations = Some(Arc::new(
            OperationReconciler::new(store.clone(), releases.clone(), registry)
                .with_retry_delay(settings.sync_retry_delay()),
        ));
    }

    let mut failed = Vec::new();
    for app in &applications {
        println!();
        let mut driver = ReconcileLoop::new(store.clone(), engine.clone())
            .with_history(history.clone())
            .with_max_passes(cmd.max_passes);
        if !cmd.wait {
            driver = driver.without_delays();
        }
        if let Some(operations) = &operations {
            driver = driver.with_operations(operations.clone());
        }

        match driver.run(app.namespace(), app.name()).await {
            Ok(summary) => {
                let outcome = summary
                    .outcome
                    .as_ref()
                    .map(format_outcome)
                    .unwrap_or_else(|| format_outcome_kind(chartflow::core::OutcomeKind::Failed));
                println!(
                    "{} {} after {} passes (run {})",
                    if summary.completed() { CHECK } else { CROSS },
                    outcome,
                    summary.passes,
                    style(&summary.run_id.to_string()[..8]).dim()
                );
                if !summary.completed() {
                    failed.push(app.name().to_string());
                }
            }
            Err(e) => {
                error!(application = %app.name(), error = %e, "Rollout failed");
                println!("{} {} {}", CROSS, style(app.name()).bold(), style("failed").red());
                failed.push(app.name().to_string());
            }
        }
    }

    if let Some(sync) = &sync {
        print_release_calls(&releases.calls());
        sync.shutdown().await;
    }

    if !failed.is_empty() {
        println!(
            "\n{} {} did not complete",
            CROSS,
            style(failed.join(", ")).bold()
        );
        std::process::exit(1);
    }
    Ok(())
}

fn print_release_calls(calls: &[ReleaseCall]) {
    if calls.is_empty() {
        return;
    }
    println!("\n{} Release actions:", INFO);
    for call in calls {
        let line = match call {
            ReleaseCall::Install { name, namespace, version } => {
                format!("install {}/{} {}", namespace, style(name).bold(), style(version).cyan())
            }
            ReleaseCall::Upgrade { name, namespace, version } => {
                format!("upgrade {}/{} {}", namespace, style(name).bold(), style(version).cyan())
            }
            ReleaseCall::Uninstall { name, namespace } => {
                format!("uninstall {}/{}", namespace, style(name).bold())
            }
        };
        println!("  {}", line);
    }
}

fn render_template(cmd: &RenderCommand) -> Result<()> {
    let template = std::fs::read_to_string(&cmd.template)
        .with_context(|| format!("Failed to read template {}", cmd.template))?;

    let mut parameters = match &cmd.values {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read values file {}", path))?;
            match serde_yaml::from_str::<Document>(&content)
                .with_context(|| format!("Invalid YAML in {}", path))?
            {
                Document::Object(map) => map,
                Document::Null => DocumentMap::new(),
                _ => anyhow::bail!("Values file {} must contain a mapping", path),
            }
        }
        None => DocumentMap::new(),
    };
    for (key, raw) in &cmd.set {
        let value = serde_yaml::from_str::<Document>(raw).unwrap_or_else(|_| Document::String(raw.clone()));
        parameters.insert(key.clone(), value);
    }

    let context = values_context(
        &parameters,
        &cmd.release,
        &cmd.namespace,
        &cmd.chart,
        &cmd.chart_version,
    );
    let values = TemplateRenderer::new()
        .render_values(&template, &context)
        .context("Failed to render template")?;
    print!("{}", serde_yaml::to_string(&values)?);
    Ok(())
}

async fn list_charts(cmd: &ChartsCommand, settings: &Settings) -> Result<()> {
    let manifests = ManifestSet::from_file(&cmd.file).context("Failed to load manifests")?;
    let repo = manifests
        .repositories
        .iter()
        .find(|r| r.name() == cmd.repository)
        .with_context(|| format!("Repository '{}' not found in manifests", cmd.repository))?;

    let source = build_source(repo, &settings.local_cache_path)?;
    source
        .refresh()
        .await
        .with_context(|| format!("Failed to refresh repository '{}'", repo.name()))?;
    let charts = source.list_charts().await?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&charts)?);
        return Ok(());
    }

    if charts.is_empty() {
        println!("{} No charts found in {}", INFO, style(repo.name()).bold());
        return Ok(());
    }

    println!("{} Charts in {}:", INFO, style(repo.name()).bold());
    for (name, versions) in &charts {
        let latest = latest_version(versions.iter().map(|v| v.version.as_str()));
        println!(
            "  {} {}",
            style(name).bold(),
            style(latest.as_deref().unwrap_or("-")).cyan()
        );
        if cmd.all {
            for version in versions {
                println!("    {}", style(&version.version).dim());
            }
        }
    }
    Ok(())
}

async fn show_history(cmd: &HistoryCommand, settings: &Settings) -> Result<()> {
    let store = open_history(settings).await?;

    let records: Vec<ReconcileRecord> = if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        store.list_run(run_id).await?
    } else if let Some(application) = &cmd.application {
        store
            .list_records(&cmd.namespace, application)
            .await?
            .into_iter()
            .take(cmd.limit)
            .collect()
    } else {
        let mut all = Vec::new();
        for (namespace, application) in store.list_applications().await? {
            all.extend(store.list_records(&namespace, &application).await?);
        }
        all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        all.into_iter().take(cmd.limit).collect()
    };

    if records.is_empty() {
        println!("{} No reconcile history found", INFO);
        return Ok(());
    }

    if cmd.json {
        let data = json!({ "records": records });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{} Reconcile history (showing {}):", INFO, records.len());
        for record in &records {
            println!("  {}", format_record(record));
        }
    }

    Ok(())
}
