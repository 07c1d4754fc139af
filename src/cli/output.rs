//! CLI output formatting

use crate::core::state::{OutcomeKind, ReconcileOutcome};
use crate::execution::PipelineEvent;
use crate::persistence::ReconcileRecord;
use console::Emoji;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Format an outcome kind for display
pub fn format_outcome_kind(kind: OutcomeKind) -> String {
    match kind {
        OutcomeKind::Completed => style("COMPLETED").green().to_string(),
        OutcomeKind::Halted => style("HALTED").yellow().to_string(),
        OutcomeKind::Stopped => style("STOPPED").red().to_string(),
        OutcomeKind::Failed => style("FAILED").red().to_string(),
        OutcomeKind::Finalized => style("FINALIZED").blue().to_string(),
        OutcomeKind::Missing => style("MISSING").dim().to_string(),
    }
}

/// One-line description of a pass outcome
pub fn format_outcome(outcome: &ReconcileOutcome) -> String {
    match outcome {
        ReconcileOutcome::Halted {
            step,
            reason,
            requeue_after,
        } => format!(
            "{} at {}: {} (requeue in {})",
            format_outcome_kind(OutcomeKind::Halted),
            style(step).cyan(),
            reason,
            style(format_duration(*requeue_after)).dim()
        ),
        ReconcileOutcome::Stopped { step, reason } => match step {
            Some(step) => format!(
                "{} at {}: {}",
                format_outcome_kind(OutcomeKind::Stopped),
                style(step).cyan(),
                style(reason).red()
            ),
            None => format!("{}: {}", format_outcome_kind(OutcomeKind::Stopped), style(reason).red()),
        },
        other => format_outcome_kind(other.kind()),
    }
}

/// Format a history record for display
pub fn format_record(record: &ReconcileRecord) -> String {
    let icon = match record.outcome {
        OutcomeKind::Completed | OutcomeKind::Finalized => CHECK,
        OutcomeKind::Stopped | OutcomeKind::Failed => CROSS,
        OutcomeKind::Halted => SPINNER,
        OutcomeKind::Missing => INFO,
    };

    let mut line = format!(
        "{} {} #{} - {}/{} - {} ({}/{}) - {}",
        icon,
        style(&record.run_id.to_string()[..8]).dim(),
        record.pass,
        record.namespace,
        style(&record.application).bold(),
        format_outcome_kind(record.outcome),
        record.completed_steps,
        record.total_steps,
        style(record.started_at.format("%Y-%m-%d %H:%M:%S").to_string()).dim()
    );
    if let Some(step) = &record.step {
        line.push_str(&format!(" [{}]", style(step).cyan()));
    }
    if let Some(message) = &record.message {
        line.push_str(&format!(" {}", style(message).dim()));
    }
    line
}

/// Format a pipeline event for display
pub fn format_pipeline_event(event: &PipelineEvent) -> String {
    match event {
        PipelineEvent::PassStarted {
            application,
            namespace,
        } => format!(
            "{} Reconciling {}/{}",
            ROCKET,
            namespace,
            style(application).bold()
        ),
        PipelineEvent::StepSkipped { release, reason } => {
            format!("{} {} skipped ({})", INFO, style(release).dim(), reason)
        }
        PipelineEvent::OperationCreated { release } => {
            format!("{} {} operation created", SPINNER, style(release).cyan())
        }
        PipelineEvent::OperationUpdated { release } => {
            format!("{} {} operation updated", SPINNER, style(release).cyan())
        }
        PipelineEvent::StepNotReady { release } => {
            format!("{} {} waiting for readiness", SPINNER, style(release).yellow())
        }
        PipelineEvent::StepCompleted { release, values } => {
            if values.is_empty() {
                format!("{} {}", CHECK, style(release).green())
            } else {
                let keys: Vec<&str> = values.keys().map(String::as_str).collect();
                format!(
                    "{} {} → {}",
                    CHECK,
                    style(release).green(),
                    style(keys.join(", ")).dim()
                )
            }
        }
        PipelineEvent::PipelineCompleted { application } => format!(
            "{} {} completed {}",
            CHECK,
            style(application).bold(),
            style("successfully").green()
        ),
        PipelineEvent::PipelineStopped {
            application,
            step,
            reason,
        } => format!(
            "{} {} stopped{}: {}",
            CROSS,
            style(application).bold(),
            step.as_deref()
                .map(|s| format!(" at {}", style(s).cyan()))
                .unwrap_or_default(),
            style(reason).red()
        ),
        PipelineEvent::PipelineFinalized { application } => {
            format!("{} {} finalized", INFO, style(application).bold())
        }
    }
}

pub fn format_duration(duration: std::time::Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        return format!("{}ms", millis);
    }
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
