//! Reconcile outcome models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// What a reconcile pass asks of its scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Nothing left to do until something changes
    Done,
    /// Run again after the delay, without rate limiting
    RequeueAfter(Duration),
}

/// Why a pipeline pass stopped at a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HaltReason {
    /// The step's operation did not exist and was created
    OperationCreated,
    /// The step's operation differed from the built one and was updated
    OperationUpdated,
    /// The step's release is applied but not yet ready
    NotReady,
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HaltReason::OperationCreated => "operation created",
            HaltReason::OperationUpdated => "operation updated",
            HaltReason::NotReady => "release not ready",
        };
        f.write_str(s)
    }
}

/// Result classification of one pipeline pass
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// The application no longer exists
    Missing,
    /// The application was being deleted and its finalizer has been released
    Finalized,
    /// Every step is applied and ready
    Completed,
    /// The pass stopped at a step that needs another pass later
    Halted {
        step: String,
        reason: HaltReason,
        requeue_after: Duration,
    },
    /// A definition problem stopped the pass; retrying will not help
    Stopped {
        step: Option<String>,
        reason: String,
    },
}

impl ReconcileOutcome {
    /// Delay before the next pass, if one is wanted
    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            ReconcileOutcome::Halted { requeue_after, .. } => Some(*requeue_after),
            _ => None,
        }
    }

    pub fn action(&self) -> ReconcileAction {
        match self.requeue_after() {
            Some(delay) => ReconcileAction::RequeueAfter(delay),
            None => ReconcileAction::Done,
        }
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            ReconcileOutcome::Missing => OutcomeKind::Missing,
            ReconcileOutcome::Finalized => OutcomeKind::Finalized,
            ReconcileOutcome::Completed => OutcomeKind::Completed,
            ReconcileOutcome::Halted { .. } => OutcomeKind::Halted,
            ReconcileOutcome::Stopped { .. } => OutcomeKind::Stopped,
        }
    }

    /// The step the pass ended on, if any
    pub fn step(&self) -> Option<&str> {
        match self {
            ReconcileOutcome::Halted { step, .. } => Some(step),
            ReconcileOutcome::Stopped { step, .. } => step.as_deref(),
            _ => None,
        }
    }
}

/// Flat outcome label used for history records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeKind {
    Missing,
    Finalized,
    Completed,
    Halted,
    Stopped,
    /// The pass returned an error and will be retried with backoff
    Failed,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Missing => "Missing",
            OutcomeKind::Finalized => "Finalized",
            OutcomeKind::Completed => "Completed",
            OutcomeKind::Halted => "Halted",
            OutcomeKind::Stopped => "Stopped",
            OutcomeKind::Failed => "Failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Missing" => Some(OutcomeKind::Missing),
            "Finalized" => Some(OutcomeKind::Finalized),
            "Completed" => Some(OutcomeKind::Completed),
            "Halted" => Some(OutcomeKind::Halted),
            "Stopped" => Some(OutcomeKind::Stopped),
            "Failed" => Some(OutcomeKind::Failed),
            _ => None,
        }
    }

    /// Whether no further pass is expected
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OutcomeKind::Missing | OutcomeKind::Finalized | OutcomeKind::Completed | OutcomeKind::Stopped
        )
    }
}

/// A status condition recorded on a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn new(
        condition_type: impl Into<String>,
        status: bool,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            condition_type: condition_type.into(),
            status: if status { "True" } else { "False" }.to_string(),
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

/// Replace the condition of the same type, keeping the transition time when
/// the status did not change
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions
        .iter_mut()
        .find(|c| c.condition_type == condition.condition_type)
    {
        Some(existing) => {
            let transition = if existing.status == condition.status {
                existing.last_transition_time
            } else {
                condition.last_transition_time
            };
            *existing = Condition {
                last_transition_time: transition,
                ..condition
            };
        }
        None => conditions.push(condition),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_action() {
        let halted = ReconcileOutcome::Halted {
            step: "cache".to_string(),
            reason: HaltReason::NotReady,
            requeue_after: Duration::from_secs(1),
        };
        assert_eq!(halted.action(), ReconcileAction::RequeueAfter(Duration::from_secs(1)));
        assert_eq!(halted.step(), Some("cache"));
        assert!(!halted.kind().is_terminal());

        assert_eq!(ReconcileOutcome::Completed.action(), ReconcileAction::Done);
        assert!(ReconcileOutcome::Completed.kind().is_terminal());
    }

    #[test]
    fn test_outcome_kind_parse() {
        for kind in [OutcomeKind::Completed, OutcomeKind::Halted, OutcomeKind::Failed] {
            assert_eq!(OutcomeKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(OutcomeKind::parse("bogus"), None);
    }

    #[test]
    fn test_set_condition_keeps_transition_time() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, Condition::new("Ready", false, "Waiting", ""));
        let first = conditions[0].last_transition_time;

        set_condition(&mut conditions, Condition::new("Ready", false, "StillWaiting", ""));
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, first);
        assert_eq!(conditions[0].reason, "StillWaiting");

        set_condition(&mut conditions, Condition::new("Ready", true, "Done", ""));
        assert!(conditions[0].is_true());
    }
}
