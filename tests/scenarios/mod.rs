//! Scenario-based tests for chartflow

mod readiness_returns;
mod repo_sync;
mod two_step_rollout;
