//! Workflow run data model.
//!
//! A `WorkflowRun` is one execution of the configured step chain. Its status
//! only moves forward:
//!
//! ```text
//! Pending → Running → Succeeded | Failed
//! ```
//!
//! Terminal statuses are final; any other move is rejected with
//! `StepgateError::InvalidTransition` and leaves the run untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{Result, StepgateError};

// ---------------------------------------------------------------------------
// RunState / RunStatus
// ---------------------------------------------------------------------------

/// Status without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Pending => "PENDING",
            RunState::Running => "RUNNING",
            RunState::Succeeded => "SUCCEEDED",
            RunState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed)
    }

    fn can_become(self, next: RunState) -> bool {
        matches!(
            (self, next),
            (RunState::Pending, RunState::Running)
                | (RunState::Running, RunState::Succeeded)
                | (RunState::Running, RunState::Failed)
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    /// Output of the last step.
    Succeeded { result: serde_json::Value },
    Failed { error: String },
}

impl RunStatus {
    pub fn state(&self) -> RunState {
        match self {
            RunStatus::Pending => RunState::Pending,
            RunStatus::Running => RunState::Running,
            RunStatus::Succeeded { .. } => RunState::Succeeded,
            RunStatus::Failed { .. } => RunState::Failed,
        }
    }
}

/// One entry in a run's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub state: RunState,
    pub at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// WorkflowRun
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: Uuid,
    pub input: serde_json::Value,
    /// Label of the execution role the run executed under.
    pub executed_as: String,
    pub created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    status: RunStatus,
    /// Step invocations performed, retries included.
    attempts: u32,
    history: Vec<Transition>,
}

impl WorkflowRun {
    /// A fresh run in `Pending`.
    pub fn new(input: serde_json::Value, executed_as: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            input,
            executed_as: executed_as.into(),
            created_at: now,
            updated_at: now,
            status: RunStatus::Pending,
            attempts: 0,
            history: vec![Transition {
                state: RunState::Pending,
                at: now,
            }],
        }
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    pub fn state(&self) -> RunState {
        self.status.state()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    pub fn result(&self) -> Option<&serde_json::Value> {
        match &self.status {
            RunStatus::Succeeded { result } => Some(result),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.status {
            RunStatus::Failed { error } => Some(error),
            _ => None,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        self.transition(RunStatus::Running)
    }

    pub fn succeed(&mut self, result: serde_json::Value) -> Result<()> {
        self.transition(RunStatus::Succeeded { result })
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(RunStatus::Failed {
            error: error.into(),
        })
    }

    /// Force a run that can no longer make progress to `Failed`, from either
    /// `Pending` or `Running`. Terminal runs are rejected like any other
    /// invalid transition.
    pub(crate) fn abandon(&mut self, error: impl Into<String>) -> Result<()> {
        if self.state().is_terminal() {
            return Err(StepgateError::InvalidTransition {
                from: self.state().to_string(),
                to: RunState::Failed.to_string(),
            });
        }
        self.apply(RunStatus::Failed {
            error: error.into(),
        });
        Ok(())
    }

    pub(crate) fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    fn transition(&mut self, next: RunStatus) -> Result<()> {
        let from = self.state();
        let to = next.state();
        if !from.can_become(to) {
            return Err(StepgateError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        self.apply(next);
        Ok(())
    }

    fn apply(&mut self, next: RunStatus) {
        let now = Utc::now();
        let state = next.state();
        self.status = next;
        self.updated_at = now;
        self.history.push(Transition { state, at: now });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn states(run: &WorkflowRun) -> Vec<RunState> {
        run.history().iter().map(|t| t.state).collect()
    }

    #[test]
    fn new_run_is_pending() {
        let run = WorkflowRun::new(json!({ "input": "hello" }), "managed");
        assert_eq!(run.state(), RunState::Pending);
        assert_eq!(states(&run), vec![RunState::Pending]);
        assert_eq!(run.attempts(), 0);
    }

    #[test]
    fn success_path_records_each_state_once() {
        let mut run = WorkflowRun::new(json!(null), "managed");
        run.start().unwrap();
        run.succeed(json!({ "file": "log-x.json" })).unwrap();
        assert_eq!(
            states(&run),
            vec![RunState::Pending, RunState::Running, RunState::Succeeded]
        );
        assert_eq!(run.result(), Some(&json!({ "file": "log-x.json" })));
        assert_eq!(run.error(), None);
    }

    #[test]
    fn failure_path_stores_error() {
        let mut run = WorkflowRun::new(json!(null), "managed");
        run.start().unwrap();
        run.fail("disk full").unwrap();
        assert_eq!(run.state(), RunState::Failed);
        assert_eq!(run.error(), Some("disk full"));
    }

    #[test]
    fn terminal_states_are_final() {
        let mut ok = WorkflowRun::new(json!(null), "managed");
        ok.start().unwrap();
        ok.succeed(json!(1)).unwrap();
        let before = ok.clone();
        assert!(ok.start().is_err());
        assert!(ok.fail("late").is_err());
        assert!(ok.succeed(json!(2)).is_err());
        assert_eq!(ok, before);

        let mut failed = WorkflowRun::new(json!(null), "managed");
        failed.start().unwrap();
        failed.fail("boom").unwrap();
        assert!(failed.start().is_err());
        assert!(failed.succeed(json!(1)).is_err());
        assert_eq!(failed.error(), Some("boom"));
    }

    #[test]
    fn pending_cannot_skip_running() {
        let mut run = WorkflowRun::new(json!(null), "managed");
        let err = run.succeed(json!(1)).unwrap_err();
        match err {
            StepgateError::InvalidTransition { from, to } => {
                assert_eq!(from, "PENDING");
                assert_eq!(to, "SUCCEEDED");
            }
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
        assert_eq!(run.state(), RunState::Pending);
    }

    #[test]
    fn running_cannot_restart() {
        let mut run = WorkflowRun::new(json!(null), "managed");
        run.start().unwrap();
        assert!(run.start().is_err());
    }

    #[test]
    fn abandon_fails_pending_and_running_runs() {
        let mut pending = WorkflowRun::new(json!(null), "managed");
        pending.abandon("interrupted by restart").unwrap();
        assert_eq!(states(&pending), vec![RunState::Pending, RunState::Failed]);
        assert_eq!(pending.error(), Some("interrupted by restart"));

        let mut running = WorkflowRun::new(json!(null), "managed");
        running.start().unwrap();
        running.abandon("interrupted by restart").unwrap();
        assert_eq!(running.state(), RunState::Failed);
    }

    #[test]
    fn abandon_leaves_terminal_runs_untouched() {
        let mut done = WorkflowRun::new(json!(null), "managed");
        done.start().unwrap();
        done.succeed(json!(1)).unwrap();
        let before = done.clone();
        assert!(matches!(
            done.abandon("late").unwrap_err(),
            StepgateError::InvalidTransition { .. }
        ));
        assert_eq!(done, before);
    }

    #[test]
    fn serializes_with_tagged_status() {
        let mut run = WorkflowRun::new(json!({ "a": 1 }), "managed");
        run.start().unwrap();
        run.fail("nope").unwrap();
        let value = serde_json::to_value(&run).unwrap();
        assert_eq!(value["status"]["type"], "failed");
        assert_eq!(value["status"]["error"], "nope");
        assert_eq!(value["history"][2]["state"], "FAILED");
        let back: WorkflowRun = serde_json::from_value(value).unwrap();
        assert_eq!(back, run);
    }
}
