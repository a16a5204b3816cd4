//! Run orchestration.
//!
//! The `Orchestrator` owns an ordered chain of [`Step`]s. `start_run` creates
//! a [`WorkflowRun`], drives it `Pending → Running`, feeds each step the
//! previous step's output, and finishes the run as `Succeeded` with the last
//! output or `Failed` with the first unrecovered error. Every snapshot is
//! recorded in the [`RunLedger`].

pub mod ledger;
pub mod run;

pub use ledger::RunLedger;
pub use run::{RunState, RunStatus, Transition, WorkflowRun};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::ExecutionRole;
use crate::error::{Result, StepError, StepgateError};

/// One unit of orchestrated work.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(
        &self,
        input: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, StepError>;
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// How often a failing step is re-invoked.
///
/// `max_attempts` counts the first invocation, so the default of 1 means no
/// retry. Only errors for which [`StepError::retryable`] holds are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before the first retry; doubles for each later one.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.backoff.saturating_mul(1u32 << exp)
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

fn transition<F>(run: &mut WorkflowRun, f: F) -> Result<()>
where
    F: FnOnce(&mut WorkflowRun) -> Result<()>,
{
    let from = run.state();
    f(run)?;
    info!(run_id = %run.id, from = %from, to = %run.state(), "run transition");
    Ok(())
}

pub struct Orchestrator {
    steps: Vec<Arc<dyn Step>>,
    retry: RetryPolicy,
    role: ExecutionRole,
    ledger: Arc<RunLedger>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("steps", &self.steps.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("retry", &self.retry)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        steps: Vec<Arc<dyn Step>>,
        retry: RetryPolicy,
        role: ExecutionRole,
        ledger: Arc<RunLedger>,
    ) -> Self {
        Self {
            steps,
            retry,
            role,
            ledger,
        }
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Execute the chain for `input` and return the finished run.
    ///
    /// Step failures are not errors here: they yield a run in `Failed`.
    /// `Err` means the run could not be recorded. By then the steps may have
    /// written to the sink, so the unrecorded outcome is logged at `error`.
    pub async fn start_run(&self, input: serde_json::Value) -> Result<WorkflowRun> {
        let mut run = WorkflowRun::new(input, self.role.label());
        self.persist(&run).await?;

        self.advance(&mut run, |r| r.start()).await?;

        let mut payload = run.input.clone();
        for step in &self.steps {
            match self.invoke_with_retry(step.as_ref(), payload, &mut run).await {
                Ok(output) => payload = output,
                Err(e) => {
                    warn!(run_id = %run.id, step = step.name(), error = %e, "step failed");
                    let message = format!("step '{}' failed: {e}", step.name());
                    self.finish(&mut run, |r| r.fail(message)).await?;
                    return Ok(run);
                }
            }
        }

        self.finish(&mut run, |r| r.succeed(payload)).await?;
        Ok(run)
    }

    /// Blocking form of [`start_run`](Self::start_run) for synchronous callers.
    ///
    /// Must not be called from within an async context on `handle`.
    pub fn start_run_blocking(
        &self,
        handle: &tokio::runtime::Handle,
        input: serde_json::Value,
    ) -> Result<WorkflowRun> {
        handle.block_on(self.start_run(input))
    }

    pub fn get_run(&self, id: Uuid) -> Result<WorkflowRun> {
        self.ledger.get(id)
    }

    pub fn list_runs(&self) -> Result<Vec<WorkflowRun>> {
        self.ledger.list_all()
    }

    async fn invoke_with_retry(
        &self,
        step: &dyn Step,
        input: serde_json::Value,
        run: &mut WorkflowRun,
    ) -> std::result::Result<serde_json::Value, StepError> {
        let mut attempt = 1;
        loop {
            run.record_attempt();
            match step.invoke(input.clone()).await {
                Ok(output) => return Ok(output),
                Err(e) if e.retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        run_id = %run.id,
                        step = step.name(),
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "step attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn advance<F>(&self, run: &mut WorkflowRun, f: F) -> Result<()>
    where
        F: FnOnce(&mut WorkflowRun) -> Result<()>,
    {
        transition(run, f)?;
        self.persist(run).await
    }

    /// Terminal transition. The steps have already run, so a failed ledger
    /// write is retried once and then reported with the outcome it lost.
    async fn finish<F>(&self, run: &mut WorkflowRun, f: F) -> Result<()>
    where
        F: FnOnce(&mut WorkflowRun) -> Result<()>,
    {
        transition(run, f)?;
        let Err(first) = self.persist(run).await else {
            return Ok(());
        };
        warn!(run_id = %run.id, error = %first, "recording finished run failed, retrying");
        if let Err(e) = self.persist(run).await {
            error!(
                run_id = %run.id,
                state = %run.state(),
                status = ?run.status(),
                attempts = run.attempts(),
                error = %e,
                "finished run could not be recorded"
            );
            return Err(e);
        }
        Ok(())
    }

    async fn persist(&self, run: &WorkflowRun) -> Result<()> {
        let ledger = Arc::clone(&self.ledger);
        let snapshot = run.clone();
        tokio::task::spawn_blocking(move || ledger.record(&snapshot))
            .await
            .map_err(|e| StepgateError::Ledger(e.to_string()))?
    }
}
