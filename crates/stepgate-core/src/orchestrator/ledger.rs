//! Persistent record of workflow runs using redb.
//!
//! # Table design
//!
//! A single `RUNS` table uses a 24-byte composite key:
//! ```text
//! [ created_at_ms: u64 big-endian (8 bytes) | uuid: 16 bytes ]
//! ```
//!
//! Big-endian timestamps in the high bytes make key order creation order.
//! Every snapshot of a run overwrites the previous one under the same key.
//!
//! A second table, `RUN_IDS`, maps the 16 uuid bytes to that composite key so
//! a lookup by id is a point read. Both tables change in one transaction.

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use uuid::Uuid;

use crate::error::{Result, StepgateError};

use super::run::{RunState, WorkflowRun};

/// Key: 24-byte composite (created_at_ms big-endian ++ uuid bytes)
/// Value: JSON-encoded WorkflowRun
const RUNS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("runs");

/// Key: uuid bytes
/// Value: the run's 24-byte `RUNS` key
const RUN_IDS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("run_ids");

fn run_key(ts: DateTime<Utc>, id: Uuid) -> [u8; 24] {
    let mut key = [0u8; 24];
    let ms = u64::try_from(ts.timestamp_millis()).unwrap_or(0);
    key[..8].copy_from_slice(&ms.to_be_bytes());
    key[8..].copy_from_slice(id.as_bytes());
    key
}

fn ledger_err<E: std::fmt::Display>(e: E) -> StepgateError {
    StepgateError::Ledger(e.to_string())
}

pub struct RunLedger {
    db: Database,
    #[cfg(test)]
    terminal_failures: std::sync::atomic::AtomicU32,
}

impl std::fmt::Debug for RunLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLedger").finish_non_exhaustive()
    }
}

impl RunLedger {
    /// Open or create the redb database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(ledger_err)?;
        Self::init(db)
    }

    /// A ledger that lives only as long as the process.
    pub fn in_memory() -> Result<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(ledger_err)?;
        Self::init(db)
    }

    fn init(db: Database) -> Result<Self> {
        // Ensure the table exists before any reads
        let wt = db.begin_write().map_err(ledger_err)?;
        wt.open_table(RUNS).map_err(ledger_err)?;
        wt.open_table(RUN_IDS).map_err(ledger_err)?;
        wt.commit().map_err(ledger_err)?;
        Ok(Self {
            db,
            #[cfg(test)]
            terminal_failures: std::sync::atomic::AtomicU32::new(0),
        })
    }

    /// Make the next `n` writes of a terminal snapshot fail.
    #[cfg(test)]
    pub(crate) fn fail_terminal_records(&self, n: u32) {
        use std::sync::atomic::Ordering;
        self.terminal_failures.store(n, Ordering::SeqCst);
    }

    /// Insert or replace the snapshot of `run`.
    pub fn record(&self, run: &WorkflowRun) -> Result<()> {
        #[cfg(test)]
        if run.state().is_terminal() {
            use std::sync::atomic::Ordering;
            let injected = self
                .terminal_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if injected {
                return Err(StepgateError::Ledger("injected write failure".into()));
            }
        }
        let key = run_key(run.created_at, run.id);
        let value = serde_json::to_vec(run)?;
        let wt = self.db.begin_write().map_err(ledger_err)?;
        {
            let mut table = wt.open_table(RUNS).map_err(ledger_err)?;
            table
                .insert(key.as_slice(), value.as_slice())
                .map_err(ledger_err)?;
            let mut ids = wt.open_table(RUN_IDS).map_err(ledger_err)?;
            ids.insert(run.id.as_bytes().as_slice(), key.as_slice())
                .map_err(ledger_err)?;
        }
        wt.commit().map_err(ledger_err)?;
        Ok(())
    }

    /// Point lookup through the id index; decodes only the matching run.
    pub fn get(&self, id: Uuid) -> Result<WorkflowRun> {
        let not_found = || StepgateError::RunNotFound(id.to_string());
        let rt = self.db.begin_read().map_err(ledger_err)?;
        let ids = rt.open_table(RUN_IDS).map_err(ledger_err)?;
        let key = ids
            .get(id.as_bytes().as_slice())
            .map_err(ledger_err)?
            .ok_or_else(not_found)?
            .value()
            .to_vec();

        let runs = rt.open_table(RUNS).map_err(ledger_err)?;
        let raw = runs
            .get(key.as_slice())
            .map_err(ledger_err)?
            .ok_or_else(not_found)?;
        Ok(serde_json::from_slice(raw.value())?)
    }

    /// All runs, newest first.
    pub fn list_all(&self) -> Result<Vec<WorkflowRun>> {
        let rt = self.db.begin_read().map_err(ledger_err)?;
        let table = rt.open_table(RUNS).map_err(ledger_err)?;

        let mut result = Vec::new();
        for entry in table.iter().map_err(ledger_err)? {
            let (_, v) = entry.map_err(ledger_err)?;
            let run: WorkflowRun = serde_json::from_slice(v.value())?;
            result.push(run);
        }
        result.reverse();
        Ok(result)
    }

    /// Fail every run still `Pending` or `Running`.
    ///
    /// Runs execute inside the process that holds the ledger, and redb locks
    /// the file to one process, so a non-terminal run found at open belongs
    /// to a previous process and can never finish. Returns the number of runs
    /// failed.
    pub fn startup_recovery(&self) -> Result<u32> {
        let mut count = 0u32;
        for mut run in self.list_all()? {
            if !run.state().is_terminal() {
                run.abandon("interrupted by restart")?;
                self.record(&run)?;
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, RunLedger) {
        let dir = TempDir::new().unwrap();
        let ledger = RunLedger::open(&dir.path().join("runs.redb")).unwrap();
        (dir, ledger)
    }

    #[test]
    fn record_then_get_returns_latest_snapshot() {
        let (_dir, ledger) = open_tmp();
        let mut run = WorkflowRun::new(json!({ "input": "hello" }), "managed");
        ledger.record(&run).unwrap();
        run.start().unwrap();
        ledger.record(&run).unwrap();

        let stored = ledger.get(run.id).unwrap();
        assert_eq!(stored.state(), RunState::Running);
        assert_eq!(ledger.list_all().unwrap().len(), 1);
    }

    #[test]
    fn unknown_id_is_not_found() {
        let ledger = RunLedger::in_memory().unwrap();
        assert!(matches!(
            ledger.get(Uuid::new_v4()).unwrap_err(),
            StepgateError::RunNotFound(_)
        ));
    }

    #[test]
    fn list_all_is_newest_first() {
        let ledger = RunLedger::in_memory().unwrap();
        let mut older = WorkflowRun::new(json!("older"), "managed");
        older.created_at -= chrono::Duration::seconds(5);
        let newer = WorkflowRun::new(json!("newer"), "managed");
        ledger.record(&newer).unwrap();
        ledger.record(&older).unwrap();

        let all = ledger.list_all().unwrap();
        assert_eq!(all[0].input, json!("newer"));
        assert_eq!(all[1].input, json!("older"));
    }

    #[test]
    fn snapshots_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("runs.redb");
        let run = WorkflowRun::new(json!(42), "managed");
        {
            let ledger = RunLedger::open(&path).unwrap();
            ledger.record(&run).unwrap();
        }
        let ledger = RunLedger::open(&path).unwrap();
        assert_eq!(ledger.get(run.id).unwrap().input, json!(42));
    }

    #[test]
    fn lookup_by_id_survives_reopen_with_many_runs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("runs.redb");
        let runs: Vec<_> = (0..50)
            .map(|i| WorkflowRun::new(json!(i), "managed"))
            .collect();
        {
            let ledger = RunLedger::open(&path).unwrap();
            for run in &runs {
                ledger.record(run).unwrap();
            }
        }
        let ledger = RunLedger::open(&path).unwrap();
        for run in &runs {
            assert_eq!(ledger.get(run.id).unwrap().input, run.input);
        }
    }

    #[test]
    fn startup_recovery_fails_every_unfinished_run() {
        let ledger = RunLedger::in_memory().unwrap();
        let pending = WorkflowRun::new(json!("queued"), "managed");
        ledger.record(&pending).unwrap();
        // Started moments ago: age is irrelevant, its process is gone.
        let mut running = WorkflowRun::new(json!("in flight"), "managed");
        running.start().unwrap();
        ledger.record(&running).unwrap();

        assert_eq!(ledger.startup_recovery().unwrap(), 2);
        for id in [pending.id, running.id] {
            let run = ledger.get(id).unwrap();
            assert_eq!(run.state(), RunState::Failed);
            assert!(run.error().unwrap().contains("restart"));
        }
    }

    #[test]
    fn startup_recovery_leaves_terminal_runs_alone() {
        let ledger = RunLedger::in_memory().unwrap();
        let mut done = WorkflowRun::new(json!(null), "managed");
        done.start().unwrap();
        done.succeed(json!(1)).unwrap();
        ledger.record(&done).unwrap();

        let mut failed = WorkflowRun::new(json!(null), "managed");
        failed.start().unwrap();
        failed.fail("disk full").unwrap();
        ledger.record(&failed).unwrap();

        assert_eq!(ledger.startup_recovery().unwrap(), 0);
        assert_eq!(ledger.get(done.id).unwrap(), done);
        assert_eq!(ledger.get(failed.id).unwrap().error(), Some("disk full"));
    }

    #[test]
    fn stranded_runs_are_failed_when_the_file_is_reopened() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("runs.redb");
        let mut running = WorkflowRun::new(json!(null), "managed");
        {
            let ledger = RunLedger::open(&path).unwrap();
            running.start().unwrap();
            ledger.record(&running).unwrap();
        }
        let ledger = RunLedger::open(&path).unwrap();
        assert_eq!(ledger.startup_recovery().unwrap(), 1);
        assert_eq!(ledger.get(running.id).unwrap().state(), RunState::Failed);
        assert_eq!(ledger.startup_recovery().unwrap(), 0);
    }
}
