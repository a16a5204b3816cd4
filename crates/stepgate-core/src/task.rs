//! The worker task: record what was received, durably.
//!
//! Each invocation stamps the current time, wraps the input verbatim in a
//! [`TaskRecord`], and makes exactly one write attempt to the sink under
//! `log-<timestamp>.json`. The write is bounded by an explicit deadline that
//! the sink also honours, so a timed-out write is never committed later.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{error, info};

use crate::error::{StepError, StorageError, WriteError};
use crate::orchestrator::Step;
use crate::sink::Sink;

pub const RECORD_CONTENT_TYPE: &str = "application/json";

/// RFC 3339, UTC, microsecond precision. Lexicographic order is time order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Sink key for a record stamped `timestamp`.
pub fn record_key(timestamp: &str) -> String {
    format!("log-{timestamp}.json")
}

/// The object body written for every invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub timestamp: String,
    pub input: serde_json::Value,
}

impl TaskRecord {
    pub fn stamp(input: serde_json::Value, now: DateTime<Utc>) -> Self {
        Self {
            timestamp: format_timestamp(now),
            input,
        }
    }

    pub fn key(&self) -> String {
        record_key(&self.timestamp)
    }
}

/// What a successful invocation reports back: `{"status":"success","file":...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskReceipt {
    pub status: &'static str,
    pub file: String,
    #[serde(skip)]
    pub record: TaskRecord,
}

#[derive(Clone)]
pub struct WorkerTask {
    sink: Arc<dyn Sink>,
    timeout: Duration,
}

impl std::fmt::Debug for WorkerTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerTask")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl WorkerTask {
    pub fn new(sink: Arc<dyn Sink>, timeout: Duration) -> Self {
        Self { sink, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn execute(&self, input: serde_json::Value) -> Result<TaskReceipt, WriteError> {
        self.execute_at(input, Utc::now()).await
    }

    /// Same as [`execute`](Self::execute) with an explicit clock reading.
    pub async fn execute_at(
        &self,
        input: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<TaskReceipt, WriteError> {
        info!(event = %input, "task received event");

        let record = TaskRecord::stamp(input, now);
        let key = record.key();
        let body = Bytes::from(serde_json::to_vec(&record)?);

        let deadline = Instant::now() + self.timeout;
        let write = self
            .sink
            .put_before(&key, body, RECORD_CONTENT_TYPE, deadline);
        let outcome = tokio::time::timeout_at(deadline, write).await;
        match outcome {
            Ok(Ok(())) => {
                info!(key = %key, "task record written");
                Ok(TaskReceipt {
                    status: "success",
                    file: key,
                    record,
                })
            }
            Ok(Err(StorageError::DeadlineExceeded(_))) | Err(_) => {
                error!(key = %key, timeout = ?self.timeout, "task record write timed out");
                Err(WriteError::Timeout {
                    key,
                    after: self.timeout,
                })
            }
            Ok(Err(source)) => {
                error!(key = %key, error = %source, "task record write failed");
                Err(WriteError::Storage { key, source })
            }
        }
    }
}

#[async_trait]
impl Step for WorkerTask {
    fn name(&self) -> &str {
        "process-data"
    }

    async fn invoke(&self, input: serde_json::Value) -> Result<serde_json::Value, StepError> {
        let receipt = self.execute(input).await?;
        Ok(serde_json::to_value(&receipt).map_err(WriteError::from)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{MemorySink, RedbSink};
    use chrono::TimeZone;
    use serde_json::json;

    fn task(sink: &MemorySink) -> WorkerTask {
        WorkerTask::new(Arc::new(sink.clone()), Duration::from_secs(10))
    }

    #[test]
    fn timestamps_sort_chronologically() {
        let a = Utc.with_ymd_and_hms(2024, 9, 30, 23, 59, 59).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 10, 1, 0, 0, 0).unwrap();
        assert!(format_timestamp(a) < format_timestamp(b));
        assert_eq!(format_timestamp(b), "2024-10-01T00:00:00.000000Z");
    }

    #[test]
    fn key_is_derived_from_timestamp() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let record = TaskRecord::stamp(json!({}), now);
        assert_eq!(record.key(), "log-2024-01-02T03:04:05.000000Z.json");
    }

    #[tokio::test]
    async fn writes_input_verbatim_with_timestamp() {
        let sink = MemorySink::new();
        let input = json!({ "input": "hello", "nested": { "n": [1, 2, 3] } });
        let receipt = task(&sink).execute(input.clone()).await.unwrap();

        assert_eq!(receipt.status, "success");
        let obj = sink.get(&receipt.file).await.unwrap();
        assert_eq!(obj.content_type, "application/json");
        let stored: TaskRecord = serde_json::from_slice(&obj.body).unwrap();
        assert_eq!(stored.input, input);
        assert!(DateTime::parse_from_rfc3339(&stored.timestamp).is_ok());
        assert_eq!(receipt.file, record_key(&stored.timestamp));
    }

    #[tokio::test]
    async fn receipt_serializes_status_and_file_only() {
        let sink = MemorySink::new();
        let receipt = task(&sink).execute(json!(1)).await.unwrap();
        let value = serde_json::to_value(&receipt).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["file"], receipt.file.as_str());
        assert_eq!(value.as_object().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn sink_failure_propagates_with_cause() {
        let sink = MemorySink::new();
        sink.inject_failure("log-");
        let err = task(&sink).execute(json!({})).await.unwrap_err();
        match err {
            WriteError::Storage { key, source } => {
                assert!(key.starts_with("log-"));
                assert!(matches!(source, StorageError::Backend(_)));
            }
            other => panic!("expected Storage, got {other:?}"),
        }
        assert_eq!(sink.put_attempts(), 1, "exactly one write attempt");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_sink_times_out() {
        let sink = MemorySink::with_latency(Duration::from_secs(30));
        let task = WorkerTask::new(Arc::new(sink.clone()), Duration::from_secs(10));
        let err = task.execute(json!({})).await.unwrap_err();
        let ten_seconds = Duration::from_secs(10);
        assert!(matches!(err, WriteError::Timeout { after, .. } if after == ten_seconds));
        assert!(sink.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_write_stays_invisible_after_the_sink_finishes() {
        let sink = MemorySink::with_latency(Duration::from_secs(30));
        let task = WorkerTask::new(Arc::new(sink.clone()), Duration::from_secs(10));
        let err = task.execute(json!({ "late": true })).await.unwrap_err();
        assert!(matches!(err, WriteError::Timeout { .. }));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(sink.is_empty());
        assert!(sink.list("log-").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn zero_timeout_against_redb_commits_nothing() {
        let sink = RedbSink::in_memory("stepgate-logs").unwrap();
        let task = WorkerTask::new(Arc::new(sink.clone()), Duration::ZERO);
        let err = task.execute(json!({})).await.unwrap_err();
        assert!(matches!(err, WriteError::Timeout { .. }));
        assert!(sink.list("log-").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn step_output_is_the_receipt() {
        let sink = MemorySink::new();
        let out = task(&sink).invoke(json!({ "k": "v" })).await.unwrap();
        assert_eq!(out["status"], "success");
        assert!(out["file"].as_str().unwrap().starts_with("log-"));
    }
}
