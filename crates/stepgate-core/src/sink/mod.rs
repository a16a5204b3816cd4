//! Durable, append-only object sink.
//!
//! Keys are always supplied by the caller. A `put` either commits the whole
//! object or leaves nothing visible, and writing an existing key silently
//! replaces it (last write wins).

pub mod memory;
pub mod redb_sink;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::StorageError;

pub use self::memory::MemorySink;
pub use self::redb_sink::RedbSink;

/// An object as read back from a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Bytes,
    pub content_type: String,
}

#[async_trait]
pub trait Sink: Send + Sync + 'static {
    /// Commit `value` under `key`.
    async fn put(&self, key: &str, value: Bytes, content_type: &str) -> Result<(), StorageError>;

    /// Like [`put`](Sink::put), but nothing becomes visible once `deadline`
    /// has passed: the write fails with `StorageError::DeadlineExceeded`.
    /// Backends whose work outlives a cancelled future must check the
    /// deadline at their commit point.
    async fn put_before(
        &self,
        key: &str,
        value: Bytes,
        content_type: &str,
        deadline: Instant,
    ) -> Result<(), StorageError> {
        if Instant::now() >= deadline {
            return Err(StorageError::DeadlineExceeded(key.to_string()));
        }
        self.put(key, value, content_type).await
    }

    /// Returns `StorageError::NotFound` if nothing was committed under `key`.
    async fn get(&self, key: &str) -> Result<StoredObject, StorageError>;

    /// Keys starting with `prefix`, in ascending key order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Which sink backs the bucket.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkConfig {
    /// Process-local; contents vanish on exit.
    #[default]
    Memory,
    /// A redb database file; one table per bucket.
    Redb { path: PathBuf },
}

/// Build the process-wide sink for `bucket`. Called once at startup.
pub fn open_sink(config: &SinkConfig, bucket: &str) -> Result<Arc<dyn Sink>, StorageError> {
    match config {
        SinkConfig::Memory => Ok(Arc::new(MemorySink::new())),
        SinkConfig::Redb { path } => Ok(Arc::new(RedbSink::open(path, bucket)?)),
    }
}
