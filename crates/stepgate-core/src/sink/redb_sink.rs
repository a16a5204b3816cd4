//! redb-backed sink.
//!
//! # Table design
//!
//! One table per bucket, named after the bucket identifier:
//! ```text
//! key:   object key (&str)
//! value: [ content_type_len: u16 big-endian | content_type bytes | body bytes ]
//! ```
//!
//! Each `put` is a single write transaction, so a failed write commits nothing.
//! `put_before` checks its deadline on the blocking thread immediately before
//! `commit` and aborts instead, so a write whose caller already timed out
//! never becomes visible.

use std::fmt::Display;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use redb::{Database, ReadableTable, TableDefinition};
use tokio::time::Instant;

use super::{Sink, StoredObject};
use crate::error::StorageError;

fn backend<E: Display>(e: E) -> StorageError {
    StorageError::Backend(e.to_string())
}

fn encode(content_type: &str, body: &[u8]) -> Result<Vec<u8>, StorageError> {
    let ct_len = u16::try_from(content_type.len())
        .map_err(|_| StorageError::Backend("content type too long".into()))?;
    let mut out = Vec::with_capacity(2 + content_type.len() + body.len());
    out.extend_from_slice(&ct_len.to_be_bytes());
    out.extend_from_slice(content_type.as_bytes());
    out.extend_from_slice(body);
    Ok(out)
}

type BucketTable<'a> = TableDefinition<'a, &'static str, &'static [u8]>;

fn decode(raw: &[u8]) -> Result<StoredObject, StorageError> {
    let corrupt = || StorageError::Backend("corrupt object envelope".into());
    let len_bytes: [u8; 2] = raw.get(..2).and_then(|b| b.try_into().ok()).ok_or_else(corrupt)?;
    let ct_len = usize::from(u16::from_be_bytes(len_bytes));
    let ct = raw.get(2..2 + ct_len).ok_or_else(corrupt)?;
    let content_type = std::str::from_utf8(ct).map_err(|_| corrupt())?.to_string();
    Ok(StoredObject {
        body: Bytes::copy_from_slice(&raw[2 + ct_len..]),
        content_type,
    })
}

/// Durable sink storing one bucket in a redb database.
#[derive(Clone)]
pub struct RedbSink {
    db: Arc<Database>,
    bucket: Arc<str>,
}

impl std::fmt::Debug for RedbSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbSink")
            .field("bucket", &self.bucket)
            .finish()
    }
}

impl RedbSink {
    /// Open or create the database at `path` and ensure the bucket table exists.
    pub fn open(path: &Path, bucket: &str) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(backend)?;
        Self::with_database(db, bucket)
    }

    /// A non-persistent database, for tests and dry runs.
    pub fn in_memory(bucket: &str) -> Result<Self, StorageError> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(backend)?;
        Self::with_database(db, bucket)
    }

    fn with_database(db: Database, bucket: &str) -> Result<Self, StorageError> {
        let wt = db.begin_write().map_err(backend)?;
        wt.open_table(TableDefinition::<&str, &[u8]>::new(bucket))
            .map_err(backend)?;
        wt.commit().map_err(backend)?;
        Ok(Self {
            db: Arc::new(db),
            bucket: Arc::from(bucket),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Run blocking redb work off the async executor.
    async fn blocking<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Database, BucketTable<'_>) -> Result<T, StorageError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let bucket = Arc::clone(&self.bucket);
        tokio::task::spawn_blocking(move || f(&db, TableDefinition::new(&bucket)))
            .await
            .map_err(backend)?
    }

    async fn write(
        &self,
        key: &str,
        value: Bytes,
        content_type: &str,
        deadline: Option<Instant>,
    ) -> Result<(), StorageError> {
        let envelope = encode(content_type, &value)?;
        let key = key.to_string();
        self.blocking(move |db, table_def| {
            let wt = db.begin_write().map_err(backend)?;
            {
                let mut table = wt.open_table(table_def).map_err(backend)?;
                table
                    .insert(key.as_str(), envelope.as_slice())
                    .map_err(backend)?;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                wt.abort().map_err(backend)?;
                return Err(StorageError::DeadlineExceeded(key));
            }
            wt.commit().map_err(backend)
        })
        .await
    }
}

#[async_trait]
impl Sink for RedbSink {
    async fn put(&self, key: &str, value: Bytes, content_type: &str) -> Result<(), StorageError> {
        self.write(key, value, content_type, None).await
    }

    async fn put_before(
        &self,
        key: &str,
        value: Bytes,
        content_type: &str,
        deadline: Instant,
    ) -> Result<(), StorageError> {
        self.write(key, value, content_type, Some(deadline)).await
    }

    async fn get(&self, key: &str) -> Result<StoredObject, StorageError> {
        let key = key.to_string();
        self.blocking(move |db, table_def| {
            let rt = db.begin_read().map_err(backend)?;
            let table = rt.open_table(table_def).map_err(backend)?;
            let guard = table
                .get(key.as_str())
                .map_err(backend)?
                .ok_or_else(|| StorageError::NotFound(key.clone()))?;
            decode(guard.value())
        })
        .await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let prefix = prefix.to_string();
        self.blocking(move |db, table_def| {
            let rt = db.begin_read().map_err(backend)?;
            let table = rt.open_table(table_def).map_err(backend)?;
            let mut keys = Vec::new();
            for entry in table.range(prefix.as_str()..).map_err(backend)? {
                let (k, _) = entry.map_err(backend)?;
                let k = k.value();
                if !k.starts_with(prefix.as_str()) {
                    break;
                }
                keys.push(k.to_string());
            }
            Ok(keys)
        })
        .await
    }
}
