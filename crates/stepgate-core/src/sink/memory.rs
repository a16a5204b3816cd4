use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;

use super::{Sink, StoredObject};
use crate::error::StorageError;

/// In-memory sink.
///
/// Clones share the same objects, so a test can keep a handle while the
/// gateway owns another. Failures and latency can be injected.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    objects: Arc<RwLock<BTreeMap<String, StoredObject>>>,
    fail_prefixes: Arc<Mutex<Vec<String>>>,
    put_attempts: Arc<AtomicUsize>,
    latency: Option<Duration>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `put` sleeps for `latency` before committing.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Make every `put` whose key starts with `prefix` fail.
    pub fn inject_failure(&self, prefix: impl Into<String>) {
        lock_poisoned_ok(&self.fail_prefixes).push(prefix.into());
    }

    pub fn clear_failures(&self) {
        lock_poisoned_ok(&self.fail_prefixes).clear();
    }

    /// Number of `put` calls received, failed ones included.
    pub fn put_attempts(&self) -> usize {
        self.put_attempts.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn commit(
        &self,
        key: &str,
        value: Bytes,
        content_type: &str,
        deadline: Option<Instant>,
    ) -> Result<(), StorageError> {
        self.put_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let injected = lock_poisoned_ok(&self.fail_prefixes)
            .iter()
            .any(|p| key.starts_with(p.as_str()));
        if injected {
            return Err(StorageError::Backend(format!("injected failure for {key}")));
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(StorageError::DeadlineExceeded(key.to_string()));
        }

        let mut objects = self.objects.write().map_err(|_| poisoned())?;
        objects.insert(
            key.to_string(),
            StoredObject {
                body: value,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }
}

fn lock_poisoned_ok<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

fn poisoned() -> StorageError {
    StorageError::Backend("lock poisoned".into())
}

#[async_trait]
impl Sink for MemorySink {
    async fn put(&self, key: &str, value: Bytes, content_type: &str) -> Result<(), StorageError> {
        self.commit(key, value, content_type, None).await
    }

    async fn put_before(
        &self,
        key: &str,
        value: Bytes,
        content_type: &str,
        deadline: Instant,
    ) -> Result<(), StorageError> {
        self.commit(key, value, content_type, Some(deadline)).await
    }

    async fn get(&self, key: &str) -> Result<StoredObject, StorageError> {
        let objects = self.objects.read().map_err(|_| poisoned())?;
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let objects = self.objects.read().map_err(|_| poisoned())?;
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_is_byte_exact() {
        let sink = MemorySink::new();
        let body = Bytes::from_static(b"{\"timestamp\":\"t\",\"input\":{\"k\":[1,2]}}\n");
        sink.put("log-1.json", body.clone(), "application/json")
            .await
            .unwrap();
        let obj = sink.get("log-1.json").await.unwrap();
        assert_eq!(obj.body, body);
        assert_eq!(obj.content_type, "application/json");
    }

    #[tokio::test]
    async fn same_key_is_overwritten() {
        let sink = MemorySink::new();
        sink.put("k", Bytes::from_static(b"first"), "text/plain")
            .await
            .unwrap();
        sink.put("k", Bytes::from_static(b"second"), "text/plain")
            .await
            .unwrap();
        assert_eq!(sink.get("k").await.unwrap().body.as_ref(), b"second");
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn failed_put_leaves_nothing_visible() {
        let sink = MemorySink::new();
        sink.inject_failure("log-");
        let err = sink
            .put("log-2.json", Bytes::from_static(b"{}"), "application/json")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Backend(_)));
        assert!(matches!(
            sink.get("log-2.json").await.unwrap_err(),
            StorageError::NotFound(_)
        ));
        assert_eq!(sink.put_attempts(), 1);

        sink.clear_failures();
        sink.put("log-2.json", Bytes::from_static(b"{}"), "application/json")
            .await
            .unwrap();
        assert!(sink.get("log-2.json").await.is_ok());
    }

    #[tokio::test]
    async fn list_filters_by_prefix_in_order() {
        let sink = MemorySink::new();
        for key in ["log-b.json", "other.json", "log-a.json"] {
            sink.put(key, Bytes::new(), "application/json")
                .await
                .unwrap();
        }
        assert_eq!(
            sink.list("log-").await.unwrap(),
            vec!["log-a.json".to_string(), "log-b.json".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn put_past_its_deadline_commits_nothing() {
        let sink = MemorySink::with_latency(Duration::from_secs(5));
        let deadline = Instant::now() + Duration::from_secs(1);
        let err = sink
            .put_before("log-3.json", Bytes::from_static(b"{}"), "application/json", deadline)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::DeadlineExceeded(ref k) if k == "log-3.json"));
        assert!(sink.is_empty());
        assert_eq!(sink.put_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn put_within_its_deadline_commits() {
        let sink = MemorySink::with_latency(Duration::from_millis(10));
        let deadline = Instant::now() + Duration::from_secs(1);
        sink.put_before("log-4.json", Bytes::from_static(b"{}"), "application/json", deadline)
            .await
            .unwrap();
        assert!(sink.get("log-4.json").await.is_ok());
    }

    #[tokio::test]
    async fn clones_share_objects() {
        let sink = MemorySink::new();
        let handle = sink.clone();
        sink.put("shared", Bytes::from_static(b"x"), "text/plain")
            .await
            .unwrap();
        assert!(handle.get("shared").await.is_ok());
    }
}
