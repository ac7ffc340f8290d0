use super::{DocumentKey, DocumentStore, RemoteError, RemoteResult};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// In-process document store with failure and latency injection.
#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: Mutex<BTreeMap<DocumentKey, JsonValue>>,
    failing: AtomicBool,
    latency: Mutex<Option<Duration>>,
    writes: AtomicUsize,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`RemoteError::Unavailable`].
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self
            .latency
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = latency;
    }

    /// Number of successful puts and deletes.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn document_count(&self) -> usize {
        self.documents().len()
    }

    fn documents(&self) -> MutexGuard<'_, BTreeMap<DocumentKey, JsonValue>> {
        self.documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn enter(&self) -> RemoteResult<()> {
        let latency = *self
            .latency
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable(
                "memory store is offline".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get_document(&self, key: &DocumentKey) -> RemoteResult<Option<JsonValue>> {
        self.enter().await?;
        Ok(self.documents().get(key).cloned())
    }

    async fn put_document(&self, key: &DocumentKey, value: JsonValue) -> RemoteResult<()> {
        self.enter().await?;
        self.documents().insert(key.clone(), value);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_document(&self, key: &DocumentKey) -> RemoteResult<()> {
        self.enter().await?;
        self.documents().remove(key);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_documents(
        &self,
        user_id: &str,
        workspace_id: &str,
        collection: &str,
    ) -> RemoteResult<Vec<(String, JsonValue)>> {
        self.enter().await?;
        Ok(self
            .documents()
            .iter()
            .filter(|(key, _)| {
                key.user_id == user_id
                    && key.workspace_id == workspace_id
                    && key.collection == collection
            })
            .map(|(key, value)| (key.document_id.clone(), value.clone()))
            .collect())
    }
}
