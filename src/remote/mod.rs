//! Remote document store collaborators.
//!
//! The engine treats the remote side as a key-scoped document API addressed by
//! `(user, workspace, collection, document)`. [`RemoteGraph`] layers the
//! node/edge shaped operations the sync engine needs on top of any
//! [`DocumentStore`].

#[cfg(feature = "http-remote")]
pub mod http;
pub mod memory;

#[cfg(feature = "http-remote")]
pub use http::HttpDocumentStore;
pub use memory::MemoryDocumentStore;

use async_trait::async_trait;
use canvas_graph::{Edge, Node};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, warn};

pub const NODES_COLLECTION: &str = "nodes";
pub const EDGES_COLLECTION: &str = "edges";
pub const META_COLLECTION: &str = "meta";
const META_DOCUMENT: &str = "workspace";

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("remote store unavailable: {0}")]
    Unavailable(String),

    #[error("remote request timed out")]
    Timeout,

    #[error("remote store returned status {0}")]
    Status(u16),

    #[error("failed to decode remote document: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentKey {
    pub user_id: String,
    pub workspace_id: String,
    pub collection: String,
    pub document_id: String,
}

impl DocumentKey {
    pub fn new(
        user_id: impl Into<String>,
        workspace_id: impl Into<String>,
        collection: impl Into<String>,
        document_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            workspace_id: workspace_id.into(),
            collection: collection.into(),
            document_id: document_id.into(),
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_document(&self, key: &DocumentKey) -> RemoteResult<Option<JsonValue>>;

    async fn put_document(&self, key: &DocumentKey, value: JsonValue) -> RemoteResult<()>;

    async fn delete_document(&self, key: &DocumentKey) -> RemoteResult<()>;

    /// All `(document_id, value)` pairs of one collection.
    async fn list_documents(
        &self,
        user_id: &str,
        workspace_id: &str,
        collection: &str,
    ) -> RemoteResult<Vec<(String, JsonValue)>>;
}

/// Graph-shaped view of the remote store used by the sync engine.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn load_nodes(&self, user_id: &str, workspace_id: &str) -> RemoteResult<Vec<Node>>;

    async fn save_nodes(&self, user_id: &str, workspace_id: &str, nodes: &[Node]) -> RemoteResult<()>;

    async fn load_edges(&self, user_id: &str, workspace_id: &str) -> RemoteResult<Vec<Edge>>;

    async fn save_edges(&self, user_id: &str, workspace_id: &str, edges: &[Edge]) -> RemoteResult<()>;

    /// Last time the workspace was written, if it exists remotely.
    async fn workspace_updated_at(
        &self,
        user_id: &str,
        workspace_id: &str,
    ) -> RemoteResult<Option<DateTime<Utc>>>;

    async fn set_workspace_updated_at(
        &self,
        user_id: &str,
        workspace_id: &str,
        updated_at: DateTime<Utc>,
    ) -> RemoteResult<()>;

    /// Replace both collections and stamp the workspace with `captured_at`,
    /// the moment the local state was taken.
    async fn save_workspace(
        &self,
        user_id: &str,
        workspace_id: &str,
        nodes: &[Node],
        edges: &[Edge],
        captured_at: DateTime<Utc>,
    ) -> RemoteResult<()> {
        self.save_nodes(user_id, workspace_id, nodes).await?;
        self.save_edges(user_id, workspace_id, edges).await?;
        self.set_workspace_updated_at(user_id, workspace_id, captured_at)
            .await
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkspaceMeta {
    updated_at: DateTime<Utc>,
}

/// [`RemoteStore`] over a [`DocumentStore`]: one document per node or edge.
pub struct RemoteGraph<S> {
    documents: S,
}

impl<S: DocumentStore> RemoteGraph<S> {
    pub fn new(documents: S) -> Self {
        Self { documents }
    }

    pub fn documents(&self) -> &S {
        &self.documents
    }

    async fn load_collection<T: DeserializeOwned>(
        &self,
        user_id: &str,
        workspace_id: &str,
        collection: &str,
    ) -> RemoteResult<Vec<T>> {
        let documents = self
            .documents
            .list_documents(user_id, workspace_id, collection)
            .await?;

        let mut records = Vec::with_capacity(documents.len());
        for (document_id, value) in documents {
            match serde_json::from_value(value) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    "skipping undecodable {} document {}/{}: {}",
                    collection, workspace_id, document_id, e
                ),
            }
        }
        Ok(records)
    }

    /// Put every record, then delete documents that are no longer present.
    async fn replace_collection(
        &self,
        user_id: &str,
        workspace_id: &str,
        collection: &str,
        records: Vec<(String, JsonValue)>,
    ) -> RemoteResult<()> {
        let existing = self
            .documents
            .list_documents(user_id, workspace_id, collection)
            .await?;

        let keep: HashSet<&str> = records.iter().map(|(id, _)| id.as_str()).collect();
        let stale: Vec<String> = existing
            .into_iter()
            .map(|(id, _)| id)
            .filter(|id| !keep.contains(id.as_str()))
            .collect();

        for (document_id, value) in &records {
            let key = DocumentKey::new(user_id, workspace_id, collection, document_id.as_str());
            self.documents.put_document(&key, value.clone()).await?;
        }
        for document_id in &stale {
            let key = DocumentKey::new(user_id, workspace_id, collection, document_id.as_str());
            self.documents.delete_document(&key).await?;
        }

        debug!(
            "replaced {} {} documents in {} ({} removed)",
            records.len(),
            collection,
            workspace_id,
            stale.len()
        );
        Ok(())
    }
}

#[async_trait]
impl<S: DocumentStore> RemoteStore for RemoteGraph<S> {
    async fn load_nodes(&self, user_id: &str, workspace_id: &str) -> RemoteResult<Vec<Node>> {
        let mut nodes: Vec<Node> = self
            .load_collection(user_id, workspace_id, NODES_COLLECTION)
            .await?;
        // Document listings carry no order; creation order is stable.
        nodes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(nodes)
    }

    async fn save_nodes(&self, user_id: &str, workspace_id: &str, nodes: &[Node]) -> RemoteResult<()> {
        let records = nodes
            .iter()
            .map(|n| Ok((n.id.clone(), serde_json::to_value(n)?)))
            .collect::<RemoteResult<Vec<_>>>()?;
        self.replace_collection(user_id, workspace_id, NODES_COLLECTION, records)
            .await
    }

    async fn load_edges(&self, user_id: &str, workspace_id: &str) -> RemoteResult<Vec<Edge>> {
        self.load_collection(user_id, workspace_id, EDGES_COLLECTION)
            .await
    }

    async fn save_edges(&self, user_id: &str, workspace_id: &str, edges: &[Edge]) -> RemoteResult<()> {
        let records = edges
            .iter()
            .map(|e| Ok((e.id.clone(), serde_json::to_value(e)?)))
            .collect::<RemoteResult<Vec<_>>>()?;
        self.replace_collection(user_id, workspace_id, EDGES_COLLECTION, records)
            .await
    }

    async fn workspace_updated_at(
        &self,
        user_id: &str,
        workspace_id: &str,
    ) -> RemoteResult<Option<DateTime<Utc>>> {
        let key = DocumentKey::new(user_id, workspace_id, META_COLLECTION, META_DOCUMENT);
        match self.documents.get_document(&key).await? {
            Some(value) => {
                let meta: WorkspaceMeta = serde_json::from_value(value)?;
                Ok(Some(meta.updated_at))
            }
            None => Ok(None),
        }
    }

    async fn set_workspace_updated_at(
        &self,
        user_id: &str,
        workspace_id: &str,
        updated_at: DateTime<Utc>,
    ) -> RemoteResult<()> {
        let key = DocumentKey::new(user_id, workspace_id, META_COLLECTION, META_DOCUMENT);
        let value = serde_json::to_value(WorkspaceMeta { updated_at })?;
        self.documents.put_document(&key, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canvas_graph::{NodeType, Position, RelationshipType};
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn node(id: &str, minute: u32) -> Node {
        let mut n = Node::new(id, "ws", NodeType::Note, Position::default(), json!({"text": id}));
        n.created_at = Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0).unwrap();
        n.updated_at = n.created_at;
        n
    }

    #[tokio::test]
    async fn save_replaces_collections() {
        let remote = RemoteGraph::new(MemoryDocumentStore::new());
        let nodes = vec![node("b", 2), node("a", 1), node("c", 3)];
        remote.save_nodes("u", "ws", &nodes).await.unwrap();

        let loaded = remote.load_nodes("u", "ws").await.unwrap();
        let ids: Vec<&str> = loaded.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        remote.save_nodes("u", "ws", &nodes[..1]).await.unwrap();
        let loaded = remote.load_nodes("u", "ws").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "b");
    }

    #[tokio::test]
    async fn workspaces_and_users_are_isolated() {
        let remote = RemoteGraph::new(MemoryDocumentStore::new());
        remote.save_nodes("u1", "ws", &[node("a", 1)]).await.unwrap();

        assert!(remote.load_nodes("u2", "ws").await.unwrap().is_empty());
        assert!(remote.load_nodes("u1", "other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_workspace_stamps_capture_time() {
        let remote = RemoteGraph::new(MemoryDocumentStore::new());
        assert_eq!(remote.workspace_updated_at("u", "ws").await.unwrap(), None);

        let captured = Utc::now() - Duration::minutes(5);
        let edges = vec![Edge::new("e", "ws", "a", "b", RelationshipType::RelatesTo)];
        remote
            .save_workspace("u", "ws", &[node("a", 1), node("b", 2)], &edges, captured)
            .await
            .unwrap();

        assert_eq!(remote.workspace_updated_at("u", "ws").await.unwrap(), Some(captured));
        assert_eq!(remote.load_edges("u", "ws").await.unwrap(), edges);
    }

    #[tokio::test]
    async fn undecodable_documents_are_skipped() {
        let store = MemoryDocumentStore::new();
        store
            .put_document(&DocumentKey::new("u", "ws", NODES_COLLECTION, "junk"), json!({"oops": true}))
            .await
            .unwrap();
        let remote = RemoteGraph::new(store);
        remote.save_edges("u", "ws", &[]).await.unwrap();

        assert!(remote.load_nodes("u", "ws").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failures_propagate_as_unavailable() {
        let remote = RemoteGraph::new(MemoryDocumentStore::new());
        remote.documents().set_failing(true);
        let err = remote.load_nodes("u", "ws").await.unwrap_err();
        assert!(matches!(err, RemoteError::Unavailable(_)));
    }
}
