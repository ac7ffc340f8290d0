//! HTTP client for a REST document service.
//!
//! Layout:
//! - `GET|PUT|DELETE {base}/users/{user}/workspaces/{ws}/{collection}/{doc}`
//! - `GET {base}/users/{user}/workspaces/{ws}/{collection}` returns
//!   `[{"id": ..., "data": ...}]`

use super::{DocumentKey, DocumentStore, RemoteError, RemoteResult};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct ListedDocument {
    id: String,
    data: JsonValue,
}

#[derive(Clone)]
pub struct HttpDocumentStore {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpDocumentStore {
    pub fn new(base_url: &str, timeout: Duration) -> RemoteResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;
        let base_url = Url::parse(base_url)
            .map_err(|e| RemoteError::Unavailable(format!("invalid base url {}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(RemoteError::Unavailable(format!(
                "{} cannot be used as a base url",
                base_url
            )));
        }
        Ok(Self { base_url, client })
    }

    /// Append `segments` to the base path, percent-encoding each one so ids
    /// containing `/`, `?`, `#` or `%` stay a single segment.
    fn url_for(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn collection_url(&self, user_id: &str, workspace_id: &str, collection: &str) -> Url {
        self.url_for(&["users", user_id, "workspaces", workspace_id, collection])
    }

    fn document_url(&self, key: &DocumentKey) -> Url {
        self.url_for(&[
            "users",
            &key.user_id,
            "workspaces",
            &key.workspace_id,
            &key.collection,
            &key.document_id,
        ])
    }
}

fn map_transport(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout
    } else if let Some(status) = err.status() {
        RemoteError::Status(status.as_u16())
    } else {
        RemoteError::Unavailable(err.to_string())
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn get_document(&self, key: &DocumentKey) -> RemoteResult<Option<JsonValue>> {
        let response = self
            .client
            .get(self.document_url(key))
            .send()
            .await
            .map_err(map_transport)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                Ok(Some(response.json().await.map_err(map_transport)?))
            }
            status => Err(RemoteError::Status(status.as_u16())),
        }
    }

    async fn put_document(&self, key: &DocumentKey, value: JsonValue) -> RemoteResult<()> {
        let response = self
            .client
            .put(self.document_url(key))
            .json(&value)
            .send()
            .await
            .map_err(map_transport)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(RemoteError::Status(response.status().as_u16()))
        }
    }

    async fn delete_document(&self, key: &DocumentKey) -> RemoteResult<()> {
        let response = self
            .client
            .delete(self.document_url(key))
            .send()
            .await
            .map_err(map_transport)?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(RemoteError::Status(status.as_u16()))
        }
    }

    async fn list_documents(
        &self,
        user_id: &str,
        workspace_id: &str,
        collection: &str,
    ) -> RemoteResult<Vec<(String, JsonValue)>> {
        let response = self
            .client
            .get(self.collection_url(user_id, workspace_id, collection))
            .send()
            .await
            .map_err(map_transport)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            status if status.is_success() => {
                let listed: Vec<ListedDocument> = response.json().await.map_err(map_transport)?;
                Ok(listed.into_iter().map(|d| (d.id, d.data)).collect())
            }
            status => Err(RemoteError::Status(status.as_u16())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_scoped_by_user_and_workspace() {
        let store = HttpDocumentStore::new("https://sync.example.com/api/", Duration::from_secs(5)).unwrap();
        let key = DocumentKey::new("u1", "ws1", "nodes", "n1");
        assert_eq!(
            store.document_url(&key).as_str(),
            "https://sync.example.com/api/users/u1/workspaces/ws1/nodes/n1"
        );

        let bare = HttpDocumentStore::new("http://127.0.0.1:8080", Duration::from_secs(5)).unwrap();
        assert_eq!(
            bare.collection_url("u1", "ws1", "edges").as_str(),
            "http://127.0.0.1:8080/users/u1/workspaces/ws1/edges"
        );
    }

    #[test]
    fn reserved_characters_in_ids_stay_inside_one_segment() {
        let store = HttpDocumentStore::new("https://sync.example.com/api", Duration::from_secs(5)).unwrap();
        let key = DocumentKey::new("u/1", "team #1", "nodes", "a/b?c%d");
        let url = store.document_url(&key);

        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
        assert_eq!(
            url.path(),
            "/api/users/u%2F1/workspaces/team%20%231/nodes/a%2Fb%3Fc%25d"
        );
        let segments: Vec<&str> = url.path_segments().unwrap().collect();
        assert_eq!(segments.len(), 7);
    }

    #[test]
    fn rejects_unusable_base_urls() {
        assert!(HttpDocumentStore::new("not a url", Duration::from_secs(5)).is_err());
        assert!(HttpDocumentStore::new("mailto:ops@example.com", Duration::from_secs(5)).is_err());
    }

    #[tokio::test]
    async fn unreachable_host_maps_to_transport_error() {
        // Port 9 (discard) on localhost is closed in test environments.
        let store = HttpDocumentStore::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let err = store
            .get_document(&DocumentKey::new("u", "ws", "meta", "workspace"))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Unavailable(_) | RemoteError::Timeout));
    }
}
