//! Sync engine error types

use crate::remote::RemoteError;
use crate::storage::StorageError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("local storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("remote store error: {0}")]
    Remote(#[from] RemoteError),

    /// Remote fetch exceeded the configured bound
    #[error("remote fetch timed out after {0:?}")]
    FetchTimeout(Duration),

    /// Deferred background sync could not be registered
    #[error("background sync unavailable: {0}")]
    BackgroundUnavailable(String),
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
