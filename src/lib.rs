//! Offline-first synchronization for canvas node/edge workspaces.
//!
//! The graph itself lives in the `canvas-graph` crate. This crate keeps it
//! durable and in sync: a bounded snapshot cache for instant hydration, an
//! offline write queue drained on reconnect, conflict detection before remote
//! overwrites, and the session type that wires them together.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod remote;
pub mod storage;
pub mod sync;
pub mod test_utils;

pub use canvas_graph;
pub use error::{SyncError, SyncResult};
