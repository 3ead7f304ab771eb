//! Error types for the dispatch tree.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from watch scheduling and lifecycle operations.
///
/// Only `Exhausted` is session-fatal: the OS watch layer cannot subscribe
/// to anything, so the session provides no value. Install and handler
/// failures are reported as non-fatal diagnostics and the session continues.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("Cannot watch path {path}: {reason}")]
    WatchInstall { path: PathBuf, reason: String },

    #[error("Handler '{handler}' failed: {reason}")]
    HandlerExecution { handler: String, reason: String },

    #[error("OS watch resources exhausted: {reason}")]
    Exhausted { reason: String },

    #[error("Node is stopped; no further scheduling is valid")]
    Stopped,

    #[error("Event loop task failed: {reason}")]
    TaskFailed { reason: String },
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        match e.kind {
            notify::ErrorKind::MaxFilesWatch => WatchError::Exhausted {
                reason: e.to_string(),
            },
            _ => WatchError::InitFailed {
                reason: e.to_string(),
            },
        }
    }
}
