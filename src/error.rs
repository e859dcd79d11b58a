// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the sync engine.
//!
//! # Error Categories
//!
//! | Error Type | Benign | Description |
//! |------------|--------|-------------|
//! | `NotFound` | Yes | Target of a defensive re-read vanished before handling |
//! | `Io` | No | Any other filesystem failure during apply or re-read |
//! | `Outbound` | No | Delivery to the peer sink failed |
//! | `Ping` | — | Liveness probe failed (never escapes the detector) |
//! | `InvalidState` | No | Engine lifecycle violation |
//! | `Shutdown` | No | Operation attempted against a stopped engine |
//! | `Internal` | No | Unexpected internal error |
//!
//! # Failure Policy
//!
//! Use [`SyncError::is_not_found()`] to recognize the benign race where a path
//! disappears between a change notification being produced and the engine
//! re-reading it: those are logged and the notification is dropped. Everything
//! else is fatal to the sync session — the dispatch loop terminates and the
//! owning connection is expected to be torn down and rebuilt with a fresh
//! initial sync, not retried per notification.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Errors that can occur while synchronizing.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A path was missing at the moment the engine went back to disk for it.
    ///
    /// This is the expected signature of racing an in-flight delete and is
    /// swallowed by the dispatch handlers.
    #[error("not found: {path}")]
    NotFound { path: String },

    /// Filesystem failure other than a missing path.
    ///
    /// Fatal to the session: the loop terminates and the session is rebuilt.
    #[error("I/O error during {operation} on {path}: {source}")]
    Io {
        operation: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The outbound sink rejected a delivery or completion.
    #[error("outbound sink error: {0}")]
    Outbound(String),

    /// A liveness ping failed.
    ///
    /// Only ever produced by [`PeerPing`](crate::connection::PeerPing)
    /// implementations; the detector converts it to `is_available() == false`.
    #[error("peer ping failed: {0}")]
    Ping(String),

    /// Engine lifecycle violation (e.g. `start()` called twice).
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// The engine has stopped and no longer accepts queue pushes.
    #[error("engine is shut down")]
    Shutdown,

    /// Unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Create an I/O error, collapsing `ErrorKind::NotFound` into
    /// [`SyncError::NotFound`] so callers can match the benign race uniformly.
    pub fn io(operation: &'static str, path: impl Into<String>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound { path }
        } else {
            Self::Io {
                operation,
                path,
                source,
            }
        }
    }

    /// Create a `NotFound` error directly.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Check whether this is the benign missing-path race.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check whether this error terminates the sync session.
    ///
    /// Everything except `NotFound` is fatal; see the module docs.
    pub fn is_fatal(&self) -> bool {
        !self.is_not_found()
    }
}
