// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change notifications and the shared notification queue.
//!
//! Two external producers — the filesystem watcher and the network receiver —
//! push [`ChangeNotification`]s into a multi-producer single-consumer channel
//! that the engine's worker drains strictly in arrival order. The channel is
//! the only synchronization boundary between producers and the engine.
//!
//! # Control messages
//!
//! The queue element type is [`EngineMessage`], which carries two control
//! variants alongside real changes:
//!
//! - `Status(text)` — log-only message from the peer, no sync effect.
//! - `Shutdown` — terminates the worker loop.
//!
//! Making these explicit variants (rather than reserved path strings) means a
//! real path can never collide with a control message. [`QueueSender`] — the
//! handle producers hold — can only push `Change` and `Status`; the `Shutdown`
//! sentinel is injected exclusively by [`SyncEngine::stop()`](crate::engine::SyncEngine::stop).

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{Result, SyncError};

/// Which side of the mirror produced a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    /// Observed by the local filesystem watcher.
    Local,
    /// Received from the remote peer.
    Remote,
}

impl Origin {
    /// Label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Local => "local",
            Origin::Remote => "remote",
        }
    }
}

/// What changed at a path. Exactly one case is active per notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    /// A regular file was written.
    ///
    /// Local-origin events carry empty `data`: the engine re-reads content
    /// from disk at handling time, since the event may be stale by then.
    File { data: Vec<u8>, mod_time_ms: i64 },

    /// A symlink was created or retargeted.
    ///
    /// Local-origin events carry an empty `target` for the same reason.
    Symlink { target: String, mod_time_ms: i64 },

    /// The path was removed.
    Delete,
}

impl ChangeKind {
    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ChangeKind::File { .. } => "file",
            ChangeKind::Symlink { .. } => "symlink",
            ChangeKind::Delete => "delete",
        }
    }

    /// The modification time carried by the payload, if any.
    pub fn mod_time_ms(&self) -> Option<i64> {
        match self {
            ChangeKind::File { mod_time_ms, .. } | ChangeKind::Symlink { mod_time_ms, .. } => {
                Some(*mod_time_ms)
            }
            ChangeKind::Delete => None,
        }
    }
}

/// A single change event: path, origin, and payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotification {
    /// Opaque path identifier, relative to the synced tree root.
    pub path: String,
    /// Which side produced the event.
    pub origin: Origin,
    /// The payload.
    pub kind: ChangeKind,
}

impl ChangeNotification {
    /// A local file-write event as the filesystem watcher reports it.
    pub fn local_file(path: impl Into<String>, mod_time_ms: i64) -> Self {
        Self {
            path: path.into(),
            origin: Origin::Local,
            kind: ChangeKind::File {
                data: Vec::new(),
                mod_time_ms,
            },
        }
    }

    /// A local symlink event as the filesystem watcher reports it.
    pub fn local_symlink(path: impl Into<String>, mod_time_ms: i64) -> Self {
        Self {
            path: path.into(),
            origin: Origin::Local,
            kind: ChangeKind::Symlink {
                target: String::new(),
                mod_time_ms,
            },
        }
    }

    /// A local delete event.
    pub fn local_delete(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            origin: Origin::Local,
            kind: ChangeKind::Delete,
        }
    }

    /// A full file write bound for (or received from) the peer.
    pub fn remote_file(path: impl Into<String>, data: Vec<u8>, mod_time_ms: i64) -> Self {
        Self {
            path: path.into(),
            origin: Origin::Remote,
            kind: ChangeKind::File { data, mod_time_ms },
        }
    }

    /// A symlink write bound for (or received from) the peer.
    pub fn remote_symlink(
        path: impl Into<String>,
        target: impl Into<String>,
        mod_time_ms: i64,
    ) -> Self {
        Self {
            path: path.into(),
            origin: Origin::Remote,
            kind: ChangeKind::Symlink {
                target: target.into(),
                mod_time_ms,
            },
        }
    }

    /// A delete bound for (or received from) the peer.
    pub fn remote_delete(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            origin: Origin::Remote,
            kind: ChangeKind::Delete,
        }
    }
}

/// Element type of the notification queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineMessage {
    /// A change to classify and apply.
    Change(ChangeNotification),
    /// Log-only status text from the peer; no sync effect.
    Status(String),
    /// Stop the worker loop.
    Shutdown,
}

/// Cloneable producer handle for the notification queue.
///
/// Held by the filesystem watcher and the network receiver. Pushes never
/// block; the queue is unbounded.
#[derive(Debug, Clone)]
pub struct QueueSender {
    tx: mpsc::UnboundedSender<EngineMessage>,
}

impl QueueSender {
    pub(crate) fn new(tx: mpsc::UnboundedSender<EngineMessage>) -> Self {
        Self { tx }
    }

    /// Push a change notification.
    ///
    /// Fails with [`SyncError::Shutdown`] once the engine's worker is gone.
    pub fn push(&self, change: ChangeNotification) -> Result<()> {
        self.tx
            .send(EngineMessage::Change(change))
            .map_err(|_| SyncError::Shutdown)
    }

    /// Push a log-only status message.
    pub fn push_status(&self, text: impl Into<String>) -> Result<()> {
        self.tx
            .send(EngineMessage::Status(text.into()))
            .map_err(|_| SyncError::Shutdown)
    }
}
