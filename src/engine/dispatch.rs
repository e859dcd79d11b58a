//! The dispatch loop: classification and application of change notifications.
//!
//! One worker drains the queue strictly in arrival order. For each message,
//! first match wins:
//!
//! 1. `Shutdown` — complete the outbound sink and exit.
//! 2. `Status` — log, no state change.
//! 3. `Change` with local origin — re-read disk defensively and forward to
//!    the peer unless the ledger says the peer already has it.
//! 4. `Change` with remote origin — apply to disk, stamp the remote
//!    modification time, record it in the ledger.
//!
//! # Echo Suppression
//!
//! Applying a remote write records the stamped time in [`PathState`] on the
//! same task, before the local watcher's notification for that write can
//! reach the queue. When the echo arrives, its re-read modification time
//! equals the recorded one and the send is suppressed.
//!
//! # Failure Policy
//!
//! A path missing at re-read time is a benign race with an in-flight delete:
//! logged, dropped, loop continues. Any other failure aborts the loop — the
//! worker reports it through its exit channel and the owning session is torn
//! down and rebuilt, not retried per notification.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, Instrument};

use crate::error::Result;
use crate::fs::FileAccess;
use crate::metrics;
use crate::outbound::OutboundSink;
use crate::path_state::PathState;
use crate::queue::{ChangeKind, ChangeNotification, EngineMessage, Origin};

/// What a handled message means for the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopOutcome {
    Continue,
    Stop,
}

/// Everything the worker owns exclusively: the queue receiver, the ledger,
/// the outbound sink, and the filesystem handle.
pub(crate) struct EngineCore<F: FileAccess, O: OutboundSink> {
    pub(crate) queue_rx: mpsc::UnboundedReceiver<EngineMessage>,
    pub(crate) fs: Arc<F>,
    pub(crate) outgoing: O,
    pub(crate) path_state: PathState,
}

/// Worker entry point. Runs until the sentinel, queue closure, or a fatal
/// error, then reports the terminal result through `done`.
pub(crate) async fn run<F: FileAccess, O: OutboundSink>(
    mut core: EngineCore<F, O>,
    shutdown: watch::Receiver<bool>,
    done: oneshot::Sender<Result<()>>,
) {
    let span = tracing::info_span!("sync_loop");
    async move {
        info!("sync loop started");
        let result = drive(&mut core, &shutdown).await;
        match result {
            Ok(()) => info!("sync loop stopped"),
            Err(ref e) => error!(error = %e, "sync loop terminated on unexpected failure"),
        }
        let _ = done.send(result);
    }
    .instrument(span)
    .await
}

async fn drive<F: FileAccess, O: OutboundSink>(
    core: &mut EngineCore<F, O>,
    shutdown: &watch::Receiver<bool>,
) -> Result<()> {
    loop {
        let Some(message) = core.queue_rx.recv().await else {
            // Every sender is gone; nothing further can arrive.
            info!("notification queue closed, completing outbound stream");
            core.outgoing.complete().await?;
            return Ok(());
        };
        if *shutdown.borrow() && !matches!(message, EngineMessage::Shutdown) {
            // stop() abandons whatever was queued ahead of the sentinel.
            metrics::record_discarded();
            continue;
        }
        if core.handle(message).await? == LoopOutcome::Stop {
            return Ok(());
        }
    }
}

impl<F: FileAccess, O: OutboundSink> EngineCore<F, O> {
    /// Handle one queue message; semantics of exactly one loop iteration.
    pub(crate) async fn handle(&mut self, message: EngineMessage) -> Result<LoopOutcome> {
        match message {
            EngineMessage::Shutdown => {
                self.outgoing.complete().await?;
                Ok(LoopOutcome::Stop)
            }
            EngineMessage::Status(text) => {
                info!(status = %text, "peer status");
                metrics::record_status();
                Ok(LoopOutcome::Continue)
            }
            EngineMessage::Change(change) => {
                metrics::record_change(change.origin.as_str(), change.kind.label());
                match change.origin {
                    Origin::Local => self.handle_local(change).await?,
                    Origin::Remote => self.handle_remote(change).await?,
                }
                Ok(LoopOutcome::Continue)
            }
        }
    }

    // =========================================================================
    // Local origin: decide whether the peer needs this, then forward
    // =========================================================================

    async fn handle_local(&mut self, change: ChangeNotification) -> Result<()> {
        debug!(path = %change.path, kind = change.kind.label(), "local change");
        match change.kind {
            ChangeKind::Symlink { .. } => self.local_symlink(&change.path).await,
            ChangeKind::Delete => self.local_delete(&change.path).await,
            ChangeKind::File { .. } => self.local_file(&change.path).await,
        }
    }

    async fn local_file(&mut self, path: &str) -> Result<()> {
        // Re-read from disk: the event may be stale by handling time.
        let mod_time_ms = match self.fs.modified_time(path).await {
            Ok(t) => t,
            Err(e) if e.is_not_found() => {
                debug!(path, "local file was not found, assuming deleted");
                metrics::record_race_drop("file");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if !self.path_state.needs_update(path, mod_time_ms) {
            debug!(path, mod_time_ms, "peer already has this write, suppressing");
            metrics::record_suppressed("file");
            return Ok(());
        }
        let data = match self.fs.read(path).await {
            Ok(d) => d,
            Err(e) if e.is_not_found() => {
                debug!(path, "local file was not found, assuming deleted");
                metrics::record_race_drop("file");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        self.outgoing
            .deliver(ChangeNotification::remote_file(path, data, mod_time_ms))
            .await?;
        self.path_state.record(path, mod_time_ms);
        metrics::record_sent("file");
        Ok(())
    }

    async fn local_symlink(&mut self, path: &str) -> Result<()> {
        let mod_time_ms = match self.fs.modified_time(path).await {
            Ok(t) => t,
            Err(e) if e.is_not_found() => {
                debug!(path, "local symlink was not found, assuming deleted");
                metrics::record_race_drop("symlink");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if !self.path_state.needs_update(path, mod_time_ms) {
            debug!(path, mod_time_ms, "peer already has this write, suppressing");
            metrics::record_suppressed("symlink");
            return Ok(());
        }
        // Re-read the target too, in case it changed since the event fired.
        let target = match self.fs.read_symlink(path).await {
            Ok(t) => t,
            Err(e) if e.is_not_found() => {
                debug!(path, "local symlink was not found, assuming deleted");
                metrics::record_race_drop("symlink");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        self.outgoing
            .deliver(ChangeNotification::remote_symlink(path, target, mod_time_ms))
            .await?;
        self.path_state.record(path, mod_time_ms);
        metrics::record_sent("symlink");
        Ok(())
    }

    async fn local_delete(&mut self, path: &str) -> Result<()> {
        // Double confirmation: the path must still be absent on disk AND not
        // already tombstoned, or we'd race a delete-then-recreate sequence.
        if self.fs.exists(path).await? {
            debug!(path, "path exists again, dropping stale delete");
            metrics::record_race_drop("delete");
            return Ok(());
        }
        if !self.path_state.needs_deleted(path) {
            debug!(path, "peer already deleted this path, suppressing");
            metrics::record_suppressed("delete");
            return Ok(());
        }
        self.outgoing
            .deliver(ChangeNotification::remote_delete(path))
            .await?;
        self.path_state.record_deleted(path);
        metrics::record_sent("delete");
        Ok(())
    }

    // =========================================================================
    // Remote origin: apply to disk, then record the stamped time
    // =========================================================================

    async fn handle_remote(&mut self, change: ChangeNotification) -> Result<()> {
        debug!(path = %change.path, kind = change.kind.label(), "remote change");
        match change.kind {
            ChangeKind::Symlink {
                target,
                mod_time_ms,
            } => self.remote_symlink(&change.path, &target, mod_time_ms).await,
            ChangeKind::Delete => self.remote_delete(&change.path).await,
            ChangeKind::File { data, mod_time_ms } => {
                self.remote_file(&change.path, data, mod_time_ms).await
            }
        }
    }

    async fn remote_file(&mut self, path: &str, data: Vec<u8>, mod_time_ms: i64) -> Result<()> {
        self.fs.write(path, data).await?;
        self.fs.set_modified_time(path, mod_time_ms).await?;
        // Record on this task, before the watcher can echo our own write.
        self.path_state.record(path, mod_time_ms);
        metrics::record_applied("file");
        Ok(())
    }

    async fn remote_symlink(&mut self, path: &str, target: &str, mod_time_ms: i64) -> Result<()> {
        self.fs.create_symlink(path, target).await?;
        // Stamp the link itself so the echoed local event carries this time.
        self.fs.set_modified_time(path, mod_time_ms).await?;
        self.path_state.record(path, mod_time_ms);
        metrics::record_applied("symlink");
        Ok(())
    }

    async fn remote_delete(&mut self, path: &str) -> Result<()> {
        match self.fs.delete(path).await {
            Ok(()) => {}
            // Already gone locally; applying a delete twice is fine.
            Err(e) if e.is_not_found() => {
                debug!(path, "path already deleted locally");
            }
            Err(e) => return Err(e),
        }
        self.path_state.record_deleted(path);
        metrics::record_applied("delete");
        Ok(())
    }
}
