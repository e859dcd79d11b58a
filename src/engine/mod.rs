// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The sync engine: lifecycle around the dispatch loop.
//!
//! [`SyncEngine`] owns the notification queue and hands out cloneable
//! [`QueueSender`] handles to the two producers (filesystem watcher, network
//! receiver). Exactly one worker task drains the queue; the ledger and the
//! outbound sink are touched only by that worker, so the engine's own state
//! needs no locking.
//!
//! # Lifecycle
//!
//! 1. [`new()`](SyncEngine::new) — engine in `Created`, queue open.
//! 2. [`seed()`](SyncEngine::seed) — merge the initial-sync snapshot into the
//!    ledger (before `start()` only).
//! 3. [`start()`](SyncEngine::start) — spawn the worker; non-blocking.
//! 4. [`stop()`](SyncEngine::stop) — flip the stop flag, abandon anything
//!    still queued, inject the shutdown sentinel, and block until the worker
//!    has completed the sink and exited.
//!
//! For deterministic tests, skip `start()` and drive the queue one message at
//! a time with [`process_one()`](SyncEngine::process_one).

mod dispatch;
mod types;

pub use types::EngineState;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::info;

use crate::error::{Result, SyncError};
use crate::fs::FileAccess;
use crate::metrics;
use crate::outbound::OutboundSink;
use crate::path_state::PathState;
use crate::queue::{EngineMessage, QueueSender};

use dispatch::EngineCore;

/// Steady-state sync engine for one local/remote pair.
///
/// Generic over the filesystem seam and the outbound sink so the dispatch
/// policy can be tested without disk or network.
pub struct SyncEngine<F: FileAccess, O: OutboundSink> {
    /// Worker-owned internals; `None` once the worker has been started.
    core: Option<EngineCore<F, O>>,

    /// Sender kept for sentinel injection (and to keep the queue open).
    queue_tx: mpsc::UnboundedSender<EngineMessage>,

    /// Stop intent, observed by the worker when discarding queued messages.
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,

    /// Engine state (broadcast to watchers).
    state_tx: watch::Sender<EngineState>,
    state_rx: watch::Receiver<EngineState>,

    /// Worker handle and its exit report, present while running.
    worker: Option<JoinHandle<()>>,
    done_rx: Option<oneshot::Receiver<Result<()>>>,
}

impl<F: FileAccess, O: OutboundSink> SyncEngine<F, O> {
    /// Create an engine in `Created` state.
    ///
    /// `outgoing` receives everything this engine decides to send;
    /// `fs` is the local tree the engine reads and applies to.
    pub fn new(outgoing: O, fs: Arc<F>) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(EngineState::Created);

        Self {
            core: Some(EngineCore {
                queue_rx,
                fs,
                outgoing,
                path_state: PathState::new(),
            }),
            queue_tx,
            shutdown_tx,
            shutdown_rx,
            state_tx,
            state_rx,
            worker: None,
            done_rx: None,
        }
    }

    /// Producer handle for the notification queue.
    ///
    /// Clone one per producer (filesystem watcher, network receiver).
    pub fn producer(&self) -> QueueSender {
        QueueSender::new(self.queue_tx.clone())
    }

    /// Current engine state.
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// A receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    /// Check if the worker is running.
    pub fn is_running(&self) -> bool {
        matches!(self.state(), EngineState::Running)
    }

    /// A receiver of the engine's stop flag, e.g. for cancelling a
    /// [`block_until_connected`](crate::connection::ConnectionDetector::block_until_connected)
    /// wait tied to this engine's lifetime.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Merge the initial-sync snapshot into the ledger.
    ///
    /// Must be called before [`start()`](Self::start); the ledger belongs to
    /// the worker afterwards.
    pub fn seed(&mut self, snapshot: PathState) -> Result<()> {
        match self.core.as_mut() {
            Some(core) => {
                core.path_state.merge(snapshot);
                Ok(())
            }
            None => Err(SyncError::InvalidState {
                expected: EngineState::Created.to_string(),
                actual: self.state().to_string(),
            }),
        }
    }

    /// Launch the worker task. Non-blocking.
    pub fn start(&mut self) -> Result<()> {
        if self.state() != EngineState::Created {
            return Err(SyncError::InvalidState {
                expected: EngineState::Created.to_string(),
                actual: self.state().to_string(),
            });
        }
        let core = self.core.take().ok_or_else(|| SyncError::InvalidState {
            expected: EngineState::Created.to_string(),
            actual: EngineState::Running.to_string(),
        })?;

        let (done_tx, done_rx) = oneshot::channel();
        self.done_rx = Some(done_rx);

        let _ = self.state_tx.send(EngineState::Running);
        metrics::set_engine_state("Running");
        info!("starting sync engine");

        let shutdown_rx = self.shutdown_rx.clone();
        self.worker = Some(tokio::spawn(dispatch::run(core, shutdown_rx, done_tx)));
        Ok(())
    }

    /// Stop the engine and block until the worker has exited.
    ///
    /// Anything still queued is abandoned, never applied: the stop flag is
    /// flipped before the sentinel is enqueued, and the worker discards every
    /// message it receives between the flip and the sentinel. The sink is
    /// completed exactly once, by the worker, before it exits.
    ///
    /// Only valid from `Running`; at most one stop may be in flight. Returns
    /// the worker's terminal result — an `Err` means the loop had already
    /// died on an unexpected failure and the session needs a rebuild.
    pub async fn stop(&mut self) -> Result<()> {
        if self.state() != EngineState::Running {
            return Err(SyncError::InvalidState {
                expected: EngineState::Running.to_string(),
                actual: self.state().to_string(),
            });
        }
        info!("stopping sync engine");
        let _ = self.state_tx.send(EngineState::Stopping);
        metrics::set_engine_state("Stopping");

        let _ = self.shutdown_tx.send(true);
        // Send may fail if the worker already died; the exit report below
        // will carry the reason.
        let _ = self.queue_tx.send(EngineMessage::Shutdown);

        if let Some(handle) = self.worker.take() {
            if let Err(e) = handle.await {
                let _ = self.state_tx.send(EngineState::Failed);
                metrics::set_engine_state("Failed");
                return Err(SyncError::Internal(format!("sync worker panicked: {e}")));
            }
        }

        let result = match self.done_rx.take() {
            Some(done_rx) => done_rx.await.unwrap_or_else(|_| {
                Err(SyncError::Internal(
                    "sync worker exited without reporting".to_string(),
                ))
            }),
            None => Ok(()),
        };

        match result {
            Ok(()) => {
                let _ = self.state_tx.send(EngineState::Stopped);
                metrics::set_engine_state("Stopped");
                info!("sync engine stopped");
                Ok(())
            }
            Err(e) => {
                let _ = self.state_tx.send(EngineState::Failed);
                metrics::set_engine_state("Failed");
                Err(e)
            }
        }
    }

    /// Synchronous test variant: handle at most one queued message, with
    /// semantics identical to one loop iteration.
    ///
    /// Returns `Ok(true)` if a message was handled, `Ok(false)` if the queue
    /// was empty. Unavailable once [`start()`](Self::start) has taken the
    /// queue.
    pub async fn process_one(&mut self) -> Result<bool> {
        let actual = self.state().to_string();
        let core = self.core.as_mut().ok_or_else(|| SyncError::InvalidState {
            expected: EngineState::Created.to_string(),
            actual,
        })?;
        match core.queue_rx.try_recv() {
            Ok(message) => {
                // LoopOutcome::Stop only matters to the background loop.
                let _ = core.handle(message).await?;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    /// Read-only view of the ledger, for assertions in tests and
    /// diagnostics. Unavailable while the worker is running.
    pub fn path_state(&self) -> Option<&PathState> {
        self.core.as_ref().map(|core| &core.path_state)
    }
}
