//! # Bisync Engine
//!
//! Steady-state core of a continuous bidirectional file-synchronization
//! daemon: after an initial full sync has reconciled a local tree and a
//! remote peer's tree, this crate keeps them converged.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                            bisync-engine                             │
//! │                                                                      │
//! │  fs watcher ──┐                                                      │
//! │               ├──► mpsc queue ──► SyncEngine worker ──► OutboundSink │
//! │  net receiver─┘                   │         │                        │
//! │                                   ▼         ▼                        │
//! │                               FileAccess  PathState                  │
//! │                               (local disk) (echo-suppression ledger) │
//! │                                                                      │
//! │  ConnectionDetector ── ping/retry gate around reconnection           │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Two producers push [`ChangeNotification`]s into the queue; one worker
//! drains it in arrival order, classifies each change by origin and kind,
//! consults the [`PathState`] ledger to suppress echoes of its own writes,
//! and either applies the change locally or forwards it to the peer.
//! Conflicts resolve by modification-time equality against the single
//! remembered time per path (last-write-wins); there is no content merge.
//!
//! The initial tree scan, the transport, and the process entry point are
//! external collaborators behind the [`FileAccess`], [`OutboundSink`], and
//! [`PeerPing`] seams.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bisync_engine::{ChannelSink, DiskFileAccess, PathState, SyncEngine};
//!
//! #[tokio::main]
//! async fn main() -> bisync_engine::Result<()> {
//!     let fs = Arc::new(DiskFileAccess::new("/data/tree"));
//!     let (sink, _outbound_rx) = ChannelSink::new(); // drained by the transport
//!
//!     let mut engine = SyncEngine::new(sink, fs);
//!     let producer = engine.producer(); // clone per producer thread
//!
//!     engine.seed(PathState::new())?; // snapshot from the initial sync
//!     engine.start()?;
//!     // ... producers push change notifications ...
//!     engine.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod connection;
pub mod engine;
pub mod error;
pub mod fs;
pub mod metrics;
pub mod outbound;
pub mod path_state;
pub mod queue;

// Re-exports for convenience
pub use connection::{ConnectionDetector, DetectorConfig, NoopDetector, PeerPing, PingDetector};
pub use engine::{EngineState, SyncEngine};
pub use error::{Result, SyncError};
pub use fs::{DiskFileAccess, FileAccess, InMemoryFileAccess};
pub use outbound::{ChannelSink, NullSink, OutboundSink};
pub use path_state::{PathMark, PathState};
pub use queue::{ChangeKind, ChangeNotification, Origin, QueueSender};
