//! Engine lifecycle states.
//!
//! # State Transitions
//!
//! ```text
//!            start()              stop()
//! Created ────────────► Running ─────────► Stopping ───► Stopped
//!                          │                                ▲
//!                          │ (unexpected failure            │ (clean exit)
//!                          ▼  in the dispatch loop)         │
//!                       Failed ◄────────────────────────────┘
//! ```
//!
//! `Failed` is terminal: the session is expected to be torn down and rebuilt
//! (reconnect plus fresh initial sync), not restarted in place.

/// State of the sync engine.
///
/// Broadcast over a watch channel; see module docs for the transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Engine created but the worker has not been started.
    Created,

    /// The worker is draining the notification queue.
    Running,

    /// `stop()` was called; waiting for the worker to observe the sentinel.
    Stopping,

    /// Clean shutdown complete.
    Stopped,

    /// The dispatch loop terminated on an unexpected failure.
    Failed,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Created => write!(f, "Created"),
            EngineState::Running => write!(f, "Running"),
            EngineState::Stopping => write!(f, "Stopping"),
            EngineState::Stopped => write!(f, "Stopped"),
            EngineState::Failed => write!(f, "Failed"),
        }
    }
}
