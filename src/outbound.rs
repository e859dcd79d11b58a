//! Outbound delivery seam.
//!
//! Everything the engine decides to send to the peer goes through an
//! [`OutboundSink`]. The sink is owned and called only by the single worker,
//! so methods take `&mut self` and need no internal locking.
//!
//! The transport is an external collaborator; [`ChannelSink`] hands
//! deliveries to whatever task drains the channel (the network sender in a
//! daemon, a loopback in tests), and [`NullSink`] discards them for
//! standalone/dry-run wiring.

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{BoxFuture, Result, SyncError};
use crate::queue::ChangeNotification;

/// Where outbound notifications go.
///
/// `complete()` is called exactly once, when the engine observes the
/// shutdown sentinel (or its queue closes); after that no further
/// deliveries are made.
pub trait OutboundSink: Send + 'static {
    /// Deliver one notification to the peer.
    fn deliver(&mut self, update: ChangeNotification) -> BoxFuture<'_, ()>;

    /// Signal that no further notifications will follow.
    fn complete(&mut self) -> BoxFuture<'_, ()>;
}

/// Sink that forwards deliveries into an mpsc channel.
///
/// Completion closes the channel, so the draining task observes end of
/// stream as `recv() == None`.
#[derive(Debug)]
pub struct ChannelSink {
    tx: Option<mpsc::UnboundedSender<ChangeNotification>>,
}

impl ChannelSink {
    /// Create a sink and the receiving half the transport drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChangeNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }
}

impl OutboundSink for ChannelSink {
    fn deliver(&mut self, update: ChangeNotification) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            match &self.tx {
                Some(tx) => tx
                    .send(update)
                    .map_err(|_| SyncError::Outbound("peer channel closed".to_string())),
                None => Err(SyncError::Outbound(
                    "delivery after completion".to_string(),
                )),
            }
        })
    }

    fn complete(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            match self.tx.take() {
                Some(_) => Ok(()),
                None => Err(SyncError::Outbound(
                    "completion already signalled".to_string(),
                )),
            }
        })
    }
}

/// Sink that logs and discards everything (standalone/dry-run mode).
#[derive(Debug, Default, Clone)]
pub struct NullSink;

impl OutboundSink for NullSink {
    fn deliver(&mut self, update: ChangeNotification) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            debug!(
                path = %update.path,
                kind = update.kind.label(),
                "null sink: discarding outbound notification"
            );
            Ok(())
        })
    }

    fn complete(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            debug!("null sink: completed");
            Ok(())
        })
    }
}
