//! Shared test doubles for the integration suite.
//!
//! Records what the engine sends and lets tests hold the worker mid-apply
//! to probe shutdown semantics deterministically.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};

use bisync_engine::error::BoxFuture;
use bisync_engine::{ChangeNotification, FileAccess, InMemoryFileAccess, OutboundSink, SyncError};

/// Sink that records every delivery and completion for assertions.
pub struct RecordingSink {
    delivered: Arc<Mutex<Vec<ChangeNotification>>>,
    completions: Arc<AtomicUsize>,
}

/// Assertion handle for a [`RecordingSink`] that was moved into an engine.
#[derive(Clone)]
pub struct SinkRecorder {
    delivered: Arc<Mutex<Vec<ChangeNotification>>>,
    completions: Arc<AtomicUsize>,
}

/// Create a recording sink plus its assertion handle.
pub fn recording_sink() -> (RecordingSink, SinkRecorder) {
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let completions = Arc::new(AtomicUsize::new(0));
    (
        RecordingSink {
            delivered: Arc::clone(&delivered),
            completions: Arc::clone(&completions),
        },
        SinkRecorder {
            delivered,
            completions,
        },
    )
}

impl SinkRecorder {
    /// Everything delivered so far.
    pub async fn delivered(&self) -> Vec<ChangeNotification> {
        self.delivered.lock().await.clone()
    }

    /// Number of deliveries so far.
    pub async fn delivery_count(&self) -> usize {
        self.delivered.lock().await.len()
    }

    /// Number of `complete()` calls so far.
    pub fn completions(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }
}

impl OutboundSink for RecordingSink {
    fn deliver(&mut self, update: ChangeNotification) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.completions.load(Ordering::SeqCst) > 0 {
                return Err(SyncError::Outbound(
                    "delivery after completion".to_string(),
                ));
            }
            self.delivered.lock().await.push(update);
            Ok(())
        })
    }

    fn complete(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.completions.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// [`FileAccess`] wrapper whose `modified_time` calls each consume a gate
/// permit, so a test can hold the worker mid-notification and release it at
/// a chosen moment. All other operations pass straight through.
pub struct GatedFileAccess {
    inner: Arc<InMemoryFileAccess>,
    gate: Arc<Semaphore>,
}

impl GatedFileAccess {
    /// Wrap `inner` behind a gate that starts with no permits.
    pub fn new(inner: Arc<InMemoryFileAccess>) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        (
            Self {
                inner,
                gate: Arc::clone(&gate),
            },
            gate,
        )
    }
}

impl FileAccess for GatedFileAccess {
    fn modified_time(&self, path: &str) -> BoxFuture<'_, i64> {
        let path = path.to_string();
        Box::pin(async move {
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| SyncError::Internal("gate closed".to_string()))?;
            permit.forget();
            self.inner.modified_time(&path).await
        })
    }

    fn read(&self, path: &str) -> BoxFuture<'_, Vec<u8>> {
        let path = path.to_string();
        Box::pin(async move { self.inner.read(&path).await })
    }

    fn write(&self, path: &str, data: Vec<u8>) -> BoxFuture<'_, ()> {
        let path = path.to_string();
        Box::pin(async move { self.inner.write(&path, data).await })
    }

    fn exists(&self, path: &str) -> BoxFuture<'_, bool> {
        let path = path.to_string();
        Box::pin(async move { self.inner.exists(&path).await })
    }

    fn delete(&self, path: &str) -> BoxFuture<'_, ()> {
        let path = path.to_string();
        Box::pin(async move { self.inner.delete(&path).await })
    }

    fn read_symlink(&self, path: &str) -> BoxFuture<'_, String> {
        let path = path.to_string();
        Box::pin(async move { self.inner.read_symlink(&path).await })
    }

    fn create_symlink(&self, path: &str, target: &str) -> BoxFuture<'_, ()> {
        let path = path.to_string();
        let target = target.to_string();
        Box::pin(async move { self.inner.create_symlink(&path, &target).await })
    }

    fn set_modified_time(&self, path: &str, mod_time_ms: i64) -> BoxFuture<'_, ()> {
        let path = path.to_string();
        Box::pin(async move { self.inner.set_modified_time(&path, mod_time_ms).await })
    }
}

/// Install a test-writer tracing subscriber (idempotent across tests).
#[allow(dead_code)] // Not every test file pulls this in.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
