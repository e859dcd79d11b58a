// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Integration tests over the public API.
//!
//! The deterministic policy tests drive the queue one message at a time with
//! `process_one()`; the lifecycle tests run the real background worker.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{recording_sink, GatedFileAccess};

use bisync_engine::{
    ChangeKind, ChangeNotification, ChannelSink, EngineState, InMemoryFileAccess, Origin,
    PathMark, PathState, SyncEngine,
};

fn process_one_engine() -> (
    SyncEngine<InMemoryFileAccess, ChannelSink>,
    Arc<InMemoryFileAccess>,
    tokio::sync::mpsc::UnboundedReceiver<ChangeNotification>,
) {
    let fs = Arc::new(InMemoryFileAccess::new());
    let (sink, sink_rx) = ChannelSink::new();
    let engine = SyncEngine::new(sink, Arc::clone(&fs));
    (engine, fs, sink_rx)
}

// =============================================================================
// Spec scenarios, driven deterministically through process_one()
// =============================================================================

#[tokio::test]
async fn scenario_a_local_write_goes_out_with_fresh_content() {
    common::init_tracing();
    let (mut engine, fs, mut sink_rx) = process_one_engine();
    fs.insert_file("/a.txt", b"hi".to_vec(), 5).await;

    let producer = engine.producer();
    producer
        .push(ChangeNotification::local_file("/a.txt", 5))
        .expect("push");
    assert!(engine.process_one().await.expect("process"));

    let sent = sink_rx.try_recv().expect("outbound notification");
    assert_eq!(sent.path, "/a.txt");
    assert_eq!(sent.origin, Origin::Remote);
    assert_eq!(
        sent.kind,
        ChangeKind::File {
            data: b"hi".to_vec(),
            mod_time_ms: 5
        }
    );
    assert_eq!(
        engine.path_state().expect("ledger").get("/a.txt"),
        Some(PathMark::Synced(5))
    );
}

#[tokio::test]
async fn scenario_b_remote_write_is_applied_and_stamped() {
    let (mut engine, fs, _sink_rx) = process_one_engine();

    let producer = engine.producer();
    producer
        .push(ChangeNotification::remote_file("/a.txt", b"bye".to_vec(), 7))
        .expect("push");
    assert!(engine.process_one().await.expect("process"));

    assert_eq!(fs.file("/a.txt").await, Some((b"bye".to_vec(), 7)));
    assert_eq!(
        engine.path_state().expect("ledger").get("/a.txt"),
        Some(PathMark::Synced(7))
    );
}

#[tokio::test]
async fn echo_of_remote_apply_is_suppressed() {
    let (mut engine, _fs, mut sink_rx) = process_one_engine();
    let producer = engine.producer();

    producer
        .push(ChangeNotification::remote_file("/a.txt", b"bye".to_vec(), 7))
        .expect("push");
    assert!(engine.process_one().await.expect("apply"));

    // The local watcher reports the write this engine just made.
    producer
        .push(ChangeNotification::local_file("/a.txt", 7))
        .expect("push");
    assert!(engine.process_one().await.expect("echo"));

    assert!(sink_rx.try_recv().is_err(), "echo must not be re-sent");
}

#[tokio::test]
async fn idempotent_remote_apply() {
    let (mut engine, fs, _sink_rx) = process_one_engine();
    let producer = engine.producer();
    let change = ChangeNotification::remote_file("/a.txt", b"bye".to_vec(), 7);

    producer.push(change.clone()).expect("push");
    assert!(engine.process_one().await.expect("first apply"));
    let after_once = fs.file("/a.txt").await;

    producer.push(change).expect("push");
    assert!(engine.process_one().await.expect("second apply"));
    let after_twice = fs.file("/a.txt").await;

    assert_eq!(after_once, after_twice);
}

#[tokio::test]
async fn delete_race_recreated_path_sends_nothing() {
    let (mut engine, fs, mut sink_rx) = process_one_engine();
    // Deleted and recreated before the delete event is handled.
    fs.insert_file("/a.txt", b"back".to_vec(), 9).await;

    let producer = engine.producer();
    producer
        .push(ChangeNotification::local_delete("/a.txt"))
        .expect("push");
    assert!(engine.process_one().await.expect("process"));

    assert!(sink_rx.try_recv().is_err(), "no outbound delete");
    assert_eq!(engine.path_state().expect("ledger").get("/a.txt"), None);
}

#[tokio::test]
async fn missing_file_race_drops_silently() {
    let (mut engine, _fs, mut sink_rx) = process_one_engine();

    let producer = engine.producer();
    producer
        .push(ChangeNotification::local_file("/vanished.txt", 5))
        .expect("push");

    // No propagated failure, no outbound send.
    assert!(engine.process_one().await.expect("benign race"));
    assert!(sink_rx.try_recv().is_err());
}

#[tokio::test]
async fn lww_equality_limitation_resends_old_time() {
    let (mut engine, fs, mut sink_rx) = process_one_engine();
    let producer = engine.producer();

    // Local write at T1.
    fs.insert_file("/a.txt", b"v1".to_vec(), 1).await;
    producer
        .push(ChangeNotification::local_file("/a.txt", 1))
        .expect("push");
    assert!(engine.process_one().await.expect("send T1"));
    assert!(sink_rx.try_recv().is_ok());

    // Remote write at T2 != T1 overwrites the remembered time.
    producer
        .push(ChangeNotification::remote_file("/a.txt", b"v2".to_vec(), 2))
        .expect("push");
    assert!(engine.process_one().await.expect("apply T2"));

    // A repeat local notification at T1 is sent again — the ledger keeps a
    // single time and compares by equality, so T1 looks new once more.
    fs.insert_file("/a.txt", b"v1".to_vec(), 1).await;
    producer
        .push(ChangeNotification::local_file("/a.txt", 1))
        .expect("push");
    assert!(engine.process_one().await.expect("resend T1"));

    let resent = sink_rx.try_recv().expect("the resend must occur");
    assert_eq!(resent.kind.mod_time_ms(), Some(1));
}

#[tokio::test]
async fn seeded_snapshot_suppresses_known_writes() {
    let (mut engine, fs, mut sink_rx) = process_one_engine();

    let mut snapshot = PathState::new();
    snapshot.record("/a.txt", 5);
    engine.seed(snapshot).expect("seed");

    fs.insert_file("/a.txt", b"hi".to_vec(), 5).await;
    let producer = engine.producer();
    producer
        .push(ChangeNotification::local_file("/a.txt", 5))
        .expect("push");
    assert!(engine.process_one().await.expect("process"));

    assert!(sink_rx.try_recv().is_err(), "seeded write must be suppressed");
}

#[tokio::test]
async fn status_messages_are_log_only() {
    let (mut engine, fs, mut sink_rx) = process_one_engine();

    let producer = engine.producer();
    producer.push_status("peer resumed after restart").expect("status");
    assert!(engine.process_one().await.expect("process"));

    assert!(sink_rx.try_recv().is_err());
    assert!(fs.is_empty().await);
    assert!(engine.path_state().expect("ledger").is_empty());
}

#[tokio::test]
async fn local_symlink_sends_current_target() {
    let (mut engine, fs, mut sink_rx) = process_one_engine();
    // Target changed between the event and handling; the fresh one wins.
    fs.insert_symlink("/l", "/fresh-target", 7).await;

    let producer = engine.producer();
    producer
        .push(ChangeNotification::local_symlink("/l", 7))
        .expect("push");
    assert!(engine.process_one().await.expect("process"));

    let sent = sink_rx.try_recv().expect("outbound symlink");
    assert_eq!(
        sent.kind,
        ChangeKind::Symlink {
            target: "/fresh-target".to_string(),
            mod_time_ms: 7
        }
    );
}

#[tokio::test]
async fn remote_symlink_applied_and_echo_suppressed() {
    let (mut engine, fs, mut sink_rx) = process_one_engine();
    let producer = engine.producer();

    producer
        .push(ChangeNotification::remote_symlink("/l", "/target", 7))
        .expect("push");
    assert!(engine.process_one().await.expect("apply"));
    assert_eq!(fs.symlink("/l").await, Some(("/target".to_string(), 7)));

    // The stamped link echoes back at the same time; nothing goes out.
    producer
        .push(ChangeNotification::local_symlink("/l", 7))
        .expect("push");
    assert!(engine.process_one().await.expect("echo"));
    assert!(sink_rx.try_recv().is_err());
}

// =============================================================================
// Lifecycle with the background worker
// =============================================================================

#[tokio::test]
async fn worker_processes_and_stop_completes_exactly_once() {
    common::init_tracing();
    let fs = Arc::new(InMemoryFileAccess::new());
    fs.insert_file("/a.txt", b"hi".to_vec(), 5).await;
    let (sink, recorder) = recording_sink();
    let mut engine = SyncEngine::new(sink, Arc::clone(&fs));

    let producer = engine.producer();
    engine.start().expect("start");
    assert_eq!(engine.state(), EngineState::Running);

    producer
        .push(ChangeNotification::local_file("/a.txt", 5))
        .expect("push");

    // Wait for the worker to drain the notification.
    let mut seen = false;
    for _ in 0..200 {
        if recorder.delivery_count().await == 1 {
            seen = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(seen, "worker never delivered the change");

    engine.stop().await.expect("stop");
    assert_eq!(engine.state(), EngineState::Stopped);
    assert_eq!(recorder.completions(), 1);

    // Pushing after shutdown fails fast once the worker is gone and the
    // engine dropped; while the engine is alive the push is accepted but
    // never applied. Either way nothing more is delivered.
    let _ = producer.push(ChangeNotification::local_file("/a.txt", 5));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(recorder.delivery_count().await, 1);
}

#[tokio::test]
async fn stop_discards_queued_notifications() {
    common::init_tracing();
    let inner = Arc::new(InMemoryFileAccess::new());
    inner.insert_file("/a.txt", b"a".to_vec(), 1).await;
    inner.insert_file("/b.txt", b"b".to_vec(), 2).await;
    inner.insert_file("/c.txt", b"c".to_vec(), 3).await;

    let (gated, gate) = GatedFileAccess::new(Arc::clone(&inner));
    let (sink, recorder) = recording_sink();
    let mut engine = SyncEngine::new(sink, Arc::new(gated));

    let producer = engine.producer();
    engine.start().expect("start");

    // The worker picks up /a.txt and parks on the gate mid-apply.
    producer
        .push(ChangeNotification::local_file("/a.txt", 1))
        .expect("push");
    // These two sit in the queue behind it.
    producer
        .push(ChangeNotification::local_file("/b.txt", 2))
        .expect("push");
    producer
        .push(ChangeNotification::local_file("/c.txt", 3))
        .expect("push");

    // stop() flips the stop flag and enqueues the sentinel, then blocks.
    let stop_task = tokio::spawn(async move {
        let result = engine.stop().await;
        (engine, result)
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Queued after stop() but before the sentinel was drained.
    producer
        .push(ChangeNotification::local_file("/c.txt", 3))
        .expect("push");

    // Release the worker: /a.txt finishes, /b.txt and /c.txt are discarded,
    // the sentinel completes the sink.
    gate.add_permits(100);

    let (engine, result) = stop_task.await.expect("join");
    result.expect("stop");
    assert_eq!(engine.state(), EngineState::Stopped);

    let delivered = recorder.delivered().await;
    assert_eq!(delivered.len(), 1, "only the in-flight change was applied");
    assert_eq!(delivered[0].path, "/a.txt");
    assert_eq!(recorder.completions(), 1);
}

#[tokio::test]
async fn two_engines_converge_without_echo() {
    common::init_tracing();
    let fs_a = Arc::new(InMemoryFileAccess::new());
    let fs_b = Arc::new(InMemoryFileAccess::new());

    let (sink_a, mut out_a) = ChannelSink::new();
    let (sink_b, mut out_b) = ChannelSink::new();

    let mut engine_a = SyncEngine::new(sink_a, Arc::clone(&fs_a));
    let mut engine_b = SyncEngine::new(sink_b, Arc::clone(&fs_b));

    let producer_a = engine_a.producer();
    let producer_b = engine_b.producer();

    // Loopback transport: whatever A sends becomes a remote-origin
    // notification on B's queue, and vice versa.
    let sent_by_a = Arc::new(AtomicUsize::new(0));
    let sent_by_b = Arc::new(AtomicUsize::new(0));
    {
        let counter = Arc::clone(&sent_by_a);
        let into_b = producer_b.clone();
        tokio::spawn(async move {
            while let Some(update) = out_a.recv().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = into_b.push(update);
            }
        });
    }
    {
        let counter = Arc::clone(&sent_by_b);
        let into_a = producer_a.clone();
        tokio::spawn(async move {
            while let Some(update) = out_b.recv().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = into_a.push(update);
            }
        });
    }

    engine_a.start().expect("start a");
    engine_b.start().expect("start b");

    // A local write on side A...
    fs_a.insert_file("/doc.txt", b"hello".to_vec(), 5).await;
    producer_a
        .push(ChangeNotification::local_file("/doc.txt", 5))
        .expect("push");

    // ...converges onto side B with the same content and stamp.
    let mut converged = false;
    for _ in 0..200 {
        if fs_b.file("/doc.txt").await == Some((b"hello".to_vec(), 5)) {
            converged = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(converged, "side B never converged");

    // B's watcher echoes the applied write; B must stay silent.
    producer_b
        .push(ChangeNotification::local_file("/doc.txt", 5))
        .expect("push");
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(sent_by_a.load(Ordering::SeqCst), 1);
    assert_eq!(sent_by_b.load(Ordering::SeqCst), 0, "echo leaked back");
    assert_eq!(fs_a.file("/doc.txt").await, Some((b"hello".to_vec(), 5)));

    engine_a.stop().await.expect("stop a");
    engine_b.stop().await.expect("stop b");
}
