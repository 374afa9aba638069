//! Batching writer tests against an in-memory sink.

use std::{
    sync::{
        Arc, Mutex as StdMutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use yrs::{Doc, ReadTxn, StateVector, Text, Transact};

use super::*;

/// In-memory sink recording appends; can fail the first N calls and tracks
/// how many appends ever ran concurrently.
#[derive(Default)]
struct MockSink {
    appends: StdMutex<Vec<(String, Vec<u8>, Option<String>)>>,
    fail_remaining: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    append_delay: Option<Duration>,
}

impl MockSink {
    fn failing(times: usize) -> Self {
        Self {
            fail_remaining: AtomicUsize::new(times),
            ..Self::default()
        }
    }

    fn with_delay(delay: Duration) -> Self {
        Self {
            append_delay: Some(delay),
            ..Self::default()
        }
    }

    fn recorded(&self) -> Vec<(String, Vec<u8>, Option<String>)> {
        self.appends.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl UpdateSink for MockSink {
    async fn append(
        &self,
        doc_name: &str,
        payload: &[u8],
        client_id: Option<&str>,
    ) -> Result<(), SinkError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(delay) = self.append_delay {
            tokio::time::sleep(delay).await;
        }

        let result = if self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            Err("injected sink failure".into())
        } else {
            self.appends.lock().unwrap().push((
                doc_name.to_string(),
                payload.to_vec(),
                client_id.map(str::to_string),
            ));
            Ok(())
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// A small real CRDT update blob, so coalescing exercises the codec.
fn crdt_update(content: &str) -> Bytes {
    let doc = Doc::new();
    let text = doc.get_or_insert_text("content");
    let mut txn = doc.transact_mut();
    text.insert(&mut txn, 0, content);
    drop(txn);
    Bytes::from(
        doc.transact()
            .encode_state_as_update_v1(&StateVector::default()),
    )
}

/// Arbitrary non-CRDT payload for coalesce-off tests.
fn raw_payload(len: usize) -> Bytes {
    Bytes::from(vec![0xabu8; len])
}

fn no_timer_config() -> BatchConfig {
    // Timers far in the future so only explicit triggers fire.
    BatchConfig {
        max_batch_count: 1000,
        max_batch_bytes: 1024 * 1024,
        batch_timeout: Duration::from_secs(3600),
        debounce: Duration::from_secs(3600),
        coalesce: false,
    }
}

#[tokio::test]
async fn count_bound_coalesces_batch_into_one_append() {
    let sink = Arc::new(MockSink::default());
    let config = BatchConfig {
        max_batch_count: 5,
        coalesce: true,
        ..no_timer_config()
    };
    let batcher = DocBatcher::new(sink.clone(), config).expect("valid config");

    for i in 0..5 {
        batcher
            .enqueue("note:d", crdt_update(&format!("x{i}")), None)
            .await
            .expect("enqueue");
    }

    let appends = sink.recorded();
    assert_eq!(appends.len(), 1, "five updates must land as one record");
    assert_eq!(appends[0].0, "note:d");

    let metrics = batcher.metrics();
    assert_eq!(metrics.enqueued, 5);
    assert_eq!(metrics.appended_records, 1);
    assert_eq!(metrics.coalesced, 4);
    assert_eq!(metrics.flush_count, 1);
    assert!(
        metrics.compression_ratio > 1.0,
        "merged blob should be smaller than the sum of inputs, got ratio {}",
        metrics.compression_ratio
    );
}

#[tokio::test]
async fn size_bound_triggers_synchronous_flush() {
    let sink = Arc::new(MockSink::default());
    let config = BatchConfig {
        max_batch_bytes: 100,
        ..no_timer_config()
    };
    let batcher = DocBatcher::new(sink.clone(), config).expect("valid config");

    batcher
        .enqueue("note:d", raw_payload(60), None)
        .await
        .expect("enqueue");
    assert!(sink.recorded().is_empty(), "below the bound, nothing flushes");

    batcher
        .enqueue("note:d", raw_payload(60), None)
        .await
        .expect("enqueue");

    assert_eq!(sink.recorded().len(), 2);
    let metrics = batcher.metrics();
    assert_eq!(metrics.flush_size, 1);
    assert_eq!(metrics.flushed_batches, 1);
}

#[tokio::test(start_paused = true)]
async fn debounce_timer_flushes_after_quiet_period() {
    let sink = Arc::new(MockSink::default());
    let config = BatchConfig {
        debounce: Duration::from_millis(100),
        batch_timeout: Duration::from_secs(10),
        ..no_timer_config()
    };
    let batcher = DocBatcher::new(sink.clone(), config).expect("valid config");

    batcher
        .enqueue("note:d", raw_payload(8), Some("client-1".into()))
        .await
        .expect("enqueue");

    tokio::time::sleep(Duration::from_millis(120)).await;

    let appends = sink.recorded();
    assert_eq!(appends.len(), 1);
    assert_eq!(appends[0].2.as_deref(), Some("client-1"));
    assert_eq!(batcher.metrics().flush_debounce, 1);
}

#[tokio::test(start_paused = true)]
async fn deadline_fires_even_while_debounce_keeps_resetting() {
    let sink = Arc::new(MockSink::default());
    let config = BatchConfig {
        debounce: Duration::from_millis(100),
        batch_timeout: Duration::from_millis(150),
        ..no_timer_config()
    };
    let batcher = DocBatcher::new(sink.clone(), config).expect("valid config");

    // Enqueues every 60ms keep the debounce timer from ever firing, but the
    // deadline armed at the first enqueue is not pushed back.
    batcher
        .enqueue("note:d", raw_payload(4), None)
        .await
        .expect("enqueue");
    tokio::time::sleep(Duration::from_millis(60)).await;
    batcher
        .enqueue("note:d", raw_payload(4), None)
        .await
        .expect("enqueue");
    tokio::time::sleep(Duration::from_millis(60)).await;
    batcher
        .enqueue("note:d", raw_payload(4), None)
        .await
        .expect("enqueue");

    tokio::time::sleep(Duration::from_millis(50)).await;

    let appends = sink.recorded();
    assert_eq!(appends.len(), 3, "all three updates flush in one batch");
    let metrics = batcher.metrics();
    assert_eq!(metrics.flush_deadline, 1);
    assert_eq!(metrics.flush_debounce, 0);
}

#[tokio::test]
async fn failed_flush_requeues_updates_in_order() {
    let sink = Arc::new(MockSink::failing(1));
    let batcher = DocBatcher::new(sink.clone(), no_timer_config()).expect("valid config");

    batcher
        .enqueue("note:d", Bytes::from_static(b"first"), None)
        .await
        .expect("enqueue");
    batcher
        .enqueue("note:d", Bytes::from_static(b"second"), None)
        .await
        .expect("enqueue");

    let err = batcher.flush_doc("note:d").await;
    assert!(err.is_err(), "first flush hits the injected failure");
    assert_eq!(batcher.metrics().errors, 1);
    assert!(sink.recorded().is_empty(), "nothing persisted yet");

    batcher.flush_doc("note:d").await.expect("second flush");

    let payloads: Vec<Vec<u8>> = sink.recorded().into_iter().map(|(_, p, _)| p).collect();
    assert_eq!(payloads, vec![b"first".to_vec(), b"second".to_vec()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn at_most_one_flush_in_flight_per_doc() {
    let sink = Arc::new(MockSink::with_delay(Duration::from_millis(5)));
    let batcher = DocBatcher::new(sink.clone(), no_timer_config()).expect("valid config");

    let mut handles = Vec::new();
    for i in 0..16 {
        let batcher = batcher.clone();
        handles.push(tokio::spawn(async move {
            batcher
                .enqueue("note:d", raw_payload(4 + i), None)
                .await
                .expect("enqueue");
            batcher.flush_doc("note:d").await.expect("flush");
        }));
    }
    for handle in handles {
        handle.await.expect("task");
    }

    assert_eq!(sink.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(sink.recorded().len(), 16);
}

#[tokio::test]
async fn flush_all_drains_every_doc() {
    let sink = Arc::new(MockSink::default());
    let batcher = DocBatcher::new(sink.clone(), no_timer_config()).expect("valid config");

    batcher
        .enqueue("note:a", Bytes::from_static(b"a"), None)
        .await
        .expect("enqueue");
    batcher
        .enqueue("note:b", Bytes::from_static(b"b"), None)
        .await
        .expect("enqueue");

    batcher.flush_all().await.expect("flush all");

    let mut docs: Vec<String> = sink.recorded().into_iter().map(|(d, _, _)| d).collect();
    docs.sort();
    assert_eq!(docs, vec!["note:a".to_string(), "note:b".to_string()]);
}

#[tokio::test]
async fn shutdown_drains_then_bypasses_batching() {
    let sink = Arc::new(MockSink::default());
    let batcher = DocBatcher::new(sink.clone(), no_timer_config()).expect("valid config");
    let mut events = batcher.subscribe_events();

    batcher
        .enqueue("note:d", Bytes::from_static(b"queued"), None)
        .await
        .expect("enqueue");

    batcher.shutdown().await.expect("shutdown drain");
    assert_eq!(sink.recorded().len(), 1, "queued update drained");

    // Post-shutdown enqueues are serviced synchronously.
    batcher
        .enqueue("note:d", Bytes::from_static(b"late"), None)
        .await
        .expect("enqueue after shutdown");
    assert_eq!(sink.recorded().len(), 2);

    let mut saw_shutdown = false;
    while let Ok(event) = events.try_recv() {
        if event == BatchEvent::Shutdown {
            saw_shutdown = true;
        }
    }
    assert!(saw_shutdown);
}

#[tokio::test]
async fn shutdown_mode_sink_failure_surfaces_to_caller() {
    let sink = Arc::new(MockSink::failing(1));
    let batcher = DocBatcher::new(sink.clone(), no_timer_config()).expect("valid config");

    batcher.shutdown().await.expect("nothing queued");

    let result = batcher
        .enqueue("note:d", Bytes::from_static(b"late"), None)
        .await;
    assert!(matches!(result, Err(EnqueueError::Sink(_))));
}

#[tokio::test(start_paused = true)]
async fn stray_timer_fire_on_empty_queue_is_a_noop() {
    let sink = Arc::new(MockSink::default());
    let config = BatchConfig {
        debounce: Duration::from_millis(100),
        batch_timeout: Duration::from_millis(200),
        ..no_timer_config()
    };
    let batcher = DocBatcher::new(sink.clone(), config).expect("valid config");

    batcher
        .enqueue("note:d", raw_payload(4), None)
        .await
        .expect("enqueue");
    batcher.flush_doc("note:d").await.expect("manual flush");
    assert_eq!(sink.recorded().len(), 1);

    // Let both timer windows pass; no second flush may happen.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(sink.recorded().len(), 1);
    assert_eq!(batcher.metrics().flushed_batches, 1);
}

#[tokio::test]
async fn coalesced_record_keeps_client_id_only_when_unanimous() {
    let sink = Arc::new(MockSink::default());
    let config = BatchConfig {
        max_batch_count: 2,
        coalesce: true,
        ..no_timer_config()
    };
    let batcher = DocBatcher::new(sink.clone(), config).expect("valid config");

    batcher
        .enqueue("note:same", crdt_update("a"), Some("c1".into()))
        .await
        .expect("enqueue");
    batcher
        .enqueue("note:same", crdt_update("b"), Some("c1".into()))
        .await
        .expect("enqueue");

    batcher
        .enqueue("note:mixed", crdt_update("a"), Some("c1".into()))
        .await
        .expect("enqueue");
    batcher
        .enqueue("note:mixed", crdt_update("b"), Some("c2".into()))
        .await
        .expect("enqueue");

    let appends = sink.recorded();
    let same = appends.iter().find(|(d, _, _)| d == "note:same").unwrap();
    let mixed = appends.iter().find(|(d, _, _)| d == "note:mixed").unwrap();
    assert_eq!(same.2.as_deref(), Some("c1"));
    assert_eq!(mixed.2, None);
}

#[tokio::test]
async fn malformed_blobs_fall_back_to_individual_appends() {
    let sink = Arc::new(MockSink::default());
    let config = BatchConfig {
        max_batch_count: 2,
        coalesce: true,
        ..no_timer_config()
    };
    let batcher = DocBatcher::new(sink.clone(), config).expect("valid config");

    // Not valid CRDT updates: the merge fails and both blobs append as-is.
    batcher
        .enqueue("note:d", Bytes::from_static(b"\xde\xad"), None)
        .await
        .expect("enqueue");
    batcher
        .enqueue("note:d", Bytes::from_static(b"\xbe\xef"), None)
        .await
        .expect("enqueue");

    let payloads: Vec<Vec<u8>> = sink.recorded().into_iter().map(|(_, p, _)| p).collect();
    assert_eq!(payloads, vec![b"\xde\xad".to_vec(), b"\xbe\xef".to_vec()]);
}
