//! Integration tests for the ingestion contract.

use std::time::Duration;

use rwbuf::error::{ConfigError, RwbufError};
use rwbuf::{Appendable, Labels, Queue, QueueConfig, SeriesRef, unix_millis};
use tempfile::tempdir;

const MINUTE_MS: i64 = 60 * 1000;

fn open(path: &std::path::Path, ttl: Option<Duration>) -> Queue {
    Queue::open(QueueConfig::new(path).with_map_size(64 << 20).with_ttl(ttl)).unwrap()
}

#[test]
fn test_five_minute_ttl_scenario() {
    let dir = tempdir().unwrap();
    let queue = open(dir.path(), Some(Duration::from_secs(300)));
    let up = Labels::from_pairs([("__name__", "up"), ("job", "node")]);
    let now = unix_millis();

    let mut app = queue.new_appender();
    app.append(SeriesRef(1), &up, now - 10 * MINUTE_MS, 0.0)
        .unwrap();
    app.append(SeriesRef(1), &up, now, 1.0).unwrap();
    app.commit().unwrap();

    let batch = queue.retrieve_next().unwrap().unwrap();
    assert_eq!(batch.samples.len(), 1);
    assert_eq!(batch.samples[0].timestamp, now);
    assert_eq!(batch.samples[0].value, 1.0);
    assert_eq!(batch.samples[0].series, up);

    queue.acknowledge(batch.id).unwrap();
    assert!(queue.retrieve_next().unwrap().is_none());
}

#[test]
fn test_stale_samples_never_reach_a_batch() {
    let dir = tempdir().unwrap();
    let queue = open(dir.path(), Some(Duration::from_secs(60)));
    let old = Labels::from_pairs([("__name__", "late")]);

    let mut app = queue.new_appender();
    for i in 0..10 {
        app.append(SeriesRef(0), &old, unix_millis() - 2 * MINUTE_MS - i, 1.0)
            .unwrap();
    }
    app.commit().unwrap();

    assert!(queue.retrieve_next().unwrap().is_none());
    let stats = queue.stats().unwrap();
    assert_eq!(stats.dropped_stale, 10);
    assert_eq!(stats.pending_batches, 0);
}

#[test]
fn test_commit_without_appends_is_noop() {
    let dir = tempdir().unwrap();
    let queue = open(dir.path(), None);

    for _ in 0..3 {
        queue.new_appender().commit().unwrap();
    }
    queue.commit_batch().unwrap();

    assert!(queue.retrieve_next().unwrap().is_none());
    assert_eq!(queue.stats().unwrap().pending_batches, 0);
}

#[test]
fn test_full_batch_rotates_within_a_cycle() {
    let dir = tempdir().unwrap();
    let queue = Queue::open(
        QueueConfig::new(dir.path())
            .with_map_size(64 << 20)
            .with_ttl(None)
            .with_max_batch_samples(10),
    )
    .unwrap();
    let s = Labels::from_pairs([("__name__", "rotating")]);

    let mut app = queue.new_appender();
    for ts in 0..25 {
        app.append(SeriesRef(0), &s, ts, 1.0).unwrap();
    }
    assert_eq!(queue.stats().unwrap().sealed_batches, 2);
    app.commit().unwrap();

    let sizes: Vec<_> = queue.peek(10).unwrap().iter().map(|m| m.samples).collect();
    assert_eq!(sizes, vec![10, 10, 5]);

    let first = queue.retrieve_next().unwrap().unwrap();
    assert_eq!(first.samples.first().unwrap().timestamp, 0);
    assert_eq!(first.samples.last().unwrap().timestamp, 9);
}

#[test]
fn test_close_flushes_pending_samples() {
    let dir = tempdir().unwrap();
    let s = Labels::from_pairs([("__name__", "closing")]);
    {
        let queue = open(dir.path(), None);
        let mut app = queue.new_appender();
        app.append(SeriesRef(0), &s, 1, 1.0).unwrap();
        app.rollback().unwrap();
        queue.close().unwrap();
    }

    let queue = open(dir.path(), None);
    let batch = queue.retrieve_next().unwrap().unwrap();
    assert_eq!(batch.samples.len(), 1);
}

#[test]
fn test_zero_ttl_rejected_at_open() {
    let dir = tempdir().unwrap();
    let result = Queue::open(QueueConfig::new(dir.path()).with_ttl(Some(Duration::ZERO)));
    match result {
        Err(RwbufError::Config(ConfigError::ZeroTtl)) => {}
        other => panic!("Expected ZeroTtl, got: {other:?}"),
    }
    // Validation runs before the store is created.
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
