//! In-memory accumulation of samples for one commit cycle.
//!
//! A [`Batch`] stages samples in a single contiguous vector and turns them
//! into one atomic store write on flush. Until the flush succeeds the batch is
//! `Open` and owned by the queue; afterwards it is known only by its
//! [`BatchId`] and the [`BatchMeta`] persisted next to its samples.
//!
//! # State Machine
//!
//! ```text
//! Open --flush--> Flushed --acknowledge--> Acknowledged (deleted)
//!                    \------sweep-------> Expired      (deleted)
//! ```
//!
//! Transitions only move forward. A failed flush leaves the batch `Open`.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::db::{DurableStore, WriteBatch};
use crate::error::{BatchError, Result, RwbufError};
use crate::keys;
use crate::labels::Labels;

/// Monotonically increasing batch identifier; commit order equals ID order.
pub type BatchId = u64;

/// Upper bound on the up-front allocation for a new batch.
const INITIAL_RESERVE: usize = 1024;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

/// One time-series sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Series identity.
    pub series: Labels,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Sample value.
    pub value: f64,
}

/// Lifecycle state of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
    /// Accepting samples in memory.
    Open,
    /// Durable and visible to retrieval.
    Flushed,
    /// Deleted after the sender confirmed delivery.
    Acknowledged,
    /// Deleted by the TTL sweep before acknowledgement.
    Expired,
}

/// Metadata persisted alongside a flushed batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchMeta {
    /// Batch identifier.
    pub id: BatchId,
    /// When the batch was opened (ms since epoch).
    pub created_at_ms: i64,
    /// When the batch was flushed (ms since epoch).
    pub committed_at_ms: i64,
    /// Oldest sample timestamp.
    pub min_timestamp: i64,
    /// Newest sample timestamp.
    pub max_timestamp: i64,
    /// Number of samples staged into the batch.
    ///
    /// Samples sharing a `(series, timestamp)` key collapse into one entry
    /// on disk, so retrieval may return fewer.
    pub samples: usize,
}

impl BatchMeta {
    /// The instant the TTL is measured from: the newest sample timestamp,
    /// capped at the commit time.
    ///
    /// The cap keeps future-dated samples from outliving `commit + ttl`.
    pub fn expires_at(&self) -> i64 {
        self.max_timestamp.min(self.committed_at_ms)
    }

    /// Whether the batch expired before `cutoff`.
    pub fn is_expired(&self, cutoff: i64) -> bool {
        self.expires_at() < cutoff
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| BatchError::MetaEncode {
                batch_id: self.id,
                source: e,
            })
            .map_err(Into::into)
    }

    pub(crate) fn decode(batch_id: BatchId, bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| BatchError::MetaDecode { batch_id, source: e })
            .map_err(Into::into)
    }
}

/// A mutable, single-writer accumulation buffer.
#[derive(Debug)]
pub struct Batch {
    id: BatchId,
    created_at_ms: i64,
    capacity: usize,
    samples: Vec<Sample>,
    min_timestamp: i64,
    max_timestamp: i64,
}

impl Batch {
    /// Opens an empty batch that signals full at `capacity` samples.
    pub fn new(id: BatchId, capacity: usize, created_at_ms: i64) -> Self {
        Self {
            id,
            created_at_ms,
            capacity,
            samples: Vec::with_capacity(capacity.min(INITIAL_RESERVE)),
            min_timestamp: i64::MAX,
            max_timestamp: i64::MIN,
        }
    }

    /// The batch identifier.
    pub fn id(&self) -> BatchId {
        self.id
    }

    /// When the batch was opened.
    pub fn created_at_ms(&self) -> i64 {
        self.created_at_ms
    }

    /// Sample count at which the batch reports full.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of staged samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no samples are staged.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Whether the queue should rotate to a new batch.
    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    /// Staged samples in append order.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// `(oldest, newest)` staged timestamps, if any.
    pub fn timestamp_range(&self) -> Option<(i64, i64)> {
        (!self.samples.is_empty()).then_some((self.min_timestamp, self.max_timestamp))
    }

    /// Stages one sample. Never fails; capacity is enforced by the queue.
    #[inline]
    pub fn add_metric(&mut self, series: Labels, timestamp: i64, value: f64) {
        self.min_timestamp = self.min_timestamp.min(timestamp);
        self.max_timestamp = self.max_timestamp.max(timestamp);
        self.samples.push(Sample {
            series,
            timestamp,
            value,
        });
    }

    /// Drops all staged samples, keeping the ID and allocation.
    pub fn clear(&mut self) {
        self.samples.clear();
        self.min_timestamp = i64::MAX;
        self.max_timestamp = i64::MIN;
    }

    /// Builds the atomic write for this batch.
    fn to_write_batch(&self, committed_at_ms: i64) -> Result<(WriteBatch, BatchMeta)> {
        let meta = BatchMeta {
            id: self.id,
            created_at_ms: self.created_at_ms,
            committed_at_ms,
            min_timestamp: self.min_timestamp,
            max_timestamp: self.max_timestamp,
            samples: self.samples.len(),
        };

        let mut write = WriteBatch::with_capacity(self.samples.len() + 2);
        for sample in &self.samples {
            write.put(
                keys::sample_key(self.id, &sample.series, sample.timestamp),
                keys::encode_value(sample.value),
            );
        }
        write.put(keys::meta_key(self.id), meta.encode()?);
        write.put(keys::expiry_key(meta.expires_at(), self.id), Vec::new());

        Ok((write, meta))
    }

    /// Persists the batch in one atomic write.
    ///
    /// Returns `None` without touching the store when nothing is staged. On
    /// failure nothing is persisted and the batch is unchanged, so the caller
    /// can retry.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::FlushRejected`] if the store rejects the write.
    pub fn flush(&self, store: &DurableStore, committed_at_ms: i64) -> Result<Option<BatchMeta>> {
        if self.samples.is_empty() {
            return Ok(None);
        }

        let (write, meta) = self.to_write_batch(committed_at_ms)?;
        match store.write(&write) {
            Ok(()) => Ok(Some(meta)),
            Err(RwbufError::Store(source)) => Err(BatchError::FlushRejected {
                batch_id: self.id,
                samples: self.samples.len(),
                source,
            }
            .into()),
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{META_TAG, SAMPLE_TAG};
    use tempfile::tempdir;

    fn series(name: &str) -> Labels {
        Labels::from_pairs([("__name__", name), ("job", "test")])
    }

    #[test]
    fn test_add_metric_tracks_range_and_capacity() {
        let mut batch = Batch::new(1, 3, 0);
        assert!(batch.is_empty());
        assert_eq!(batch.timestamp_range(), None);

        batch.add_metric(series("a"), 200, 1.0);
        batch.add_metric(series("b"), 100, 2.0);
        assert!(!batch.is_full());
        batch.add_metric(series("c"), 300, 3.0);

        assert!(batch.is_full());
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.timestamp_range(), Some((100, 300)));
        assert_eq!(batch.samples()[1].value, 2.0);

        batch.clear();
        assert!(batch.is_empty());
        assert_eq!(batch.timestamp_range(), None);
        assert_eq!(batch.id(), 1);
    }

    #[test]
    fn test_flush_writes_samples_meta_and_index() {
        let dir = tempdir().unwrap();
        let store = DurableStore::open(dir.path(), 16 << 20).unwrap();

        let mut batch = Batch::new(5, 100, 1_000);
        batch.add_metric(series("up"), 1_500, 1.0);
        batch.add_metric(series("up"), 1_600, 0.0);

        let meta = batch.flush(&store, 2_000).unwrap().unwrap();
        assert_eq!(meta.id, 5);
        assert_eq!(meta.samples, 2);
        assert_eq!(meta.min_timestamp, 1_500);
        assert_eq!(meta.max_timestamp, 1_600);
        assert_eq!(meta.committed_at_ms, 2_000);

        assert_eq!(store.scan(&keys::sample_prefix(5)).unwrap().len(), 2);
        let stored = store.get(&keys::meta_key(5)).unwrap().unwrap();
        assert_eq!(BatchMeta::decode(5, &stored).unwrap(), meta);
        assert!(store.get(&keys::expiry_key(1_600, 5)).unwrap().is_some());
    }

    #[test]
    fn test_flush_empty_batch_is_noop() {
        let dir = tempdir().unwrap();
        let store = DurableStore::open(dir.path(), 16 << 20).unwrap();

        let batch = Batch::new(1, 10, 0);
        assert_eq!(batch.flush(&store, 0).unwrap(), None);
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_rejected_flush_persists_nothing() {
        let dir = tempdir().unwrap();
        // A tiny map guarantees the engine runs out of room mid-write.
        let store = DurableStore::open(dir.path(), 256 << 10).unwrap();

        let mut batch = Batch::new(9, usize::MAX, 0);
        let long = "x".repeat(200);
        for i in 0..20_000 {
            batch.add_metric(Labels::from_pairs([("__name__", long.as_str())]), i, 1.0);
        }

        match batch.flush(&store, 0) {
            Err(RwbufError::Batch(BatchError::FlushRejected {
                batch_id, samples, ..
            })) => {
                assert_eq!(batch_id, 9);
                assert_eq!(samples, 20_000);
            }
            other => panic!("Expected FlushRejected, got: {other:?}"),
        }

        assert!(store.scan(&[SAMPLE_TAG]).unwrap().is_empty());
        assert!(store.scan(&[META_TAG]).unwrap().is_empty());
        assert_eq!(batch.len(), 20_000);
    }

    #[test]
    fn test_meta_expiry() {
        let meta = BatchMeta {
            id: 1,
            created_at_ms: 0,
            committed_at_ms: 100,
            min_timestamp: 10,
            max_timestamp: 20,
            samples: 2,
        };
        assert_eq!(meta.expires_at(), 20);
        assert!(meta.is_expired(21));
        assert!(!meta.is_expired(20));
    }

    #[test]
    fn test_future_dated_meta_expires_from_commit() {
        let meta = BatchMeta {
            id: 1,
            created_at_ms: 0,
            committed_at_ms: 100,
            min_timestamp: 50,
            max_timestamp: 5_000,
            samples: 2,
        };
        assert_eq!(meta.expires_at(), 100);
        assert!(meta.is_expired(101));
        assert!(!meta.is_expired(100));
    }

    #[test]
    fn test_meta_decode_rejects_garbage() {
        match BatchMeta::decode(3, b"not json") {
            Err(RwbufError::Batch(BatchError::MetaDecode { batch_id, .. })) => assert_eq!(batch_id, 3),
            other => panic!("Expected MetaDecode, got: {other:?}"),
        }
    }
}
