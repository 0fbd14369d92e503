//! The persisted batching queue.
//!
//! [`Queue`] owns the [`DurableStore`] and every in-memory [`Batch`]. It has
//! three independent callers:
//!
//! - **ingestion** stages samples through an [`Appender`] and ends every
//!   cycle with [`commit_batch`](Queue::commit_batch);
//! - **the sender** drains committed batches oldest-first with
//!   [`retrieve_next`](Queue::retrieve_next) and confirms delivery with
//!   [`acknowledge`](Queue::acknowledge);
//! - **the sweep** deletes unacknowledged batches whose samples have all
//!   outlived the TTL with [`sweep_expired`](Queue::sweep_expired).
//!
//! # Locking
//!
//! Staging takes a short `pending` lock that only pushes into the open
//! batch or moves a full batch onto the sealed list. Commits take a separate
//! `flush` lock, detach every pending batch under the `pending` lock, and
//! write them with no ingestion lock held, so a slow disk never stalls
//! `append`. Deletes from the sender and the sweep run in their own store
//! transactions, which the engine serializes.
//!
//! # Example
//!
//! ```rust,no_run
//! use rwbuf::{Appendable, Labels, QueueConfig, Queue, SeriesRef};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = Queue::open(QueueConfig::new("/var/lib/rwbuf"))?;
//!
//! let mut app = queue.new_appender();
//! let series = Labels::from_pairs([("__name__", "up"), ("job", "node")]);
//! app.append(SeriesRef(0), &series, rwbuf::unix_millis(), 1.0)?;
//! app.commit()?;
//!
//! while let Some(batch) = queue.retrieve_next()? {
//!     // ship batch.samples, then:
//!     queue.acknowledge(batch.id)?;
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::appender::Appender;
use crate::auxiliary::AuxiliaryKind;
use crate::batch::{Batch, BatchId, BatchMeta, Sample, unix_millis};
use crate::config::QueueConfig;
use crate::db::DurableStore;
use crate::error::Result;
use crate::keys::{self, EXPIRY_TAG, META_TAG};
use crate::labels::Labels;

/// First ID handed out by an empty store.
const FIRST_BATCH_ID: BatchId = 1;

/// Oldest timestamp still inside the retention window at `now_ms`.
pub(crate) fn ttl_cutoff(now_ms: i64, ttl: Duration) -> i64 {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    now_ms.saturating_sub(ttl_ms)
}

/// A committed batch handed to the sender.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedBatch {
    /// ID to pass to [`Queue::acknowledge`].
    pub id: BatchId,
    /// Persisted metadata.
    pub meta: BatchMeta,
    /// Samples grouped by series, each series in timestamp order.
    pub samples: Vec<Sample>,
}

/// Point-in-time queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Committed batches awaiting acknowledgement.
    pub pending_batches: usize,
    /// Samples in those batches, as staged.
    pub pending_samples: usize,
    /// Samples staged in memory and not yet committed.
    pub open_samples: usize,
    /// Full batches waiting for the next commit.
    pub sealed_batches: usize,
    /// ID the next new batch will receive.
    pub next_batch_id: BatchId,
    /// Samples dropped at ingestion for being older than the TTL.
    pub dropped_stale: u64,
    /// Exemplars, histograms, and metadata updates accepted and discarded.
    pub discarded_auxiliary: u64,
}

/// Batches that exist only in memory.
#[derive(Default)]
struct Pending {
    /// Batch receiving samples.
    open: Option<Batch>,
    /// Full or flush-rejected batches, in ID order.
    sealed: VecDeque<Batch>,
}

impl Pending {
    fn staged_samples(&self) -> usize {
        self.sealed.iter().map(Batch::len).sum::<usize>() + self.open.as_ref().map_or(0, Batch::len)
    }
}

/// A persisted, TTL-bounded batching queue.
///
/// `Queue` is `Send + Sync`; share it between the ingestion, sender, and
/// sweep tasks with an [`Arc`](std::sync::Arc).
pub struct Queue {
    config: QueueConfig,
    store: DurableStore,
    pending: Mutex<Pending>,
    flush: Mutex<()>,
    next_id: AtomicU64,
    dropped_stale: AtomicU64,
    discarded_auxiliary: AtomicU64,
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("path", &self.config.path)
            .field("ttl", &self.config.ttl)
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Queue {
    /// Validates `config` and opens the store it names.
    ///
    /// Batch IDs continue after the newest batch already on disk, so
    /// batches committed before a restart are still retrieved first.
    ///
    /// # Errors
    ///
    /// - [`ConfigError`](crate::error::ConfigError) if the config is invalid
    /// - [`StoreError`](crate::error::StoreError) if the store cannot be
    ///   opened or its newest batch key is unreadable
    pub fn open(config: QueueConfig) -> Result<Self> {
        config.validate()?;
        let store = DurableStore::open(&config.path, config.map_size)?;

        let next_id = match store.last_with_prefix(&[META_TAG])? {
            Some((key, _)) => keys::decode_meta_key(&key)?.saturating_add(1),
            None => FIRST_BATCH_ID,
        };

        tracing::info!(
            path = %config.path.display(),
            ttl = ?config.ttl,
            next_batch_id = next_id,
            "queue opened"
        );

        Ok(Self {
            config,
            store,
            pending: Mutex::new(Pending::default()),
            flush: Mutex::new(()),
            next_id: AtomicU64::new(next_id),
            dropped_stale: AtomicU64::new(0),
            discarded_auxiliary: AtomicU64::new(0),
        })
    }

    /// The configuration the queue was opened with.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// The store directory.
    pub fn path(&self) -> &Path {
        self.store.path()
    }

    /// Starts an ingestion cycle using the configured TTL.
    pub fn new_appender(&self) -> Appender<'_> {
        self.new_appender_with_ttl(self.config.ttl)
    }

    /// Starts an ingestion cycle with an explicit TTL (`None` keeps every sample).
    pub fn new_appender_with_ttl(&self, ttl: Option<Duration>) -> Appender<'_> {
        {
            let mut pending = self.pending.lock();
            if pending.open.is_none() {
                pending.open = Some(self.new_batch());
            }
        }
        Appender::new(self, ttl)
    }

    /// Allocates the next batch. Callers hold the `pending` lock, so IDs are
    /// handed out in the same order batches enter the pending lists.
    fn new_batch(&self) -> Batch {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Batch::new(id, self.config.max_batch_samples, unix_millis())
    }

    /// Adds one sample to the open batch, sealing it once it is full.
    pub(crate) fn stage(&self, series: Labels, timestamp: i64, value: f64) {
        let mut pending = self.pending.lock();
        let open = pending.open.get_or_insert_with(|| self.new_batch());
        open.add_metric(series, timestamp, value);

        if open.is_full()
            && let Some(full) = pending.open.take()
        {
            tracing::debug!(batch_id = full.id(), samples = full.len(), "batch sealed");
            pending.sealed.push_back(full);
        }
    }

    pub(crate) fn record_stale(&self) {
        self.dropped_stale.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_auxiliary(&self, kind: AuxiliaryKind) {
        self.discarded_auxiliary.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(%kind, "auxiliary record discarded");
    }

    /// Flushes every staged sample to the store.
    ///
    /// Sealed batches are written first, in ID order, followed by the open
    /// batch. Succeeds without writing anything when nothing is staged.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::FlushRejected`](crate::error::BatchError::FlushRejected)
    /// for the first batch the store rejects. That batch and every later one
    /// stay pending in memory for the next commit; earlier ones are durable.
    pub fn commit_batch(&self) -> Result<()> {
        let _flush = self.flush.lock();

        let batches: Vec<Batch> = {
            let mut pending = self.pending.lock();
            let mut batches: Vec<Batch> = pending.sealed.drain(..).collect();
            if pending.open.as_ref().is_some_and(|open| !open.is_empty()) {
                batches.extend(pending.open.take());
            }
            batches
        };

        if batches.is_empty() {
            tracing::trace!("commit with nothing staged");
            return Ok(());
        }

        let mut remaining = batches.into_iter();
        while let Some(batch) = remaining.next() {
            match batch.flush(&self.store, unix_millis()) {
                Ok(Some(meta)) => {
                    tracing::debug!(
                        batch_id = meta.id,
                        samples = meta.samples,
                        min_ts = meta.min_timestamp,
                        max_ts = meta.max_timestamp,
                        "batch committed"
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(batch_id = batch.id(), samples = batch.len(), "commit failed: {e}");
                    // Batches staged since the detach carry higher IDs, so
                    // putting these back at the front keeps ID order.
                    let mut pending = self.pending.lock();
                    for unflushed in std::iter::once(batch).chain(remaining).rev() {
                        pending.sealed.push_front(unflushed);
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Returns the oldest committed, unacknowledged batch.
    ///
    /// Never blocks waiting for data: `None` means nothing is pending.
    /// Until [`acknowledge`](Self::acknowledge) is called for its ID, the
    /// same batch is returned again, including after a restart.
    ///
    /// # Errors
    ///
    /// Returns a store or batch error if the batch cannot be read or decoded.
    pub fn retrieve_next(&self) -> Result<Option<RetrievedBatch>> {
        self.store.read(|snap| {
            let Some((key, raw_meta)) = snap.first_with_prefix(&[META_TAG])? else {
                return Ok(None);
            };
            let id = keys::decode_meta_key(&key)?;
            let meta = BatchMeta::decode(id, &raw_meta)?;

            let mut samples = Vec::with_capacity(meta.samples);
            snap.for_each_prefix(&keys::sample_prefix(id), |key, value| {
                let (_, series, timestamp) = keys::decode_sample_key(key)?;
                let value = keys::decode_value(key, value)?;
                samples.push(Sample {
                    series,
                    timestamp,
                    value,
                });
                Ok(ControlFlow::Continue(()))
            })?;

            Ok(Some(RetrievedBatch { id, meta, samples }))
        })
    }

    /// Lists metadata of up to `limit` pending batches, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a store or batch error if the metadata cannot be read.
    pub fn peek(&self, limit: usize) -> Result<Vec<BatchMeta>> {
        self.store.read(|snap| {
            let mut metas = Vec::new();
            if limit == 0 {
                return Ok(metas);
            }
            snap.for_each_prefix(&[META_TAG], |key, value| {
                let id = keys::decode_meta_key(key)?;
                metas.push(BatchMeta::decode(id, value)?);
                Ok(if metas.len() >= limit {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                })
            })?;
            Ok(metas)
        })
    }

    /// Deletes a delivered batch.
    ///
    /// Samples, metadata, and the expiry entry go in one transaction.
    /// Acknowledging an ID that is unknown or already gone (for example
    /// swept in the meantime) succeeds and changes nothing.
    ///
    /// # Errors
    ///
    /// Returns a store error if the delete fails; the batch then stays
    /// retrievable.
    pub fn acknowledge(&self, id: BatchId) -> Result<()> {
        let removed = self.store.transaction(|tx| {
            let Some(raw_meta) = tx.get(&keys::meta_key(id))? else {
                return Ok(None);
            };
            let meta = BatchMeta::decode(id, &raw_meta)?;
            tx.delete_prefix(&keys::sample_prefix(id))?;
            tx.delete(&keys::meta_key(id))?;
            tx.delete(&keys::expiry_key(meta.expires_at(), id))?;
            Ok(Some(meta.samples))
        })?;

        match removed {
            Some(samples) => tracing::debug!(batch_id = id, samples, "batch acknowledged"),
            None => tracing::debug!(batch_id = id, "acknowledged batch was already gone"),
        }
        Ok(())
    }

    /// Deletes every committed batch that expired before `now_ms - ttl`,
    /// acknowledged or not. Returns how many were deleted.
    ///
    /// A batch expires at its newest sample timestamp, capped at its commit
    /// time (see [`BatchMeta::expires_at`]).
    ///
    /// With no TTL configured nothing ever expires and this returns 0.
    ///
    /// # Errors
    ///
    /// Returns a store error if the index scan or a delete fails; nothing
    /// is deleted in that case.
    pub fn sweep_expired(&self, now_ms: i64) -> Result<usize> {
        let Some(ttl) = self.config.ttl else {
            return Ok(0);
        };
        let cutoff = ttl_cutoff(now_ms, ttl);

        let expired = self.store.transaction(|tx| {
            let index = tx.keys_in_range(&[EXPIRY_TAG], &keys::expiry_upper_bound(cutoff))?;
            for key in &index {
                let (_, id) = keys::decode_expiry_key(key)?;
                tx.delete_prefix(&keys::sample_prefix(id))?;
                tx.delete(&keys::meta_key(id))?;
                tx.delete(key)?;
            }
            Ok(index.len())
        })?;

        if expired > 0 {
            tracing::info!(expired, cutoff, "expired batches swept");
        }
        Ok(expired)
    }

    /// Returns current counters.
    ///
    /// # Errors
    ///
    /// Returns a store or batch error if committed metadata cannot be read.
    pub fn stats(&self) -> Result<QueueStats> {
        let (pending_batches, pending_samples) = self.store.read(|snap| {
            let mut batches = 0usize;
            let mut samples = 0usize;
            snap.for_each_prefix(&[META_TAG], |key, value| {
                let meta = BatchMeta::decode(keys::decode_meta_key(key)?, value)?;
                batches += 1;
                samples += meta.samples;
                Ok(ControlFlow::Continue(()))
            })?;
            Ok((batches, samples))
        })?;

        let pending = self.pending.lock();
        Ok(QueueStats {
            pending_batches,
            pending_samples,
            open_samples: pending.staged_samples(),
            sealed_batches: pending.sealed.len(),
            next_batch_id: self.next_id.load(Ordering::Relaxed),
            dropped_stale: self.dropped_stale.load(Ordering::Relaxed),
            discarded_auxiliary: self.discarded_auxiliary.load(Ordering::Relaxed),
        })
    }

    /// Commits anything still staged and closes the store.
    ///
    /// # Errors
    ///
    /// Returns the commit error. The rejected samples stay staged, and
    /// dropping the queue on return makes one more best-effort flush, which
    /// only logs a warning if it fails as well.
    pub fn close(self) -> Result<()> {
        self.commit_batch()?;
        tracing::info!(path = %self.config.path.display(), "queue closed");
        Ok(())
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        let staged = self.pending.get_mut().staged_samples();
        if staged == 0 {
            return;
        }
        if let Err(e) = self.commit_batch() {
            tracing::warn!(samples = staged, "dropping queue with uncommitted samples: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appender::Appendable;
    use crate::error::{BatchError, RwbufError};
    use crate::labels::SeriesRef;
    use tempfile::tempdir;

    const HOUR_MS: i64 = 60 * 60 * 1000;

    fn config(dir: &Path) -> QueueConfig {
        QueueConfig::new(dir).with_map_size(16 << 20)
    }

    fn series(name: &str) -> Labels {
        Labels::from_pairs([("__name__", name)])
    }

    #[test]
    fn test_ttl_cutoff_saturates() {
        assert_eq!(ttl_cutoff(10_000, Duration::from_secs(1)), 9_000);
        assert_eq!(ttl_cutoff(i64::MIN, Duration::from_secs(1)), i64::MIN);
        // A clamped TTL leaves one millisecond of headroom at zero.
        assert_eq!(ttl_cutoff(0, Duration::MAX), i64::MIN + 1);
        assert_eq!(ttl_cutoff(-1, Duration::MAX), i64::MIN);
    }

    #[test]
    fn test_stage_rotates_full_batches() {
        let dir = tempdir().unwrap();
        let queue = Queue::open(config(dir.path()).with_max_batch_samples(2)).unwrap();

        for ts in 0..5 {
            queue.stage(series("a"), ts, 1.0);
        }

        let stats = queue.stats().unwrap();
        assert_eq!(stats.sealed_batches, 2);
        assert_eq!(stats.open_samples, 5);
        assert_eq!(stats.pending_batches, 0);

        queue.commit_batch().unwrap();
        let stats = queue.stats().unwrap();
        assert_eq!(stats.pending_batches, 3);
        assert_eq!(stats.pending_samples, 5);
        assert_eq!(stats.open_samples, 0);
        assert_eq!(stats.sealed_batches, 0);

        let ids: Vec<_> = queue.peek(10).unwrap().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_open_recovers_next_id() {
        let dir = tempdir().unwrap();
        {
            let queue = Queue::open(config(dir.path())).unwrap();
            let mut app = queue.new_appender();
            app.append(SeriesRef(0), &series("a"), unix_millis(), 1.0)
                .unwrap();
            app.commit().unwrap();
            assert_eq!(queue.peek(1).unwrap()[0].id, 1);
        }

        let queue = Queue::open(config(dir.path())).unwrap();
        assert_eq!(queue.stats().unwrap().next_batch_id, 2);
    }

    #[test]
    fn test_empty_open_batch_survives_commit() {
        let dir = tempdir().unwrap();
        let queue = Queue::open(config(dir.path())).unwrap();

        let app = queue.new_appender();
        app.commit().unwrap();
        let app = queue.new_appender();
        app.commit().unwrap();

        let stats = queue.stats().unwrap();
        assert_eq!(stats.pending_batches, 0);
        // One batch was allocated and is still open.
        assert_eq!(stats.next_batch_id, 2);
    }

    #[test]
    fn test_peek_limit() {
        let dir = tempdir().unwrap();
        let queue = Queue::open(config(dir.path()).with_max_batch_samples(1)).unwrap();
        for ts in 0..4 {
            queue.stage(series("a"), ts, 0.0);
        }
        queue.commit_batch().unwrap();

        assert_eq!(queue.peek(0).unwrap().len(), 0);
        assert_eq!(queue.peek(2).unwrap().len(), 2);
        assert_eq!(queue.peek(100).unwrap().len(), 4);
    }

    #[test]
    fn test_acknowledge_unknown_id_is_noop() {
        let dir = tempdir().unwrap();
        let queue = Queue::open(config(dir.path())).unwrap();
        queue.acknowledge(42).unwrap();
        assert!(queue.retrieve_next().unwrap().is_none());
    }

    #[test]
    fn test_sweep_uses_newest_sample() {
        let dir = tempdir().unwrap();
        let now = 10 * HOUR_MS;
        let queue = Queue::open(
            config(dir.path())
                .with_ttl(Some(Duration::from_secs(3600)))
                .with_max_batch_samples(2),
        )
        .unwrap();

        // Batch 1 is entirely old; batch 2 straddles the cutoff.
        queue.stage(series("a"), now - 3 * HOUR_MS, 1.0);
        queue.stage(series("a"), now - 2 * HOUR_MS, 1.0);
        queue.stage(series("a"), now - 2 * HOUR_MS, 1.0);
        queue.stage(series("b"), now - HOUR_MS / 2, 1.0);
        queue.commit_batch().unwrap();

        assert_eq!(queue.sweep_expired(now).unwrap(), 1);
        assert_eq!(queue.sweep_expired(now).unwrap(), 0);

        let next = queue.retrieve_next().unwrap().unwrap();
        assert_eq!(next.id, 2);
        assert_eq!(next.samples.len(), 2);
    }

    #[test]
    fn test_sweep_disabled_without_ttl() {
        let dir = tempdir().unwrap();
        let queue = Queue::open(config(dir.path()).with_ttl(None)).unwrap();
        queue.stage(series("a"), 0, 1.0);
        queue.commit_batch().unwrap();

        assert_eq!(queue.sweep_expired(i64::MAX).unwrap(), 0);
        assert!(queue.retrieve_next().unwrap().is_some());
    }

    #[test]
    fn test_rejected_commit_keeps_batches_pending() {
        let dir = tempdir().unwrap();
        let queue = Queue::open(
            QueueConfig::new(dir.path())
                .with_map_size(256 << 10)
                .with_max_batch_samples(usize::MAX),
        )
        .unwrap();

        let name = "y".repeat(200);
        for ts in 0..20_000 {
            queue.stage(Labels::from_pairs([("__name__", name.as_str())]), ts, 1.0);
        }

        for _ in 0..2 {
            match queue.commit_batch() {
                Err(RwbufError::Batch(BatchError::FlushRejected {
                    batch_id, samples, ..
                })) => {
                    assert_eq!(batch_id, 1);
                    assert_eq!(samples, 20_000);
                }
                other => panic!("Expected FlushRejected, got: {other:?}"),
            }
        }

        let stats = queue.stats().unwrap();
        assert_eq!(stats.pending_batches, 0);
        assert_eq!(stats.open_samples, 20_000);
        assert_eq!(stats.sealed_batches, 1);
        assert!(queue.retrieve_next().unwrap().is_none());
    }

    #[test]
    fn test_close_reports_rejected_commit() {
        let dir = tempdir().unwrap();
        let queue = Queue::open(
            QueueConfig::new(dir.path())
                .with_map_size(256 << 10)
                .with_max_batch_samples(usize::MAX),
        )
        .unwrap();

        let name = "z".repeat(200);
        for ts in 0..20_000 {
            queue.stage(Labels::from_pairs([("__name__", name.as_str())]), ts, 1.0);
        }

        // The retry on drop fails the same way and only logs.
        match queue.close() {
            Err(RwbufError::Batch(BatchError::FlushRejected { samples, .. })) => {
                assert_eq!(samples, 20_000);
            }
            other => panic!("Expected FlushRejected, got: {other:?}"),
        }
    }

    #[test]
    fn test_drop_commits_staged_samples() {
        let dir = tempdir().unwrap();
        {
            let queue = Queue::open(config(dir.path())).unwrap();
            queue.stage(series("a"), 1, 1.0);
        }
        let queue = Queue::open(config(dir.path())).unwrap();
        let batch = queue.retrieve_next().unwrap().unwrap();
        assert_eq!(batch.samples.len(), 1);
    }

    #[test]
    fn test_queue_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Queue>();
    }
}
