//! Per-cycle ingestion facade.
//!
//! The pipeline drives an [`Appendable`] once per scrape or push cycle: any
//! number of `append*` calls followed by exactly one `commit` (or
//! `rollback`). [`Appender`] is the queue's implementation.
//!
//! Samples older than `now - ttl` are accepted and dropped so late data
//! never fails the upstream pipeline. Exemplars, histograms, and metadata
//! are accepted and discarded; see [`crate::auxiliary`].

use std::time::Duration;

use crate::auxiliary::{AuxiliaryKind, Exemplar, FloatHistogram, Histogram, Metadata};
use crate::batch::unix_millis;
use crate::error::Result;
use crate::labels::{Labels, SeriesRef};
use crate::queue::{Queue, ttl_cutoff};

/// The ingestion contract consumed by a metrics pipeline.
///
/// `commit` and `rollback` consume the appender, so a cycle cannot be
/// reused after it ends.
pub trait Appendable {
    /// Appends one sample and returns the series reference to reuse.
    ///
    /// # Errors
    ///
    /// Implementations may fail if the sample cannot be staged.
    fn append(&mut self, series_ref: SeriesRef, series: &Labels, timestamp: i64, value: f64) -> Result<SeriesRef>;

    /// Appends an exemplar for an existing series.
    ///
    /// # Errors
    ///
    /// Implementations may fail if the exemplar cannot be staged.
    fn append_exemplar(&mut self, series_ref: SeriesRef, series: &Labels, exemplar: &Exemplar) -> Result<SeriesRef>;

    /// Appends a native histogram sample, integer or float.
    ///
    /// `histogram` takes precedence when both are given. A call carrying
    /// neither is treated as an integer histogram.
    ///
    /// # Errors
    ///
    /// Implementations may fail if the histogram cannot be staged.
    fn append_histogram(
        &mut self,
        series_ref: SeriesRef,
        series: &Labels,
        timestamp: i64,
        histogram: Option<&Histogram>,
        float_histogram: Option<&FloatHistogram>,
    ) -> Result<SeriesRef>;

    /// Updates type, unit, and help of a series.
    ///
    /// # Errors
    ///
    /// Implementations may fail if the metadata cannot be staged.
    fn update_metadata(&mut self, series_ref: SeriesRef, series: &Labels, metadata: &Metadata) -> Result<SeriesRef>;

    /// Ends the cycle, making everything appended durable.
    ///
    /// # Errors
    ///
    /// Returns the storage error if the flush fails.
    fn commit(self) -> Result<()>;

    /// Ends the cycle without committing.
    ///
    /// # Errors
    ///
    /// Implementations may fail if discarding state fails.
    fn rollback(self) -> Result<()>;
}

/// An ingestion cycle bound to a [`Queue`].
///
/// Created by [`Queue::new_appender`]. Holds no samples itself: every
/// accepted sample goes straight into the queue's open batch.
#[derive(Debug)]
pub struct Appender<'q> {
    queue: &'q Queue,
    ttl: Option<Duration>,
}

impl<'q> Appender<'q> {
    pub(crate) fn new(queue: &'q Queue, ttl: Option<Duration>) -> Self {
        Self { queue, ttl }
    }

    /// The TTL this cycle filters with.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    fn discard(&self, kind: AuxiliaryKind, series: &Labels) -> SeriesRef {
        self.queue.record_auxiliary(kind);
        tracing::trace!(%series, "{kind} not persisted");
        SeriesRef(0)
    }
}

impl Appendable for Appender<'_> {
    fn append(&mut self, series_ref: SeriesRef, series: &Labels, timestamp: i64, value: f64) -> Result<SeriesRef> {
        if let Some(ttl) = self.ttl {
            let cutoff = ttl_cutoff(unix_millis(), ttl);
            if timestamp < cutoff {
                self.queue.record_stale();
                tracing::trace!(%series, timestamp, cutoff, "stale sample dropped");
                return Ok(series_ref);
            }
        }
        self.queue.stage(series.clone(), timestamp, value);
        Ok(series_ref)
    }

    fn append_exemplar(&mut self, _series_ref: SeriesRef, series: &Labels, _exemplar: &Exemplar) -> Result<SeriesRef> {
        Ok(self.discard(AuxiliaryKind::Exemplar, series))
    }

    fn append_histogram(
        &mut self,
        _series_ref: SeriesRef,
        series: &Labels,
        _timestamp: i64,
        histogram: Option<&Histogram>,
        float_histogram: Option<&FloatHistogram>,
    ) -> Result<SeriesRef> {
        let kind = match (histogram, float_histogram) {
            (None, Some(_)) => AuxiliaryKind::FloatHistogram,
            (Some(_), _) | (None, None) => AuxiliaryKind::Histogram,
        };
        Ok(self.discard(kind, series))
    }

    fn update_metadata(&mut self, _series_ref: SeriesRef, series: &Labels, _metadata: &Metadata) -> Result<SeriesRef> {
        Ok(self.discard(AuxiliaryKind::Metadata, series))
    }

    fn commit(self) -> Result<()> {
        self.queue.commit_batch()
    }

    /// Ends the cycle and keeps what was appended.
    ///
    /// Staged samples stay in the open batch and are flushed by the next
    /// commit, so a spurious rollback never loses data.
    fn rollback(self) -> Result<()> {
        tracing::trace!("rollback keeps staged samples");
        Ok(())
    }
}
