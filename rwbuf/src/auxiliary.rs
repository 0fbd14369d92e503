//! Auxiliary records of the ingestion contract.
//!
//! The append contract carries exemplars, native histograms, and series
//! metadata next to plain samples. The queue has no persisted encoding for
//! them yet: the [`Appender`](crate::appender::Appender) accepts each one,
//! counts it under its [`AuxiliaryKind`], and drops it. The types exist so
//! callers compile against the full contract and so the discard is visible
//! in [`QueueStats`](crate::queue::QueueStats).

use std::fmt;

use crate::labels::Labels;

/// The kind of auxiliary record the appender discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuxiliaryKind {
    /// A trace exemplar attached to a sample.
    Exemplar,
    /// An integer-count native histogram.
    Histogram,
    /// A float-count native histogram.
    FloatHistogram,
    /// Series type, unit, and help text.
    Metadata,
}

impl fmt::Display for AuxiliaryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Exemplar => "exemplar",
            Self::Histogram => "histogram",
            Self::FloatHistogram => "float_histogram",
            Self::Metadata => "metadata",
        })
    }
}

/// A sample annotated with its own labels, typically a trace ID.
#[derive(Debug, Clone, PartialEq)]
pub struct Exemplar {
    /// Exemplar labels (e.g. `trace_id`).
    pub labels: Labels,
    /// Observed value.
    pub value: f64,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// A contiguous run of buckets in a sparse histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketSpan {
    /// Gap to the previous span, or the starting index for the first span.
    pub offset: i32,
    /// Number of consecutive buckets.
    pub length: u32,
}

/// Native histogram with integer counts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Histogram {
    /// Resolution of the exponential bucket layout.
    pub schema: i32,
    /// Width of the zero bucket.
    pub zero_threshold: f64,
    /// Observations in the zero bucket.
    pub zero_count: u64,
    /// Total observations.
    pub count: u64,
    /// Sum of observations.
    pub sum: f64,
    /// Positive bucket spans.
    pub positive_spans: Vec<BucketSpan>,
    /// Delta-encoded positive bucket counts.
    pub positive_deltas: Vec<i64>,
    /// Negative bucket spans.
    pub negative_spans: Vec<BucketSpan>,
    /// Delta-encoded negative bucket counts.
    pub negative_deltas: Vec<i64>,
}

/// Native histogram with float counts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FloatHistogram {
    /// Resolution of the exponential bucket layout.
    pub schema: i32,
    /// Width of the zero bucket.
    pub zero_threshold: f64,
    /// Observations in the zero bucket.
    pub zero_count: f64,
    /// Total observations.
    pub count: f64,
    /// Sum of observations.
    pub sum: f64,
    /// Positive bucket spans.
    pub positive_spans: Vec<BucketSpan>,
    /// Absolute positive bucket counts.
    pub positive_buckets: Vec<f64>,
    /// Negative bucket spans.
    pub negative_spans: Vec<BucketSpan>,
    /// Absolute negative bucket counts.
    pub negative_buckets: Vec<f64>,
}

/// Metric type announced by series metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MetricType {
    /// Type not reported.
    #[default]
    Unknown,
    /// Monotonic counter.
    Counter,
    /// Point-in-time value.
    Gauge,
    /// Classic bucketed histogram.
    Histogram,
    /// Classic histogram without a sum.
    GaugeHistogram,
    /// Client-side quantiles.
    Summary,
    /// Key/value information series.
    Info,
    /// Enumerated state series.
    StateSet,
}

/// Descriptive metadata for a series.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    /// Metric type.
    pub metric_type: MetricType,
    /// Unit, e.g. `seconds`.
    pub unit: String,
    /// Help text.
    pub help: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_display() {
        assert_eq!(AuxiliaryKind::Exemplar.to_string(), "exemplar");
        assert_eq!(AuxiliaryKind::FloatHistogram.to_string(), "float_histogram");
    }

    #[test]
    fn test_metadata_default() {
        let meta = Metadata::default();
        assert_eq!(meta.metric_type, MetricType::Unknown);
        assert!(meta.help.is_empty());
    }
}
