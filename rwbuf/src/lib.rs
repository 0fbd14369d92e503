//! # rwbuf
//!
//! Durable, TTL-bounded batching queue for metrics remote-write.
//!
//! rwbuf sits between a metrics pipeline and a remote-write sender. The
//! pipeline appends samples through an [`Appender`]; every commit turns the
//! staged samples into one atomic write against an embedded, crash-consistent
//! key-value store. The sender drains committed batches oldest-first and
//! acknowledges each one after delivery, so nothing committed is lost while
//! the remote endpoint is unreachable.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - At-least-once delivery: a batch stays retrievable, across restarts,
//!   until it is acknowledged
//! - FIFO retrieval in commit order
//! - Stale samples (older than `now - ttl`) are dropped at ingestion, never errored
//! - A periodic sweep deletes unacknowledged batches once they outlive the TTL
//! - Store writes never hold the ingestion lock
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use rwbuf::{Appendable, Labels, Queue, QueueConfig, SeriesRef, Sweeper};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Keep samples for five minutes, sweep once a minute
//! let config = QueueConfig::new("./wal")
//!     .with_ttl(Some(Duration::from_secs(300)))
//!     .with_sweep_interval(Duration::from_secs(60));
//! let queue = Arc::new(Queue::open(config)?);
//!
//! // Expire batches the sender never picked up
//! let _sweeper = Sweeper::spawn(Arc::clone(&queue))?;
//!
//! // One ingestion cycle
//! let cpu = Labels::from_pairs([("__name__", "cpu_usage"), ("host", "web1")]);
//! let mut app = queue.new_appender();
//! app.append(SeriesRef(0), &cpu, rwbuf::unix_millis(), 85.5)?;
//! app.commit()?;
//!
//! // The sender side
//! if let Some(batch) = queue.retrieve_next()? {
//!     for sample in &batch.samples {
//!         println!("{} {} {}", sample.series, sample.timestamp, sample.value);
//!     }
//!     queue.acknowledge(batch.id)?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Queue`]: Owns the store and batch lifecycle; serves the sender
//! - [`Appender`]: Per-cycle ingestion facade implementing [`Appendable`]
//! - [`Batch`]: In-memory accumulation flushed as one atomic write
//! - [`Sweeper`]: Background thread running the TTL sweep
//!
//! ## Modules
//!
//! For lower-level access, the individual modules are also public:
//!
//! - [`queue`]: Commit, retrieve, acknowledge, sweep
//! - [`appender`]: The ingestion contract
//! - [`batch`]: Batch accumulation, metadata, and state
//! - [`db`]: Durable store over LMDB
//! - [`labels`]: Series identity
//! - [`auxiliary`]: Exemplar, histogram, and metadata types
//! - [`sweeper`]: Background TTL sweep
//! - [`config`]: Queue configuration
//! - [`logging`]: Log level and format options
//! - [`error`]: Error types

pub mod appender;
pub mod auxiliary;
pub mod batch;
pub mod config;
pub mod db;
pub mod error;
mod keys;
pub mod labels;
pub mod logging;
pub mod queue;
pub mod sweeper;

// Re-export primary API types at crate root for convenience.
pub use appender::{Appendable, Appender};
pub use batch::{Batch, BatchId, BatchMeta, BatchState, Sample, unix_millis};
pub use config::QueueConfig;
pub use error::{Result, RwbufError};
pub use labels::{Label, Labels, SeriesRef};
pub use logging::{LogFormat, LogLevel, LogOptions};
pub use queue::{Queue, QueueStats, RetrievedBatch};
pub use sweeper::Sweeper;
