//! Error types for the rwbuf batching queue.

use std::path::PathBuf;

use thiserror::Error;

use crate::batch::BatchId;

/// The main error type for all rwbuf operations.
///
/// Stale samples dropped at ingestion, batch rotation on capacity, and
/// discarded auxiliary records are not errors and never surface here.
#[derive(Error, Debug)]
pub enum RwbufError {
    /// Error in the durable store (open, read, write, corruption).
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Error while flushing or decoding a batch.
    #[error("batch error: {0}")]
    Batch(#[from] BatchError),

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised by the durable store wrapper.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store directory could not be created or accessed.
    #[error("failed to access store directory '{}': {source}", path.display())]
    DirectoryAccess {
        /// The path that could not be accessed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The embedded engine refused to open the store.
    #[error("failed to open store at '{}': {source}", path.display())]
    Open {
        /// The store directory.
        path: PathBuf,
        /// The underlying engine error.
        #[source]
        source: heed::Error,
    },

    /// A read or write transaction failed.
    #[error("{operation} failed: {source}")]
    Transaction {
        /// The operation that was being performed.
        operation: &'static str,
        /// The underlying engine error.
        #[source]
        source: heed::Error,
    },

    /// A persisted key does not follow the expected layout.
    #[error("corrupted key {key:02x?}: {reason}")]
    CorruptedKey {
        /// The raw key bytes.
        key: Vec<u8>,
        /// Description of what was invalid.
        reason: String,
    },

    /// A persisted value does not follow the expected layout.
    #[error("corrupted value for key {key:02x?}: {reason}")]
    CorruptedValue {
        /// The raw key bytes.
        key: Vec<u8>,
        /// Description of what was invalid.
        reason: String,
    },
}

impl StoreError {
    /// Wraps an engine error with the name of the failing operation.
    pub(crate) fn txn(operation: &'static str) -> impl FnOnce(heed::Error) -> Self {
        move |source| Self::Transaction { operation, source }
    }
}

/// Errors raised while flushing or reading back batches.
#[derive(Error, Debug)]
pub enum BatchError {
    /// The store rejected the atomic write; nothing was persisted.
    #[error("flush of batch {batch_id} ({samples} samples) was rejected: {source}")]
    FlushRejected {
        /// The batch that stays pending.
        batch_id: BatchId,
        /// Number of samples left pending for retry.
        samples: usize,
        /// The store failure.
        #[source]
        source: StoreError,
    },

    /// Batch metadata could not be serialized.
    #[error("failed to encode metadata for batch {batch_id}: {source}")]
    MetaEncode {
        /// The batch being flushed.
        batch_id: BatchId,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Persisted batch metadata could not be parsed.
    #[error("failed to decode metadata for batch {batch_id}: {source}")]
    MetaDecode {
        /// The batch being read.
        batch_id: BatchId,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised when validating or loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A TTL of zero would drop every sample; use `None` to retain indefinitely.
    #[error("ttl must be greater than zero (unset it to retain until acknowledged)")]
    ZeroTtl,

    /// Batches must hold at least one sample.
    #[error("max_batch_samples must be greater than zero")]
    ZeroBatchCapacity,

    /// The background sweep needs a non-zero period.
    #[error("sweep_interval must be greater than zero")]
    ZeroSweepInterval,

    /// The engine needs room to map its data file.
    #[error("map_size must be greater than zero")]
    ZeroMapSize,

    /// Unrecognized log level text.
    #[error("unrecognized log level {text:?}")]
    UnknownLogLevel {
        /// The rejected text.
        text: String,
    },

    /// Unrecognized log format text.
    #[error("unrecognized log format {text:?}")]
    UnknownLogFormat {
        /// The rejected text.
        text: String,
    },

    /// The config file could not be read.
    #[error("failed to read config '{}': {source}", path.display())]
    FileRead {
        /// The config file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON for a queue config.
    #[error("failed to parse config '{}': {source}", path.display())]
    FileParse {
        /// The config file path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Type alias for `Result<T, RwbufError>`.
pub type Result<T> = std::result::Result<T, RwbufError>;
