//! Durable store wrapper over the embedded LMDB engine.
//!
//! The store is a single named database of raw byte keys and values. Every
//! mutation goes through one write transaction, so a multi-key write is
//! all-or-nothing: after a crash a reader sees either every entry of a
//! committed [`WriteBatch`] or none of them. Readers work on consistent
//! snapshots and never block writers.
//!
//! LMDB serializes write transactions internally, which is what lets the
//! ingestion, sweep, and sender paths share one [`DurableStore`] handle:
//! overlapping deletes of the same key range simply run one after the other,
//! and the second finds nothing left to remove.

use std::fmt;
use std::ops::{Bound, ControlFlow};
use std::path::{Path, PathBuf};

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};

use crate::error::{Result, StoreError};

/// Name of the single database inside the environment.
const DB_NAME: &str = "rwbuf";

/// One mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Insert or overwrite `key`.
    Put {
        /// Entry key.
        key: Vec<u8>,
        /// Entry value.
        value: Vec<u8>,
    },
    /// Remove `key` if present.
    Delete {
        /// Entry key.
        key: Vec<u8>,
    },
    /// Remove every key starting with `prefix`.
    DeletePrefix {
        /// Key prefix.
        prefix: Vec<u8>,
    },
}

/// An ordered list of mutations applied atomically by [`DurableStore::write`].
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<Op>,
}

impl WriteBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty batch with room for `capacity` operations.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ops: Vec::with_capacity(capacity),
        }
    }

    /// Queues an insert.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(Op::Put {
            key: key.into(),
            value: value.into(),
        });
    }

    /// Queues a point delete.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(Op::Delete { key: key.into() });
    }

    /// Queues a prefix delete.
    pub fn delete_prefix(&mut self, prefix: impl Into<Vec<u8>>) {
        self.ops.push(Op::DeletePrefix {
            prefix: prefix.into(),
        });
    }

    /// The queued operations in order.
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Handle to the on-disk store. Cheap to clone; clones share the environment.
#[derive(Clone)]
pub struct DurableStore {
    path: PathBuf,
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl fmt::Debug for DurableStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DurableStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl DurableStore {
    /// Opens (or creates) the store in directory `path`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::DirectoryAccess`] if the directory cannot be created
    /// - [`StoreError::Open`] if the engine refuses the directory
    pub fn open<P: AsRef<Path>>(path: P, map_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path).map_err(|e| StoreError::DirectoryAccess {
            path: path.clone(),
            source: e,
        })?;

        // SAFETY: the data file is only ever modified through this environment;
        // nothing else in the process truncates or rewrites it while mapped.
        let env = unsafe { EnvOpenOptions::new().map_size(map_size).max_dbs(1).open(&path) }
            .map_err(|e| StoreError::Open {
                path: path.clone(),
                source: e,
            })?;

        let mut wtxn = env.write_txn().map_err(StoreError::txn("begin write"))?;
        let db = env
            .create_database::<Bytes, Bytes>(&mut wtxn, Some(DB_NAME))
            .map_err(StoreError::txn("create database"))?;
        wtxn.commit().map_err(StoreError::txn("commit"))?;

        Ok(Self { path, env, db })
    }

    /// The store directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `f` inside one write transaction and commits if it returns `Ok`.
    ///
    /// If `f` fails, the transaction is aborted and nothing it did is visible.
    ///
    /// # Errors
    ///
    /// Returns the error from `f`, or a [`StoreError::Transaction`] if the
    /// transaction cannot begin or commit.
    pub fn transaction<T>(&self, f: impl FnOnce(&mut Transaction<'_>) -> Result<T>) -> Result<T> {
        let txn = self.env.write_txn().map_err(StoreError::txn("begin write"))?;
        let mut tx = Transaction { txn, db: self.db };
        let out = f(&mut tx)?;
        tx.txn.commit().map_err(StoreError::txn("commit"))?;
        Ok(out)
    }

    /// Runs `f` against a consistent read snapshot.
    ///
    /// # Errors
    ///
    /// Returns the error from `f`, or a [`StoreError::Transaction`] if the
    /// snapshot cannot be taken.
    pub fn read<T>(&self, f: impl FnOnce(&Snapshot<'_>) -> Result<T>) -> Result<T> {
        let txn = self.env.read_txn().map_err(StoreError::txn("begin read"))?;
        let snapshot = Snapshot { txn, db: self.db };
        f(&snapshot)
    }

    /// Applies every operation of `batch` atomically.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError::Transaction`] if any operation or the commit
    /// fails; in that case none of the batch is persisted.
    pub fn write(&self, batch: &WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.transaction(|tx| {
            for op in batch.ops() {
                tx.apply(op)?;
            }
            Ok(())
        })
    }

    /// Inserts or overwrites one entry.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError::Transaction`] if the write fails.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.transaction(|tx| tx.put(key, value))
    }

    /// Inserts all `entries` atomically.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError::Transaction`] if the write fails; no entry is
    /// persisted in that case.
    pub fn put_batch<K, V>(&self, entries: &[(K, V)]) -> Result<()>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.transaction(|tx| {
            for (key, value) in entries {
                tx.put(key.as_ref(), value.as_ref())?;
            }
            Ok(())
        })
    }

    /// Removes one entry, returning whether it existed.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError::Transaction`] if the delete fails.
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        self.transaction(|tx| tx.delete(key))
    }

    /// Removes every entry under `prefix`, returning how many were removed.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError::Transaction`] if the delete fails.
    pub fn delete_prefix(&self, prefix: &[u8]) -> Result<usize> {
        self.transaction(|tx| tx.delete_prefix(prefix))
    }

    /// Reads one entry.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError::Transaction`] if the read fails.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.read(|snap| snap.get(key))
    }

    /// Collects every entry under `prefix` in key order.
    ///
    /// Use [`Snapshot::for_each_prefix`] to stream instead of collecting.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError::Transaction`] if the scan fails.
    pub fn scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.read(|snap| {
            let mut out = Vec::new();
            snap.for_each_prefix(prefix, |k, v| {
                out.push((k.to_vec(), v.to_vec()));
                Ok(ControlFlow::Continue(()))
            })?;
            Ok(out)
        })
    }

    /// Returns the last entry under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError::Transaction`] if the scan fails.
    pub fn last_with_prefix(&self, prefix: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.read(|snap| snap.last_with_prefix(prefix))
    }

    /// Number of entries in the store.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError::Transaction`] if the read fails.
    pub fn len(&self) -> Result<u64> {
        self.read(|snap| {
            snap.db
                .len(&snap.txn)
                .map_err(StoreError::txn("count"))
                .map_err(Into::into)
        })
    }

    /// Whether the store holds no entries.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError::Transaction`] if the read fails.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// A consistent read-only view of the store.
pub struct Snapshot<'e> {
    txn: RoTxn<'e>,
    db: Database<Bytes, Bytes>,
}

impl Snapshot<'_> {
    /// Reads one entry.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError::Transaction`] if the read fails.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let value = self.db.get(&self.txn, key).map_err(StoreError::txn("get"))?;
        Ok(value.map(<[u8]>::to_vec))
    }

    /// Visits entries under `prefix` in key order until `f` breaks.
    ///
    /// # Errors
    ///
    /// Returns the error from `f`, or a [`StoreError::Transaction`] if
    /// iteration fails.
    pub fn for_each_prefix<F>(&self, prefix: &[u8], mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<ControlFlow<()>>,
    {
        let iter = self
            .db
            .prefix_iter(&self.txn, prefix)
            .map_err(StoreError::txn("prefix scan"))?;
        for item in iter {
            let (key, value) = item.map_err(StoreError::txn("prefix scan"))?;
            if f(key, value)?.is_break() {
                break;
            }
        }
        Ok(())
    }

    /// Returns the first entry under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError::Transaction`] if the scan fails.
    pub fn first_with_prefix(&self, prefix: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let mut iter = self
            .db
            .prefix_iter(&self.txn, prefix)
            .map_err(StoreError::txn("prefix scan"))?;
        let first = iter.next().transpose().map_err(StoreError::txn("prefix scan"))?;
        Ok(first.map(|(k, v)| (k.to_vec(), v.to_vec())))
    }

    /// Returns the last entry under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError::Transaction`] if the scan fails.
    pub fn last_with_prefix(&self, prefix: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let mut iter = self
            .db
            .rev_prefix_iter(&self.txn, prefix)
            .map_err(StoreError::txn("reverse prefix scan"))?;
        let last = iter
            .next()
            .transpose()
            .map_err(StoreError::txn("reverse prefix scan"))?;
        Ok(last.map(|(k, v)| (k.to_vec(), v.to_vec())))
    }
}

/// A write transaction handed to [`DurableStore::transaction`].
pub struct Transaction<'e> {
    txn: RwTxn<'e>,
    db: Database<Bytes, Bytes>,
}

impl Transaction<'_> {
    /// Reads one entry, including writes made earlier in this transaction.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError::Transaction`] if the read fails.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let value = self.db.get(&self.txn, key).map_err(StoreError::txn("get"))?;
        Ok(value.map(<[u8]>::to_vec))
    }

    /// Collects keys in `[start, end)`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError::Transaction`] if the scan fails.
    pub fn keys_in_range(&self, start: &[u8], end: &[u8]) -> Result<Vec<Vec<u8>>> {
        let range = (Bound::Included(start), Bound::Excluded(end));
        let iter = self
            .db
            .range(&self.txn, &range)
            .map_err(StoreError::txn("range scan"))?;
        let mut keys = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(StoreError::txn("range scan"))?;
            keys.push(key.to_vec());
        }
        Ok(keys)
    }

    /// Inserts or overwrites one entry.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError::Transaction`] if the write fails.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db
            .put(&mut self.txn, key, value)
            .map_err(StoreError::txn("put"))?;
        Ok(())
    }

    /// Removes one entry, returning whether it existed.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError::Transaction`] if the delete fails.
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        let existed = self
            .db
            .delete(&mut self.txn, key)
            .map_err(StoreError::txn("delete"))?;
        Ok(existed)
    }

    /// Removes every entry under `prefix`, returning how many were removed.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError::Transaction`] if the delete fails.
    pub fn delete_prefix(&mut self, prefix: &[u8]) -> Result<usize> {
        let upper = prefix_successor(prefix);
        let end = match &upper {
            Some(upper) => Bound::Excluded(upper.as_slice()),
            None => Bound::Unbounded,
        };
        let range = (Bound::Included(prefix), end);
        let removed = self
            .db
            .delete_range(&mut self.txn, &range)
            .map_err(StoreError::txn("delete range"))?;
        Ok(removed)
    }

    /// Applies one queued operation.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError::Transaction`] if the operation fails.
    pub fn apply(&mut self, op: &Op) -> Result<()> {
        match op {
            Op::Put { key, value } => self.put(key, value),
            Op::Delete { key } => self.delete(key).map(drop),
            Op::DeletePrefix { prefix } => self.delete_prefix(prefix).map(drop),
        }
    }
}

/// Smallest key greater than every key starting with `prefix`.
///
/// `None` means no such key exists (empty or all-`0xff` prefix).
fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut upper = prefix.to_vec();
    while let Some(last) = upper.pop() {
        if last < u8::MAX {
            upper.push(last + 1);
            return Some(upper);
        }
    }
    None
}
