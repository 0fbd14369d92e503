//! Persisted key layout.
//!
//! Everything lives in one ordered keyspace, partitioned by a leading tag
//! byte. Integers are big-endian so byte order equals numeric order, and
//! timestamps have their sign bit flipped so negative values sort first.
//!
//! ```text
//! b | batch_id:u64                                   -> batch meta (JSON)
//! s | batch_id:u64 | series_len:u32 | series | ts:i64 -> value (f64 bits, LE)
//! x | expires_at:i64 | batch_id:u64                  -> (empty) expiry index
//! ```
//!
//! Sample keys start with the batch ID, so a whole batch is one prefix. The
//! expiry index starts with [`BatchMeta::expires_at`] of each batch, so a
//! sweep only range-scans batches older than the cutoff.
//!
//! [`BatchMeta::expires_at`]: crate::batch::BatchMeta::expires_at

use crate::batch::BatchId;
use crate::error::StoreError;
use crate::labels::Labels;

/// Tag of batch metadata entries.
pub(crate) const META_TAG: u8 = b'b';
/// Tag of sample entries.
pub(crate) const SAMPLE_TAG: u8 = b's';
/// Tag of expiry index entries.
pub(crate) const EXPIRY_TAG: u8 = b'x';

const SIGN_BIT: u64 = 1 << 63;

/// Encodes a timestamp so that byte order matches numeric order.
#[allow(clippy::cast_sign_loss)] // bit reinterpretation, not a numeric conversion
pub(crate) fn encode_timestamp(ts: i64) -> [u8; 8] {
    ((ts as u64) ^ SIGN_BIT).to_be_bytes()
}

/// Inverse of [`encode_timestamp`].
#[allow(clippy::cast_possible_wrap)] // bit reinterpretation, not a numeric conversion
pub(crate) fn decode_timestamp(bytes: [u8; 8]) -> i64 {
    (u64::from_be_bytes(bytes) ^ SIGN_BIT) as i64
}

/// Key of the metadata entry for `id`.
pub(crate) fn meta_key(id: BatchId) -> [u8; 9] {
    let mut key = [0u8; 9];
    key[0] = META_TAG;
    key[1..].copy_from_slice(&id.to_be_bytes());
    key
}

/// Extracts the batch ID from a metadata key.
pub(crate) fn decode_meta_key(key: &[u8]) -> Result<BatchId, StoreError> {
    match key {
        [META_TAG, rest @ ..] if rest.len() == 8 => Ok(BatchId::from_be_bytes(array(rest))),
        _ => Err(corrupt(key, "not a batch metadata key")),
    }
}

/// Prefix shared by every sample of batch `id`.
pub(crate) fn sample_prefix(id: BatchId) -> [u8; 9] {
    let mut key = [0u8; 9];
    key[0] = SAMPLE_TAG;
    key[1..].copy_from_slice(&id.to_be_bytes());
    key
}

/// Key of one sample: `(batch_id, series, timestamp)`.
#[allow(clippy::cast_possible_truncation)] // label sets are far below 4 GiB
pub(crate) fn sample_key(id: BatchId, series: &Labels, ts: i64) -> Vec<u8> {
    let series_len = series.encoded_len();
    let mut key = Vec::with_capacity(1 + 8 + 4 + series_len + 8);
    key.extend_from_slice(&sample_prefix(id));
    key.extend_from_slice(&(series_len as u32).to_be_bytes());
    series.encode_into(&mut key);
    key.extend_from_slice(&encode_timestamp(ts));
    key
}

/// Splits a sample key into `(batch_id, series, timestamp)`.
pub(crate) fn decode_sample_key(key: &[u8]) -> Result<(BatchId, Labels, i64), StoreError> {
    if key.len() < 1 + 8 + 4 + 8 || key[0] != SAMPLE_TAG {
        return Err(corrupt(key, "not a sample key"));
    }
    let id = BatchId::from_be_bytes(array(&key[1..9]));
    let series_len = u32::from_be_bytes(array(&key[9..13])) as usize;
    if key.len() != 13 + series_len + 8 {
        return Err(corrupt(key, "series length does not match key length"));
    }
    let series = Labels::decode(&key[13..13 + series_len])?;
    let ts = decode_timestamp(array(&key[13 + series_len..]));
    Ok((id, series, ts))
}

/// Key of the expiry index entry for a batch expiring at `expires_at`.
pub(crate) fn expiry_key(expires_at: i64, id: BatchId) -> [u8; 17] {
    let mut key = [0u8; 17];
    key[0] = EXPIRY_TAG;
    key[1..9].copy_from_slice(&encode_timestamp(expires_at));
    key[9..].copy_from_slice(&id.to_be_bytes());
    key
}

/// Exclusive upper bound of expiry entries that expire before `cutoff`.
pub(crate) fn expiry_upper_bound(cutoff: i64) -> [u8; 9] {
    let mut key = [0u8; 9];
    key[0] = EXPIRY_TAG;
    key[1..].copy_from_slice(&encode_timestamp(cutoff));
    key
}

/// Splits an expiry key into `(expires_at, batch_id)`.
pub(crate) fn decode_expiry_key(key: &[u8]) -> Result<(i64, BatchId), StoreError> {
    match key {
        [EXPIRY_TAG, rest @ ..] if rest.len() == 16 => Ok((
            decode_timestamp(array(&rest[..8])),
            BatchId::from_be_bytes(array(&rest[8..])),
        )),
        _ => Err(corrupt(key, "not an expiry index key")),
    }
}

/// Encodes a sample value.
pub(crate) fn encode_value(value: f64) -> [u8; 8] {
    value.to_bits().to_le_bytes()
}

/// Decodes a sample value.
pub(crate) fn decode_value(key: &[u8], bytes: &[u8]) -> Result<f64, StoreError> {
    let raw: [u8; 8] = bytes.try_into().map_err(|_| StoreError::CorruptedValue {
        key: key.to_vec(),
        reason: format!("expected 8 value bytes, found {}", bytes.len()),
    })?;
    Ok(f64::from_bits(u64::from_le_bytes(raw)))
}

/// Copies an exactly-sized slice into an array; callers check lengths first.
fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

fn corrupt(key: &[u8], reason: &str) -> StoreError {
    StoreError::CorruptedKey {
        key: key.to_vec(),
        reason: reason.to_string(),
    }
}
