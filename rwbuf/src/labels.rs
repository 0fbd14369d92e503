//! Series identity.
//!
//! A series is identified by its label set. [`Labels`] keeps labels sorted by
//! name so two sets with the same pairs compare, hash, and encode identically
//! regardless of the order the pipeline produced them in. Cloning is cheap:
//! every sample staged for the same series shares one allocation.

use std::fmt;
use std::sync::Arc;

use crate::error::StoreError;

/// Label holding the metric name.
pub const METRIC_NAME_LABEL: &str = "__name__";

/// Separator between names and values in the key encoding.
///
/// `0xff` never occurs in UTF-8 text, so the encoding is unambiguous.
const SEP: u8 = 0xff;

/// Opaque series reference echoed back to the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesRef(pub u64);

/// A single name/value pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label {
    /// Label name.
    pub name: String,
    /// Label value.
    pub value: String,
}

impl Label {
    /// Creates a label.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A canonical, sorted label set identifying one series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Labels(Arc<[Label]>);

impl Labels {
    /// Builds a label set, sorting by name then value.
    pub fn new(mut labels: Vec<Label>) -> Self {
        labels.sort();
        Self(labels.into())
    }

    /// Builds a label set from `(name, value)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(pairs.into_iter().map(|(k, v)| Label::new(k, v)).collect())
    }

    /// Returns the value of the label called `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.value.as_str())
    }

    /// Returns the metric name (`__name__`), if present.
    pub fn metric_name(&self) -> Option<&str> {
        self.get(METRIC_NAME_LABEL)
    }

    /// Iterates labels in canonical order.
    pub fn iter(&self) -> std::slice::Iter<'_, Label> {
        self.0.iter()
    }

    /// Number of labels.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Appends the key encoding of this set to `buf`.
    pub(crate) fn encode_into(&self, buf: &mut Vec<u8>) {
        for label in self.0.iter() {
            buf.extend_from_slice(label.name.as_bytes());
            buf.push(SEP);
            buf.extend_from_slice(label.value.as_bytes());
            buf.push(SEP);
        }
    }

    /// Length of [`encode_into`](Self::encode_into) output.
    pub(crate) fn encoded_len(&self) -> usize {
        self.0
            .iter()
            .map(|l| l.name.len() + l.value.len() + 2)
            .sum()
    }

    /// Decodes a label set previously written by `encode_into`.
    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let corrupt = |reason: &str| StoreError::CorruptedKey {
            key: bytes.to_vec(),
            reason: reason.to_string(),
        };

        if bytes.is_empty() {
            return Ok(Self(Arc::from(Vec::new())));
        }
        if bytes.last() != Some(&SEP) {
            return Err(corrupt("label set is not terminated"));
        }

        let parts: Vec<&[u8]> = bytes[..bytes.len() - 1].split(|&b| b == SEP).collect();
        if parts.len() % 2 != 0 {
            return Err(corrupt("label name without value"));
        }

        let mut labels = Vec::with_capacity(parts.len() / 2);
        for pair in parts.chunks_exact(2) {
            let name = std::str::from_utf8(pair[0]).map_err(|_| corrupt("label name is not UTF-8"))?;
            let value =
                std::str::from_utf8(pair[1]).map_err(|_| corrupt("label value is not UTF-8"))?;
            labels.push(Label::new(name, value));
        }

        // Encoded sets are already canonical.
        Ok(Self(labels.into()))
    }
}

impl<'a> IntoIterator for &'a Labels {
    type Item = &'a Label;
    type IntoIter = std::slice::Iter<'a, Label>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, label) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={:?}", label.name, label.value)?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_order() {
        let a = Labels::from_pairs([("job", "node"), ("__name__", "up")]);
        let b = Labels::from_pairs([("__name__", "up"), ("job", "node")]);
        assert_eq!(a, b);
        assert_eq!(a.iter().next().unwrap().name, "__name__");
        assert_eq!(a.metric_name(), Some("up"));
        assert_eq!(a.get("job"), Some("node"));
        assert_eq!(a.get("missing"), None);
    }

    #[test]
    fn test_encode_decode() {
        let labels = Labels::from_pairs([("__name__", "cpu"), ("host", "web-1"), ("empty", "")]);
        let mut buf = Vec::new();
        labels.encode_into(&mut buf);
        assert_eq!(buf.len(), labels.encoded_len());

        let decoded = Labels::decode(&buf).unwrap();
        assert_eq!(decoded, labels);
    }

    #[test]
    fn test_decode_empty_set() {
        let decoded = Labels::decode(&[]).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Labels::decode(b"name").is_err());
        assert!(Labels::decode(b"name\xff").is_err());
        assert!(Labels::decode(b"\xc3\x28\xffv\xff").is_err());
    }

    #[test]
    fn test_display() {
        let labels = Labels::from_pairs([("host", "a"), ("__name__", "up")]);
        assert_eq!(labels.to_string(), r#"{__name__="up", host="a"}"#);
    }
}
