//! Records moved from the source cluster to the sink cluster.

use bytes::Bytes;
use serde::Serialize;

/// A record header. Kafka allows repeated keys, so headers keep their order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordHeader {
    pub key: String,
    pub value: Option<Bytes>,
}

impl RecordHeader {
    pub fn new(key: impl Into<String>, value: Option<Bytes>) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// A record fetched from the source, forwarded to the same topic and
/// partition on the sink.
///
/// Key, value, timestamp and distinct header keys are forwarded unchanged.
/// The produce codec stores headers in a map, so when a key repeats only its
/// last value reaches the sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MirrorRecord {
    pub topic: String,
    pub partition: i32,
    /// Offset on the source partition (the sink assigns its own)
    pub offset: i64,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub headers: Vec<RecordHeader>,
    /// Original record timestamp in epoch milliseconds
    pub timestamp: i64,
}

impl MirrorRecord {
    /// Payload size: key, value and header bytes.
    pub fn size_bytes(&self) -> usize {
        let key = self.key.as_ref().map_or(0, |k| k.len());
        let value = self.value.as_ref().map_or(0, |v| v.len());
        let headers: usize = self
            .headers
            .iter()
            .map(|h| h.key.len() + h.value.as_ref().map_or(0, |v| v.len()))
            .sum();
        key + value + headers
    }
}
