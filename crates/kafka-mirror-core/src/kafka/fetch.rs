//! Kafka Fetch and ListOffsets API implementation.

use bytes::{Buf, Bytes};
use indexmap::IndexMap;
use kafka_protocol::messages::{
    fetch_request::{FetchPartition, FetchTopic},
    ApiKey, BrokerId, FetchRequest, FetchResponse, ListOffsetsRequest, ListOffsetsResponse,
    TopicName,
};
use kafka_protocol::protocol::StrBytes;
use kafka_protocol::records::{Record, RecordBatchDecoder};
use tracing::{debug, trace};

use super::KafkaClient;
use crate::error::{codes, KafkaError};
use crate::record::{MirrorRecord, RecordHeader};
use crate::Result;

/// Size of the fixed batch prefix: base offset (i64) + batch length (i32).
const BATCH_LENGTH_PREFIX: usize = 12;

/// Batch bytes after the length prefix up to and including
/// `lastOffsetDelta`: leader epoch, magic, crc, attributes, delta.
const V2_HEADER_THROUGH_LAST_DELTA: usize = 4 + 1 + 4 + 2 + 4;

/// Limits applied to every fetch request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Longest time the broker may hold the request waiting for data
    pub max_wait_ms: i32,
    /// Upper bound on the whole response
    pub max_bytes: i32,
    /// Upper bound per partition
    pub partition_max_bytes: i32,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_wait_ms: 500,
            max_bytes: 50 * 1024 * 1024,
            partition_max_bytes: 1024 * 1024,
        }
    }
}

/// One partition to read, starting at `offset`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionFetchRequest {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// What a broker returned for one partition
#[derive(Debug, Clone)]
pub struct PartitionFetchResult {
    pub topic: String,
    pub partition: i32,
    /// Data records at or after the requested offset, control records removed
    pub records: Vec<MirrorRecord>,
    /// Position to fetch from next
    pub next_offset: i64,
    pub high_watermark: i64,
    /// Broker or transport failure for this partition
    pub error: Option<KafkaError>,
}

impl PartitionFetchResult {
    /// Result carrying only an error; the position does not move
    pub fn failed(request: &PartitionFetchRequest, error: KafkaError) -> Self {
        Self {
            topic: request.topic.clone(),
            partition: request.partition,
            records: Vec::new(),
            next_offset: request.offset,
            high_watermark: -1,
            error: Some(error),
        }
    }
}

/// Fetch records from every partition in `partitions` with one request.
///
/// All partitions must be led by the broker `client` is connected to.
pub async fn fetch(
    client: &KafkaClient,
    partitions: &[PartitionFetchRequest],
    options: &FetchOptions,
) -> Result<Vec<PartitionFetchResult>> {
    if partitions.is_empty() {
        return Ok(Vec::new());
    }

    // Group by topic, keeping first-seen order
    let mut by_topic: IndexMap<&str, Vec<FetchPartition>> = IndexMap::new();
    for request in partitions {
        by_topic
            .entry(request.topic.as_str())
            .or_default()
            .push(
                FetchPartition::default()
                    .with_partition(request.partition)
                    .with_fetch_offset(request.offset)
                    .with_partition_max_bytes(options.partition_max_bytes)
                    .with_log_start_offset(-1),
            );
    }

    let topics: Vec<FetchTopic> = by_topic
        .into_iter()
        .map(|(topic, partitions)| {
            FetchTopic::default()
                .with_topic(TopicName(StrBytes::from_string(topic.to_string())))
                .with_partitions(partitions)
        })
        .collect();

    let request = FetchRequest::default()
        .with_replica_id(BrokerId(-1))
        .with_max_wait_ms(options.max_wait_ms)
        .with_min_bytes(1)
        .with_max_bytes(options.max_bytes)
        .with_isolation_level(0) // READ_UNCOMMITTED
        .with_topics(topics);

    let response: FetchResponse = client.send_request(ApiKey::Fetch, request).await?;

    if response.error_code != codes::NONE {
        return Err(KafkaError::BrokerError {
            code: response.error_code,
            message: "Fetch request rejected".to_string(),
        }
        .into());
    }

    let mut results = Vec::with_capacity(partitions.len());

    for request in partitions {
        let partition_response = response
            .responses
            .iter()
            .filter(|t| t.topic.as_str() == request.topic)
            .flat_map(|t| t.partitions.iter())
            .find(|p| p.partition_index == request.partition);

        let Some(partition_response) = partition_response else {
            results.push(PartitionFetchResult::failed(
                request,
                KafkaError::PartitionNotAvailable {
                    topic: request.topic.clone(),
                    partition: request.partition,
                },
            ));
            continue;
        };

        if partition_response.error_code != codes::NONE {
            results.push(PartitionFetchResult::failed(
                request,
                KafkaError::BrokerError {
                    code: partition_response.error_code,
                    message: format!("Fetch error for {}:{}", request.topic, request.partition),
                },
            ));
            continue;
        }

        let (records, next_offset) = match &partition_response.records {
            Some(data) if !data.is_empty() => {
                decode_partition_records(&request.topic, request.partition, request.offset, data)?
            }
            _ => (Vec::new(), request.offset),
        };

        trace!(
            "Fetched {} records from {}:{} at offset {} (next {}, hwm {})",
            records.len(),
            request.topic,
            request.partition,
            request.offset,
            next_offset,
            partition_response.high_watermark
        );

        results.push(PartitionFetchResult {
            topic: request.topic.clone(),
            partition: request.partition,
            records,
            next_offset,
            high_watermark: partition_response.high_watermark,
            error: None,
        });
    }

    Ok(results)
}

/// Decode the record batches of one partition.
///
/// Returns the data records at or after `fetch_offset` and the next position.
/// The position moves to the end of the last complete batch as recorded in
/// its header, so control records and compacted-away tails are skipped too.
fn decode_partition_records(
    topic: &str,
    partition: i32,
    fetch_offset: i64,
    data: &Bytes,
) -> Result<(Vec<MirrorRecord>, i64)> {
    let BatchScan {
        complete: mut buf,
        end_offset,
    } = scan_batches(data);
    if buf.is_empty() {
        debug!(
            "Partition {}:{} returned only a partial batch at offset {}",
            topic, partition, fetch_offset
        );
        return Ok((Vec::new(), fetch_offset));
    }

    let decoded = RecordBatchDecoder::decode::<
        _,
        fn(&mut Bytes, kafka_protocol::records::Compression) -> anyhow::Result<Bytes>,
    >(&mut buf)
    .map_err(|e| KafkaError::Protocol(format!("Failed to decode records: {:?}", e)))?;

    let mut next_offset = end_offset.map_or(fetch_offset, |end| end.max(fetch_offset));
    let mut records = Vec::with_capacity(decoded.len());

    for record in decoded {
        if record.offset < fetch_offset {
            continue;
        }
        next_offset = next_offset.max(record.offset + 1);
        if record.control {
            continue;
        }
        records.push(convert_record(topic, partition, record));
    }

    Ok((records, next_offset))
}

/// Complete batches of a partition's record set.
struct BatchScan {
    /// Record set without a trailing batch cut off by `partition_max_bytes`
    complete: Bytes,
    /// Offset after the last complete v2 batch (`baseOffset + lastOffsetDelta + 1`)
    end_offset: Option<i64>,
}

fn scan_batches(data: &Bytes) -> BatchScan {
    let mut cursor = data.clone();
    let mut complete = 0usize;
    let mut end_offset = None;

    while cursor.remaining() >= BATCH_LENGTH_PREFIX {
        let base_offset = cursor.get_i64();
        let batch_len = cursor.get_i32();
        if batch_len < 0 || cursor.remaining() < batch_len as usize {
            break;
        }

        let mut header = cursor.slice(..batch_len as usize);
        if header.remaining() >= V2_HEADER_THROUGH_LAST_DELTA {
            let _leader_epoch = header.get_i32();
            let magic = header.get_i8();
            let _crc = header.get_u32();
            let _attributes = header.get_i16();
            let last_offset_delta = header.get_i32();
            if magic == 2 {
                let end = base_offset + i64::from(last_offset_delta) + 1;
                end_offset = Some(end_offset.map_or(end, |prev: i64| prev.max(end)));
            }
        }

        cursor.advance(batch_len as usize);
        complete += BATCH_LENGTH_PREFIX + batch_len as usize;
    }

    BatchScan {
        complete: data.slice(..complete),
        end_offset,
    }
}

fn convert_record(topic: &str, partition: i32, record: Record) -> MirrorRecord {
    let headers = record
        .headers
        .into_iter()
        .map(|(key, value)| RecordHeader::new(key.to_string(), value))
        .collect();

    MirrorRecord {
        topic: topic.to_string(),
        partition,
        offset: record.offset,
        key: record.key,
        value: record.value,
        headers,
        timestamp: record.timestamp,
    }
}

/// List offset for a specific timestamp (`-2` earliest, `-1` latest)
pub async fn list_offset(
    client: &KafkaClient,
    topic: &str,
    partition: i32,
    timestamp: i64,
) -> Result<i64> {
    let list_partition =
        kafka_protocol::messages::list_offsets_request::ListOffsetsPartition::default()
            .with_partition_index(partition)
            .with_timestamp(timestamp);

    let list_topic = kafka_protocol::messages::list_offsets_request::ListOffsetsTopic::default()
        .with_name(TopicName(StrBytes::from_string(topic.to_string())))
        .with_partitions(vec![list_partition]);

    let request = ListOffsetsRequest::default()
        .with_replica_id(BrokerId(-1))
        .with_isolation_level(0)
        .with_topics(vec![list_topic]);

    let response: ListOffsetsResponse = client.send_request(ApiKey::ListOffsets, request).await?;

    let partition_response = response
        .topics
        .iter()
        .filter(|t| t.name.as_str() == topic)
        .flat_map(|t| t.partitions.iter())
        .find(|p| p.partition_index == partition)
        .ok_or_else(|| KafkaError::PartitionNotAvailable {
            topic: topic.to_string(),
            partition,
        })?;

    if partition_response.error_code != codes::NONE {
        return Err(KafkaError::BrokerError {
            code: partition_response.error_code,
            message: format!("ListOffsets error for {}:{}", topic, partition),
        }
        .into());
    }

    Ok(partition_response.offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use kafka_protocol::records::{
        Compression, RecordBatchEncoder, RecordEncodeOptions, TimestampType,
        NO_PARTITION_LEADER_EPOCH, NO_PRODUCER_EPOCH, NO_PRODUCER_ID, NO_SEQUENCE,
    };

    fn record(offset: i64, control: bool) -> Record {
        let mut headers = IndexMap::new();
        headers.insert(
            StrBytes::from_static_str("trace"),
            Some(Bytes::from_static(b"t1")),
        );
        Record {
            transactional: control,
            control,
            partition_leader_epoch: NO_PARTITION_LEADER_EPOCH,
            producer_id: NO_PRODUCER_ID,
            producer_epoch: NO_PRODUCER_EPOCH,
            timestamp_type: TimestampType::Creation,
            offset,
            sequence: NO_SEQUENCE,
            timestamp: 1_700_000_000_000 + offset,
            key: Some(Bytes::from(format!("k{}", offset))),
            value: Some(Bytes::from(format!("v{}", offset))),
            headers,
        }
    }

    fn encode(records: &[Record]) -> Bytes {
        let mut buf = BytesMut::new();
        RecordBatchEncoder::encode::<
            _,
            _,
            fn(&mut BytesMut, &mut BytesMut, Compression) -> anyhow::Result<()>,
        >(
            &mut buf,
            records.iter(),
            &RecordEncodeOptions {
                version: 2,
                compression: Compression::None,
            },
        )
        .unwrap();
        buf.freeze()
    }

    #[test]
    fn test_decode_skips_records_before_fetch_offset() {
        let data = encode(&[record(10, false), record(11, false), record(12, false)]);
        let (records, next) = decode_partition_records("orders", 0, 11, &data).unwrap();

        assert_eq!(
            records.iter().map(|r| r.offset).collect::<Vec<_>>(),
            vec![11, 12]
        );
        assert_eq!(next, 13);
        assert_eq!(records[0].key.as_deref(), Some(&b"k11"[..]));
        assert_eq!(records[0].headers[0].key, "trace");
        assert_eq!(records[0].timestamp, 1_700_000_000_011);
    }

    #[test]
    fn test_control_batch_advances_position_without_records() {
        let mut data = BytesMut::new();
        data.extend_from_slice(&encode(&[record(3, true)]));
        data.extend_from_slice(&encode(&[record(4, false)]));

        let (records, next) = decode_partition_records("orders", 1, 3, &data.freeze()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].offset, 4);
        assert_eq!(records[0].partition, 1);
        assert_eq!(next, 5);
    }

    #[test]
    fn test_partial_trailing_batch_is_ignored() {
        let first = encode(&[record(0, false), record(1, false)]);
        let second = encode(&[record(2, false)]);
        let mut data = BytesMut::new();
        data.extend_from_slice(&first);
        data.extend_from_slice(&second[..second.len() - 3]);

        let data = data.freeze();
        assert_eq!(scan_batches(&data).complete.len(), first.len());

        let (records, next) = decode_partition_records("orders", 0, 0, &data).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(next, 2);
    }

    #[test]
    fn test_position_follows_batch_header_past_compacted_tail() {
        let mut batch = BytesMut::from(&encode(&[record(20, false), record(21, false)])[..]);
        // lastOffsetDelta sits 23 bytes into a v2 batch; widen it as compaction would
        batch[23..27].copy_from_slice(&6i32.to_be_bytes());

        let scan = scan_batches(&batch.freeze());
        assert_eq!(scan.end_offset, Some(27));
    }

    #[test]
    fn test_position_uses_last_complete_batch_header() {
        let mut data = BytesMut::new();
        data.extend_from_slice(&encode(&[record(0, false), record(1, false)]));
        data.extend_from_slice(&encode(&[record(2, false), record(3, false)]));

        let scan = scan_batches(&data.freeze());
        assert_eq!(scan.end_offset, Some(4));
    }

    #[test]
    fn test_only_partial_batch_keeps_position() {
        let batch = encode(&[record(5, false)]);
        let truncated = batch.slice(..batch.len() / 2);
        let (records, next) = decode_partition_records("orders", 0, 5, &truncated).unwrap();
        assert!(records.is_empty());
        assert_eq!(next, 5);
    }

    #[test]
    fn test_failed_result_keeps_position() {
        let request = PartitionFetchRequest {
            topic: "orders".to_string(),
            partition: 2,
            offset: 40,
        };
        let result = PartitionFetchResult::failed(
            &request,
            KafkaError::BrokerError {
                code: codes::OFFSET_OUT_OF_RANGE,
                message: "out of range".to_string(),
            },
        );
        assert_eq!(result.next_offset, 40);
        assert_eq!(
            result.error.and_then(|e| e.code()),
            Some(codes::OFFSET_OUT_OF_RANGE)
        );
    }
}
