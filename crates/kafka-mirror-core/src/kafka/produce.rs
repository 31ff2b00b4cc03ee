//! Kafka Produce API implementation.

use bytes::BytesMut;
use indexmap::IndexMap;
use kafka_protocol::messages::{
    ApiKey, ProduceRequest, ProduceResponse as KafkaProduceResponse, TopicName,
};
use kafka_protocol::protocol::StrBytes;
use kafka_protocol::records::{
    Compression, Record, RecordBatchEncoder, RecordEncodeOptions, TimestampType,
    NO_PARTITION_LEADER_EPOCH, NO_PRODUCER_EPOCH, NO_PRODUCER_ID, NO_SEQUENCE,
};
use tracing::trace;

use super::KafkaClient;
use crate::config::{MirrorOptions, ProduceAcks};
use crate::error::{codes, KafkaError};
use crate::record::MirrorRecord;
use crate::Result;

/// Acknowledgement level and broker-side timeout for produce requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProduceOptions {
    pub acks: ProduceAcks,
    pub timeout_ms: i32,
}

impl Default for ProduceOptions {
    fn default() -> Self {
        Self {
            acks: ProduceAcks::All,
            timeout_ms: 30_000,
        }
    }
}

impl From<&MirrorOptions> for ProduceOptions {
    fn from(options: &MirrorOptions) -> Self {
        Self {
            acks: options.produce_acks,
            timeout_ms: options.produce_timeout_ms,
        }
    }
}

/// Response from a produce operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProduceResponse {
    /// Base offset assigned to the first record, -1 when unknown
    pub base_offset: i64,
    /// Error code (0 = success)
    pub error_code: i16,
    /// Number of records produced
    pub record_count: usize,
}

impl ProduceResponse {
    /// Response for a request the broker does not acknowledge
    pub fn unacknowledged(record_count: usize) -> Self {
        Self {
            base_offset: -1,
            error_code: codes::NONE,
            record_count,
        }
    }
}

/// Produce records to a topic/partition as one record batch.
///
/// Keys, values, headers and timestamps are copied from the source records;
/// offsets are assigned by the sink.
pub async fn produce(
    client: &KafkaClient,
    topic: &str,
    partition: i32,
    records: Vec<MirrorRecord>,
    options: &ProduceOptions,
) -> Result<ProduceResponse> {
    if records.is_empty() {
        return Ok(ProduceResponse::unacknowledged(0));
    }

    let record_count = records.len();
    let records_bytes = encode_batch(records)?;

    let partition_data = kafka_protocol::messages::produce_request::PartitionProduceData::default()
        .with_index(partition)
        .with_records(Some(records_bytes));

    let topic_data = kafka_protocol::messages::produce_request::TopicProduceData::default()
        .with_name(TopicName(StrBytes::from_string(topic.to_string())))
        .with_partition_data(vec![partition_data]);

    let request = ProduceRequest::default()
        .with_acks(options.acks.as_i16())
        .with_timeout_ms(options.timeout_ms)
        .with_topic_data(vec![topic_data]);

    if options.acks == ProduceAcks::None {
        client.send_without_response(ApiKey::Produce, request).await?;
        trace!(
            "Sent {} records to {}:{} without acknowledgement",
            record_count,
            topic,
            partition
        );
        return Ok(ProduceResponse::unacknowledged(record_count));
    }

    let response: KafkaProduceResponse = client.send_request(ApiKey::Produce, request).await?;

    let partition_response = response
        .responses
        .iter()
        .filter(|t| t.name.as_str() == topic)
        .flat_map(|t| t.partition_responses.iter())
        .find(|p| p.index == partition)
        .ok_or_else(|| {
            KafkaError::Protocol("No partition response in produce response".to_string())
        })?;

    if partition_response.error_code != codes::NONE {
        return Err(KafkaError::BrokerError {
            code: partition_response.error_code,
            message: format!(
                "Produce of {} records to {}:{} failed",
                record_count, topic, partition
            ),
        }
        .into());
    }

    trace!(
        "Produced {} records to {}:{} at offset {}",
        record_count,
        topic,
        partition,
        partition_response.base_offset
    );

    Ok(ProduceResponse {
        base_offset: partition_response.base_offset,
        error_code: partition_response.error_code,
        record_count,
    })
}

/// Encode records into an uncompressed v2 record batch
fn encode_batch(records: Vec<MirrorRecord>) -> Result<bytes::Bytes> {
    let kafka_records: Vec<Record> = records
        .into_iter()
        .enumerate()
        .map(|(i, r)| {
            // Repeated header keys collapse to the last value
            let headers: IndexMap<StrBytes, Option<bytes::Bytes>> = r
                .headers
                .into_iter()
                .map(|h| (StrBytes::from_string(h.key), h.value))
                .collect();

            Record {
                transactional: false,
                control: false,
                partition_leader_epoch: NO_PARTITION_LEADER_EPOCH,
                producer_id: NO_PRODUCER_ID,
                producer_epoch: NO_PRODUCER_EPOCH,
                timestamp_type: TimestampType::Creation,
                offset: i as i64, // relative; the broker assigns the real offset
                sequence: NO_SEQUENCE,
                timestamp: r.timestamp,
                key: r.key,
                value: r.value,
                headers,
            }
        })
        .collect();

    let options = RecordEncodeOptions {
        version: 2,
        compression: Compression::None,
    };

    let mut records_buf = BytesMut::new();
    RecordBatchEncoder::encode::<
        _,
        _,
        fn(&mut BytesMut, &mut BytesMut, Compression) -> anyhow::Result<()>,
    >(&mut records_buf, kafka_records.iter(), &options)
        .map_err(|e| KafkaError::Protocol(format!("Failed to encode records: {:?}", e)))?;

    Ok(records_buf.freeze())
}
