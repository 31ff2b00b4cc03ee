//! Error types for the Kafka mirror core library.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the Kafka mirror library.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed topic offset specification
    #[error("Invalid topic spec token '{token}': {reason}")]
    Format { token: String, reason: String },

    /// The same topic was requested more than once
    #[error("Topic requested more than once: {0}")]
    DuplicateTopic(String),

    /// Requested topics that do not exist on the source cluster
    #[error("Source topics missing: {}", .0.join(", "))]
    MissingTopics(Vec<String>),

    /// Kafka protocol or broker error
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    /// Sink metadata did not reflect an admin change in time
    #[error(
        "Timed out after {timeout:?} waiting for topic {phase} to converge: {}",
        pending.join(", ")
    )]
    ConvergenceTimeout {
        phase: ConvergencePhase,
        pending: Vec<String>,
        timeout: Duration,
    },

    /// Unrecoverable fetch failure on the source cluster
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Authentication error
    #[error("Authentication error: {0}")]
    Authentication(String),
}

/// Reconciliation phase that waits on sink metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergencePhase {
    Deletion,
    Creation,
}

impl fmt::Display for ConvergencePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvergencePhase::Deletion => f.write_str("deletion"),
            ConvergencePhase::Creation => f.write_str("creation"),
        }
    }
}

/// Kafka-specific errors
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum KafkaError {
    /// Connection failed
    #[error("Failed to connect to broker {broker}: {message}")]
    ConnectionFailed { broker: String, message: String },

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Broker error response
    #[error("Broker returned error code {code} ({}): {message}", error_code_name(*.code))]
    BrokerError { code: i16, message: String },

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// No available brokers
    #[error("No available brokers")]
    NoBrokersAvailable,

    /// Partition not available
    #[error("Partition {partition} not available for topic {topic}")]
    PartitionNotAvailable { topic: String, partition: i32 },

    /// TLS configuration error
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    /// Certificate loading error
    #[error("Failed to load certificate from {path}: {message}")]
    CertificateLoad { path: String, message: String },

    /// Private key loading error
    #[error("Failed to load private key from {path}: {message}")]
    PrivateKeyLoad { path: String, message: String },
}

impl KafkaError {
    /// Broker error code carried by this error, if any.
    pub fn code(&self) -> Option<i16> {
        match self {
            KafkaError::BrokerError { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Kafka protocol error codes this crate reacts to.
pub mod codes {
    pub const NONE: i16 = 0;
    pub const OFFSET_OUT_OF_RANGE: i16 = 1;
    pub const UNKNOWN_TOPIC_OR_PARTITION: i16 = 3;
    pub const LEADER_NOT_AVAILABLE: i16 = 5;
    pub const NOT_LEADER_OR_FOLLOWER: i16 = 6;
    pub const REQUEST_TIMED_OUT: i16 = 7;
    pub const TOPIC_ALREADY_EXISTS: i16 = 36;
    pub const INVALID_PARTITIONS: i16 = 37;
    pub const INVALID_REPLICATION_FACTOR: i16 = 38;
    pub const NOT_CONTROLLER: i16 = 41;
    pub const TOPIC_DELETION_DISABLED: i16 = 73;
    pub const FENCED_LEADER_EPOCH: i16 = 74;
}

/// Human readable name for the error codes seen while mirroring.
pub fn error_code_name(code: i16) -> &'static str {
    match code {
        codes::NONE => "NONE",
        codes::OFFSET_OUT_OF_RANGE => "OFFSET_OUT_OF_RANGE",
        codes::UNKNOWN_TOPIC_OR_PARTITION => "UNKNOWN_TOPIC_OR_PARTITION",
        codes::LEADER_NOT_AVAILABLE => "LEADER_NOT_AVAILABLE",
        codes::NOT_LEADER_OR_FOLLOWER => "NOT_LEADER_OR_FOLLOWER",
        codes::REQUEST_TIMED_OUT => "REQUEST_TIMED_OUT",
        codes::TOPIC_ALREADY_EXISTS => "TOPIC_ALREADY_EXISTS",
        codes::INVALID_PARTITIONS => "INVALID_PARTITIONS",
        codes::INVALID_REPLICATION_FACTOR => "INVALID_REPLICATION_FACTOR",
        codes::NOT_CONTROLLER => "NOT_CONTROLLER",
        codes::TOPIC_DELETION_DISABLED => "TOPIC_DELETION_DISABLED",
        codes::FENCED_LEADER_EPOCH => "FENCED_LEADER_EPOCH",
        _ => "UNKNOWN",
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_topics_lists_every_name() {
        let err = Error::MissingTopics(vec!["orders".to_string(), "payments".to_string()]);
        assert_eq!(err.to_string(), "Source topics missing: orders, payments");
    }

    #[test]
    fn test_broker_error_includes_code_name() {
        let err = KafkaError::BrokerError {
            code: codes::TOPIC_ALREADY_EXISTS,
            message: "orders".to_string(),
        };
        assert!(err.to_string().contains("TOPIC_ALREADY_EXISTS"));
        assert_eq!(err.code(), Some(36));
    }

    #[test]
    fn test_convergence_timeout_message() {
        let err = Error::ConvergenceTimeout {
            phase: ConvergencePhase::Deletion,
            pending: vec!["orders".to_string()],
            timeout: Duration::from_secs(10),
        };
        let msg = err.to_string();
        assert!(msg.contains("deletion"));
        assert!(msg.contains("orders"));
    }
}
