//! Configuration structures for mirroring topics between Kafka clusters.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::offset_spec::{StartOffset, TopicSpecSet};
use crate::wait::PollSchedule;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Cluster records are read from
    pub source: KafkaConfig,

    /// Cluster records are written to
    pub sink: KafkaConfig,

    /// Topic specs: `topic`, `topic@offset` or `topic@partition:offset,...`
    #[serde(default)]
    pub topics: Vec<String>,

    /// Mirror behaviour
    #[serde(default)]
    pub mirror: MirrorOptions,
}

/// Kafka cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Bootstrap servers
    pub bootstrap_servers: Vec<String>,

    /// Client id sent with every request
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Security configuration
    #[serde(default)]
    pub security: SecurityConfig,

    /// TCP connection settings
    #[serde(default)]
    pub connection: ConnectionConfig,
}

fn default_client_id() -> String {
    "kafka-mirror".to_string()
}

impl KafkaConfig {
    /// Plaintext configuration for the given bootstrap servers
    pub fn new(bootstrap_servers: Vec<String>) -> Self {
        Self {
            bootstrap_servers,
            client_id: default_client_id(),
            security: SecurityConfig::default(),
            connection: ConnectionConfig::default(),
        }
    }
}

/// Security configuration for Kafka connections
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Security protocol
    #[serde(default)]
    pub security_protocol: SecurityProtocol,

    /// SASL mechanism (if using SASL)
    #[serde(default)]
    pub sasl_mechanism: Option<SaslMechanism>,

    /// SASL username
    #[serde(default)]
    pub sasl_username: Option<String>,

    /// SASL password
    #[serde(default)]
    pub sasl_password: Option<String>,

    /// Path to CA certificate file (for TLS)
    #[serde(default)]
    pub ssl_ca_location: Option<PathBuf>,

    /// Path to client certificate file (for mTLS)
    #[serde(default)]
    pub ssl_certificate_location: Option<PathBuf>,

    /// Path to client key file (for mTLS)
    #[serde(default)]
    pub ssl_key_location: Option<PathBuf>,
}

/// Security protocol
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityProtocol {
    #[default]
    Plaintext,
    Ssl,
    SaslPlaintext,
    SaslSsl,
}

impl SecurityProtocol {
    pub fn uses_tls(self) -> bool {
        matches!(self, SecurityProtocol::Ssl | SecurityProtocol::SaslSsl)
    }

    pub fn uses_sasl(self) -> bool {
        matches!(
            self,
            SecurityProtocol::SaslPlaintext | SecurityProtocol::SaslSsl
        )
    }
}

/// SASL mechanism
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum SaslMechanism {
    Plain,
    #[serde(rename = "SCRAM-SHA-256")]
    ScramSha256,
    #[serde(rename = "SCRAM-SHA-512")]
    ScramSha512,
}

impl SaslMechanism {
    /// Mechanism name sent in the SASL handshake
    pub fn as_str(self) -> &'static str {
        match self {
            SaslMechanism::Plain => "PLAIN",
            SaslMechanism::ScramSha256 => "SCRAM-SHA-256",
            SaslMechanism::ScramSha512 => "SCRAM-SHA-512",
        }
    }
}

/// TCP socket settings for broker connections
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Enable TCP keepalive (default: true)
    #[serde(default = "default_true")]
    pub tcp_keepalive: bool,

    /// Idle time before the first keepalive packet (default: 60)
    #[serde(default = "default_keepalive_time_secs")]
    pub keepalive_time_secs: u64,

    /// Interval between keepalive packets (default: 20)
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,

    /// Disable Nagle's algorithm (default: true)
    #[serde(default = "default_true")]
    pub tcp_nodelay: bool,

    /// Upper bound on one request/response exchange (default: 40000)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            tcp_keepalive: true,
            keepalive_time_secs: default_keepalive_time_secs(),
            keepalive_interval_secs: default_keepalive_interval_secs(),
            tcp_nodelay: true,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl ConnectionConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_true() -> bool {
    true
}

fn default_keepalive_time_secs() -> u64 {
    60
}

fn default_keepalive_interval_secs() -> u64 {
    20
}

fn default_request_timeout_ms() -> u64 {
    40_000
}

/// How forwarded records are handed to the sink
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryMode {
    /// Queue batches for a background producer and keep fetching
    #[default]
    BestEffort,
    /// Wait for the sink to acknowledge every batch before the next fetch
    Acknowledged,
}

/// Produce acknowledgement level requested from the sink
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProduceAcks {
    None,
    Leader,
    #[default]
    All,
}

impl ProduceAcks {
    /// Wire value of the `acks` field
    pub fn as_i16(self) -> i16 {
        match self {
            ProduceAcks::None => 0,
            ProduceAcks::Leader => 1,
            ProduceAcks::All => -1,
        }
    }
}

/// Mirror-specific options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorOptions {
    /// Deadline for every reconciliation RPC and for each convergence wait
    /// (default: 10)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Interval between convergence checks (default: 1000)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Start position for partitions without an explicit offset
    #[serde(default)]
    pub default_offset: StartOffset,

    /// Position to jump to when a partition reports OFFSET_OUT_OF_RANGE
    #[serde(default = "default_offset_reset")]
    pub offset_reset: StartOffset,

    /// Longest time a fetch waits on the broker for data (default: 500)
    #[serde(default = "default_fetch_max_wait_ms")]
    pub fetch_max_wait_ms: i32,

    /// Upper bound on a fetch response (default: 50MB)
    #[serde(default = "default_fetch_max_bytes")]
    pub fetch_max_bytes: i32,

    /// Upper bound per partition in a fetch response (default: 1MB)
    #[serde(default = "default_partition_max_bytes")]
    pub partition_max_bytes: i32,

    /// Forwarding semantics
    #[serde(default)]
    pub delivery: DeliveryMode,

    /// Acknowledgement level for produce requests
    #[serde(default)]
    pub produce_acks: ProduceAcks,

    /// Broker-side produce timeout (default: 30000)
    #[serde(default = "default_produce_timeout_ms")]
    pub produce_timeout_ms: i32,

    /// Upper bound on one produce batch, framing included (default: 900KiB).
    /// Keep below the sink's `message.max.bytes`.
    #[serde(default = "default_produce_max_batch_bytes")]
    pub produce_max_batch_bytes: usize,

    /// Batches that may wait for the background producer (default: 1024)
    #[serde(default = "default_forward_queue_capacity")]
    pub forward_queue_capacity: usize,

    /// Interval between progress reports in the log (default: 30)
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            default_offset: StartOffset::default(),
            offset_reset: default_offset_reset(),
            fetch_max_wait_ms: default_fetch_max_wait_ms(),
            fetch_max_bytes: default_fetch_max_bytes(),
            partition_max_bytes: default_partition_max_bytes(),
            delivery: DeliveryMode::default(),
            produce_acks: ProduceAcks::default(),
            produce_timeout_ms: default_produce_timeout_ms(),
            produce_max_batch_bytes: default_produce_max_batch_bytes(),
            forward_queue_capacity: default_forward_queue_capacity(),
            report_interval_secs: default_report_interval_secs(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_offset_reset() -> StartOffset {
    StartOffset::Earliest
}

fn default_fetch_max_wait_ms() -> i32 {
    500
}

fn default_fetch_max_bytes() -> i32 {
    50 * 1024 * 1024
}

fn default_partition_max_bytes() -> i32 {
    1024 * 1024
}

fn default_produce_timeout_ms() -> i32 {
    30_000
}

fn default_produce_max_batch_bytes() -> usize {
    900 * 1024
}

fn default_forward_queue_capacity() -> usize {
    1024
}

fn default_report_interval_secs() -> u64 {
    30
}

impl MirrorOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    /// Validate mirror options
    pub fn validate(&self) -> crate::Result<()> {
        if self.timeout_secs == 0 {
            return Err(crate::Error::Config("timeout_secs must be > 0".to_string()));
        }

        if self.poll_interval_ms == 0 {
            return Err(crate::Error::Config(
                "poll_interval_ms must be > 0".to_string(),
            ));
        }

        if self.fetch_max_wait_ms < 0 {
            return Err(crate::Error::Config(
                "fetch_max_wait_ms must be >= 0".to_string(),
            ));
        }

        if self.fetch_max_bytes <= 0 || self.partition_max_bytes <= 0 {
            return Err(crate::Error::Config(
                "fetch_max_bytes and partition_max_bytes must be > 0".to_string(),
            ));
        }

        if self.produce_max_batch_bytes == 0 {
            return Err(crate::Error::Config(
                "produce_max_batch_bytes must be > 0".to_string(),
            ));
        }

        if self.forward_queue_capacity == 0 {
            return Err(crate::Error::Config(
                "forward_queue_capacity must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Config {
    /// Load a YAML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse a YAML configuration document
    pub fn from_yaml(content: &str) -> crate::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        for (role, cluster) in [("source", &self.source), ("sink", &self.sink)] {
            if cluster.bootstrap_servers.is_empty() {
                return Err(crate::Error::Config(format!(
                    "{} bootstrap_servers is empty",
                    role
                )));
            }

            let security = &cluster.security;
            if security.security_protocol.uses_sasl() {
                if security.sasl_mechanism.is_none() {
                    return Err(crate::Error::Config(format!(
                        "{} sasl_mechanism is required for {:?}",
                        role, security.security_protocol
                    )));
                }
                if security.sasl_username.is_none() || security.sasl_password.is_none() {
                    return Err(crate::Error::Config(format!(
                        "{} sasl_username and sasl_password are required for SASL",
                        role
                    )));
                }
            }
        }

        if self.topics.is_empty() {
            return Err(crate::Error::Config("topics is empty".to_string()));
        }

        self.mirror.validate()
    }

    /// Validate and parse into the immutable per-run configuration.
    ///
    /// Topic spec errors surface here, before any cluster is contacted.
    pub fn run_config(&self) -> crate::Result<RunConfig> {
        self.validate()?;
        let topics = TopicSpecSet::parse(&self.topics)?;

        Ok(RunConfig {
            topics,
            timeout: self.mirror.timeout(),
            poll_interval: self.mirror.poll_interval(),
            default_offset: self.mirror.default_offset,
        })
    }
}

/// Everything the reconciler and assigner need, fixed for the whole run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Requested topics with their offset policies, in request order
    pub topics: TopicSpecSet,
    /// Deadline shared by every reconciliation RPC and convergence wait
    pub timeout: Duration,
    /// Interval between convergence checks
    pub poll_interval: Duration,
    /// Start position for partitions without an explicit offset
    pub default_offset: StartOffset,
}

impl RunConfig {
    pub fn new(topics: TopicSpecSet, timeout: Duration) -> Self {
        Self {
            topics,
            timeout,
            poll_interval: Duration::from_millis(default_poll_interval_ms()),
            default_offset: StartOffset::default(),
        }
    }

    /// Polling schedule for both convergence phases
    pub fn poll_schedule(&self) -> PollSchedule {
        PollSchedule::new(self.poll_interval, self.timeout)
    }
}
