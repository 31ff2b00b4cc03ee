//! Kafka client for protocol-level communication.

use bytes::{BufMut, Bytes, BytesMut};
use kafka_protocol::messages::{
    ApiKey, RequestHeader, ResponseHeader, SaslAuthenticateRequest, SaslAuthenticateResponse,
    SaslHandshakeRequest, SaslHandshakeResponse,
};
use kafka_protocol::protocol::StrBytes;
use kafka_protocol::protocol::{Decodable, Encodable};
use socket2::{SockRef, TcpKeepalive};
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::rustls::pki_types::ServerName;
use tracing::{debug, trace, warn};

use crate::config::{KafkaConfig, SaslMechanism};
use crate::error::KafkaError;
use crate::record::MirrorRecord;
use crate::Result;

use super::admin::{CreateTopicResult, DeleteTopicResult, TopicToCreate};
use super::fetch::{FetchOptions, PartitionFetchRequest, PartitionFetchResult};
use super::metadata::ClusterMetadata;
use super::produce::{ProduceOptions, ProduceResponse};
use super::scram::{ScramAlgorithm, ScramClient};

/// Kafka client holding one connection to one broker.
///
/// The connection is opened lazily and dropped after any failed exchange, so
/// the next request reconnects instead of reading a half-consumed stream.
pub struct KafkaClient {
    config: KafkaConfig,

    connection: Mutex<Option<ConnectionStream>>,

    correlation_id: AtomicI32,
}

/// A stream that can be either plain TCP or TLS-wrapped
enum ConnectionStream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl ConnectionStream {
    async fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        match self {
            ConnectionStream::Plain(s) => {
                s.read_exact(buf).await?;
                Ok(())
            }
            ConnectionStream::Tls(s) => {
                s.read_exact(buf).await?;
                Ok(())
            }
        }
    }

    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            ConnectionStream::Plain(s) => s.write_all(buf).await,
            ConnectionStream::Tls(s) => s.write_all(buf).await,
        }
    }
}

impl KafkaClient {
    /// Create a new Kafka client. No connection is made until the first
    /// request or an explicit [`KafkaClient::connect`].
    pub fn new(config: KafkaConfig) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
            correlation_id: AtomicI32::new(1),
        }
    }

    /// Configuration this client connects with
    pub fn config(&self) -> &KafkaConfig {
        &self.config
    }

    /// Connect eagerly, failing if no bootstrap server is reachable
    pub async fn connect(&self) -> Result<()> {
        let mut conn = self.connection.lock().await;
        if conn.is_none() {
            *conn = Some(self.open_connection().await?);
        }
        Ok(())
    }

    /// Try each bootstrap server until one connects and authenticates
    async fn open_connection(&self) -> Result<ConnectionStream> {
        for server in &self.config.bootstrap_servers {
            match self.try_connect(server).await {
                Ok(mut stream) => {
                    if self.config.security.security_protocol.uses_sasl() {
                        self.authenticate(&mut stream).await?;
                    }

                    debug!("Connected to Kafka broker: {}", server);
                    return Ok(stream);
                }
                Err(e) => {
                    debug!("Failed to connect to {}: {}", server, e);
                    continue;
                }
            }
        }

        Err(KafkaError::NoBrokersAvailable.into())
    }

    async fn try_connect(&self, server: &str) -> Result<ConnectionStream> {
        let tcp_stream =
            TcpStream::connect(server)
                .await
                .map_err(|e| KafkaError::ConnectionFailed {
                    broker: server.to_string(),
                    message: e.to_string(),
                })?;

        self.configure_socket(&tcp_stream, server)?;

        if !self.config.security.security_protocol.uses_tls() {
            return Ok(ConnectionStream::Plain(tcp_stream));
        }

        debug!("Establishing TLS connection to {}", server);

        let connector = super::tls::connector(&self.config.security)?;

        let hostname = server.rsplit_once(':').map_or(server, |(host, _)| host);
        let server_name = ServerName::try_from(hostname.to_string()).map_err(|e| {
            KafkaError::ConnectionFailed {
                broker: server.to_string(),
                message: format!("Invalid server name for TLS: {}", e),
            }
        })?;

        let tls_stream = connector
            .connect(server_name, tcp_stream)
            .await
            .map_err(|e| KafkaError::ConnectionFailed {
                broker: server.to_string(),
                message: format!("TLS handshake failed: {}", e),
            })?;

        debug!("TLS connection established to {}", server);
        Ok(ConnectionStream::Tls(Box::new(tls_stream)))
    }

    /// Configure TCP socket options (keepalive, nodelay) based on connection config.
    fn configure_socket(&self, stream: &TcpStream, server: &str) -> Result<()> {
        let conn_config = &self.config.connection;
        let sock_ref = SockRef::from(stream);

        if conn_config.tcp_nodelay {
            sock_ref
                .set_nodelay(true)
                .map_err(|e| KafkaError::ConnectionFailed {
                    broker: server.to_string(),
                    message: format!("Failed to set TCP_NODELAY: {}", e),
                })?;
        }

        if conn_config.tcp_keepalive {
            let keepalive = TcpKeepalive::new()
                .with_time(Duration::from_secs(conn_config.keepalive_time_secs))
                .with_interval(Duration::from_secs(conn_config.keepalive_interval_secs));

            sock_ref
                .set_tcp_keepalive(&keepalive)
                .map_err(|e| KafkaError::ConnectionFailed {
                    broker: server.to_string(),
                    message: format!("Failed to set TCP keepalive: {}", e),
                })?;

            trace!(
                "TCP keepalive enabled for {}: time={}s, interval={}s",
                server,
                conn_config.keepalive_time_secs,
                conn_config.keepalive_interval_secs
            );
        }

        Ok(())
    }

    async fn authenticate(&self, stream: &mut ConnectionStream) -> Result<()> {
        let security = &self.config.security;
        let Some(mechanism) = security.sasl_mechanism else {
            return Ok(());
        };
        let username = security.sasl_username.as_deref().unwrap_or("");
        let password = security.sasl_password.as_deref().unwrap_or("");

        self.sasl_handshake(stream, mechanism).await?;
        match ScramAlgorithm::for_mechanism(mechanism) {
            None => self.sasl_plain_auth(stream, username, password).await?,
            Some(algorithm) => {
                self.sasl_scram_auth(stream, algorithm, username, password)
                    .await?
            }
        }

        debug!("SASL {} authentication successful", mechanism.as_str());
        Ok(())
    }

    async fn sasl_handshake(
        &self,
        stream: &mut ConnectionStream,
        mechanism: SaslMechanism,
    ) -> Result<()> {
        let request = SaslHandshakeRequest::default().with_mechanism(mechanism.as_str().into());
        let response: SaslHandshakeResponse = self
            .exchange(stream, ApiKey::SaslHandshake, request)
            .await?;

        if response.error_code != 0 {
            let enabled: Vec<String> = response.mechanisms.iter().map(|m| m.to_string()).collect();
            return Err(crate::Error::Authentication(format!(
                "SASL handshake rejected {} (error code {}, broker offers [{}])",
                mechanism.as_str(),
                response.error_code,
                enabled.join(", ")
            )));
        }
        Ok(())
    }

    /// One SaslAuthenticate round trip; returns the broker's auth bytes
    async fn sasl_authenticate(&self, stream: &mut ConnectionStream, token: Vec<u8>) -> Result<Bytes> {
        let request = SaslAuthenticateRequest::default().with_auth_bytes(Bytes::from(token));
        let response: SaslAuthenticateResponse = self
            .exchange(stream, ApiKey::SaslAuthenticate, request)
            .await?;

        if response.error_code != 0 {
            return Err(crate::Error::Authentication(format!(
                "SASL authentication failed: {}",
                response
                    .error_message
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| format!("error code {}", response.error_code))
            )));
        }
        Ok(response.auth_bytes)
    }

    async fn sasl_plain_auth(
        &self,
        stream: &mut ConnectionStream,
        username: &str,
        password: &str,
    ) -> Result<()> {
        // PLAIN token: authzid NUL username NUL password
        let mut token = Vec::with_capacity(username.len() + password.len() + 2);
        token.push(0);
        token.extend_from_slice(username.as_bytes());
        token.push(0);
        token.extend_from_slice(password.as_bytes());

        self.sasl_authenticate(stream, token).await?;
        Ok(())
    }

    async fn sasl_scram_auth(
        &self,
        stream: &mut ConnectionStream,
        algorithm: ScramAlgorithm,
        username: &str,
        password: &str,
    ) -> Result<()> {
        let scram = ScramClient::new(algorithm, username, password);

        let server_first = self
            .sasl_authenticate(stream, scram.client_first().into_bytes())
            .await?;
        let server_first = std::str::from_utf8(&server_first).map_err(|_| {
            crate::Error::Authentication("SCRAM server-first is not UTF-8".to_string())
        })?;

        let (client_final, expected) = scram.client_final(server_first)?;
        let server_final = self
            .sasl_authenticate(stream, client_final.into_bytes())
            .await?;
        let server_final = std::str::from_utf8(&server_final).map_err(|_| {
            crate::Error::Authentication("SCRAM server-final is not UTF-8".to_string())
        })?;

        expected.verify(server_final)
    }

    fn next_correlation_id(&self) -> i32 {
        self.correlation_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Encode a length-prefixed request frame
    fn encode_frame<Req>(&self, api_key: ApiKey, request: &Req) -> Result<(BytesMut, i16)>
    where
        Req: Encodable,
    {
        let correlation_id = self.next_correlation_id();
        let api_version = self.get_api_version(api_key);

        let header = RequestHeader::default()
            .with_request_api_key(api_key as i16)
            .with_request_api_version(api_version)
            .with_correlation_id(correlation_id)
            .with_client_id(Some(StrBytes::from_string(self.config.client_id.clone())));

        let header_version = api_key.request_header_version(api_version);
        let mut buf = BytesMut::new();

        // Length prefix, patched once the body is encoded
        buf.put_i32(0);

        header
            .encode(&mut buf, header_version)
            .map_err(|e| KafkaError::Protocol(format!("Failed to encode header: {:?}", e)))?;
        request
            .encode(&mut buf, api_version)
            .map_err(|e| KafkaError::Protocol(format!("Failed to encode request: {:?}", e)))?;

        let len = (buf.len() - 4) as i32;
        buf[0..4].copy_from_slice(&len.to_be_bytes());

        trace!(
            "Encoded request: api_key={:?}, api_version={}, correlation_id={}, len={}",
            api_key,
            api_version,
            correlation_id,
            len
        );

        Ok((buf, api_version))
    }

    /// Write one request and read its response on `stream`
    async fn exchange<Req, Resp>(
        &self,
        stream: &mut ConnectionStream,
        api_key: ApiKey,
        request: Req,
    ) -> Result<Resp>
    where
        Req: Encodable,
        Resp: Decodable,
    {
        let (buf, api_version) = self.encode_frame(api_key, &request)?;

        stream
            .write_all(&buf)
            .await
            .map_err(|e| KafkaError::Protocol(format!("Failed to send request: {}", e)))?;

        let mut len_buf = [0u8; 4];
        stream
            .read_exact(&mut len_buf)
            .await
            .map_err(|e| KafkaError::Protocol(format!("Failed to read response length: {}", e)))?;
        let response_len = i32::from_be_bytes(len_buf);
        if response_len < 0 {
            return Err(
                KafkaError::Protocol(format!("Negative response length {}", response_len)).into(),
            );
        }

        trace!("Receiving response: len={}", response_len);

        let mut response_buf = vec![0u8; response_len as usize];
        stream
            .read_exact(&mut response_buf)
            .await
            .map_err(|e| KafkaError::Protocol(format!("Failed to read response body: {}", e)))?;

        let mut response_bytes = Bytes::from(response_buf);
        let response_header_version = api_key.response_header_version(api_version);
        let _response_header = ResponseHeader::decode(&mut response_bytes, response_header_version)
            .map_err(|e| {
                KafkaError::Protocol(format!("Failed to decode response header: {:?}", e))
            })?;

        let response = Resp::decode(&mut response_bytes, api_version)
            .map_err(|e| KafkaError::Protocol(format!("Failed to decode response: {:?}", e)))?;

        Ok(response)
    }

    /// Send a request and receive a response.
    ///
    /// The exchange is bounded by the connection's request timeout. On any
    /// failure the connection is discarded.
    pub async fn send_request<Req, Resp>(&self, api_key: ApiKey, request: Req) -> Result<Resp>
    where
        Req: Encodable,
        Resp: Decodable,
    {
        let mut conn = self.connection.lock().await;
        if conn.is_none() {
            *conn = Some(self.open_connection().await?);
        }
        let stream = conn
            .as_mut()
            .ok_or_else(|| KafkaError::Protocol("Not connected".to_string()))?;

        let timeout = self.config.connection.request_timeout();
        match tokio::time::timeout(timeout, self.exchange(stream, api_key, request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => {
                *conn = None;
                Err(e)
            }
            Err(_) => {
                *conn = None;
                warn!("{:?} request timed out after {:?}", api_key, timeout);
                Err(KafkaError::Timeout(format!("{:?} request after {:?}", api_key, timeout)).into())
            }
        }
    }

    /// Send a request the broker does not answer (produce with `acks = 0`)
    pub async fn send_without_response<Req>(&self, api_key: ApiKey, request: Req) -> Result<()>
    where
        Req: Encodable,
    {
        let (buf, _) = self.encode_frame(api_key, &request)?;

        let mut conn = self.connection.lock().await;
        if conn.is_none() {
            *conn = Some(self.open_connection().await?);
        }
        let stream = conn
            .as_mut()
            .ok_or_else(|| KafkaError::Protocol("Not connected".to_string()))?;

        if let Err(e) = stream.write_all(&buf).await {
            *conn = None;
            return Err(KafkaError::Protocol(format!("Failed to send request: {}", e)).into());
        }

        Ok(())
    }

    /// Get the API version to use for a given API key
    fn get_api_version(&self, api_key: ApiKey) -> i16 {
        match api_key {
            ApiKey::Metadata => 9,
            ApiKey::Fetch => 11,
            ApiKey::Produce => 8,
            ApiKey::SaslHandshake => 1,
            ApiKey::SaslAuthenticate => 2,
            ApiKey::ApiVersions => 3,
            ApiKey::ListOffsets => 5,
            ApiKey::CreateTopics => 5,
            ApiKey::DeleteTopics => 4,
            _ => 0,
        }
    }

    /// Fetch cluster metadata
    pub async fn fetch_metadata(&self, topics: Option<&[String]>) -> Result<ClusterMetadata> {
        super::metadata::fetch_metadata(self, topics).await
    }

    /// Fetch records from several partitions led by this broker
    pub async fn fetch(
        &self,
        partitions: &[PartitionFetchRequest],
        options: &FetchOptions,
    ) -> Result<Vec<PartitionFetchResult>> {
        super::fetch::fetch(self, partitions, options).await
    }

    /// Resolve a ListOffsets timestamp (or `-1`/`-2` sentinel) to an offset
    pub async fn list_offset(&self, topic: &str, partition: i32, timestamp: i64) -> Result<i64> {
        super::fetch::list_offset(self, topic, partition, timestamp).await
    }

    /// Produce records to a topic/partition
    pub async fn produce(
        &self,
        topic: &str,
        partition: i32,
        records: Vec<MirrorRecord>,
        options: &ProduceOptions,
    ) -> Result<ProduceResponse> {
        super::produce::produce(self, topic, partition, records, options).await
    }

    /// Create topics in the Kafka cluster
    pub async fn create_topics(
        &self,
        topics: Vec<TopicToCreate>,
        timeout_ms: i32,
    ) -> Result<Vec<CreateTopicResult>> {
        super::admin::create_topics(self, topics, timeout_ms).await
    }

    /// Delete topics from the Kafka cluster
    pub async fn delete_topics(
        &self,
        topics: &[String],
        timeout_ms: i32,
    ) -> Result<Vec<DeleteTopicResult>> {
        super::admin::delete_topics(self, topics, timeout_ms).await
    }
}
