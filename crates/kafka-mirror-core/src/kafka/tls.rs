//! TLS for `SSL` and `SASL_SSL` cluster connections.
//!
//! Source and sink each bring their own trust anchors and optional client
//! identity, so one connector is built per cluster from its
//! [`SecurityConfig`]. The crypto provider is chosen explicitly; nothing
//! depends on a process-wide default being installed.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use rustls_pemfile::Item;
use tokio_rustls::rustls::crypto::aws_lc_rs;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::config::SecurityConfig;
use crate::error::KafkaError;
use crate::Result;

/// Certificate chain and key presented for mutual TLS
struct ClientIdentity {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

/// Connector for one cluster's TLS connections.
pub fn connector(security: &SecurityConfig) -> Result<TlsConnector> {
    Ok(TlsConnector::from(Arc::new(build_tls_config(security)?)))
}

/// rustls client configuration for one cluster.
pub fn build_tls_config(security: &SecurityConfig) -> Result<ClientConfig> {
    let roots = trust_anchors(security.ssl_ca_location.as_deref())?;
    let identity = client_identity(security)?;

    let builder = ClientConfig::builder_with_provider(Arc::new(aws_lc_rs::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| KafkaError::TlsConfig(format!("No usable TLS protocol version: {}", e)))?
        .with_root_certificates(roots);

    match identity {
        Some(ClientIdentity { chain, key }) => builder
            .with_client_auth_cert(chain, key)
            .map_err(|e| KafkaError::TlsConfig(format!("Client certificate rejected: {}", e)).into()),
        None => Ok(builder.with_no_client_auth()),
    }
}

/// CA file contents when configured, the bundled web PKI roots otherwise.
fn trust_anchors(ca_location: Option<&Path>) -> Result<RootCertStore> {
    let Some(path) = ca_location else {
        return Ok(RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        });
    };

    let mut store = RootCertStore::empty();
    let (added, ignored) = store.add_parsable_certificates(certificates(path)?);
    if added == 0 {
        return Err(KafkaError::CertificateLoad {
            path: path.display().to_string(),
            message: format!("none of {} certificate(s) is a usable CA", ignored),
        }
        .into());
    }

    debug!("Trusting {} CA certificate(s) from {}", added, path.display());
    Ok(store)
}

/// The mTLS identity, when both halves are configured.
fn client_identity(security: &SecurityConfig) -> Result<Option<ClientIdentity>> {
    let (cert_path, key_path) = match (
        security.ssl_certificate_location.as_deref(),
        security.ssl_key_location.as_deref(),
    ) {
        (None, None) => return Ok(None),
        (Some(cert), Some(key)) => (cert, key),
        (Some(cert), None) => {
            return Err(KafkaError::TlsConfig(format!(
                "ssl_certificate_location {} needs a matching ssl_key_location",
                cert.display()
            ))
            .into())
        }
        (None, Some(key)) => {
            return Err(KafkaError::TlsConfig(format!(
                "ssl_key_location {} needs a matching ssl_certificate_location",
                key.display()
            ))
            .into())
        }
    };

    let chain = certificates(cert_path)?;
    let key = private_key(key_path)?;
    debug!(
        "Presenting client certificate {} ({} in chain)",
        cert_path.display(),
        chain.len()
    );
    Ok(Some(ClientIdentity { chain, key }))
}

fn certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let certs: Vec<_> = pem_items(path)
        .map_err(|message| KafkaError::CertificateLoad {
            path: path.display().to_string(),
            message,
        })?
        .into_iter()
        .filter_map(|item| match item {
            Item::X509Certificate(cert) => Some(cert),
            _ => None,
        })
        .collect();

    if certs.is_empty() {
        return Err(KafkaError::CertificateLoad {
            path: path.display().to_string(),
            message: "no PEM certificate in file".to_string(),
        }
        .into());
    }
    Ok(certs)
}

/// First PKCS#1, PKCS#8 or SEC1 key in the file.
fn private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    pem_items(path)
        .map_err(|message| KafkaError::PrivateKeyLoad {
            path: path.display().to_string(),
            message,
        })?
        .into_iter()
        .find_map(|item| match item {
            Item::Pkcs1Key(key) => Some(PrivateKeyDer::from(key)),
            Item::Pkcs8Key(key) => Some(PrivateKeyDer::from(key)),
            Item::Sec1Key(key) => Some(PrivateKeyDer::from(key)),
            _ => None,
        })
        .ok_or_else(|| {
            KafkaError::PrivateKeyLoad {
                path: path.display().to_string(),
                message: "no PEM private key in file".to_string(),
            }
            .into()
        })
}

/// Every PEM section of a file, unknown section types skipped.
fn pem_items(path: &Path) -> std::result::Result<Vec<Item>, String> {
    let pem = fs::read(path).map_err(|e| format!("cannot read file: {}", e))?;
    rustls_pemfile::read_all(&mut pem.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| format!("malformed PEM: {}", e))
}
