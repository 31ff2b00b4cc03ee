//! Client side of SASL/SCRAM-SHA-256 and SCRAM-SHA-512 (RFC 5802, RFC 7677).
//!
//! The exchange is two round trips over SaslAuthenticate:
//! client-first → server-first, client-final → server-final.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::Rng;
use sha2::{Digest, Sha256, Sha512};

use crate::config::SaslMechanism;
use crate::{Error, Result};

/// GS2 header for a client without channel binding or authzid
const GS2_HEADER: &str = "n,,";

/// base64 of [`GS2_HEADER`]
const CHANNEL_BINDING: &str = "biws";

/// Hash family behind a SCRAM mechanism
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScramAlgorithm {
    Sha256,
    Sha512,
}

impl ScramAlgorithm {
    /// The algorithm for a SCRAM mechanism, `None` for PLAIN
    pub fn for_mechanism(mechanism: SaslMechanism) -> Option<Self> {
        match mechanism {
            SaslMechanism::Plain => None,
            SaslMechanism::ScramSha256 => Some(ScramAlgorithm::Sha256),
            SaslMechanism::ScramSha512 => Some(ScramAlgorithm::Sha512),
        }
    }

    pub(crate) fn hmac(self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        let invalid = |e: hmac::digest::InvalidLength| {
            Error::Authentication(format!("HMAC key rejected: {}", e))
        };
        Ok(match self {
            ScramAlgorithm::Sha256 => {
                let mut mac = Hmac::<Sha256>::new_from_slice(key).map_err(invalid)?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            ScramAlgorithm::Sha512 => {
                let mut mac = Hmac::<Sha512>::new_from_slice(key).map_err(invalid)?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
        })
    }

    pub(crate) fn hash(self, data: &[u8]) -> Vec<u8> {
        match self {
            ScramAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            ScramAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    pub(crate) fn salted_password(self, password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8> {
        match self {
            ScramAlgorithm::Sha256 => {
                let mut out = vec![0u8; 32];
                pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut out);
                out
            }
            ScramAlgorithm::Sha512 => {
                let mut out = vec![0u8; 64];
                pbkdf2_hmac::<Sha512>(password, salt, iterations, &mut out);
                out
            }
        }
    }
}

/// One SCRAM conversation from the client's side.
pub struct ScramClient {
    algorithm: ScramAlgorithm,
    password: String,
    nonce: String,
    client_first_bare: String,
}

/// Server signature the server-final message must carry
pub struct ExpectedServerSignature(Vec<u8>);

impl ScramClient {
    pub fn new(algorithm: ScramAlgorithm, username: &str, password: &str) -> Self {
        let nonce: [u8; 24] = rand::thread_rng().gen();
        Self::with_nonce(algorithm, username, password, BASE64.encode(nonce))
    }

    pub(crate) fn with_nonce(
        algorithm: ScramAlgorithm,
        username: &str,
        password: &str,
        nonce: String,
    ) -> Self {
        let client_first_bare = format!("n={},r={}", escape_username(username), nonce);
        Self {
            algorithm,
            password: password.to_string(),
            nonce,
            client_first_bare,
        }
    }

    pub fn client_first(&self) -> String {
        format!("{}{}", GS2_HEADER, self.client_first_bare)
    }

    /// Answer the server-first message with the client proof.
    pub fn client_final(&self, server_first: &str) -> Result<(String, ExpectedServerSignature)> {
        let challenge = ServerFirst::parse(server_first)?;
        if !challenge.nonce.starts_with(&self.nonce) || challenge.nonce.len() == self.nonce.len() {
            return Err(Error::Authentication(
                "SCRAM server nonce does not extend the client nonce".to_string(),
            ));
        }

        let algorithm = self.algorithm;
        let salted = algorithm.salted_password(
            self.password.as_bytes(),
            &challenge.salt,
            challenge.iterations,
        );
        let client_key = algorithm.hmac(&salted, b"Client Key")?;
        let stored_key = algorithm.hash(&client_key);
        let server_key = algorithm.hmac(&salted, b"Server Key")?;

        let without_proof = format!("c={},r={}", CHANNEL_BINDING, challenge.nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, server_first, without_proof
        );

        let client_signature = algorithm.hmac(&stored_key, auth_message.as_bytes())?;
        let proof: Vec<u8> = client_key
            .iter()
            .zip(&client_signature)
            .map(|(k, s)| k ^ s)
            .collect();

        let server_signature = algorithm.hmac(&server_key, auth_message.as_bytes())?;

        Ok((
            format!("{},p={}", without_proof, BASE64.encode(proof)),
            ExpectedServerSignature(server_signature),
        ))
    }
}

impl ExpectedServerSignature {
    /// The server-final message a broker knowing the password sends
    #[cfg(test)]
    pub(crate) fn server_final(&self) -> String {
        format!("v={}", BASE64.encode(&self.0))
    }

    /// Check the server-final message; a mismatch means the broker does not
    /// know the password.
    pub fn verify(&self, server_final: &str) -> Result<()> {
        if let Some(error) = server_final.strip_prefix("e=") {
            return Err(Error::Authentication(format!(
                "SCRAM server rejected the proof: {}",
                error
            )));
        }

        let signature = server_final
            .split(',')
            .find_map(|attr| attr.strip_prefix("v="))
            .ok_or_else(|| {
                Error::Authentication("SCRAM server-final carries no signature".to_string())
            })?;
        let signature = BASE64.decode(signature).map_err(|e| {
            Error::Authentication(format!("SCRAM server signature is not base64: {}", e))
        })?;

        if signature != self.0 {
            return Err(Error::Authentication(
                "SCRAM server signature mismatch".to_string(),
            ));
        }
        Ok(())
    }
}

struct ServerFirst {
    nonce: String,
    salt: Vec<u8>,
    iterations: u32,
}

impl ServerFirst {
    fn parse(message: &str) -> Result<Self> {
        let malformed = |what: &str| {
            Error::Authentication(format!("malformed SCRAM server-first ({}): {}", what, message))
        };

        let (mut nonce, mut salt, mut iterations) = (None, None, None);
        for attr in message.split(',') {
            match attr.split_once('=') {
                Some(("r", value)) => nonce = Some(value.to_string()),
                Some(("s", value)) => {
                    salt = Some(BASE64.decode(value).map_err(|_| malformed("salt"))?)
                }
                Some(("i", value)) => {
                    iterations = Some(value.parse::<u32>().map_err(|_| malformed("iterations"))?)
                }
                Some(("m", _)) => return Err(malformed("mandatory extension")),
                Some(("e", error)) => {
                    return Err(Error::Authentication(format!(
                        "SCRAM server error: {}",
                        error
                    )))
                }
                _ => {}
            }
        }

        let iterations = iterations.ok_or_else(|| malformed("iterations"))?;
        if iterations == 0 {
            return Err(malformed("iterations"));
        }

        Ok(Self {
            nonce: nonce.ok_or_else(|| malformed("nonce"))?,
            salt: salt.ok_or_else(|| malformed("salt"))?,
            iterations,
        })
    }
}

/// `saslname` escaping of RFC 5802: `=` and `,` are reserved.
fn escape_username(username: &str) -> String {
    username.replace('=', "=3D").replace(',', "=2C")
}
