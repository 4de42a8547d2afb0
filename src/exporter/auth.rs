// SPDX-License-Identifier: Apache-2.0

//! Shared-secret handshake.
//!
//! The client never sends the secret itself. It sends a proof: an
//! HMAC-SHA256 over its name, a millisecond timestamp and a random nonce,
//! keyed by the secret. The collector recomputes the proof and answers with
//! `Welcome`, or rejects by sending `Error` or closing the connection.
//! A handshake that does not complete within its window counts as rejected.

use std::time::Duration;

use base64::Engine;
use futures::{Sink, SinkExt, Stream, StreamExt};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::io;
use tokio::time::timeout;

use crate::exporter::errors::ExporterError;
use crate::exporter::message::Message;

type HmacSha256 = Hmac<Sha256>;

/// Immutable for the process lifetime.
#[derive(Debug, Clone)]
pub struct AgentIdentity {
    pub client: String,
    pub secret: String,
}

/// Compute the handshake proof for the given parameters.
pub fn compute_proof(secret: &str, client: &str, timestamp_ms: u64, nonce: &str) -> String {
    let string_to_sign = format!("{}\n{}\n{}", client, timestamp_ms, nonce);

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(string_to_sign.as_bytes());
    let result = mac.finalize();
    base64::engine::general_purpose::STANDARD.encode(result.into_bytes())
}

/// Constant-time proof verification, for the collector side of the exchange.
pub fn verify_proof(
    secret: &str,
    client: &str,
    timestamp_ms: u64,
    nonce: &str,
    proof: &str,
) -> bool {
    let Ok(tag) = base64::engine::general_purpose::STANDARD.decode(proof) else {
        return false;
    };
    let string_to_sign = format!("{}\n{}\n{}", client, timestamp_ms, nonce);

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(string_to_sign.as_bytes());
    mac.verify_slice(&tag).is_ok()
}

/// Build a `Hello` with a fresh nonce and timestamp.
pub fn hello(identity: &AgentIdentity) -> Message {
    let timestamp_ms = crate::tail::tailer::now_millis();
    let nonce_bytes: [u8; 16] = rand::random();
    let nonce = base64::engine::general_purpose::STANDARD.encode(nonce_bytes);
    let proof = compute_proof(&identity.secret, &identity.client, timestamp_ms, &nonce);

    Message::Hello {
        client: identity.client.clone(),
        timestamp_ms,
        nonce,
        proof,
    }
}

/// Run the client side of the handshake over an established transport.
///
/// State machine: Disconnected -> HelloSent -> Authenticated | Rejected.
/// Rejection, an unexpected reply, a closed connection, and a timeout all
/// surface as [`ExporterError::Auth`]; transport failures while sending stay
/// network errors.
pub async fn handshake<S, R>(
    sink: &mut S,
    stream: &mut R,
    identity: &AgentIdentity,
    window: Duration,
) -> Result<(), ExporterError>
where
    S: Sink<Message, Error = io::Error> + Unpin,
    R: Stream<Item = Result<Message, io::Error>> + Unpin,
{
    sink.send(hello(identity))
        .await
        .map_err(ExporterError::from_io)?;

    match timeout(window, stream.next()).await {
        Err(_) => Err(ExporterError::Auth(format!(
            "no handshake response within {:?}",
            window
        ))),
        Ok(None) => Err(ExporterError::Auth(
            "connection closed during handshake".to_string(),
        )),
        Ok(Some(Err(e))) => Err(ExporterError::from_io(e)),
        Ok(Some(Ok(Message::Welcome))) => Ok(()),
        Ok(Some(Ok(Message::Error { reason }))) => Err(ExporterError::Auth(reason)),
        Ok(Some(Ok(other))) => Err(ExporterError::Auth(format!(
            "unexpected handshake reply: {:?}",
            other
        ))),
    }
}
