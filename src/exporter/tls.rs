// SPDX-License-Identifier: Apache-2.0

//! TLS client configuration for the collector connection.
//!
//! Trust comes from the platform's native roots by default; a CA file can
//! override them, and verification can be skipped entirely for self-signed
//! test collectors. Client certificates are not used: the protocol
//! authenticates with the shared-secret handshake.

use std::error::Error;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::warn;

#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// PEM file with the CA certificate to trust instead of native roots.
    pub ca_file: Option<String>,
    /// Trust any server certificate. Only for collectors with self-signed
    /// certificates that are fully trusted.
    pub skip_verify: bool,
}

pub fn build_client_config(
    opts: &TlsOptions,
) -> Result<ClientConfig, Box<dyn Error + Send + Sync>> {
    let builder = ClientConfig::builder();

    let config = if opts.skip_verify {
        builder
            .dangerous()
            .with_custom_certificate_verifier(SkipServerVerification::new())
            .with_no_client_auth()
    } else if let Some(ca_file) = &opts.ca_file {
        let cert = CertificateDer::from_pem_file(ca_file)
            .map_err(|e| format!("unable to load CA file {}: {}", ca_file, e))?;
        let mut roots = RootCertStore::empty();
        roots.add(cert)?;
        builder
            .with_root_certificates(roots)
            .with_no_client_auth()
    } else {
        let result = rustls_native_certs::load_native_certs();
        for err in &result.errors {
            warn!(error = %err, "skipped an unreadable native root certificate");
        }
        let mut roots = RootCertStore::empty();
        for cert in result.certs {
            roots.add(cert)?;
        }
        if roots.is_empty() {
            return Err("no native root certificates could be loaded".into());
        }
        builder
            .with_root_certificates(roots)
            .with_no_client_auth()
    };

    Ok(config)
}

/// Upgrade an established TCP stream to TLS.
pub async fn connect(
    stream: TcpStream,
    host: &str,
    config: Arc<ClientConfig>,
) -> Result<TlsStream<TcpStream>, Box<dyn Error + Send + Sync>> {
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| format!("invalid TLS server name {}: {}", host, e))?;
    let connector = TlsConnector::from(config);
    let tls = connector.connect(server_name, stream).await?;
    Ok(tls)
}

// Accepts any server certificate. Matches the insecure skip-verify escape
// hatch found in most collectors' TLS settings.
struct SkipServerVerification;

impl SkipServerVerification {
    fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl Debug for SkipServerVerification {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SkipServerVerification")
    }
}

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}
