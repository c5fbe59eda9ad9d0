//! TLS client configuration for SMTPS and STARTTLS.
//!
//! - Builds a `rustls::ClientConfig` from the saved options (webpki roots,
//!   extra CA bundle, client certificate, optional no-verify mode).
//! - Wraps a connected socket in a TLS session.

use std::io::Cursor;
use std::sync::Arc;

use log::{debug, warn};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::error::{SmtpError, SmtpResult};
use crate::types::SmtpConfig;

/// The configuration to use for a handshake: the caller-supplied one, or
/// one assembled from the individual TLS options.
pub async fn client_config(cfg: &SmtpConfig) -> SmtpResult<Arc<rustls::ClientConfig>> {
    if let Some(ref tls) = cfg.tls_config {
        return Ok(Arc::clone(tls));
    }

    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(ref bundle) = cfg.cert_bundle {
        let certs = read_certs(bundle).await?;
        debug!("Loaded {} CA certificate(s) from {}", certs.len(), bundle);
        for cert in certs {
            roots
                .add(cert)
                .map_err(|e| SmtpError::tls(format!("Failed to add CA cert: {}", e)))?;
        }
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| SmtpError::tls(format!("TLS setup failed: {}", e)))?
        .with_root_certificates(roots);
    let mut tls = match cfg.client_cert {
        Some(ref cert_path) => {
            let chain = read_certs(cert_path).await?;
            let key_path = cfg.client_key.as_deref().unwrap_or(cert_path);
            let key = read_key(key_path).await?;
            builder
                .with_client_auth_cert(chain, key)
                .map_err(|e| SmtpError::tls(format!("Invalid client certificate: {}", e)))?
        }
        None => builder.with_no_client_auth(),
    };

    if !cfg.validate_certs {
        warn!("TLS certificate verification disabled – insecure!");
        tls.dangerous()
            .set_certificate_verifier(Arc::new(NoCertVerifier));
    }

    Ok(Arc::new(tls))
}

/// Perform the client handshake on an established socket.
pub async fn handshake(
    tcp: TcpStream,
    server_hostname: &str,
    config: Arc<rustls::ClientConfig>,
) -> SmtpResult<TlsStream<TcpStream>> {
    let server_name = ServerName::try_from(server_hostname.to_string())
        .map_err(|e| SmtpError::tls(format!("Invalid server name {}: {}", server_hostname, e)))?;

    TlsConnector::from(config)
        .connect(server_name, tcp)
        .await
        .map_err(|e| SmtpError::tls(format!("TLS handshake failed: {}", e)))
}

async fn read_pem(path: &str) -> SmtpResult<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| SmtpError::tls(format!("Failed to read {}: {}", path, e)))
}

async fn read_certs(path: &str) -> SmtpResult<Vec<CertificateDer<'static>>> {
    let pem = read_pem(path).await?;
    let certs = rustls_pemfile::certs(&mut Cursor::new(pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| SmtpError::tls(format!("Invalid certificate in {}: {}", path, e)))?;
    if certs.is_empty() {
        return Err(SmtpError::tls(format!("No certificates found in {}", path)));
    }
    Ok(certs)
}

async fn read_key(path: &str) -> SmtpResult<PrivateKeyDer<'static>> {
    let pem = read_pem(path).await?;
    rustls_pemfile::private_key(&mut Cursor::new(pem))
        .map_err(|e| SmtpError::tls(format!("Invalid private key in {}: {}", path, e)))?
        .ok_or_else(|| SmtpError::tls(format!("No private key found in {}", path)))
}

// ─── NoCertVerifier (validate_certs = false) ────────────────────────

#[derive(Debug)]
struct NoCertVerifier;

impl rustls::client::danger::ServerCertVerifier for NoCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
