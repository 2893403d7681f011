//! Fetching a peer certificate chain from a live TLS server.
//!
//! The dial is attempted twice: first anchored on the engine's root pool,
//! then, if the strict handshake fails, with certificate verification
//! disabled so an expired or incomplete peer chain can still be salvaged
//! and rebundled. The strict failure is reported to the caller as a
//! warning, not an error.

use crate::parser::{parse_certificate_der, Certificate};
use crate::pool::CertificatePool;
use crate::BundleError;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Dial `<server_name|ip>:443` and return the peer chain (leaf first)
/// along with the strict-handshake error message when only the insecure
/// retry succeeded.
pub fn fetch_peer_chain(
    server_name: &str,
    ip: Option<&str>,
    roots: &CertificatePool,
) -> Result<(Vec<Certificate>, Option<String>), BundleError> {
    let dial_addr = format!("{}:443", ip.unwrap_or(server_name));
    debug!(addr = %dial_addr, "bundling from remote");

    // Pin the process-level provider so the builder below never has to
    // guess between compiled-in providers.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let sni = ServerName::try_from(server_name.to_string())
        .map_err(|e| BundleError::DialFailed(format!("invalid server name: {}", e)))?;

    let mut root_store = RootCertStore::empty();
    root_store.add_parsable_certificates(
        roots
            .iter()
            .map(|c| CertificateDer::from(c.raw_der.clone())),
    );
    let strict_config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    match handshake(Arc::new(strict_config), sni.clone(), &dial_addr) {
        Ok(peer_der) => Ok((parse_peer_chain(&peer_der)?, None)),
        Err(err) => {
            debug!(addr = %dial_addr, "dial failed: {}, retrying insecurely", err);
            let dial_warning = format!(
                "Failed rigid TLS handshake with {}: {}",
                dial_addr, err
            );

            let mut insecure_config = ClientConfig::builder()
                .with_root_certificates(RootCertStore::empty())
                .with_no_client_auth();
            insecure_config
                .dangerous()
                .set_certificate_verifier(Arc::new(AcceptAnyCertificate));

            let peer_der = handshake(Arc::new(insecure_config), sni, &dial_addr)
                .map_err(BundleError::DialFailed)?;
            Ok((parse_peer_chain(&peer_der)?, Some(dial_warning)))
        }
    }
}

/// Complete a TLS handshake and return the peer's DER chain, leaf first.
fn handshake(
    config: Arc<ClientConfig>,
    sni: ServerName<'static>,
    addr: &str,
) -> Result<Vec<Vec<u8>>, String> {
    let sock_addr = addr
        .to_socket_addrs()
        .map_err(|e| format!("resolve {}: {}", addr, e))?
        .next()
        .ok_or_else(|| format!("no addresses for {}", addr))?;

    let mut tcp = TcpStream::connect_timeout(&sock_addr, DIAL_TIMEOUT)
        .map_err(|e| format!("connect {}: {}", addr, e))?;
    tcp.set_read_timeout(Some(DIAL_TIMEOUT)).ok();
    tcp.set_write_timeout(Some(DIAL_TIMEOUT)).ok();

    let mut conn =
        ClientConnection::new(config, sni).map_err(|e| format!("TLS setup: {}", e))?;
    while conn.is_handshaking() {
        conn.complete_io(&mut tcp)
            .map_err(|e| format!("TLS handshake: {}", e))?;
    }

    let peer = conn
        .peer_certificates()
        .ok_or_else(|| "server sent no certificates".to_string())?;
    Ok(peer.iter().map(|c| c.as_ref().to_vec()).collect())
}

fn parse_peer_chain(peer_der: &[Vec<u8>]) -> Result<Vec<Certificate>, BundleError> {
    peer_der.iter().map(|der| parse_certificate_der(der)).collect()
}

/// Certificate verifier for the insecure retry: accepts any peer chain so
/// it can be extracted and rebundled.
#[derive(Debug)]
struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
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
            SignatureScheme::RSA_PKCS1_SHA1,
            SignatureScheme::ECDSA_SHA1_Legacy,
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
            SignatureScheme::ED448,
        ]
    }
}
