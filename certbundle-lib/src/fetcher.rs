//! Fetching intermediate certificates from AIA issuer URLs.

use crate::parser::{parse_certificate_der, parse_certificates_pem, Certificate};
use crate::util;
use crate::BundleError;
use std::io::Read;
use std::time::Duration;
use tracing::debug;

/// Remote certificates larger than this are rejected.
const MAX_RESPONSE_BYTES: u64 = 1024 * 1024;
/// Per-request timeout covering connect and body read.
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
/// Redirect budget for CA repositories that bounce between mirrors.
const MAX_REDIRECTS: usize = 3;

/// A certificate retrieved from the network together with the stash file
/// name derived from its source.
#[derive(Debug, Clone)]
pub struct FetchedIntermediate {
    pub cert: Certificate,
    /// Stash file base name; empty means "do not stash".
    pub name: String,
}

/// Retrieve a certificate from an AIA URL.
///
/// The body is parsed as a DER certificate first; if that fails, as PEM
/// (taking the first certificate block). The suggested stash name is the
/// URL's basename.
pub fn fetch_remote_certificate(cert_url: &str) -> Result<FetchedIntermediate, BundleError> {
    debug!(url = %cert_url, "fetching remote certificate");

    let client = reqwest::blocking::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .build()
        .map_err(|e| BundleError::FetchFailed(e.to_string()))?;

    let resp = client
        .get(cert_url)
        .send()
        .map_err(|e| BundleError::FetchFailed(format!("{}: {}", cert_url, e)))?;
    if !resp.status().is_success() {
        return Err(BundleError::FetchFailed(format!(
            "{}: HTTP {}",
            cert_url,
            resp.status()
        )));
    }

    let mut body = Vec::new();
    resp.take(MAX_RESPONSE_BYTES + 1)
        .read_to_end(&mut body)
        .map_err(|e| BundleError::FetchFailed(format!("{}: {}", cert_url, e)))?;
    if body.len() as u64 > MAX_RESPONSE_BYTES {
        return Err(BundleError::FetchFailed(format!(
            "{}: response exceeds {} bytes",
            cert_url, MAX_RESPONSE_BYTES
        )));
    }

    let cert = match parse_certificate_der(&body) {
        Ok(cert) => cert,
        Err(_) => {
            debug!(url = %cert_url, "DER parse failed, trying PEM");
            parse_certificates_pem(&body)?
                .into_iter()
                .next()
                .ok_or_else(|| {
                    BundleError::DecodeFailed("fetched data contains no certificate".into())
                })?
        }
    };

    debug!(url = %cert_url, subject = %cert.subject, "certificate fetch succeeded");
    Ok(FetchedIntermediate {
        cert,
        name: util::url_basename(cert_url),
    })
}
