//! Certificate pools: subject-indexed sets of certificates.
//!
//! The verifier resolves "who issued this certificate?" by looking up the
//! issuer name in a pool, so certificates are indexed by their raw subject
//! DER. Two pools exist per engine: trust anchors (fixed after init) and
//! intermediates (may grow while a bundling operation walks AIA URLs).

use crate::parser::{parse_certificates_pem, Certificate};
use crate::BundleError;
use std::collections::HashMap;

/// An unordered set of certificates keyed by raw subject DER.
#[derive(Default)]
pub struct CertificatePool {
    certs_by_subject: HashMap<Vec<u8>, Vec<Certificate>>,
    count: usize,
}

impl std::fmt::Debug for CertificatePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificatePool")
            .field("count", &self.count)
            .finish()
    }
}

impl CertificatePool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a certificate. Duplicates (same DER) are ignored.
    pub fn add(&mut self, cert: Certificate) {
        let entry = self
            .certs_by_subject
            .entry(cert.subject_raw.clone())
            .or_default();
        if entry.iter().any(|c| c.raw_der == cert.raw_der) {
            return;
        }
        entry.push(cert);
        self.count += 1;
    }

    /// Add every certificate from a PEM bundle. Returns the number added.
    pub fn add_pem_bundle(&mut self, pem_data: &[u8]) -> Result<usize, BundleError> {
        let certs = parse_certificates_pem(pem_data)?;
        let before = self.count;
        for cert in certs {
            self.add(cert);
        }
        Ok(self.count - before)
    }

    /// Certificates whose subject matches the given raw name bytes.
    pub fn find_by_subject(&self, subject_raw: &[u8]) -> &[Certificate] {
        self.certs_by_subject
            .get(subject_raw)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether the exact certificate (by DER) is in the pool.
    pub fn contains(&self, cert: &Certificate) -> bool {
        self.find_by_subject(&cert.subject_raw)
            .iter()
            .any(|c| c.raw_der == cert.raw_der)
    }

    /// Number of certificates in the pool.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Iterate over all certificates in the pool.
    pub fn iter(&self) -> impl Iterator<Item = &Certificate> {
        self.certs_by_subject.values().flatten()
    }
}
