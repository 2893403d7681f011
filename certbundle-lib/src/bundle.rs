//! Bundle output types and their canonical JSON shape.

use crate::keys::PrivateKey;
use crate::parser::{Certificate, KeyAlgorithm};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Status bit: some chain certificate expires within the warning window.
pub const BUNDLE_EXPIRING: u32 = 1 << 0;
/// Status bit: the chain is not ubiquitous (weak hash or a platform that
/// does not trust the root).
pub const BUNDLE_NOT_UBIQUITOUS: u32 = 1 << 1;

/// Diagnostics attached to a bundle.
#[derive(Debug, Clone, Serialize)]
pub struct BundleStatus {
    /// Whether the output chain differs from the input certificates.
    #[serde(rename = "rebundled")]
    pub is_rebundled: bool,
    /// Uppercase-hex Subject Key Identifiers of expiring chain certificates.
    #[serde(rename = "expiring_SKIs")]
    pub expiring_skis: Vec<String>,
    /// Platforms whose trust store lacks the chain's root.
    #[serde(rename = "untrusted_root_stores")]
    pub untrusted_root_stores: Vec<String>,
    /// Bitfield of `BUNDLE_EXPIRING` / `BUNDLE_NOT_UBIQUITOUS`; 0 is clean.
    pub code: u32,
    /// Human-readable warnings.
    pub messages: Vec<String>,
}

/// A bundling result: the selected chain (root excluded) plus metadata.
///
/// Not mutated after the assembler returns it, except that the remote
/// adapter may append a soft dial warning to `status.messages`.
#[derive(Debug, Clone)]
pub struct Bundle {
    /// The leaf certificate.
    pub cert: Certificate,
    /// The supplied private key, if any.
    pub key: Option<PrivateKey>,
    /// The selected chain, leaf first, trusted root stripped.
    pub chain: Vec<Certificate>,
    /// Leaf issuer, one-line.
    pub issuer: String,
    /// Leaf subject, one-line.
    pub subject: String,
    /// Leaf CN plus SAN DNS names, deduplicated.
    pub hostnames: Vec<String>,
    /// Earliest NotAfter over the chain, Unix timestamp.
    pub expires: i64,
    pub status: BundleStatus,
}

impl Bundle {
    /// Human-oriented key type label for the leaf ("2048-bit RSA",
    /// "ECDSA P-256", or the raw algorithm name).
    pub fn key_type(&self) -> String {
        match &self.cert.key_algorithm {
            KeyAlgorithm::Rsa { bits, .. } => format!("{}-bit RSA", bits),
            KeyAlgorithm::Ecdsa { curve, .. } => format!("ECDSA {}", curve.name()),
            KeyAlgorithm::Other(name) => name.clone(),
        }
    }

    /// Key size of the leaf in bits (0 when unknown).
    pub fn key_size(&self) -> u32 {
        match &self.cert.key_algorithm {
            KeyAlgorithm::Rsa { bits, .. } => *bits,
            KeyAlgorithm::Ecdsa { curve, .. } => curve.bits(),
            KeyAlgorithm::Other(_) => 0,
        }
    }

    /// PEM concatenation of the chain (root excluded).
    pub fn chain_pem(&self) -> String {
        self.chain.iter().map(|c| c.to_pem()).collect()
    }
}

impl Serialize for Bundle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let expires = OffsetDateTime::from_unix_timestamp(self.expires)
            .ok()
            .and_then(|t| t.format(&Rfc3339).ok())
            .unwrap_or_default();

        let mut st = serializer.serialize_struct("Bundle", 14)?;
        st.serialize_field("bundle", &self.chain_pem())?;
        st.serialize_field("crt", &self.cert.to_pem())?;
        st.serialize_field("key", self.key.as_ref().map(|k| k.pem()).unwrap_or(""))?;
        st.serialize_field("key_type", &self.key_type())?;
        st.serialize_field("key_size", &self.key_size())?;
        st.serialize_field("issuer", &self.issuer)?;
        st.serialize_field("subject", &self.subject)?;
        st.serialize_field("hostnames", &self.hostnames)?;
        st.serialize_field("expires", &expires)?;
        st.serialize_field("signature", &self.cert.signature_algorithm)?;
        st.serialize_field("ocsp_support", &!self.cert.ocsp_urls.is_empty())?;
        st.serialize_field("ocsp", &self.cert.ocsp_urls)?;
        st.serialize_field("crl_support", &!self.cert.crl_urls.is_empty())?;
        st.serialize_field("status", &self.status)?;
        st.end()
    }
}
