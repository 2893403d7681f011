//! Certificate parsing from PEM and DER formats.
//!
//! [`Certificate`] is the parsed X.509 entity the engine passes around. It
//! owns its raw DER plus the extracted fields the chain builder, the
//! ubiquity scorers, and the bundle assembler need. Fields are public so
//! the rank functions stay pure functions of plain data.

use crate::keys::EcCurve;
use crate::oid;
use crate::util;
use crate::BundleError;
use x509_parser::prelude::*;

/// Hash family of a certificate's signature algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureHash {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
    Unknown,
}

/// Public key algorithm of a certificate, with the material needed for
/// key/certificate pairing checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa {
        bits: u32,
        /// Modulus bytes with leading zero stripped.
        modulus: Vec<u8>,
    },
    Ecdsa {
        curve: EcCurve,
        /// X coordinate of the public point.
        point_x: Vec<u8>,
    },
    Other(String),
}

/// A parsed X.509 certificate.
///
/// Immutable once parsed; cloning is cheap enough for the chain sizes the
/// engine handles (a handful of certificates per chain).
#[derive(Debug, Clone)]
pub struct Certificate {
    /// DER encoding of the whole certificate.
    pub raw_der: Vec<u8>,
    /// Subject as a one-line string (e.g., "C = US, CN = example.com").
    pub subject: String,
    /// Issuer as a one-line string.
    pub issuer: String,
    /// Raw DER bytes of the subject Name, used for pool lookups.
    pub subject_raw: Vec<u8>,
    /// Raw DER bytes of the issuer Name.
    pub issuer_raw: Vec<u8>,
    /// Subject common name, if present.
    pub common_name: Option<String>,
    /// DNS names from the Subject Alternative Name extension.
    pub san_dns: Vec<String>,
    /// IP addresses from the Subject Alternative Name extension.
    pub san_ips: Vec<String>,
    /// NotBefore as a Unix timestamp.
    pub not_before: i64,
    /// NotAfter as a Unix timestamp.
    pub not_after: i64,
    /// Raw signature bytes; certificates are identified by these throughout
    /// the engine (pool membership, seen-sets, rebundle detection).
    pub signature: Vec<u8>,
    /// Signature algorithm display name (e.g., "sha256WithRSAEncryption").
    pub signature_algorithm: String,
    /// Hash family of the signature algorithm.
    pub signature_hash: SignatureHash,
    /// Public key algorithm and pairing material.
    pub key_algorithm: KeyAlgorithm,
    /// Subject Key Identifier bytes; empty when the extension is absent.
    pub subject_key_id: Vec<u8>,
    /// caIssuers URLs from the Authority Information Access extension.
    pub aia_issuer_urls: Vec<String>,
    /// OCSP responder URLs from the AIA extension.
    pub ocsp_urls: Vec<String>,
    /// URIs from the CRL Distribution Points extension.
    pub crl_urls: Vec<String>,
    /// Whether BasicConstraints marks this certificate as a CA.
    pub is_ca: bool,
    /// Whether the leaf's EKU extension admits TLS server use (serverAuth,
    /// anyExtendedKeyUsage, or legacy server-gated crypto). `None` when the
    /// extension is absent.
    pub eku_server_auth: Option<bool>,
    /// Whether the certificate verifies under its own public key.
    pub self_signed: bool,
}

impl Certificate {
    /// PEM encoding of the certificate.
    pub fn to_pem(&self) -> String {
        util::pem_encode_certificate(&self.raw_der)
    }

    /// Verify this certificate's signature against a candidate issuer's
    /// public key.
    pub fn verify_signed_by(&self, issuer: &Certificate) -> bool {
        let Ok((_, child)) = X509Certificate::from_der(&self.raw_der) else {
            return false;
        };
        let Ok((_, parent)) = X509Certificate::from_der(&issuer.raw_der) else {
            return false;
        };
        child.verify_signature(Some(parent.public_key())).is_ok()
    }

    /// Match a hostname (or IP literal) against this certificate's names.
    ///
    /// DNS names check SAN entries first with CN fallback (RFC 6125);
    /// IP literals check SAN IP entries only.
    pub fn matches_hostname(&self, host: &str) -> bool {
        if let Ok(target) = host.parse::<std::net::IpAddr>() {
            return self
                .san_ips
                .iter()
                .any(|ip| ip.parse::<std::net::IpAddr>().map_or(false, |a| a == target));
        }
        if !self.san_dns.is_empty() {
            return self
                .san_dns
                .iter()
                .any(|pattern| util::hostname_matches(pattern, host));
        }
        match &self.common_name {
            Some(cn) => util::hostname_matches(cn, host),
            None => false,
        }
    }
}

/// Parse a certificate from PEM or DER (auto-detected).
pub fn parse_certificate(input: &[u8]) -> Result<Certificate, BundleError> {
    if input.is_empty() {
        return Err(BundleError::DecodeFailed("empty input".into()));
    }
    if util::is_pem(input) {
        let certs = parse_certificates_pem(input)?;
        certs
            .into_iter()
            .next()
            .ok_or_else(|| BundleError::DecodeFailed("no certificates in PEM input".into()))
    } else {
        parse_certificate_der(input)
    }
}

/// Parse all certificates from a PEM bundle (concatenated `CERTIFICATE`
/// blocks), in input order.
pub fn parse_certificates_pem(input: &[u8]) -> Result<Vec<Certificate>, BundleError> {
    let mut certs = Vec::new();

    for pem_result in Pem::iter_from_buffer(input) {
        match pem_result {
            Ok(pem) => {
                if pem.label == "CERTIFICATE" || pem.label == "TRUSTED CERTIFICATE" {
                    certs.push(parse_certificate_der(&pem.contents)?);
                }
            }
            Err(e) => {
                // Tolerate trailing garbage once at least one block parsed.
                if !certs.is_empty() {
                    break;
                }
                return Err(BundleError::DecodeFailed(format!(
                    "failed to parse PEM: {}",
                    e
                )));
            }
        }
    }

    if certs.is_empty() {
        return Err(BundleError::DecodeFailed(
            "no certificates found in PEM input".into(),
        ));
    }

    Ok(certs)
}

/// Parse a certificate from DER bytes.
pub fn parse_certificate_der(input: &[u8]) -> Result<Certificate, BundleError> {
    let (remaining, x509) = X509Certificate::from_der(input)
        .map_err(|e| BundleError::DecodeFailed(format!("{}", e)))?;

    // Use only the actual certificate bytes, not any trailing data.
    let cert_len = input.len() - remaining.len();
    let raw_der = input.get(..cert_len).unwrap_or(input).to_vec();

    let subject = format_name(x509.subject());
    let issuer = format_name(x509.issuer());
    let subject_raw = x509.subject().as_raw().to_vec();
    let issuer_raw = x509.issuer().as_raw().to_vec();
    let common_name = extract_cn(x509.subject());

    let not_before = x509.validity().not_before.timestamp();
    let not_after = x509.validity().not_after.timestamp();

    let sig_oid = x509.signature_algorithm.algorithm.to_id_string();
    let signature_algorithm = signature_algorithm_name(&sig_oid);
    let signature_hash = signature_hash_from_oid(&sig_oid);
    let signature = x509.signature_value.data.to_vec();

    let key_algorithm = build_key_algorithm(x509.public_key());

    let is_ca = x509
        .basic_constraints()
        .ok()
        .flatten()
        .map(|bc| bc.value.ca)
        .unwrap_or(false);

    let eku_server_auth = x509.extended_key_usage().ok().flatten().map(|eku| {
        let v = eku.value;
        v.any
            || v.server_auth
            || v.other.iter().any(|o| {
                let s = o.to_id_string();
                s == oid::EKU_MS_SERVER_GATED_CRYPTO || s == oid::EKU_NS_SERVER_GATED_CRYPTO
            })
    });

    let self_signed = x509.verify_signature(None).is_ok();

    let mut san_dns = Vec::new();
    let mut san_ips = Vec::new();
    if let Ok(Some(san)) = x509.subject_alternative_name() {
        for gn in &san.value.general_names {
            match gn {
                GeneralName::DNSName(name) => san_dns.push(name.to_string()),
                GeneralName::IPAddress(bytes) => san_ips.push(format_ip_bytes(bytes)),
                _ => {}
            }
        }
    }

    let mut subject_key_id = Vec::new();
    let mut aia_issuer_urls = Vec::new();
    let mut ocsp_urls = Vec::new();
    let mut crl_urls = Vec::new();
    for ext in x509.extensions() {
        match ext.parsed_extension() {
            ParsedExtension::SubjectKeyIdentifier(ski) => {
                subject_key_id = ski.0.to_vec();
            }
            ParsedExtension::AuthorityInfoAccess(aia) => {
                for desc in &aia.accessdescs {
                    if let GeneralName::URI(uri) = &desc.access_location {
                        match desc.access_method.to_id_string().as_str() {
                            oid::ACCESS_CA_ISSUERS => aia_issuer_urls.push(uri.to_string()),
                            oid::ACCESS_OCSP => ocsp_urls.push(uri.to_string()),
                            _ => {}
                        }
                    }
                }
            }
            ParsedExtension::CRLDistributionPoints(cdp) => {
                for point in &cdp.points {
                    if let Some(x509_parser::extensions::DistributionPointName::FullName(names)) =
                        &point.distribution_point
                    {
                        for gn in names {
                            if let GeneralName::URI(uri) = gn {
                                crl_urls.push(uri.to_string());
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }

    Ok(Certificate {
        raw_der,
        subject,
        issuer,
        subject_raw,
        issuer_raw,
        common_name,
        san_dns,
        san_ips,
        not_before,
        not_after,
        signature,
        signature_algorithm,
        signature_hash,
        key_algorithm,
        subject_key_id,
        aia_issuer_urls,
        ocsp_urls,
        crl_urls,
        is_ca,
        eku_server_auth,
        self_signed,
    })
}

fn signature_hash_from_oid(oid_str: &str) -> SignatureHash {
    match oid_str {
        oid::SHA1_WITH_RSA | oid::ECDSA_WITH_SHA1 => SignatureHash::Sha1,
        oid::SHA256_WITH_RSA | oid::ECDSA_WITH_SHA256 => SignatureHash::Sha256,
        oid::SHA384_WITH_RSA | oid::ECDSA_WITH_SHA384 => SignatureHash::Sha384,
        oid::SHA512_WITH_RSA | oid::ECDSA_WITH_SHA512 => SignatureHash::Sha512,
        _ => SignatureHash::Unknown,
    }
}

fn signature_algorithm_name(oid_str: &str) -> String {
    match oid_str {
        oid::SHA1_WITH_RSA => "sha1WithRSAEncryption".into(),
        oid::SHA256_WITH_RSA => "sha256WithRSAEncryption".into(),
        oid::SHA384_WITH_RSA => "sha384WithRSAEncryption".into(),
        oid::SHA512_WITH_RSA => "sha512WithRSAEncryption".into(),
        oid::ECDSA_WITH_SHA1 => "ecdsa-with-SHA1".into(),
        oid::ECDSA_WITH_SHA256 => "ecdsa-with-SHA256".into(),
        oid::ECDSA_WITH_SHA384 => "ecdsa-with-SHA384".into(),
        oid::ECDSA_WITH_SHA512 => "ecdsa-with-SHA512".into(),
        other => other.to_string(),
    }
}

fn build_key_algorithm(spki: &SubjectPublicKeyInfo) -> KeyAlgorithm {
    use x509_parser::public_key::PublicKey;

    match spki.algorithm.algorithm.to_id_string().as_str() {
        oid::RSA_ENCRYPTION => {
            if let Ok(PublicKey::RSA(rsa)) = spki.parsed() {
                let modulus = strip_leading_zeros(rsa.modulus).to_vec();
                KeyAlgorithm::Rsa {
                    bits: (modulus.len() as u32) * 8,
                    modulus,
                }
            } else {
                KeyAlgorithm::Other("RSA (unparseable)".into())
            }
        }
        oid::EC_PUBLIC_KEY => {
            let curve = spki
                .algorithm
                .parameters
                .as_ref()
                .and_then(|p| p.as_oid().ok())
                .map(|o| EcCurve::from_oid(&o.to_id_string()))
                .unwrap_or(EcCurve::Unknown);
            let point_x = match spki.parsed() {
                Ok(PublicKey::EC(point)) => ec_point_x(point.data(), curve),
                _ => Vec::new(),
            };
            KeyAlgorithm::Ecdsa { curve, point_x }
        }
        other => KeyAlgorithm::Other(other.to_string()),
    }
}

/// Extract the X coordinate from an EC point encoding (uncompressed or
/// compressed).
pub(crate) fn ec_point_x(data: &[u8], curve: EcCurve) -> Vec<u8> {
    match data.first() {
        Some(&0x04) => {
            let coord_len = curve.coordinate_len().unwrap_or((data.len() - 1) / 2);
            data.get(1..1 + coord_len).unwrap_or(&data[1..]).to_vec()
        }
        Some(&0x02) | Some(&0x03) => data[1..].to_vec(),
        _ => data.to_vec(),
    }
}

pub(crate) fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

/// Format an X.509 Name as a comma-separated one-line string, matching
/// OpenSSL's default format (e.g., "C = US, O = Org, CN = example.com").
fn format_name(name: &X509Name) -> String {
    let mut result = String::new();
    for rdn in name.iter() {
        for attr in rdn.iter() {
            if !result.is_empty() {
                result.push_str(", ");
            }
            result.push_str(&util::oid_short_name(&attr.attr_type().to_id_string()));
            result.push_str(" = ");
            for ch in attr.as_str().unwrap_or("<binary>").chars() {
                match ch {
                    '\\' => result.push_str("\\\\"),
                    ',' => result.push_str("\\,"),
                    '=' => result.push_str("\\="),
                    _ => result.push(ch),
                }
            }
        }
    }
    result
}

fn extract_cn(name: &X509Name) -> Option<String> {
    for rdn in name.iter() {
        for attr in rdn.iter() {
            if attr.attr_type().to_id_string() == oid::COMMON_NAME {
                return attr.as_str().ok().map(|s| s.to_string());
            }
        }
    }
    None
}

fn format_ip_bytes(bytes: &[u8]) -> String {
    if let Ok(octets) = <[u8; 4]>::try_from(bytes) {
        std::net::Ipv4Addr::from(octets).to_string()
    } else if let Ok(octets) = <[u8; 16]>::try_from(bytes) {
        std::net::Ipv6Addr::from(octets).to_string()
    } else {
        hex::encode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_garbage() {
        assert!(parse_certificate(b"").is_err());
        assert!(parse_certificate(b"not a certificate").is_err());
        assert!(parse_certificates_pem(b"-----BEGIN JUNK-----\nAA==\n-----END JUNK-----\n").is_err());
    }

    #[test]
    fn strip_leading_zeros_works() {
        assert_eq!(strip_leading_zeros(&[0, 0, 1, 2]), &[1, 2]);
        assert_eq!(strip_leading_zeros(&[1, 0, 2]), &[1, 0, 2]);
        assert_eq!(strip_leading_zeros(&[0, 0]), &[] as &[u8]);
    }

    #[test]
    fn ec_point_x_uncompressed() {
        let mut data = vec![0x04];
        data.extend_from_slice(&[1u8; 32]);
        data.extend_from_slice(&[2u8; 32]);
        assert_eq!(ec_point_x(&data, EcCurve::P256), vec![1u8; 32]);
    }
}
