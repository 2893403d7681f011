//! Private key parsing for the key/certificate pairing check.
//!
//! Keys are modeled as a tagged variant rather than an opaque handle so the
//! pairing check is a plain `match`: RSA keys are compared to the leaf by
//! modulus, ECDSA keys by the X coordinate of the public point. Only the
//! public half is extracted; the engine never uses the secret material.
//!
//! Supported encodings: PKCS#1 (`RSA PRIVATE KEY`), SEC1 (`EC PRIVATE KEY`),
//! and PKCS#8 (`PRIVATE KEY`) wrapping either of those.

use crate::oid;
use crate::parser::strip_leading_zeros;
use crate::util;
use crate::BundleError;
use x509_parser::der_parser::asn1_rs::{Any, Class, FromDer, Oid, Tag};
use x509_parser::prelude::Pem;

/// Named elliptic curve of an ECDSA key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcCurve {
    P256,
    P384,
    P521,
    Unknown,
}

impl EcCurve {
    pub fn from_oid(oid_str: &str) -> Self {
        match oid_str {
            oid::CURVE_P256 => EcCurve::P256,
            oid::CURVE_P384 => EcCurve::P384,
            oid::CURVE_P521 => EcCurve::P521,
            _ => EcCurve::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EcCurve::P256 => "P-256",
            EcCurve::P384 => "P-384",
            EcCurve::P521 => "P-521",
            EcCurve::Unknown => "unknown",
        }
    }

    /// Field size in bits (0 for unrecognized curves).
    pub fn bits(&self) -> u32 {
        match self {
            EcCurve::P256 => 256,
            EcCurve::P384 => 384,
            EcCurve::P521 => 521,
            EcCurve::Unknown => 0,
        }
    }

    /// Byte length of one coordinate in an uncompressed point.
    pub(crate) fn coordinate_len(&self) -> Option<usize> {
        match self {
            EcCurve::P256 => Some(32),
            EcCurve::P384 => Some(48),
            EcCurve::P521 => Some(66),
            EcCurve::Unknown => None,
        }
    }
}

/// A parsed private key, reduced to what the pairing check and the bundle
/// output need.
#[derive(Debug, Clone)]
pub enum PrivateKey {
    Rsa {
        /// Modulus bytes with leading zero stripped.
        modulus: Vec<u8>,
        /// Re-armored PEM of the key as supplied.
        pem: String,
    },
    Ecdsa {
        curve: EcCurve,
        /// X coordinate of the embedded public point.
        point_x: Vec<u8>,
        pem: String,
    },
}

impl PrivateKey {
    /// PEM encoding of the key as supplied.
    pub fn pem(&self) -> &str {
        match self {
            PrivateKey::Rsa { pem, .. } | PrivateKey::Ecdsa { pem, .. } => pem,
        }
    }
}

/// Parse a PEM-encoded private key (PKCS#1, SEC1, or PKCS#8).
pub fn parse_private_key_pem(input: &[u8]) -> Result<PrivateKey, BundleError> {
    if input.is_empty() {
        return Err(BundleError::DecodeFailed("empty private key".into()));
    }

    for pem_result in Pem::iter_from_buffer(input) {
        let pem = pem_result
            .map_err(|e| BundleError::DecodeFailed(format!("failed to parse key PEM: {}", e)))?;
        let armored = format!(
            "-----BEGIN {}-----\n{}\n-----END {}-----\n",
            pem.label,
            util::base64_wrap(&pem.contents),
            pem.label
        );
        match pem.label.as_str() {
            "RSA PRIVATE KEY" => return parse_pkcs1(&pem.contents, armored),
            "EC PRIVATE KEY" => return parse_sec1(&pem.contents, None, armored),
            "PRIVATE KEY" => return parse_pkcs8(&pem.contents, armored),
            "ENCRYPTED PRIVATE KEY" => {
                return Err(BundleError::DecodeFailed(
                    "encrypted private keys are not supported".into(),
                ))
            }
            _ => continue,
        }
    }

    Err(BundleError::DecodeFailed(
        "no private key found in PEM input".into(),
    ))
}

/// Split a DER SEQUENCE into its top-level elements.
fn sequence_elements(der: &[u8]) -> Result<Vec<Any<'_>>, BundleError> {
    let (_, outer) = Any::from_der(der)
        .map_err(|e| BundleError::DecodeFailed(format!("invalid key DER: {}", e)))?;
    if outer.header.tag() != Tag::Sequence {
        return Err(BundleError::DecodeFailed(
            "private key is not a DER sequence".into(),
        ));
    }
    let mut elements = Vec::new();
    let mut rest = outer.data;
    while !rest.is_empty() {
        let (r, item) = Any::from_der(rest)
            .map_err(|e| BundleError::DecodeFailed(format!("invalid key DER: {}", e)))?;
        elements.push(item);
        rest = r;
    }
    Ok(elements)
}

/// PKCS#1 RSAPrivateKey: `SEQUENCE { version, n, e, d, ... }`.
fn parse_pkcs1(der: &[u8], pem: String) -> Result<PrivateKey, BundleError> {
    let elements = sequence_elements(der)?;
    let modulus = elements
        .get(1)
        .filter(|e| e.header.tag() == Tag::Integer)
        .map(|e| strip_leading_zeros(e.data).to_vec())
        .ok_or_else(|| BundleError::DecodeFailed("RSA key has no modulus".into()))?;
    if modulus.is_empty() {
        return Err(BundleError::DecodeFailed("RSA key has zero modulus".into()));
    }
    Ok(PrivateKey::Rsa { modulus, pem })
}

/// SEC1 ECPrivateKey: `SEQUENCE { version, privateKey, [0] curve, [1] pubkey }`.
///
/// The embedded public point is required; deriving it from the secret scalar
/// would need EC arithmetic this crate deliberately does not carry.
fn parse_sec1(
    der: &[u8],
    curve_hint: Option<EcCurve>,
    pem: String,
) -> Result<PrivateKey, BundleError> {
    let elements = sequence_elements(der)?;

    let mut curve = curve_hint;
    let mut point: Option<Vec<u8>> = None;
    for element in &elements {
        if element.header.class() != Class::ContextSpecific {
            continue;
        }
        match element.header.tag().0 {
            0 => {
                if let Ok((_, oid)) = Oid::from_der(element.data) {
                    curve = Some(EcCurve::from_oid(&oid.to_id_string()));
                }
            }
            1 => {
                // Explicit tag around a BIT STRING; first content byte is
                // the unused-bits count.
                if let Ok((_, bits)) = Any::from_der(element.data) {
                    if bits.header.tag() == Tag::BitString && !bits.data.is_empty() {
                        point = Some(bits.data[1..].to_vec());
                    }
                }
            }
            _ => {}
        }
    }

    let curve = curve.unwrap_or(EcCurve::Unknown);
    let point = point.ok_or_else(|| {
        BundleError::DecodeFailed("EC private key has no embedded public point".into())
    })?;

    Ok(PrivateKey::Ecdsa {
        curve,
        point_x: crate::parser::ec_point_x(&point, curve),
        pem,
    })
}

/// PKCS#8 PrivateKeyInfo: `SEQUENCE { version, algorithm, privateKey }`.
fn parse_pkcs8(der: &[u8], pem: String) -> Result<PrivateKey, BundleError> {
    let elements = sequence_elements(der)?;
    let algorithm = elements
        .get(1)
        .filter(|e| e.header.tag() == Tag::Sequence)
        .ok_or_else(|| BundleError::DecodeFailed("PKCS#8 key has no algorithm".into()))?;
    let key_octets = elements
        .get(2)
        .filter(|e| e.header.tag() == Tag::OctetString)
        .ok_or_else(|| BundleError::DecodeFailed("PKCS#8 key has no key data".into()))?;

    let (params, algo_oid) = Oid::from_der(algorithm.data)
        .map(|(rest, oid)| (rest, oid.to_id_string()))
        .map_err(|e| BundleError::DecodeFailed(format!("invalid PKCS#8 algorithm: {}", e)))?;

    match algo_oid.as_str() {
        oid::RSA_ENCRYPTION => parse_pkcs1(key_octets.data, pem),
        oid::EC_PUBLIC_KEY => {
            let curve_hint = Oid::from_der(params)
                .ok()
                .map(|(_, oid)| EcCurve::from_oid(&oid.to_id_string()));
            parse_sec1(key_octets.data, curve_hint, pem)
        }
        other => Err(BundleError::DecodeFailed(format!(
            "unsupported private key algorithm {}",
            other
        ))),
    }
}
