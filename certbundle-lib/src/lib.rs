//! certbundle-lib: certificate chain bundling engine.
//!
//! Given a leaf X.509 certificate (optionally with its private key and
//! supplied intermediates) or the hostname of a live TLS server, produces a
//! trusted, optimized certificate chain up to but excluding a trusted root,
//! together with metadata describing the chain's ubiquity, expiry, trust
//! coverage, and any deviations from the input.
//!
//! The interesting parts are intermediate discovery (walking AIA issuer URLs
//! to complete broken chains), multi-criterion chain selection (ranking the
//! verifier's candidate chains by platform coverage, length, crypto
//! compatibility, and longevity), and status synthesis.

mod bundle;
mod bundler;
mod fetcher;
mod keys;
mod oid;
mod parser;
mod platform;
mod pool;
mod remote;
mod ubiquity;
mod util;
mod verify;

pub use bundle::{Bundle, BundleStatus, BUNDLE_EXPIRING, BUNDLE_NOT_UBIQUITOUS};
pub use bundler::{BundleFlavor, Bundler, DEFAULT_STASH_DIR, EXPIRY_WARNING_WINDOW};
pub use fetcher::{fetch_remote_certificate, FetchedIntermediate};
pub use keys::{parse_private_key_pem, EcCurve, PrivateKey};
pub use parser::{
    parse_certificate, parse_certificates_pem, Certificate, KeyAlgorithm, SignatureHash,
};
pub use platform::{Platform, PlatformSet};
pub use pool::CertificatePool;
pub use ubiquity::{
    chain_crypto_suite_rank, chain_expiry, chain_hash_priority, chain_hash_ubiquity,
    chain_key_algo_priority, chain_key_algo_ubiquity, cross_platform_ubiquity,
    expiry_ubiquity_rank, filter, hash_priority, hash_ubiquity, key_algo_priority,
    key_algo_ubiquity, ECDSA256_UBIQUITY, ECDSA384_UBIQUITY, ECDSA521_UBIQUITY, RSA_UBIQUITY,
    SHA1_UBIQUITY, SHA2_UBIQUITY, UNKNOWN_ALGO_UBIQUITY, UNKNOWN_HASH_UBIQUITY,
};
pub use verify::{verify_chains, VerifyError, MAX_CHAIN_DEPTH};

/// Errors returned by certbundle-lib.
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("Failed to read input: {0}")]
    ReadFailed(String),

    #[error("Failed to decode input: {0}")]
    DecodeFailed(String),

    #[error("Private key does not match the certificate")]
    KeyMismatch,

    #[error("Public key algorithm is neither RSA nor ECDSA")]
    NotRsaOrEcc,

    #[error("Certificate is self-signed; refusing to bundle a root as a leaf")]
    SelfSigned,

    #[error("Chain verification failed: {0}")]
    VerifyFailed(String),

    #[error("No chain reaches a trusted root")]
    UnknownAuthority,

    #[error("TLS dial failed: {0}")]
    DialFailed(String),

    #[error("Failed to fetch remote certificate: {0}")]
    FetchFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
