//! Platform trust model.
//!
//! A platform is a named deployment target (an OS release, a browser, a TLS
//! stack) with a weight, a minimum supported signature hash, a minimum
//! supported key algorithm, and a trust store of root certificates. The
//! cross-platform ubiquity of a chain is the weight sum of the platforms
//! that both trust the chain's root and can handle its crypto.
//!
//! Platform metadata is a JSON array:
//!
//! ```json
//! [{ "name": "Windows Vista", "weight": 100, "hash_algo": "SHA2",
//!    "key_algo": "RSA", "key_store_file": "vista.pem" }]
//! ```
//!
//! where `key_store_file` is a PEM bundle resolved relative to the metadata
//! file. The set is loaded once at engine init and read-only afterwards.

use crate::parser::{parse_certificates_pem, Certificate};
use crate::ubiquity;
use crate::BundleError;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct PlatformMetadata {
    name: String,
    weight: i64,
    hash_algo: String,
    key_algo: String,
    key_store_file: String,
}

/// A named platform with its crypto floor and root trust set.
#[derive(Debug, Clone)]
pub struct Platform {
    pub name: String,
    pub weight: i64,
    /// Minimum hash ubiquity rank the platform supports.
    hash_threshold: i32,
    /// Minimum key-algorithm ubiquity rank the platform supports.
    key_algo_threshold: i32,
    /// Signatures of the roots this platform trusts.
    trust_set: HashSet<Vec<u8>>,
}

impl Platform {
    /// Build a platform from its parts; the trust set is the signature of
    /// every certificate in `roots`.
    pub fn new(name: &str, weight: i64, hash_algo: &str, key_algo: &str, roots: &[Certificate]) -> Self {
        Platform {
            name: name.to_string(),
            weight,
            hash_threshold: hash_algo_rank(hash_algo),
            key_algo_threshold: key_algo_rank(key_algo),
            trust_set: roots.iter().map(|c| c.signature.clone()).collect(),
        }
    }

    /// Whether this platform's trust store contains the given root.
    pub fn trusts(&self, root: &Certificate) -> bool {
        self.trust_set.contains(&root.signature)
    }

    /// Whether a chain's crypto floors meet this platform's requirements.
    pub fn supports_crypto(&self, chain_hash_ubiquity: i32, chain_key_algo_ubiquity: i32) -> bool {
        self.hash_threshold <= chain_hash_ubiquity
            && self.key_algo_threshold <= chain_key_algo_ubiquity
    }
}

/// The set of platforms an engine scores against.
///
/// Injected into the scorer rather than kept as process-global state so
/// engines with different platform files can coexist (and tests stay
/// hermetic).
#[derive(Debug, Clone, Default)]
pub struct PlatformSet {
    platforms: Vec<Platform>,
}

impl PlatformSet {
    /// An empty set; cross-platform ubiquity is 0 for every chain and no
    /// platform is ever reported untrusted.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_platforms(platforms: Vec<Platform>) -> Self {
        PlatformSet { platforms }
    }

    /// Load platform metadata from a JSON file; key store paths are
    /// resolved relative to the metadata file's directory.
    pub fn from_metadata_file(path: &Path) -> Result<Self, BundleError> {
        let data = std::fs::read(path)
            .map_err(|e| BundleError::ReadFailed(format!("{}: {}", path.display(), e)))?;
        let entries: Vec<PlatformMetadata> = serde_json::from_slice(&data)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

        let mut platforms = Vec::with_capacity(entries.len());
        for entry in entries {
            let store_path = base_dir.join(&entry.key_store_file);
            let store_pem = std::fs::read(&store_path)
                .map_err(|e| BundleError::ReadFailed(format!("{}: {}", store_path.display(), e)))?;
            let roots = parse_certificates_pem(&store_pem)?;
            debug!(
                platform = %entry.name,
                roots = roots.len(),
                "loaded platform trust store"
            );
            platforms.push(Platform::new(
                &entry.name,
                entry.weight,
                &entry.hash_algo,
                &entry.key_algo,
                &roots,
            ));
        }
        Ok(PlatformSet { platforms })
    }

    pub fn platforms(&self) -> &[Platform] {
        &self.platforms
    }

    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty()
    }

    /// Sum of all platform weights, the normalization base for
    /// cross-platform ubiquity.
    pub fn total_weight(&self) -> i64 {
        self.platforms.iter().map(|p| p.weight).sum()
    }

    /// Names of the platforms whose trust store lacks the given root.
    pub fn untrusted_platforms(&self, root: &Certificate) -> Vec<String> {
        self.platforms
            .iter()
            .filter(|p| !p.trusts(root))
            .map(|p| p.name.clone())
            .collect()
    }
}

fn hash_algo_rank(name: &str) -> i32 {
    match name {
        "SHA1" => ubiquity::SHA1_UBIQUITY,
        "SHA2" => ubiquity::SHA2_UBIQUITY,
        _ => ubiquity::UNKNOWN_HASH_UBIQUITY,
    }
}

fn key_algo_rank(name: &str) -> i32 {
    match name {
        "RSA" => ubiquity::RSA_UBIQUITY,
        "ECDSA256" => ubiquity::ECDSA256_UBIQUITY,
        "ECDSA384" => ubiquity::ECDSA384_UBIQUITY,
        "ECDSA521" => ubiquity::ECDSA521_UBIQUITY,
        _ => ubiquity::UNKNOWN_ALGO_UBIQUITY,
    }
}
