//! Ubiquity and strength ranking of certificates and chains.
//!
//! Two orthogonal axes per certificate:
//!
//! * **Ubiquity**: how widely a primitive is accepted. RSA outranks every
//!   ECDSA curve here because ancient clients only speak RSA.
//! * **Priority**: cryptographic strength, used by the *optimal* selection
//!   flavor. Here the ordering flips: ECDSA curves outrank RSA, and larger
//!   sizes outrank smaller.
//!
//! Chain ranks aggregate per-certificate ranks: ubiquity takes the minimum
//! (a chain is only as compatible as its weakest link), priority takes the
//! mean. All rank functions are pure.

use crate::parser::{Certificate, KeyAlgorithm, SignatureHash};
use crate::platform::PlatformSet;
use crate::keys::EcCurve;

pub const UNKNOWN_HASH_UBIQUITY: i32 = 0;
pub const SHA1_UBIQUITY: i32 = 1;
pub const SHA2_UBIQUITY: i32 = 2;

pub const RSA_UBIQUITY: i32 = 100;
pub const ECDSA256_UBIQUITY: i32 = 2;
pub const ECDSA384_UBIQUITY: i32 = 1;
pub const ECDSA521_UBIQUITY: i32 = 0;
pub const UNKNOWN_ALGO_UBIQUITY: i32 = 0;

/// Ubiquity rank of a certificate's signature hash.
pub fn hash_ubiquity(cert: &Certificate) -> i32 {
    match cert.signature_hash {
        SignatureHash::Sha1 => SHA1_UBIQUITY,
        SignatureHash::Sha256 | SignatureHash::Sha384 | SignatureHash::Sha512 => SHA2_UBIQUITY,
        SignatureHash::Unknown => UNKNOWN_HASH_UBIQUITY,
    }
}

/// Ubiquity rank of a certificate's public key algorithm.
pub fn key_algo_ubiquity(cert: &Certificate) -> i32 {
    match &cert.key_algorithm {
        KeyAlgorithm::Rsa { bits, .. } if *bits >= 1024 => RSA_UBIQUITY,
        KeyAlgorithm::Rsa { .. } => UNKNOWN_ALGO_UBIQUITY,
        KeyAlgorithm::Ecdsa { curve, .. } => match curve {
            EcCurve::P256 => ECDSA256_UBIQUITY,
            EcCurve::P384 => ECDSA384_UBIQUITY,
            EcCurve::P521 => ECDSA521_UBIQUITY,
            EcCurve::Unknown => UNKNOWN_ALGO_UBIQUITY,
        },
        KeyAlgorithm::Other(_) => UNKNOWN_ALGO_UBIQUITY,
    }
}

/// Strength rank of a certificate's signature hash.
pub fn hash_priority(cert: &Certificate) -> i32 {
    match cert.signature_hash {
        SignatureHash::Sha1 => 10,
        SignatureHash::Sha256 => 20,
        SignatureHash::Sha384 => 30,
        SignatureHash::Sha512 => 40,
        SignatureHash::Unknown => 0,
    }
}

/// Strength rank of a certificate's public key algorithm.
///
/// RSA scales with key size; ECDSA curves sit above any practical RSA size.
pub fn key_algo_priority(cert: &Certificate) -> i32 {
    match &cert.key_algorithm {
        KeyAlgorithm::Rsa { bits, .. } => (*bits / 1024) as i32,
        KeyAlgorithm::Ecdsa { curve, .. } => match curve {
            EcCurve::P256 => 10,
            EcCurve::P384 => 20,
            EcCurve::P521 => 30,
            EcCurve::Unknown => 0,
        },
        KeyAlgorithm::Other(_) => 0,
    }
}

/// Minimum hash ubiquity over the chain.
pub fn chain_hash_ubiquity(chain: &[Certificate]) -> i32 {
    chain.iter().map(hash_ubiquity).min().unwrap_or(0)
}

/// Minimum key-algorithm ubiquity over the chain.
pub fn chain_key_algo_ubiquity(chain: &[Certificate]) -> i32 {
    chain.iter().map(key_algo_ubiquity).min().unwrap_or(0)
}

/// Mean hash priority over the chain (integer division).
pub fn chain_hash_priority(chain: &[Certificate]) -> i32 {
    if chain.is_empty() {
        return 0;
    }
    chain.iter().map(hash_priority).sum::<i32>() / chain.len() as i32
}

/// Mean key-algorithm priority over the chain (integer division).
pub fn chain_key_algo_priority(chain: &[Certificate]) -> i32 {
    if chain.is_empty() {
        return 0;
    }
    chain.iter().map(key_algo_priority).sum::<i32>() / chain.len() as i32
}

/// Earliest NotAfter over the chain, as a Unix timestamp.
pub fn chain_expiry(chain: &[Certificate]) -> i64 {
    chain.iter().map(|c| c.not_after).min().unwrap_or(0)
}

/// Combined strength of a chain's crypto suite.
pub fn chain_crypto_suite_rank(chain: &[Certificate]) -> i32 {
    chain_hash_priority(chain) + chain_key_algo_priority(chain)
}

/// Weight sum of the platforms that trust the chain's root and meet the
/// chain's crypto floors.
pub fn cross_platform_ubiquity(chain: &[Certificate], platforms: &PlatformSet) -> i64 {
    let Some(root) = chain.last() else {
        return 0;
    };
    let hash_floor = chain_hash_ubiquity(chain);
    let key_floor = chain_key_algo_ubiquity(chain);
    platforms
        .platforms()
        .iter()
        .filter(|p| p.trusts(root) && p.supports_crypto(hash_floor, key_floor))
        .map(|p| p.weight)
        .sum()
}

/// Earliest NotAfter over the chain's intermediates (the chain minus leaf
/// and root). Chains without intermediates rank highest so short chains are
/// not penalized at this stage.
pub fn expiry_ubiquity_rank(chain: &[Certificate]) -> i64 {
    if chain.len() <= 2 {
        return i64::MAX;
    }
    chain[1..chain.len() - 1]
        .iter()
        .map(|c| c.not_after)
        .min()
        .unwrap_or(i64::MAX)
}

/// Keep only the chains tied for the maximum rank. Stable: surviving chains
/// keep their input order.
pub fn filter<F>(chains: Vec<Vec<Certificate>>, rank: F) -> Vec<Vec<Certificate>>
where
    F: Fn(&[Certificate]) -> i64,
{
    let Some(max) = chains.iter().map(|c| rank(c)).max() else {
        return chains;
    };
    chains.into_iter().filter(|c| rank(c) == max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Platform, PlatformSet};

    /// Build a synthetic certificate; only the fields the rank functions
    /// read are meaningful.
    fn cert(hash: SignatureHash, key: KeyAlgorithm, not_after: i64, sig: &[u8]) -> Certificate {
        Certificate {
            raw_der: sig.to_vec(),
            subject: String::new(),
            issuer: String::new(),
            subject_raw: Vec::new(),
            issuer_raw: Vec::new(),
            common_name: None,
            san_dns: Vec::new(),
            san_ips: Vec::new(),
            not_before: 0,
            not_after,
            signature: sig.to_vec(),
            signature_algorithm: String::new(),
            signature_hash: hash,
            key_algorithm: key,
            subject_key_id: Vec::new(),
            aia_issuer_urls: Vec::new(),
            ocsp_urls: Vec::new(),
            crl_urls: Vec::new(),
            is_ca: false,
            eku_server_auth: None,
            self_signed: false,
        }
    }

    fn rsa(bits: u32) -> KeyAlgorithm {
        KeyAlgorithm::Rsa {
            bits,
            modulus: vec![1; (bits / 8) as usize],
        }
    }

    fn ecdsa(curve: EcCurve) -> KeyAlgorithm {
        KeyAlgorithm::Ecdsa {
            curve,
            point_x: vec![2; 32],
        }
    }

    #[test]
    fn key_algo_ubiquity_is_monotone() {
        let r = cert(SignatureHash::Sha256, rsa(2048), 0, b"r");
        let p256 = cert(SignatureHash::Sha256, ecdsa(EcCurve::P256), 0, b"a");
        let p384 = cert(SignatureHash::Sha256, ecdsa(EcCurve::P384), 0, b"b");
        let p521 = cert(SignatureHash::Sha256, ecdsa(EcCurve::P521), 0, b"c");
        assert!(key_algo_ubiquity(&r) > key_algo_ubiquity(&p256));
        assert!(key_algo_ubiquity(&p256) > key_algo_ubiquity(&p384));
        assert!(key_algo_ubiquity(&p384) > key_algo_ubiquity(&p521));
    }

    #[test]
    fn hash_ubiquity_ranks_sha1_below_sha2() {
        let sha1 = cert(SignatureHash::Sha1, rsa(1024), 0, b"a");
        let sha2 = cert(SignatureHash::Sha256, rsa(2048), 0, b"b");
        let unknown = cert(SignatureHash::Unknown, rsa(2048), 0, b"c");
        assert_eq!(hash_ubiquity(&sha1), SHA1_UBIQUITY);
        assert_eq!(hash_ubiquity(&sha2), SHA2_UBIQUITY);
        assert_eq!(hash_ubiquity(&unknown), UNKNOWN_HASH_UBIQUITY);
    }

    #[test]
    fn crypto_suite_rank_ordering() {
        let suite = |hash, key| chain_crypto_suite_rank(&[cert(hash, key, 0, b"x")]);
        let rsa1024sha1 = suite(SignatureHash::Sha1, rsa(1024));
        let rsa2048sha2 = suite(SignatureHash::Sha256, rsa(2048));
        let rsa4096sha2 = suite(SignatureHash::Sha256, rsa(4096));
        let p256sha2 = suite(SignatureHash::Sha256, ecdsa(EcCurve::P256));
        let p384sha2 = suite(SignatureHash::Sha384, ecdsa(EcCurve::P384));
        assert!(rsa1024sha1 < rsa2048sha2);
        assert!(rsa2048sha2 <= rsa4096sha2);
        assert!(rsa4096sha2 < p256sha2);
        assert!(p256sha2 < p384sha2);
    }

    #[test]
    fn chain_ubiquity_is_weakest_link() {
        let sha1 = cert(SignatureHash::Sha1, rsa(1024), 0, b"a");
        let sha2 = cert(SignatureHash::Sha256, rsa(2048), 0, b"b");
        assert_eq!(chain_hash_ubiquity(&[sha1.clone(), sha2.clone()]), SHA1_UBIQUITY);

        let ec = cert(SignatureHash::Sha256, ecdsa(EcCurve::P256), 0, b"c");
        assert_eq!(
            chain_key_algo_ubiquity(&[ec, sha2.clone()]),
            ECDSA256_UBIQUITY
        );
        assert_eq!(chain_key_algo_ubiquity(&[sha1, sha2]), RSA_UBIQUITY);
    }

    #[test]
    fn chain_priorities_are_means() {
        let a = cert(SignatureHash::Sha256, rsa(2048), 0, b"a");
        let b = cert(SignatureHash::Sha256, rsa(3072), 0, b"b");
        let chain = [a.clone(), b.clone()];
        assert_eq!(
            chain_hash_priority(&chain),
            (hash_priority(&a) + hash_priority(&b)) / 2
        );
        assert_eq!(
            chain_key_algo_priority(&chain),
            (key_algo_priority(&a) + key_algo_priority(&b)) / 2
        );
    }

    #[test]
    fn chain_expiry_is_minimum() {
        let a = cert(SignatureHash::Sha256, rsa(2048), 100, b"a");
        let b = cert(SignatureHash::Sha256, rsa(2048), 50, b"b");
        assert_eq!(chain_expiry(&[a, b]), 50);
    }

    #[test]
    fn expiry_ubiquity_scores_intermediates_only() {
        let leaf = cert(SignatureHash::Sha256, rsa(2048), 10, b"l");
        let inter = cert(SignatureHash::Sha256, rsa(2048), 500, b"i");
        let root = cert(SignatureHash::Sha256, rsa(2048), 20, b"r");
        assert_eq!(
            expiry_ubiquity_rank(&[leaf.clone(), inter, root.clone()]),
            500
        );
        assert_eq!(expiry_ubiquity_rank(&[leaf, root]), i64::MAX);
    }

    #[test]
    fn cross_platform_ubiquity_bounded_by_total_weight() {
        let root_a = cert(SignatureHash::Sha256, rsa(2048), 0, b"root-a");
        let root_b = cert(SignatureHash::Sha256, rsa(2048), 0, b"root-b");
        let leaf = cert(SignatureHash::Sha256, rsa(2048), 0, b"leaf");

        let platforms = PlatformSet::from_platforms(vec![
            Platform::new("Everywhere", 100, "SHA2", "RSA", &[root_a.clone(), root_b.clone()]),
            Platform::new("OnlyB", 30, "SHA2", "RSA", &[root_b.clone()]),
            Platform::new("Modern", 7, "SHA2", "ECDSA256", &[root_a.clone()]),
        ]);

        let chain_a = vec![leaf.clone(), root_a];
        let chain_b = vec![leaf, root_b];
        assert_eq!(cross_platform_ubiquity(&chain_a, &platforms), 107);
        assert_eq!(cross_platform_ubiquity(&chain_b, &platforms), 130);
        assert!(cross_platform_ubiquity(&chain_a, &platforms) <= platforms.total_weight());

        // An ECDSA-P521 floor shuts out platforms that need RSA or P-256.
        let weak = cert(
            SignatureHash::Sha256,
            ecdsa(EcCurve::P521),
            0,
            b"weak-leaf",
        );
        let chain_weak = vec![weak, cert(SignatureHash::Sha256, rsa(2048), 0, b"root-a")];
        assert_eq!(cross_platform_ubiquity(&chain_weak, &platforms), 0);
    }

    #[test]
    fn untrusted_platforms_lists_missing_roots() {
        let root_a = cert(SignatureHash::Sha256, rsa(2048), 0, b"root-a");
        let root_b = cert(SignatureHash::Sha256, rsa(2048), 0, b"root-b");
        let platforms = PlatformSet::from_platforms(vec![
            Platform::new("TrustsA", 1, "SHA2", "RSA", &[root_a.clone()]),
            Platform::new("TrustsBoth", 1, "SHA2", "RSA", &[root_a.clone(), root_b.clone()]),
        ]);
        assert!(platforms.untrusted_platforms(&root_a).is_empty());
        assert_eq!(platforms.untrusted_platforms(&root_b), vec!["TrustsA"]);
    }

    #[test]
    fn filter_keeps_ties_stably() {
        let mk = |not_after, tag: &[u8]| vec![cert(SignatureHash::Sha256, rsa(2048), not_after, tag)];
        let chains = vec![mk(5, b"a"), mk(9, b"b"), mk(9, b"c"), mk(1, b"d")];
        let kept = filter(chains, |c| chain_expiry(c));
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0][0].signature, b"b");
        assert_eq!(kept[1][0].signature, b"c");
    }

    #[test]
    fn filter_of_empty_is_empty() {
        let kept = filter(Vec::new(), |c| chain_expiry(c));
        assert!(kept.is_empty());
    }
}
