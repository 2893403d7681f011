//! The certificate bundler: pools, AIA-driven intermediate discovery, chain
//! selection, and bundle assembly.

use crate::bundle::{Bundle, BundleStatus, BUNDLE_EXPIRING, BUNDLE_NOT_UBIQUITOUS};
use crate::fetcher::{fetch_remote_certificate, FetchedIntermediate};
use crate::keys::{parse_private_key_pem, PrivateKey};
use crate::parser::{parse_certificates_pem, Certificate, KeyAlgorithm};
use crate::platform::PlatformSet;
use crate::pool::CertificatePool;
use crate::remote;
use crate::ubiquity;
use crate::util;
use crate::verify::{verify_chains, VerifyError};
use crate::BundleError;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

/// Default directory where fetched intermediates are persisted.
pub const DEFAULT_STASH_DIR: &str = "intermediates";

/// Window before NotAfter in which a chain certificate counts as expiring.
pub const EXPIRY_WARNING_WINDOW: i64 = 30 * 24 * 60 * 60;

const SHA2_WARNING: &str = "The bundle contains certs signed with advanced hash functions such as \
     SHA2, which are problematic at certain operating systems, e.g. Windows XP SP2.";
const EXPIRING_WARNING_STUB: &str = "The bundle is expiring within 30 days. ";
const UNTRUSTED_WARNING_STUB: &str =
    "The bundle may not be trusted by the following platform(s):";

/// Named chain-selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BundleFlavor {
    /// Shortest chain with the longest-lived members and the strongest
    /// crypto suite.
    Optimal,
    /// The chain accepted by the most platforms.
    #[default]
    Ubiquitous,
}

impl std::str::FromStr for BundleFlavor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "optimal" => Ok(BundleFlavor::Optimal),
            "ubiquitous" => Ok(BundleFlavor::Ubiquitous),
            other => Err(format!("unknown bundle flavor: {}", other)),
        }
    }
}

/// A certificate bundler: holds the root and intermediate pools used to
/// produce bundles.
///
/// Not safe for concurrent bundling from multiple threads: the intermediate
/// pool, the known-issuers set, and the stash are mutated in place during an
/// operation. Wrap mutating use in an exclusive section if sharing.
pub struct Bundler {
    roots: CertificatePool,
    intermediates: CertificatePool,
    /// Signatures of every certificate in either pool; short-circuits AIA
    /// fetches for certificates we already hold.
    known_issuers: HashSet<Vec<u8>>,
    platforms: PlatformSet,
    stash_dir: PathBuf,
}

impl Bundler {
    /// Create a bundler from files containing PEM root certificates and,
    /// optionally, PEM intermediate certificates.
    pub fn new(ca_bundle_file: &Path, int_bundle_file: Option<&Path>) -> Result<Self, BundleError> {
        debug!(path = %ca_bundle_file.display(), "loading CA bundle");
        let ca_pem = std::fs::read(ca_bundle_file)
            .map_err(|e| BundleError::ReadFailed(format!("{}: {}", ca_bundle_file.display(), e)))?;

        let int_pem = match int_bundle_file {
            Some(path) => {
                debug!(path = %path.display(), "loading intermediate bundle");
                Some(std::fs::read(path).map_err(|e| {
                    BundleError::ReadFailed(format!("{}: {}", path.display(), e))
                })?)
            }
            None => None,
        };

        Self::from_pem(&ca_pem, int_pem.as_deref())
    }

    /// Create a bundler from PEM-encoded root and intermediate certificates.
    pub fn from_pem(ca_pem: &[u8], int_pem: Option<&[u8]>) -> Result<Self, BundleError> {
        let mut roots = CertificatePool::new();
        roots.add_pem_bundle(ca_pem)?;

        let mut intermediates = CertificatePool::new();
        if let Some(pem) = int_pem {
            intermediates.add_pem_bundle(pem)?;
        }

        let known_issuers = roots
            .iter()
            .chain(intermediates.iter())
            .map(|c| c.signature.clone())
            .collect();

        debug!(
            roots = roots.len(),
            intermediates = intermediates.len(),
            "bundler set up"
        );
        Ok(Bundler {
            roots,
            intermediates,
            known_issuers,
            platforms: PlatformSet::new(),
            stash_dir: PathBuf::from(DEFAULT_STASH_DIR),
        })
    }

    /// Score chains against the given platform set.
    pub fn with_platforms(mut self, platforms: PlatformSet) -> Self {
        self.platforms = platforms;
        self
    }

    /// Persist fetched intermediates under the given directory instead of
    /// [`DEFAULT_STASH_DIR`].
    pub fn with_stash_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.stash_dir = dir.into();
        self
    }

    /// Number of certificates currently in the intermediate pool.
    pub fn intermediate_count(&self) -> usize {
        self.intermediates.len()
    }

    /// Bundle from a PEM certificate file (leaf first, optionally followed
    /// by intermediates) and an optional PEM private key file.
    pub fn bundle_from_file(
        &mut self,
        bundle_file: &Path,
        key_file: Option<&Path>,
        flavor: BundleFlavor,
    ) -> Result<Bundle, BundleError> {
        debug!(path = %bundle_file.display(), "loading certificate");
        let certs_pem = std::fs::read(bundle_file)
            .map_err(|e| BundleError::ReadFailed(format!("{}: {}", bundle_file.display(), e)))?;

        let key_pem = match key_file {
            Some(path) => {
                debug!(path = %path.display(), "loading private key");
                let data = std::fs::read(path).map_err(|e| {
                    BundleError::ReadFailed(format!("{}: {}", path.display(), e))
                })?;
                if data.is_empty() {
                    return Err(BundleError::DecodeFailed("private key file is empty".into()));
                }
                Some(data)
            }
            None => None,
        };

        self.bundle_from_pem(&certs_pem, key_pem.as_deref(), flavor)
    }

    /// Bundle from PEM-encoded certificates and an optional PEM private key.
    pub fn bundle_from_pem(
        &mut self,
        certs_pem: &[u8],
        key_pem: Option<&[u8]>,
        flavor: BundleFlavor,
    ) -> Result<Bundle, BundleError> {
        let key = key_pem.map(parse_private_key_pem).transpose()?;
        let certs = parse_certificates_pem(certs_pem)?;
        self.bundle(certs, key, flavor)
    }

    /// Bundle the certificate chain served by a live TLS server.
    ///
    /// Dials `<server_name>:443` (or `<ip>:443` when given), salvaging the
    /// peer chain with an insecure retry if the strict handshake fails; the
    /// strict error then becomes a status message on the returned bundle.
    pub fn bundle_from_remote(
        &mut self,
        server_name: &str,
        ip: Option<&str>,
    ) -> Result<Bundle, BundleError> {
        let (certs, dial_warning) = remote::fetch_peer_chain(server_name, ip, &self.roots)?;

        let leaf = certs
            .first()
            .ok_or_else(|| BundleError::DecodeFailed("server sent no certificates".into()))?;
        if !leaf.matches_hostname(server_name) {
            debug!(server = server_name, "hostname verification failed");
            return Err(BundleError::VerifyFailed(format!(
                "certificate is not valid for {}",
                server_name
            )));
        }

        // Admit any verifiable peer intermediates into the pool up front.
        // Failures surface during the Bundle call below, so they are not
        // fatal here.
        if let Err(e) = self.fetch_intermediates(&certs) {
            debug!("peer intermediate search failed: {}", e);
        }

        let mut bundle = self.bundle(certs, None, BundleFlavor::Ubiquitous)?;
        if let Some(msg) = dial_warning {
            bundle.status.messages.push(msg);
        }
        Ok(bundle)
    }

    /// Bundle already-parsed certificates (leaf first) with an optional
    /// private key.
    pub fn bundle(
        &mut self,
        certs: Vec<Certificate>,
        key: Option<PrivateKey>,
        flavor: BundleFlavor,
    ) -> Result<Bundle, BundleError> {
        let Some(cert) = certs.first().cloned() else {
            return Err(BundleError::DecodeFailed("no certificates to bundle".into()));
        };
        info!(subject = %cert.subject, "bundling certificate");

        check_key_pairing(&cert, key.as_ref())?;

        if cert.self_signed {
            return Err(BundleError::SelfSigned);
        }

        let now = OffsetDateTime::now_utc().unix_timestamp();
        let chains = match verify_chains(&cert, &self.intermediates, &self.roots, now) {
            Ok(chains) => chains,
            Err(VerifyError::Rejected(reason)) => {
                return Err(BundleError::VerifyFailed(reason));
            }
            Err(VerifyError::UnknownAuthority) => {
                debug!("verification failed, searching AIA issuers");
                self.fetch_intermediates(&certs)?;
                verify_chains(&cert, &self.intermediates, &self.roots, now)
                    .map_err(|e| BundleError::VerifyFailed(e.to_string()))?
            }
        };

        let matching = match flavor {
            BundleFlavor::Optimal => self.optimal_chains(chains),
            BundleFlavor::Ubiquitous => self.ubiquitous_chains(chains),
        };
        // filter() never empties a non-empty list, so the cascade leaves at
        // least one survivor.
        let selected = matching
            .into_iter()
            .next()
            .ok_or(BundleError::UnknownAuthority)?;

        // The root is presented by the peer's own trust store; don't ship it.
        let chain: Vec<Certificate> = selected[..selected.len() - 1].to_vec();
        let root = selected.last().cloned();

        let mut code = 0u32;
        let mut messages = Vec::new();

        let expiring = check_expiring_certs(&chain, now);
        if !expiring.is_empty() {
            code |= BUNDLE_EXPIRING;
            messages.push(expiration_warning(&expiring));
        }

        // Fires only when a SHA-1 (or unknown-hash) certificate caps the
        // chain below the SHA-2 rank; an all-SHA-2 chain stays clean.
        if ubiquity::chain_hash_ubiquity(&selected) < ubiquity::SHA2_UBIQUITY {
            code |= BUNDLE_NOT_UBIQUITOUS;
            messages.push(SHA2_WARNING.to_string());
        }

        let untrusted = match &root {
            Some(root) => self.platforms.untrusted_platforms(root),
            None => Vec::new(),
        };
        if !untrusted.is_empty() {
            code |= BUNDLE_NOT_UBIQUITOUS;
            messages.push(untrusted_platforms_warning(&untrusted));
        }

        let is_rebundled = chain.len() != certs.len()
            || chain
                .iter()
                .zip(certs.iter())
                .any(|(a, b)| a.signature != b.signature);

        let status = BundleStatus {
            is_rebundled,
            expiring_skis: get_skis(&chain, &expiring),
            untrusted_root_stores: untrusted,
            code,
            messages,
        };

        debug!(rebundled = is_rebundled, code, "bundle complete");
        Ok(Bundle {
            issuer: cert.issuer.clone(),
            subject: cert.subject.clone(),
            hostnames: build_hostnames(&cert),
            expires: ubiquity::chain_expiry(&chain),
            cert,
            key,
            chain,
            status,
        })
    }

    /// Walk the AIA issuer URLs of an unverifiable chain, fetching missing
    /// intermediates into the pool (and the stash) until verification
    /// succeeds or the issuance graph is exhausted.
    ///
    /// The walk is a bounded DFS over a reversed partial chain: the element
    /// closest to a root sits at index 0. Each iteration either verifies the
    /// current chain, prepends one newly fetched issuer, or backtracks by
    /// popping the top element. `seen` tracking on both URLs and signatures
    /// makes cyclic issuer graphs terminate. The root pool is never touched.
    pub fn fetch_intermediates(&mut self, certs: &[Certificate]) -> Result<(), BundleError> {
        debug!("searching intermediates");
        if !self.stash_dir.exists() {
            info!(dir = %self.stash_dir.display(), "creating intermediate stash directory");
            std::fs::create_dir_all(&self.stash_dir)?;
        }

        let mut seen_urls: HashSet<String> = HashSet::new();
        let mut seen_sigs: HashSet<Vec<u8>> = HashSet::new();
        let mut found_chains = 0usize;
        let now = OffsetDateTime::now_utc().unix_timestamp();

        // Reversed partial chain: certs ordered by proximity to the roots.
        // Non-leaf inputs get a stash name built from their CN.
        let mut chain: Vec<FetchedIntermediate> = Vec::with_capacity(certs.len());
        for (i, cert) in certs.iter().enumerate() {
            let name = if i > 0 {
                util::sanitized_cn_filename(cert.common_name.as_deref().unwrap_or(""))
            } else {
                String::new()
            };
            seen_sigs.insert(cert.signature.clone());
            chain.insert(
                0,
                FetchedIntermediate {
                    cert: cert.clone(),
                    name,
                },
            );
        }

        loop {
            if chain.is_empty() {
                debug!(found_chains, "search complete");
                if found_chains == 0 {
                    return Err(BundleError::UnknownAuthority);
                }
                return Ok(());
            }

            let mut advanced = false;
            if self.verify_partial_chain(&chain, now) {
                found_chains += 1;
            } else {
                debug!("walking AIA issuers");
                let urls = chain[0].cert.aia_issuer_urls.clone();
                for url in urls {
                    if seen_urls.contains(&url) {
                        debug!(url = %url, "url already seen");
                        continue;
                    }
                    let fetched = match fetch_remote_certificate(&url) {
                        Ok(fetched) => fetched,
                        Err(e) => {
                            debug!(url = %url, "fetch failed: {}", e);
                            continue;
                        }
                    };
                    if seen_sigs.contains(&fetched.cert.signature) {
                        debug!(url = %url, "fetched certificate already seen");
                        continue;
                    }
                    seen_urls.insert(url);
                    seen_sigs.insert(fetched.cert.signature.clone());
                    chain.insert(0, fetched);
                    advanced = true;
                    break;
                }
            }

            if !advanced {
                debug!("no progress, stepping back");
                chain.remove(0);
            }
        }
    }

    /// Verify a reversed partial chain against the pools, admitting every
    /// newly verified member into the intermediate pool and stashing it.
    ///
    /// A self-signed certificate at the top of the chain is admitted but
    /// never stashed: roots do not belong in the intermediate stash.
    fn verify_partial_chain(&mut self, chain: &[FetchedIntermediate], now: i64) -> bool {
        debug!(len = chain.len(), "verifying partial chain");
        for (i, fetched) in chain.iter().enumerate() {
            if self.known_issuers.contains(&fetched.cert.signature) {
                debug!(subject = %fetched.cert.subject, "certificate is known");
                continue;
            }

            if let Err(e) = verify_chains(&fetched.cert, &self.intermediates, &self.roots, now) {
                debug!(subject = %fetched.cert.subject, "failed verification: {}", e);
                return false;
            }

            debug!(subject = %fetched.cert.subject, "admitting certificate to intermediate pool");
            self.intermediates.add(fetched.cert.clone());

            if i == 0 && fetched.cert.self_signed {
                debug!("top of chain is a root, will not stash");
                self.known_issuers.insert(fetched.cert.signature.clone());
                continue;
            }
            if fetched.name.is_empty() {
                continue;
            }
            self.known_issuers.insert(fetched.cert.signature.clone());
            self.stash(fetched);
        }
        true
    }

    /// Persist a fetched intermediate to the stash directory. Best-effort:
    /// a failed write is logged and bundling continues.
    fn stash(&self, fetched: &FetchedIntermediate) {
        let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
        let file_name = format!("{}.{}", fetched.name, nanos);
        let path = self.stash_dir.join(file_name);
        debug!(path = %path.display(), "writing intermediate to stash");
        match std::fs::write(&path, fetched.cert.to_pem()) {
            Ok(()) => info!(name = %fetched.name, "stashed new intermediate"),
            Err(e) => warn!(path = %path.display(), "failed to write intermediate: {}", e),
        }
    }

    /// Optimal chains: shortest, then latest-expiring, then the strongest
    /// crypto suite.
    fn optimal_chains(&self, chains: Vec<Vec<Certificate>>) -> Vec<Vec<Certificate>> {
        let chains = ubiquity::filter(chains, |c| -(c.len() as i64));
        let chains = ubiquity::filter(chains, ubiquity::chain_expiry);
        ubiquity::filter(chains, |c| ubiquity::chain_crypto_suite_rank(c) as i64)
    }

    /// Ubiquitous chains: broadest platform coverage, then compact, then
    /// compatible crypto, then durable intermediates, with the optimal
    /// cascade as the final tie-break.
    fn ubiquitous_chains(&self, chains: Vec<Vec<Certificate>>) -> Vec<Vec<Certificate>> {
        let chains = ubiquity::filter(chains, |c| {
            ubiquity::cross_platform_ubiquity(c, &self.platforms)
        });
        let chains = ubiquity::filter(chains, |c| -(c.len() as i64));
        let chains = ubiquity::filter(chains, |c| ubiquity::chain_hash_ubiquity(c) as i64);
        let chains = ubiquity::filter(chains, |c| ubiquity::chain_key_algo_ubiquity(c) as i64);
        let chains = ubiquity::filter(chains, ubiquity::expiry_ubiquity_rank);
        self.optimal_chains(chains)
    }
}

/// Check that a supplied private key matches the leaf's public key: RSA by
/// modulus, ECDSA by the X coordinate of the public point (Y is implied by
/// the curve). Non-RSA/ECDSA leaves are rejected outright.
fn check_key_pairing(cert: &Certificate, key: Option<&PrivateKey>) -> Result<(), BundleError> {
    match (&cert.key_algorithm, key) {
        (KeyAlgorithm::Other(_), _) => Err(BundleError::NotRsaOrEcc),
        (_, None) => Ok(()),
        (KeyAlgorithm::Rsa { modulus, .. }, Some(PrivateKey::Rsa { modulus: key_mod, .. })) => {
            if modulus == key_mod {
                Ok(())
            } else {
                Err(BundleError::KeyMismatch)
            }
        }
        (KeyAlgorithm::Rsa { .. }, Some(_)) => Err(BundleError::KeyMismatch),
        (
            KeyAlgorithm::Ecdsa { point_x, .. },
            Some(PrivateKey::Ecdsa {
                point_x: key_x, ..
            }),
        ) => {
            if point_x == key_x {
                Ok(())
            } else {
                Err(BundleError::KeyMismatch)
            }
        }
        (KeyAlgorithm::Ecdsa { .. }, Some(_)) => Err(BundleError::KeyMismatch),
    }
}

/// Indices of chain certificates expiring within the warning window.
fn check_expiring_certs(chain: &[Certificate], now: i64) -> Vec<usize> {
    chain
        .iter()
        .enumerate()
        .filter(|(_, cert)| cert.not_after - now < EXPIRY_WARNING_WINDOW)
        .map(|(i, _)| i)
        .collect()
}

/// Uppercase-hex SKIs of the chain certificates at the given indices.
fn get_skis(chain: &[Certificate], indices: &[usize]) -> Vec<String> {
    indices
        .iter()
        .filter_map(|&i| chain.get(i))
        .map(|cert| util::hex_upper(&cert.subject_key_id))
        .collect()
}

/// Warning message enumerating expiring chain positions (1-based).
fn expiration_warning(expiring: &[usize]) -> String {
    let mut msg = EXPIRING_WARNING_STUB.to_string();
    if expiring.len() > 1 {
        msg.push_str("The expiring certs are");
    } else {
        msg.push_str("The expiring cert is");
    }
    for index in expiring {
        msg.push_str(&format!(" #{}", index + 1));
    }
    msg.push_str(" in the chain.");
    msg
}

/// Warning message enumerating platforms that do not trust the root.
fn untrusted_platforms_warning(platforms: &[String]) -> String {
    let mut msg = UNTRUSTED_WARNING_STUB.to_string();
    for (i, platform) in platforms.iter().enumerate() {
        if i > 0 {
            msg.push(',');
        }
        msg.push(' ');
        msg.push_str(platform);
    }
    msg.push('.');
    msg
}

/// Leaf CN plus SAN DNS names, deduplicated, CN first.
fn build_hostnames(cert: &Certificate) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut hostnames = Vec::new();
    if let Some(cn) = &cert.common_name {
        if seen.insert(cn.clone()) {
            hostnames.push(cn.clone());
        }
    }
    for name in &cert.san_dns {
        if seen.insert(name.clone()) {
            hostnames.push(name.clone());
        }
    }
    hostnames
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::EcCurve;
    use crate::parser::SignatureHash;

    fn cert_with_key(key: KeyAlgorithm) -> Certificate {
        Certificate {
            raw_der: Vec::new(),
            subject: "CN = test".into(),
            issuer: "CN = test ca".into(),
            subject_raw: Vec::new(),
            issuer_raw: Vec::new(),
            common_name: Some("test".into()),
            san_dns: Vec::new(),
            san_ips: Vec::new(),
            not_before: 0,
            not_after: 0,
            signature: vec![1],
            signature_algorithm: String::new(),
            signature_hash: SignatureHash::Sha256,
            key_algorithm: key,
            subject_key_id: vec![0xde, 0xad],
            aia_issuer_urls: Vec::new(),
            ocsp_urls: Vec::new(),
            crl_urls: Vec::new(),
            is_ca: false,
            eku_server_auth: None,
            self_signed: false,
        }
    }

    #[test]
    fn pairing_matches_rsa_by_modulus() {
        let cert = cert_with_key(KeyAlgorithm::Rsa {
            bits: 2048,
            modulus: vec![7; 256],
        });
        let good = PrivateKey::Rsa {
            modulus: vec![7; 256],
            pem: String::new(),
        };
        let bad = PrivateKey::Rsa {
            modulus: vec![8; 256],
            pem: String::new(),
        };
        assert!(check_key_pairing(&cert, Some(&good)).is_ok());
        assert!(matches!(
            check_key_pairing(&cert, Some(&bad)),
            Err(BundleError::KeyMismatch)
        ));
    }

    #[test]
    fn pairing_rejects_cross_algorithm_keys() {
        let rsa_cert = cert_with_key(KeyAlgorithm::Rsa {
            bits: 2048,
            modulus: vec![7; 256],
        });
        let ec_key = PrivateKey::Ecdsa {
            curve: EcCurve::P256,
            point_x: vec![1; 32],
            pem: String::new(),
        };
        assert!(matches!(
            check_key_pairing(&rsa_cert, Some(&ec_key)),
            Err(BundleError::KeyMismatch)
        ));
    }

    #[test]
    fn pairing_rejects_unsupported_algorithms() {
        let cert = cert_with_key(KeyAlgorithm::Other("1.3.101.112".into()));
        assert!(matches!(
            check_key_pairing(&cert, None),
            Err(BundleError::NotRsaOrEcc)
        ));
    }

    #[test]
    fn expiration_warning_enumerates_positions() {
        assert_eq!(
            expiration_warning(&[1]),
            "The bundle is expiring within 30 days. The expiring cert is #2 in the chain."
        );
        assert_eq!(
            expiration_warning(&[0, 2]),
            "The bundle is expiring within 30 days. The expiring certs are #1 #3 in the chain."
        );
    }

    #[test]
    fn untrusted_warning_joins_names() {
        assert_eq!(
            untrusted_platforms_warning(&["Alpha".into(), "Beta".into()]),
            "The bundle may not be trusted by the following platform(s): Alpha, Beta."
        );
    }

    #[test]
    fn skis_are_uppercase_hex() {
        let cert = cert_with_key(KeyAlgorithm::Rsa {
            bits: 2048,
            modulus: vec![7; 256],
        });
        assert_eq!(get_skis(&[cert], &[0]), vec!["DEAD".to_string()]);
    }

    #[test]
    fn hostnames_dedupe_cn_and_sans() {
        let mut cert = cert_with_key(KeyAlgorithm::Rsa {
            bits: 2048,
            modulus: vec![7; 256],
        });
        cert.common_name = Some("example.com".into());
        cert.san_dns = vec!["example.com".into(), "www.example.com".into()];
        assert_eq!(
            build_hostnames(&cert),
            vec!["example.com".to_string(), "www.example.com".to_string()]
        );
    }
}
