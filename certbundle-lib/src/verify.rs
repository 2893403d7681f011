//! Path-building chain verification.
//!
//! Finds every chain from a leaf certificate to a trust anchor using DFS
//! with backtracking over the intermediate pool, checking signatures,
//! validity windows, and CA basic constraints at each link. The full
//! candidate set is returned (not just the first hit) because chain
//! selection downstream ranks candidates against each other.

use crate::parser::Certificate;
use crate::pool::CertificatePool;
use std::collections::HashSet;
use tracing::debug;

/// Maximum chain depth to prevent runaway path building.
pub const MAX_CHAIN_DEPTH: usize = 32;

/// Why verification produced no chains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// No path from the leaf reaches the root pool. The caller may be able
    /// to recover by discovering more intermediates.
    UnknownAuthority,
    /// Paths were found but every one was rejected (expired certificate,
    /// non-CA issuer, disallowed leaf usage, ...). Not recoverable by
    /// fetching more intermediates.
    Rejected(String),
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyError::UnknownAuthority => {
                write!(f, "certificate signed by unknown authority")
            }
            VerifyError::Rejected(reason) => write!(f, "{}", reason),
        }
    }
}

/// Verify `leaf` against the pools, returning every chain
/// `[leaf, intermediate..., root]` that reaches a trust anchor.
///
/// `now` is the Unix timestamp validity windows are checked against.
pub fn verify_chains(
    leaf: &Certificate,
    intermediates: &CertificatePool,
    roots: &CertificatePool,
    now: i64,
) -> Result<Vec<Vec<Certificate>>, VerifyError> {
    if let Err(reason) = check_validity(leaf, now) {
        return Err(VerifyError::Rejected(reason));
    }
    if leaf.eku_server_auth == Some(false) {
        return Err(VerifyError::Rejected(format!(
            "certificate {} does not allow server authentication",
            leaf.subject
        )));
    }

    let mut search = Search {
        intermediates,
        roots,
        now,
        chains: Vec::new(),
        rejection: None,
    };
    let mut path = vec![leaf.clone()];
    let mut path_sigs: HashSet<Vec<u8>> = HashSet::new();
    path_sigs.insert(leaf.signature.clone());
    search.walk(leaf, &mut path, &mut path_sigs);

    if search.chains.is_empty() {
        debug!(subject = %leaf.subject, "no chain to a trust anchor");
        return Err(match search.rejection {
            Some(reason) => VerifyError::Rejected(reason),
            None => VerifyError::UnknownAuthority,
        });
    }
    debug!(
        subject = %leaf.subject,
        chains = search.chains.len(),
        "verification succeeded"
    );
    Ok(search.chains)
}

struct Search<'a> {
    intermediates: &'a CertificatePool,
    roots: &'a CertificatePool,
    now: i64,
    chains: Vec<Vec<Certificate>>,
    rejection: Option<String>,
}

impl Search<'_> {
    fn walk(
        &mut self,
        current: &Certificate,
        path: &mut Vec<Certificate>,
        path_sigs: &mut HashSet<Vec<u8>>,
    ) {
        // The current certificate is itself a trust anchor: the path is
        // complete as-is. Happens when the caller verifies a self-signed
        // root or a chain that already ends at an anchor.
        if self.roots.contains(current) {
            self.chains.push(path.clone());
            return;
        }

        // Complete the path at any root that signed the current cert.
        for root in self.roots.find_by_subject(&current.issuer_raw) {
            if path_sigs.contains(&root.signature) {
                continue;
            }
            if !current.verify_signed_by(root) {
                continue;
            }
            match self.check_issuer(root) {
                Ok(()) => {
                    let mut chain = path.clone();
                    chain.push(root.clone());
                    self.chains.push(chain);
                }
                Err(reason) => self.note_rejection(reason),
            }
        }

        if path.len() >= MAX_CHAIN_DEPTH {
            return;
        }

        // Extend through intermediates.
        for issuer in self.intermediates.find_by_subject(&current.issuer_raw) {
            if path_sigs.contains(&issuer.signature) {
                continue;
            }
            if !current.verify_signed_by(issuer) {
                continue;
            }
            if let Err(reason) = self.check_issuer(issuer) {
                self.note_rejection(reason);
                continue;
            }

            path.push(issuer.clone());
            path_sigs.insert(issuer.signature.clone());
            self.walk(issuer, path, path_sigs);
            path_sigs.remove(&issuer.signature);
            path.pop();
        }
    }

    /// Checks applied to a certificate used as an issuer.
    fn check_issuer(&self, cert: &Certificate) -> Result<(), String> {
        if !cert.is_ca {
            return Err(format!(
                "certificate {} is not a CA but is used as issuer",
                cert.subject
            ));
        }
        check_validity(cert, self.now)
    }

    fn note_rejection(&mut self, reason: String) {
        debug!("rejected candidate path: {}", reason);
        if self.rejection.is_none() {
            self.rejection = Some(reason);
        }
    }
}

fn check_validity(cert: &Certificate, now: i64) -> Result<(), String> {
    if now < cert.not_before {
        return Err(format!("certificate {} is not yet valid", cert.subject));
    }
    if now > cert.not_after {
        return Err(format!("certificate {} has expired", cert.subject));
    }
    Ok(())
}
