/*!
*   Core log protocol engine for the did:webvh DID method
*
*   A webvh DID is backed by an append-only log of entries hosted at a web
*   origin. The identifier embeds a Self-Certifying IDentifier (SCID) derived
*   from the genesis entry, so any rewrite of history is detectable without
*   trusting the host.
*
*   This crate implements the protocol core: building and sealing log entries
*   (create/update/deactivate), replaying a log to reconstruct the current DID
*   Document and metadata while enforcing every chain invariant, and the
*   `eddsa-jcs-2022` Data Integrity proof suite over canonicalized entries.
*
*   Key material, raw signatures and network I/O stay outside the crate,
*   behind the [`proof::ProofSigner`], [`proof::ProofVerifier`] and
*   [`fetch::ProofFetcher`] traits. Default Ed25519 collaborators live in
*   [`crypto`].
*/

use thiserror::Error;

pub mod builder;
pub mod canonical;
pub mod crypto;
pub mod fetch;
pub mod log_entry;
pub mod operations;
pub mod parameters;
pub mod proof;
pub mod replay;
pub mod scid;
pub mod url;
pub mod witness;

/// Placeholder standing in for the SCID in the genesis entry before the SCID
/// exists. Syntactically invalid as an SCID, treated as an opaque token.
pub const SCID_PLACEHOLDER: &str = "{SCID}";

/// Protocol identifier carried in the genesis `method` parameter.
pub const METHOD: &str = "did:webvh:1.0";

/// Error taxonomy for the webvh core.
///
/// Every variant carries a human-readable message; chain-level failures
/// include the offending `versionId`.
#[derive(Error, Debug)]
pub enum WebVhError {
    /// Missing required field, malformed DID string, bad parameter shape
    #[error("InputShape: {0}")]
    InputShape(String),
    /// Version number mismatch, entryHash mismatch, SCID mismatch
    #[error("ChainIntegrity: {0}")]
    ChainIntegrity(String),
    /// No proof verifies under the effective update keys, or a pre-rotation
    /// commitment was violated
    #[error("Authorization: {0}")]
    Authorization(String),
    /// Update on a deactivated DID, non-portable host change
    #[error("PolicyViolation: {0}")]
    PolicyViolation(String),
    /// Witness threshold not met at the tip
    #[error("WitnessQuorum: {0}")]
    WitnessQuorum(String),
    /// Signer, verifier or fetcher raised
    #[error("External: {0}")]
    External(String),
    #[error("DID query NotFound")]
    NotFound,
    #[error("UnsupportedMethod: must be did:webvh")]
    UnsupportedMethod,
}

/// Convenience re-exports for common types.
///
/// ```
/// use didwebvh_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::crypto::{Ed25519Signer, Ed25519Verifier};
    pub use crate::log_entry::LogEntry;
    pub use crate::operations::{
        CreateDidInput, DeactivateDidInput, DidOutcome, UpdateDidInput, create_did,
        deactivate_did, update_did,
    };
    pub use crate::parameters::Parameters;
    pub use crate::proof::{ProofSigner, ProofVerifier};
    pub use crate::replay::{
        DocumentMetadata, ResolutionOptions, ResolvedDid, resolve_did_from_log,
    };
    pub use crate::witness::{Witness, Witnesses};
    pub use crate::{METHOD, SCID_PLACEHOLDER, WebVhError};
}
