/*!
*   The four DID operations: create, resolve, update, deactivate
*
*   Writes replay the existing log first — an invalid or deactivated chain
*   refuses further entries — then append exactly one sealed entry. Reads are
*   a full replay. Every operation returns fresh snapshots; nothing in the
*   crate holds state between calls.
*/

use crate::{
    WebVhError,
    builder,
    crypto::Ed25519Verifier,
    log_entry::LogEntry,
    parameters::Parameters,
    proof::ProofSigner,
    replay::{self, DocumentMetadata, ResolutionOptions},
};
use chrono::{DateTime, FixedOffset};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub use crate::replay::{ResolvedDid, resolve_did_from_log};

/// Result of a write operation: the DID, its resolved document and metadata,
/// and the full log including the appended entry.
#[derive(Clone, Debug)]
pub struct DidOutcome {
    pub did: String,
    pub document: Value,
    pub metadata: DocumentMetadata,
    pub log: Vec<LogEntry>,
}

/// Inputs for [`create_did`].
pub struct CreateDidInput<'a> {
    /// Proposed DID Document; `{SCID}` placeholders are substituted once the
    /// SCID is derived
    pub document: Value,

    /// Genesis parameters; `updateKeys` is required, `method` and `scid` are
    /// filled in
    pub parameters: Parameters,

    pub signer: &'a dyn ProofSigner,

    /// Defaults to now
    pub version_time: Option<DateTime<FixedOffset>>,
}

/// Create a new DID from a genesis document and parameters.
pub async fn create_did(input: CreateDidInput<'_>) -> Result<DidOutcome, WebVhError> {
    let verifier = Ed25519Verifier;
    let entry = builder::seal_entry(
        None,
        input.parameters,
        input.document,
        input.version_time,
        input.signer,
        &verifier,
    )
    .await?;

    let log = vec![entry];
    let (resolved, _) = replay::replay(&log, &ResolutionOptions::default(), false).await?;
    debug!("created DID ({})", resolved.did);

    Ok(DidOutcome {
        did: resolved.did,
        document: resolved.document,
        metadata: resolved.metadata,
        log,
    })
}

/// Inputs for [`update_did`].
pub struct UpdateDidInput<'a> {
    /// The existing, valid log
    pub log: Vec<LogEntry>,

    /// Desired parameter state; absent fields inherit, so both full sets and
    /// deltas work
    pub parameters: Parameters,

    /// Replacement DID Document; the current one is kept when absent
    pub document: Option<Value>,

    pub signer: &'a dyn ProofSigner,

    pub version_time: Option<DateTime<FixedOffset>>,
}

/// Append an update entry to an existing log.
pub async fn update_did(input: UpdateDidInput<'_>) -> Result<DidOutcome, WebVhError> {
    let verifier = Ed25519Verifier;
    let (current, tip_params) =
        replay::replay(&input.log, &ResolutionOptions::default(), false).await?;
    if current.metadata.deactivated {
        return Err(WebVhError::PolicyViolation(format!(
            "DID ({}) is deactivated and can no longer be updated",
            current.did
        )));
    }

    let delta = input.parameters.diff(&tip_params)?;
    let Some(tip_entry) = input.log.last() else {
        return Err(WebVhError::NotFound);
    };
    let document = input
        .document
        .unwrap_or_else(|| tip_entry.state.clone());

    let entry = builder::seal_entry(
        Some((tip_entry, &tip_params)),
        delta,
        document,
        input.version_time,
        input.signer,
        &verifier,
    )
    .await?;

    let mut log = input.log;
    log.push(entry);
    let (resolved, _) = replay::replay(&log, &ResolutionOptions::default(), false).await?;

    Ok(DidOutcome {
        did: resolved.did,
        document: resolved.document,
        metadata: resolved.metadata,
        log,
    })
}

/// Inputs for [`deactivate_did`].
pub struct DeactivateDidInput<'a> {
    /// The existing, valid log
    pub log: Vec<LogEntry>,

    pub signer: &'a dyn ProofSigner,

    pub version_time: Option<DateTime<FixedOffset>>,
}

/// Append a final entry that deactivates the DID. The entry clears
/// `updateKeys`; no further entries are admissible afterwards.
pub async fn deactivate_did(input: DeactivateDidInput<'_>) -> Result<DidOutcome, WebVhError> {
    let verifier = Ed25519Verifier;
    let (current, tip_params) =
        replay::replay(&input.log, &ResolutionOptions::default(), false).await?;
    if current.metadata.deactivated {
        return Err(WebVhError::PolicyViolation(format!(
            "DID ({}) is already deactivated",
            current.did
        )));
    }

    let delta = Parameters {
        update_keys: Some(Arc::new(Vec::new())),
        deactivated: Some(true),
        ..Default::default()
    };
    let Some(tip_entry) = input.log.last() else {
        return Err(WebVhError::NotFound);
    };
    let document = tip_entry.state.clone();

    let entry = builder::seal_entry(
        Some((tip_entry, &tip_params)),
        delta,
        document,
        input.version_time,
        input.signer,
        &verifier,
    )
    .await?;

    let mut log = input.log;
    log.push(entry);
    let (resolved, _) = replay::replay(&log, &ResolutionOptions::default(), false).await?;

    Ok(DidOutcome {
        did: resolved.did,
        document: resolved.document,
        metadata: resolved.metadata,
        log,
    })
}

/// Resolve a DID by fetching its log (and witness proofs when needed) from
/// the web location the identifier encodes.
#[cfg(feature = "network")]
pub async fn resolve_did(
    did: &str,
    mut options: ResolutionOptions,
) -> Result<ResolvedDid, WebVhError> {
    use crate::{fetch::HttpFetcher, log_entry, url::DidUrl};

    let url = DidUrl::parse(did)?;
    let fetcher: Arc<dyn crate::fetch::ProofFetcher> = match options.fetcher.clone() {
        Some(fetcher) => fetcher,
        None => Arc::new(HttpFetcher::default()),
    };
    options.fetcher = Some(fetcher.clone());

    if options.version_id.is_none() {
        options.version_id = url.query_version_id.clone();
    }
    if options.version_time.is_none() {
        options.version_time = url.query_version_time;
    }

    let text = fetcher.fetch_log(&url.log_url()?).await?;
    let log = log_entry::parse_log(&text)?;
    resolve_did_from_log(&log, &options).await
}
