/*!
*   Replaying a DID log end-to-end
*
*   Resolution walks the log in order, folding parameter deltas into the
*   effective state and enforcing every chain invariant per entry: version
*   numbering, timestamp monotonicity, entryHash integrity, SCID derivation,
*   proof authorization under the effective update keys, pre-rotation
*   commitments and portability. The witness quorum is a tip-only, global
*   check and runs last.
*
*   Best-effort recovery: once a requested target version has been captured,
*   later failures are logged and swallowed so a broken tip cannot take down
*   resolution of intact history.
*/

use crate::{
    WebVhError, canonical,
    crypto::Ed25519Verifier,
    fetch::ProofFetcher,
    log_entry::{self, LogEntry},
    parameters::Parameters,
    proof::{self, ProofVerifier},
    scid,
    url::DidUrl,
    witness::{self, Witnesses, WitnessProofEntry},
};
use ahash::HashMap;
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, warn};

/// In fast mode, signatures are still verified for the genesis entry and
/// this many entries at the tip of the log.
pub const FAST_VERIFY_TAIL: usize = 10;

/// Caller-supplied knobs for a resolution.
#[derive(Clone, Default)]
pub struct ResolutionOptions {
    /// Emit the version with this exact `versionId`
    pub version_id: Option<String>,

    /// Emit the version with this 1-based number
    pub version_number: Option<u32>,

    /// Emit the version in force at this time
    pub version_time: Option<DateTime<FixedOffset>>,

    /// Emit the first version in which this verification method appears
    pub verification_method: Option<String>,

    /// Pre-fetched witness proofs; when absent and witnessing is active,
    /// the fetcher is consulted
    pub witness_proofs: Option<Vec<WitnessProofEntry>>,

    /// Key set for proofs whose verification method is not an inline
    /// `did:key` (verification method id -> multikey)
    pub verification_keys: Option<HashMap<String, String>>,

    /// External signature verifier; Ed25519 by default
    pub verifier: Option<Arc<dyn ProofVerifier>>,

    /// External fetcher for witness proofs
    pub fetcher: Option<Arc<dyn ProofFetcher>>,

    /// Elide signature verification for interior entries. The genesis entry
    /// and the last [`FAST_VERIFY_TAIL`] entries are always verified. Off by
    /// default; leave it off in security-sensitive configurations.
    pub fast: bool,
}

/// Metadata accumulator emitted alongside the resolved document.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    pub version_id: String,
    pub created: String,
    pub updated: String,
    pub scid: String,
    pub update_keys: Vec<String>,
    pub next_key_hashes: Vec<String>,
    pub prerotation: bool,
    pub portable: bool,
    pub deactivated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub witness: Option<Witnesses>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watchers: Option<Vec<String>>,
}

/// Result of a resolution: the DID, its document and metadata as of the
/// selected version.
#[derive(Clone, Debug)]
pub struct ResolvedDid {
    pub did: String,
    pub document: Value,
    pub metadata: DocumentMetadata,
}

/// Resolve a DID from its log, validating every entry.
pub async fn resolve_did_from_log(
    log: &[LogEntry],
    options: &ResolutionOptions,
) -> Result<ResolvedDid, WebVhError> {
    let (resolved, _) = replay(log, options, true).await?;
    Ok(resolved)
}

enum TargetMode {
    VersionId(String),
    VersionNumber(u32),
    VersionTime(DateTime<FixedOffset>),
    VerificationMethod(String),
    Tip,
}

impl TargetMode {
    fn from_options(options: &ResolutionOptions) -> TargetMode {
        if let Some(id) = &options.version_id {
            TargetMode::VersionId(id.clone())
        } else if let Some(number) = options.version_number {
            TargetMode::VersionNumber(number)
        } else if let Some(time) = options.version_time {
            TargetMode::VersionTime(time)
        } else if let Some(vm) = &options.verification_method {
            TargetMode::VerificationMethod(vm.clone())
        } else {
            TargetMode::Tip
        }
    }
}

/// Full replay, also yielding the effective parameters at the tip (needed by
/// the write operations to seal the next entry).
pub(crate) async fn replay(
    log: &[LogEntry],
    options: &ResolutionOptions,
    enforce_witness: bool,
) -> Result<(ResolvedDid, Parameters), WebVhError> {
    if log.is_empty() {
        return Err(WebVhError::InputShape(
            "DID log contains no entries".to_string(),
        ));
    }

    let default_verifier = Ed25519Verifier;
    let verifier: &dyn ProofVerifier = options.verifier.as_deref().unwrap_or(&default_verifier);
    let target = TargetMode::from_options(options);
    let tail_start = log.len().saturating_sub(FAST_VERIFY_TAIL);

    let mut previous: Option<(&LogEntry, Parameters)> = None;
    let mut created = String::new();
    let mut genesis_tail = String::new();
    let mut captured: Option<(ResolvedDid, Parameters)> = None;

    for (index, entry) in log.iter().enumerate() {
        debug!("replaying versionId ({})", entry.version_id);
        let verify_signatures = !options.fast || index == 0 || index >= tail_start;

        let step = validate_entry(
            entry,
            previous.as_ref().map(|(e, p)| (*e, p)),
            verifier,
            options.verification_keys.as_ref(),
            verify_signatures,
        )
        .await
        .and_then(|params| {
            // Non-portable DIDs keep the host segment established at genesis
            if index > 0
                && !params.portable.unwrap_or(false)
                && let Some(id) = entry.state.get("id").and_then(Value::as_str)
                && host_tail(id) != genesis_tail
            {
                return Err(WebVhError::PolicyViolation(format!(
                    "Host segment changed at versionId ({}) but the DID is not portable",
                    entry.version_id
                )));
            }
            Ok(params)
        });

        let params = match step {
            Ok(params) => params,
            Err(e) => {
                if let Some(snapshot) = captured {
                    warn!(
                        "Replay failed at versionId ({}) after the requested target was reached: {e}",
                        entry.version_id
                    );
                    return Ok(snapshot);
                }
                return Err(e);
            }
        };

        if index == 0 {
            created = entry.version_time_string();
            if let Some(id) = entry.state.get("id").and_then(Value::as_str) {
                genesis_tail = host_tail(id).to_string();
            }
        }

        match &target {
            TargetMode::VersionId(id) if entry.version_id == *id => {
                captured = Some((build_snapshot(entry, &params, &created)?, params.clone()));
            }
            TargetMode::VersionNumber(number) if index + 1 == *number as usize => {
                captured = Some((build_snapshot(entry, &params, &created)?, params.clone()));
            }
            TargetMode::VersionTime(time) if entry.version_time <= *time => {
                // interval match: the last entry at or before the target wins
                captured = Some((build_snapshot(entry, &params, &created)?, params.clone()));
            }
            TargetMode::VerificationMethod(vm)
                if captured.is_none() && has_verification_method(&entry.state, vm) =>
            {
                captured = Some((build_snapshot(entry, &params, &created)?, params.clone()));
            }
            _ => {}
        }

        previous = Some((entry, params));
    }

    let Some((tip_entry, tip_params)) = previous else {
        return Err(WebVhError::NotFound);
    };

    if enforce_witness
        && let Err(e) = enforce_tip_quorum(tip_entry, &tip_params, options, verifier).await
    {
        if let Some(snapshot) = captured {
            warn!("Witness check failed after the requested target was reached: {e}");
            return Ok(snapshot);
        }
        return Err(e);
    }

    match target {
        TargetMode::Tip => {
            let snapshot = build_snapshot(tip_entry, &tip_params, &created)?;
            Ok((snapshot, tip_params))
        }
        _ => captured.ok_or(WebVhError::NotFound),
    }
}

/// Validate a single entry against its predecessor, returning the effective
/// parameters after it. Witness checks are not performed here.
pub(crate) async fn validate_entry(
    entry: &LogEntry,
    previous: Option<(&LogEntry, &Parameters)>,
    verifier: &dyn ProofVerifier,
    known_keys: Option<&HashMap<String, String>>,
    verify_signatures: bool,
) -> Result<Parameters, WebVhError> {
    let (number, declared_hash) = log_entry::parse_version_id(&entry.version_id)?;

    // version numbers form a strict 1..n sequence
    if let Some((prev_entry, _)) = previous {
        let prev_number = prev_entry.version_number()?;
        if number != prev_number + 1 {
            return Err(WebVhError::ChainIntegrity(format!(
                "Version number ({number}) must be one greater than the previous ({prev_number})"
            )));
        }
    } else if number != 1 {
        return Err(WebVhError::ChainIntegrity(format!(
            "First log entry must have version number 1, got ({number})"
        )));
    }

    // versionTime is non-decreasing and never in the future
    if entry.version_time > Utc::now() {
        return Err(WebVhError::ChainIntegrity(format!(
            "versionTime ({}) of versionId ({}) is in the future",
            entry.version_time_string(),
            entry.version_id
        )));
    }
    if let Some((prev_entry, _)) = previous
        && entry.version_time < prev_entry.version_time
    {
        return Err(WebVhError::ChainIntegrity(format!(
            "versionTime ({}) of versionId ({}) precedes the previous entry",
            entry.version_time_string(),
            entry.version_id
        )));
    }

    // entryHash and, for genesis, SCID derivation — integrity comes before
    // any policy- or authorization-level check
    if previous.is_none() {
        let Some(declared_scid) = entry.scid() else {
            return Err(WebVhError::ChainIntegrity(
                "First log entry must declare an SCID".to_string(),
            ));
        };
        let derived = scid::derive_scid(entry, Some(&declared_scid))?;
        if derived != declared_hash {
            return Err(WebVhError::ChainIntegrity(format!(
                "entryHash mismatch at versionId ({}): calculated ({derived})",
                entry.version_id
            )));
        }
        if !canonical::ct_eq(&declared_scid, &derived) {
            return Err(WebVhError::ChainIntegrity(format!(
                "SCID ({declared_scid}) does not match the calculated SCID ({derived})"
            )));
        }
    } else {
        let computed = entry.entry_hash()?;
        if computed != declared_hash {
            return Err(WebVhError::ChainIntegrity(format!(
                "entryHash mismatch at versionId ({}): calculated ({computed})",
                entry.version_id
            )));
        }
    }

    let params = entry.parameters.validate(previous.map(|(_, p)| p))?;

    if let Some((prev_entry, _)) = previous {
        verify_portability(entry, prev_entry, &params)?;
    }

    // at least one proof must verify under the effective update keys
    if entry.proof.is_empty() {
        return Err(WebVhError::Authorization(format!(
            "Missing proof in the signed log entry at versionId ({})",
            entry.version_id
        )));
    }
    let authorized = match previous {
        Some((_, prev_params)) => prev_params.active_update_keys.clone(),
        // genesis is self-authorizing; the SCID binds it to the identifier
        None => params.active_update_keys.clone(),
    };

    let document = entry.signing_document()?;
    let mut authorized_ok = false;
    for item in &entry.proof {
        // authorization is by key material, not by the method id's spelling:
        // resolve through the caller-supplied key set or the inline did:key
        let multikey = match proof::resolve_multikey(&item.verification_method, known_keys) {
            Ok(multikey) => multikey,
            Err(e) => {
                debug!(
                    "Couldn't resolve verification method ({}), skipping: {e}",
                    item.verification_method
                );
                continue;
            }
        };
        if !authorized.iter().any(|k| k == &multikey) {
            debug!("Signing key ({multikey}) is not an effective update key, skipping");
            continue;
        }
        if verify_signatures {
            match proof::verify_proof(&document, item, verifier, known_keys).await {
                Ok(true) => {
                    authorized_ok = true;
                    break;
                }
                Ok(false) => {
                    warn!(
                        "Signature by ({multikey}) failed verification at versionId ({})",
                        entry.version_id
                    );
                }
                Err(e) => {
                    warn!(
                        "Proof rejected at versionId ({}): {e}",
                        entry.version_id
                    );
                }
            }
        } else {
            authorized_ok = true;
            break;
        }
    }
    if !authorized_ok {
        return Err(WebVhError::Authorization(format!(
            "No proof verifies under the effective update keys at versionId ({})",
            entry.version_id
        )));
    }

    debug!("versionId ({}) successfully verified", entry.version_id);
    Ok(params)
}

/// If the DID document id changed from the previous entry, the DID must be
/// portable and the previous identifier must appear in `alsoKnownAs`.
fn verify_portability(
    entry: &LogEntry,
    previous: &LogEntry,
    params: &Parameters,
) -> Result<(), WebVhError> {
    let current_id = entry.state.get("id").and_then(Value::as_str);
    let previous_id = previous.state.get("id").and_then(Value::as_str);

    let (Some(current), Some(previous_did)) = (current_id, previous_id) else {
        return Ok(());
    };
    if current == previous_did {
        return Ok(());
    }

    if params.portable != Some(true) {
        return Err(WebVhError::PolicyViolation(format!(
            "DID document id changed at versionId ({}) but portable is not enabled",
            entry.version_id
        )));
    }

    let has_previous_alias = entry
        .state
        .get("alsoKnownAs")
        .and_then(Value::as_array)
        .is_some_and(|aliases| {
            aliases
                .iter()
                .any(|alias| alias.as_str() == Some(previous_did))
        });
    if !has_previous_alias {
        return Err(WebVhError::PolicyViolation(format!(
            "DID was moved but the previous DID ({previous_did}) is not in alsoKnownAs"
        )));
    }
    Ok(())
}

async fn enforce_tip_quorum(
    tip: &LogEntry,
    params: &Parameters,
    options: &ResolutionOptions,
    verifier: &dyn ProofVerifier,
) -> Result<(), WebVhError> {
    let Some(config) = &params.witness else {
        return Ok(());
    };
    if config.is_empty() || config.threshold().unwrap_or(0) == 0 {
        return Ok(());
    }

    if let Some(proofs) = &options.witness_proofs {
        return witness::enforce_quorum(&tip.version_id, config, proofs, verifier).await;
    }

    let Some(fetcher) = &options.fetcher else {
        return Err(WebVhError::WitnessQuorum(format!(
            "Witnessing is active at versionId ({}) but no witness proofs were supplied",
            tip.version_id
        )));
    };
    let Some(did) = tip.state.get("id").and_then(Value::as_str) else {
        return Err(WebVhError::InputShape(
            "DID Document is missing its id".to_string(),
        ));
    };
    let url = DidUrl::parse(did)?.witness_url()?;
    let proofs = fetcher.fetch_witness_proofs(&url).await?;
    witness::enforce_quorum(&tip.version_id, config, &proofs, verifier).await
}

fn build_snapshot(
    entry: &LogEntry,
    params: &Parameters,
    created: &str,
) -> Result<ResolvedDid, WebVhError> {
    let Some(did) = entry.state.get("id").and_then(Value::as_str) else {
        return Err(WebVhError::InputShape(
            "DID Document is missing its id".to_string(),
        ));
    };
    let did = did.to_string();

    // deep clone; injection never touches the hashed state
    let mut document = entry.state.clone();
    inject_default_services(&mut document, &did)?;

    let metadata = DocumentMetadata {
        version_id: entry.version_id.clone(),
        created: created.to_string(),
        updated: entry.version_time_string(),
        scid: params
            .scid
            .as_ref()
            .map(|s| s.to_string())
            .unwrap_or_default(),
        update_keys: params.active_update_keys.as_ref().clone(),
        next_key_hashes: params
            .next_key_hashes
            .as_deref()
            .cloned()
            .unwrap_or_default(),
        prerotation: params.pre_rotation_active,
        portable: params.portable.unwrap_or(false),
        deactivated: params.deactivated.unwrap_or(false),
        witness: params.witness.as_deref().cloned(),
        watchers: params.watchers.as_deref().cloned(),
    };

    Ok(ResolvedDid {
        did,
        document,
        metadata,
    })
}

/// Add the `#files` and `#whois` services implied by the method when the
/// document doesn't declare them itself.
fn inject_default_services(document: &mut Value, did: &str) -> Result<(), WebVhError> {
    let url = DidUrl::parse(did)?;
    let files = json!({
        "id": "#files",
        "type": "relativeRef",
        "serviceEndpoint": url.base_url()?.to_string(),
    });
    let whois = json!({
        "@context": "https://identity.foundation/linked-vp/contexts/v1",
        "id": "#whois",
        "type": "LinkedVerifiablePresentation",
        "serviceEndpoint": url.whois_url()?.to_string(),
    });

    let Some(existing) = document.get("service") else {
        if let Some(map) = document.as_object_mut() {
            map.insert("service".to_string(), Value::Array(vec![files, whois]));
        }
        return Ok(());
    };

    let Some(existing) = existing.as_array() else {
        return Err(WebVhError::InputShape(
            "DID Document service is not an array".to_string(),
        ));
    };

    let mut has_files = false;
    let mut has_whois = false;
    for service in existing {
        if let Some(id) = service.get("id").and_then(Value::as_str) {
            if id.ends_with("#files") {
                has_files = true;
            } else if id.ends_with("#whois") {
                has_whois = true;
            }
        }
    }

    let mut services = existing.clone();
    if !has_files {
        services.push(files);
    }
    if !has_whois {
        services.push(whois);
    }
    if let Some(map) = document.as_object_mut() {
        map.insert("service".to_string(), Value::Array(services));
    }
    Ok(())
}

fn has_verification_method(state: &Value, verification_method: &str) -> bool {
    state
        .get("verificationMethod")
        .and_then(Value::as_array)
        .is_some_and(|methods| {
            methods
                .iter()
                .any(|m| m.get("id").and_then(Value::as_str) == Some(verification_method))
        })
}

fn host_tail(id: &str) -> &str {
    id.rsplit(':').next().unwrap_or(id)
}
