/*!
*   Assembling and sealing new log entries
*
*   Genesis flow: a preliminary entry carries the `{SCID}` placeholder, its
*   hash becomes the SCID, the placeholder is substituted structurally
*   throughout the entry, and the versionId is computed over the result.
*   Every sealed entry is signed and then re-validated in isolation before it
*   is handed back (witness checks excluded, those are tip-only).
*/

use crate::{
    METHOD, SCID_PLACEHOLDER, WebVhError,
    log_entry::LogEntry,
    parameters::Parameters,
    proof::{self, ProofSigner, ProofVerifier},
    replay, scid,
};
use chrono::{DateTime, FixedOffset, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Build, sign and self-validate one new log entry.
///
/// `previous` is the current tip and its effective parameters, or `None` for
/// the genesis entry. `delta` is the parameter change to embed; `document`
/// the proposed DID Document (placeholder occurrences welcome in genesis).
pub(crate) async fn seal_entry(
    previous: Option<(&LogEntry, &Parameters)>,
    delta: Parameters,
    document: Value,
    version_time: Option<DateTime<FixedOffset>>,
    signer: &dyn ProofSigner,
    verifier: &dyn ProofVerifier,
) -> Result<LogEntry, WebVhError> {
    let mut document = document;
    strip_secret_material(&mut document);

    let version_time = version_time.unwrap_or_else(|| Utc::now().fixed_offset());

    let mut entry = match previous {
        None => seal_genesis(delta, document, version_time)?,
        Some((tip, _)) => {
            let number = tip.version_number()? + 1;
            let mut entry = LogEntry {
                version_id: SCID_PLACEHOLDER.to_string(),
                version_time,
                parameters: delta,
                state: document,
                proof: vec![],
            };
            let entry_hash = entry.entry_hash()?;
            entry.version_id = format!("{number}-{entry_hash}");
            entry
        }
    };

    let signing_document = entry.signing_document()?;
    let proof = proof::sign_document(&signing_document, signer, None).await?;
    entry.proof.push(proof);

    // the sealed entry must survive the same validation a resolver applies
    replay::validate_entry(&entry, previous, verifier, None, true).await?;

    Ok(entry)
}

fn seal_genesis(
    mut delta: Parameters,
    document: Value,
    version_time: DateTime<FixedOffset>,
) -> Result<LogEntry, WebVhError> {
    if delta.method.is_none() {
        delta.method = Some(METHOD.to_string());
    }
    delta.scid = Some(Arc::new(SCID_PLACEHOLDER.to_string()));

    let preliminary = LogEntry {
        version_id: SCID_PLACEHOLDER.to_string(),
        version_time,
        parameters: delta,
        state: document,
        proof: vec![],
    };

    let new_scid = scid::derive_scid(&preliminary, None)?;
    debug!("derived SCID ({new_scid}) for new DID");

    // substitute the placeholder throughout the structural entry
    let mut value = serde_json::to_value(&preliminary).map_err(|e| {
        WebVhError::InputShape(format!("Couldn't serialize log entry. Reason: {e}"))
    })?;
    scid::substitute(&mut value, SCID_PLACEHOLDER, &new_scid);
    let mut entry: LogEntry = serde_json::from_value(value).map_err(|e| {
        WebVhError::InputShape(format!(
            "Couldn't rebuild genesis entry after SCID substitution. Reason: {e}"
        ))
    })?;

    let entry_hash = scid::derive_scid(&entry, Some(&new_scid))?;
    entry.version_id = format!("1-{entry_hash}");
    Ok(entry)
}

/// The core never emits private key material: any `secretKeyMultibase`
/// member is dropped from the document before hashing and signing.
fn strip_secret_material(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.remove("secretKeyMultibase");
            for entry in map.values_mut() {
                strip_secret_material(entry);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                strip_secret_material(item);
            }
        }
        _ => {}
    }
}
