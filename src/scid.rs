/*!
*   SCID derivation and placeholder substitution
*
*   The SCID is the hash of the genesis entry with every occurrence of the
*   SCID replaced by the `{SCID}` placeholder. Substitution operates on the
*   structural JSON value, not on serialized text: only string values are
*   touched, object keys never are.
*/

use crate::{SCID_PLACEHOLDER, WebVhError, canonical, log_entry::LogEntry};
use serde_json::Value;

/// Derive the SCID from a genesis entry.
///
/// The entry may carry either the placeholder (creation path) or the real
/// SCID (verification path); in the latter case pass the SCID as `current`
/// so it can be folded back to the placeholder first.
pub fn derive_scid(entry: &LogEntry, current: Option<&str>) -> Result<String, WebVhError> {
    let mut value = entry.hashing_value()?;
    if let Some(scid) = current {
        substitute(&mut value, scid, SCID_PLACEHOLDER);
    }
    canonical::hash_value(&value).map_err(|e| {
        WebVhError::ChainIntegrity(format!(
            "Couldn't derive SCID from genesis entry. Reason: {e}"
        ))
    })
}

/// Verify that `scid` is the hash of the placeholder-bearing genesis entry.
/// Comparison is constant-time.
pub fn scid_is_from_hash(scid: &str, entry: &LogEntry) -> Result<bool, WebVhError> {
    let derived = derive_scid(entry, Some(scid))?;
    Ok(canonical::ct_eq(scid, &derived))
}

/// Recursively replace occurrences of `from` inside every string value of a
/// JSON tree. Object keys are not mutated.
pub fn substitute(value: &mut Value, from: &str, to: &str) {
    match value {
        Value::Object(map) => {
            for entry in map.values_mut() {
                substitute(entry, from, to);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                substitute(item, from, to);
            }
        }
        Value::String(s) => {
            if s.contains(from) {
                *s = s.replace(from, to);
            }
        }
        _ => {}
    }
}
