/*!
*   The webvh DID log: one entry per version of the DID Document
*
*   On the wire a log is newline-delimited JSON, one entry per line. The
*   `entryHash` suffix of a `versionId` is the multibase multihash of the
*   entry with `versionId` and `proof` removed; for the genesis entry the
*   SCID is folded back to its placeholder first, which makes the genesis
*   hash equal to the SCID itself.
*/

use crate::{
    WebVhError, canonical,
    parameters::Parameters,
    proof::DataIntegrityProof,
};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single version record of a webvh DID.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// `<n>-<entryHash>` where n is the 1-based version number
    pub version_id: String,

    /// RFC 3339, non-decreasing along the chain
    #[serde(serialize_with = "format_version_time")]
    pub version_time: DateTime<FixedOffset>,

    /// Parameter delta for this version
    pub parameters: Parameters,

    /// The DID Document as of this version
    pub state: Value,

    /// Data Integrity proofs from authorized update keys
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub proof: Vec<DataIntegrityProof>,
}

// versionTime is serialized with seconds-only precision, Zulu offset
fn format_version_time<S>(date: &DateTime<FixedOffset>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&date.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
}

impl LogEntry {
    /// The 1-based version number prefix of `versionId`.
    pub fn version_number(&self) -> Result<u32, WebVhError> {
        Ok(parse_version_id(&self.version_id)?.0)
    }

    pub fn version_time_string(&self) -> String {
        self.version_time
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    }

    /// SCID declared by this entry's parameters, if any.
    pub fn scid(&self) -> Option<String> {
        self.parameters.scid.as_ref().map(|s| s.to_string())
    }

    /// The entry as a JSON value with `versionId` and `proof` removed — the
    /// input to `entryHash` and SCID derivation.
    pub fn hashing_value(&self) -> Result<Value, WebVhError> {
        let mut value = serde_json::to_value(self).map_err(|e| {
            WebVhError::InputShape(format!("Couldn't serialize log entry. Reason: {e}"))
        })?;
        if let Some(map) = value.as_object_mut() {
            map.remove("versionId");
            map.remove("proof");
        }
        Ok(value)
    }

    /// `entryHash` for a non-genesis entry. Genesis hashing goes through
    /// [`crate::scid::derive_scid`], which also folds the SCID back to its
    /// placeholder.
    pub fn entry_hash(&self) -> Result<String, WebVhError> {
        canonical::hash_value(&self.hashing_value()?)
    }

    /// The entry as the document to be signed: everything except `proof`
    /// (`versionId` included).
    pub fn signing_document(&self) -> Result<Value, WebVhError> {
        let mut value = serde_json::to_value(self).map_err(|e| {
            WebVhError::InputShape(format!("Couldn't serialize log entry. Reason: {e}"))
        })?;
        if let Some(map) = value.as_object_mut() {
            map.remove("proof");
        }
        Ok(value)
    }
}

/// Split a `versionId` into its `(number, hash)` fields.
pub fn parse_version_id(version_id: &str) -> Result<(u32, String), WebVhError> {
    let Some((id, hash)) = version_id.split_once('-') else {
        return Err(WebVhError::ChainIntegrity(format!(
            "versionId ({version_id}) doesn't match format <int>-<hash>"
        )));
    };
    let id = id.parse::<u32>().map_err(|e| {
        WebVhError::ChainIntegrity(format!(
            "Failed to parse version number ({id}) of versionId ({version_id}): {e}"
        ))
    })?;
    Ok((id, hash.to_string()))
}

/// Parse a newline-delimited JSON log. Lines are parsed independently;
/// blank lines and comments are not allowed.
pub fn parse_log(text: &str) -> Result<Vec<LogEntry>, WebVhError> {
    let mut entries = Vec::new();
    for (number, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            return Err(WebVhError::InputShape(format!(
                "Log line {} is blank; the DID log must be one JSON entry per line",
                number + 1
            )));
        }
        let entry: LogEntry = serde_json::from_str(line).map_err(|e| {
            WebVhError::InputShape(format!(
                "Couldn't deserialize log entry on line {}. Reason: {e}",
                number + 1
            ))
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

/// Serialize a log back to its newline-delimited JSON form.
pub fn serialize_log(log: &[LogEntry]) -> Result<String, WebVhError> {
    let mut out = String::new();
    for entry in log {
        let line = serde_json::to_string(entry).map_err(|e| {
            WebVhError::InputShape(format!("Couldn't serialize log entry. Reason: {e}"))
        })?;
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::METHOD;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Arc;

    fn sample_entry() -> LogEntry {
        LogEntry {
            version_id: "1-zQmTest".to_string(),
            version_time: Utc::now().fixed_offset(),
            parameters: Parameters {
                method: Some(METHOD.to_string()),
                scid: Some(Arc::new("zQmScid".to_string())),
                update_keys: Some(Arc::new(vec!["z6Mk1".to_string()])),
                ..Default::default()
            },
            state: json!({"id": "did:webvh:zQmScid:example.com"}),
            proof: vec![],
        }
    }

    #[test]
    fn parse_version_id_fields() {
        let (number, hash) = parse_version_id("42-zQmabcdef").unwrap();
        assert_eq!(number, 42);
        assert_eq!(hash, "zQmabcdef");

        assert!(parse_version_id("no-dash-missing-number").is_err());
        assert!(parse_version_id("zQmabcdef").is_err());
    }

    #[test]
    fn hashing_value_strips_version_id_and_proof() {
        let entry = sample_entry();
        let value = entry.hashing_value().unwrap();
        assert!(value.get("versionId").is_none());
        assert!(value.get("proof").is_none());
        assert!(value.get("state").is_some());
        assert!(value.get("parameters").is_some());
    }

    #[test]
    fn entry_hash_independent_of_version_id() {
        let mut a = sample_entry();
        let b = a.clone();
        a.version_id = "9-zQmOther".to_string();
        assert_eq!(a.entry_hash().unwrap(), b.entry_hash().unwrap());
    }

    #[test]
    fn entry_hash_changes_with_state() {
        let a = sample_entry();
        let mut b = a.clone();
        b.state = json!({"id": "did:webvh:zQmScid:evil.example.com"});
        assert_ne!(a.entry_hash().unwrap(), b.entry_hash().unwrap());
    }

    #[test]
    fn version_time_serializes_seconds_zulu() {
        let entry = sample_entry();
        let value = serde_json::to_value(&entry).unwrap();
        let time = value["versionTime"].as_str().unwrap();
        assert!(time.ends_with('Z'));
        assert!(!time.contains('.'));
    }

    #[test]
    fn log_roundtrip() {
        let log = vec![sample_entry(), sample_entry()];
        let text = serialize_log(&log).unwrap();
        assert_eq!(text.lines().count(), 2);
        let parsed = parse_log(&text).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].version_id, log[0].version_id);
    }

    #[test]
    fn blank_lines_rejected() {
        let mut text = serialize_log(&[sample_entry()]).unwrap();
        text.push('\n');
        let result = parse_log(&text);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("blank"));
    }

    #[test]
    fn empty_proof_omitted_from_wire() {
        let entry = sample_entry();
        let value = serde_json::to_value(&entry).unwrap();
        assert!(value.get("proof").is_none());
    }
}
