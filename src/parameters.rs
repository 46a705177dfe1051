/*!
*   Log entry parameters and the protocol state machine over them
*
*   Each entry carries a parameter *delta*; the state in force at any version
*   is the fold of all deltas up to it. Every optional field follows
*   tri-state semantics:
*
*   - absent  = inherit the previous value
*   - empty   = clear the previous value
*   - value   = replace the previous value
*/

use crate::{METHOD, WebVhError, canonical, witness::Witnesses};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Parameters of a webvh log entry.
///
/// Serialized as the delta carried on the wire; the fields marked
/// `#[serde(skip)]` are populated by [`Parameters::validate`] and describe
/// the effective state after the entry is applied.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameters {
    /// Protocol identifier; required in the genesis entry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Self-certifying identifier (placeholder in the pre-hash genesis entry)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scid: Option<Arc<String>>,

    /// Multikeys authorized to sign the next log entry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_keys: Option<Arc<Vec<String>>>,

    /// Pre-rotation commitments: hashes of the keys that may become
    /// `updateKeys` in the next rotation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_key_hashes: Option<Arc<Vec<String>>>,

    /// May the DID migrate its web host? Immutable host when false
    #[serde(skip_serializing_if = "Option::is_none")]
    pub portable: Option<bool>,

    /// Witness configuration. The legacy flat `witnesses` key is accepted on
    /// read; only the object form is ever written.
    #[serde(skip_serializing_if = "Option::is_none", alias = "witnesses")]
    pub witness: Option<Arc<Witnesses>>,

    /// Advisory watcher URIs, not validated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watchers: Option<Arc<Vec<String>>>,

    /// Once true, no further entries are admissible
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deactivated: Option<bool>,

    /// Derived: is a pre-rotation commitment in force after this entry?
    #[serde(skip)]
    pub pre_rotation_active: bool,

    /// Derived: keys authorized to sign the *next* entry
    #[serde(skip)]
    pub active_update_keys: Arc<Vec<String>>,
}

impl Parameters {
    /// Fold this delta onto the previous effective state, checking every
    /// parameter-level invariant. Returns the new effective state.
    pub fn validate(&self, previous: Option<&Parameters>) -> Result<Parameters, WebVhError> {
        debug!("validating parameters, genesis: {}", previous.is_none());

        let Some(previous) = previous else {
            return self.validate_genesis();
        };

        if previous.deactivated == Some(true) {
            return Err(WebVhError::PolicyViolation(
                "DID was deactivated by the previous log entry, no more entries are allowed"
                    .to_string(),
            ));
        }

        let mut effective = Parameters::default();

        // method is sticky and single-valued in this protocol version
        if let Some(method) = &self.method
            && method != METHOD
        {
            return Err(WebVhError::InputShape(format!(
                "Unsupported method identifier ({method}), expected {METHOD}"
            )));
        }
        effective.method = previous.method.clone();

        // The SCID is fixed at genesis
        match &self.scid {
            None => effective.scid = previous.scid.clone(),
            Some(scid) => {
                if previous.scid.as_deref() != Some(scid.as_ref()) {
                    return Err(WebVhError::ChainIntegrity(format!(
                        "SCID ({scid}) does not match the SCID established at genesis"
                    )));
                }
                effective.scid = Some(scid.clone());
            }
        }

        // Pre-rotation commitment: inherit, clear, or replace
        match &self.next_key_hashes {
            None => {
                effective.next_key_hashes = previous.next_key_hashes.clone();
                effective.pre_rotation_active = previous.pre_rotation_active;
            }
            Some(hashes) if hashes.is_empty() => {
                effective.next_key_hashes = None;
                effective.pre_rotation_active = false;
            }
            Some(hashes) => {
                effective.next_key_hashes = Some(hashes.clone());
                effective.pre_rotation_active = true;
            }
        }

        // updateKeys take effect for the NEXT entry; when a commitment was in
        // force, the new keys must be preimages of the committed hashes
        match &self.update_keys {
            None => {
                effective.active_update_keys = previous.active_update_keys.clone();
            }
            Some(keys) if keys.is_empty() => {
                // Only sensible while deactivating; authority is unchanged
                // for whatever entry could still follow
                effective.update_keys = Some(keys.clone());
                effective.active_update_keys = previous.active_update_keys.clone();
            }
            Some(keys) => {
                if previous.pre_rotation_active {
                    Self::check_pre_rotation_keys(previous.next_key_hashes.as_deref(), keys)?;
                }
                effective.update_keys = Some(keys.clone());
                effective.active_update_keys = keys.clone();
            }
        }

        // Portability can be dropped but never regained
        match self.portable {
            None => effective.portable = previous.portable,
            Some(false) => effective.portable = Some(false),
            Some(true) => {
                if previous.portable != Some(true) {
                    return Err(WebVhError::PolicyViolation(
                        "Portable cannot be enabled after the first log entry".to_string(),
                    ));
                }
                effective.portable = Some(true);
            }
        }

        // Witness configuration
        match &self.witness {
            None => effective.witness = previous.witness.clone(),
            Some(witnesses) if witnesses.is_empty() => effective.witness = None,
            Some(witnesses) => {
                witnesses.validate()?;
                effective.witness = Some(witnesses.clone());
            }
        }

        // Watchers
        match &self.watchers {
            None => effective.watchers = previous.watchers.clone(),
            Some(watchers) if watchers.is_empty() => effective.watchers = None,
            Some(watchers) => effective.watchers = Some(watchers.clone()),
        }

        // Deactivation
        if self.deactivated == Some(true) {
            if let Some(keys) = &self.update_keys
                && !keys.is_empty()
            {
                return Err(WebVhError::InputShape(
                    "Deactivation requires updateKeys to be cleared".to_string(),
                ));
            }
            effective.deactivated = Some(true);
        } else {
            effective.deactivated = previous.deactivated;
        }

        debug!("parameters validated; effective: {effective:?}");
        Ok(effective)
    }

    fn validate_genesis(&self) -> Result<Parameters, WebVhError> {
        let mut effective = Parameters::default();

        match &self.method {
            Some(method) if method == METHOD => {
                effective.method = Some(method.clone());
            }
            Some(method) => {
                return Err(WebVhError::InputShape(format!(
                    "Unsupported method identifier ({method}), expected {METHOD}"
                )));
            }
            None => {
                return Err(WebVhError::InputShape(
                    "method must be provided in the first log entry".to_string(),
                ));
            }
        }

        let Some(scid) = &self.scid else {
            return Err(WebVhError::InputShape(
                "scid must be provided in the first log entry".to_string(),
            ));
        };
        effective.scid = Some(scid.clone());

        match &self.update_keys {
            Some(keys) if !keys.is_empty() => {
                effective.update_keys = Some(keys.clone());
                effective.active_update_keys = keys.clone();
            }
            _ => {
                return Err(WebVhError::InputShape(
                    "updateKeys must be provided in the first log entry".to_string(),
                ));
            }
        }

        match &self.next_key_hashes {
            Some(hashes) if !hashes.is_empty() => {
                effective.next_key_hashes = Some(hashes.clone());
                effective.pre_rotation_active = true;
            }
            _ => {}
        }

        effective.portable = Some(self.portable.unwrap_or(false));

        match &self.witness {
            Some(witnesses) if !witnesses.is_empty() => {
                witnesses.validate()?;
                effective.witness = Some(witnesses.clone());
            }
            _ => {}
        }

        if let Some(watchers) = &self.watchers
            && !watchers.is_empty()
        {
            effective.watchers = Some(watchers.clone());
        }

        if self.deactivated == Some(true) {
            return Err(WebVhError::PolicyViolation(
                "DID cannot be deactivated in the first log entry".to_string(),
            ));
        }

        Ok(effective)
    }

    /// When a pre-rotation commitment is in force, every new update key must
    /// hash to one of the committed values.
    fn check_pre_rotation_keys(
        next_key_hashes: Option<&Vec<String>>,
        update_keys: &Arc<Vec<String>>,
    ) -> Result<(), WebVhError> {
        let Some(next_key_hashes) = next_key_hashes else {
            return Err(WebVhError::Authorization(
                "nextKeyHashes must be defined while pre-rotation is active".to_string(),
            ));
        };
        for key in update_keys.iter() {
            let check_hash = canonical::hash_string(key)?;
            if !next_key_hashes.contains(&check_hash) {
                return Err(WebVhError::Authorization(format!(
                    "updateKey ({key}) hash ({check_hash}) was not committed in the previous nextKeyHashes"
                )));
            }
        }
        Ok(())
    }

    /// Compute the minimal delta that takes `previous` (an effective state)
    /// to the state described by `self`. Absent fields inherit.
    pub fn diff(&self, previous: &Parameters) -> Result<Parameters, WebVhError> {
        let mut delta = Parameters::default();

        if self.portable != previous.portable {
            if self.portable == Some(true) {
                return Err(WebVhError::PolicyViolation(
                    "Portable cannot be enabled after the first log entry".to_string(),
                ));
            }
            delta.portable = self.portable;
        }

        delta.update_keys =
            Self::diff_tri_state(&previous.active_update_keys_option(), &self.update_keys);
        delta.next_key_hashes =
            Self::diff_tri_state(&previous.next_key_hashes, &self.next_key_hashes);
        delta.watchers = Self::diff_tri_state(&previous.watchers, &self.watchers);

        delta.witness = match &self.witness {
            None => None,
            Some(witnesses) if witnesses.is_empty() => {
                if previous.witness.is_none() {
                    None
                } else {
                    Some(Arc::new(Witnesses::Empty {}))
                }
            }
            Some(witnesses) => {
                witnesses.validate()?;
                if previous.witness.as_deref() == Some(witnesses.as_ref()) {
                    None
                } else {
                    Some(witnesses.clone())
                }
            }
        };

        if self.deactivated == Some(true) && previous.deactivated != Some(true) {
            delta.deactivated = Some(true);
            delta.update_keys = Some(Arc::new(Vec::new()));
        }

        Ok(delta)
    }

    fn active_update_keys_option(&self) -> Option<Arc<Vec<String>>> {
        if self.active_update_keys.is_empty() {
            None
        } else {
            Some(self.active_update_keys.clone())
        }
    }

    // None = inherit, Some(empty) = clear, Some(values) = replace
    fn diff_tri_state(
        previous: &Option<Arc<Vec<String>>>,
        current: &Option<Arc<Vec<String>>>,
    ) -> Option<Arc<Vec<String>>> {
        let current_value = current.as_ref()?;

        if current_value.is_empty() {
            if previous.as_ref().is_none_or(|p| p.is_empty()) {
                // already clear, no change to record
                None
            } else {
                Some(Arc::new(Vec::new()))
            }
        } else if previous.as_ref() == Some(current_value) {
            None
        } else {
            Some(current_value.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::witness::Witness;

    fn genesis_params() -> Parameters {
        Parameters {
            method: Some(METHOD.to_string()),
            scid: Some(Arc::new("zQmScid".to_string())),
            update_keys: Some(Arc::new(vec!["z6Mk1".to_string()])),
            ..Default::default()
        }
    }

    #[test]
    fn genesis_requires_method() {
        let params = Parameters {
            method: None,
            ..genesis_params()
        };
        assert!(matches!(
            params.validate(None),
            Err(WebVhError::InputShape(_))
        ));
    }

    #[test]
    fn genesis_requires_scid() {
        let params = Parameters {
            scid: None,
            ..genesis_params()
        };
        assert!(params.validate(None).is_err());
    }

    #[test]
    fn genesis_requires_update_keys() {
        let params = Parameters {
            update_keys: None,
            ..genesis_params()
        };
        assert!(params.validate(None).is_err());

        let params = Parameters {
            update_keys: Some(Arc::new(Vec::new())),
            ..genesis_params()
        };
        assert!(params.validate(None).is_err());
    }

    #[test]
    fn genesis_defaults_portable_false() {
        let effective = genesis_params().validate(None).unwrap();
        assert_eq!(effective.portable, Some(false));
    }

    #[test]
    fn genesis_cannot_deactivate() {
        let params = Parameters {
            deactivated: Some(true),
            ..genesis_params()
        };
        assert!(matches!(
            params.validate(None),
            Err(WebVhError::PolicyViolation(_))
        ));
    }

    #[test]
    fn genesis_next_key_hashes_enables_prerotation() {
        let params = Parameters {
            next_key_hashes: Some(Arc::new(vec!["zQmHash".to_string()])),
            ..genesis_params()
        };
        let effective = params.validate(None).unwrap();
        assert!(effective.pre_rotation_active);
    }

    #[test]
    fn absent_fields_inherit() {
        let previous = genesis_params().validate(None).unwrap();
        let effective = Parameters::default().validate(Some(&previous)).unwrap();
        assert_eq!(effective.scid, previous.scid);
        assert_eq!(effective.active_update_keys, previous.active_update_keys);
        assert_eq!(effective.portable, Some(false));
    }

    #[test]
    fn update_keys_rotate() {
        let previous = genesis_params().validate(None).unwrap();
        let delta = Parameters {
            update_keys: Some(Arc::new(vec!["z6Mk2".to_string()])),
            ..Default::default()
        };
        let effective = delta.validate(Some(&previous)).unwrap();
        assert_eq!(effective.active_update_keys.as_slice(), ["z6Mk2"]);
    }

    #[test]
    fn scid_cannot_change() {
        let previous = genesis_params().validate(None).unwrap();
        let delta = Parameters {
            scid: Some(Arc::new("zQmOther".to_string())),
            ..Default::default()
        };
        assert!(matches!(
            delta.validate(Some(&previous)),
            Err(WebVhError::ChainIntegrity(_))
        ));
    }

    #[test]
    fn portable_cannot_be_enabled_later() {
        let previous = genesis_params().validate(None).unwrap();
        let delta = Parameters {
            portable: Some(true),
            ..Default::default()
        };
        assert!(matches!(
            delta.validate(Some(&previous)),
            Err(WebVhError::PolicyViolation(_))
        ));
    }

    #[test]
    fn no_entries_after_deactivation() {
        let mut previous = genesis_params().validate(None).unwrap();
        previous.deactivated = Some(true);
        assert!(matches!(
            Parameters::default().validate(Some(&previous)),
            Err(WebVhError::PolicyViolation(_))
        ));
    }

    #[test]
    fn deactivation_requires_cleared_update_keys() {
        let previous = genesis_params().validate(None).unwrap();
        let delta = Parameters {
            deactivated: Some(true),
            update_keys: Some(Arc::new(vec!["z6Mk2".to_string()])),
            ..Default::default()
        };
        assert!(delta.validate(Some(&previous)).is_err());

        let delta = Parameters {
            deactivated: Some(true),
            update_keys: Some(Arc::new(Vec::new())),
            ..Default::default()
        };
        let effective = delta.validate(Some(&previous)).unwrap();
        assert_eq!(effective.deactivated, Some(true));
    }

    #[test]
    fn pre_rotation_enforced_on_rotation() {
        let key = "z6Mk2".to_string();
        let committed = canonical::hash_string(&key).unwrap();

        let genesis = Parameters {
            next_key_hashes: Some(Arc::new(vec![committed])),
            ..genesis_params()
        };
        let previous = genesis.validate(None).unwrap();

        // rotation to the committed key succeeds
        let delta = Parameters {
            update_keys: Some(Arc::new(vec![key])),
            next_key_hashes: Some(Arc::new(Vec::new())),
            ..Default::default()
        };
        assert!(delta.validate(Some(&previous)).is_ok());

        // rotation to an uncommitted key fails
        let delta = Parameters {
            update_keys: Some(Arc::new(vec!["z6Mk3".to_string()])),
            ..Default::default()
        };
        assert!(matches!(
            delta.validate(Some(&previous)),
            Err(WebVhError::Authorization(_))
        ));
    }

    #[test]
    fn witness_shape_validated() {
        let params = Parameters {
            witness: Some(Arc::new(Witnesses::Value {
                threshold: 5,
                witnesses: vec![Witness {
                    id: "did:key:z6MkW".to_string(),
                    weight: None,
                }],
            })),
            ..genesis_params()
        };
        assert!(params.validate(None).is_err());
    }

    #[test]
    fn legacy_witnesses_alias_deserializes() {
        let json = r#"{"witnesses": [{"id": "did:key:z6MkW"}]}"#;
        let params: Parameters = serde_json::from_str(json).unwrap();
        let witness = params.witness.expect("legacy alias should map to witness");
        assert_eq!(witness.threshold(), Some(1));
    }

    #[test]
    fn delta_serializes_sparsely() {
        let delta = Parameters {
            update_keys: Some(Arc::new(vec!["z6Mk2".to_string()])),
            ..Default::default()
        };
        let json = serde_json::to_value(&delta).unwrap();
        assert_eq!(json.as_object().unwrap().len(), 1);
        assert!(json.get("updateKeys").is_some());
    }

    #[test]
    fn diff_emits_only_changes() {
        let previous = genesis_params().validate(None).unwrap();

        let same = Parameters {
            update_keys: Some(Arc::new(vec!["z6Mk1".to_string()])),
            ..Default::default()
        };
        let delta = same.diff(&previous).unwrap();
        assert_eq!(serde_json::to_string(&delta).unwrap(), "{}");

        let rotated = Parameters {
            update_keys: Some(Arc::new(vec!["z6Mk2".to_string()])),
            ..Default::default()
        };
        let delta = rotated.diff(&previous).unwrap();
        assert_eq!(
            delta.update_keys.as_deref().map(Vec::as_slice),
            Some(&["z6Mk2".to_string()][..])
        );
    }

    #[test]
    fn diff_deactivation_clears_keys() {
        let previous = genesis_params().validate(None).unwrap();
        let desired = Parameters {
            deactivated: Some(true),
            ..Default::default()
        };
        let delta = desired.diff(&previous).unwrap();
        assert_eq!(delta.deactivated, Some(true));
        assert!(delta.update_keys.as_deref().is_some_and(Vec::is_empty));
    }
}
