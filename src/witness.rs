/*!
*   Witness configuration and quorum enforcement
*
*   A DID may declare a set of witnesses whose co-signatures over the tip of
*   the log must meet a weighted threshold before resolution succeeds. The
*   proofs live in a separate `did-witness.json` file, each record binding a
*   `versionId` to an array of Data Integrity proofs.
*/

use crate::{
    WebVhError,
    proof::{self, DataIntegrityProof, ProofVerifier},
};
use ahash::HashSet;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt::Display;
use tracing::{debug, warn};

/// Witness parameter value.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Witnesses {
    Value {
        threshold: u32,
        witnesses: Vec<Witness>,
    },
    /// Legacy flat list carrying no threshold; read as requiring every
    /// listed witness. Accepted on input only, never emitted by this crate.
    Legacy(Vec<Witness>),
    // WARN: must stay last, untagged matching would otherwise swallow
    // everything
    Empty {},
}

impl Witnesses {
    pub fn is_empty(&self) -> bool {
        match self {
            Witnesses::Empty {} => true,
            Witnesses::Value { witnesses, .. } | Witnesses::Legacy(witnesses) => {
                witnesses.is_empty()
            }
        }
    }

    pub fn witnesses(&self) -> Option<&[Witness]> {
        match self {
            Witnesses::Empty {} => None,
            Witnesses::Value { witnesses, .. } | Witnesses::Legacy(witnesses) => {
                Some(witnesses)
            }
        }
    }

    pub fn threshold(&self) -> Option<u32> {
        match self {
            Witnesses::Empty {} => None,
            Witnesses::Value { threshold, .. } => Some(*threshold),
            Witnesses::Legacy(witnesses) => u32::try_from(witnesses.len()).ok(),
        }
    }

    /// Total voting weight of the configured witnesses.
    pub fn total_weight(&self) -> u32 {
        self.witnesses()
            .map(|w| w.iter().map(Witness::effective_weight).sum())
            .unwrap_or(0)
    }

    /// Checks the witness parameter shape: positive threshold no larger than
    /// the total weight, well-formed DID ids, no duplicates.
    pub fn validate(&self) -> Result<(), WebVhError> {
        if self.is_empty() {
            return Err(WebVhError::InputShape(
                "Witnesses are enabled, but no witness nodes are specified".to_string(),
            ));
        }

        let Some(threshold) = self.threshold() else {
            return Err(WebVhError::InputShape(
                "Witness threshold is not defined".to_string(),
            ));
        };
        if threshold < 1 {
            return Err(WebVhError::InputShape(
                "Witness threshold must be 1 or more".to_string(),
            ));
        }
        if threshold > self.total_weight() {
            return Err(WebVhError::InputShape(format!(
                "Witness threshold ({threshold}) exceeds the total witness weight ({})",
                self.total_weight()
            )));
        }

        let mut seen = HashSet::default();
        for witness in self.witnesses().unwrap_or_default() {
            if !is_well_formed_did(&witness.id) {
                return Err(WebVhError::InputShape(format!(
                    "Witness id ({}) is not a well-formed DID",
                    witness.id
                )));
            }
            if !seen.insert(witness.id.as_str()) {
                return Err(WebVhError::InputShape(format!(
                    "Duplicate witness id ({})",
                    witness.id
                )));
            }
        }
        Ok(())
    }
}

fn is_well_formed_did(id: &str) -> bool {
    id.strip_prefix("did:")
        .and_then(|rest| rest.split_once(':'))
        .is_some_and(|(method, specific)| !method.is_empty() && !specific.is_empty())
}

/// Single witness node: a DID plus an optional voting weight (default 1).
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Witness {
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
}

impl Witness {
    pub fn effective_weight(&self) -> u32 {
        self.weight.unwrap_or(1)
    }
}

impl Display for Witness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// One record of the `did-witness.json` proof file.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WitnessProofEntry {
    /// versionId of the log entry these proofs witness
    pub version_id: String,
    pub proof: Vec<DataIntegrityProof>,
}

/// Parse a witness proof file (a JSON array of proof records).
pub fn parse_witness_proofs(text: &str) -> Result<Vec<WitnessProofEntry>, WebVhError> {
    serde_json::from_str(text).map_err(|e| {
        WebVhError::InputShape(format!("Couldn't deserialize witness proofs. Reason: {e}"))
    })
}

/// Enforce the witness quorum at the tip of a resolution.
///
/// Proof records whose `versionId` does not match the tip are ignored; each
/// matching proof is verified over `{"versionId": <tip>}` under the declared
/// witness's key, and the weights of verified, distinct witnesses must meet
/// the threshold. A threshold of 0 or an empty witness set is a no-op.
pub async fn enforce_quorum(
    tip_version_id: &str,
    config: &Witnesses,
    proofs: &[WitnessProofEntry],
    verifier: &dyn ProofVerifier,
) -> Result<(), WebVhError> {
    let Some(witnesses) = config.witnesses() else {
        return Ok(());
    };
    let threshold = config.threshold().unwrap_or(0);
    if threshold == 0 {
        return Ok(());
    }

    let witness_document = json!({ "versionId": tip_version_id });
    let mut verified: HashSet<&str> = HashSet::default();

    for record in proofs.iter().filter(|p| p.version_id == tip_version_id) {
        for item in &record.proof {
            let Some((witness_did, _)) = item.verification_method.split_once('#') else {
                warn!(
                    "Witness proof has malformed verification method ({})",
                    item.verification_method
                );
                continue;
            };
            let Some(witness) = witnesses.iter().find(|w| w.id == witness_did) else {
                debug!("Witness proof from undeclared witness ({witness_did}), skipping");
                continue;
            };
            if verified.contains(witness.id.as_str()) {
                continue;
            }
            match proof::verify_proof(&witness_document, item, verifier, None).await {
                Ok(true) => {
                    debug!("Witness proof from {} verified ok", witness.id);
                    verified.insert(witness.id.as_str());
                }
                Ok(false) => {
                    warn!("Witness proof from {} failed verification", witness.id);
                }
                Err(e) => {
                    warn!("Witness proof from {} rejected: {e}", witness.id);
                }
            }
        }
    }

    let verified_weight: u32 = witnesses
        .iter()
        .filter(|w| verified.contains(w.id.as_str()))
        .map(Witness::effective_weight)
        .sum();

    if verified_weight < threshold {
        return Err(WebVhError::WitnessQuorum(format!(
            "Witness threshold ({threshold}) was not met at versionId ({tip_version_id}): verified weight is ({verified_weight})"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn witness(id: &str) -> Witness {
        Witness {
            id: id.to_string(),
            weight: None,
        }
    }

    #[test]
    fn empty_witness_object() {
        let w: Witnesses = serde_json::from_str("{}").unwrap();
        assert!(w.is_empty());
        assert!(w.validate().is_err());
    }

    #[test]
    fn value_form_roundtrips() {
        let w = Witnesses::Value {
            threshold: 2,
            witnesses: vec![witness("did:key:z6Mk1"), witness("did:key:z6Mk2")],
        };
        let json = serde_json::to_string(&w).unwrap();
        let back: Witnesses = serde_json::from_str(&json).unwrap();
        assert_eq!(w, back);
    }

    #[test]
    fn legacy_flat_list_accepted() {
        let w: Witnesses =
            serde_json::from_str(r#"[{"id": "did:key:z6Mk1"}, {"id": "did:key:z6Mk2"}]"#)
                .unwrap();
        assert_eq!(w.threshold(), Some(2));
        assert!(w.validate().is_ok());
    }

    #[test]
    fn threshold_must_be_positive() {
        let w = Witnesses::Value {
            threshold: 0,
            witnesses: vec![witness("did:key:z6Mk1")],
        };
        assert!(w.validate().is_err());
    }

    #[test]
    fn threshold_bounded_by_total_weight() {
        let w = Witnesses::Value {
            threshold: 3,
            witnesses: vec![witness("did:key:z6Mk1"), witness("did:key:z6Mk2")],
        };
        assert!(w.validate().is_err());

        let weighted = Witnesses::Value {
            threshold: 3,
            witnesses: vec![
                Witness {
                    id: "did:key:z6Mk1".to_string(),
                    weight: Some(2),
                },
                witness("did:key:z6Mk2"),
            ],
        };
        assert!(weighted.validate().is_ok());
    }

    #[test]
    fn witness_ids_must_be_dids() {
        let w = Witnesses::Value {
            threshold: 1,
            witnesses: vec![witness("z6Mk1")],
        };
        assert!(w.validate().is_err());
    }

    #[test]
    fn duplicate_witnesses_rejected() {
        let w = Witnesses::Value {
            threshold: 1,
            witnesses: vec![witness("did:key:z6Mk1"), witness("did:key:z6Mk1")],
        };
        assert!(w.validate().is_err());
    }

    #[test]
    fn proof_file_parses() {
        let text = r#"[{"versionId": "1-zQmabc", "proof": []}]"#;
        let proofs = parse_witness_proofs(text).unwrap();
        assert_eq!(proofs.len(), 1);
        assert_eq!(proofs[0].version_id, "1-zQmabc");
    }
}
