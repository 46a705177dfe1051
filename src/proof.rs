/*!
*   W3C Data Integrity proofs over canonicalized log entries
*
*   The only supported cryptosuite is `eddsa-jcs-2022`: the signed message is
*   SHA-256(JCS(proof options)) || SHA-256(JCS(document)), where the document
*   is the entry without its `proof` member and the options are the proof
*   without its `proofValue`.
*
*   Raw signing and verification are delegated to the caller through
*   [`ProofSigner`] and [`ProofVerifier`]; this module owns the transform,
*   the hashing and the multibase plumbing around them.
*/

use crate::{WebVhError, canonical, crypto};
use ahash::HashMap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Recognized Data Integrity cryptosuites.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub enum CryptoSuite {
    /// <https://www.w3.org/TR/vc-di-eddsa/>
    #[serde(rename = "eddsa-jcs-2022")]
    EddsaJcs2022,
}

/// A detached Data Integrity proof attached to a log entry or witness file.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataIntegrityProof {
    /// Must be `DataIntegrityProof`
    #[serde(rename = "type")]
    pub proof_type: String,

    pub cryptosuite: CryptoSuite,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,

    /// `did:key:<multikey>#<multikey>` reference to the signing key
    pub verification_method: String,

    pub proof_purpose: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof_value: Option<String>,
}

/// What an external signer receives: the document to be signed and the proof
/// options (without `proofValue`). [`SigningInput::to_signing_bytes`] yields
/// the exact bytes the eddsa-jcs-2022 transform expects a signature over.
#[derive(Clone, Debug, Serialize)]
pub struct SigningInput {
    pub document: Value,
    pub proof: Value,
}

/// What an external signer returns: the multibase-encoded signature.
#[derive(Clone, Debug, Deserialize)]
pub struct SigningOutput {
    pub proof_value: String,
}

impl SigningInput {
    /// SHA-256(JCS(proof options)) || SHA-256(JCS(document))
    pub fn to_signing_bytes(&self) -> Result<Vec<u8>, WebVhError> {
        let doc_jcs = canonical::canonicalize(&self.document)?;
        let proof_jcs = canonical::canonicalize(&self.proof)?;
        debug!("signing document JCS: {}", doc_jcs);
        Ok(hashing_eddsa_jcs(&doc_jcs, &proof_jcs))
    }
}

fn hashing_eddsa_jcs(transformed_document: &str, canonical_proof_config: &str) -> Vec<u8> {
    [
        Sha256::digest(canonical_proof_config),
        Sha256::digest(transformed_document),
    ]
    .concat()
}

/// External signer for log entries and witness proofs.
#[async_trait]
pub trait ProofSigner: Send + Sync {
    /// Produce a multibase-encoded signature over the signing input.
    async fn sign(&self, input: &SigningInput) -> Result<SigningOutput, WebVhError>;

    /// Verification method the produced proofs reference
    /// (`did:key:<multikey>#<multikey>`).
    fn verification_method(&self) -> String;
}

/// External signature verifier: `verify(signature, message, publicKey)`.
#[async_trait]
pub trait ProofVerifier: Send + Sync {
    async fn verify(
        &self,
        signature: &[u8],
        message: &[u8],
        public_key: &[u8],
    ) -> Result<bool, WebVhError>;
}

/// Build and sign a proof over `document` (an entry without its `proof`).
pub async fn sign_document(
    document: &Value,
    signer: &dyn ProofSigner,
    created: Option<String>,
) -> Result<DataIntegrityProof, WebVhError> {
    let mut options = DataIntegrityProof {
        proof_type: "DataIntegrityProof".to_string(),
        cryptosuite: CryptoSuite::EddsaJcs2022,
        created: created
            .or_else(|| Some(Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true))),
        verification_method: signer.verification_method(),
        proof_purpose: "assertionMethod".to_string(),
        proof_value: None,
    };

    let input = SigningInput {
        document: document.clone(),
        proof: serde_json::to_value(&options).map_err(|e| {
            WebVhError::InputShape(format!("Couldn't serialize proof options. Reason: {e}"))
        })?,
    };

    let output = signer.sign(&input).await?;
    options.proof_value = Some(output.proof_value);
    Ok(options)
}

/// Verify a proof over `document`. `known_keys` maps verification method ids
/// to multikey strings for callers that dereference keys themselves; inline
/// `did:key` methods need no map.
///
/// Returns `Ok(false)` when the signature does not verify; `Err` when the
/// proof is malformed or the external verifier failed.
pub async fn verify_proof(
    document: &Value,
    proof: &DataIntegrityProof,
    verifier: &dyn ProofVerifier,
    known_keys: Option<&HashMap<String, String>>,
) -> Result<bool, WebVhError> {
    if proof.proof_type != "DataIntegrityProof" {
        return Err(WebVhError::InputShape(format!(
            "Invalid proof type ({}), expected DataIntegrityProof",
            proof.proof_type
        )));
    }
    if proof.cryptosuite != CryptoSuite::EddsaJcs2022 {
        return Err(WebVhError::InputShape(
            "Unsupported cryptosuite, expected eddsa-jcs-2022".to_string(),
        ));
    }
    if let Some(created) = &proof.created {
        let created = created.parse::<DateTime<Utc>>().map_err(|e| {
            WebVhError::InputShape(format!("Invalid proof created date: {e}"))
        })?;
        if created > Utc::now() {
            return Err(WebVhError::InputShape(
                "Proof created date is in the future".to_string(),
            ));
        }
    }

    let Some(proof_value) = &proof.proof_value else {
        return Err(WebVhError::InputShape(
            "proofValue is missing in the proof".to_string(),
        ));
    };
    let signature = decode_multibase(proof_value)?;

    let mut options = proof.clone();
    options.proof_value = None;

    let input = SigningInput {
        document: document.clone(),
        proof: serde_json::to_value(&options).map_err(|e| {
            WebVhError::InputShape(format!("Couldn't serialize proof options. Reason: {e}"))
        })?,
    };
    let message = input.to_signing_bytes()?;

    let public_key = resolve_public_key(&proof.verification_method, known_keys)?;

    verifier
        .verify(&signature, &message, &public_key)
        .await
}

/// Decode a multibase value. Base58-btc (`z`) and base64url (`u`) are the
/// encodings tolerated on the wire.
pub fn decode_multibase(value: &str) -> Result<Vec<u8>, WebVhError> {
    let (base, bytes) = multibase::decode(value)
        .map_err(|e| WebVhError::InputShape(format!("Invalid multibase value: {e}")))?;
    match base {
        multibase::Base::Base58Btc | multibase::Base::Base64Url => Ok(bytes),
        _ => Err(WebVhError::InputShape(format!(
            "Unsupported multibase encoding ({})",
            value.chars().next().unwrap_or('?')
        ))),
    }
}

/// Extract the multikey fragment from a `did:key:<mk>#<mk>` style reference.
pub fn verification_method_key(verification_method: &str) -> Option<&str> {
    verification_method.split_once('#').map(|(_, key)| key)
}

/// Resolve a verification method to the multikey encoding of its public key:
/// first through the caller-supplied key set, otherwise from an inline
/// `did:key` reference. Authorization decisions compare this encoding, not
/// the method id's spelling.
pub fn resolve_multikey(
    verification_method: &str,
    known_keys: Option<&HashMap<String, String>>,
) -> Result<String, WebVhError> {
    if let Some(keys) = known_keys
        && let Some(multikey) = keys.get(verification_method)
    {
        return Ok(multikey.clone());
    }

    if !verification_method.starts_with("did:key:") {
        return Err(WebVhError::InputShape(format!(
            "Verification method ({verification_method}) is not did:key and no key set was provided"
        )));
    }
    let Some(key) = verification_method_key(verification_method) else {
        return Err(WebVhError::InputShape(format!(
            "Invalid verification method format ({verification_method})"
        )));
    };
    Ok(key.to_string())
}

/// Recover raw public key bytes for a verification method.
fn resolve_public_key(
    verification_method: &str,
    known_keys: Option<&HashMap<String, String>>,
) -> Result<Vec<u8>, WebVhError> {
    crypto::decode_multikey(&resolve_multikey(verification_method, known_keys)?)
}
