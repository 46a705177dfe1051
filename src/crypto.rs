/*!
*   Default Ed25519 collaborators and multikey helpers
*
*   The core treats signing and verification as external effects; these
*   implementations cover the common case where keys are plain Ed25519
*   multikeys held in memory. Callers with HSMs or remote signers implement
*   [`ProofSigner`]/[`ProofVerifier`] themselves.
*/

use crate::{
    WebVhError, canonical,
    proof::{ProofSigner, ProofVerifier, SigningInput, SigningOutput},
};
use async_trait::async_trait;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};

// Multicodec varint prefix for ed25519-pub
const ED25519_PUB: [u8; 2] = [0xed, 0x01];

/// Encode raw Ed25519 public key bytes as a multibase base58-btc multikey
/// (`z6Mk…`).
pub fn encode_multikey(public_key: &[u8; 32]) -> String {
    let mut bytes = Vec::with_capacity(34);
    bytes.extend_from_slice(&ED25519_PUB);
    bytes.extend_from_slice(public_key);
    multibase::encode(multibase::Base::Base58Btc, bytes)
}

/// Decode a multikey string back to raw Ed25519 public key bytes.
pub fn decode_multikey(key: &str) -> Result<Vec<u8>, WebVhError> {
    let (_, bytes) = multibase::decode(key)
        .map_err(|e| WebVhError::InputShape(format!("Invalid multikey ({key}): {e}")))?;
    let Some(raw) = bytes.strip_prefix(&ED25519_PUB) else {
        return Err(WebVhError::InputShape(format!(
            "Multikey ({key}) does not carry the ed25519-pub multicodec prefix"
        )));
    };
    Ok(raw.to_vec())
}

/// Hash a multikey string for use in a `nextKeyHashes` pre-rotation
/// commitment.
pub fn multikey_hash(key: &str) -> Result<String, WebVhError> {
    canonical::hash_string(key)
}

/// In-memory Ed25519 signer implementing the eddsa-jcs-2022 transform.
pub struct Ed25519Signer {
    signing_key: SigningKey,
    verification_method: String,
}

impl Ed25519Signer {
    /// Deterministic construction from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let multikey = encode_multikey(signing_key.verifying_key().as_bytes());
        Ed25519Signer {
            signing_key,
            verification_method: format!("did:key:{multikey}#{multikey}"),
        }
    }

    /// The signer's public key as a multikey string, as listed in
    /// `updateKeys`.
    pub fn public_multikey(&self) -> String {
        encode_multikey(self.signing_key.verifying_key().as_bytes())
    }

    /// Pre-rotation commitment hash for this signer's public key.
    pub fn public_multikey_hash(&self) -> Result<String, WebVhError> {
        multikey_hash(&self.public_multikey())
    }
}

#[async_trait]
impl ProofSigner for Ed25519Signer {
    async fn sign(&self, input: &SigningInput) -> Result<SigningOutput, WebVhError> {
        let message = input.to_signing_bytes()?;
        let signature = self.signing_key.sign(&message);
        Ok(SigningOutput {
            proof_value: multibase::encode(multibase::Base::Base58Btc, signature.to_bytes()),
        })
    }

    fn verification_method(&self) -> String {
        self.verification_method.clone()
    }
}

/// Stateless Ed25519 verifier over raw key, message and signature bytes.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ed25519Verifier;

#[async_trait]
impl ProofVerifier for Ed25519Verifier {
    async fn verify(
        &self,
        signature: &[u8],
        message: &[u8],
        public_key: &[u8],
    ) -> Result<bool, WebVhError> {
        let verifying_key = VerifyingKey::try_from(public_key)
            .map_err(|_| WebVhError::External("Invalid public key bytes".to_string()))?;
        let signature = Signature::from_slice(signature)
            .map_err(|_| WebVhError::External("Invalid signature format".to_string()))?;
        Ok(verifying_key.verify_strict(message, &signature).is_ok())
    }
}
