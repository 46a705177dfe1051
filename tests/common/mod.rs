use didwebvh_core::prelude::*;
use serde_json::{Value, json};
use std::sync::Arc;

/// Deterministic signer for a test seed.
#[allow(dead_code)]
pub fn signer(seed: u8) -> Ed25519Signer {
    Ed25519Signer::from_seed(&[seed; 32])
}

/// Minimal DID Document template; `{SCID}` is substituted during creation.
#[allow(dead_code)]
pub fn did_document(key: &Ed25519Signer) -> Value {
    let pk = key.public_multikey();
    json!({
        "@context": ["https://www.w3.org/ns/did/v1"],
        "id": "did:webvh:{SCID}:example.com",
        "verificationMethod": [{
            "id": "did:webvh:{SCID}:example.com#key-0",
            "type": "Multikey",
            "controller": "did:webvh:{SCID}:example.com",
            "publicKeyMultibase": pk
        }],
        "authentication": ["did:webvh:{SCID}:example.com#key-0"],
        "assertionMethod": ["did:webvh:{SCID}:example.com#key-0"]
    })
}

/// Genesis parameters authorizing the given signer.
#[allow(dead_code)]
pub fn genesis_params(key: &Ed25519Signer) -> Parameters {
    Parameters {
        update_keys: Some(Arc::new(vec![key.public_multikey()])),
        ..Default::default()
    }
}

/// Create a fresh single-entry DID controlled by `key`.
#[allow(dead_code)]
pub async fn create(key: &Ed25519Signer) -> DidOutcome {
    create_did(CreateDidInput {
        document: did_document(key),
        parameters: genesis_params(key),
        signer: key,
        version_time: None,
    })
    .await
    .expect("Failed to create DID")
}
