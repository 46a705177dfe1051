//! Witness quorum enforcement at the tip of a resolution.

mod common;

use common::{did_document, signer};
use didwebvh_core::{
    prelude::*,
    proof::sign_document,
    witness::WitnessProofEntry,
};
use serde_json::json;
use std::sync::Arc;

fn witness_id(key: &Ed25519Signer) -> String {
    format!("did:key:{}", key.public_multikey())
}

async fn witness_proof(key: &Ed25519Signer, version_id: &str) -> WitnessProofEntry {
    let document = json!({ "versionId": version_id });
    let proof = sign_document(&document, key, None)
        .await
        .expect("Failed to sign witness proof");
    WitnessProofEntry {
        version_id: version_id.to_string(),
        proof: vec![proof],
    }
}

async fn create_witnessed(
    controller: &Ed25519Signer,
    witnesses: Vec<Witness>,
    threshold: u32,
) -> DidOutcome {
    create_did(CreateDidInput {
        document: did_document(controller),
        parameters: Parameters {
            update_keys: Some(Arc::new(vec![controller.public_multikey()])),
            witness: Some(Arc::new(Witnesses::Value {
                threshold,
                witnesses,
            })),
            ..Default::default()
        },
        signer: controller,
        version_time: None,
    })
    .await
    .expect("Failed to create witnessed DID")
}

#[tokio::test]
async fn quorum_met_with_two_of_three() {
    let controller = signer(40);
    let (w1, w2, w3) = (signer(41), signer(42), signer(43));

    let outcome = create_witnessed(
        &controller,
        vec![
            Witness { id: witness_id(&w1), weight: None },
            Witness { id: witness_id(&w2), weight: None },
            Witness { id: witness_id(&w3), weight: None },
        ],
        2,
    )
    .await;
    let tip = outcome.metadata.version_id.clone();

    let proofs = vec![
        witness_proof(&w1, &tip).await,
        witness_proof(&w2, &tip).await,
    ];

    let resolved = resolve_did_from_log(
        &outcome.log,
        &ResolutionOptions {
            witness_proofs: Some(proofs),
            ..Default::default()
        },
    )
    .await;
    assert!(resolved.is_ok());
}

#[tokio::test]
async fn quorum_not_met_with_one_of_three() {
    let controller = signer(44);
    let (w1, w2, w3) = (signer(45), signer(46), signer(47));

    let outcome = create_witnessed(
        &controller,
        vec![
            Witness { id: witness_id(&w1), weight: None },
            Witness { id: witness_id(&w2), weight: None },
            Witness { id: witness_id(&w3), weight: None },
        ],
        2,
    )
    .await;
    let tip = outcome.metadata.version_id.clone();

    let result = resolve_did_from_log(
        &outcome.log,
        &ResolutionOptions {
            witness_proofs: Some(vec![witness_proof(&w1, &tip).await]),
            ..Default::default()
        },
    )
    .await;
    assert!(matches!(result, Err(WebVhError::WitnessQuorum(_))));
}

#[tokio::test]
async fn missing_proofs_fail_when_witnessing_active() {
    let controller = signer(48);
    let w1 = signer(49);

    let outcome = create_witnessed(
        &controller,
        vec![Witness { id: witness_id(&w1), weight: None }],
        1,
    )
    .await;

    let result = resolve_did_from_log(&outcome.log, &ResolutionOptions::default()).await;
    assert!(matches!(result, Err(WebVhError::WitnessQuorum(_))));
}

#[tokio::test]
async fn weighted_witness_counts_for_its_weight() {
    let controller = signer(50);
    let (w1, w2) = (signer(51), signer(52));

    let outcome = create_witnessed(
        &controller,
        vec![
            Witness { id: witness_id(&w1), weight: Some(2) },
            Witness { id: witness_id(&w2), weight: None },
        ],
        2,
    )
    .await;
    let tip = outcome.metadata.version_id.clone();

    // the weight-2 witness alone satisfies the threshold
    let resolved = resolve_did_from_log(
        &outcome.log,
        &ResolutionOptions {
            witness_proofs: Some(vec![witness_proof(&w1, &tip).await]),
            ..Default::default()
        },
    )
    .await;
    assert!(resolved.is_ok());

    // the weight-1 witness alone does not
    let result = resolve_did_from_log(
        &outcome.log,
        &ResolutionOptions {
            witness_proofs: Some(vec![witness_proof(&w2, &tip).await]),
            ..Default::default()
        },
    )
    .await;
    assert!(matches!(result, Err(WebVhError::WitnessQuorum(_))));
}

#[tokio::test]
async fn stale_and_undeclared_proofs_ignored() {
    let controller = signer(53);
    let (w1, stranger) = (signer(54), signer(55));

    let outcome = create_witnessed(
        &controller,
        vec![Witness { id: witness_id(&w1), weight: None }],
        1,
    )
    .await;
    let tip = outcome.metadata.version_id.clone();

    // a proof for a different versionId does not count
    let stale = witness_proof(&w1, "0-zQmSomethingElse").await;
    let result = resolve_did_from_log(
        &outcome.log,
        &ResolutionOptions {
            witness_proofs: Some(vec![stale]),
            ..Default::default()
        },
    )
    .await;
    assert!(matches!(result, Err(WebVhError::WitnessQuorum(_))));

    // a proof from an undeclared witness does not count either
    let undeclared = witness_proof(&stranger, &tip).await;
    let result = resolve_did_from_log(
        &outcome.log,
        &ResolutionOptions {
            witness_proofs: Some(vec![undeclared]),
            ..Default::default()
        },
    )
    .await;
    assert!(matches!(result, Err(WebVhError::WitnessQuorum(_))));
}

#[tokio::test]
async fn duplicate_proofs_count_once() {
    let controller = signer(56);
    let (w1, w2) = (signer(57), signer(58));

    let outcome = create_witnessed(
        &controller,
        vec![
            Witness { id: witness_id(&w1), weight: None },
            Witness { id: witness_id(&w2), weight: None },
        ],
        2,
    )
    .await;
    let tip = outcome.metadata.version_id.clone();

    // the same witness twice is still weight 1
    let proofs = vec![
        witness_proof(&w1, &tip).await,
        witness_proof(&w1, &tip).await,
    ];
    let result = resolve_did_from_log(
        &outcome.log,
        &ResolutionOptions {
            witness_proofs: Some(proofs),
            ..Default::default()
        },
    )
    .await;
    assert!(matches!(result, Err(WebVhError::WitnessQuorum(_))));
}

#[tokio::test]
async fn no_witnesses_means_no_check() {
    let controller = signer(59);
    let outcome = common::create(&controller).await;

    let resolved = resolve_did_from_log(&outcome.log, &ResolutionOptions::default()).await;
    assert!(resolved.is_ok());
}
