/*!
*   JCS canonicalization and hashing
*
*   Every hash in the protocol is a SHA-256 over RFC 8785 canonical JSON,
*   wrapped as a multihash (0x12 0x20 prefix) and encoded as multibase
*   base58-btc with the `z` prefix.
*/

use crate::WebVhError;
use base58::ToBase58;
use multihash::Multihash;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Serialize a value to its RFC 8785 (JCS) canonical form.
///
/// Inputs that differ only in key order or insignificant whitespace produce
/// byte-identical output.
pub fn canonicalize<T: Serialize>(value: &T) -> Result<String, WebVhError> {
    serde_json_canonicalizer::to_string(value).map_err(|e| {
        WebVhError::InputShape(format!("Couldn't canonicalize value to JCS. Reason: {e}"))
    })
}

/// Hash a JSON value: SHA-256 over the canonical bytes, multihash-wrapped,
/// multibase base58-btc encoded.
pub fn hash_value<T: Serialize>(value: &T) -> Result<String, WebVhError> {
    let jcs = canonicalize(value)?;
    tracing::debug!("JCS for hash: {}", jcs);
    hash_bytes(jcs.as_bytes())
}

/// Hash a raw string. Used for `nextKeyHashes` commitments, which hash the
/// multibase key string itself rather than a JSON document.
pub fn hash_string(input: &str) -> Result<String, WebVhError> {
    hash_bytes(input.as_bytes())
}

// SHA-256 multihash code = 0x12, digest length 32 bytes
fn hash_bytes(bytes: &[u8]) -> Result<String, WebVhError> {
    let wrapped =
        Multihash::<32>::wrap(0x12, Sha256::digest(bytes).as_slice()).map_err(|e| {
            WebVhError::InputShape(format!("Couldn't create multihash encoding. Reason: {e}"))
        })?;
    Ok(["z", &wrapped.to_bytes().to_base58()].concat())
}

/// Constant-time byte-string equality. Length mismatch returns early; the
/// contents are never short-circuited on.
pub fn ct_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
