#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **intentusnet-hash** – Canonical hashing utilities for IntentusNet.
//!
//! The encoding is deliberately simple and deterministic: JSON with object
//! keys sorted lexicographically at every nesting level, no insignificant
//! whitespace, UTF-8. `SHA256(canonical(value))` is the content hash used for
//! envelopes, responses, WAL entries, execution records and fingerprints.
//!
//! This property enables:
//! * **Content addressability** – identical value → identical digest.
//! * **Cross-run comparability** – two executions hash equal iff their
//!   deterministic dimensions are equal.
//! * **Tamper evidence** – any byte flip in a stored entry breaks its digest.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

mod signing;

pub use signing::{Ed25519Signer, KeyRegistry, SignError, SignedBytes};

//─────────────────────────────
//  Canonical encoding
//─────────────────────────────

/// Encode a JSON value canonically: keys sorted at every level, compact
/// separators, UTF-8.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

/// Canonically encode any serializable value.
///
/// The value is first converted to a [`Value`] tree so that map keys can be
/// sorted regardless of the source type's field order.
pub fn canonical_encode<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let tree = serde_json::to_value(value)?;
    Ok(canonical_json(&tree))
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        // serde_json's own rendering: integers stay integral, floats use the
        // shortest round-trip form.
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            // serde_json handles escaping; a bare string serializes infallibly.
            out.push_str(&serde_json::to_string(s).expect("string serialization is infallible"));
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).expect("string serialization is infallible"));
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
    }
}

//─────────────────────────────
//  SHA-256 digests
//─────────────────────────────

/// Lowercase hex SHA-256 digest of raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Content hash of a JSON value: `SHA256(canonical(value))`, lowercase hex.
pub fn hash_value(value: &Value) -> String {
    sha256_hex(canonical_json(value).as_bytes())
}

/// Content hash of any serializable value.
pub fn hash_encoded<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    Ok(sha256_hex(canonical_encode(value)?.as_bytes()))
}
