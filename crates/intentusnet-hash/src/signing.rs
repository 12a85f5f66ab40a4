//! Ed25519 signing and verification for WAL entries.
//!
//! Signatures cover the canonical-encoded entry minus the `signature` field
//! itself and travel as base64. Verification is addressed by `keyId` through
//! a [`KeyRegistry`] so readers can verify logs produced by several writers.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

/// Signing or verification failure.
#[derive(Debug, thiserror::Error)]
pub enum SignError {
    /// No verifying key registered under the given id.
    #[error("unknown signing key '{0}'")]
    UnknownKey(String),
    /// Signature bytes were not valid base64 or not 64 bytes long.
    #[error("malformed signature: {0}")]
    MalformedSignature(String),
    /// The signature did not verify against the registered key.
    #[error("signature verification failed for key '{key_id}'")]
    VerificationFailed {
        /// Key the signature claimed to be made with.
        key_id: String,
    },
    /// Key material could not be decoded.
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),
}

/// A produced signature together with the id of the key that made it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedBytes {
    /// Identifier of the signing key.
    pub key_id: String,
    /// Base64-encoded Ed25519 signature.
    pub signature: String,
}

//─────────────────────────────
//  Signer
//─────────────────────────────

/// Ed25519 signer bound to a named key.
#[derive(Clone)]
pub struct Ed25519Signer {
    key_id: String,
    key: SigningKey,
}

impl std::fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose key material through Debug.
        f.debug_struct("Ed25519Signer").field("key_id", &self.key_id).finish()
    }
}

impl Ed25519Signer {
    /// Generate a fresh keypair under `key_id`.
    pub fn generate(key_id: impl Into<String>) -> Self {
        Self { key_id: key_id.into(), key: SigningKey::generate(&mut OsRng) }
    }

    /// Load a signer from raw 32-byte secret key material.
    pub fn from_secret_bytes(key_id: impl Into<String>, bytes: &[u8]) -> Result<Self, SignError> {
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|_| SignError::InvalidKeyMaterial("secret key must be 32 bytes".into()))?;
        Ok(Self { key_id: key_id.into(), key: SigningKey::from_bytes(&secret) })
    }

    /// Identifier of the key this signer uses.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Public half of the keypair, for registry population.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    /// Sign `bytes`, returning a base64 signature tagged with the key id.
    pub fn sign(&self, bytes: &[u8]) -> SignedBytes {
        let signature = self.key.sign(bytes);
        SignedBytes {
            key_id: self.key_id.clone(),
            signature: BASE64.encode(signature.to_bytes()),
        }
    }
}

//─────────────────────────────
//  Key registry
//─────────────────────────────

/// Verifying-key registry addressable by key id.
#[derive(Debug, Default, Clone)]
pub struct KeyRegistry {
    keys: HashMap<String, VerifyingKey>,
}

impl KeyRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a verifying key under `key_id`, replacing any previous one.
    pub fn insert(&mut self, key_id: impl Into<String>, key: VerifyingKey) {
        self.keys.insert(key_id.into(), key);
    }

    /// Registry pre-populated with a signer's public key.
    pub fn with_signer(signer: &Ed25519Signer) -> Self {
        let mut registry = Self::new();
        registry.insert(signer.key_id().to_string(), signer.verifying_key());
        registry
    }

    /// Verify a base64 signature over `bytes` made with `key_id`.
    pub fn verify(&self, key_id: &str, bytes: &[u8], signature_b64: &str) -> Result<(), SignError> {
        let key = self
            .keys
            .get(key_id)
            .ok_or_else(|| SignError::UnknownKey(key_id.to_string()))?;
        let raw = BASE64
            .decode(signature_b64)
            .map_err(|e| SignError::MalformedSignature(e.to_string()))?;
        let signature = Signature::from_slice(&raw)
            .map_err(|e| SignError::MalformedSignature(e.to_string()))?;
        key.verify(bytes, &signature)
            .map_err(|_| SignError::VerificationFailed { key_id: key_id.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_roundtrip() {
        let signer = Ed25519Signer::generate("wal-key-1");
        let registry = KeyRegistry::with_signer(&signer);

        let signed = signer.sign(b"canonical entry bytes");
        assert_eq!(signed.key_id, "wal-key-1");
        registry
            .verify(&signed.key_id, b"canonical entry bytes", &signed.signature)
            .unwrap();
    }

    #[test]
    fn tampered_bytes_fail_verification() {
        let signer = Ed25519Signer::generate("wal-key-1");
        let registry = KeyRegistry::with_signer(&signer);

        let signed = signer.sign(b"original");
        let err = registry.verify(&signed.key_id, b"tampered", &signed.signature).unwrap_err();
        assert!(matches!(err, SignError::VerificationFailed { .. }));
    }

    #[test]
    fn unknown_key_is_reported() {
        let signer = Ed25519Signer::generate("wal-key-1");
        let registry = KeyRegistry::new();

        let signed = signer.sign(b"bytes");
        let err = registry.verify(&signed.key_id, b"bytes", &signed.signature).unwrap_err();
        assert!(matches!(err, SignError::UnknownKey(_)));
    }
}
