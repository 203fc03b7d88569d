//! Ed25519 signing backend
//!
//! Verifies detached Ed25519 signatures over artifact bytes against a set of
//! named trusted public keys. Signatures are written as `ed25519:<hex>` or as
//! bare hex.

use ed25519_dalek::{Signature, Verifier, VerifyingKey, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};
use sdk::errors::{AcquireError, Result};
use sdk::interfaces::{SignatureVerdict, SigningBackend};
use tracing::debug;

const ALGORITHM: &str = "ed25519";

/// Decode a signature string into raw bytes.
///
/// Accepts `<algorithm>:<hex>` or bare hex.
pub fn decode_signature(signature: &str) -> Result<Vec<u8>> {
    let signature = signature.trim();
    let hex_part = signature
        .split_once(':')
        .map(|(_, hex)| hex)
        .unwrap_or(signature);
    hex::decode(hex_part)
        .map_err(|e| AcquireError::SignatureInvalid(format!("Malformed signature encoding: {}", e)))
}

/// [`SigningBackend`] backed by `ed25519-dalek`
#[derive(Debug, Clone, Default)]
pub struct Ed25519Backend {
    keys: Vec<(String, VerifyingKey)>,
}

impl Ed25519Backend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust the hex-encoded public key `key_hex` under `name`
    ///
    /// # Errors
    ///
    /// Returns `AcquireError::Config` if the key is not a valid 32-byte
    /// Ed25519 public key.
    pub fn with_key(mut self, name: impl Into<String>, key_hex: &str) -> Result<Self> {
        let bytes = hex::decode(key_hex.trim())
            .map_err(|e| AcquireError::Config(format!("Invalid public key hex: {}", e)))?;
        let bytes: [u8; PUBLIC_KEY_LENGTH] = bytes.try_into().map_err(|b: Vec<u8>| {
            AcquireError::Config(format!(
                "Invalid public key length: expected {}, got {}",
                PUBLIC_KEY_LENGTH,
                b.len()
            ))
        })?;
        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|e| AcquireError::Config(format!("Invalid public key: {}", e)))?;
        self.keys.push((name.into(), key));
        Ok(self)
    }

    /// Trust an already parsed key
    pub fn with_verifying_key(mut self, name: impl Into<String>, key: VerifyingKey) -> Self {
        self.keys.push((name.into(), key));
        self
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }
}

impl SigningBackend for Ed25519Backend {
    fn verify(&self, data: &[u8], signature: &[u8]) -> SignatureVerdict {
        let rejected = SignatureVerdict {
            valid: false,
            signer: None,
            algorithm: ALGORITHM.to_string(),
        };

        let Ok(bytes) = <[u8; SIGNATURE_LENGTH]>::try_from(signature) else {
            debug!(
                "Signature has length {}, expected {}",
                signature.len(),
                SIGNATURE_LENGTH
            );
            return rejected;
        };
        let signature = Signature::from_bytes(&bytes);

        for (name, key) in &self.keys {
            if key.verify(data, &signature).is_ok() {
                return SignatureVerdict {
                    valid: true,
                    signer: Some(name.clone()),
                    algorithm: ALGORITHM.to_string(),
                };
            }
        }
        rejected
    }
}
