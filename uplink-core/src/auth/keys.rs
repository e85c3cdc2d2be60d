//! Ed25519 key management
//!
//! The signing key never leaves the process; presigned URLs carry only the
//! key id and a signature.

use crate::{Result, UploadError};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ed25519 key pair for signing operations
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl KeyPair {
    /// Generate a new Ed25519 key pair
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(signing_key)
    }

    /// Create key pair from signing key bytes
    pub fn from_signing_key_bytes(bytes: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(bytes))
    }

    /// Parse a hex-encoded 32 byte signing key
    pub fn from_hex(encoded: &str) -> Result<Self> {
        let bytes = crate::hex::decode(encoded.trim())
            .ok_or_else(|| UploadError::InvalidConfig("signing key is not valid hex".to_string()))?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            UploadError::InvalidConfig(format!("signing key must be 32 bytes, got {}", b.len()))
        })?;
        Ok(Self::from_signing_key_bytes(&bytes))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        KeyPair {
            signing_key,
            verifying_key,
        }
    }

    /// Get signing key bytes as hex (sensitive operation)
    pub fn signing_key_hex(&self) -> String {
        crate::hex::encode(self.signing_key.to_bytes())
    }

    /// Sign data with this key pair
    pub fn sign(&self, data: &[u8]) -> Signature {
        self.signing_key.sign(data)
    }

    /// Verify a signature made by this key pair
    pub fn verify(&self, data: &[u8], signature: &Signature) -> Result<()> {
        self.verifying_key
            .verify(data, signature)
            .map_err(|_| UploadError::PermissionDenied("signature mismatch".to_string()))
    }

    /// Get a unique identifier for this key (hash of public key)
    pub fn key_id(&self) -> KeyId {
        KeyId::from_verifying_key(&self.verifying_key)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("key_id", &self.key_id())
            .finish_non_exhaustive()
    }
}

/// Unique identifier for a cryptographic key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyId(String);

impl KeyId {
    /// Create key ID from verifying key (BLAKE3 hash of public key bytes)
    pub fn from_verifying_key(verifying_key: &VerifyingKey) -> Self {
        let hash = blake3::hash(&verifying_key.to_bytes());
        KeyId(crate::hex::encode(&hash.as_bytes()[..16]))
    }

    /// Create from string representation
    pub fn from_string(s: String) -> Self {
        KeyId(s)
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
