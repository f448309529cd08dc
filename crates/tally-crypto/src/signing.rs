//! Ed25519 signing of redemption requests (RFC 8032).
//!
//! Redemption payloads sent to the settlement server are signed with the
//! wallet's request key so the server can attribute the redemption without
//! learning anything about the tokens' provenance.

use ed25519_dalek::{Signer, Verifier};
use zeroize::Zeroize;

use crate::{CryptoError, Result};

/// A request signing key (private).
pub struct RequestSigner {
    inner: ed25519_dalek::SigningKey,
}

impl Drop for RequestSigner {
    fn drop(&mut self) {
        let mut bytes = self.inner.to_bytes();
        bytes.zeroize();
    }
}

impl RequestSigner {
    /// Generate a new random signing key.
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self {
            inner: ed25519_dalek::SigningKey::generate(&mut csprng),
        }
    }

    /// Create a signing key from raw bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            inner: ed25519_dalek::SigningKey::from_bytes(bytes),
        }
    }

    /// Raw bytes of this signing key.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }

    /// The corresponding public key bytes.
    pub fn public_key(&self) -> [u8; 32] {
        self.inner.verifying_key().to_bytes()
    }

    /// Sign a message, returning the 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.inner.sign(message).to_bytes()
    }
}

/// Verify a request signature against a public key.
///
/// # Errors
///
/// - [`CryptoError::SignatureVerification`] on any mismatch
pub fn verify(public_key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> Result<()> {
    let key = ed25519_dalek::VerifyingKey::from_bytes(public_key)
        .map_err(|e| CryptoError::InvalidInput(e.to_string()))?;
    let sig = ed25519_dalek::Signature::from_bytes(signature);
    key.verify(message, &sig)
        .map_err(|_| CryptoError::SignatureVerification)
}
