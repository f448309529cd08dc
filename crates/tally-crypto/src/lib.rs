//! # tally-crypto
//!
//! Cryptographic primitives for the Tally ledger.
//!
//! ## Modules
//!
//! - [`blake3`]: Domain-separated BLAKE3 hashing
//! - [`blind`]: Blind token issuance (blind / evaluate / unblind) and
//!   batch proofs
//! - [`signing`]: Ed25519 signing of redemption requests

pub mod blake3;
pub mod blind;
pub mod signing;

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Ed25519 signature verification failed.
    #[error("signature verification failed")]
    SignatureVerification,

    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected byte length.
        expected: usize,
        /// Actual byte length.
        actual: usize,
    },

    /// A batch proof did not match the signed set.
    #[error("batch proof mismatch")]
    BatchProofMismatch,

    /// Malformed input bytes.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Convenience result type for crypto operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
