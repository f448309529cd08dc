//! # tally-creds
//!
//! The credential vault: blind token batches from trigger to spendable
//! balance, and redemption of that balance against the payment server.
//!
//! A batch advances `Blinded → Claimed → SignedTokensReceived → Finished`,
//! with every transition written to the store before the network step that
//! depends on it. Redemption reserves tokens atomically, submits them, and
//! either finalizes the reservation to spent or releases it back to
//! spendable.
//!
//! ## Modules
//!
//! - [`client`]: the payment server boundary trait and wire shapes
//! - [`vault`]: the batch state machine and token redemption

pub mod client;
pub mod vault;

pub use client::{ClientError, PaymentClient, RedeemCredential, RedeemRequest, SignedCredsResponse};
pub use vault::CredentialVault;

/// Error types for credential operations.
#[derive(Debug, thiserror::Error)]
pub enum CredsError {
    /// Storage failure.
    #[error("store error: {0}")]
    Db(#[from] tally_db::DbError),

    /// Cryptographic failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] tally_crypto::CryptoError),

    /// Payment server failure.
    #[error("client error: {0}")]
    Client(#[from] client::ClientError),

    /// Stored or received bytes failed to decode.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The batch failed validation and was marked corrupted.
    #[error("creds batch {batch_id} corrupted: {reason}")]
    BatchCorrupted {
        /// The corrupted batch.
        batch_id: String,
        /// What failed.
        reason: String,
    },

    /// No batch exists for the trigger.
    #[error("no creds batch for trigger {0}")]
    NoBatch(String),

    /// A background task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),
}

/// Convenience result type for credential operations.
pub type Result<T> = std::result::Result<T, CredsError>;
