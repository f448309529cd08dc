//! # tally-promo
//!
//! The promotion manager: fetch grants from the promotion server, claim
//! and attest them, and drive the credential vault so unlocked value
//! lands in the spendable balance.
//!
//! `Fetch → Claim → Attest` is a strict sequence; attested promotions
//! trigger the vault's blind/claim/unblind pipeline for their trigger id.
//! A periodic refresh re-fetches promotions with jittered-geometric
//! backoff on sustained failure.
//!
//! ## Modules
//!
//! - [`client`]: the promotion server boundary trait
//! - [`manager`]: the promotion lifecycle driver
//! - [`refresh`]: single-shot timer guard and refresh scheduling

pub mod client;
pub mod manager;
pub mod refresh;

pub use client::{PromotionClient, PromotionDescriptor};
pub use manager::PromotionManager;
pub use refresh::{RefreshSchedule, SingleShotTimer};

/// Error types for promotion operations.
#[derive(Debug, thiserror::Error)]
pub enum PromoError {
    /// Storage failure.
    #[error("store error: {0}")]
    Db(#[from] tally_db::DbError),

    /// Credential vault failure.
    #[error("creds error: {0}")]
    Creds(#[from] tally_creds::CredsError),

    /// Promotion server failure.
    #[error("client error: {0}")]
    Client(#[from] tally_creds::ClientError),

    /// The promotion does not exist locally.
    #[error("unknown promotion {0}")]
    UnknownPromotion(String),

    /// The promotion is in the wrong state for the requested step.
    #[error("promotion {promotion_id} is {status}, expected {expected}")]
    WrongStatus {
        /// The promotion.
        promotion_id: String,
        /// Its current status.
        status: &'static str,
        /// The status the step requires.
        expected: &'static str,
    },
}

/// Convenience result type for promotion operations.
pub type Result<T> = std::result::Result<T, PromoError>;
