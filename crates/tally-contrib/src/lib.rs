//! # tally-contrib
//!
//! The contribution pipeline: a durable FIFO queue of scheduled
//! contributions and the reconciliation engine that settles them against
//! the credential vault and an externally linked wallet.
//!
//! Settlement is a persisted state machine. Every step transition is
//! written to the store before the work that depends on it, so a crash
//! mid-settlement resumes at the last durable step instead of restarting.
//!
//! ## Modules
//!
//! - [`queue`]: the durable contribution queue
//! - [`engine`]: the reconciliation state machine
//! - [`split`]: pro-rata funding-source division
//! - [`voting`]: ballot assignment and statistical winner selection
//! - [`backoff`]: the bounded jittered-geometric retry ladder

pub mod backoff;
pub mod engine;
pub mod queue;
pub mod split;
pub mod voting;

pub use engine::{CycleOutcome, ExternalWallet, FailureReason, ReconciliationEngine};
pub use queue::ContributionQueue;

/// Error types for contribution operations.
#[derive(Debug, thiserror::Error)]
pub enum ContribError {
    /// Storage failure.
    #[error("store error: {0}")]
    Db(#[from] tally_db::DbError),

    /// Credential vault failure.
    #[error("creds error: {0}")]
    Creds(#[from] tally_creds::CredsError),

    /// External wallet failure.
    #[error("wallet error: {0}")]
    Wallet(#[from] tally_creds::ClientError),

    /// A queue entry failed validation before it was accepted.
    #[error("invalid queue entry: {0}")]
    InvalidEntry(String),
}

/// Convenience result type for contribution operations.
pub type Result<T> = std::result::Result<T, ContribError>;
