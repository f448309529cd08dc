//! # tally-types
//!
//! Shared domain types for the Tally contribution ledger: contribution and
//! settlement records, credential batch states, promotions, publisher
//! verification status, and the explicit configuration structs every
//! component receives at construction.

pub mod config;
pub mod contribution;
pub mod creds;
pub mod promotion;
pub mod publisher;

/// A publisher's stable key (e.g. a channel identifier).
pub type PublisherKey = String;

/// Opaque record identifier (UUID-shaped string assigned by the caller).
pub type RecordId = String;

/// Smallest accounting unit: one millionth of a base token.
pub type MicroTokens = u64;

/// Micro-tokens per whole token.
pub const MICRO_TOKENS_PER_TOKEN: u64 = 1_000_000;

/// Error raised when decoding a stored enum discriminant.
#[derive(Debug, thiserror::Error)]
pub enum TypeError {
    /// An on-disk string did not match any known enum variant.
    #[error("unknown {kind} value: {value}")]
    UnknownValue {
        /// Which enum was being decoded.
        kind: &'static str,
        /// The offending stored string.
        value: String,
    },
}

/// Convenience result type for type decoding.
pub type Result<T> = std::result::Result<T, TypeError>;
