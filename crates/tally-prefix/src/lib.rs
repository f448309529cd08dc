//! # tally-prefix
//!
//! Privacy-preserving publisher verification index.
//!
//! A server publishes a compact, sorted list of fixed-width publisher
//! key-hash prefixes. The client answers "is this publisher's prefix
//! present" locally with a binary search, never sending the full publisher
//! identity to the server. False positives are resolved by a follow-up
//! per-publisher status fetch; false negatives cannot occur.
//!
//! ## Modules
//!
//! - [`list`]: envelope parsing and the binary-search reader
//! - [`padding`]: the shared padded-payload transform for private CDN
//!   responses

pub mod list;
pub mod padding;

pub use list::{CompressionType, PrefixListEnvelope, PrefixListReader};

/// Error types for prefix list and padded payload handling.
#[derive(Debug, thiserror::Error)]
pub enum PrefixError {
    /// Envelope bytes are not a valid serialized message.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Prefix size outside the supported [4, 32] range.
    #[error("invalid prefix size: {0}")]
    InvalidPrefixSize(u32),

    /// Declared uncompressed size is zero or inconsistent with the payload.
    #[error("invalid uncompressed size: {0}")]
    InvalidUncompressedSize(u64),

    /// Unrecognized compression tag.
    #[error("unknown compression type: {0}")]
    UnknownCompressionType(u8),

    /// Brotli decoding failed or produced the wrong number of bytes.
    #[error("unable to decompress: {0}")]
    UnableToDecompress(String),

    /// Adjacent prefixes out of ascending order; the list is untrusted.
    #[error("prefixes not sorted")]
    PrefixesNotSorted,

    /// Padded payload shorter than the 4-byte length header.
    #[error("padded payload header too short")]
    HeaderTooShort,

    /// Declared payload length exceeds the bytes actually present.
    #[error("payload shorter than declared length")]
    PayloadShorterThanDeclared,
}

/// Convenience result type for prefix operations.
pub type Result<T> = std::result::Result<T, PrefixError>;
