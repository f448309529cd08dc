//! Padded-payload framing for private CDN responses.
//!
//! Wire form: `[4-byte big-endian length][payload][padding]`. Responses
//! are padded up to a size bucket so their length on the wire does not
//! leak the payload size to network observers. The transform is pure and
//! allocation-free on the failure paths.

use crate::{PrefixError, Result};

/// Length of the big-endian length header.
pub const HEADER_LEN: usize = 4;

/// Frame a payload, padding with zeros up to `padded_len` total bytes.
///
/// When `padded_len` is too small to hold the header and payload, the
/// frame is exactly header + payload with no padding.
pub fn add(payload: &[u8], padded_len: usize) -> Vec<u8> {
    let total = padded_len.max(HEADER_LEN + payload.len());
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out.resize(total, 0);
    out
}

/// Strip the header and padding, returning exactly the declared payload.
///
/// # Errors
///
/// - [`PrefixError::HeaderTooShort`] if fewer than 4 bytes are present
/// - [`PrefixError::PayloadShorterThanDeclared`] if the declared length
///   exceeds the remaining bytes
pub fn remove(buffer: &[u8]) -> Result<&[u8]> {
    if buffer.len() < HEADER_LEN {
        return Err(PrefixError::HeaderTooShort);
    }
    let mut header = [0u8; HEADER_LEN];
    header.copy_from_slice(&buffer[..HEADER_LEN]);
    let declared = u32::from_be_bytes(header) as usize;

    let remaining = &buffer[HEADER_LEN..];
    if remaining.len() < declared {
        return Err(PrefixError::PayloadShorterThanDeclared);
    }
    Ok(&remaining[..declared])
}
