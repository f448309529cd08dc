//! Prefix list envelope parsing and binary-search reader.
//!
//! The wire form is a CBOR envelope `{prefix_size, uncompressed_size,
//! compression, prefixes}`. Decompressed prefixes are a flat concatenation
//! of fixed `prefix_size`-byte big-endian values in ascending order. The
//! sortedness invariant is spot-checked at load time over the first five
//! adjacent pairs; any violation discards the whole list rather than
//! trusting it partially.

use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::{PrefixError, Result};

/// Minimum supported prefix width in bytes.
pub const MIN_PREFIX_SIZE: u32 = 4;

/// Maximum supported prefix width in bytes.
pub const MAX_PREFIX_SIZE: u32 = 32;

/// Number of leading adjacent pairs checked for sortedness at load time.
const SORT_CHECK_PAIRS: usize = 5;

/// Compression applied to the prefixes payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressionType {
    /// Payload is the raw prefix concatenation.
    None,
    /// Payload is Brotli-compressed.
    Brotli,
}

impl CompressionType {
    /// Wire tag for this compression type.
    pub fn tag(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Brotli => 1,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Self::None),
            1 => Ok(Self::Brotli),
            other => Err(PrefixError::UnknownCompressionType(other)),
        }
    }
}

/// Serialized envelope carrying a prefix list.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PrefixListEnvelope {
    /// Width of each prefix in bytes.
    pub prefix_size: u32,
    /// Size of the prefixes payload after decompression.
    pub uncompressed_size: u64,
    /// Compression tag; see [`CompressionType`].
    pub compression: u8,
    /// The (possibly compressed) prefix payload.
    pub prefixes: Vec<u8>,
}

impl PrefixListEnvelope {
    /// Encode this envelope to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        ciborium::into_writer(self, &mut out)
            .map_err(|e| PrefixError::MalformedEnvelope(e.to_string()))?;
        Ok(out)
    }
}

/// A parsed, validated prefix list answering membership queries.
pub struct PrefixListReader {
    prefix_size: usize,
    /// Flat concatenation of sorted fixed-width prefixes.
    prefixes: Vec<u8>,
}

impl PrefixListReader {
    /// Parse and validate an envelope from its CBOR bytes.
    ///
    /// # Errors
    ///
    /// - [`PrefixError::MalformedEnvelope`] if the bytes are not a valid
    ///   envelope
    /// - [`PrefixError::InvalidPrefixSize`] if `prefix_size` is outside
    ///   `[4, 32]`
    /// - [`PrefixError::InvalidUncompressedSize`] if the declared size is
    ///   zero or the payload is not a whole number of prefixes
    /// - [`PrefixError::UnknownCompressionType`] for unrecognized tags
    /// - [`PrefixError::UnableToDecompress`] on any Brotli failure or
    ///   output-size mismatch
    /// - [`PrefixError::PrefixesNotSorted`] if the leading adjacent pairs
    ///   are out of ascending order
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let envelope: PrefixListEnvelope = ciborium::from_reader(bytes)
            .map_err(|e| PrefixError::MalformedEnvelope(e.to_string()))?;
        Self::from_envelope(envelope)
    }

    /// Validate an already-decoded envelope.
    pub fn from_envelope(envelope: PrefixListEnvelope) -> Result<Self> {
        if !(MIN_PREFIX_SIZE..=MAX_PREFIX_SIZE).contains(&envelope.prefix_size) {
            return Err(PrefixError::InvalidPrefixSize(envelope.prefix_size));
        }
        if envelope.uncompressed_size == 0 {
            return Err(PrefixError::InvalidUncompressedSize(0));
        }

        let prefixes = match CompressionType::from_tag(envelope.compression)? {
            CompressionType::None => envelope.prefixes,
            CompressionType::Brotli => {
                decompress_brotli(&envelope.prefixes, envelope.uncompressed_size as usize)?
            }
        };

        let prefix_size = envelope.prefix_size as usize;
        if prefixes.len() % prefix_size != 0 {
            return Err(PrefixError::InvalidUncompressedSize(prefixes.len() as u64));
        }

        let reader = Self {
            prefix_size,
            prefixes,
        };
        reader.check_leading_sorted()?;

        tracing::debug!(
            entries = reader.len(),
            prefix_size,
            "prefix list loaded"
        );
        Ok(reader)
    }

    /// Number of prefixes in the list.
    pub fn len(&self) -> usize {
        self.prefixes.len() / self.prefix_size
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// The configured prefix width in bytes.
    pub fn prefix_size(&self) -> usize {
        self.prefix_size
    }

    /// Binary search for a key's prefix.
    ///
    /// Only the first `prefix_size` bytes of `key` participate; a shorter
    /// key never matches.
    pub fn contains(&self, key: &[u8]) -> bool {
        if key.len() < self.prefix_size {
            return false;
        }
        let needle = &key[..self.prefix_size];
        let mut low = 0usize;
        let mut high = self.len();
        while low < high {
            let mid = low + (high - low) / 2;
            match self.entry(mid).cmp(needle) {
                std::cmp::Ordering::Equal => return true,
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid,
            }
        }
        false
    }

    /// Iterate the entries in stored order.
    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.prefixes.chunks_exact(self.prefix_size)
    }

    fn entry(&self, index: usize) -> &[u8] {
        &self.prefixes[index * self.prefix_size..(index + 1) * self.prefix_size]
    }

    /// Cheap corruption guard: the first [`SORT_CHECK_PAIRS`] adjacent
    /// pairs must be in ascending order.
    fn check_leading_sorted(&self) -> Result<()> {
        let pairs = SORT_CHECK_PAIRS.min(self.len().saturating_sub(1));
        for i in 0..pairs {
            if self.entry(i) > self.entry(i + 1) {
                return Err(PrefixError::PrefixesNotSorted);
            }
        }
        Ok(())
    }
}

/// Decompress a Brotli payload into exactly `expected_size` bytes.
fn decompress_brotli(payload: &[u8], expected_size: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expected_size);
    let mut decoder = brotli_decompressor::Decompressor::new(payload, 4096);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| PrefixError::UnableToDecompress(e.to_string()))?;
    if out.len() != expected_size {
        return Err(PrefixError::UnableToDecompress(format!(
            "expected {expected_size} bytes, got {}",
            out.len()
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a raw (uncompressed) envelope from fixed-width entries.
    fn envelope(prefix_size: u32, entries: &[&[u8]]) -> PrefixListEnvelope {
        let prefixes: Vec<u8> = entries.iter().flat_map(|e| e.iter().copied()).collect();
        PrefixListEnvelope {
            prefix_size,
            uncompressed_size: prefixes.len() as u64,
            compression: CompressionType::None.tag(),
            prefixes,
        }
    }

    #[test]
    fn test_parse_and_search() {
        let env = envelope(
            4,
            &[
                &[0x00, 0x00, 0x00, 0x01],
                &[0x00, 0x00, 0x10, 0x00],
                &[0x10, 0x20, 0x30, 0x40],
                &[0xff, 0xff, 0xff, 0xfe],
            ],
        );
        let reader = PrefixListReader::parse(&env.to_bytes().expect("encode")).expect("parse");

        assert_eq!(reader.len(), 4);
        assert!(reader.contains(&[0x10, 0x20, 0x30, 0x40]));
        assert!(reader.contains(&[0x10, 0x20, 0x30, 0x40, 0xaa, 0xbb])); // extra bytes ignored
        assert!(!reader.contains(&[0x10, 0x20, 0x30, 0x41]));
        assert!(!reader.contains(&[0x10, 0x20])); // too short
    }

    #[test]
    fn test_search_agrees_with_linear_scan() {
        // 64 evenly spaced 4-byte entries
        let raw: Vec<[u8; 4]> = (0..64u32).map(|i| (i * 1000).to_be_bytes()).collect();
        let entries: Vec<&[u8]> = raw.iter().map(|e| e.as_slice()).collect();
        let env = envelope(4, &entries);
        let reader = PrefixListReader::parse(&env.to_bytes().expect("encode")).expect("parse");

        for probe in 0..70_000u32 {
            let key = probe.to_be_bytes();
            let linear = reader.iter().any(|e| e == key);
            assert_eq!(reader.contains(&key), linear, "probe {probe}");
        }
    }

    #[test]
    fn test_iteration_is_non_decreasing() {
        let env = envelope(
            4,
            &[
                &[0x00, 0x00, 0x00, 0x01],
                &[0x00, 0x00, 0x00, 0x02],
                &[0x00, 0x00, 0x00, 0x03],
            ],
        );
        let reader = PrefixListReader::parse(&env.to_bytes().expect("encode")).expect("parse");
        let entries: Vec<&[u8]> = reader.iter().collect();
        assert!(entries.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_unsorted_list_discarded() {
        let env = envelope(
            4,
            &[
                &[0x00, 0x00, 0x00, 0x05],
                &[0x00, 0x00, 0x00, 0x01],
                &[0x00, 0x00, 0x00, 0x09],
            ],
        );
        let result = PrefixListReader::parse(&env.to_bytes().expect("encode"));
        assert!(matches!(result, Err(PrefixError::PrefixesNotSorted)));
    }

    #[test]
    fn test_prefix_size_bounds() {
        for bad in [0u32, 3, 33] {
            let env = PrefixListEnvelope {
                prefix_size: bad,
                uncompressed_size: 8,
                compression: 0,
                prefixes: vec![0; 8],
            };
            let result = PrefixListReader::from_envelope(env);
            assert!(matches!(result, Err(PrefixError::InvalidPrefixSize(_))), "size {bad}");
        }
    }

    #[test]
    fn test_zero_uncompressed_size_rejected() {
        let env = PrefixListEnvelope {
            prefix_size: 4,
            uncompressed_size: 0,
            compression: 0,
            prefixes: Vec::new(),
        };
        let result = PrefixListReader::from_envelope(env);
        assert!(matches!(result, Err(PrefixError::InvalidUncompressedSize(0))));
    }

    #[test]
    fn test_ragged_payload_rejected() {
        let env = PrefixListEnvelope {
            prefix_size: 4,
            uncompressed_size: 6,
            compression: 0,
            prefixes: vec![0; 6],
        };
        let result = PrefixListReader::from_envelope(env);
        assert!(matches!(result, Err(PrefixError::InvalidUncompressedSize(_))));
    }

    #[test]
    fn test_unknown_compression_rejected() {
        let env = PrefixListEnvelope {
            prefix_size: 4,
            uncompressed_size: 8,
            compression: 9,
            prefixes: vec![0; 8],
        };
        let result = PrefixListReader::from_envelope(env);
        assert!(matches!(result, Err(PrefixError::UnknownCompressionType(9))));
    }

    #[test]
    fn test_garbage_brotli_rejected() {
        let env = PrefixListEnvelope {
            prefix_size: 4,
            uncompressed_size: 8,
            compression: CompressionType::Brotli.tag(),
            prefixes: vec![0xde, 0xad, 0xbe, 0xef, 0x01, 0x02],
        };
        let result = PrefixListReader::from_envelope(env);
        assert!(matches!(result, Err(PrefixError::UnableToDecompress(_))));
    }

    #[test]
    fn test_malformed_envelope_rejected() {
        let result = PrefixListReader::parse(&[0xff, 0x00, 0x13, 0x37]);
        assert!(matches!(result, Err(PrefixError::MalformedEnvelope(_))));
    }
}
