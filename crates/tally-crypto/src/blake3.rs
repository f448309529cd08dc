//! Domain-separated BLAKE3 hashing.
//!
//! Every keyed use of BLAKE3 in the ledger carries a registered context
//! string so outputs from different protocol roles can never collide.

/// Registered context strings for the Tally v1 protocol.
pub mod contexts {
    /// Issuer evaluation of a blinded token.
    pub const ISSUER_EVALUATE: &str = "Tally v1 issuer-evaluate";
    /// Client-side unblinding of a signed token.
    pub const TOKEN_UNBLIND: &str = "Tally v1 token-unblind";
    /// Issuer public key derivation.
    pub const ISSUER_PUBLIC_KEY: &str = "Tally v1 issuer-public-key";
    /// Batch proof transcript over a signed token set.
    pub const BATCH_PROOF: &str = "Tally v1 batch-proof";
    /// Per-token redemption proof binding a token to a payload.
    pub const REDEEM_PROOF: &str = "Tally v1 redeem-proof";
}

/// Compute the BLAKE3 hash of the input data.
pub fn hash(data: &[u8]) -> [u8; 32] {
    *::blake3::hash(data).as_bytes()
}

/// Derive a key using BLAKE3's built-in key derivation mode.
///
/// The context string must be one of the registered strings in
/// [`contexts`].
pub fn derive_key(context: &str, key_material: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    let mut hasher = ::blake3::Hasher::new_derive_key(context);
    hasher.update(key_material);
    out.copy_from_slice(hasher.finalize().as_bytes());
    out
}

/// Compute a keyed BLAKE3 hash (MAC/PRF).
pub fn keyed_hash(key: &[u8; 32], message: &[u8]) -> [u8; 32] {
    *::blake3::keyed_hash(key, message).as_bytes()
}

/// Encode multiple dynamic fields using length-prefixed encoding.
///
/// Inputs are `LE32(len(field1)) || field1 || LE32(len(field2)) || ...`
/// so no field boundary is ambiguous.
pub fn encode_multi_field(fields: &[&[u8]]) -> Vec<u8> {
    let total: usize = fields.iter().map(|f| 4 + f.len()).sum();
    let mut out = Vec::with_capacity(total);
    for field in fields {
        out.extend_from_slice(&(field.len() as u32).to_le_bytes());
        out.extend_from_slice(field);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        assert_eq!(hash(b"tally"), hash(b"tally"));
        assert_ne!(hash(b"tally"), hash(b"tally2"));
    }

    #[test]
    fn test_derive_key_contexts_separate() {
        let a = derive_key(contexts::ISSUER_EVALUATE, b"material");
        let b = derive_key(contexts::TOKEN_UNBLIND, b"material");
        assert_ne!(a, b);
    }

    #[test]
    fn test_encode_multi_field_unambiguous() {
        // ("ab", "c") must encode differently from ("a", "bc")
        let left = encode_multi_field(&[b"ab", b"c"]);
        let right = encode_multi_field(&[b"a", b"bc"]);
        assert_ne!(left, right);
    }

    #[test]
    fn test_encode_multi_field_empty() {
        let encoded = encode_multi_field(&[b"", b""]);
        assert_eq!(encoded.len(), 8);
    }
}
