//! Blind token issuance protocol.
//!
//! The client blinds a random token serial, the issuer evaluates the
//! blinded element without learning the serial, and the client unblinds
//! the result to obtain a redeemable token. A batch proof over the whole
//! signed set lets the client check that every token was signed by the
//! same issuer key.
//!
//! ## Protocol Flow
//!
//! 1. Client: `blind()` -> `(BlindedToken, BlindState)`
//! 2. Issuer: `IssuerKey::evaluate(blinded)` -> `SignedToken`
//! 3. Client: `unblind(signed, state)` -> `TokenPreimage`
//! 4. Client: `verify_batch_proof(public_key, blinded, signed, proof)`

use zeroize::Zeroize;

use crate::blake3::{self, contexts};
use crate::{CryptoError, Result};

/// A blinded token element, safe to send to the issuer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlindedToken {
    /// The blinded element bytes.
    pub bytes: Vec<u8>,
}

/// An issuer-evaluated (signed) token element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedToken {
    /// The evaluated element bytes.
    pub bytes: Vec<u8>,
}

/// Client-held blind state preserved between `blind` and `unblind`.
pub struct BlindState {
    /// The random token serial.
    serial: [u8; 32],
    /// The blinding factor.
    blind: [u8; 32],
}

impl BlindState {
    /// Serialize for at-rest storage: `serial || blind`.
    ///
    /// The state must survive restarts, since the signed response may
    /// arrive long after the blinded tokens were submitted.
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(&self.serial);
        out[32..].copy_from_slice(&self.blind);
        out
    }

    /// Restore a persisted blind state.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::InvalidKeyLength`] if `bytes` is not 64 bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 64 {
            return Err(CryptoError::InvalidKeyLength {
                expected: 64,
                actual: bytes.len(),
            });
        }
        let mut serial = [0u8; 32];
        serial.copy_from_slice(&bytes[..32]);
        let mut blind = [0u8; 32];
        blind.copy_from_slice(&bytes[32..]);
        Ok(Self { serial, blind })
    }
}

impl Drop for BlindState {
    fn drop(&mut self) {
        self.serial.zeroize();
        self.blind.zeroize();
    }
}

/// The final unblinded token held by the client until redemption.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenPreimage {
    /// The token serial.
    pub serial: [u8; 32],
    /// The unblinded PRF output.
    pub output: [u8; 32],
}

/// An issuer signing key.
///
/// Simplified BLAKE3-PRF construction; a production deployment substitutes
/// Ristretto255 scalar multiplication with the same interface.
#[derive(Clone)]
pub struct IssuerKey {
    key_bytes: [u8; 32],
}

impl IssuerKey {
    /// Generate a new random issuer key.
    pub fn generate() -> Self {
        let mut key_bytes = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut key_bytes);
        Self { key_bytes }
    }

    /// Create an issuer key from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut key_bytes = [0u8; 32];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { key_bytes })
    }

    /// The issuer's public key, committing to the signing key.
    pub fn public_key(&self) -> [u8; 32] {
        blake3::derive_key(contexts::ISSUER_PUBLIC_KEY, &self.key_bytes)
    }

    /// Evaluate a blinded token without learning the underlying serial.
    pub fn evaluate(&self, blinded: &BlindedToken) -> SignedToken {
        let key = blake3::derive_key(contexts::ISSUER_EVALUATE, &self.key_bytes);
        let output = blake3::keyed_hash(&key, &blinded.bytes);
        SignedToken {
            bytes: output.to_vec(),
        }
    }

    /// Produce the batch proof over an ordered signed set.
    ///
    /// The transcript binds the public key and every (blinded, signed)
    /// pair in order, so reordering or substituting a token invalidates
    /// the proof.
    pub fn batch_proof(&self, blinded: &[BlindedToken], signed: &[SignedToken]) -> [u8; 32] {
        batch_transcript(&self.public_key(), blinded, signed)
    }
}

/// Client-side: blind a fresh random serial.
///
/// Returns the blinded element to send to the issuer and the state needed
/// to unblind the response.
pub fn blind() -> (BlindedToken, BlindState) {
    let mut serial = [0u8; 32];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut serial);
    let mut blind = [0u8; 32];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut blind);

    let element = blake3::hash(&blake3::encode_multi_field(&[&blind, &serial]));
    (
        BlindedToken {
            bytes: element.to_vec(),
        },
        BlindState { serial, blind },
    )
}

/// Client-side: unblind a signed token.
pub fn unblind(signed: &SignedToken, state: &BlindState) -> TokenPreimage {
    let key = blake3::derive_key(contexts::TOKEN_UNBLIND, &state.blind);
    let output = blake3::keyed_hash(&key, &signed.bytes);
    TokenPreimage {
        serial: state.serial,
        output,
    }
}

/// Verify a batch proof against the issuer's public key.
///
/// # Errors
///
/// - [`CryptoError::BatchProofMismatch`] if the proof does not cover this
///   exact ordered signed set
pub fn verify_batch_proof(
    public_key: &[u8; 32],
    blinded: &[BlindedToken],
    signed: &[SignedToken],
    proof: &[u8; 32],
) -> Result<()> {
    if blinded.len() != signed.len() {
        return Err(CryptoError::BatchProofMismatch);
    }
    let expected = batch_transcript(public_key, blinded, signed);
    if &expected != proof {
        return Err(CryptoError::BatchProofMismatch);
    }
    Ok(())
}

/// Per-token redemption proof binding a token preimage to a payload hash.
///
/// The settlement server recomputes this from its view of the token to
/// check the redeemer actually holds the preimage.
pub fn redeem_proof(preimage: &TokenPreimage, payload: &[u8]) -> [u8; 32] {
    let key = blake3::derive_key(contexts::REDEEM_PROOF, &preimage.output);
    let message = blake3::encode_multi_field(&[&preimage.serial, payload]);
    blake3::keyed_hash(&key, &message)
}

fn batch_transcript(
    public_key: &[u8; 32],
    blinded: &[BlindedToken],
    signed: &[SignedToken],
) -> [u8; 32] {
    let mut fields: Vec<&[u8]> = Vec::with_capacity(1 + blinded.len() * 2);
    fields.push(public_key);
    for (b, s) in blinded.iter().zip(signed) {
        fields.push(&b.bytes);
        fields.push(&s.bytes);
    }
    blake3::derive_key(contexts::BATCH_PROOF, &blake3::encode_multi_field(&fields))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blind_evaluate_unblind() {
        let issuer = IssuerKey::generate();
        let (blinded, state) = blind();
        let signed = issuer.evaluate(&blinded);
        let preimage = unblind(&signed, &state);
        assert_eq!(preimage.output.len(), 32);
        assert_ne!(preimage.output, [0u8; 32]);
    }

    #[test]
    fn test_distinct_tokens_distinct_outputs() {
        let issuer = IssuerKey::generate();
        let (b1, s1) = blind();
        let (b2, s2) = blind();
        assert_ne!(b1, b2);

        let p1 = unblind(&issuer.evaluate(&b1), &s1);
        let p2 = unblind(&issuer.evaluate(&b2), &s2);
        assert_ne!(p1.output, p2.output);
    }

    #[test]
    fn test_batch_proof_roundtrip() {
        let issuer = IssuerKey::generate();
        let pairs: Vec<_> = (0..5).map(|_| blind()).collect();
        let blinded: Vec<_> = pairs.iter().map(|(b, _)| b.clone()).collect();
        let signed: Vec<_> = blinded.iter().map(|b| issuer.evaluate(b)).collect();

        let proof = issuer.batch_proof(&blinded, &signed);
        verify_batch_proof(&issuer.public_key(), &blinded, &signed, &proof)
            .expect("proof should verify");
    }

    #[test]
    fn test_batch_proof_rejects_substitution() {
        let issuer = IssuerKey::generate();
        let other = IssuerKey::generate();

        let (blinded, _state) = blind();
        let signed = issuer.evaluate(&blinded);
        let proof = issuer.batch_proof(
            std::slice::from_ref(&blinded),
            std::slice::from_ref(&signed),
        );

        // Substitute a token signed by a different key
        let forged = other.evaluate(&blinded);
        let result = verify_batch_proof(
            &issuer.public_key(),
            std::slice::from_ref(&blinded),
            std::slice::from_ref(&forged),
            &proof,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_batch_proof_rejects_count_mismatch() {
        let issuer = IssuerKey::generate();
        let (blinded, _state) = blind();
        let signed = issuer.evaluate(&blinded);
        let proof = issuer.batch_proof(
            std::slice::from_ref(&blinded),
            std::slice::from_ref(&signed),
        );

        let result = verify_batch_proof(&issuer.public_key(), &[], &[signed], &proof);
        assert!(result.is_err());
    }

    #[test]
    fn test_redeem_proof_payload_bound() {
        let issuer = IssuerKey::generate();
        let (blinded, state) = blind();
        let preimage = unblind(&issuer.evaluate(&blinded), &state);

        let p1 = redeem_proof(&preimage, b"payload-a");
        let p2 = redeem_proof(&preimage, b"payload-b");
        assert_ne!(p1, p2);
        assert_eq!(p1, redeem_proof(&preimage, b"payload-a"));
    }

    #[test]
    fn test_issuer_key_from_bytes() {
        let issuer = IssuerKey::generate();
        let restored = IssuerKey::from_bytes(&issuer.key_bytes).expect("from_bytes");
        assert_eq!(issuer.public_key(), restored.public_key());
    }

    #[test]
    fn test_invalid_key_length_rejected() {
        assert!(IssuerKey::from_bytes(&[0u8; 16]).is_err());
    }

    #[test]
    fn test_blind_state_persistence_roundtrip() {
        let issuer = IssuerKey::generate();
        let (blinded, state) = blind();
        let signed = issuer.evaluate(&blinded);

        let restored = BlindState::from_bytes(&state.to_bytes()).expect("restore");
        assert_eq!(unblind(&signed, &state), unblind(&signed, &restored));
    }

    #[test]
    fn test_blind_state_wrong_length_rejected() {
        assert!(BlindState::from_bytes(&[0u8; 32]).is_err());
    }
}
