//! Payment server boundary.
//!
//! The vault never talks to the network directly; it drives a
//! [`PaymentClient`] implementation. This keeps the batch state machine
//! testable without a live server and keeps transport concerns out of the
//! lifecycle logic.

use serde::{Deserialize, Serialize};

/// Error types for payment server calls.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The request did not reach the server or the connection dropped.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a non-success status.
    #[error("server rejected request: status {status}")]
    Rejected {
        /// HTTP-style status code.
        status: u16,
    },

    /// The response body could not be decoded.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// Signed tokens fetched after a claim settles server-side.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignedCredsResponse {
    /// Base64 signed token values, in submission order.
    pub signed_tokens: Vec<String>,
    /// Hex issuing public key.
    pub public_key: String,
    /// Hex batch proof over the whole signed set.
    pub batch_proof: String,
}

/// One token's contribution to a redemption request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RedeemCredential {
    /// Base64 token serial.
    pub serial: String,
    /// Hex redemption proof binding the token to the payload.
    pub proof: String,
    /// Hex issuing public key the server should verify against.
    pub public_key: String,
}

/// A redemption request covering one reservation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RedeemRequest {
    /// The redemption id the tokens were reserved under.
    pub redeem_id: String,
    /// The payload every credential's proof is bound to.
    pub payload: Vec<u8>,
    /// The reserved tokens being spent.
    pub credentials: Vec<RedeemCredential>,
    /// Hex ed25519 signature over the request (redeem id and payload).
    pub signature: String,
    /// Hex public key of the wallet's request signing key.
    pub signer_public_key: String,
}

/// What the vault needs from the payment server.
///
/// Implementors provide the actual HTTP I/O. Calls are blocking; the
/// caller decides whether to move them off the async runtime.
pub trait PaymentClient: Send + Sync {
    /// Submit blinded tokens for a trigger and return the claim id.
    ///
    /// Resubmitting the same blinded set for the same trigger must return
    /// the original claim id.
    fn claim_creds(
        &self,
        trigger_id: &str,
        blinded_tokens: &[String],
    ) -> std::result::Result<String, ClientError>;

    /// Fetch the signed tokens for a claim.
    ///
    /// Returns `None` while the server is still signing; the caller
    /// retries later from the `Claimed` state.
    fn fetch_signed_creds(
        &self,
        trigger_id: &str,
        claim_id: &str,
    ) -> std::result::Result<Option<SignedCredsResponse>, ClientError>;

    /// Redeem reserved tokens against the settlement endpoint.
    fn redeem(&self, request: &RedeemRequest) -> std::result::Result<(), ClientError>;
}
