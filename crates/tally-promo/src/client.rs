//! Promotion server boundary.

use serde::{Deserialize, Serialize};

use tally_creds::ClientError;
use tally_types::promotion::PromotionKind;

/// A promotion as the server advertises it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PromotionDescriptor {
    /// Server-assigned promotion id.
    pub promotion_id: String,
    /// Grant kind.
    pub kind: PromotionKind,
    /// Approximate grant value in micro-tokens.
    pub approximate_value: u64,
    /// Number of credentials the promotion issues.
    pub suggested_count: u32,
    /// Unix expiry timestamp; zero means no expiry.
    pub expires_at: u64,
}

/// What the manager needs from the promotion server.
///
/// Implementors provide the actual HTTP I/O; mocks implement this in
/// tests.
pub trait PromotionClient: Send + Sync {
    /// Fetch the promotions currently offered to this wallet.
    fn fetch_promotions(&self) -> std::result::Result<Vec<PromotionDescriptor>, ClientError>;

    /// Claim a promotion, returning the server's claim id.
    fn claim_promotion(
        &self,
        promotion_id: &str,
        payload: &[u8],
    ) -> std::result::Result<String, ClientError>;

    /// Submit the attestation solution for a claimed promotion.
    fn attest_promotion(
        &self,
        promotion_id: &str,
        solution: &[u8],
    ) -> std::result::Result<(), ClientError>;
}
