//! Promotion records.
//!
//! A promotion is fetched from the promotion server, claimed, attested, and
//! then drives one credential batch (`trigger_type = Promotion`). Expired
//! promotions move to `Over` and are excluded from further processing.

use serde::{Deserialize, Serialize};

use crate::{RecordId, TypeError};

/// Promotion lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionStatus {
    /// Fetched and claimable.
    Active,
    /// Claim attested; credential issuance in progress.
    Attested,
    /// Tokens unblinded and spendable; terminal success.
    Finished,
    /// Expired or exhausted server-side.
    Over,
    /// Invariant violation during issuance.
    Corrupted,
}

impl PromotionStatus {
    /// Stable string form used in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Attested => "attested",
            Self::Finished => "finished",
            Self::Over => "over",
            Self::Corrupted => "corrupted",
        }
    }

    /// Decode the stored string form.
    pub fn parse(value: &str) -> crate::Result<Self> {
        match value {
            "active" => Ok(Self::Active),
            "attested" => Ok(Self::Attested),
            "finished" => Ok(Self::Finished),
            "over" => Ok(Self::Over),
            "corrupted" => Ok(Self::Corrupted),
            other => Err(TypeError::UnknownValue {
                kind: "promotion status",
                value: other.to_string(),
            }),
        }
    }
}

/// Kind of promotion offered by the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionKind {
    /// Unconditional grant.
    Ugp,
    /// Advertising-earnings grant.
    Ads,
}

impl PromotionKind {
    /// Stable string form used in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ugp => "ugp",
            Self::Ads => "ads",
        }
    }

    /// Decode the stored string form.
    pub fn parse(value: &str) -> crate::Result<Self> {
        match value {
            "ugp" => Ok(Self::Ugp),
            "ads" => Ok(Self::Ads),
            other => Err(TypeError::UnknownValue {
                kind: "promotion kind",
                value: other.to_string(),
            }),
        }
    }
}

/// A value grant offered by the promotion server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Promotion {
    /// Server-assigned promotion id.
    pub promotion_id: RecordId,
    /// Grant kind.
    pub kind: PromotionKind,
    /// Lifecycle state.
    pub status: PromotionStatus,
    /// Approximate grant value in micro-tokens.
    pub approximate_value: u64,
    /// Number of credentials this promotion issues.
    pub suggested_count: u32,
    /// Unix expiry timestamp.
    pub expires_at: u64,
    /// Claim id, empty until claimed.
    pub claim_id: String,
}

impl Promotion {
    /// Whether the promotion has expired at `now`.
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at != 0 && self.expires_at <= now
    }
}
