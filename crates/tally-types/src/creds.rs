//! Credential batch and token lifecycle types.
//!
//! A [`CredsBatchStatus`] advances `Blinded → Claimed → SignedTokensReceived
//! → Finished`; `Corrupted` is reachable from any non-terminal state when
//! validation fails irrecoverably. Each transition is persisted before the
//! corresponding network step so a crash resumes from durable state.

use serde::{Deserialize, Serialize};

use crate::{RecordId, TypeError};

/// What produced a credential batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// A claimed promotion.
    Promotion,
    /// A SKU order.
    Order,
}

impl TriggerType {
    /// Stable string form used in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Promotion => "promotion",
            Self::Order => "order",
        }
    }

    /// Decode the stored string form.
    pub fn parse(value: &str) -> crate::Result<Self> {
        match value {
            "promotion" => Ok(Self::Promotion),
            "order" => Ok(Self::Order),
            other => Err(TypeError::UnknownValue {
                kind: "trigger type",
                value: other.to_string(),
            }),
        }
    }
}

/// Lifecycle state of a credential batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredsBatchStatus {
    /// Tokens generated and blinded locally.
    Blinded,
    /// Blinded tokens submitted; claim id received.
    Claimed,
    /// Signed tokens fetched from the server.
    SignedTokensReceived,
    /// Unblinded and stored; terminal success.
    Finished,
    /// Invariant violation; excluded from automatic processing.
    Corrupted,
}

impl CredsBatchStatus {
    /// Stable string form used in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blinded => "blinded",
            Self::Claimed => "claimed",
            Self::SignedTokensReceived => "signed_tokens_received",
            Self::Finished => "finished",
            Self::Corrupted => "corrupted",
        }
    }

    /// Decode the stored string form.
    pub fn parse(value: &str) -> crate::Result<Self> {
        match value {
            "blinded" => Ok(Self::Blinded),
            "claimed" => Ok(Self::Claimed),
            "signed_tokens_received" => Ok(Self::SignedTokensReceived),
            "finished" => Ok(Self::Finished),
            "corrupted" => Ok(Self::Corrupted),
            other => Err(TypeError::UnknownValue {
                kind: "creds batch status",
                value: other.to_string(),
            }),
        }
    }

    /// Whether this status is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Corrupted)
    }
}

/// A batch of credentials associated with one trigger.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CredsBatch {
    /// Batch id.
    pub batch_id: RecordId,
    /// The promotion id or order id that produced this batch.
    pub trigger_id: RecordId,
    /// What kind of trigger produced it.
    pub trigger_type: TriggerType,
    /// Current lifecycle state.
    pub status: CredsBatchStatus,
    /// Base64 serialized blind states, in generation order. Needed to
    /// unblind the signed response, so they must survive restarts.
    pub creds: Vec<String>,
    /// Base64 blinded token values, same order.
    pub blinded_tokens: Vec<String>,
    /// Base64 server-signed values, same order; empty until received.
    pub signed_tokens: Vec<String>,
    /// The server's issuing public key, hex.
    pub public_key: String,
    /// Claim id returned by the server; empty until claimed.
    pub claim_id: String,
}

/// Spend state of an unblinded token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    /// Available for redemption.
    Spendable,
    /// Reserved for an in-flight redemption.
    Reserved,
    /// Consumed by a completed redemption.
    Spent,
}

impl TokenState {
    /// Stable string form used in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spendable => "spendable",
            Self::Reserved => "reserved",
            Self::Spent => "spent",
        }
    }

    /// Decode the stored string form.
    pub fn parse(value: &str) -> crate::Result<Self> {
        match value {
            "spendable" => Ok(Self::Spendable),
            "reserved" => Ok(Self::Reserved),
            "spent" => Ok(Self::Spent),
            other => Err(TypeError::UnknownValue {
                kind: "token state",
                value: other.to_string(),
            }),
        }
    }
}

/// A spendable credential held by the client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UnblindedToken {
    /// Row id assigned by the store.
    pub token_id: i64,
    /// Face value in micro-tokens.
    pub value: u64,
    /// Issuing public key, hex.
    pub public_key: String,
    /// The batch this token came from.
    pub batch_id: RecordId,
    /// Unix expiry timestamp, if any.
    pub expires_at: Option<u64>,
    /// Current spend state.
    pub state: TokenState,
    /// The redemption holding the reservation, when state is Reserved.
    pub redeem_id: Option<RecordId>,
    /// Base64 unblinded token value.
    pub token_value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            CredsBatchStatus::Blinded,
            CredsBatchStatus::Claimed,
            CredsBatchStatus::SignedTokensReceived,
            CredsBatchStatus::Finished,
            CredsBatchStatus::Corrupted,
        ] {
            assert_eq!(
                CredsBatchStatus::parse(status.as_str()).expect("parse"),
                status
            );
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(CredsBatchStatus::Finished.is_terminal());
        assert!(CredsBatchStatus::Corrupted.is_terminal());
        assert!(!CredsBatchStatus::Claimed.is_terminal());
    }

    #[test]
    fn test_token_state_roundtrip() {
        for state in [TokenState::Spendable, TokenState::Reserved, TokenState::Spent] {
            assert_eq!(TokenState::parse(state.as_str()).expect("parse"), state);
        }
    }
}
