//! Contribution queue entries and settlement records.
//!
//! A [`QueueEntry`] is created when a contribution is scheduled and removed
//! exactly once after the corresponding [`Contribution`] reaches a terminal
//! state. The contribution's [`ContributionStep`] is persisted after every
//! transition so a restart resumes at the last durable step.

use serde::{Deserialize, Serialize};

use crate::{MicroTokens, PublisherKey, RecordId, TypeError};

/// The kind of contribution being settled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContributionKind {
    /// Monthly attention-weighted contribution.
    AutoContribute,
    /// Recurring monthly tip with fixed per-publisher amounts.
    RecurringTip,
    /// Direct one-off tip.
    OneTimeTip,
}

impl ContributionKind {
    /// Stable string form used in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AutoContribute => "auto_contribute",
            Self::RecurringTip => "recurring_tip",
            Self::OneTimeTip => "one_time_tip",
        }
    }

    /// Decode the stored string form.
    pub fn parse(value: &str) -> crate::Result<Self> {
        match value {
            "auto_contribute" => Ok(Self::AutoContribute),
            "recurring_tip" => Ok(Self::RecurringTip),
            "one_time_tip" => Ok(Self::OneTimeTip),
            other => Err(TypeError::UnknownValue {
                kind: "contribution kind",
                value: other.to_string(),
            }),
        }
    }
}

/// Why a settlement ended in the failed step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// A one-time tip failed before settlement preparation; tips never
    /// retry phase-1 failures.
    TipError,
    /// The retry ladder for a settlement step was exhausted.
    RetryExhausted,
}

impl FailureReason {
    /// Stable string form used in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TipError => "tip_error",
            Self::RetryExhausted => "retry_exhausted",
        }
    }

    /// Decode the stored string form.
    pub fn parse(value: &str) -> crate::Result<Self> {
        match value {
            "tip_error" => Ok(Self::TipError),
            "retry_exhausted" => Ok(Self::RetryExhausted),
            other => Err(TypeError::UnknownValue {
                kind: "failure reason",
                value: other.to_string(),
            }),
        }
    }
}

/// Per-publisher weight within a queue entry.
///
/// For auto-contribute the weight is an explicit attention percent
/// (weights sum to 100) or a raw attention score; for tips it is a fixed
/// micro-token amount.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    /// The publisher receiving this share.
    pub publisher_key: PublisherKey,
    /// Percent (auto-contribute) or micro-token amount (tips).
    pub weight: f64,
}

/// A durable, FIFO-ordered pending contribution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Caller-assigned unique id; enqueueing the same id twice is a no-op.
    pub id: RecordId,
    /// What kind of contribution this is.
    pub kind: ContributionKind,
    /// Total amount to settle, in micro-tokens.
    pub total_amount: MicroTokens,
    /// Whether this entry is the remainder of a partially settled one.
    pub partial: bool,
    /// Ordered per-publisher allocations.
    pub allocations: Vec<Allocation>,
}

/// State-machine position of an in-flight settlement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContributionStep {
    /// Created, nothing attempted yet.
    Start,
    /// Checking total spendable balance against the entry amount.
    BalanceCheck,
    /// Splitting the amount across funding sources.
    FundingSplit,
    /// Reserving tokens / preparing the settlement payload.
    Prepare,
    /// Redeeming reserved value against the payment server.
    Redeem,
    /// Terminal success.
    Complete,
    /// Terminal failure.
    Failed,
}

impl ContributionStep {
    /// Stable string form used in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::BalanceCheck => "balance_check",
            Self::FundingSplit => "funding_split",
            Self::Prepare => "prepare",
            Self::Redeem => "redeem",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    /// Decode the stored string form.
    pub fn parse(value: &str) -> crate::Result<Self> {
        match value {
            "start" => Ok(Self::Start),
            "balance_check" => Ok(Self::BalanceCheck),
            "funding_split" => Ok(Self::FundingSplit),
            "prepare" => Ok(Self::Prepare),
            "redeem" => Ok(Self::Redeem),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            other => Err(TypeError::UnknownValue {
                kind: "contribution step",
                value: other.to_string(),
            }),
        }
    }

    /// Whether this step is terminal (no further transitions).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// A per-publisher payout decided during settlement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PublisherPayout {
    /// The publisher being paid.
    pub publisher_key: PublisherKey,
    /// Amount in micro-tokens.
    pub amount: MicroTokens,
}

/// A durable settlement record, persisted after every step transition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Contribution {
    /// Settlement id, distinct from the queue entry id.
    pub id: RecordId,
    /// The queue entry this settlement consumes.
    pub queue_entry_id: RecordId,
    /// The kind copied from the queue entry.
    pub kind: ContributionKind,
    /// Total amount in micro-tokens.
    pub total_amount: MicroTokens,
    /// Current state-machine step.
    pub step: ContributionStep,
    /// Retry level within the current step (0 = first attempt).
    pub retry_level: u32,
    /// Unix timestamp when the settlement was created.
    pub created_at: u64,
    /// Unix timestamp of terminal completion, if reached.
    pub completed_at: Option<u64>,
    /// Why the settlement failed, set when the step lands on `Failed`.
    pub failure_reason: Option<FailureReason>,
    /// Publishers actually paid, filled in during settlement.
    pub publishers: Vec<PublisherPayout>,
}

/// A contribution share held back because its publisher is unverified.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingContribution {
    /// Row id assigned by the store.
    pub id: i64,
    /// The unverified publisher.
    pub publisher_key: PublisherKey,
    /// Held amount in micro-tokens.
    pub amount: MicroTokens,
    /// The kind of the originating contribution.
    pub kind: ContributionKind,
    /// Unix timestamp when the share was held back.
    pub created_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for kind in [
            ContributionKind::AutoContribute,
            ContributionKind::RecurringTip,
            ContributionKind::OneTimeTip,
        ] {
            assert_eq!(ContributionKind::parse(kind.as_str()).expect("parse"), kind);
        }
    }

    #[test]
    fn test_step_roundtrip() {
        for step in [
            ContributionStep::Start,
            ContributionStep::BalanceCheck,
            ContributionStep::FundingSplit,
            ContributionStep::Prepare,
            ContributionStep::Redeem,
            ContributionStep::Complete,
            ContributionStep::Failed,
        ] {
            assert_eq!(ContributionStep::parse(step.as_str()).expect("parse"), step);
        }
    }

    #[test]
    fn test_failure_reason_roundtrip() {
        for reason in [FailureReason::TipError, FailureReason::RetryExhausted] {
            assert_eq!(
                FailureReason::parse(reason.as_str()).expect("parse"),
                reason
            );
        }
        assert!(FailureReason::parse("out_of_coffee").is_err());
    }

    #[test]
    fn test_unknown_step_rejected() {
        assert!(ContributionStep::parse("settling").is_err());
    }

    #[test]
    fn test_terminal_steps() {
        assert!(ContributionStep::Complete.is_terminal());
        assert!(ContributionStep::Failed.is_terminal());
        assert!(!ContributionStep::FundingSplit.is_terminal());
    }
}
