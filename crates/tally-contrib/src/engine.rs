//! The reconciliation engine: settles queued contributions.
//!
//! Each queue entry is settled by a persisted state machine:
//! `Start → BalanceCheck → FundingSplit → Prepare → Redeem → Complete`,
//! with `Failed` as the terminal failure step. The step is written to the
//! store before the work it gates, so a restart resumes at the last
//! durable step.
//!
//! Funding draws on the credential vault first; any remainder routes to
//! the externally linked wallet, split pro-rata across recipients so no
//! recipient is dropped because one source ran out. Unverified
//! recipients are never paid directly; their shares are held back as
//! pending contributions and retried when verification flips.

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

use tally_creds::{ClientError, CredentialVault, CredsError, PaymentClient};
use tally_db::queries::{contribution, pending, publisher, stamp, tokens};
use tally_db::Store;
use tally_types::config::RetryConfig;
use tally_types::contribution::{
    Allocation, Contribution, ContributionKind, ContributionStep, PublisherPayout, QueueEntry,
};

pub use tally_types::contribution::FailureReason;

use crate::queue::ContributionQueue;
use crate::{backoff, split, voting, ContribError, Result};

/// Seconds until the next auto-contribute cycle after one completes.
const RECONCILE_INTERVAL_SECS: u64 = 30 * 24 * 60 * 60;

/// The externally linked wallet funding path.
///
/// Implementors provide the actual transfer I/O; mocks implement this in
/// tests.
pub trait ExternalWallet: Send + Sync {
    /// Current balance in micro-tokens.
    fn balance(&self) -> std::result::Result<u64, ClientError>;

    /// Transfer `amount` micro-tokens to a publisher.
    fn transfer(&self, publisher_key: &str, amount: u64)
        -> std::result::Result<(), ClientError>;
}

/// Outcome of one engine cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The queue is empty.
    Idle,
    /// Balance cannot cover the entry; re-attempted next cycle.
    NotEnoughFunds {
        /// Amount the entry requires.
        needed: u64,
        /// Total balance across both funding sources.
        available: u64,
    },
    /// The settlement reached `Complete` and the entry was removed.
    Completed {
        /// The settlement record id.
        contribution_id: String,
    },
    /// Every share went to pending contributions; nothing was paid.
    Redirected {
        /// Number of shares held back.
        held: usize,
    },
    /// A step failed transiently; retry after the returned delay.
    RetryScheduled {
        /// The settlement record id.
        contribution_id: String,
        /// Jittered delay before the next attempt, in seconds.
        delay_secs: u64,
    },
    /// The settlement reached `Failed` and the entry was removed.
    /// Reported once in normal operation; reaping a crash-interrupted
    /// settlement may repeat it.
    Failed {
        /// The settlement record id.
        contribution_id: String,
        /// Why it failed.
        reason: FailureReason,
    },
}

/// Drains the contribution queue against the vault and external wallet.
pub struct ReconciliationEngine<C, W> {
    vault: CredentialVault<C>,
    wallet: W,
    retry: RetryConfig,
}

impl<C: PaymentClient, W: ExternalWallet> ReconciliationEngine<C, W> {
    /// Build an engine over a vault, wallet, and retry policy.
    pub fn new(vault: CredentialVault<C>, wallet: W, retry: RetryConfig) -> Self {
        Self {
            vault,
            wallet,
            retry,
        }
    }

    /// The vault this engine draws on.
    pub fn vault(&self) -> &CredentialVault<C> {
        &self.vault
    }

    /// Settle (or advance) the oldest queued entry.
    ///
    /// Resumes an unfinished settlement for the entry if one exists,
    /// otherwise starts a new one. The queue entry is removed only when
    /// the settlement reaches a terminal step. An entry whose settlement
    /// is already terminal (a crash interrupted the final queue removal)
    /// is reaped without settling again.
    pub fn process_next(&self, store: &mut Store, now: u64) -> Result<CycleOutcome> {
        let Some(entry) = ContributionQueue::peek_first(store)? else {
            return Ok(CycleOutcome::Idle);
        };

        let contribution = match contribution::for_queue_entry(store.conn(), &entry.id)? {
            Some(existing) => existing,
            None => {
                let fresh = Contribution {
                    id: new_contribution_id(),
                    queue_entry_id: entry.id.clone(),
                    kind: entry.kind,
                    total_amount: entry.total_amount,
                    step: ContributionStep::Start,
                    retry_level: 0,
                    created_at: now,
                    completed_at: None,
                    failure_reason: None,
                    publishers: Vec::new(),
                };
                contribution::insert(store.conn(), &fresh)?;
                fresh
            }
        };

        self.drive(store, &entry, contribution, now)
    }

    fn drive(
        &self,
        store: &mut Store,
        entry: &QueueEntry,
        mut c: Contribution,
        now: u64,
    ) -> Result<CycleOutcome> {
        loop {
            match c.step {
                ContributionStep::Start => {
                    self.advance(store, &mut c, ContributionStep::BalanceCheck)?;
                }
                ContributionStep::BalanceCheck => {
                    let available =
                        self.vault.spendable_balance(store, now)? + self.wallet.balance()?;
                    if available < c.total_amount {
                        if c.kind == ContributionKind::OneTimeTip {
                            // Tips never retry phase-1 failures
                            return self.fail(store, entry, &c, FailureReason::TipError, now);
                        }
                        info!(
                            id = %c.id,
                            needed = c.total_amount,
                            available,
                            "not enough funds, deferring to next cycle"
                        );
                        return Ok(CycleOutcome::NotEnoughFunds {
                            needed: c.total_amount,
                            available,
                        });
                    }
                    self.advance(store, &mut c, ContributionStep::FundingSplit)?;
                }
                ContributionStep::FundingSplit => {
                    let (payouts, held) = self.resolve_recipients(store, entry, now)?;
                    if payouts.is_empty() {
                        contribution::update_step(
                            store.conn(),
                            &c.id,
                            ContributionStep::Complete,
                            c.retry_level,
                        )?;
                        contribution::mark_completed(store.conn(), &c.id, now)?;
                        ContributionQueue::remove(store, &entry.id)?;
                        info!(id = %c.id, held, "all shares held pending verification");
                        return Ok(CycleOutcome::Redirected { held });
                    }
                    contribution::set_publishers(store.conn(), &c.id, &payouts)?;
                    self.advance(store, &mut c, ContributionStep::Prepare)?;
                }
                ContributionStep::Prepare => {
                    self.prepare(store, &c, now)?;
                    self.advance(store, &mut c, ContributionStep::Redeem)?;
                }
                ContributionStep::Redeem => {
                    return match self.settle(store, &c) {
                        Ok(paid) => self.complete(store, entry, &c, paid, now),
                        Err(e) if is_transient(&e) => self.retry_or_fail(store, entry, &c, e, now),
                        Err(e) => Err(e),
                    };
                }
                ContributionStep::Complete => {
                    // Settled, but the queue entry outlived it
                    ContributionQueue::remove(store, &entry.id)?;
                    return Ok(CycleOutcome::Completed {
                        contribution_id: c.id,
                    });
                }
                ContributionStep::Failed => {
                    ContributionQueue::remove(store, &entry.id)?;
                    return Ok(CycleOutcome::Failed {
                        contribution_id: c.id,
                        reason: c.failure_reason.unwrap_or(FailureReason::RetryExhausted),
                    });
                }
            }
        }
    }

    fn advance(&self, store: &Store, c: &mut Contribution, step: ContributionStep) -> Result<()> {
        contribution::update_step(store.conn(), &c.id, step, c.retry_level)?;
        c.step = step;
        Ok(())
    }

    /// Classify recipients and decide per-publisher payouts.
    ///
    /// Unverified shares are written to pending contributions and do not
    /// appear in the returned payouts.
    fn resolve_recipients(
        &self,
        store: &Store,
        entry: &QueueEntry,
        now: u64,
    ) -> Result<(Vec<PublisherPayout>, usize)> {
        let mut verified: Vec<&Allocation> = Vec::new();
        let mut held = 0usize;
        let mut held_amount = 0u64;

        for allocation in &entry.allocations {
            if publisher::is_verified(store.conn(), &allocation.publisher_key)? {
                verified.push(allocation);
            } else {
                let amount = nominal_amount(entry, allocation);
                pending::insert(
                    store.conn(),
                    &allocation.publisher_key,
                    amount,
                    entry.kind,
                    now,
                )?;
                held += 1;
                held_amount += amount;
            }
        }

        if verified.is_empty() {
            return Ok((Vec::new(), held));
        }

        let payouts = match entry.kind {
            ContributionKind::AutoContribute => {
                let remaining = entry.total_amount.saturating_sub(held_amount);
                self.auto_contribute_payouts(&verified, remaining)
            }
            ContributionKind::RecurringTip | ContributionKind::OneTimeTip => verified
                .iter()
                .map(|a| PublisherPayout {
                    publisher_key: a.publisher_key.clone(),
                    amount: a.weight as u64,
                })
                .collect(),
        };

        let payouts: Vec<PublisherPayout> =
            payouts.into_iter().filter(|p| p.amount > 0).collect();
        Ok((payouts, held))
    }

    /// Ballot assignment over the verified publishers' weights; each
    /// ballot is worth one token.
    ///
    /// Weights that form an explicit percent breakdown (summing to 100)
    /// are assigned deterministically. Raw attention scores are sampled
    /// per ballot instead, so individual cycles vary while the long-run
    /// split tracks the scores.
    fn auto_contribute_payouts(
        &self,
        verified: &[&Allocation],
        remaining: u64,
    ) -> Vec<PublisherPayout> {
        let token_value = self.vault.token_value();
        let ballots = (remaining / token_value) as u32;
        if ballots == 0 {
            return Vec::new();
        }

        let weights: Vec<f64> = verified.iter().map(|a| a.weight).collect();
        let weight_sum: f64 = weights.iter().sum();
        let votes = if (weight_sum - 100.0).abs() < 1e-6 {
            voting::assign_votes(&weights, ballots)
        } else {
            let mut rng = StdRng::from_entropy();
            voting::sample_votes(&weights, ballots, &mut rng)
        };

        verified
            .iter()
            .zip(&votes)
            .map(|(a, &v)| PublisherPayout {
                publisher_key: a.publisher_key.clone(),
                amount: u64::from(v) * token_value,
            })
            .collect()
    }

    /// Reserve the vault's share of the payout ahead of redemption.
    ///
    /// A retry after a redeemed-then-interrupted attempt only reserves
    /// up to the unpaid remainder; value the spent tokens already
    /// covered is never drawn a second time.
    fn prepare(&self, store: &mut Store, c: &Contribution, now: u64) -> Result<()> {
        let payout_total = payout_total(store, &c.id)?;
        let already_redeemed = tokens::redeemed_total(store.conn(), &c.id)?;
        let outstanding = payout_total.saturating_sub(already_redeemed);
        let creds_balance = self.vault.spendable_balance(store, now)?;
        let creds_amount = creds_balance.min(outstanding);

        if creds_amount > 0 && tokens::reserved_for(store.conn(), &c.id)?.is_empty() {
            tokens::reserve(store.conn_mut(), &c.id, creds_amount, now)?;
        }
        Ok(())
    }

    /// Redeem the reservation, then cover the remainder from the wallet.
    ///
    /// Returns the total amount paid out.
    fn settle(&self, store: &mut Store, c: &Contribution) -> Result<u64> {
        let payouts = contribution::publishers(store.conn(), &c.id)?;
        let total: u64 = payouts.iter().map(|p| p.amount).sum();

        // Tokens spent by an earlier attempt count against the total,
        // so a retry only settles the unpaid remainder.
        let already_redeemed = tokens::redeemed_total(store.conn(), &c.id)?;
        let reserved = tokens::reserved_for(store.conn(), &c.id)?;
        let reserved_value: u64 = reserved.iter().map(|t| t.value).sum();
        let creds_part = (already_redeemed + reserved_value).min(total);
        if !reserved.is_empty() {
            self.vault.redeem_reserved(store, &c.id, c.id.as_bytes())?;
        }

        let external_part = total - creds_part;
        if external_part > 0 {
            let amounts: Vec<u64> = payouts.iter().map(|p| p.amount).collect();
            let external_shares = split::pro_rata(&amounts, external_part);
            for (payout, &share) in payouts.iter().zip(&external_shares) {
                if share > 0 {
                    self.wallet
                        .transfer(&payout.publisher_key, share)
                        .map_err(ContribError::Wallet)?;
                }
            }
        }
        Ok(total)
    }

    fn complete(
        &self,
        store: &mut Store,
        entry: &QueueEntry,
        c: &Contribution,
        paid: u64,
        now: u64,
    ) -> Result<CycleOutcome> {
        contribution::update_step(store.conn(), &c.id, ContributionStep::Complete, c.retry_level)?;
        contribution::mark_completed(store.conn(), &c.id, now)?;
        contribution::record_balance_report(store.conn(), c.kind, paid, now)?;
        ContributionQueue::remove(store, &entry.id)?;
        if c.kind == ContributionKind::AutoContribute {
            stamp::set(store.conn(), now + RECONCILE_INTERVAL_SECS)?;
        }
        info!(id = %c.id, paid, "contribution settled");
        Ok(CycleOutcome::Completed {
            contribution_id: c.id.clone(),
        })
    }

    /// Back off for a transient settlement failure, or end the
    /// settlement once the ladder is exhausted.
    ///
    /// Retries resume from `Prepare` so a released reservation is
    /// rebuilt before the next redemption attempt.
    fn retry_or_fail(
        &self,
        store: &mut Store,
        entry: &QueueEntry,
        c: &Contribution,
        cause: ContribError,
        now: u64,
    ) -> Result<CycleOutcome> {
        if backoff::exhausted(&self.retry, c.retry_level) {
            warn!(id = %c.id, error = %cause, "retry ladder exhausted");
            return self.fail(store, entry, c, FailureReason::RetryExhausted, now);
        }

        let mut rng = StdRng::from_entropy();
        let delay_secs = backoff::jittered_delay(&self.retry, c.retry_level, &mut rng);
        contribution::update_step(
            store.conn(),
            &c.id,
            ContributionStep::Prepare,
            c.retry_level + 1,
        )?;
        warn!(
            id = %c.id,
            retry_level = c.retry_level + 1,
            delay_secs,
            error = %cause,
            "settlement step failed, retry scheduled"
        );
        Ok(CycleOutcome::RetryScheduled {
            contribution_id: c.id.clone(),
            delay_secs,
        })
    }

    /// Terminal failure: the step lands on `Failed`, the reason is
    /// persisted, and the queue entry is removed.
    fn fail(
        &self,
        store: &mut Store,
        entry: &QueueEntry,
        c: &Contribution,
        reason: FailureReason,
        now: u64,
    ) -> Result<CycleOutcome> {
        tokens::release(store.conn(), &c.id)?;
        contribution::update_step(store.conn(), &c.id, ContributionStep::Failed, c.retry_level)?;
        contribution::set_failure_reason(store.conn(), &c.id, reason)?;
        contribution::mark_completed(store.conn(), &c.id, now)?;
        ContributionQueue::remove(store, &entry.id)?;
        warn!(id = %c.id, ?reason, "contribution failed terminally");
        Ok(CycleOutcome::Failed {
            contribution_id: c.id.clone(),
            reason,
        })
    }

    /// Re-enqueue pending shares whose publishers became verified.
    ///
    /// Returns the number of shares put back into the queue.
    pub fn process_pending(&self, store: &Store, now: u64) -> Result<usize> {
        let mut requeued = 0usize;
        for held in pending::list(store.conn())? {
            if !publisher::is_verified(store.conn(), &held.publisher_key)? {
                continue;
            }
            // Row ids can be reused after deletion; the timestamp keeps
            // requeue ids distinct from earlier settled ones
            let entry = QueueEntry {
                id: format!("pending-{}-{}", held.id, held.created_at),
                kind: held.kind,
                total_amount: held.amount,
                partial: true,
                allocations: vec![Allocation {
                    publisher_key: held.publisher_key.clone(),
                    weight: match held.kind {
                        ContributionKind::AutoContribute => 100.0,
                        _ => held.amount as f64,
                    },
                }],
            };
            ContributionQueue::enqueue(store, &entry, now)?;
            pending::remove(store.conn(), held.id)?;
            info!(
                publisher = %held.publisher_key,
                amount = held.amount,
                "pending share requeued after verification"
            );
            requeued += 1;
        }
        Ok(requeued)
    }
}

/// An allocation's nominal share of the entry amount.
fn nominal_amount(entry: &QueueEntry, allocation: &Allocation) -> u64 {
    match entry.kind {
        ContributionKind::AutoContribute => {
            ((allocation.weight / 100.0) * entry.total_amount as f64).round() as u64
        }
        ContributionKind::RecurringTip | ContributionKind::OneTimeTip => allocation.weight as u64,
    }
}

fn payout_total(store: &Store, contribution_id: &str) -> Result<u64> {
    let payouts = contribution::publishers(store.conn(), contribution_id)?;
    Ok(payouts.iter().map(|p| p.amount).sum())
}

fn is_transient(error: &ContribError) -> bool {
    matches!(
        error,
        ContribError::Wallet(_) | ContribError::Creds(CredsError::Client(_))
    )
}

fn new_contribution_id() -> String {
    let mut bytes = [0u8; 16];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut bytes);
    hex::encode(bytes)
}
