//! The promotion lifecycle driver.
//!
//! `Fetch → Claim → Attest` is a strict server-gated sequence. An
//! attested promotion drives exactly one credential batch
//! (`trigger_type = Promotion`); once that batch finishes, the
//! promotion's value is spendable and the promotion is terminal at
//! `Finished`.

use tracing::{info, warn};

use tally_creds::{CredentialVault, CredsError, PaymentClient};
use tally_db::queries::promotion;
use tally_db::Store;
use tally_types::creds::{CredsBatchStatus, TriggerType};
use tally_types::promotion::{Promotion, PromotionStatus};

use crate::client::PromotionClient;
use crate::{PromoError, Result};

/// Fetches, claims, and attests promotions, and drives the vault to turn
/// attested promotions into spendable balance.
pub struct PromotionManager<P, C> {
    promos: P,
    vault: CredentialVault<C>,
}

impl<P: PromotionClient, C: PaymentClient> PromotionManager<P, C> {
    /// Build a manager over a promotion client and credential vault.
    pub fn new(promos: P, vault: CredentialVault<C>) -> Self {
        Self { promos, vault }
    }

    /// The vault this manager feeds.
    pub fn vault(&self) -> &CredentialVault<C> {
        &self.vault
    }

    /// Fetch current promotions, persist them, and expire stale ones.
    ///
    /// Refreshing never regresses local lifecycle state; already-expired
    /// promotions move to `Over` and are excluded from the returned set.
    pub fn refresh(&self, store: &Store, now: u64) -> Result<Vec<Promotion>> {
        let fetched = self.promos.fetch_promotions()?;
        let count = fetched.len();
        for descriptor in fetched {
            promotion::upsert(
                store.conn(),
                &Promotion {
                    promotion_id: descriptor.promotion_id,
                    kind: descriptor.kind,
                    status: PromotionStatus::Active,
                    approximate_value: descriptor.approximate_value,
                    suggested_count: descriptor.suggested_count,
                    expires_at: descriptor.expires_at,
                    claim_id: String::new(),
                },
            )?;
        }
        let expired = promotion::mark_expired_over(store.conn(), now)?;
        info!(fetched = count, expired, "promotions refreshed");
        Ok(promotion::active(store.conn(), now)?)
    }

    /// Claim an active promotion and submit its attestation solution.
    pub fn claim(
        &self,
        store: &Store,
        promotion_id: &str,
        payload: &[u8],
        solution: &[u8],
        now: u64,
    ) -> Result<Promotion> {
        let promo = self.load(store, promotion_id)?;
        if promo.is_expired(now) {
            promotion::update_status(store.conn(), promotion_id, PromotionStatus::Over)?;
            return Err(PromoError::WrongStatus {
                promotion_id: promotion_id.to_string(),
                status: PromotionStatus::Over.as_str(),
                expected: PromotionStatus::Active.as_str(),
            });
        }
        if promo.status != PromotionStatus::Active {
            return Err(PromoError::WrongStatus {
                promotion_id: promotion_id.to_string(),
                status: promo.status.as_str(),
                expected: PromotionStatus::Active.as_str(),
            });
        }

        let claim_id = self.promos.claim_promotion(promotion_id, payload)?;
        promotion::set_claim_id(store.conn(), promotion_id, &claim_id)?;

        self.promos.attest_promotion(promotion_id, solution)?;
        promotion::update_status(store.conn(), promotion_id, PromotionStatus::Attested)?;
        info!(promotion_id, %claim_id, "promotion claimed and attested");

        self.load(store, promotion_id)
    }

    /// Drive credential issuance for an attested promotion.
    ///
    /// Returns the promotion's resulting status. `Attested` means the
    /// issuing server has not finished signing; call again later.
    pub fn process(
        &self,
        store: &mut Store,
        promotion_id: &str,
        now: u64,
    ) -> Result<PromotionStatus> {
        let promo = self.load(store, promotion_id)?;
        match promo.status {
            PromotionStatus::Attested => {}
            PromotionStatus::Finished
            | PromotionStatus::Over
            | PromotionStatus::Corrupted => return Ok(promo.status),
            PromotionStatus::Active => {
                return Err(PromoError::WrongStatus {
                    promotion_id: promotion_id.to_string(),
                    status: promo.status.as_str(),
                    expected: PromotionStatus::Attested.as_str(),
                })
            }
        }

        let count = promo.suggested_count.max(1) as usize;
        self.vault
            .start_batch(store, promotion_id, TriggerType::Promotion, count)?;

        let expires = (promo.expires_at != 0).then_some(promo.expires_at);
        match self
            .vault
            .process_batch(store, promotion_id, TriggerType::Promotion, expires)
        {
            Ok(CredsBatchStatus::Finished) => {
                promotion::update_status(store.conn(), promotion_id, PromotionStatus::Finished)?;
                info!(promotion_id, "promotion value unlocked");
                Ok(PromotionStatus::Finished)
            }
            Ok(_) => Ok(PromotionStatus::Attested),
            Err(CredsError::BatchCorrupted { reason, .. }) => {
                warn!(promotion_id, %reason, "promotion batch corrupted");
                promotion::update_status(store.conn(), promotion_id, PromotionStatus::Corrupted)?;
                Ok(PromotionStatus::Corrupted)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn load(&self, store: &Store, promotion_id: &str) -> Result<Promotion> {
        promotion::get(store.conn(), promotion_id)?
            .ok_or_else(|| PromoError::UnknownPromotion(promotion_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;

    use tally_creds::client::{ClientError, RedeemRequest, SignedCredsResponse};
    use tally_crypto::blind::{BlindedToken, IssuerKey, SignedToken};
    use tally_types::promotion::PromotionKind;

    use crate::client::PromotionDescriptor;

    use super::*;

    const TOKEN_VALUE: u64 = 250_000;

    struct MockPromoServer {
        offered: Vec<PromotionDescriptor>,
        fail_attest: AtomicBool,
        claims: Mutex<Vec<String>>,
    }

    impl MockPromoServer {
        fn offering(offered: Vec<PromotionDescriptor>) -> Self {
            Self {
                offered,
                fail_attest: AtomicBool::new(false),
                claims: Mutex::new(Vec::new()),
            }
        }
    }

    impl PromotionClient for MockPromoServer {
        fn fetch_promotions(&self) -> std::result::Result<Vec<PromotionDescriptor>, ClientError> {
            Ok(self.offered.clone())
        }

        fn claim_promotion(
            &self,
            promotion_id: &str,
            _payload: &[u8],
        ) -> std::result::Result<String, ClientError> {
            self.claims
                .lock()
                .expect("claims lock")
                .push(promotion_id.to_string());
            Ok(format!("claim-{promotion_id}"))
        }

        fn attest_promotion(
            &self,
            _promotion_id: &str,
            _solution: &[u8],
        ) -> std::result::Result<(), ClientError> {
            if self.fail_attest.load(Ordering::SeqCst) {
                return Err(ClientError::Rejected { status: 403 });
            }
            Ok(())
        }
    }

    /// Payment server that signs with a real issuer key.
    struct MockPaymentServer {
        issuer: IssuerKey,
        ready: AtomicBool,
        claims: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl MockPaymentServer {
        fn new() -> Self {
            Self {
                issuer: IssuerKey::generate(),
                ready: AtomicBool::new(true),
                claims: Mutex::new(Vec::new()),
            }
        }
    }

    impl PaymentClient for MockPaymentServer {
        fn claim_creds(
            &self,
            trigger_id: &str,
            blinded_tokens: &[String],
        ) -> std::result::Result<String, ClientError> {
            self.claims
                .lock()
                .expect("claims lock")
                .push((trigger_id.to_string(), blinded_tokens.to_vec()));
            Ok(format!("creds-claim-{trigger_id}"))
        }

        fn fetch_signed_creds(
            &self,
            trigger_id: &str,
            _claim_id: &str,
        ) -> std::result::Result<Option<SignedCredsResponse>, ClientError> {
            if !self.ready.load(Ordering::SeqCst) {
                return Ok(None);
            }
            let claims = self.claims.lock().expect("claims lock");
            let (_, blinded_b64) = claims
                .iter()
                .find(|(t, _)| t == trigger_id)
                .ok_or_else(|| ClientError::MalformedResponse("unknown trigger".into()))?;

            let blinded: Vec<BlindedToken> = blinded_b64
                .iter()
                .map(|b| BlindedToken {
                    bytes: BASE64.decode(b).expect("valid base64"),
                })
                .collect();
            let signed: Vec<SignedToken> =
                blinded.iter().map(|b| self.issuer.evaluate(b)).collect();
            let proof = self.issuer.batch_proof(&blinded, &signed);

            Ok(Some(SignedCredsResponse {
                signed_tokens: signed.iter().map(|s| BASE64.encode(&s.bytes)).collect(),
                public_key: hex::encode(self.issuer.public_key()),
                batch_proof: hex::encode(proof),
            }))
        }

        fn redeem(&self, _request: &RedeemRequest) -> std::result::Result<(), ClientError> {
            Ok(())
        }
    }

    fn descriptor(id: &str, count: u32, expires_at: u64) -> PromotionDescriptor {
        PromotionDescriptor {
            promotion_id: id.to_string(),
            kind: PromotionKind::Ugp,
            approximate_value: u64::from(count) * TOKEN_VALUE,
            suggested_count: count,
            expires_at,
        }
    }

    fn manager(
        offered: Vec<PromotionDescriptor>,
    ) -> PromotionManager<MockPromoServer, MockPaymentServer> {
        PromotionManager::new(
            MockPromoServer::offering(offered),
            CredentialVault::new(MockPaymentServer::new(), TOKEN_VALUE),
        )
    }

    #[test]
    fn test_refresh_excludes_expired() {
        let store = tally_db::open_memory().expect("open test db");
        let manager = manager(vec![
            descriptor("p-live", 4, 1_000),
            descriptor("p-dead", 4, 50),
        ]);

        let active = manager.refresh(&store, 100).expect("refresh");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].promotion_id, "p-live");

        // The expired promotion is stored but Over
        let dead = promotion::get(store.conn(), "p-dead")
            .expect("get")
            .expect("present");
        assert_eq!(dead.status, PromotionStatus::Over);
    }

    #[test]
    fn test_claim_and_attest() {
        let store = tally_db::open_memory().expect("open test db");
        let manager = manager(vec![descriptor("p-1", 4, 0)]);
        manager.refresh(&store, 100).expect("refresh");

        let promo = manager
            .claim(&store, "p-1", b"payload", b"solution", 100)
            .expect("claim");
        assert_eq!(promo.status, PromotionStatus::Attested);
        assert_eq!(promo.claim_id, "claim-p-1");
    }

    #[test]
    fn test_claim_unknown_promotion() {
        let store = tally_db::open_memory().expect("open test db");
        let manager = manager(Vec::new());
        let result = manager.claim(&store, "ghost", b"", b"", 100);
        assert!(matches!(result, Err(PromoError::UnknownPromotion(_))));
    }

    #[test]
    fn test_claim_twice_rejected() {
        let store = tally_db::open_memory().expect("open test db");
        let manager = manager(vec![descriptor("p-1", 4, 0)]);
        manager.refresh(&store, 100).expect("refresh");
        manager
            .claim(&store, "p-1", b"payload", b"solution", 100)
            .expect("first claim");

        let result = manager.claim(&store, "p-1", b"payload", b"solution", 100);
        assert!(matches!(result, Err(PromoError::WrongStatus { .. })));
    }

    #[test]
    fn test_expired_claim_moves_promotion_over() {
        let store = tally_db::open_memory().expect("open test db");
        let manager = manager(vec![descriptor("p-1", 4, 500)]);
        manager.refresh(&store, 100).expect("refresh");

        let result = manager.claim(&store, "p-1", b"", b"", 600);
        assert!(matches!(result, Err(PromoError::WrongStatus { .. })));
        let promo = promotion::get(store.conn(), "p-1")
            .expect("get")
            .expect("present");
        assert_eq!(promo.status, PromotionStatus::Over);
    }

    #[test]
    fn test_attest_failure_leaves_promotion_active() {
        let store = tally_db::open_memory().expect("open test db");
        let manager = manager(vec![descriptor("p-1", 4, 0)]);
        manager.refresh(&store, 100).expect("refresh");
        manager.promos.fail_attest.store(true, Ordering::SeqCst);

        let result = manager.claim(&store, "p-1", b"payload", b"solution", 100);
        assert!(matches!(result, Err(PromoError::Client(_))));

        // Claim id survives; the promotion can be re-attested
        let promo = promotion::get(store.conn(), "p-1")
            .expect("get")
            .expect("present");
        assert_eq!(promo.status, PromotionStatus::Active);
        assert_eq!(promo.claim_id, "claim-p-1");
    }

    #[test]
    fn test_process_unlocks_spendable_balance() {
        let mut store = tally_db::open_memory().expect("open test db");
        let manager = manager(vec![descriptor("p-1", 4, 0)]);
        manager.refresh(&store, 100).expect("refresh");
        manager
            .claim(&store, "p-1", b"payload", b"solution", 100)
            .expect("claim");

        let status = manager.process(&mut store, "p-1", 100).expect("process");
        assert_eq!(status, PromotionStatus::Finished);
        assert_eq!(
            manager.vault().spendable_balance(&store, 100).expect("balance"),
            4 * TOKEN_VALUE
        );
    }

    #[test]
    fn test_process_waits_for_signing() {
        let mut store = tally_db::open_memory().expect("open test db");
        let manager = manager(vec![descriptor("p-1", 2, 0)]);
        manager.refresh(&store, 100).expect("refresh");
        manager
            .claim(&store, "p-1", b"payload", b"solution", 100)
            .expect("claim");
        manager.vault.client().ready.store(false, Ordering::SeqCst);

        let status = manager.process(&mut store, "p-1", 100).expect("process");
        assert_eq!(status, PromotionStatus::Attested);
        assert_eq!(
            manager.vault().spendable_balance(&store, 100).expect("balance"),
            0
        );

        manager.vault.client().ready.store(true, Ordering::SeqCst);
        let status = manager.process(&mut store, "p-1", 100).expect("process");
        assert_eq!(status, PromotionStatus::Finished);
    }

    #[test]
    fn test_tokens_inherit_promotion_expiry() {
        let mut store = tally_db::open_memory().expect("open test db");
        let manager = manager(vec![descriptor("p-1", 2, 10_000)]);
        manager.refresh(&store, 100).expect("refresh");
        manager
            .claim(&store, "p-1", b"payload", b"solution", 100)
            .expect("claim");
        manager.process(&mut store, "p-1", 100).expect("process");

        assert_eq!(
            manager.vault().spendable_balance(&store, 100).expect("balance"),
            2 * TOKEN_VALUE
        );
        // Past the promotion expiry the tokens no longer count
        assert_eq!(
            manager
                .vault()
                .spendable_balance(&store, 10_000)
                .expect("balance"),
            0
        );
    }
}
