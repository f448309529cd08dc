//! Integration test: promotion value flowing through to publisher payouts.
//!
//! Exercises the complete earn -> store -> spend pipeline:
//! 1. Fetch promotions and store the active one
//! 2. Claim and attest the promotion
//! 3. Drive credential issuance (blind, claim, verify proof, unblind)
//! 4. Check the unlocked balance through the vault
//! 5. Enqueue a 60/40 auto-contribute entry
//! 6. Settle it through the reconciliation engine
//! 7. Verify payouts, redeemed credentials, balance report, and the
//!    next-cycle stamp
//!
//! The promotion manager and the engine each hold their own vault over a
//! shared payment client, the way the daemon wires them.

use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use tally_contrib::{ContributionQueue, CycleOutcome, ExternalWallet, ReconciliationEngine};
use tally_creds::client::{ClientError, SignedCredsResponse};
use tally_creds::{CredentialVault, PaymentClient, RedeemRequest};
use tally_crypto::blind::{BlindedToken, IssuerKey, SignedToken};
use tally_db::queries::{contribution, stamp, tokens};
use tally_promo::client::{PromotionClient, PromotionDescriptor};
use tally_promo::PromotionManager;
use tally_types::config::RetryConfig;
use tally_types::contribution::{Allocation, ContributionKind, QueueEntry};
use tally_types::promotion::{PromotionKind, PromotionStatus};
use tally_types::publisher::{PublisherStatus, ServerPublisherInfo};

const TOKEN_VALUE: u64 = 250_000;

/// Payment server state shared by every client handle, like the real
/// remote server is shared by every component talking to it.
struct PaymentInner {
    issuer: IssuerKey,
    claims: Mutex<Vec<(String, Vec<String>)>>,
    redeemed: Mutex<Vec<RedeemRequest>>,
}

#[derive(Clone)]
struct SharedPayment(Arc<PaymentInner>);

impl SharedPayment {
    fn new() -> Self {
        Self(Arc::new(PaymentInner {
            issuer: IssuerKey::generate(),
            claims: Mutex::new(Vec::new()),
            redeemed: Mutex::new(Vec::new()),
        }))
    }

    fn redeemed(&self) -> Vec<RedeemRequest> {
        self.0.redeemed.lock().expect("redeemed lock").clone()
    }
}

impl PaymentClient for SharedPayment {
    fn claim_creds(
        &self,
        trigger_id: &str,
        blinded_tokens: &[String],
    ) -> Result<String, ClientError> {
        self.0
            .claims
            .lock()
            .expect("claims lock")
            .push((trigger_id.to_string(), blinded_tokens.to_vec()));
        Ok(format!("claim-{trigger_id}"))
    }

    fn fetch_signed_creds(
        &self,
        trigger_id: &str,
        _claim_id: &str,
    ) -> Result<Option<SignedCredsResponse>, ClientError> {
        let claims = self.0.claims.lock().expect("claims lock");
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
        let signed: Vec<SignedToken> = blinded.iter().map(|b| self.0.issuer.evaluate(b)).collect();
        let proof = self.0.issuer.batch_proof(&blinded, &signed);

        Ok(Some(SignedCredsResponse {
            signed_tokens: signed.iter().map(|s| BASE64.encode(&s.bytes)).collect(),
            public_key: hex::encode(self.0.issuer.public_key()),
            batch_proof: hex::encode(proof),
        }))
    }

    fn redeem(&self, request: &RedeemRequest) -> Result<(), ClientError> {
        self.0
            .redeemed
            .lock()
            .expect("redeemed lock")
            .push(request.clone());
        Ok(())
    }
}

struct MockPromoServer {
    offered: Vec<PromotionDescriptor>,
}

impl PromotionClient for MockPromoServer {
    fn fetch_promotions(&self) -> Result<Vec<PromotionDescriptor>, ClientError> {
        Ok(self.offered.clone())
    }

    fn claim_promotion(&self, promotion_id: &str, _payload: &[u8]) -> Result<String, ClientError> {
        Ok(format!("claim-{promotion_id}"))
    }

    fn attest_promotion(&self, _promotion_id: &str, _solution: &[u8]) -> Result<(), ClientError> {
        Ok(())
    }
}

struct EmptyWallet;

impl ExternalWallet for EmptyWallet {
    fn balance(&self) -> Result<u64, ClientError> {
        Ok(0)
    }

    fn transfer(&self, _publisher_key: &str, _amount: u64) -> Result<(), ClientError> {
        panic!("nothing should route to the external wallet in this test");
    }
}

fn verify_publisher(store: &tally_db::Store, key: &str) {
    tally_db::queries::publisher::upsert(
        store.conn(),
        &ServerPublisherInfo {
            publisher_key: key.to_string(),
            status: PublisherStatus::Verified,
            updated_at: 0,
        },
    )
    .expect("verify publisher");
}

#[test]
fn promotion_value_reaches_publishers() {
    let mut store = tally_db::open_memory().expect("open test db");
    let payment = SharedPayment::new();

    // =========================================================
    // Step 1-3: earn 12 tokens from a promotion
    // =========================================================
    let promos = MockPromoServer {
        offered: vec![PromotionDescriptor {
            promotion_id: "promo-1".to_string(),
            kind: PromotionKind::Ugp,
            approximate_value: 12 * TOKEN_VALUE,
            suggested_count: 12,
            expires_at: 0,
        }],
    };
    let manager = PromotionManager::new(
        promos,
        CredentialVault::new(payment.clone(), TOKEN_VALUE),
    );

    let active = manager.refresh(&store, 100).expect("refresh");
    assert_eq!(active.len(), 1);

    let promo = manager
        .claim(&store, "promo-1", b"wallet-payload", b"captcha-solution", 100)
        .expect("claim");
    assert_eq!(promo.status, PromotionStatus::Attested);

    let status = manager
        .process(&mut store, "promo-1", 100)
        .expect("process promotion");
    assert_eq!(status, PromotionStatus::Finished);

    // =========================================================
    // Step 4: the unlocked value is visible to the spend side
    // =========================================================
    let engine = ReconciliationEngine::new(
        CredentialVault::new(payment.clone(), TOKEN_VALUE),
        EmptyWallet,
        RetryConfig::default(),
    );
    assert_eq!(
        engine
            .vault()
            .spendable_balance(&store, 100)
            .expect("balance"),
        12 * TOKEN_VALUE
    );

    // =========================================================
    // Step 5-6: settle a 60/40 auto-contribute of 10 tokens
    // =========================================================
    verify_publisher(&store, "alpha.example");
    verify_publisher(&store, "beta.example");
    let entry = QueueEntry {
        id: "ac-1".to_string(),
        kind: ContributionKind::AutoContribute,
        total_amount: 10 * TOKEN_VALUE,
        partial: false,
        allocations: vec![
            Allocation {
                publisher_key: "alpha.example".to_string(),
                weight: 60.0,
            },
            Allocation {
                publisher_key: "beta.example".to_string(),
                weight: 40.0,
            },
        ],
    };
    ContributionQueue::enqueue(&store, &entry, 150).expect("enqueue");

    let outcome = engine.process_next(&mut store, 200).expect("settle");
    let CycleOutcome::Completed { contribution_id } = outcome else {
        panic!("expected completion, got {outcome:?}");
    };

    // =========================================================
    // Step 7: payouts, redemption, report, stamp
    // =========================================================
    let payouts = contribution::publishers(store.conn(), &contribution_id).expect("payouts");
    assert_eq!(payouts.len(), 2);
    assert_eq!(payouts[0].publisher_key, "alpha.example");
    assert_eq!(payouts[0].amount, 6 * TOKEN_VALUE);
    assert_eq!(payouts[1].publisher_key, "beta.example");
    assert_eq!(payouts[1].amount, 4 * TOKEN_VALUE);

    let redeemed = payment.redeemed();
    assert_eq!(redeemed.len(), 1);
    assert_eq!(redeemed[0].payload, contribution_id.as_bytes());
    assert_eq!(redeemed[0].credentials.len(), 10);
    // Each redeemed credential carries the issuer's public key
    for cred in &redeemed[0].credentials {
        assert_eq!(cred.public_key, hex::encode(payment.0.issuer.public_key()));
    }
    // The request is signed with the vault's request key
    let message = tally_crypto::blake3::encode_multi_field(&[
        redeemed[0].redeem_id.as_bytes(),
        redeemed[0].payload.as_slice(),
    ]);
    let signature: [u8; 64] = hex::decode(&redeemed[0].signature)
        .expect("hex signature")
        .try_into()
        .expect("64-byte signature");
    let signer_pk: [u8; 32] = hex::decode(&redeemed[0].signer_public_key)
        .expect("hex public key")
        .try_into()
        .expect("32-byte public key");
    tally_crypto::signing::verify(&signer_pk, &message, &signature)
        .expect("request signature verifies");

    assert_eq!(ContributionQueue::len(&store).expect("len"), 0);
    assert_eq!(
        contribution::balance_report_total(store.conn(), ContributionKind::AutoContribute)
            .expect("report"),
        10 * TOKEN_VALUE
    );
    assert!(stamp::get(store.conn()).expect("stamp").is_some());
    assert_eq!(
        tokens::spendable_balance(store.conn(), 200).expect("balance"),
        2 * TOKEN_VALUE
    );
}

#[test]
fn second_cycle_sees_updated_balance() {
    let mut store = tally_db::open_memory().expect("open test db");
    let payment = SharedPayment::new();

    let promos = MockPromoServer {
        offered: vec![PromotionDescriptor {
            promotion_id: "promo-2".to_string(),
            kind: PromotionKind::Ads,
            approximate_value: 2 * TOKEN_VALUE,
            suggested_count: 2,
            expires_at: 0,
        }],
    };
    let manager = PromotionManager::new(
        promos,
        CredentialVault::new(payment.clone(), TOKEN_VALUE),
    );
    manager.refresh(&store, 10).expect("refresh");
    manager
        .claim(&store, "promo-2", b"payload", b"solution", 10)
        .expect("claim");
    manager
        .process(&mut store, "promo-2", 10)
        .expect("process promotion");

    let engine = ReconciliationEngine::new(
        CredentialVault::new(payment.clone(), TOKEN_VALUE),
        EmptyWallet,
        RetryConfig::default(),
    );
    verify_publisher(&store, "alpha.example");

    // Asking for more than the 2 earned tokens is a soft failure
    let entry = QueueEntry {
        id: "ac-big".to_string(),
        kind: ContributionKind::AutoContribute,
        total_amount: 5 * TOKEN_VALUE,
        partial: false,
        allocations: vec![Allocation {
            publisher_key: "alpha.example".to_string(),
            weight: 100.0,
        }],
    };
    ContributionQueue::enqueue(&store, &entry, 20).expect("enqueue");
    let outcome = engine.process_next(&mut store, 30).expect("settle");
    assert_eq!(
        outcome,
        CycleOutcome::NotEnoughFunds {
            needed: 5 * TOKEN_VALUE,
            available: 2 * TOKEN_VALUE,
        }
    );

    // The entry stays queued; once within balance it settles
    ContributionQueue::remove(&store, "ac-big").expect("drop oversized entry");
    let entry = QueueEntry {
        id: "ac-fit".to_string(),
        kind: ContributionKind::AutoContribute,
        total_amount: 2 * TOKEN_VALUE,
        partial: false,
        allocations: vec![Allocation {
            publisher_key: "alpha.example".to_string(),
            weight: 100.0,
        }],
    };
    ContributionQueue::enqueue(&store, &entry, 40).expect("enqueue");
    let outcome = engine.process_next(&mut store, 50).expect("settle");
    assert!(matches!(outcome, CycleOutcome::Completed { .. }));
    assert_eq!(
        tokens::spendable_balance(store.conn(), 50).expect("balance"),
        0
    );
}
