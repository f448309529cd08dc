//! The credential vault: batch lifecycle and token redemption.
//!
//! ## Persist-before-network
//!
//! Every state transition is written to the store before the network call
//! that depends on it is attempted. A crash therefore resumes from the
//! last durable state: a batch stuck in `Blinded` re-submits the same
//! blinded set (the server returns the original claim id), a batch stuck
//! in `Claimed` re-polls for signed tokens, and a batch in
//! `SignedTokensReceived` re-runs the local unblind, which is
//! deterministic.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tracing::{info, warn};

use tally_crypto::blake3;
use tally_crypto::blind::{self, BlindState, BlindedToken, SignedToken, TokenPreimage};
use tally_crypto::signing::RequestSigner;
use tally_db::queries::{creds, tokens};
use tally_db::Store;
use tally_types::creds::{CredsBatch, CredsBatchStatus, TriggerType, UnblindedToken};

use crate::client::{PaymentClient, RedeemCredential, RedeemRequest};
use crate::{CredsError, Result};

/// Drives credential batches from trigger to spendable balance, and
/// redemptions from reservation to settlement.
pub struct CredentialVault<C> {
    client: C,
    token_value: u64,
    signer: RequestSigner,
}

impl<C: PaymentClient> CredentialVault<C> {
    /// Create a vault where each minted token is worth `token_value`
    /// micro-tokens, with a fresh request signing key.
    pub fn new(client: C, token_value: u64) -> Self {
        Self::with_signer(client, token_value, RequestSigner::generate())
    }

    /// Create a vault with a persisted request signing key.
    pub fn with_signer(client: C, token_value: u64, signer: RequestSigner) -> Self {
        Self {
            client,
            token_value,
            signer,
        }
    }

    /// The payment client this vault drives.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Face value of one token in micro-tokens.
    pub fn token_value(&self) -> u64 {
        self.token_value
    }

    /// Create (or resume) the batch for a trigger.
    ///
    /// Generation happens before the insert, so a batch that already
    /// exists is returned unchanged and the fresh tokens are discarded.
    /// The batch is durable before any network step runs.
    pub fn start_batch(
        &self,
        store: &Store,
        trigger_id: &str,
        trigger_type: TriggerType,
        count: usize,
    ) -> Result<CredsBatch> {
        if let Some(existing) = creds::get_by_trigger(store.conn(), trigger_id, trigger_type)? {
            return Ok(existing);
        }
        let (states, blinded) = generate_blinded(count);
        self.persist_batch(store, trigger_id, trigger_type, states, blinded)
    }

    /// Like [`start_batch`](Self::start_batch), with generation moved off
    /// the async runtime.
    ///
    /// If a batch for the trigger appears while the blocking task runs,
    /// the generated tokens are discarded and the existing batch wins.
    pub async fn start_batch_async(
        &self,
        store: &Store,
        trigger_id: &str,
        trigger_type: TriggerType,
        count: usize,
    ) -> Result<CredsBatch> {
        if let Some(existing) = creds::get_by_trigger(store.conn(), trigger_id, trigger_type)? {
            return Ok(existing);
        }
        let (states, blinded) = tokio::task::spawn_blocking(move || generate_blinded(count))
            .await
            .map_err(|e| CredsError::Task(e.to_string()))?;
        self.persist_batch(store, trigger_id, trigger_type, states, blinded)
    }

    fn persist_batch(
        &self,
        store: &Store,
        trigger_id: &str,
        trigger_type: TriggerType,
        states: Vec<String>,
        blinded: Vec<String>,
    ) -> Result<CredsBatch> {
        let batch = CredsBatch {
            batch_id: new_batch_id(),
            trigger_id: trigger_id.to_string(),
            trigger_type,
            status: CredsBatchStatus::Blinded,
            creds: states,
            blinded_tokens: blinded,
            signed_tokens: Vec::new(),
            public_key: String::new(),
            claim_id: String::new(),
        };
        match creds::insert(store.conn(), &batch) {
            Ok(()) => Ok(batch),
            // Lost a race with a concurrent starter; their batch wins and
            // our generated tokens are dropped.
            Err(tally_db::DbError::Constraint(_)) => {
                creds::get_by_trigger(store.conn(), trigger_id, trigger_type)?
                    .ok_or_else(|| CredsError::NoBatch(trigger_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Advance a batch as far as the server allows in one call.
    ///
    /// Returns the status the batch ends up in. `Claimed` means the server
    /// has not finished signing yet; call again later. `token_expires_at`
    /// is stamped onto the minted tokens when the batch finishes.
    ///
    /// # Errors
    ///
    /// - [`CredsError::NoBatch`] if no batch exists for the trigger
    /// - [`CredsError::BatchCorrupted`] if validation fails; the batch is
    ///   durably marked corrupted first
    pub fn process_batch(
        &self,
        store: &mut Store,
        trigger_id: &str,
        trigger_type: TriggerType,
        token_expires_at: Option<u64>,
    ) -> Result<CredsBatchStatus> {
        loop {
            let batch = creds::get_by_trigger(store.conn(), trigger_id, trigger_type)?
                .ok_or_else(|| CredsError::NoBatch(trigger_id.to_string()))?;
            match batch.status {
                CredsBatchStatus::Blinded => self.claim(store, &batch)?,
                CredsBatchStatus::Claimed => {
                    if !self.fetch_signed(store, &batch)? {
                        return Ok(CredsBatchStatus::Claimed);
                    }
                }
                CredsBatchStatus::SignedTokensReceived => {
                    self.finish(store, &batch, token_expires_at)?;
                }
                CredsBatchStatus::Finished => return Ok(CredsBatchStatus::Finished),
                CredsBatchStatus::Corrupted => return Ok(CredsBatchStatus::Corrupted),
            }
        }
    }

    fn claim(&self, store: &Store, batch: &CredsBatch) -> Result<()> {
        let claim_id = self
            .client
            .claim_creds(&batch.trigger_id, &batch.blinded_tokens)?;
        creds::set_claim_id(store.conn(), &batch.batch_id, &claim_id)?;
        creds::update_status(store.conn(), &batch.batch_id, CredsBatchStatus::Claimed)?;
        info!(batch_id = %batch.batch_id, %claim_id, "creds batch claimed");
        Ok(())
    }

    /// Returns false while the server is still signing.
    fn fetch_signed(&self, store: &Store, batch: &CredsBatch) -> Result<bool> {
        let Some(response) = self
            .client
            .fetch_signed_creds(&batch.trigger_id, &batch.claim_id)?
        else {
            return Ok(false);
        };

        if response.signed_tokens.len() != batch.blinded_tokens.len() {
            return self.corrupt(
                store,
                batch,
                format!(
                    "signed count {} != blinded count {}",
                    response.signed_tokens.len(),
                    batch.blinded_tokens.len()
                ),
            );
        }

        let public_key = decode_hex32("public key", &response.public_key)?;
        let proof = decode_hex32("batch proof", &response.batch_proof)?;
        let blinded = batch
            .blinded_tokens
            .iter()
            .map(|b| Ok(BlindedToken {
                bytes: decode_b64("blinded token", b)?,
            }))
            .collect::<Result<Vec<_>>>()?;
        let signed = response
            .signed_tokens
            .iter()
            .map(|s| Ok(SignedToken {
                bytes: decode_b64("signed token", s)?,
            }))
            .collect::<Result<Vec<_>>>()?;

        if blind::verify_batch_proof(&public_key, &blinded, &signed, &proof).is_err() {
            return self.corrupt(store, batch, "batch proof mismatch".to_string());
        }

        creds::set_signed_tokens(
            store.conn(),
            &batch.batch_id,
            &response.signed_tokens,
            &response.public_key,
        )?;
        creds::update_status(
            store.conn(),
            &batch.batch_id,
            CredsBatchStatus::SignedTokensReceived,
        )?;
        Ok(true)
    }

    fn corrupt(&self, store: &Store, batch: &CredsBatch, reason: String) -> Result<bool> {
        warn!(batch_id = %batch.batch_id, %reason, "creds batch failed validation");
        creds::update_status(store.conn(), &batch.batch_id, CredsBatchStatus::Corrupted)?;
        Err(CredsError::BatchCorrupted {
            batch_id: batch.batch_id.clone(),
            reason,
        })
    }

    fn finish(
        &self,
        store: &mut Store,
        batch: &CredsBatch,
        expires_at: Option<u64>,
    ) -> Result<()> {
        let mut token_values = Vec::with_capacity(batch.creds.len());
        for (state_b64, signed_b64) in batch.creds.iter().zip(&batch.signed_tokens) {
            let state = BlindState::from_bytes(&decode_b64("blind state", state_b64)?)?;
            let signed = SignedToken {
                bytes: decode_b64("signed token", signed_b64)?,
            };
            let preimage = blind::unblind(&signed, &state);
            token_values.push(encode_preimage(&preimage));
        }

        let new_tokens: Vec<tokens::NewToken<'_>> = token_values
            .iter()
            .map(|token_value| tokens::NewToken {
                value: self.token_value,
                public_key: &batch.public_key,
                batch_id: &batch.batch_id,
                token_value,
                expires_at,
            })
            .collect();

        // Minting and the terminal status land together or not at all, so
        // a crash can never double-mint a finished batch.
        let tx = store.conn_mut().transaction().map_err(tally_db::DbError::from)?;
        tokens::insert(&tx, &new_tokens)?;
        creds::update_status(&tx, &batch.batch_id, CredsBatchStatus::Finished)?;
        tx.commit().map_err(tally_db::DbError::from)?;

        info!(
            batch_id = %batch.batch_id,
            tokens = new_tokens.len(),
            value = self.token_value,
            "creds batch finished"
        );
        Ok(())
    }

    /// Reserve and redeem `amount` micro-tokens of spendable balance.
    ///
    /// Reservation is all-or-nothing. On settlement the reservation
    /// finalizes to spent; on any failure it is released back to
    /// spendable. Returns the total value actually redeemed, which may
    /// exceed `amount` by at most one token.
    pub fn redeem(
        &self,
        store: &mut Store,
        redeem_id: &str,
        amount: u64,
        payload: &[u8],
        now: u64,
    ) -> Result<u64> {
        let reserved = tokens::reserve(store.conn_mut(), redeem_id, amount, now)?;
        self.submit_reserved(store, redeem_id, &reserved, payload)
    }

    /// Resume a redemption whose tokens were already reserved.
    ///
    /// Used after a crash between reservation and settlement.
    pub fn redeem_reserved(
        &self,
        store: &mut Store,
        redeem_id: &str,
        payload: &[u8],
    ) -> Result<u64> {
        let reserved = tokens::reserved_for(store.conn(), redeem_id)?;
        if reserved.is_empty() {
            return Err(CredsError::NoBatch(format!("no reservation {redeem_id}")));
        }
        self.submit_reserved(store, redeem_id, &reserved, payload)
    }

    /// Like [`redeem_reserved`](Self::redeem_reserved), with proof
    /// generation moved off the async runtime.
    ///
    /// The reservation is re-read once the proofs are ready; if it
    /// changed while the blocking task ran, the stale request is
    /// discarded and the proofs are recomputed against the current
    /// reservation. In-flight proof work is never cancelled, only its
    /// result dropped.
    pub async fn redeem_reserved_async(
        &self,
        store: &mut Store,
        redeem_id: &str,
        payload: &[u8],
    ) -> Result<u64> {
        let mut reserved = tokens::reserved_for(store.conn(), redeem_id)?;
        loop {
            if reserved.is_empty() {
                return Err(CredsError::NoBatch(format!("no reservation {redeem_id}")));
            }

            let signer = RequestSigner::from_bytes(&self.signer.to_bytes());
            let id = redeem_id.to_string();
            let proved = reserved.clone();
            let body = payload.to_vec();
            let request = tokio::task::spawn_blocking(move || {
                build_redeem_request(&signer, &id, &proved, &body)
            })
            .await
            .map_err(|e| CredsError::Task(e.to_string()))?;
            let request = match request {
                Ok(request) => request,
                Err(e) => {
                    tokens::release(store.conn(), redeem_id)?;
                    return Err(e);
                }
            };

            let current = tokens::reserved_for(store.conn(), redeem_id)?;
            if current
                .iter()
                .map(|t| t.token_id)
                .ne(reserved.iter().map(|t| t.token_id))
            {
                warn!(redeem_id, "reservation changed during proof generation; discarding proofs");
                reserved = current;
                continue;
            }
            return self.submit_request(store, redeem_id, &reserved, &request);
        }
    }

    fn submit_reserved(
        &self,
        store: &mut Store,
        redeem_id: &str,
        reserved: &[UnblindedToken],
        payload: &[u8],
    ) -> Result<u64> {
        let request = match build_redeem_request(&self.signer, redeem_id, reserved, payload) {
            Ok(request) => request,
            Err(e) => {
                tokens::release(store.conn(), redeem_id)?;
                return Err(e);
            }
        };
        self.submit_request(store, redeem_id, reserved, &request)
    }

    fn submit_request(
        &self,
        store: &mut Store,
        redeem_id: &str,
        reserved: &[UnblindedToken],
        request: &RedeemRequest,
    ) -> Result<u64> {
        match self.client.redeem(request) {
            Ok(()) => {
                tokens::finalize(store.conn(), redeem_id)?;
                let total = reserved.iter().map(|t| t.value).sum();
                info!(redeem_id, total, "redemption settled");
                Ok(total)
            }
            Err(e) => {
                warn!(redeem_id, error = %e, "redemption failed, releasing reservation");
                tokens::release(store.conn(), redeem_id)?;
                Err(e.into())
            }
        }
    }

    /// Total spendable balance in micro-tokens.
    pub fn spendable_balance(&self, store: &Store, now: u64) -> Result<u64> {
        Ok(tokens::spendable_balance(store.conn(), now)?)
    }
}

fn generate_blinded(count: usize) -> (Vec<String>, Vec<String>) {
    let mut states = Vec::with_capacity(count);
    let mut blinded = Vec::with_capacity(count);
    for _ in 0..count {
        let (token, state) = blind::blind();
        states.push(BASE64.encode(state.to_bytes()));
        blinded.push(BASE64.encode(&token.bytes));
    }
    (states, blinded)
}

fn build_redeem_request(
    signer: &RequestSigner,
    redeem_id: &str,
    reserved: &[UnblindedToken],
    payload: &[u8],
) -> Result<RedeemRequest> {
    let mut credentials = Vec::with_capacity(reserved.len());
    for token in reserved {
        let preimage = decode_preimage(&token.token_value)?;
        let proof = blind::redeem_proof(&preimage, payload);
        credentials.push(RedeemCredential {
            serial: BASE64.encode(preimage.serial),
            proof: hex::encode(proof),
            public_key: token.public_key.clone(),
        });
    }
    let message = blake3::encode_multi_field(&[redeem_id.as_bytes(), payload]);
    let signature = hex::encode(signer.sign(&message));
    Ok(RedeemRequest {
        redeem_id: redeem_id.to_string(),
        payload: payload.to_vec(),
        credentials,
        signature,
        signer_public_key: hex::encode(signer.public_key()),
    })
}

/// Stored token form: `base64(serial || output)`.
fn encode_preimage(preimage: &TokenPreimage) -> String {
    let mut bytes = [0u8; 64];
    bytes[..32].copy_from_slice(&preimage.serial);
    bytes[32..].copy_from_slice(&preimage.output);
    BASE64.encode(bytes)
}

fn decode_preimage(token_value: &str) -> Result<TokenPreimage> {
    let bytes = decode_b64("token value", token_value)?;
    if bytes.len() != 64 {
        return Err(CredsError::Encoding(format!(
            "token value is {} bytes, expected 64",
            bytes.len()
        )));
    }
    let mut serial = [0u8; 32];
    serial.copy_from_slice(&bytes[..32]);
    let mut output = [0u8; 32];
    output.copy_from_slice(&bytes[32..]);
    Ok(TokenPreimage { serial, output })
}

fn decode_b64(label: &str, value: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(value)
        .map_err(|e| CredsError::Encoding(format!("bad base64 {label}: {e}")))
}

fn decode_hex32(label: &str, value: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(value)
        .map_err(|e| CredsError::Encoding(format!("bad hex {label}: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| CredsError::Encoding(format!("{label} is not 32 bytes")))
}

fn new_batch_id() -> String {
    let mut bytes = [0u8; 16];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut bytes);
    hex::encode(bytes)
}
