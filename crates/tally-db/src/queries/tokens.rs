//! Unblinded token query functions.
//!
//! Tokens move `Spendable → Reserved(redeem_id) → Spent`. Reservation is
//! all-or-nothing: either enough spendable value exists and every selected
//! token is marked reserved in one transaction, or nothing changes. A
//! failed redemption releases the reservation back to `Spendable`; only a
//! settled redemption finalizes to `Spent`. This is what prevents
//! double-spending a token across two concurrent contributions.

use rusqlite::Connection;

use tally_types::creds::{TokenState, UnblindedToken};

use crate::{DbError, Result};

/// A token to persist after unblinding.
pub struct NewToken<'a> {
    /// Face value in micro-tokens.
    pub value: u64,
    /// Issuing public key, hex.
    pub public_key: &'a str,
    /// The batch the token came from.
    pub batch_id: &'a str,
    /// Base64 unblinded token value.
    pub token_value: &'a str,
    /// Unix expiry timestamp, if any.
    pub expires_at: Option<u64>,
}

/// Insert a set of freshly unblinded tokens as spendable.
pub fn insert(conn: &Connection, tokens: &[NewToken<'_>]) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO unblinded_tokens (value, public_key, batch_id, token_value, expires_at, state)
         VALUES (?1, ?2, ?3, ?4, ?5, 'spendable')",
    )?;
    for token in tokens {
        stmt.execute(rusqlite::params![
            token.value as i64,
            token.public_key,
            token.batch_id,
            token.token_value,
            token.expires_at.map(|t| t as i64),
        ])?;
    }
    Ok(())
}

/// Total spendable balance in micro-tokens, excluding expired tokens.
pub fn spendable_balance(conn: &Connection, now: u64) -> Result<u64> {
    let balance: i64 = conn.query_row(
        "SELECT COALESCE(SUM(value), 0) FROM unblinded_tokens
         WHERE state = 'spendable' AND (expires_at IS NULL OR expires_at > ?1)",
        [now as i64],
        |row| row.get(0),
    )?;
    Ok(balance as u64)
}

/// Atomically reserve spendable tokens covering at least `amount`.
///
/// Selects oldest-first until the running total reaches `amount`, then
/// marks the whole selection `Reserved(redeem_id)` in one transaction.
///
/// # Errors
///
/// - [`DbError::Constraint`] if spendable value is insufficient; nothing
///   is modified in that case
pub fn reserve(
    conn: &mut Connection,
    redeem_id: &str,
    amount: u64,
    now: u64,
) -> Result<Vec<UnblindedToken>> {
    let tx = conn.transaction()?;

    let mut selected: Vec<UnblindedToken> = Vec::new();
    let mut covered: u64 = 0;
    {
        let mut stmt = tx.prepare(
            "SELECT token_id, value, public_key, batch_id, token_value, expires_at
             FROM unblinded_tokens
             WHERE state = 'spendable' AND (expires_at IS NULL OR expires_at > ?1)
             ORDER BY token_id ASC",
        )?;
        let rows = stmt.query_map([now as i64], |row| {
            Ok(UnblindedToken {
                token_id: row.get(0)?,
                value: row.get::<_, i64>(1)? as u64,
                public_key: row.get(2)?,
                batch_id: row.get(3)?,
                token_value: row.get(4)?,
                expires_at: row.get::<_, Option<i64>>(5)?.map(|t| t as u64),
                state: TokenState::Reserved,
                redeem_id: Some(redeem_id.to_string()),
            })
        })?;
        for row in rows {
            if covered >= amount {
                break;
            }
            let token = row?;
            covered += token.value;
            selected.push(token);
        }
    }

    if covered < amount {
        // Implicit rollback when the transaction drops
        return Err(DbError::Constraint(format!(
            "insufficient spendable value: have {covered}, need {amount}"
        )));
    }

    {
        let mut stmt = tx.prepare(
            "UPDATE unblinded_tokens SET state = 'reserved', redeem_id = ?1
             WHERE token_id = ?2 AND state = 'spendable'",
        )?;
        for token in &selected {
            let updated = stmt.execute(rusqlite::params![redeem_id, token.token_id])?;
            if updated == 0 {
                return Err(DbError::Constraint(format!(
                    "token {} no longer spendable",
                    token.token_id
                )));
            }
        }
    }

    tx.commit()?;
    tracing::info!(redeem_id, tokens = selected.len(), covered, "tokens reserved");
    Ok(selected)
}

/// Release a failed redemption's reservation back to spendable.
pub fn release(conn: &Connection, redeem_id: &str) -> Result<u64> {
    let released = conn.execute(
        "UPDATE unblinded_tokens SET state = 'spendable', redeem_id = NULL
         WHERE redeem_id = ?1 AND state = 'reserved'",
        [redeem_id],
    )?;
    tracing::info!(redeem_id, released, "reservation released");
    Ok(released as u64)
}

/// Finalize a settled redemption's reservation to spent.
pub fn finalize(conn: &Connection, redeem_id: &str) -> Result<u64> {
    let spent = conn.execute(
        "UPDATE unblinded_tokens SET state = 'spent'
         WHERE redeem_id = ?1 AND state = 'reserved'",
        [redeem_id],
    )?;
    tracing::info!(redeem_id, spent, "reservation finalized");
    Ok(spent as u64)
}

/// Tokens currently reserved for a redemption.
pub fn reserved_for(conn: &Connection, redeem_id: &str) -> Result<Vec<UnblindedToken>> {
    let mut stmt = conn.prepare(
        "SELECT token_id, value, public_key, batch_id, token_value, expires_at
         FROM unblinded_tokens
         WHERE redeem_id = ?1 AND state = 'reserved'
         ORDER BY token_id ASC",
    )?;
    let tokens = stmt
        .query_map([redeem_id], |row| {
            Ok(UnblindedToken {
                token_id: row.get(0)?,
                value: row.get::<_, i64>(1)? as u64,
                public_key: row.get(2)?,
                batch_id: row.get(3)?,
                token_value: row.get(4)?,
                expires_at: row.get::<_, Option<i64>>(5)?.map(|t| t as u64),
                state: TokenState::Reserved,
                redeem_id: Some(redeem_id.to_string()),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(tokens)
}

/// Value already redeemed for a settlement, in micro-tokens.
///
/// Spent tokens keep their `redeem_id`, so a settlement interrupted after
/// redemption can tell how much of its total the tokens already covered.
pub fn redeemed_total(conn: &Connection, redeem_id: &str) -> Result<u64> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(value), 0) FROM unblinded_tokens
         WHERE redeem_id = ?1 AND state = 'spent'",
        [redeem_id],
        |row| row.get(0),
    )?;
    Ok(total as u64)
}
