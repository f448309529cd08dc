//! Promotion query functions.

use rusqlite::{Connection, OptionalExtension};

use tally_types::promotion::{Promotion, PromotionKind, PromotionStatus};

use crate::{DbError, Result};

/// Insert or refresh a promotion fetched from the server.
///
/// Refreshing never regresses local lifecycle state: a promotion already
/// past `Active` keeps its stored status and claim id.
pub fn upsert(conn: &Connection, promotion: &Promotion) -> Result<()> {
    conn.execute(
        "INSERT INTO promotions
             (promotion_id, kind, status, approximate_value, suggested_count, expires_at, claim_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(promotion_id) DO UPDATE SET
             approximate_value = excluded.approximate_value,
             suggested_count = excluded.suggested_count,
             expires_at = excluded.expires_at",
        rusqlite::params![
            promotion.promotion_id,
            promotion.kind.as_str(),
            promotion.status.as_str(),
            promotion.approximate_value as i64,
            promotion.suggested_count as i64,
            promotion.expires_at as i64,
            promotion.claim_id,
        ],
    )?;
    Ok(())
}

/// Persist a status transition.
pub fn update_status(conn: &Connection, promotion_id: &str, status: PromotionStatus) -> Result<()> {
    let updated = conn.execute(
        "UPDATE promotions SET status = ?1 WHERE promotion_id = ?2",
        rusqlite::params![status.as_str(), promotion_id],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("promotion {promotion_id}")));
    }
    tracing::info!(promotion_id, status = status.as_str(), "promotion status persisted");
    Ok(())
}

/// Record the claim id returned by the server.
pub fn set_claim_id(conn: &Connection, promotion_id: &str, claim_id: &str) -> Result<()> {
    let updated = conn.execute(
        "UPDATE promotions SET claim_id = ?1 WHERE promotion_id = ?2",
        rusqlite::params![claim_id, promotion_id],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("promotion {promotion_id}")));
    }
    Ok(())
}

/// Load a promotion by id.
pub fn get(conn: &Connection, promotion_id: &str) -> Result<Option<Promotion>> {
    let row: Option<(String, String, i64, i64, i64, String)> = conn
        .query_row(
            "SELECT kind, status, approximate_value, suggested_count, expires_at, claim_id
             FROM promotions WHERE promotion_id = ?1",
            [promotion_id],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            },
        )
        .optional()?;

    let Some((kind, status, approximate_value, suggested_count, expires_at, claim_id)) = row
    else {
        return Ok(None);
    };

    Ok(Some(Promotion {
        promotion_id: promotion_id.to_string(),
        kind: PromotionKind::parse(&kind)?,
        status: PromotionStatus::parse(&status)?,
        approximate_value: approximate_value as u64,
        suggested_count: suggested_count as u32,
        expires_at: expires_at as u64,
        claim_id,
    }))
}

/// Non-expired active promotions.
pub fn active(conn: &Connection, now: u64) -> Result<Vec<Promotion>> {
    let mut stmt = conn.prepare(
        "SELECT promotion_id FROM promotions
         WHERE status = 'active' AND (expires_at = 0 OR expires_at > ?1)
         ORDER BY promotion_id",
    )?;
    let ids = stmt
        .query_map([now as i64], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut result = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(promotion) = get(conn, &id)? {
            result.push(promotion);
        }
    }
    Ok(result)
}

/// Flip expired non-terminal promotions to `Over`. Returns how many moved.
pub fn mark_expired_over(conn: &Connection, now: u64) -> Result<u64> {
    let moved = conn.execute(
        "UPDATE promotions SET status = 'over'
         WHERE status IN ('active', 'attested') AND expires_at != 0 AND expires_at <= ?1",
        [now as i64],
    )?;
    if moved > 0 {
        tracing::info!(moved, "expired promotions moved to over");
    }
    Ok(moved as u64)
}
