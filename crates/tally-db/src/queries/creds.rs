//! Credential batch query functions.
//!
//! Status transitions are persisted before the corresponding network step
//! is attempted, so a crash resumes from the last durable state instead of
//! re-requesting consumed server-side nonces.

use rusqlite::{Connection, OptionalExtension};

use tally_types::creds::{CredsBatch, CredsBatchStatus, TriggerType};

use crate::{DbError, Result};

/// Insert a freshly blinded batch.
///
/// One trigger maps to at most one batch; a second insert for the same
/// trigger is a constraint violation.
pub fn insert(conn: &Connection, batch: &CredsBatch) -> Result<()> {
    let creds = serde_json::to_string(&batch.creds)
        .map_err(|e| DbError::Serialization(e.to_string()))?;
    let blinded = serde_json::to_string(&batch.blinded_tokens)
        .map_err(|e| DbError::Serialization(e.to_string()))?;
    let signed = serde_json::to_string(&batch.signed_tokens)
        .map_err(|e| DbError::Serialization(e.to_string()))?;

    conn.execute(
        "INSERT INTO creds_batches
             (batch_id, trigger_id, trigger_type, status, creds, blinded_tokens,
              signed_tokens, public_key, claim_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            batch.batch_id,
            batch.trigger_id,
            batch.trigger_type.as_str(),
            batch.status.as_str(),
            creds,
            blinded,
            signed,
            batch.public_key,
            batch.claim_id,
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            DbError::Constraint(format!("batch for trigger {} exists", batch.trigger_id))
        }
        other => DbError::Sqlite(other),
    })?;

    tracing::info!(batch_id = %batch.batch_id, trigger = %batch.trigger_id, "creds batch persisted");
    Ok(())
}

/// Persist a status transition.
pub fn update_status(conn: &Connection, batch_id: &str, status: CredsBatchStatus) -> Result<()> {
    let updated = conn.execute(
        "UPDATE creds_batches SET status = ?1 WHERE batch_id = ?2",
        rusqlite::params![status.as_str(), batch_id],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("creds batch {batch_id}")));
    }
    tracing::info!(batch_id, status = status.as_str(), "creds batch status persisted");
    Ok(())
}

/// Record the server's claim id ahead of the claim request's side effects.
pub fn set_claim_id(conn: &Connection, batch_id: &str, claim_id: &str) -> Result<()> {
    let updated = conn.execute(
        "UPDATE creds_batches SET claim_id = ?1 WHERE batch_id = ?2",
        rusqlite::params![claim_id, batch_id],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("creds batch {batch_id}")));
    }
    Ok(())
}

/// Record the fetched signed tokens and issuing public key.
pub fn set_signed_tokens(
    conn: &Connection,
    batch_id: &str,
    signed_tokens: &[String],
    public_key: &str,
) -> Result<()> {
    let signed = serde_json::to_string(signed_tokens)
        .map_err(|e| DbError::Serialization(e.to_string()))?;
    let updated = conn.execute(
        "UPDATE creds_batches SET signed_tokens = ?1, public_key = ?2 WHERE batch_id = ?3",
        rusqlite::params![signed, public_key, batch_id],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("creds batch {batch_id}")));
    }
    Ok(())
}

/// Load the batch for a trigger, if one exists.
pub fn get_by_trigger(
    conn: &Connection,
    trigger_id: &str,
    trigger_type: TriggerType,
) -> Result<Option<CredsBatch>> {
    let row: Option<(String, String, String, String, String, String, String)> = conn
        .query_row(
            "SELECT batch_id, status, creds, blinded_tokens, signed_tokens, public_key, claim_id
             FROM creds_batches WHERE trigger_id = ?1 AND trigger_type = ?2",
            rusqlite::params![trigger_id, trigger_type.as_str()],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            },
        )
        .optional()?;

    let Some((batch_id, status, creds, blinded, signed, public_key, claim_id)) = row else {
        return Ok(None);
    };

    Ok(Some(CredsBatch {
        batch_id,
        trigger_id: trigger_id.to_string(),
        trigger_type,
        status: CredsBatchStatus::parse(&status)?,
        creds: serde_json::from_str(&creds)
            .map_err(|e| DbError::Serialization(e.to_string()))?,
        blinded_tokens: serde_json::from_str(&blinded)
            .map_err(|e| DbError::Serialization(e.to_string()))?,
        signed_tokens: serde_json::from_str(&signed)
            .map_err(|e| DbError::Serialization(e.to_string()))?,
        public_key,
        claim_id,
    }))
}

/// Batch ids currently in a given status.
pub fn ids_with_status(conn: &Connection, status: CredsBatchStatus) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT batch_id FROM creds_batches WHERE status = ?1 ORDER BY batch_id")?;
    let ids = stmt
        .query_map([status.as_str()], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}
