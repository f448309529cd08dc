//! Settlement record query functions.
//!
//! A contribution's step is persisted after every transition so a restart
//! resumes at the last durable step rather than restarting the settlement.

use rusqlite::{Connection, OptionalExtension};

use tally_types::contribution::{
    Contribution, ContributionKind, ContributionStep, FailureReason, PublisherPayout,
};

use crate::{DbError, Result};

/// Insert a new settlement record at its starting step.
pub fn insert(conn: &Connection, contribution: &Contribution) -> Result<()> {
    conn.execute(
        "INSERT INTO contributions
             (id, queue_entry_id, kind, total_amount, step, retry_level, created_at,
              completed_at, failure_reason)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            contribution.id,
            contribution.queue_entry_id,
            contribution.kind.as_str(),
            contribution.total_amount as i64,
            contribution.step.as_str(),
            contribution.retry_level as i64,
            contribution.created_at as i64,
            contribution.completed_at.map(|t| t as i64),
            contribution.failure_reason.map(FailureReason::as_str),
        ],
    )?;
    set_publishers(conn, &contribution.id, &contribution.publishers)?;
    Ok(())
}

/// Persist a step transition.
pub fn update_step(
    conn: &Connection,
    id: &str,
    step: ContributionStep,
    retry_level: u32,
) -> Result<()> {
    let updated = conn.execute(
        "UPDATE contributions SET step = ?1, retry_level = ?2 WHERE id = ?3",
        rusqlite::params![step.as_str(), retry_level as i64, id],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("contribution {id}")));
    }
    tracing::info!(id, step = step.as_str(), retry_level, "contribution step persisted");
    Ok(())
}

/// Record why a settlement failed.
pub fn set_failure_reason(conn: &Connection, id: &str, reason: FailureReason) -> Result<()> {
    let updated = conn.execute(
        "UPDATE contributions SET failure_reason = ?1 WHERE id = ?2",
        rusqlite::params![reason.as_str(), id],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("contribution {id}")));
    }
    Ok(())
}

/// Mark terminal completion (success or failure step already set).
pub fn mark_completed(conn: &Connection, id: &str, completed_at: u64) -> Result<()> {
    let updated = conn.execute(
        "UPDATE contributions SET completed_at = ?1 WHERE id = ?2",
        rusqlite::params![completed_at as i64, id],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("contribution {id}")));
    }
    Ok(())
}

/// Replace the decided per-publisher payouts.
pub fn set_publishers(conn: &Connection, id: &str, payouts: &[PublisherPayout]) -> Result<()> {
    conn.execute(
        "DELETE FROM contribution_publishers WHERE contribution_id = ?1",
        [id],
    )?;
    let mut stmt = conn.prepare(
        "INSERT INTO contribution_publishers (contribution_id, publisher_key, amount)
         VALUES (?1, ?2, ?3)",
    )?;
    for payout in payouts {
        stmt.execute(rusqlite::params![
            id,
            payout.publisher_key,
            payout.amount as i64
        ])?;
    }
    Ok(())
}

/// Load a settlement record by id.
pub fn get(conn: &Connection, id: &str) -> Result<Option<Contribution>> {
    type Row = (
        String,
        String,
        i64,
        String,
        i64,
        i64,
        Option<i64>,
        Option<String>,
    );
    let row: Option<Row> = conn
        .query_row(
            "SELECT queue_entry_id, kind, total_amount, step, retry_level, created_at,
                    completed_at, failure_reason
             FROM contributions WHERE id = ?1",
            [id],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                ))
            },
        )
        .optional()?;

    let Some((
        queue_entry_id,
        kind,
        total_amount,
        step,
        retry_level,
        created_at,
        completed_at,
        failure_reason,
    )) = row
    else {
        return Ok(None);
    };

    Ok(Some(Contribution {
        id: id.to_string(),
        queue_entry_id,
        kind: ContributionKind::parse(&kind)?,
        total_amount: total_amount as u64,
        step: ContributionStep::parse(&step)?,
        retry_level: retry_level as u32,
        created_at: created_at as u64,
        completed_at: completed_at.map(|t| t as u64),
        failure_reason: failure_reason
            .as_deref()
            .map(FailureReason::parse)
            .transpose()?,
        publishers: publishers(conn, id)?,
    }))
}

/// The most recent settlement for a queue entry, terminal or not.
///
/// A terminal result means a restart found the settlement finished but
/// its queue entry still present; the caller reaps the leftover entry
/// instead of settling it again.
pub fn for_queue_entry(conn: &Connection, queue_entry_id: &str) -> Result<Option<Contribution>> {
    let id: Option<String> = conn
        .query_row(
            "SELECT id FROM contributions WHERE queue_entry_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT 1",
            [queue_entry_id],
            |row| row.get(0),
        )
        .optional()?;
    match id {
        Some(id) => get(conn, &id),
        None => Ok(None),
    }
}

/// Load the decided payouts for a settlement.
pub fn publishers(conn: &Connection, id: &str) -> Result<Vec<PublisherPayout>> {
    let mut stmt = conn.prepare(
        "SELECT publisher_key, amount FROM contribution_publishers
         WHERE contribution_id = ?1 ORDER BY publisher_key",
    )?;
    let payouts = stmt
        .query_map([id], |row| {
            Ok(PublisherPayout {
                publisher_key: row.get(0)?,
                amount: row.get::<_, i64>(1)? as u64,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(payouts)
}

/// Record a terminal settlement amount for diagnostics.
pub fn record_balance_report(
    conn: &Connection,
    kind: ContributionKind,
    amount: u64,
    now: u64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO balance_reports (kind, amount, created_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![kind.as_str(), amount as i64, now as i64],
    )?;
    Ok(())
}

/// Total reported amount for a contribution kind.
pub fn balance_report_total(conn: &Connection, kind: ContributionKind) -> Result<u64> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM balance_reports WHERE kind = ?1",
        [kind.as_str()],
        |row| row.get(0),
    )?;
    Ok(total as u64)
}
