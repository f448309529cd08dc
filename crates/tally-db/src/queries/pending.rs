//! Pending contribution query functions.
//!
//! Shares destined for unverified publishers are held back here and
//! retried automatically once the publisher's verification status flips.

use rusqlite::Connection;

use tally_types::contribution::{ContributionKind, PendingContribution};

use crate::{DbError, Result};

/// Hold back a share for an unverified publisher.
pub fn insert(
    conn: &Connection,
    publisher_key: &str,
    amount: u64,
    kind: ContributionKind,
    now: u64,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO pending_contributions (publisher_key, amount, kind, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![publisher_key, amount as i64, kind.as_str(), now as i64],
    )?;
    let id = conn.last_insert_rowid();
    tracing::info!(publisher_key, amount, id, "contribution held pending verification");
    Ok(id)
}

/// All held shares, oldest first.
pub fn list(conn: &Connection) -> Result<Vec<PendingContribution>> {
    query(conn, "SELECT id, publisher_key, amount, kind, created_at
                 FROM pending_contributions ORDER BY created_at ASC, id ASC", &[])
}

/// Held shares for one publisher, oldest first.
pub fn list_for_publisher(
    conn: &Connection,
    publisher_key: &str,
) -> Result<Vec<PendingContribution>> {
    query(
        conn,
        "SELECT id, publisher_key, amount, kind, created_at
         FROM pending_contributions WHERE publisher_key = ?1
         ORDER BY created_at ASC, id ASC",
        &[publisher_key],
    )
}

/// Remove a held share once it has been re-queued or abandoned.
pub fn remove(conn: &Connection, id: i64) -> Result<()> {
    let removed = conn.execute("DELETE FROM pending_contributions WHERE id = ?1", [id])?;
    if removed == 0 {
        return Err(DbError::NotFound(format!("pending contribution {id}")));
    }
    Ok(())
}

/// Total held amount in micro-tokens.
pub fn total_amount(conn: &Connection) -> Result<u64> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM pending_contributions",
        [],
        |row| row.get(0),
    )?;
    Ok(total as u64)
}

fn query(
    conn: &Connection,
    sql: &str,
    params: &[&str],
) -> Result<Vec<PendingContribution>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut result = Vec::with_capacity(rows.len());
    for (id, publisher_key, amount, kind, created_at) in rows {
        result.push(PendingContribution {
            id,
            publisher_key,
            amount: amount as u64,
            kind: ContributionKind::parse(&kind)?,
            created_at: created_at as u64,
        });
    }
    Ok(result)
}
