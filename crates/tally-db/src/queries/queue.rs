//! Contribution queue query functions.
//!
//! The queue is FIFO by creation order. Entries are never mutated in
//! place; re-prioritization is removal plus re-insertion. `peek_first` is
//! non-destructive so a crash between peek and settlement re-peeks the
//! same entry.

use rusqlite::{Connection, OptionalExtension};

use tally_types::contribution::{Allocation, ContributionKind, QueueEntry};

use crate::{DbError, Result};

/// Insert a queue entry. Enqueueing an id that already exists is a no-op,
/// making enqueue idempotent across restarts.
pub fn enqueue(conn: &Connection, entry: &QueueEntry, now: u64) -> Result<()> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO contribution_queue (id, kind, total_amount, partial, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            entry.id,
            entry.kind.as_str(),
            entry.total_amount as i64,
            entry.partial as i64,
            now as i64,
        ],
    )?;
    if inserted == 0 {
        tracing::debug!(id = %entry.id, "queue entry already present");
        return Ok(());
    }

    let mut stmt = conn.prepare(
        "INSERT INTO contribution_queue_publishers (queue_id, publisher_key, weight, ord)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (ord, allocation) in entry.allocations.iter().enumerate() {
        stmt.execute(rusqlite::params![
            entry.id,
            allocation.publisher_key,
            allocation.weight,
            ord as i64,
        ])?;
    }

    tracing::info!(id = %entry.id, kind = entry.kind.as_str(), "queue entry added");
    Ok(())
}

/// The oldest entry, without removing it.
pub fn peek_first(conn: &Connection) -> Result<Option<QueueEntry>> {
    let head: Option<(String, String, i64, i64)> = conn
        .query_row(
            "SELECT id, kind, total_amount, partial FROM contribution_queue
             ORDER BY created_at ASC, rowid ASC LIMIT 1",
            [],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                ))
            },
        )
        .optional()?;

    let Some((id, kind, total_amount, partial)) = head else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT publisher_key, weight FROM contribution_queue_publishers
         WHERE queue_id = ?1 ORDER BY ord ASC",
    )?;
    let allocations = stmt
        .query_map([&id], |row| {
            Ok(Allocation {
                publisher_key: row.get(0)?,
                weight: row.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Some(QueueEntry {
        id,
        kind: ContributionKind::parse(&kind)?,
        total_amount: total_amount as u64,
        partial: partial != 0,
        allocations,
    }))
}

/// Remove an entry after its contribution reached a terminal state.
pub fn remove(conn: &Connection, id: &str) -> Result<()> {
    let removed = conn.execute("DELETE FROM contribution_queue WHERE id = ?1", [id])?;
    if removed == 0 {
        return Err(DbError::NotFound(format!("queue entry {id}")));
    }
    tracing::info!(id, "queue entry removed");
    Ok(())
}

/// Drop every queued entry.
pub fn clear(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM contribution_queue", [])?;
    Ok(())
}

/// Number of queued entries.
pub fn len(conn: &Connection) -> Result<u64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM contribution_queue", [], |row| {
        row.get(0)
    })?;
    Ok(count as u64)
}
