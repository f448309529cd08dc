//! Reconcile stamp: when the next auto-contribute cycle is due.
//!
//! Stored in the `meta` table alongside the schema version. The engine
//! resets the stamp one interval forward after each completed
//! auto-contribute settlement.

use rusqlite::{Connection, OptionalExtension};

use crate::{DbError, Result};

const STAMP_KEY: &str = "reconcile_stamp";

/// The next auto-contribute timestamp, if one has been scheduled.
pub fn get(conn: &Connection) -> Result<Option<u64>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = ?1",
            [STAMP_KEY],
            |row| row.get(0),
        )
        .optional()?;
    match value {
        None => Ok(None),
        Some(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|e| DbError::Serialization(format!("corrupt reconcile stamp: {e}"))),
    }
}

/// Schedule the next auto-contribute cycle.
pub fn set(conn: &Connection, next_at: u64) -> Result<()> {
    conn.execute(
        "INSERT INTO meta (key, value) VALUES (?1, ?2)
         ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        rusqlite::params![STAMP_KEY, next_at.to_string()],
    )?;
    tracing::debug!(next_at, "reconcile stamp persisted");
    Ok(())
}
