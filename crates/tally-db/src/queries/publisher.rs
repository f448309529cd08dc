//! Publisher verification cache query functions.

use rusqlite::{Connection, OptionalExtension};

use tally_types::publisher::{PublisherStatus, ServerPublisherInfo};

use crate::Result;

/// Insert or refresh a publisher's verification record.
pub fn upsert(conn: &Connection, info: &ServerPublisherInfo) -> Result<()> {
    conn.execute(
        "INSERT INTO server_publisher_info (publisher_key, status, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(publisher_key) DO UPDATE SET
             status = excluded.status,
             updated_at = excluded.updated_at",
        rusqlite::params![
            info.publisher_key,
            info.status.as_str(),
            info.updated_at as i64
        ],
    )?;
    Ok(())
}

/// The cached record for a publisher, if any.
pub fn get(conn: &Connection, publisher_key: &str) -> Result<Option<ServerPublisherInfo>> {
    let row: Option<(String, i64)> = conn
        .query_row(
            "SELECT status, updated_at FROM server_publisher_info WHERE publisher_key = ?1",
            [publisher_key],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let Some((status, updated_at)) = row else {
        return Ok(None);
    };

    Ok(Some(ServerPublisherInfo {
        publisher_key: publisher_key.to_string(),
        status: PublisherStatus::parse(&status)?,
        updated_at: updated_at as u64,
    }))
}

/// Whether the cache says this publisher is verified. Unknown publishers
/// count as not verified.
pub fn is_verified(conn: &Connection, publisher_key: &str) -> Result<bool> {
    Ok(get(conn, publisher_key)?
        .map(|info| info.status == PublisherStatus::Verified)
        .unwrap_or(false))
}
