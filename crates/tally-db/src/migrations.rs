//! Schema migration system.
//!
//! The `meta` table stores the schema `version` and the
//! `compatible_version` floor. Migrations are an ordered sequence of
//! idempotent per-version steps; the stored version advances only after a
//! step succeeds, and a whole-run failure leaves the store at its previous
//! operable version. A store whose `compatible_version` exceeds the
//! binary's target version refuses to open.

use rusqlite::{Connection, OptionalExtension};

use crate::{schema, DbError, Result};

/// Run all pending migrations up to `target`, recording `compatible` as the
/// new compatible-version floor.
pub fn run(conn: &Connection, target: u32, compatible: u32) -> Result<()> {
    ensure_meta_table(conn)?;

    let current = stored_version(conn)?;
    let on_disk_compatible = stored_compatible_version(conn)?;

    if on_disk_compatible > target {
        return Err(DbError::TooNew {
            on_disk: on_disk_compatible,
            binary: target,
        });
    }

    if current > target {
        // Newer schema but still within our compatible floor: operate as-is.
        tracing::warn!(current, target, "schema is ahead of binary; running compatible");
        return Ok(());
    }

    if current == 0 {
        tracing::info!(target, "initializing ledger schema");
    }

    for version in (current + 1)..=target {
        tracing::info!(version, "running schema migration");
        apply_step(conn, version)?;
        set_meta(conn, "version", version)?;
    }

    set_meta(conn, "compatible_version", compatible)?;
    Ok(())
}

/// Apply the migration step for a single version inside a savepoint, so a
/// failed step leaves the previous version intact and operable.
fn apply_step(conn: &Connection, version: u32) -> Result<()> {
    conn.execute_batch("SAVEPOINT migration_step;")?;
    let result = match version {
        1 => conn.execute_batch(schema::MIGRATION_V1),
        2 => conn.execute_batch(schema::MIGRATION_V2),
        3 => conn.execute_batch(schema::MIGRATION_V3),
        4 => conn.execute_batch(schema::MIGRATION_V4),
        other => {
            conn.execute_batch("ROLLBACK TO migration_step; RELEASE migration_step;")?;
            return Err(DbError::Migration(format!(
                "unknown migration version: {other}"
            )));
        }
    };
    match result {
        Ok(()) => {
            conn.execute_batch("RELEASE migration_step;")?;
            Ok(())
        }
        Err(e) => {
            conn.execute_batch("ROLLBACK TO migration_step; RELEASE migration_step;")?;
            Err(DbError::Migration(format!("migration v{version} failed: {e}")))
        }
    }
}

/// The stored schema version, 0 for a fresh database.
pub fn stored_version(conn: &Connection) -> Result<u32> {
    get_meta(conn, "version")
}

/// The stored compatible-version floor, 0 for a fresh database.
pub fn stored_compatible_version(conn: &Connection) -> Result<u32> {
    get_meta(conn, "compatible_version")
}

fn ensure_meta_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )?;
    Ok(())
}

fn get_meta(conn: &Connection, key: &str) -> Result<u32> {
    let value: Option<String> = conn
        .query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| {
            row.get(0)
        })
        .optional()?;
    match value {
        Some(text) => text
            .parse::<u32>()
            .map_err(|e| DbError::Migration(format!("corrupt meta value for {key}: {e}"))),
        None => Ok(0),
    }
}

fn set_meta(conn: &Connection, key: &str, value: u32) -> Result<()> {
    conn.execute(
        "INSERT INTO meta (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        rusqlite::params![key, value.to_string()],
    )?;
    Ok(())
}
