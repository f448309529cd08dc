//! # tally-db
//!
//! Transactional datastore for the Tally ledger. Manages the single SQLite
//! database holding the contribution queue, settlement records, credential
//! batches, tokens, promotions, and publisher verification cache.
//!
//! ## Discipline
//!
//! - WAL mode, foreign keys enforced, busy timeout set
//! - One [`Store`] instance owns the file handle for the process lifetime
//! - Schema version and compatible-version floor live in the `meta` table;
//!   a store whose compatible version exceeds this binary's target version
//!   refuses to open
//! - All timestamps are Unix epoch seconds

pub mod migrations;
pub mod queries;
pub mod schema;
pub mod store;

use std::path::Path;

use rusqlite::Connection;

pub use store::{
    ColumnType, DbCommand, DbCommandResponse, DbStatus, DbTransaction, DbTransactionResult,
    DbValue, Store,
};

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 4;

/// Oldest schema version this binary can still operate.
pub const COMPATIBLE_VERSION: u32 = 1;

/// Database error types.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("store is too new: on-disk compatible version {on_disk} exceeds binary version {binary}")]
    TooNew { on_disk: u32, binary: u32 },

    #[error("store initialization failed: {0}")]
    Initialization(String),

    #[error("store handle is closed")]
    Closed,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("stored value error: {0}")]
    StoredValue(#[from] tally_types::TypeError),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Open or create the ledger database at the given path.
///
/// Configures pragmas and runs any pending migrations up to
/// [`SCHEMA_VERSION`].
pub fn open(path: &Path) -> Result<Store> {
    let conn = Connection::open(path)
        .map_err(|e| DbError::Initialization(e.to_string()))?;
    configure(&conn)?;
    migrations::run(&conn, SCHEMA_VERSION, COMPATIBLE_VERSION)?;
    Ok(Store::new(conn))
}

/// Open an in-memory database (for testing).
pub fn open_memory() -> Result<Store> {
    let conn = Connection::open_in_memory()
        .map_err(|e| DbError::Initialization(e.to_string()))?;
    configure(&conn)?;
    migrations::run(&conn, SCHEMA_VERSION, COMPATIBLE_VERSION)?;
    Ok(Store::new(conn))
}

/// Configure SQLite pragmas.
fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -8000;",
    )?;
    Ok(())
}
