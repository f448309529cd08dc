//! The transactional store and its command-batch wire contract.
//!
//! [`Store`] owns the single SQLite handle. [`Store::run_transaction`]
//! executes an ordered sequence of [`DbCommand`]s atomically: every command
//! commits together or the whole transaction rolls back on the first
//! failure. `Vacuum` is the one exception: SQLite forbids vacuuming
//! inside a transaction, so it must be the sole command in its batch.

use rusqlite::Connection;

use crate::{migrations, DbError, Result};

/// A typed positional binding.
#[derive(Clone, Debug, PartialEq)]
pub enum DbValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Bool(bool),
}

impl rusqlite::ToSql for DbValue {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        use rusqlite::types::{ToSqlOutput, Value};
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(Value::Null),
            Self::Integer(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            Self::Real(v) => ToSqlOutput::Owned(Value::Real(*v)),
            Self::Text(v) => ToSqlOutput::Owned(Value::Text(v.clone())),
            Self::Bool(v) => ToSqlOutput::Owned(Value::Integer(i64::from(*v))),
        })
    }
}

/// Expected column type for a `Read` result column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    String,
    Int,
    Int64,
    Double,
    Bool,
}

/// One command within a transaction.
#[derive(Clone, Debug)]
pub enum DbCommand {
    /// Open-or-create metadata; fails if the store is too new.
    Initialize {
        version: u32,
        compatible_version: u32,
    },
    /// Non-parametrized DDL/statement batch.
    Execute { text: String },
    /// Parametrized mutating statement.
    Run {
        text: String,
        bindings: Vec<DbValue>,
    },
    /// Parametrized query; all rows are materialized before returning.
    Read {
        text: String,
        bindings: Vec<DbValue>,
        column_types: Vec<ColumnType>,
    },
    /// Run pending schema migrations up to `version`.
    Migrate {
        version: u32,
        compatible_version: u32,
    },
    /// Reclaim space. Must be the only command in its transaction.
    Vacuum,
    /// Close the handle; subsequent transactions fail.
    Close,
}

/// Status of a command or transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DbStatus {
    Ok,
    CommandError,
    TransactionError,
    InitializationError,
    ResponseError,
}

/// Result of one command.
#[derive(Clone, Debug)]
pub struct DbCommandResponse {
    pub status: DbStatus,
    /// Materialized rows, non-empty only for `Read`.
    pub rows: Vec<Vec<DbValue>>,
}

/// An atomic batch of commands.
#[derive(Clone, Debug)]
pub struct DbTransaction {
    pub version: u32,
    pub compatible_version: u32,
    pub commands: Vec<DbCommand>,
}

/// Result of a whole transaction.
#[derive(Clone, Debug)]
pub struct DbTransactionResult {
    pub status: DbStatus,
    pub responses: Vec<DbCommandResponse>,
}

impl DbTransactionResult {
    fn failed(status: DbStatus) -> Self {
        Self {
            status,
            responses: Vec::new(),
        }
    }
}

/// Owner of the single database handle.
///
/// All calls are serialized by `&mut self`; the handle is never shared.
pub struct Store {
    conn: Connection,
    closed: bool,
}

impl Store {
    /// Wrap an already-configured connection.
    pub(crate) fn new(conn: Connection) -> Self {
        Self { conn, closed: false }
    }

    /// Shared access for the entity query modules.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Exclusive access for query helpers that need their own savepoints.
    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Execute a command batch atomically.
    ///
    /// The first failing command rolls back everything executed so far and
    /// the transaction reports that command's status.
    pub fn run_transaction(&mut self, tx: DbTransaction) -> DbTransactionResult {
        if self.closed {
            return DbTransactionResult::failed(DbStatus::InitializationError);
        }
        if tx.commands.is_empty() {
            return DbTransactionResult::failed(DbStatus::TransactionError);
        }

        // Vacuum cannot run inside a transaction; it must come alone.
        let has_vacuum = tx
            .commands
            .iter()
            .any(|c| matches!(c, DbCommand::Vacuum));
        if has_vacuum {
            if tx.commands.len() != 1 {
                tracing::warn!("vacuum batched with other commands; rejecting");
                return DbTransactionResult::failed(DbStatus::TransactionError);
            }
            return match self.conn.execute_batch("VACUUM;") {
                Ok(()) => DbTransactionResult {
                    status: DbStatus::Ok,
                    responses: vec![DbCommandResponse {
                        status: DbStatus::Ok,
                        rows: Vec::new(),
                    }],
                },
                Err(e) => {
                    tracing::error!(error = %e, "vacuum failed");
                    DbTransactionResult::failed(DbStatus::CommandError)
                }
            };
        }

        if self.conn.execute_batch("BEGIN;").is_err() {
            return DbTransactionResult::failed(DbStatus::TransactionError);
        }

        let mut responses = Vec::with_capacity(tx.commands.len());
        let mut close_requested = false;
        for command in &tx.commands {
            let response = self.run_command(command);
            let status = response.status;
            responses.push(response);
            if status != DbStatus::Ok {
                let _ = self.conn.execute_batch("ROLLBACK;");
                return DbTransactionResult { status, responses };
            }
            if matches!(command, DbCommand::Close) {
                close_requested = true;
            }
        }

        if self.conn.execute_batch("COMMIT;").is_err() {
            let _ = self.conn.execute_batch("ROLLBACK;");
            return DbTransactionResult::failed(DbStatus::TransactionError);
        }

        if close_requested {
            self.closed = true;
            tracing::info!("store handle closed");
        }

        DbTransactionResult {
            status: DbStatus::Ok,
            responses,
        }
    }

    /// Hint that the process is under critical memory pressure; trims
    /// SQLite's internal caches without touching durable state.
    pub fn on_memory_pressure(&self) {
        if let Err(e) = self.conn.execute_batch("PRAGMA shrink_memory;") {
            tracing::warn!(error = %e, "shrink_memory failed");
        } else {
            tracing::debug!("trimmed sqlite caches under memory pressure");
        }
    }

    fn run_command(&self, command: &DbCommand) -> DbCommandResponse {
        let empty = DbCommandResponse {
            status: DbStatus::Ok,
            rows: Vec::new(),
        };
        match command {
            DbCommand::Initialize {
                version,
                compatible_version: _,
            } => {
                let on_disk = match migrations::stored_compatible_version(&self.conn) {
                    Ok(v) => v,
                    Err(_) => {
                        return DbCommandResponse {
                            status: DbStatus::InitializationError,
                            rows: Vec::new(),
                        }
                    }
                };
                if on_disk > *version {
                    tracing::error!(on_disk, binary = version, "store too new");
                    return DbCommandResponse {
                        status: DbStatus::InitializationError,
                        rows: Vec::new(),
                    };
                }
                empty
            }
            DbCommand::Execute { text } => match self.conn.execute_batch(text) {
                Ok(()) => empty,
                Err(e) => {
                    tracing::error!(error = %e, "execute failed");
                    DbCommandResponse {
                        status: DbStatus::CommandError,
                        rows: Vec::new(),
                    }
                }
            },
            DbCommand::Run { text, bindings } => {
                let result = self
                    .conn
                    .execute(text, rusqlite::params_from_iter(bindings.iter()));
                match result {
                    Ok(_) => empty,
                    Err(e) => {
                        tracing::error!(error = %e, "run failed");
                        DbCommandResponse {
                            status: DbStatus::CommandError,
                            rows: Vec::new(),
                        }
                    }
                }
            }
            DbCommand::Read {
                text,
                bindings,
                column_types,
            } => self.read(text, bindings, column_types),
            DbCommand::Migrate {
                version,
                compatible_version,
            } => match migrations::run(&self.conn, *version, *compatible_version) {
                Ok(()) => empty,
                Err(DbError::TooNew { .. }) => DbCommandResponse {
                    status: DbStatus::InitializationError,
                    rows: Vec::new(),
                },
                Err(e) => {
                    tracing::error!(error = %e, "migration failed");
                    DbCommandResponse {
                        status: DbStatus::CommandError,
                        rows: Vec::new(),
                    }
                }
            },
            // Handled before the loop; unreachable inside a transaction.
            DbCommand::Vacuum => DbCommandResponse {
                status: DbStatus::TransactionError,
                rows: Vec::new(),
            },
            DbCommand::Close => empty,
        }
    }

    fn read(
        &self,
        text: &str,
        bindings: &[DbValue],
        column_types: &[ColumnType],
    ) -> DbCommandResponse {
        let mut stmt = match self.conn.prepare(text) {
            Ok(stmt) => stmt,
            Err(e) => {
                tracing::error!(error = %e, "read prepare failed");
                return DbCommandResponse {
                    status: DbStatus::CommandError,
                    rows: Vec::new(),
                };
            }
        };

        let mapped = stmt.query_map(rusqlite::params_from_iter(bindings.iter()), |row| {
            let mut values = Vec::with_capacity(column_types.len());
            for (idx, ty) in column_types.iter().enumerate() {
                let value = match ty {
                    ColumnType::String => DbValue::Text(row.get::<_, String>(idx)?),
                    ColumnType::Int | ColumnType::Int64 => {
                        DbValue::Integer(row.get::<_, i64>(idx)?)
                    }
                    ColumnType::Double => DbValue::Real(row.get::<_, f64>(idx)?),
                    ColumnType::Bool => DbValue::Bool(row.get::<_, i64>(idx)? != 0),
                };
                values.push(value);
            }
            Ok(values)
        });

        // All rows are materialized before returning; unbounded result
        // sets are a known scaling limit.
        match mapped.and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>()) {
            Ok(rows) => DbCommandResponse {
                status: DbStatus::Ok,
                rows,
            },
            Err(e) => {
                tracing::error!(error = %e, "read failed");
                DbCommandResponse {
                    status: DbStatus::ResponseError,
                    rows: Vec::new(),
                }
            }
        }
    }
}
