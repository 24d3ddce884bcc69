//! Error classification
//!
//! Maps low-level driver and filesystem failures onto the stable
//! [`MigrateError`] taxonomy. The mapping is part of the public contract:
//! callers and tests match on the resulting codes and messages.

use std::io;
use std::path::Path;

use crate::error::{DriverError, DriverErrorKind, MigrateError};

/// PostgreSQL SQLSTATE: undefined_table
const PG_UNDEFINED_TABLE: &str = "42P01";
/// PostgreSQL SQLSTATE: invalid_catalog_name (database does not exist)
const PG_INVALID_CATALOG_NAME: &str = "3D000";
/// PostgreSQL SQLSTATE: unique_violation
const PG_UNIQUE_VIOLATION: &str = "23505";
/// SQLite SQLITE_CANTOPEN
const SQLITE_CANTOPEN: &str = "14";
/// SQLite SQLITE_CONSTRAINT_UNIQUE
const SQLITE_CONSTRAINT_UNIQUE: &str = "2067";
/// SQLite SQLITE_CONSTRAINT_PRIMARYKEY
const SQLITE_CONSTRAINT_PRIMARYKEY: &str = "1555";

/// Stateless mapping from low-level failures to the engine taxonomy
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify an error raised by sqlx
    pub fn driver(err: sqlx::Error) -> DriverError {
        match &err {
            sqlx::Error::Database(db) => {
                let code = db.code().map(|c| c.into_owned());
                let message = db.message().to_string();
                let kind = Self::database_error_kind(code.as_deref(), &message);

                let mut classified = DriverError::new(kind, message);
                if let Some(code) = code {
                    classified = classified.with_code(code);
                }
                classified.with_source(err)
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => {
                DriverError::new(DriverErrorKind::Connectivity, err.to_string()).with_source(err)
            }
            _ => DriverError::new(DriverErrorKind::Other, err.to_string()).with_source(err),
        }
    }

    /// Classify a database error by SQLSTATE / result code, then by message
    pub fn database_error_kind(code: Option<&str>, message: &str) -> DriverErrorKind {
        match code {
            Some(PG_UNDEFINED_TABLE) => return DriverErrorKind::MissingTable,
            Some(PG_INVALID_CATALOG_NAME) | Some(SQLITE_CANTOPEN) => {
                return DriverErrorKind::MissingDatabase
            }
            Some(PG_UNIQUE_VIOLATION)
            | Some(SQLITE_CONSTRAINT_UNIQUE)
            | Some(SQLITE_CONSTRAINT_PRIMARYKEY) => return DriverErrorKind::UniqueViolation,
            _ => {}
        }

        let lowered = message.to_lowercase();
        if lowered.contains("no such table")
            || (lowered.contains("relation") && lowered.contains("does not exist"))
        {
            DriverErrorKind::MissingTable
        } else if lowered.contains("unable to open database file")
            || (lowered.starts_with("database") && lowered.contains("does not exist"))
        {
            DriverErrorKind::MissingDatabase
        } else if lowered.contains("unique constraint") {
            DriverErrorKind::UniqueViolation
        } else {
            DriverErrorKind::Other
        }
    }

    /// Classify a failure to enumerate the migrations directory
    pub fn directory(path: &Path, err: io::Error) -> MigrateError {
        match err.kind() {
            io::ErrorKind::NotFound => MigrateError::DirectoryNotFound {
                path: path.to_path_buf(),
                source: err,
            },
            _ => MigrateError::DirectoryUnreadable {
                path: path.to_path_buf(),
                source: err,
            },
        }
    }

    /// Classify a failure to read the history table
    pub fn history(namespace: &str, table: &str, err: DriverError) -> MigrateError {
        match err.kind {
            DriverErrorKind::MissingTable | DriverErrorKind::MissingDatabase => {
                MigrateError::HistoryTableUnavailable {
                    namespace: namespace.to_string(),
                    table: table.to_string(),
                    source: err,
                }
            }
            DriverErrorKind::Connectivity => MigrateError::DatabaseUnreachable {
                target: namespace.to_string(),
                source: err,
            },
            _ => MigrateError::generic_with_source(
                format!("Failed to read the migration history from `{}`", table),
                err,
            ),
        }
    }

    /// Classify a failure to create a missing target database
    pub fn creation(target: &str, err: DriverError) -> MigrateError {
        match err.kind {
            DriverErrorKind::Connectivity => MigrateError::DatabaseUnreachable {
                target: target.to_string(),
                source: err,
            },
            _ => MigrateError::generic_with_source(
                format!("Failed to create the database `{}`", target),
                err,
            ),
        }
    }

    /// Classify a failure to open a connection to the target
    ///
    /// A missing database is reported like a missing history table: from the
    /// caller's point of view there is no history to read either way.
    pub fn connection(target: &str, namespace: &str, table: &str, err: DriverError) -> MigrateError {
        if err.is_missing_database() {
            MigrateError::HistoryTableUnavailable {
                namespace: namespace.to_string(),
                table: table.to_string(),
                source: err,
            }
        } else {
            MigrateError::DatabaseUnreachable {
                target: target.to_string(),
                source: err,
            }
        }
    }
}

impl From<sqlx::Error> for DriverError {
    fn from(err: sqlx::Error) -> Self {
        ErrorClassifier::driver(err)
    }
}
