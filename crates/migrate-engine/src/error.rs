//! Error types for the migration engine
//!
//! [`MigrateError`] is the stable taxonomy surfaced to callers. Every variant
//! has a fixed message template and, where applicable, a stable error code.
//! Variants that wrap a lower-level failure keep it as their source so that
//! diagnostics are never lost.

use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for engine operations
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Result type alias for connector operations
pub type DriverResult<T> = Result<T, DriverError>;

/// Error taxonomy of the migration engine
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("Could not find a schema.prisma file that is required for this command.\nYou can either provide it with --schema or put it into the default location ./prisma/schema.prisma https://pris.ly/d/prisma-schema-location")]
    SchemaFileNotFound { path: PathBuf },

    #[error("An error occurred when reading the migrations directory.")]
    DirectoryNotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("An error occurred when reading the migrations directory.")]
    DirectoryUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("The migration directory name `{name}` is invalid: {reason}")]
    InvalidMigrationName { name: String, reason: String },

    #[error("The migrations `{first}` and `{second}` share the sequence key `{key}`.")]
    DuplicateSequenceKey {
        key: String,
        first: String,
        second: String,
    },

    #[error("Could not find the migration file at {}. Please delete the directory or restore the migration file.", .path.display())]
    MigrationScriptUnreadable {
        name: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("The underlying table for model `{namespace}.{table}` does not exist.")]
    HistoryTableUnavailable {
        namespace: String,
        table: String,
        #[source]
        source: DriverError,
    },

    #[error("The migration `{name}` is already being applied by another process.")]
    AlreadyInProgress { name: String },

    #[error("migrate found failed migrations in the target database, new migrations will not be applied. The `{}` migration(s) failed", .names.join("`, `"))]
    FailedMigrationsBlocking { names: Vec<String> },

    #[error("A migration failed to apply. New migrations cannot be applied before the error is recovered from.\n\nMigration name: {name}\n\nStatement index: {statement_index}\n\nDatabase error: {source}{}", history_note(.history_error))]
    MigrationApplyFailed {
        name: String,
        statement_index: usize,
        #[source]
        source: DriverError,
        /// Set when the failure itself could not be written to the history table
        history_error: Option<String>,
    },

    #[error("The database could not be reset: {source}")]
    ResetDropFailed {
        #[source]
        source: DriverError,
    },

    #[error("Use the --force flag to reset the database. This operation drops all data.")]
    ConfirmationRequired,

    #[error("This feature is currently in preview. It needs to be explicitly allowed with --experimental.")]
    ExperimentalFlagRequired,

    #[error("Can't reach database server at `{target}`: {source}")]
    DatabaseUnreachable {
        target: String,
        #[source]
        source: DriverError,
    },

    #[error("Migration `{name}` cannot be rolled back because it is not in a failed state.")]
    NotInFailedState { name: String },

    #[error("{message}")]
    InvalidConfiguration { message: String },

    #[error("{message}")]
    Generic {
        message: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },
}

fn history_note(history_error: &Option<String>) -> String {
    match history_error {
        Some(err) => format!(
            "\n\nThe failure could not be recorded in the migration history: {}",
            err
        ),
        None => String::new(),
    }
}

impl MigrateError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Create a generic error without an underlying cause
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
            source: None,
        }
    }

    /// Create a generic error that keeps the underlying cause
    pub fn generic_with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Generic {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Stable error code, if the variant has one
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::InvalidMigrationName { .. } => Some("P3013"),
            Self::MigrationScriptUnreadable { .. } => Some("P3015"),
            Self::DuplicateSequenceKey { .. } => Some("P3016"),
            Self::HistoryTableUnavailable { .. } => Some("P1014"),
            Self::AlreadyInProgress { .. } => Some("P3008"),
            Self::FailedMigrationsBlocking { .. } => Some("P3009"),
            Self::MigrationApplyFailed { .. } => Some("P3018"),
            Self::ResetDropFailed { .. } => Some("P3005"),
            Self::DatabaseUnreachable { .. } => Some("P1001"),
            Self::NotInFailedState { .. } => Some("P3012"),
            Self::SchemaFileNotFound { .. }
            | Self::DirectoryNotFound { .. }
            | Self::DirectoryUnreadable { .. }
            | Self::ConfirmationRequired
            | Self::ExperimentalFlagRequired
            | Self::InvalidConfiguration { .. }
            | Self::Generic { .. } => None,
        }
    }

    /// Name of the taxonomy variant
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SchemaFileNotFound { .. } => "SchemaFileNotFound",
            Self::DirectoryNotFound { .. } => "DirectoryNotFound",
            Self::DirectoryUnreadable { .. } => "DirectoryUnreadable",
            Self::InvalidMigrationName { .. } => "InvalidMigrationName",
            Self::DuplicateSequenceKey { .. } => "DuplicateSequenceKey",
            Self::MigrationScriptUnreadable { .. } => "MigrationScriptUnreadable",
            Self::HistoryTableUnavailable { .. } => "HistoryTableUnavailable",
            Self::AlreadyInProgress { .. } => "AlreadyInProgress",
            Self::FailedMigrationsBlocking { .. } => "FailedMigrationsBlocking",
            Self::MigrationApplyFailed { .. } => "MigrationApplyFailed",
            Self::ResetDropFailed { .. } => "ResetDropFailed",
            Self::ConfirmationRequired => "ConfirmationRequired",
            Self::ExperimentalFlagRequired => "ExperimentalFlagRequired",
            Self::DatabaseUnreachable { .. } => "DatabaseUnreachable",
            Self::NotInFailedState { .. } => "NotInFailedState",
            Self::InvalidConfiguration { .. } => "InvalidConfiguration",
            Self::Generic { .. } => "Generic",
        }
    }

    /// Whether the error is reported with the `Generic error:` prefix
    pub fn is_generic(&self) -> bool {
        matches!(
            self,
            Self::DirectoryNotFound { .. } | Self::DirectoryUnreadable { .. } | Self::Generic { .. }
        )
    }
}

/// Classification of a failure reported by the database driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// The queried table or relation does not exist
    MissingTable,
    /// The target database itself does not exist
    MissingDatabase,
    /// A unique constraint rejected a write
    UniqueViolation,
    /// The server could not be reached or the connection broke
    Connectivity,
    /// Anything else, including SQL errors raised by migration scripts
    Other,
}

/// A failure reported by a connector, with its classification
#[derive(Debug, Error)]
pub struct DriverError {
    pub kind: DriverErrorKind,
    /// SQLSTATE (PostgreSQL) or extended result code (SQLite)
    pub code: Option<String>,
    pub message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl DriverError {
    pub fn new(kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn is_missing_database(&self) -> bool {
        self.kind == DriverErrorKind::MissingDatabase
    }

    /// Table or database missing: the history cannot be read at all
    pub fn is_missing_target(&self) -> bool {
        matches!(
            self.kind,
            DriverErrorKind::MissingTable | DriverErrorKind::MissingDatabase
        )
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} (code {})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

/// A script that stopped at `statement_index`
#[derive(Debug)]
pub struct ScriptFailure {
    pub statement_index: usize,
    pub error: DriverError,
}

impl ScriptFailure {
    pub fn new(statement_index: usize, error: DriverError) -> Self {
        Self {
            statement_index,
            error,
        }
    }
}

/// Rendered form of a [`MigrateError`] for operators and automation
///
/// The text is stable across versions: errors with a code render as
/// `"{code}\n\n{message}\n"`, generic errors as `"Generic error: {message}\n"`
/// and precondition errors as their bare message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserFacingError {
    pub code: Option<&'static str>,
    pub kind: &'static str,
    pub message: String,
    generic: bool,
    causes: Vec<String>,
}

impl UserFacingError {
    /// Underlying causes, outermost first
    pub fn causes(&self) -> &[String] {
        &self.causes
    }
}

impl From<&MigrateError> for UserFacingError {
    fn from(err: &MigrateError) -> Self {
        let mut causes = Vec::new();
        let mut current = err.source();
        while let Some(cause) = current {
            causes.push(cause.to_string());
            current = cause.source();
        }

        Self {
            code: err.code(),
            kind: err.kind(),
            message: err.to_string(),
            generic: err.is_generic(),
            causes,
        }
    }
}

impl fmt::Display for UserFacingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{}\n\n{}\n", code, self.message),
            None if self.generic => write!(f, "Generic error: {}\n", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_table_error_renders_with_code() {
        let err = MigrateError::HistoryTableUnavailable {
            namespace: "quaint".to_string(),
            table: "_prisma_migrations".to_string(),
            source: DriverError::new(DriverErrorKind::MissingTable, "no such table: _prisma_migrations"),
        };

        let rendered = UserFacingError::from(&err).to_string();
        assert_eq!(
            rendered,
            "P1014\n\nThe underlying table for model `quaint._prisma_migrations` does not exist.\n"
        );
    }

    #[test]
    fn test_directory_not_found_renders_as_generic() {
        let err = MigrateError::DirectoryNotFound {
            path: PathBuf::from("prisma/migrations"),
            source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
        };

        let rendered = UserFacingError::from(&err);
        assert_eq!(
            rendered.to_string(),
            "Generic error: An error occurred when reading the migrations directory.\n"
        );
        assert_eq!(rendered.kind, "DirectoryNotFound");
        assert_eq!(rendered.causes(), ["No such file or directory".to_string()]);
    }

    #[test]
    fn test_schema_file_not_found_renders_bare_message() {
        let err = MigrateError::SchemaFileNotFound {
            path: PathBuf::from("prisma/schema.prisma"),
        };

        let rendered = UserFacingError::from(&err).to_string();
        assert!(rendered.starts_with(
            "Could not find a schema.prisma file that is required for this command."
        ));
        assert!(rendered.ends_with("https://pris.ly/d/prisma-schema-location"));
    }

    #[test]
    fn test_apply_failure_keeps_driver_cause() {
        let err = MigrateError::MigrationApplyFailed {
            name: "20201231000000_init".to_string(),
            statement_index: 2,
            source: DriverError::new(DriverErrorKind::Other, "syntax error at or near \"TABEL\"")
                .with_code("42601"),
            history_error: None,
        };

        assert_eq!(err.code(), Some("P3018"));
        let message = err.to_string();
        assert!(message.contains("Migration name: 20201231000000_init"));
        assert!(message.contains("Statement index: 2"));
        assert!(message.contains("syntax error at or near \"TABEL\" (code 42601)"));
        assert!(err.source().is_some());
        assert!(!message.contains("could not be recorded"));
    }

    #[test]
    fn test_apply_failure_mentions_unrecorded_history() {
        let err = MigrateError::MigrationApplyFailed {
            name: "20201231000000_init".to_string(),
            statement_index: 0,
            source: DriverError::new(DriverErrorKind::Other, "no such table: missing"),
            history_error: Some("disk I/O error".to_string()),
        };

        assert!(err.to_string().ends_with(
            "Database error: no such table: missing\n\n\
             The failure could not be recorded in the migration history: disk I/O error"
        ));
    }

    #[test]
    fn test_failed_migrations_message_lists_names() {
        let err = MigrateError::FailedMigrationsBlocking {
            names: vec!["1_a".to_string(), "2_b".to_string()],
        };
        assert!(err.to_string().ends_with("The `1_a`, `2_b` migration(s) failed"));
    }
}
