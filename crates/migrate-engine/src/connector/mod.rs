//! Database connectors
//!
//! A [`MigrationConnector`] is one session against the target database. It
//! exposes only what the migration engine needs: statement execution,
//! transactional script execution, wiping the target and the primitive
//! reads/writes of the history table. The semantics on top of these
//! primitives live in [`crate::migrations`].

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{DriverResult, ScriptFailure};
use crate::migrations::{HistoryRecord, HistoryUpdate};

pub mod memory;
pub mod postgres;
pub mod sql;
pub mod sqlite;

pub use memory::*;
pub use postgres::*;
pub use sqlite::*;

/// SQL dialect family of a target database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlFlavour {
    Postgres,
    Sqlite,
    /// Process-local database used by tests and dry runs
    InMemory,
}

impl SqlFlavour {
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlFlavour::Postgres => "postgresql",
            SqlFlavour::Sqlite => "sqlite",
            SqlFlavour::InMemory => "memory",
        }
    }
}

impl std::fmt::Display for SqlFlavour {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One session against the target database
#[async_trait]
pub trait MigrationConnector: Send {
    fn flavour(&self) -> SqlFlavour;

    /// Schema (PostgreSQL) or database alias (SQLite) holding the history table
    fn namespace(&self) -> &str;

    /// Whether a whole migration script can run inside one transaction
    fn supports_transactional_ddl(&self) -> bool;

    /// Execute one statement outside of any explicit transaction
    async fn execute(&mut self, sql: &str) -> DriverResult<()>;

    /// Execute all statements in one transaction, rolling back on the first failure
    async fn execute_in_transaction(&mut self, statements: &[String]) -> Result<(), ScriptFailure>;

    /// Drop every object of the target and leave it empty
    async fn reset_schema(&mut self) -> DriverResult<()>;

    /// Create the history table and its open-attempt unique index if absent
    async fn create_history_table(&mut self, table: &str) -> DriverResult<()>;

    /// All history records ordered by `started_at`; never creates the table
    async fn load_history(&mut self, table: &str) -> DriverResult<Vec<HistoryRecord>>;

    async fn insert_history(&mut self, table: &str, record: &HistoryRecord) -> DriverResult<()>;

    async fn update_history(
        &mut self,
        table: &str,
        id: &Uuid,
        update: &HistoryUpdate,
    ) -> DriverResult<()>;
}

/// Opens sessions against a target, and creates the target when missing
#[async_trait]
pub trait Connect: Send + Sync {
    /// Human-readable target, credentials masked
    fn describe(&self) -> String;

    /// Namespace reported when the target cannot be opened at all
    fn namespace(&self) -> String;

    async fn connect(&self) -> DriverResult<Box<dyn MigrationConnector>>;

    async fn create_database(&self) -> DriverResult<()>;
}
