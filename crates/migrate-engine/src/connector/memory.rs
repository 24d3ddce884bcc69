//! In-memory connector
//!
//! A process-local stand-in for a database, shared through a cloneable
//! [`InMemoryDatabase`] handle. It records every executed statement, keeps the
//! history table as plain records and can be told to fail on chosen
//! statements. Used by unit tests and for dry runs.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

use super::{Connect, MigrationConnector, SqlFlavour};
use crate::error::{DriverError, DriverErrorKind, DriverResult, ScriptFailure};
use crate::migrations::{HistoryRecord, HistoryUpdate};

const MEMORY_NAMESPACE: &str = "memory";

#[derive(Debug)]
struct MemoryState {
    exists: bool,
    /// `None` while the history table does not exist
    history: Option<Vec<HistoryRecord>>,
    executed: Vec<String>,
    fail_on: Vec<String>,
    fail_reset: bool,
    fail_history_updates: bool,
    fail_create: bool,
    transactional: bool,
    mutations: usize,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            exists: true,
            history: None,
            executed: Vec::new(),
            fail_on: Vec::new(),
            fail_reset: false,
            fail_history_updates: false,
            fail_create: false,
            transactional: true,
            mutations: 0,
        }
    }
}

impl MemoryState {
    fn check_statement(&self, sql: &str) -> DriverResult<()> {
        match self.fail_on.iter().find(|pattern| sql.contains(pattern.as_str())) {
            Some(pattern) => Err(DriverError::new(
                DriverErrorKind::Other,
                format!("statement rejected: matched `{}`", pattern),
            )),
            None => Ok(()),
        }
    }

    fn history_mut(&mut self, table: &str) -> DriverResult<&mut Vec<HistoryRecord>> {
        self.history
            .as_mut()
            .ok_or_else(|| missing_table(table))
    }
}

fn missing_table(table: &str) -> DriverError {
    DriverError::new(
        DriverErrorKind::MissingTable,
        format!("no such table: {}", table),
    )
}

/// Handle to a process-local database
#[derive(Debug, Clone, Default)]
pub struct InMemoryDatabase {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryDatabase {
    /// An existing, empty database
    pub fn new() -> Self {
        Self::default()
    }

    /// A database that does not exist until `create_database` is called
    pub fn missing() -> Self {
        let database = Self::default();
        database.state.lock().exists = false;
        database
    }

    /// Fail every statement containing `pattern`
    pub fn with_failure(self, pattern: impl Into<String>) -> Self {
        self.state.lock().fail_on.push(pattern.into());
        self
    }

    /// Fail the schema wipe of `reset`
    pub fn with_failing_reset(self) -> Self {
        self.state.lock().fail_reset = true;
        self
    }

    /// Refuse `create_database`
    pub fn with_failing_creation(self) -> Self {
        self.state.lock().fail_create = true;
        self
    }

    /// Fail every update of an existing history record
    pub fn with_failing_history_updates(self) -> Self {
        self.state.lock().fail_history_updates = true;
        self
    }

    /// Execute scripts statement by statement instead of in one transaction
    pub fn non_transactional(self) -> Self {
        self.state.lock().transactional = false;
        self
    }

    pub fn clear_failures(&self) {
        self.state.lock().fail_on.clear();
    }

    pub fn exists(&self) -> bool {
        self.state.lock().exists
    }

    /// Statements committed so far, in order
    pub fn executed(&self) -> Vec<String> {
        self.state.lock().executed.clone()
    }

    /// History records, or `None` while the table does not exist
    pub fn history(&self) -> Option<Vec<HistoryRecord>> {
        self.state.lock().history.clone()
    }

    /// Number of writes performed against the database
    pub fn mutation_count(&self) -> usize {
        self.state.lock().mutations
    }

    /// Replace the history table contents
    pub fn seed_history(&self, records: Vec<HistoryRecord>) {
        self.state.lock().history = Some(records);
    }
}

#[async_trait]
impl Connect for InMemoryDatabase {
    fn describe(&self) -> String {
        "in-memory database".to_string()
    }

    fn namespace(&self) -> String {
        MEMORY_NAMESPACE.to_string()
    }

    async fn connect(&self) -> DriverResult<Box<dyn MigrationConnector>> {
        if !self.exists() {
            return Err(DriverError::new(
                DriverErrorKind::MissingDatabase,
                "database does not exist",
            ));
        }
        Ok(Box::new(InMemoryConnector {
            database: self.clone(),
        }))
    }

    async fn create_database(&self) -> DriverResult<()> {
        let mut state = self.state.lock();
        if state.fail_create {
            return Err(DriverError::new(
                DriverErrorKind::Other,
                "permission denied to create database",
            ));
        }
        state.exists = true;
        state.mutations += 1;
        Ok(())
    }
}

/// One session against an [`InMemoryDatabase`]
#[derive(Debug)]
pub struct InMemoryConnector {
    database: InMemoryDatabase,
}

#[async_trait]
impl MigrationConnector for InMemoryConnector {
    fn flavour(&self) -> SqlFlavour {
        SqlFlavour::InMemory
    }

    fn namespace(&self) -> &str {
        MEMORY_NAMESPACE
    }

    fn supports_transactional_ddl(&self) -> bool {
        self.database.state.lock().transactional
    }

    async fn execute(&mut self, sql: &str) -> DriverResult<()> {
        let mut state = self.database.state.lock();
        state.check_statement(sql)?;
        state.executed.push(sql.to_string());
        state.mutations += 1;
        Ok(())
    }

    async fn execute_in_transaction(&mut self, statements: &[String]) -> Result<(), ScriptFailure> {
        let mut state = self.database.state.lock();
        for (index, statement) in statements.iter().enumerate() {
            state
                .check_statement(statement)
                .map_err(|error| ScriptFailure::new(index, error))?;
        }

        state.executed.extend(statements.iter().cloned());
        state.mutations += 1;
        Ok(())
    }

    async fn reset_schema(&mut self) -> DriverResult<()> {
        let mut state = self.database.state.lock();
        if state.fail_reset {
            return Err(DriverError::new(
                DriverErrorKind::Other,
                "permission denied to drop schema",
            ));
        }
        state.executed.clear();
        state.history = None;
        state.mutations += 1;
        Ok(())
    }

    async fn create_history_table(&mut self, _table: &str) -> DriverResult<()> {
        let mut state = self.database.state.lock();
        if state.history.is_none() {
            state.history = Some(Vec::new());
            state.mutations += 1;
        }
        Ok(())
    }

    async fn load_history(&mut self, table: &str) -> DriverResult<Vec<HistoryRecord>> {
        let state = self.database.state.lock();
        let mut records = state.history.clone().ok_or_else(|| missing_table(table))?;
        records.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(records)
    }

    async fn insert_history(&mut self, table: &str, record: &HistoryRecord) -> DriverResult<()> {
        let mut state = self.database.state.lock();
        let history = state.history_mut(table)?;

        let open_attempt = record.state().is_open()
            && history.iter().any(|existing| {
                existing.migration_name == record.migration_name && existing.state().is_open()
            });
        if open_attempt || history.iter().any(|existing| existing.id == record.id) {
            return Err(DriverError::new(
                DriverErrorKind::UniqueViolation,
                format!("UNIQUE constraint failed: {}.migration_name", table),
            ));
        }

        history.push(record.clone());
        state.mutations += 1;
        Ok(())
    }

    async fn update_history(
        &mut self,
        table: &str,
        id: &Uuid,
        update: &HistoryUpdate,
    ) -> DriverResult<()> {
        let mut state = self.database.state.lock();
        if state.fail_history_updates {
            return Err(DriverError::new(
                DriverErrorKind::Other,
                "history update rejected",
            ));
        }
        let history = state.history_mut(table)?;
        if let Some(record) = history.iter_mut().find(|record| &record.id == id) {
            record.apply_update(update);
        }
        state.mutations += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::Migration;

    #[tokio::test]
    async fn test_missing_database_until_created() {
        let database = InMemoryDatabase::missing();
        let err = match database.connect().await {
            Ok(_) => panic!("missing database must not connect"),
            Err(err) => err,
        };
        assert!(err.is_missing_database());

        database.create_database().await.unwrap();
        assert!(database.connect().await.is_ok());
    }

    #[tokio::test]
    async fn test_transaction_is_all_or_nothing() {
        let database = InMemoryDatabase::new().with_failure("DROP");
        let mut conn = database.connect().await.unwrap();

        let statements = vec![
            "CREATE TABLE a (id INT)".to_string(),
            "DROP TABLE missing".to_string(),
        ];
        let failure = conn.execute_in_transaction(&statements).await.unwrap_err();
        assert_eq!(failure.statement_index, 1);
        assert!(database.executed().is_empty());
    }

    #[tokio::test]
    async fn test_open_attempts_are_unique() {
        let database = InMemoryDatabase::new();
        let mut conn = database.connect().await.unwrap();
        conn.create_history_table("_prisma_migrations").await.unwrap();

        let migration = Migration::new("1", "a", "SELECT 1;");
        let first = HistoryRecord::started(&migration);
        conn.insert_history("_prisma_migrations", &first).await.unwrap();

        let err = conn
            .insert_history("_prisma_migrations", &HistoryRecord::started(&migration))
            .await
            .unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::UniqueViolation);

        conn.update_history(
            "_prisma_migrations",
            &first.id,
            &HistoryUpdate::Finished {
                finished_at: chrono::Utc::now(),
                applied_steps: 1,
            },
        )
        .await
        .unwrap();
        conn.insert_history("_prisma_migrations", &HistoryRecord::started(&migration))
            .await
            .unwrap();
        assert_eq!(database.history().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_reset_drops_history() {
        let database = InMemoryDatabase::new();
        let mut conn = database.connect().await.unwrap();
        conn.create_history_table("_prisma_migrations").await.unwrap();
        conn.execute("CREATE TABLE a (id INT)").await.unwrap();

        conn.reset_schema().await.unwrap();
        assert!(database.history().is_none());
        assert!(database.executed().is_empty());

        let err = conn.load_history("_prisma_migrations").await.unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::MissingTable);
    }
}
