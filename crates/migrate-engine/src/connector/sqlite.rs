//! SQLite Connector
//!
//! Implements [`MigrationConnector`] over a single sqlx `SqliteConnection`.
//! Connecting never creates the database file; a missing file is reported as
//! a missing database and only `create_database` brings it into existence.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{ConnectOptions, Connection, Executor, Row};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::sql::{quote_ident, HistoryTableSql};
use super::{Connect, MigrationConnector, SqlFlavour};
use crate::error::{DriverError, DriverErrorKind, DriverResult, ScriptFailure};
use crate::migrations::{HistoryRecord, HistoryUpdate};

/// Alias SQLite gives the database a connection was opened on
const MAIN_DATABASE: &str = "main";

/// A SQLite database file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteTarget {
    path: PathBuf,
}

impl SqliteTarget {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn options(&self, create_if_missing: bool) -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(create_if_missing)
            .foreign_keys(true)
    }
}

#[async_trait]
impl Connect for SqliteTarget {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn namespace(&self) -> String {
        MAIN_DATABASE.to_string()
    }

    async fn connect(&self) -> DriverResult<Box<dyn MigrationConnector>> {
        let conn = self.options(false).connect().await?;
        Ok(Box::new(SqliteConnector { conn }))
    }

    async fn create_database(&self) -> DriverResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DriverError::new(
                        DriverErrorKind::Other,
                        format!("Failed to create {}: {}", parent.display(), e),
                    )
                    .with_source(e)
                })?;
            }
        }

        tracing::info!("Creating SQLite database {}", self.path.display());
        let conn = self.options(true).connect().await?;
        conn.close().await?;
        Ok(())
    }
}

/// One SQLite session
pub struct SqliteConnector {
    conn: SqliteConnection,
}

impl SqliteConnector {
    fn record_from_row(row: &SqliteRow) -> DriverResult<HistoryRecord> {
        let id: String = row.try_get("id")?;
        let id = Uuid::parse_str(&id).map_err(|e| {
            DriverError::new(
                DriverErrorKind::Other,
                format!("Invalid history record id `{}`", id),
            )
            .with_source(e)
        })?;
        let applied_steps_count: i64 = row.try_get("applied_steps_count")?;

        Ok(HistoryRecord {
            id,
            migration_name: row.try_get("migration_name")?,
            checksum: row.try_get("checksum")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
            applied_steps_count: applied_steps_count.clamp(0, u32::MAX as i64) as u32,
            logs: row.try_get("logs")?,
            rolled_back_at: row.try_get("rolled_back_at")?,
        })
    }
}

#[async_trait]
impl MigrationConnector for SqliteConnector {
    fn flavour(&self) -> SqlFlavour {
        SqlFlavour::Sqlite
    }

    fn namespace(&self) -> &str {
        MAIN_DATABASE
    }

    fn supports_transactional_ddl(&self) -> bool {
        true
    }

    async fn execute(&mut self, sql: &str) -> DriverResult<()> {
        tracing::debug!(sql, "Executing statement");
        self.conn.execute(sql).await?;
        Ok(())
    }

    async fn execute_in_transaction(&mut self, statements: &[String]) -> Result<(), ScriptFailure> {
        let mut transaction = self
            .conn
            .begin()
            .await
            .map_err(|e| ScriptFailure::new(0, e.into()))?;

        for (index, statement) in statements.iter().enumerate() {
            tracing::debug!(sql = %statement, "Executing statement");
            if let Err(e) = (&mut *transaction).execute(statement.as_str()).await {
                let failure = ScriptFailure::new(index, e.into());
                if let Err(rollback_error) = transaction.rollback().await {
                    tracing::warn!("Failed to roll back migration transaction: {}", rollback_error);
                }
                return Err(failure);
            }
        }

        transaction
            .commit()
            .await
            .map_err(|e| ScriptFailure::new(statements.len(), e.into()))
    }

    async fn reset_schema(&mut self) -> DriverResult<()> {
        let objects = sqlx::query(
            "SELECT type, name FROM sqlite_master \
             WHERE type IN ('view', 'table') AND name NOT LIKE 'sqlite_%' \
             ORDER BY type DESC",
        )
        .fetch_all(&mut self.conn)
        .await?;

        self.conn.execute("PRAGMA foreign_keys = OFF").await?;
        for object in &objects {
            let kind: String = object.try_get("type")?;
            let name: String = object.try_get("name")?;
            let keyword = if kind == "view" { "VIEW" } else { "TABLE" };
            self.conn
                .execute(format!("DROP {} IF EXISTS {}", keyword, quote_ident(&name)).as_str())
                .await?;
        }
        self.conn.execute("PRAGMA foreign_keys = ON").await?;
        Ok(())
    }

    async fn create_history_table(&mut self, table: &str) -> DriverResult<()> {
        let sql = HistoryTableSql::new(SqlFlavour::Sqlite, table);
        self.conn.execute(sql.create_table().as_str()).await?;
        self.conn
            .execute(sql.create_open_attempt_index().as_str())
            .await?;
        Ok(())
    }

    async fn load_history(&mut self, table: &str) -> DriverResult<Vec<HistoryRecord>> {
        let sql = HistoryTableSql::new(SqlFlavour::Sqlite, table);
        let rows = sqlx::query(&sql.select_all())
            .fetch_all(&mut self.conn)
            .await?;

        rows.iter().map(Self::record_from_row).collect()
    }

    async fn insert_history(&mut self, table: &str, record: &HistoryRecord) -> DriverResult<()> {
        let sql = HistoryTableSql::new(SqlFlavour::Sqlite, table);
        sqlx::query(&sql.insert())
            .bind(record.id.to_string())
            .bind(&record.checksum)
            .bind(&record.migration_name)
            .bind(record.started_at)
            .bind(record.applied_steps_count as i64)
            .execute(&mut self.conn)
            .await?;
        Ok(())
    }

    async fn update_history(
        &mut self,
        table: &str,
        id: &Uuid,
        update: &HistoryUpdate,
    ) -> DriverResult<()> {
        let statement = HistoryTableSql::new(SqlFlavour::Sqlite, table).update(update);
        let query = sqlx::query(&statement);
        let query = match update {
            HistoryUpdate::Progress { applied_steps } => query.bind(*applied_steps as i64),
            HistoryUpdate::Finished {
                finished_at,
                applied_steps,
            } => query.bind(*finished_at).bind(*applied_steps as i64),
            HistoryUpdate::Failed {
                logs,
                applied_steps,
            } => query.bind(logs.as_str()).bind(*applied_steps as i64),
            HistoryUpdate::RolledBack { rolled_back_at } => query.bind(*rolled_back_at),
        };
        query.bind(id.to_string()).execute(&mut self.conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DriverErrorKind;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_connect_to_missing_file_is_missing_database() {
        let temp_dir = TempDir::new().unwrap();
        let target = SqliteTarget::new(temp_dir.path().join("dev.db"));

        let err = match target.connect().await {
            Ok(_) => panic!("connecting must not create the database"),
            Err(err) => err,
        };
        assert_eq!(err.kind, DriverErrorKind::MissingDatabase);
        assert!(!target.path().exists());
    }

    #[tokio::test]
    async fn test_history_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let target = SqliteTarget::new(temp_dir.path().join("dev.db"));
        target.create_database().await.unwrap();

        let mut conn = target.connect().await.unwrap();
        let missing = conn.load_history("_prisma_migrations").await.unwrap_err();
        assert_eq!(missing.kind, DriverErrorKind::MissingTable);

        conn.create_history_table("_prisma_migrations").await.unwrap();
        conn.create_history_table("_prisma_migrations").await.unwrap();

        let migration = crate::migrations::Migration::new("20201231000000", "init", "SELECT 1;");
        let record = HistoryRecord::started(&migration);
        conn.insert_history("_prisma_migrations", &record).await.unwrap();
        conn.update_history(
            "_prisma_migrations",
            &record.id,
            &HistoryUpdate::Finished {
                finished_at: chrono::Utc::now(),
                applied_steps: 1,
            },
        )
        .await
        .unwrap();

        let history = conn.load_history("_prisma_migrations").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, record.id);
        assert_eq!(history[0].migration_name, "20201231000000_init");
        assert_eq!(history[0].applied_steps_count, 1);
        assert!(history[0].finished_at.is_some());
    }

    #[tokio::test]
    async fn test_open_attempt_index_rejects_second_attempt() {
        let temp_dir = TempDir::new().unwrap();
        let target = SqliteTarget::new(temp_dir.path().join("dev.db"));
        target.create_database().await.unwrap();

        let mut conn = target.connect().await.unwrap();
        conn.create_history_table("_prisma_migrations").await.unwrap();

        let migration = crate::migrations::Migration::new("1", "a", "SELECT 1;");
        conn.insert_history("_prisma_migrations", &HistoryRecord::started(&migration))
            .await
            .unwrap();
        let err = conn
            .insert_history("_prisma_migrations", &HistoryRecord::started(&migration))
            .await
            .unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::UniqueViolation);
    }

    #[tokio::test]
    async fn test_reset_schema_drops_everything() {
        let temp_dir = TempDir::new().unwrap();
        let target = SqliteTarget::new(temp_dir.path().join("dev.db"));
        target.create_database().await.unwrap();

        let mut conn = target.connect().await.unwrap();
        conn.execute("CREATE TABLE users (id INTEGER PRIMARY KEY)").await.unwrap();
        conn.execute("CREATE TABLE posts (id INTEGER PRIMARY KEY, user_id INTEGER REFERENCES users(id))")
            .await
            .unwrap();
        conn.execute("CREATE VIEW user_ids AS SELECT id FROM users").await.unwrap();
        conn.create_history_table("_prisma_migrations").await.unwrap();

        conn.reset_schema().await.unwrap();

        let err = conn.load_history("_prisma_migrations").await.unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::MissingTable);
        conn.execute("CREATE TABLE users (id INTEGER PRIMARY KEY)").await.unwrap();
    }
}
