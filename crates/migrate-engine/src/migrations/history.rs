//! Migration History - The history table inside the target database
//!
//! [`HistoryStore`] owns the semantics of the history table on top of the
//! primitive connector reads and writes. Every transition is a single write.
//! [`HistoryAnalysis`] compares the table against the migrations directory.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use super::definitions::{
    HistoryRecord, HistoryState, HistoryUpdate, Migration, MigrationStatusReport,
    MigrationsDirectory, DEFAULT_HISTORY_TABLE,
};
use crate::classify::ErrorClassifier;
use crate::connector::MigrationConnector;
use crate::error::{DriverErrorKind, MigrateError, MigrateResult};

/// History table operations over a connector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryStore {
    table: String,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_TABLE)
    }
}

impl HistoryStore {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the table and its open-attempt index if they do not exist
    pub async fn ensure_table(&self, conn: &mut dyn MigrationConnector) -> MigrateResult<()> {
        conn.create_history_table(&self.table)
            .await
            .map_err(|source| MigrateError::HistoryTableUnavailable {
                namespace: conn.namespace().to_string(),
                table: self.table.clone(),
                source,
            })
    }

    /// Every recorded attempt, oldest first; never creates the table
    pub async fn list_applied(
        &self,
        conn: &mut dyn MigrationConnector,
    ) -> MigrateResult<Vec<HistoryRecord>> {
        match conn.load_history(&self.table).await {
            Ok(records) => Ok(records),
            Err(err) => Err(ErrorClassifier::history(conn.namespace(), &self.table, err)),
        }
    }

    /// Insert an in-progress record for `migration`
    pub async fn begin_application(
        &self,
        conn: &mut dyn MigrationConnector,
        migration: &Migration,
    ) -> MigrateResult<HistoryRecord> {
        let existing = self.list_applied(conn).await?;
        if existing
            .iter()
            .any(|record| record.migration_name == migration.name && record.state().is_open())
        {
            return Err(MigrateError::AlreadyInProgress {
                name: migration.name.clone(),
            });
        }

        let record = HistoryRecord::started(migration);
        match conn.insert_history(&self.table, &record).await {
            Ok(()) => Ok(record),
            Err(err) if err.kind == DriverErrorKind::UniqueViolation => {
                Err(MigrateError::AlreadyInProgress {
                    name: migration.name.clone(),
                })
            }
            Err(err) => Err(MigrateError::generic_with_source(
                format!("Failed to record the start of migration `{}`", migration.name),
                err,
            )),
        }
    }

    /// Persist the number of statements applied so far
    pub async fn record_progress(
        &self,
        conn: &mut dyn MigrationConnector,
        id: &Uuid,
        applied_steps: u32,
    ) -> MigrateResult<()> {
        self.update(conn, id, HistoryUpdate::Progress { applied_steps })
            .await
    }

    pub async fn complete_application(
        &self,
        conn: &mut dyn MigrationConnector,
        id: &Uuid,
        applied_steps: u32,
    ) -> MigrateResult<()> {
        let update = HistoryUpdate::Finished {
            finished_at: Utc::now(),
            applied_steps,
        };
        self.update(conn, id, update).await
    }

    /// Keep the record open with the failure logs; `finished_at` stays null
    pub async fn fail_application(
        &self,
        conn: &mut dyn MigrationConnector,
        id: &Uuid,
        logs: impl Into<String>,
        applied_steps: u32,
    ) -> MigrateResult<()> {
        let update = HistoryUpdate::Failed {
            logs: logs.into(),
            applied_steps,
        };
        self.update(conn, id, update).await
    }

    /// Close the failed attempt of `name` so the migration can be retried
    pub async fn mark_rolled_back(
        &self,
        conn: &mut dyn MigrationConnector,
        name: &str,
    ) -> MigrateResult<HistoryRecord> {
        let records = self.list_applied(conn).await?;
        let mut record = records
            .into_iter()
            .rev()
            .find(|record| record.migration_name == name && record.state() == HistoryState::Failed)
            .ok_or_else(|| MigrateError::NotInFailedState {
                name: name.to_string(),
            })?;

        let update = HistoryUpdate::RolledBack {
            rolled_back_at: Utc::now(),
        };
        self.update(conn, &record.id, update.clone()).await?;
        record.apply_update(&update);
        Ok(record)
    }

    async fn update(
        &self,
        conn: &mut dyn MigrationConnector,
        id: &Uuid,
        update: HistoryUpdate,
    ) -> MigrateResult<()> {
        conn.update_history(&self.table, id, &update)
            .await
            .map_err(|err| {
                MigrateError::generic_with_source(
                    format!("Failed to update the migration history in `{}`", self.table),
                    err,
                )
            })
    }
}

/// The migrations directory compared against the history table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryAnalysis {
    /// Directory migrations without a finished record, in directory order
    pub pending: Vec<Migration>,
    /// Directory migrations with a finished record
    pub applied: Vec<String>,
    /// Migrations whose latest open attempt failed
    pub failed: Vec<String>,
    /// Migrations with a started, unfinished attempt
    pub in_progress: Vec<String>,
    /// Finished migrations whose script checksum no longer matches
    pub modified: Vec<String>,
    /// Finished migrations that are not in the directory
    pub missing_locally: Vec<String>,
}

impl HistoryAnalysis {
    pub fn new(directory: &MigrationsDirectory, records: &[HistoryRecord]) -> Self {
        let mut finished: HashMap<&str, &HistoryRecord> = HashMap::new();
        let mut failed = Vec::new();
        let mut in_progress = Vec::new();

        for record in records {
            match record.state() {
                HistoryState::Finished => {
                    finished.insert(record.migration_name.as_str(), record);
                }
                HistoryState::Failed => push_unique(&mut failed, &record.migration_name),
                HistoryState::InProgress => push_unique(&mut in_progress, &record.migration_name),
                HistoryState::RolledBack => {}
            }
        }

        let mut analysis = Self {
            failed,
            in_progress,
            ..Self::default()
        };

        let local: HashSet<&str> = directory.migrations().iter().map(|m| m.name.as_str()).collect();
        for migration in directory.migrations() {
            match finished.get(migration.name.as_str()) {
                Some(record) => {
                    analysis.applied.push(migration.name.clone());
                    if record.checksum != migration.checksum {
                        analysis.modified.push(migration.name.clone());
                    }
                }
                None => analysis.pending.push(migration.clone()),
            }
        }

        for record in records {
            if record.state() == HistoryState::Finished
                && !local.contains(record.migration_name.as_str())
            {
                push_unique(&mut analysis.missing_locally, &record.migration_name);
            }
        }

        analysis
    }

    pub fn pending_names(&self) -> Vec<String> {
        self.pending.iter().map(|m| m.name.clone()).collect()
    }

    /// Emit warnings for drift that does not block applying
    pub fn warn_drift(&self) {
        for name in &self.in_progress {
            tracing::warn!("Migration `{}` has a started attempt that never finished", name);
        }
        for name in &self.modified {
            tracing::warn!("Migration `{}` was modified after it was applied", name);
        }
        for name in &self.missing_locally {
            tracing::warn!(
                "Migration `{}` is recorded as applied but missing from the migrations directory",
                name
            );
        }
    }

    pub fn into_report(self) -> MigrationStatusReport {
        MigrationStatusReport {
            pending: self.pending.into_iter().map(|m| m.name).collect(),
            applied: self.applied,
            failed: self.failed,
            in_progress: self.in_progress,
            modified: self.modified,
            missing_locally: self.missing_locally,
        }
    }
}

fn push_unique(names: &mut Vec<String>, name: &str) {
    if !names.iter().any(|existing| existing == name) {
        names.push(name.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{Connect, InMemoryDatabase};
    use std::path::PathBuf;

    fn directory(migrations: Vec<Migration>) -> MigrationsDirectory {
        MigrationsDirectory::new(PathBuf::from("prisma/migrations"), migrations)
    }

    #[tokio::test]
    async fn test_list_applied_never_creates_table() {
        let database = InMemoryDatabase::new();
        let mut conn = database.connect().await.unwrap();
        let store = HistoryStore::default();

        let err = store.list_applied(conn.as_mut()).await.unwrap_err();
        assert_eq!(err.code(), Some("P1014"));
        assert_eq!(
            err.to_string(),
            "The underlying table for model `memory._prisma_migrations` does not exist."
        );
        assert!(database.history().is_none());
    }

    #[tokio::test]
    async fn test_lifecycle_of_a_record() {
        let database = InMemoryDatabase::new();
        let mut conn = database.connect().await.unwrap();
        let store = HistoryStore::default();
        store.ensure_table(conn.as_mut()).await.unwrap();
        store.ensure_table(conn.as_mut()).await.unwrap();

        let migration = Migration::new("1", "a", "SELECT 1;");
        let record = store.begin_application(conn.as_mut(), &migration).await.unwrap();
        store.record_progress(conn.as_mut(), &record.id, 1).await.unwrap();
        store.complete_application(conn.as_mut(), &record.id, 1).await.unwrap();

        let records = store.list_applied(conn.as_mut()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].state(), HistoryState::Finished);
        assert_eq!(records[0].applied_steps_count, 1);
        assert_eq!(records[0].checksum, migration.checksum);
    }

    #[tokio::test]
    async fn test_second_open_attempt_is_rejected() {
        let database = InMemoryDatabase::new();
        let mut conn = database.connect().await.unwrap();
        let store = HistoryStore::default();
        store.ensure_table(conn.as_mut()).await.unwrap();

        let migration = Migration::new("1", "a", "SELECT 1;");
        store.begin_application(conn.as_mut(), &migration).await.unwrap();

        let err = store
            .begin_application(conn.as_mut(), &migration)
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some("P3008"));
        assert_eq!(database.history().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mark_rolled_back_requires_failed_record() {
        let database = InMemoryDatabase::new();
        let mut conn = database.connect().await.unwrap();
        let store = HistoryStore::default();
        store.ensure_table(conn.as_mut()).await.unwrap();

        let err = store.mark_rolled_back(conn.as_mut(), "1_a").await.unwrap_err();
        assert_eq!(err.kind(), "NotInFailedState");

        let migration = Migration::new("1", "a", "SELECT 1;");
        let record = store.begin_application(conn.as_mut(), &migration).await.unwrap();
        store
            .fail_application(conn.as_mut(), &record.id, "syntax error", 0)
            .await
            .unwrap();

        let rolled_back = store.mark_rolled_back(conn.as_mut(), "1_a").await.unwrap();
        assert_eq!(rolled_back.state(), HistoryState::RolledBack);

        // The slot is free again
        store.begin_application(conn.as_mut(), &migration).await.unwrap();
    }

    #[test]
    fn test_analysis_classifies_records() {
        let init = Migration::new("1", "init", "CREATE TABLE a (id INT);");
        let users = Migration::new("2", "users", "CREATE TABLE users (id INT);");
        let posts = Migration::new("3", "posts", "CREATE TABLE posts (id INT);");

        let mut applied = HistoryRecord::started(&init);
        applied.apply_update(&HistoryUpdate::Finished {
            finished_at: Utc::now(),
            applied_steps: 1,
        });
        let mut modified = HistoryRecord::started(&users);
        modified.checksum = "0".repeat(64);
        modified.apply_update(&HistoryUpdate::Finished {
            finished_at: Utc::now(),
            applied_steps: 1,
        });
        let mut failed = HistoryRecord::started(&posts);
        failed.apply_update(&HistoryUpdate::Failed {
            logs: "boom".to_string(),
            applied_steps: 0,
        });
        let mut gone = HistoryRecord::started(&Migration::new("0", "gone", "SELECT 1;"));
        gone.apply_update(&HistoryUpdate::Finished {
            finished_at: Utc::now(),
            applied_steps: 1,
        });

        let analysis = HistoryAnalysis::new(
            &directory(vec![init, users, posts]),
            &[gone, applied, modified, failed],
        );
        assert_eq!(analysis.applied, vec!["1_init", "2_users"]);
        assert_eq!(analysis.pending_names(), vec!["3_posts"]);
        assert_eq!(analysis.failed, vec!["3_posts"]);
        assert_eq!(analysis.modified, vec!["2_users"]);
        assert_eq!(analysis.missing_locally, vec!["0_gone"]);

        let report = analysis.into_report();
        assert!(!report.is_up_to_date());
        assert_eq!(report.pending, vec!["3_posts"]);
    }
}
