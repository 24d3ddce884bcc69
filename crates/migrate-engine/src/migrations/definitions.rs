//! Migration Definitions - Core types and structures for migrations
//!
//! Defines the migration descriptor read from disk, the history record
//! persisted in the target database and the structured results returned by
//! the commands.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// File name of the script inside every migration folder
pub const MIGRATION_SCRIPT_FILE: &str = "migration.sql";

/// Default name of the history table
pub const DEFAULT_HISTORY_TABLE: &str = "_prisma_migrations";

/// An immutable migration read from the migrations directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    /// Folder name: `<sequence_key>_<label>`
    pub name: String,
    /// Sortable prefix of the folder name
    pub sequence_key: String,
    /// Human-readable part of the folder name
    pub label: String,
    /// SQL text of `migration.sql`
    pub script: String,
    /// Hex SHA-256 of the script
    pub checksum: String,
}

impl Migration {
    pub fn new(
        sequence_key: impl Into<String>,
        label: impl Into<String>,
        script: impl Into<String>,
    ) -> Self {
        let sequence_key = sequence_key.into();
        let label = label.into();
        let script = script.into();
        Self {
            name: format!("{}_{}", sequence_key, label),
            checksum: checksum(&script),
            sequence_key,
            label,
            script,
        }
    }

    /// Path of the script relative to the migrations directory
    pub fn script_path(&self) -> PathBuf {
        Path::new(&self.name).join(MIGRATION_SCRIPT_FILE)
    }
}

/// Hex SHA-256 of a migration script
pub fn checksum(script: &str) -> String {
    hex::encode(Sha256::digest(script.as_bytes()))
}

/// Migrations of one directory, ascending by sequence key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationsDirectory {
    path: PathBuf,
    migrations: Vec<Migration>,
}

impl MigrationsDirectory {
    /// Build from migrations that are already validated and sorted
    pub(crate) fn new(path: PathBuf, migrations: Vec<Migration>) -> Self {
        Self { path, migrations }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    pub fn names(&self) -> Vec<String> {
        self.migrations.iter().map(|m| m.name.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Migration> {
        self.migrations.iter().find(|m| m.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }
}

/// One attempt to apply a migration, as stored in the history table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: Uuid,
    pub migration_name: String,
    pub checksum: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub applied_steps_count: u32,
    pub logs: Option<String>,
    pub rolled_back_at: Option<DateTime<Utc>>,
}

impl HistoryRecord {
    /// A fresh in-progress record for `migration`
    pub fn started(migration: &Migration) -> Self {
        Self {
            id: Uuid::new_v4(),
            migration_name: migration.name.clone(),
            checksum: migration.checksum.clone(),
            started_at: Utc::now(),
            finished_at: None,
            applied_steps_count: 0,
            logs: None,
            rolled_back_at: None,
        }
    }

    pub fn state(&self) -> HistoryState {
        if self.rolled_back_at.is_some() {
            HistoryState::RolledBack
        } else if self.finished_at.is_some() {
            HistoryState::Finished
        } else if self.logs.is_some() {
            HistoryState::Failed
        } else {
            HistoryState::InProgress
        }
    }

    /// Apply an update the same way the connectors persist it
    pub fn apply_update(&mut self, update: &HistoryUpdate) {
        match update {
            HistoryUpdate::Progress { applied_steps } => {
                self.applied_steps_count = *applied_steps;
            }
            HistoryUpdate::Finished {
                finished_at,
                applied_steps,
            } => {
                self.finished_at = Some(*finished_at);
                self.applied_steps_count = *applied_steps;
            }
            HistoryUpdate::Failed {
                logs,
                applied_steps,
            } => {
                self.logs = Some(logs.clone());
                self.applied_steps_count = *applied_steps;
            }
            HistoryUpdate::RolledBack { rolled_back_at } => {
                self.rolled_back_at = Some(*rolled_back_at);
            }
        }
    }
}

/// Derived state of a history record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryState {
    InProgress,
    Finished,
    Failed,
    RolledBack,
}

impl HistoryState {
    /// Finished and rolled back records no longer hold the migration's slot
    pub fn is_open(self) -> bool {
        matches!(self, HistoryState::InProgress | HistoryState::Failed)
    }
}

/// A single-statement transition of a history record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryUpdate {
    Progress {
        applied_steps: u32,
    },
    Finished {
        finished_at: DateTime<Utc>,
        applied_steps: u32,
    },
    Failed {
        logs: String,
        applied_steps: u32,
    },
    RolledBack {
        rolled_back_at: DateTime<Utc>,
    },
}

/// Result of `reset`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetOutcome {
    /// Names of the applied migrations, in application order
    pub applied: Vec<String>,
}

/// Result of `deploy`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployOutcome {
    /// Names of the applied migrations, in application order
    pub applied: Vec<String>,
    /// Migrations that were already applied before this run
    pub already_applied: usize,
}

/// Result of `status`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStatusReport {
    /// Migrations with a finished record
    pub applied: Vec<String>,
    /// Migrations without a finished record
    pub pending: Vec<String>,
    /// Migrations whose latest attempt failed and was not rolled back
    pub failed: Vec<String>,
    /// Migrations with a started but unfinished attempt
    pub in_progress: Vec<String>,
    /// Applied migrations whose script changed since they were applied
    pub modified: Vec<String>,
    /// Applied migrations that are missing from the migrations directory
    pub missing_locally: Vec<String>,
}

impl MigrationStatusReport {
    /// Nothing pending, nothing failed, nothing drifted
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
            && self.failed.is_empty()
            && self.in_progress.is_empty()
            && self.modified.is_empty()
            && self.missing_locally.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_name_and_checksum() {
        let migration = Migration::new("20201231000000", "init", "CREATE TABLE a (id INT);");
        assert_eq!(migration.name, "20201231000000_init");
        assert_eq!(migration.checksum.len(), 64);
        assert_eq!(migration.checksum, checksum("CREATE TABLE a (id INT);"));
        assert_ne!(migration.checksum, checksum("CREATE TABLE b (id INT);"));
        assert_eq!(
            migration.script_path(),
            PathBuf::from("20201231000000_init").join("migration.sql")
        );
    }

    #[test]
    fn test_history_state_transitions() {
        let migration = Migration::new("1", "a", "SELECT 1;");
        let mut record = HistoryRecord::started(&migration);
        assert_eq!(record.state(), HistoryState::InProgress);
        assert!(record.state().is_open());

        record.apply_update(&HistoryUpdate::Failed {
            logs: "boom".to_string(),
            applied_steps: 1,
        });
        assert_eq!(record.state(), HistoryState::Failed);
        assert_eq!(record.applied_steps_count, 1);
        assert!(record.state().is_open());

        record.apply_update(&HistoryUpdate::RolledBack {
            rolled_back_at: Utc::now(),
        });
        assert_eq!(record.state(), HistoryState::RolledBack);
        assert!(!record.state().is_open());

        let mut other = HistoryRecord::started(&migration);
        other.apply_update(&HistoryUpdate::Finished {
            finished_at: Utc::now(),
            applied_steps: 3,
        });
        assert_eq!(other.state(), HistoryState::Finished);
        assert_eq!(other.applied_steps_count, 3);
    }
}
