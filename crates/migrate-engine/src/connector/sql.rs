//! SQL text for the history table
//!
//! Both sqlx connectors render their statements here so that the table layout
//! is defined in one place. Placeholders differ per flavour (`$n` vs `?`).

use super::SqlFlavour;
use crate::migrations::HistoryUpdate;

/// Quote an identifier with double quotes
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Statements over one history table for one flavour
#[derive(Debug, Clone)]
pub struct HistoryTableSql {
    flavour: SqlFlavour,
    table: String,
}

impl HistoryTableSql {
    pub fn new(flavour: SqlFlavour, table: &str) -> Self {
        Self {
            flavour,
            table: table.to_string(),
        }
    }

    fn placeholder(&self, index: usize) -> String {
        match self.flavour {
            SqlFlavour::Postgres => format!("${}", index),
            SqlFlavour::Sqlite | SqlFlavour::InMemory => "?".to_string(),
        }
    }

    fn quoted_table(&self) -> String {
        quote_ident(&self.table)
    }

    /// SQL to create the history table
    pub fn create_table(&self) -> String {
        let (timestamp, text) = match self.flavour {
            SqlFlavour::Postgres => ("TIMESTAMPTZ", "TEXT"),
            SqlFlavour::Sqlite | SqlFlavour::InMemory => ("DATETIME", "TEXT"),
        };
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (\n    \
                id VARCHAR(36) PRIMARY KEY NOT NULL,\n    \
                checksum VARCHAR(64) NOT NULL,\n    \
                finished_at {timestamp},\n    \
                migration_name VARCHAR(255) NOT NULL,\n    \
                logs {text},\n    \
                rolled_back_at {timestamp},\n    \
                started_at {timestamp} NOT NULL,\n    \
                applied_steps_count INTEGER NOT NULL DEFAULT 0\n\
            )",
            table = self.quoted_table(),
            timestamp = timestamp,
            text = text,
        )
    }

    /// SQL to create the unique index guarding open attempts
    ///
    /// At most one row per migration may be neither finished nor rolled back.
    pub fn create_open_attempt_index(&self) -> String {
        format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {index} ON {table} (migration_name) \
             WHERE finished_at IS NULL AND rolled_back_at IS NULL",
            index = quote_ident(&format!("{}_open_attempt_key", self.table)),
            table = self.quoted_table(),
        )
    }

    /// SQL to read all records
    pub fn select_all(&self) -> String {
        format!(
            "SELECT id, checksum, finished_at, migration_name, logs, rolled_back_at, \
             started_at, applied_steps_count FROM {} ORDER BY started_at ASC",
            self.quoted_table()
        )
    }

    /// SQL to insert a record; binds id, checksum, migration_name, started_at, applied_steps_count
    pub fn insert(&self) -> String {
        format!(
            "INSERT INTO {} (id, checksum, migration_name, started_at, applied_steps_count) \
             VALUES ({}, {}, {}, {}, {})",
            self.quoted_table(),
            self.placeholder(1),
            self.placeholder(2),
            self.placeholder(3),
            self.placeholder(4),
            self.placeholder(5),
        )
    }

    /// SQL for a single-row update; the id is always the last bind
    pub fn update(&self, update: &HistoryUpdate) -> String {
        let assignments = match update {
            HistoryUpdate::Progress { .. } => {
                format!("applied_steps_count = {}", self.placeholder(1))
            }
            HistoryUpdate::Finished { .. } => format!(
                "finished_at = {}, applied_steps_count = {}",
                self.placeholder(1),
                self.placeholder(2)
            ),
            HistoryUpdate::Failed { .. } => format!(
                "logs = {}, applied_steps_count = {}",
                self.placeholder(1),
                self.placeholder(2)
            ),
            HistoryUpdate::RolledBack { .. } => {
                format!("rolled_back_at = {}", self.placeholder(1))
            }
        };
        let id_index = match update {
            HistoryUpdate::Progress { .. } | HistoryUpdate::RolledBack { .. } => 2,
            HistoryUpdate::Finished { .. } | HistoryUpdate::Failed { .. } => 3,
        };
        format!(
            "UPDATE {} SET {} WHERE id = {}",
            self.quoted_table(),
            assignments,
            self.placeholder(id_index)
        )
    }
}
