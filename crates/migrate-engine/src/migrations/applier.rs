//! Migration Applier - Executes migrations in order
//!
//! Each migration is applied as one unit: its history record is opened, its
//! statements run, and the record is closed as finished or failed. The first
//! failure stops the run; later migrations are never attempted.

use uuid::Uuid;

use super::definitions::Migration;
use super::history::HistoryStore;
use super::reader::split_statements;
use crate::connector::MigrationConnector;
use crate::error::{MigrateError, MigrateResult, ScriptFailure};

/// Applies migrations through one connector
pub struct Applier<'a> {
    store: &'a HistoryStore,
    conn: &'a mut dyn MigrationConnector,
}

impl<'a> Applier<'a> {
    pub fn new(store: &'a HistoryStore, conn: &'a mut dyn MigrationConnector) -> Self {
        Self { store, conn }
    }

    /// Apply `migrations` in order and return the names applied
    ///
    /// The input must be strictly ascending by sequence key.
    pub async fn apply(&mut self, migrations: &[Migration]) -> MigrateResult<Vec<String>> {
        ensure_ascending(migrations)?;

        let mut applied = Vec::with_capacity(migrations.len());
        for migration in migrations {
            self.apply_one(migration).await?;
            applied.push(migration.name.clone());
        }
        Ok(applied)
    }

    async fn apply_one(&mut self, migration: &Migration) -> MigrateResult<()> {
        tracing::info!("Applying migration `{}`", migration.name);

        let record = self.store.begin_application(&mut *self.conn, migration).await?;
        let statements = split_statements(&migration.script, self.conn.flavour());
        if statements.is_empty() {
            tracing::debug!("Migration `{}` contains no statements", migration.name);
        }

        let outcome = if self.conn.supports_transactional_ddl() {
            self.conn.execute_in_transaction(&statements).await
        } else {
            self.execute_stepwise(&record.id, &statements).await?
        };

        match outcome {
            Ok(()) => {
                self.store
                    .complete_application(&mut *self.conn, &record.id, step_count(statements.len()))
                    .await?;
                tracing::info!(
                    "Migration `{}` applied ({} statement(s))",
                    migration.name,
                    statements.len()
                );
                Ok(())
            }
            Err(failure) => {
                let ScriptFailure {
                    statement_index,
                    error,
                } = failure;
                let logs = format!(
                    "Migration `{}` failed at statement {}: {}",
                    migration.name, statement_index, error
                );
                let history_error = match self
                    .store
                    .fail_application(&mut *self.conn, &record.id, logs, step_count(statement_index))
                    .await
                {
                    Ok(()) => None,
                    Err(history_error) => {
                        tracing::error!(
                            "Could not record the failure of migration `{}`: {}",
                            migration.name,
                            history_error
                        );
                        Some(history_error.to_string())
                    }
                };

                tracing::error!(
                    "Migration `{}` failed at statement {}",
                    migration.name,
                    statement_index
                );
                Err(MigrateError::MigrationApplyFailed {
                    name: migration.name.clone(),
                    statement_index,
                    source: error,
                    history_error,
                })
            }
        }
    }

    /// Run statements one by one, recording progress after each
    ///
    /// The outer error is a history write failure, the inner one a failing statement.
    async fn execute_stepwise(
        &mut self,
        id: &Uuid,
        statements: &[String],
    ) -> MigrateResult<Result<(), ScriptFailure>> {
        for (index, statement) in statements.iter().enumerate() {
            if let Err(error) = self.conn.execute(statement).await {
                return Ok(Err(ScriptFailure::new(index, error)));
            }
            self.store
                .record_progress(&mut *self.conn, id, step_count(index + 1))
                .await?;
        }
        Ok(Ok(()))
    }
}

fn step_count(steps: usize) -> u32 {
    u32::try_from(steps).unwrap_or(u32::MAX)
}

fn ensure_ascending(migrations: &[Migration]) -> MigrateResult<()> {
    for pair in migrations.windows(2) {
        if pair[0].sequence_key >= pair[1].sequence_key {
            return Err(MigrateError::generic(format!(
                "Migrations must be applied in ascending order: `{}` comes before `{}`",
                pair[0].name, pair[1].name
            )));
        }
    }
    Ok(())
}
