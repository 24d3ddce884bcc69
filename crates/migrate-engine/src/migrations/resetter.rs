//! Database Reset - Drop everything and replay the full migration set
//!
//! Resetting is destructive and only runs with explicit confirmation. After
//! the wipe the history table is recreated and every migration of the
//! directory is applied again, in order. A failure while replaying leaves the
//! applied prefix in place.

use super::applier::Applier;
use super::definitions::{MigrationsDirectory, ResetOutcome};
use super::history::HistoryStore;
use crate::connector::MigrationConnector;
use crate::error::{MigrateError, MigrateResult};

/// Resets one connected target
pub struct Resetter<'a> {
    store: &'a HistoryStore,
    conn: &'a mut dyn MigrationConnector,
}

impl<'a> Resetter<'a> {
    pub fn new(store: &'a HistoryStore, conn: &'a mut dyn MigrationConnector) -> Self {
        Self { store, conn }
    }

    /// Fail with `ConfirmationRequired` unless `force` is set
    pub fn confirm(force: bool) -> MigrateResult<()> {
        if force {
            Ok(())
        } else {
            Err(MigrateError::ConfirmationRequired)
        }
    }

    pub async fn reset(
        &mut self,
        directory: &MigrationsDirectory,
        force: bool,
    ) -> MigrateResult<ResetOutcome> {
        Self::confirm(force)?;

        tracing::info!(
            "Resetting `{}` ({})",
            self.conn.namespace(),
            self.conn.flavour()
        );
        self.conn
            .reset_schema()
            .await
            .map_err(|source| MigrateError::ResetDropFailed { source })?;

        self.store.ensure_table(&mut *self.conn).await?;

        let applied = Applier::new(self.store, &mut *self.conn)
            .apply(directory.migrations())
            .await?;

        tracing::info!("Reset complete, {} migration(s) applied", applied.len());
        Ok(ResetOutcome { applied })
    }
}
