//! Migration commands
//!
//! One async function per command. Each takes an explicit [`CommandContext`]
//! and returns a structured outcome; rendering is left to the caller.
//! Preconditions are checked in an order that guarantees no database mutation
//! happens before every local check passed.

use chrono::Utc;
use regex::Regex;

use crate::classify::ErrorClassifier;
use crate::config::MigrateConfig;
use crate::connector::{Connect, MigrationConnector};
use crate::error::{DriverError, MigrateError, MigrateResult};
use crate::migrations::{
    Applier, DeployOutcome, HistoryAnalysis, HistoryRecord, HistoryStore, Migration, MigrationReader,
    MigrationSource, MigrationStatusReport, MigrationsDirectory, ResetOutcome, Resetter,
    MIGRATION_SCRIPT_FILE,
};

/// Timestamp format of generated sequence keys
const SEQUENCE_KEY_FORMAT: &str = "%Y%m%d%H%M%S";

/// Everything a command needs to run
///
/// The database target is optional so that local checks (schema file,
/// migrations directory, flags) are reported before a missing database URL.
#[derive(Clone, Copy)]
pub struct CommandContext<'a> {
    pub config: &'a MigrateConfig,
    pub source: &'a dyn MigrationSource,
    database: Option<&'a dyn Connect>,
}

impl<'a> CommandContext<'a> {
    pub fn new(
        config: &'a MigrateConfig,
        source: &'a dyn MigrationSource,
        database: &'a dyn Connect,
    ) -> Self {
        Self {
            config,
            source,
            database: Some(database),
        }
    }

    /// A context whose commands fail with the configuration error once they need the database
    pub fn without_database(config: &'a MigrateConfig, source: &'a dyn MigrationSource) -> Self {
        Self {
            config,
            source,
            database: None,
        }
    }

    fn database(&self) -> MigrateResult<&'a dyn Connect> {
        match self.database {
            Some(database) => Ok(database),
            None => match self.config.database_target() {
                Err(err) => Err(err),
                Ok(_) => Err(MigrateError::configuration(
                    "No database target was provided for this command.",
                )),
            },
        }
    }

    fn store(&self) -> HistoryStore {
        HistoryStore::new(self.config.history_table.clone())
    }

    fn reader(&self) -> MigrationReader<'a> {
        MigrationReader::new(self.source, self.config.migrations_dir.clone())
    }

    fn ensure_schema_file(&self) -> MigrateResult<()> {
        ensure_schema_file(self.config, self.source)
    }

    /// Open a session; a missing database reads as a missing history table
    async fn connect(&self) -> MigrateResult<Box<dyn MigrationConnector>> {
        let database = self.database()?;
        database.connect().await.map_err(|err| {
            ErrorClassifier::connection(
                &database.describe(),
                &database.namespace(),
                &self.config.history_table,
                err,
            )
        })
    }

    /// Open a session, creating the database first when it does not exist
    async fn connect_or_create(&self) -> MigrateResult<Box<dyn MigrationConnector>> {
        let database = self.database()?;
        let unreachable = |source: DriverError| MigrateError::DatabaseUnreachable {
            target: database.describe(),
            source,
        };

        match database.connect().await {
            Ok(conn) => Ok(conn),
            Err(err) if err.is_missing_database() => {
                tracing::info!("Database {} does not exist, creating it", database.describe());
                database
                    .create_database()
                    .await
                    .map_err(|err| ErrorClassifier::creation(&database.describe(), err))?;
                database.connect().await.map_err(unreachable)
            }
            Err(err) => Err(unreachable(err)),
        }
    }

    async fn load_state(
        &self,
    ) -> MigrateResult<(MigrationsDirectory, Box<dyn MigrationConnector>)> {
        self.ensure_schema_file()?;
        let directory = self.reader().read()?;
        let conn = self.connect().await?;
        Ok((directory, conn))
    }
}

/// Options of `reset`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResetOptions {
    /// Confirms that all data may be dropped
    pub force: bool,
    /// Opt-in for the preview command
    pub experimental: bool,
}

fn ensure_schema_file(config: &MigrateConfig, source: &dyn MigrationSource) -> MigrateResult<()> {
    if source.is_file(&config.schema_path) {
        Ok(())
    } else {
        Err(MigrateError::SchemaFileNotFound {
            path: config.schema_path.clone(),
        })
    }
}

/// Drop everything in the target and replay the full migration set
pub async fn reset(ctx: &CommandContext<'_>, options: ResetOptions) -> MigrateResult<ResetOutcome> {
    if !options.experimental {
        return Err(MigrateError::ExperimentalFlagRequired);
    }
    ctx.ensure_schema_file()?;

    // The whole set must be readable before anything is dropped
    let directory = ctx.reader().read()?;
    Resetter::confirm(options.force)?;

    let mut conn = ctx.connect_or_create().await?;
    let store = ctx.store();
    let outcome = Resetter::new(&store, conn.as_mut())
        .reset(&directory, options.force)
        .await?;
    Ok(outcome)
}

/// Apply every pending migration
pub async fn deploy(ctx: &CommandContext<'_>) -> MigrateResult<DeployOutcome> {
    let (directory, mut conn) = ctx.load_state().await?;
    let store = ctx.store();

    store.ensure_table(conn.as_mut()).await?;
    let records = store.list_applied(conn.as_mut()).await?;
    let analysis = HistoryAnalysis::new(&directory, &records);

    if !analysis.failed.is_empty() {
        return Err(MigrateError::FailedMigrationsBlocking {
            names: analysis.failed,
        });
    }
    analysis.warn_drift();

    if analysis.pending.is_empty() {
        tracing::info!("No pending migrations to apply");
    } else {
        tracing::info!("{} pending migration(s) to apply", analysis.pending.len());
    }

    let applied = Applier::new(&store, conn.as_mut())
        .apply(&analysis.pending)
        .await?;
    Ok(DeployOutcome {
        applied,
        already_applied: analysis.applied.len(),
    })
}

/// Compare the migrations directory against the history table
pub async fn status(ctx: &CommandContext<'_>) -> MigrateResult<MigrationStatusReport> {
    let (directory, mut conn) = ctx.load_state().await?;
    let records = ctx.store().list_applied(conn.as_mut()).await?;

    let analysis = HistoryAnalysis::new(&directory, &records);
    analysis.warn_drift();
    Ok(analysis.into_report())
}

/// Mark the failed attempt of `name` as rolled back
pub async fn resolve_rolled_back(
    ctx: &CommandContext<'_>,
    name: &str,
) -> MigrateResult<HistoryRecord> {
    ctx.ensure_schema_file()?;
    let mut conn = ctx.connect().await?;

    let record = ctx.store().mark_rolled_back(conn.as_mut(), name).await?;
    tracing::info!("Migration `{}` marked as rolled back", name);
    Ok(record)
}

/// Scaffold `<timestamp>_<label>/migration.sql` in the migrations directory
pub fn create_migration(
    config: &MigrateConfig,
    source: &dyn MigrationSource,
    name: &str,
) -> MigrateResult<Migration> {
    ensure_schema_file(config, source)?;

    let label = name.trim().replace(' ', "_").to_lowercase();
    let label_pattern = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$")
        .map_err(|e| MigrateError::generic_with_source("Invalid migration label pattern", e))?;
    let sequence_key = Utc::now().format(SEQUENCE_KEY_FORMAT).to_string();
    if !label_pattern.is_match(&label) {
        return Err(MigrateError::InvalidMigrationName {
            name: format!("{}_{}", sequence_key, label),
            reason: "the label may only contain ASCII letters, digits, `_` and `-`".to_string(),
        });
    }

    let dir = &config.migrations_dir;
    source
        .create_dir_all(dir)
        .map_err(|e| ErrorClassifier::directory(dir, e))?;

    let existing = MigrationReader::new(source, dir.clone()).read()?;
    if let Some(other) = existing
        .migrations()
        .iter()
        .find(|migration| migration.sequence_key == sequence_key)
    {
        return Err(MigrateError::DuplicateSequenceKey {
            key: sequence_key.clone(),
            first: other.name.clone(),
            second: format!("{}_{}", sequence_key, label),
        });
    }

    let script = format!("-- {}\n", name.trim());
    let migration = Migration::new(sequence_key, label, script);
    let folder = dir.join(&migration.name);
    source
        .create_dir_all(&folder)
        .map_err(|e| ErrorClassifier::directory(&folder, e))?;

    let path = folder.join(MIGRATION_SCRIPT_FILE);
    source.write(&path, &migration.script).map_err(|e| {
        MigrateError::generic_with_source(
            format!("Failed to write migration file {}", path.display()),
            e,
        )
    })?;

    tracing::info!("Created migration {}", path.display());
    Ok(migration)
}
