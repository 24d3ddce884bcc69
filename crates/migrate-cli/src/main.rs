mod logging;
mod report;

use clap::{Parser, Subcommand};
use migrate_engine::{
    create_migration, deploy, reset, resolve_rolled_back, status, CommandContext, Connect,
    FsSource, MigrateConfig, MigrateError, ResetOptions, UserFacingError,
};
use std::error::Error as _;
use std::path::PathBuf;
use std::process::ExitCode;

use logging::{init_logging, LoggingConfig};

#[derive(Parser, Debug)]
#[command(name = "migrate")]
#[command(about = "Apply, inspect and reset SQL schema migrations")]
#[command(version)]
struct Cli {
    /// Database connection URL (defaults to $DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Path to the schema file (defaults to ./prisma/schema.prisma)
    #[arg(long, global = true)]
    schema: Option<PathBuf>,

    /// Debug logging and error causes
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drop the database and apply every migration again
    Reset {
        /// Skip the confirmation; all data is lost
        #[arg(long)]
        force: bool,

        /// Allow this preview command
        #[arg(long)]
        experimental: bool,
    },

    /// Apply pending migrations
    Deploy,

    /// Show applied, pending and failed migrations
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Resolve a failed migration
    Resolve {
        /// Mark the failed migration as rolled back
        #[arg(long = "rolled-back", value_name = "MIGRATION")]
        rolled_back: String,
    },

    /// Create an empty migration
    Create {
        /// Migration label
        name: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let logging = LoggingConfig {
        verbose: cli.verbose,
        json_format: cli.log_json,
    };
    if let Err(e) = init_logging(logging) {
        eprintln!("Failed to initialize logging: {:#}", e);
    }

    let config = MigrateConfig::resolve(cli.schema.clone(), cli.database_url.clone());
    match run(cli.command, &config).await {
        Ok(output) => {
            print!("{}", output);
            ExitCode::SUCCESS
        }
        Err(err) => {
            report_error(&err, cli.verbose);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, config: &MigrateConfig) -> Result<String, MigrateError> {
    let source = FsSource;
    // An unusable URL surfaces only once a command actually needs the database
    let target = config.database_target().ok();
    let ctx = match &target {
        Some(database) => {
            tracing::debug!(
                "Using schema {} and database {}",
                config.schema_path.display(),
                database.describe()
            );
            if let Some(origin) = &config.database_url_source {
                tracing::debug!("Database URL from {}", origin);
            }
            CommandContext::new(config, &source, database)
        }
        None => CommandContext::without_database(config, &source),
    };

    let output = match command {
        Commands::Reset {
            force,
            experimental,
        } => {
            let options = ResetOptions {
                force,
                experimental,
            };
            report::render_reset(&reset(&ctx, options).await?)
        }
        Commands::Deploy => report::render_deploy(&deploy(&ctx).await?),
        Commands::Status { json: true } => {
            let report = status(&ctx).await?;
            let json = serde_json::to_string_pretty(&report).map_err(|e| {
                MigrateError::generic_with_source("Failed to serialize the status report", e)
            })?;
            format!("{}\n", json)
        }
        Commands::Status { json: false } => report::render_status(&status(&ctx).await?),
        Commands::Resolve { rolled_back } => {
            report::render_resolved(&resolve_rolled_back(&ctx, &rolled_back).await?)
        }
        Commands::Create { name } => {
            report::render_created(&create_migration(config, &source, &name)?)
        }
    };
    Ok(output)
}

fn report_error(err: &MigrateError, verbose: bool) {
    let rendered = UserFacingError::from(err);
    eprint!("{}", rendered);
    if !rendered.to_string().ends_with('\n') {
        eprintln!();
    }

    if verbose {
        for cause in rendered.causes() {
            eprintln!("  caused by: {}", cause);
        }
    } else if err.source().is_some() {
        eprintln!("Run with --verbose for the underlying cause.");
    }
}
