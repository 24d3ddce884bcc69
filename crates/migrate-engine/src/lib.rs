//! # migrate-engine: SQL schema migrations
//!
//! Applies an ordered directory of SQL migrations to a target database,
//! records every attempt in a history table inside that database and can
//! reset the database by dropping everything and replaying the full set.
//!
//! The crate is organised leaves first:
//!
//! - [`migrations::MigrationSource`] and [`migrations::MigrationReader`] turn a
//!   migrations directory into an ordered [`migrations::MigrationsDirectory`].
//! - [`connector::MigrationConnector`] is one session against the target
//!   database (PostgreSQL, SQLite or in-memory).
//! - [`migrations::HistoryStore`], [`migrations::Applier`] and
//!   [`migrations::Resetter`] implement the migration semantics.
//! - [`classify::ErrorClassifier`] maps driver and filesystem failures onto
//!   the stable [`error::MigrateError`] taxonomy.
//! - [`commands`] sequences all of the above per command.

pub mod classify;
pub mod commands;
pub mod config;
pub mod connector;
pub mod error;
pub mod migrations;

pub use classify::*;
pub use commands::*;
pub use config::*;
pub use connector::*;
pub use error::*;
pub use migrations::*;
