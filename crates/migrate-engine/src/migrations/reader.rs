//! Migration Reader - Loads the migrations directory
//!
//! Scans `<migrations dir>/<key>_<label>/migration.sql` through a
//! [`MigrationSource`], validates folder names and returns the migrations in
//! ascending sequence-key order. Reading has no side effects.

use regex::Regex;
use sqlparser::dialect::{Dialect, GenericDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Token, TokenWithLocation, Tokenizer};
use std::path::PathBuf;

use super::definitions::{Migration, MigrationsDirectory, MIGRATION_SCRIPT_FILE};
use super::source::MigrationSource;
use crate::classify::ErrorClassifier;
use crate::connector::SqlFlavour;
use crate::error::{MigrateError, MigrateResult};

const MIGRATION_NAME_PATTERN: &str = r"^(\d+)_([A-Za-z0-9][A-Za-z0-9_-]*)$";

/// Reads and validates a migrations directory
pub struct MigrationReader<'a> {
    source: &'a dyn MigrationSource,
    dir: PathBuf,
}

impl<'a> MigrationReader<'a> {
    pub fn new(source: &'a dyn MigrationSource, dir: impl Into<PathBuf>) -> Self {
        Self {
            source,
            dir: dir.into(),
        }
    }

    /// Fail with `DirectoryNotFound` / `DirectoryUnreadable` unless the directory can be listed
    pub fn ensure_directory(&self) -> MigrateResult<()> {
        self.source
            .list_entries(&self.dir)
            .map(|_| ())
            .map_err(|e| ErrorClassifier::directory(&self.dir, e))
    }

    /// Load every migration, ascending by sequence key
    pub fn read(&self) -> MigrateResult<MigrationsDirectory> {
        let entries = self
            .source
            .list_entries(&self.dir)
            .map_err(|e| ErrorClassifier::directory(&self.dir, e))?;

        let pattern = Regex::new(MIGRATION_NAME_PATTERN)
            .map_err(|e| MigrateError::generic_with_source("Invalid migration name pattern", e))?;

        let mut folders = Vec::new();
        for entry in entries {
            if entry.name.starts_with('.') || !entry.is_dir {
                continue;
            }
            let (sequence_key, label) = parse_folder_name(&pattern, &entry.name)?;
            folders.push((sequence_key, label, entry.name));
        }

        folders.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.2.cmp(&b.2)));
        for pair in folders.windows(2) {
            if pair[0].0 == pair[1].0 {
                return Err(MigrateError::DuplicateSequenceKey {
                    key: pair[0].0.clone(),
                    first: pair[0].2.clone(),
                    second: pair[1].2.clone(),
                });
            }
        }

        let mut migrations = Vec::with_capacity(folders.len());
        for (sequence_key, label, name) in folders {
            let path = self.dir.join(&name).join(MIGRATION_SCRIPT_FILE);
            let script = self.source.read_to_string(&path).map_err(|source| {
                MigrateError::MigrationScriptUnreadable {
                    name: name.clone(),
                    path: path.clone(),
                    source,
                }
            })?;
            migrations.push(Migration::new(sequence_key, label, script));
        }

        tracing::debug!(
            "Read {} migration(s) from {}",
            migrations.len(),
            self.dir.display()
        );
        Ok(MigrationsDirectory::new(self.dir.clone(), migrations))
    }
}

fn parse_folder_name(pattern: &Regex, name: &str) -> MigrateResult<(String, String)> {
    match pattern.captures(name) {
        Some(captures) => Ok((captures[1].to_string(), captures[2].to_string())),
        None => {
            let reason = if !name.starts_with(|c: char| c.is_ascii_digit()) {
                "it must start with a numeric sequence key followed by `_`"
            } else if !name.contains('_') {
                "the sequence key must be followed by `_` and a label"
            } else {
                "the label may only contain ASCII letters, digits, `_` and `-`"
            };
            Err(MigrateError::InvalidMigrationName {
                name: name.to_string(),
                reason: reason.to_string(),
            })
        }
    }
}

/// Split a migration script into executable statements
///
/// Statement boundaries come from the SQL tokenizer of the flavour's dialect,
/// so semicolons inside literals, quoted identifiers, comments and
/// dollar-quoted bodies do not split. Neither do semicolons inside
/// `BEGIN ... END` bodies (SQLite triggers, `BEGIN ATOMIC`) or `CASE ... END`.
/// Each statement keeps its original text without the terminating `;`.
/// Chunks holding only whitespace and comments are dropped.
pub fn split_statements(script: &str, flavour: SqlFlavour) -> Vec<String> {
    let dialect: Box<dyn Dialect> = match flavour {
        SqlFlavour::Postgres => Box::new(PostgreSqlDialect {}),
        SqlFlavour::Sqlite => Box::new(SQLiteDialect {}),
        SqlFlavour::InMemory => Box::new(GenericDialect {}),
    };

    match Tokenizer::new(dialect.as_ref(), script).tokenize_with_location() {
        Ok(tokens) => split_on_tokens(script, &tokens),
        Err(e) => {
            tracing::warn!("SQL tokenizing failed, using naive semicolon splitting: {}", e);
            script
                .split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        }
    }
}

fn split_on_tokens(script: &str, tokens: &[TokenWithLocation]) -> Vec<String> {
    let line_starts = line_starts(script);
    let mut statements = Vec::new();
    let mut start = 0;
    let mut has_content = false;
    // Open BEGIN/CASE bodies in the current statement
    let mut depth = 0usize;

    for token in tokens {
        match &token.token {
            Token::SemiColon if depth == 0 => {
                let end = byte_offset(script, &line_starts, token.location.line, token.location.column);
                if has_content {
                    statements.push(script[start..end].trim().to_string());
                }
                start = (end + 1).min(script.len());
                has_content = false;
            }
            Token::Whitespace(_) | Token::EOF => {}
            Token::Word(word) => {
                match word.keyword {
                    // A leading BEGIN opens a transaction, not a body
                    Keyword::BEGIN if has_content => depth += 1,
                    Keyword::CASE => depth += 1,
                    Keyword::END => depth = depth.saturating_sub(1),
                    _ => {}
                }
                has_content = true;
            }
            _ => has_content = true,
        }
    }

    if has_content {
        statements.push(script[start..].trim().to_string());
    }
    statements
}

fn line_starts(script: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(script.match_indices('\n').map(|(index, _)| index + 1))
        .collect()
}

/// Byte offset of a 1-based line/column position
fn byte_offset(script: &str, line_starts: &[usize], line: u64, column: u64) -> usize {
    let line_start = line
        .checked_sub(1)
        .and_then(|index| line_starts.get(index as usize))
        .copied()
        .unwrap_or(script.len());
    let column = column.saturating_sub(1) as usize;

    script[line_start..]
        .char_indices()
        .nth(column)
        .map(|(offset, _)| line_start + offset)
        .unwrap_or(script.len())
}
