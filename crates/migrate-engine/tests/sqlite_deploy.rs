//! Deploy Integration Tests
//!
//! Applying pending migrations, blocking on failed ones and resolving them,
//! against a SQLite database file.

use std::fs;
use std::path::PathBuf;

use migrate_engine::{
    create_migration, deploy, resolve_rolled_back, status, CommandContext, Connect,
    DatabaseTarget, FsSource, HistoryState, HistoryStore, MigrateConfig, MigrateError,
};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::ConnectOptions;
use tempfile::TempDir;

struct Project {
    _dir: TempDir,
    root: PathBuf,
    config: MigrateConfig,
    database: DatabaseTarget,
}

impl Project {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        fs::create_dir_all(root.join("prisma/migrations")).unwrap();
        fs::write(root.join("prisma/schema.prisma"), "datasource db { provider = \"sqlite\" }\n")
            .unwrap();

        let config = MigrateConfig::for_schema(
            root.join("prisma/schema.prisma"),
            Some("file:./dev.db".to_string()),
        );
        let database = config.database_target().unwrap();
        Self {
            _dir: dir,
            root,
            config,
            database,
        }
    }

    fn add_migration(&self, name: &str, script: &str) {
        let dir = self.root.join("prisma/migrations").join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("migration.sql"), script).unwrap();
    }

    fn ctx(&self) -> CommandContext<'_> {
        CommandContext::new(&self.config, &FsSource, &self.database)
    }

    async fn create_database(&self) {
        self.database.create_database().await.unwrap();
    }
}

#[tokio::test]
async fn test_deploy_applies_pending_in_order() {
    let project = Project::new();
    project.create_database().await;
    project.add_migration(
        "20210101000000_users",
        "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT NOT NULL);",
    );
    project.add_migration(
        "20210102000000_posts",
        "CREATE TABLE posts (id INTEGER PRIMARY KEY, author_id INTEGER REFERENCES users(id));\n\
         CREATE INDEX posts_author_idx ON posts (author_id);",
    );

    let outcome = deploy(&project.ctx()).await.unwrap();
    assert_eq!(
        outcome.applied,
        vec!["20210101000000_users", "20210102000000_posts"]
    );
    assert_eq!(outcome.already_applied, 0);

    let mut conn = project.database.connect().await.unwrap();
    let records = HistoryStore::default()
        .list_applied(conn.as_mut())
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].applied_steps_count, 2);
    assert!(records.iter().all(|r| r.state() == HistoryState::Finished));
    drop(conn);

    project.add_migration(
        "20210103000000_tags",
        "CREATE TABLE tags (id INTEGER PRIMARY KEY);",
    );
    let outcome = deploy(&project.ctx()).await.unwrap();
    assert_eq!(outcome.applied, vec!["20210103000000_tags"]);
    assert_eq!(outcome.already_applied, 2);

    let report = status(&project.ctx()).await.unwrap();
    assert!(report.is_up_to_date());
    assert_eq!(report.applied.len(), 3);
}

#[tokio::test]
async fn test_deploy_stops_at_first_failure() {
    let project = Project::new();
    project.create_database().await;
    project.add_migration("20210101000000_users", "CREATE TABLE users (id INTEGER);");
    project.add_migration(
        "20210102000000_broken",
        "CREATE TABLE ok (id INTEGER);\nCREATE TABEL broken (id INTEGER);",
    );
    project.add_migration("20210103000000_later", "CREATE TABLE later (id INTEGER);");

    let err = deploy(&project.ctx()).await.unwrap_err();
    assert_eq!(err.code(), Some("P3018"));
    assert!(err.to_string().contains("Migration name: 20210102000000_broken"));

    let report = status(&project.ctx()).await.unwrap();
    assert_eq!(report.applied, vec!["20210101000000_users"]);
    assert_eq!(report.failed, vec!["20210102000000_broken"]);
    assert_eq!(
        report.pending,
        vec!["20210102000000_broken", "20210103000000_later"]
    );

    // Later migrations are blocked until the failure is resolved
    let err = deploy(&project.ctx()).await.unwrap_err();
    assert!(matches!(err, MigrateError::FailedMigrationsBlocking { .. }));
    assert_eq!(err.code(), Some("P3009"));

    project.add_migration(
        "20210102000000_broken",
        "CREATE TABLE ok (id INTEGER);\nCREATE TABLE fixed (id INTEGER);",
    );
    resolve_rolled_back(&project.ctx(), "20210102000000_broken")
        .await
        .unwrap();

    let outcome = deploy(&project.ctx()).await.unwrap();
    assert_eq!(
        outcome.applied,
        vec!["20210102000000_broken", "20210103000000_later"]
    );

    let report = status(&project.ctx()).await.unwrap();
    assert!(report.failed.is_empty());
    assert!(report.is_up_to_date());
}

#[tokio::test]
async fn test_deploy_against_missing_database() {
    let project = Project::new();
    project.add_migration("20210101000000_users", "CREATE TABLE users (id INTEGER);");

    let err = deploy(&project.ctx()).await.unwrap_err();
    assert_eq!(err.code(), Some("P1014"));
    assert!(!project.root.join("prisma/dev.db").exists());
}

#[tokio::test]
async fn test_created_migration_is_deployable() {
    let project = Project::new();
    project.create_database().await;

    let migration = create_migration(&project.config, &FsSource, "init").unwrap();
    let script_path = project
        .config
        .migrations_dir
        .join(&migration.name)
        .join("migration.sql");
    assert!(script_path.is_file());

    let outcome = deploy(&project.ctx()).await.unwrap();
    assert_eq!(outcome.applied, vec![migration.name]);
}

#[tokio::test]
async fn test_deploy_applies_trigger_bodies() {
    let project = Project::new();
    project.create_database().await;
    project.add_migration(
        "20210101000000_counters",
        "CREATE TABLE a (id INTEGER, n INTEGER);\n\
         CREATE TRIGGER t AFTER INSERT ON a BEGIN UPDATE a SET n = 1; END;",
    );

    let outcome = deploy(&project.ctx()).await.unwrap();
    assert_eq!(outcome.applied, vec!["20210101000000_counters"]);

    let mut conn = project.database.connect().await.unwrap();
    let records = HistoryStore::default()
        .list_applied(conn.as_mut())
        .await
        .unwrap();
    assert_eq!(records[0].applied_steps_count, 2);

    conn.execute("INSERT INTO a (id) VALUES (1)").await.unwrap();
    drop(conn);

    // The trigger fired on insert
    let mut raw = SqliteConnectOptions::new()
        .filename(project.root.join("prisma/dev.db"))
        .connect()
        .await
        .unwrap();
    let n: i64 = sqlx::query_scalar("SELECT n FROM a WHERE id = 1")
        .fetch_one(&mut raw)
        .await
        .unwrap();
    assert_eq!(n, 1);
}
