//! Text rendering of command outcomes

use migrate_engine::{DeployOutcome, HistoryRecord, Migration, MigrationStatusReport, ResetOutcome};

/// The applied migrations as a tree below `migrations/`
fn migration_tree(names: &[String]) -> String {
    let mut tree = String::from("migrations/\n");
    for name in names {
        tree.push_str(&format!("  └─ {}/\n    └─ migration.sql\n", name));
    }
    tree
}

pub fn render_reset(outcome: &ResetOutcome) -> String {
    if outcome.applied.is_empty() {
        return "\nDatabase reset successful\n\n".to_string();
    }
    format!(
        "\nDatabase reset successful, Prisma Migrate applied the following migration(s):\n\n{}\n",
        migration_tree(&outcome.applied)
    )
}

pub fn render_deploy(outcome: &DeployOutcome) -> String {
    if outcome.applied.is_empty() {
        return "\nNo pending migrations to apply.\n\n".to_string();
    }
    format!(
        "\nThe following migration(s) have been applied:\n\n{}\n",
        migration_tree(&outcome.applied)
    )
}

pub fn render_status(report: &MigrationStatusReport) -> String {
    let mut out = String::from("\n");
    let sections: [(&str, &[String]); 6] = [
        ("Applied migrations", report.applied.as_slice()),
        ("Pending migrations", report.pending.as_slice()),
        ("Failed migrations", report.failed.as_slice()),
        ("Migrations in progress", report.in_progress.as_slice()),
        ("Modified after being applied", report.modified.as_slice()),
        ("Applied but missing locally", report.missing_locally.as_slice()),
    ];

    for (title, names) in sections {
        if names.is_empty() {
            continue;
        }
        out.push_str(&format!("{}:\n", title));
        for name in names {
            out.push_str(&format!("  {}\n", name));
        }
        out.push('\n');
    }

    if report.is_up_to_date() {
        out.push_str("Database schema is up to date!\n\n");
    }
    out
}

pub fn render_resolved(record: &HistoryRecord) -> String {
    format!(
        "\nMigration {} marked as rolled back.\n\n",
        record.migration_name
    )
}

pub fn render_created(migration: &Migration) -> String {
    format!(
        "\nCreated migration:\n\n{}\n",
        migration_tree(std::slice::from_ref(&migration.name))
    )
}
