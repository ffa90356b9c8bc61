//! Embedded migrations for the `documents` table.

use anyhow::anyhow;
use diesel::{Connection, SqliteConnection, connection::SimpleConnection};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};

use crate::db::connection::sqlite_path;

/// Embedded Diesel migrations bundled with this crate.
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Applies pending migrations on an already open connection.
pub fn run_pending(conn: &mut SqliteConnection) -> anyhow::Result<()> {
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow!(e))?;
    Ok(())
}

/// Runs pending Diesel migrations on a SQLite database at the given path.
///
/// Sets the journal mode to WAL before migrating.
pub fn run_sqlite(url: &str) -> anyhow::Result<()> {
    let mut conn = SqliteConnection::establish(sqlite_path(url))?;
    conn.batch_execute("PRAGMA journal_mode=WAL;")?;
    run_pending(&mut conn)
}

/// Runs pending migrations for the given database URL.
///
/// `sqlite:` URLs and bare file paths are accepted. Server URLs (`postgres://`, `mongodb://`)
/// are rejected: the document store only ships an embedded SQLite backend.
pub fn run_all(database_url: &str) -> anyhow::Result<()> {
    if database_url.contains("://") && !database_url.starts_with("sqlite://") {
        anyhow::bail!("Unsupported document store URL: {database_url}");
    }
    run_sqlite(database_url)
}
