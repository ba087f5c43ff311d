//! Database connection management

use crate::error::Result;
use libsql::{Builder, Connection, Database as LibSqlDatabase};
use std::path::Path;

use super::migrations;

/// Single local libSQL connection holding articles, the change queue and sync metadata
pub struct Database {
    _db: LibSqlDatabase,
    conn: Connection,
}

impl Database {
    /// Open the store at `path`, creating and migrating it as needed
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let location = path.as_ref().to_string_lossy().to_string();
        let database = Self::build(&location).await?;
        tracing::debug!("Opened article store at {location}");
        Ok(database)
    }

    /// Throwaway store for tests and dry runs
    pub async fn open_in_memory() -> Result<Self> {
        Self::build(":memory:").await
    }

    async fn build(location: &str) -> Result<Self> {
        let db = Builder::new_local(location).build().await?;
        let conn = db.connect()?;

        let database = Self { _db: db, conn };
        database.configure().await?;
        migrations::run(&database.conn).await?;
        Ok(database)
    }

    /// Configure `SQLite` for a single-writer desktop workload
    async fn configure(&self) -> Result<()> {
        // In-memory databases reject WAL
        self.conn
            .execute("PRAGMA journal_mode = WAL;", ())
            .await
            .ok();
        self.conn
            .execute("PRAGMA synchronous = NORMAL;", ())
            .await
            .ok();
        self.conn.execute("PRAGMA foreign_keys = ON;", ()).await?;
        Ok(())
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}
