//! Sync metadata repository: watermarks, quota counters and pull cursor

use crate::error::{Error, Result};
use crate::models::SyncMode;
use libsql::Connection;

pub const LAST_INCREMENTAL_SYNC_TS: &str = "last_incremental_sync_ts";
pub const LAST_FULL_SYNC_TS: &str = "last_full_sync_ts";
pub const DAILY_CALL_COUNT: &str = "daily_call_count";
pub const CALL_COUNT_RESET_AT: &str = "call_count_reset_at";
pub const PULL_CONTINUATION: &str = "pull_continuation";
pub const PULL_CONTINUATION_MODE: &str = "pull_continuation_mode";

/// Snapshot of every sync metadata key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncMetadata {
    pub last_incremental_sync_ts: Option<i64>,
    pub last_full_sync_ts: Option<i64>,
    pub daily_call_count: u32,
    /// Unix ms at which the daily counter starts over
    pub call_count_reset_at: Option<i64>,
    pub pull_continuation: Option<String>,
    pub pull_continuation_mode: Option<SyncMode>,
}

impl SyncMetadata {
    /// Start time of the last successful sync of either kind; 0 when none
    #[must_use]
    pub fn conflict_watermark(&self) -> i64 {
        self.last_incremental_sync_ts
            .into_iter()
            .chain(self.last_full_sync_ts)
            .max()
            .unwrap_or(0)
    }
}

/// Trait for sync metadata operations (async)
#[allow(async_fn_in_trait)]
pub trait MetadataRepository {
    /// Load every key into a snapshot
    async fn load(&self) -> Result<SyncMetadata>;

    /// Persist the daily call counter window
    async fn save_call_counter(&self, count: u32, reset_at: i64) -> Result<()>;

    /// Advance watermarks after a successful pull and forget any continuation
    async fn commit_watermarks(&self, mode: SyncMode, run_started_at: i64) -> Result<()>;

    /// Remember where a capped pull stopped
    async fn save_continuation(&self, mode: SyncMode, token: &str) -> Result<()>;
}

/// libSQL implementation of `MetadataRepository`
pub struct LibSqlMetadataRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlMetadataRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn get_value(conn: &Connection, key: &str) -> Result<Option<String>> {
        let mut rows = conn
            .query("SELECT value FROM sync_metadata WHERE key = ?", [key])
            .await?;

        if let Some(row) = rows.next().await? {
            let value: String = row.get(0)?;
            Ok(Some(value))
        } else {
            Ok(None)
        }
    }

    async fn get_i64(conn: &Connection, key: &str) -> Result<Option<i64>> {
        Self::get_value(conn, key)
            .await?
            .map(|value| {
                value
                    .parse()
                    .map_err(|_| Error::Database(format!("invalid integer for {key}: {value}")))
            })
            .transpose()
    }

    async fn set_value(conn: &Connection, key: &str, value: &str) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO sync_metadata (key, value) VALUES (?, ?)",
            [key, value],
        )
        .await?;
        Ok(())
    }

    async fn delete_value(conn: &Connection, key: &str) -> Result<()> {
        conn.execute("DELETE FROM sync_metadata WHERE key = ?", [key])
            .await?;
        Ok(())
    }
}

impl MetadataRepository for LibSqlMetadataRepository<'_> {
    async fn load(&self) -> Result<SyncMetadata> {
        let conn = self.conn;
        let daily_call_count = Self::get_i64(conn, DAILY_CALL_COUNT)
            .await?
            .map_or(0, |count| u32::try_from(count).unwrap_or(u32::MAX));
        let pull_continuation_mode = match Self::get_value(conn, PULL_CONTINUATION_MODE).await? {
            Some(mode) => Some(mode.parse().map_err(Error::Database)?),
            None => None,
        };

        Ok(SyncMetadata {
            last_incremental_sync_ts: Self::get_i64(conn, LAST_INCREMENTAL_SYNC_TS).await?,
            last_full_sync_ts: Self::get_i64(conn, LAST_FULL_SYNC_TS).await?,
            daily_call_count,
            call_count_reset_at: Self::get_i64(conn, CALL_COUNT_RESET_AT).await?,
            pull_continuation: Self::get_value(conn, PULL_CONTINUATION).await?,
            pull_continuation_mode,
        })
    }

    async fn save_call_counter(&self, count: u32, reset_at: i64) -> Result<()> {
        let tx = self.conn.transaction().await?;
        Self::set_value(&tx, DAILY_CALL_COUNT, &count.to_string()).await?;
        Self::set_value(&tx, CALL_COUNT_RESET_AT, &reset_at.to_string()).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn commit_watermarks(&self, mode: SyncMode, run_started_at: i64) -> Result<()> {
        let stamp = run_started_at.to_string();
        let tx = self.conn.transaction().await?;
        Self::set_value(&tx, LAST_INCREMENTAL_SYNC_TS, &stamp).await?;
        if mode == SyncMode::Full {
            Self::set_value(&tx, LAST_FULL_SYNC_TS, &stamp).await?;
        }
        Self::delete_value(&tx, PULL_CONTINUATION).await?;
        Self::delete_value(&tx, PULL_CONTINUATION_MODE).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn save_continuation(&self, mode: SyncMode, token: &str) -> Result<()> {
        let tx = self.conn.transaction().await?;
        Self::set_value(&tx, PULL_CONTINUATION, token).await?;
        Self::set_value(&tx, PULL_CONTINUATION_MODE, mode.as_str()).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_load_defaults() {
        let db = setup().await;
        let repo = LibSqlMetadataRepository::new(db.connection());

        let metadata = repo.load().await.unwrap();
        assert_eq!(metadata, SyncMetadata::default());
        assert_eq!(metadata.conflict_watermark(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_incremental_commit_leaves_full_watermark() {
        let db = setup().await;
        let repo = LibSqlMetadataRepository::new(db.connection());

        repo.commit_watermarks(SyncMode::Full, 1_000).await.unwrap();
        repo.commit_watermarks(SyncMode::Incremental, 5_000)
            .await
            .unwrap();

        let metadata = repo.load().await.unwrap();
        assert_eq!(metadata.last_full_sync_ts, Some(1_000));
        assert_eq!(metadata.last_incremental_sync_ts, Some(5_000));
        assert_eq!(metadata.conflict_watermark(), 5_000);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_commit_clears_continuation() {
        let db = setup().await;
        let repo = LibSqlMetadataRepository::new(db.connection());

        repo.save_continuation(SyncMode::Full, "cursor-1")
            .await
            .unwrap();
        let metadata = repo.load().await.unwrap();
        assert_eq!(metadata.pull_continuation.as_deref(), Some("cursor-1"));
        assert_eq!(metadata.pull_continuation_mode, Some(SyncMode::Full));

        repo.commit_watermarks(SyncMode::Full, 10).await.unwrap();
        let metadata = repo.load().await.unwrap();
        assert_eq!(metadata.pull_continuation, None);
        assert_eq!(metadata.pull_continuation_mode, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_save_call_counter() {
        let db = setup().await;
        let repo = LibSqlMetadataRepository::new(db.connection());

        repo.save_call_counter(7, 86_400_000).await.unwrap();

        let metadata = repo.load().await.unwrap();
        assert_eq!(metadata.daily_call_count, 7);
        assert_eq!(metadata.call_count_reset_at, Some(86_400_000));
    }
}
