//! Shared database service wrapper used by the sync engine and clients.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::{
    ArticleRepository, Database, LibSqlArticleRepository, LibSqlMetadataRepository,
    LibSqlQueueRepository, MetadataRepository, QueueRepository, SyncMetadata,
};
use crate::models::{
    ActionType, Article, ArticleId, EnqueueOutcome, FailedQueueEntry, Feed, MarkAllScope,
    QueueEntry, RemoteArticle, Subscription, SyncMode,
};
use crate::sync::RetryPolicy;
use crate::{Error, Result};

/// Thread-safe service for DB and repository operations.
#[derive(Clone)]
pub struct DatabaseService {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

/// Result of a local mark-all-as-read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalMarkAll {
    /// Articles flipped to read
    pub articles_marked: u64,
    /// Read-axis queue entries dropped because the bulk call supersedes them
    pub entries_superseded: u64,
}

impl DatabaseService {
    /// Open a database service at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = match Database::open(&db_path).await {
            Ok(db) => db,
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Database at {} is unreadable: {}. Moving it aside and starting fresh.",
                    db_path.display(),
                    error
                );
                Self::quarantine_corrupted_db_files(&db_path)?;
                Database::open(&db_path).await?
            }
            Err(error) => return Err(error),
        };

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory database service (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    /// Filesystem path of the backing database, if any
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn is_corrupted_db_error(error: &Error) -> bool {
        error
            .to_string()
            .to_ascii_lowercase()
            .contains("file is not a database")
    }

    fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
        let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
        for suffix in ["", "-wal", "-shm"] {
            let path = PathBuf::from(format!("{}{suffix}", db_path.display()));
            if path.exists() {
                let backup = PathBuf::from(format!("{}.corrupt-{stamp}", path.display()));
                std::fs::rename(&path, &backup)?;
                tracing::warn!("Moved {} to {}", path.display(), backup.display());
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Articles
    // ------------------------------------------------------------------

    pub async fn get_article(&self, id: ArticleId) -> Result<Option<Article>> {
        let db = self.db.lock().await;
        LibSqlArticleRepository::new(db.connection()).get(id).await
    }

    pub async fn list_articles(
        &self,
        limit: usize,
        offset: usize,
        unread_only: bool,
    ) -> Result<Vec<Article>> {
        let db = self.db.lock().await;
        LibSqlArticleRepository::new(db.connection())
            .list(limit, offset, unread_only)
            .await
    }

    pub async fn articles_by_remote_ids(
        &self,
        remote_ids: &[String],
    ) -> Result<HashMap<String, Article>> {
        let db = self.db.lock().await;
        LibSqlArticleRepository::new(db.connection())
            .get_by_remote_ids(remote_ids)
            .await
    }

    pub async fn insert_remote_article(
        &self,
        remote: &RemoteArticle,
        sync_ts: i64,
    ) -> Result<ArticleId> {
        let db = self.db.lock().await;
        LibSqlArticleRepository::new(db.connection())
            .insert_remote(remote, sync_ts)
            .await
    }

    /// Returns `false` when a local edit or queued change got there first
    pub async fn overwrite_article(
        &self,
        id: ArticleId,
        remote: &RemoteArticle,
        watermark: i64,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        LibSqlArticleRepository::new(db.connection())
            .overwrite_from_remote(id, remote, watermark)
            .await
    }

    pub async fn list_feeds(&self) -> Result<Vec<Feed>> {
        let db = self.db.lock().await;
        LibSqlArticleRepository::new(db.connection())
            .list_feeds()
            .await
    }

    pub async fn replace_feeds(&self, subscriptions: &[Subscription]) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlArticleRepository::new(db.connection())
            .replace_feeds(subscriptions)
            .await
    }

    /// Apply a user action to the article and record it in the change queue
    /// in one transaction.
    pub async fn record_local_change(
        &self,
        article_id: ArticleId,
        action: ActionType,
        now: i64,
    ) -> Result<(Article, EnqueueOutcome)> {
        let db = self.db.lock().await;
        let tx = db.connection().transaction().await?;
        let article = LibSqlArticleRepository::new(&tx)
            .apply_local_action(article_id, action, now)
            .await?;
        let outcome = LibSqlQueueRepository::new(&tx)
            .enqueue_in_transaction(article_id, &article.remote_id, action, now)
            .await?;
        tx.commit().await?;
        Ok((article, outcome))
    }

    /// Local half of mark-all-as-read, applied once the remote accepted it
    pub async fn apply_mark_all_read(
        &self,
        scope: &MarkAllScope,
        now: i64,
    ) -> Result<LocalMarkAll> {
        let db = self.db.lock().await;
        let conn = db.connection();
        let articles_marked = LibSqlArticleRepository::new(conn)
            .mark_read_in_scope(scope, now)
            .await?;
        let entries_superseded = LibSqlQueueRepository::new(conn)
            .remove_read_axis_in_scope(scope)
            .await?;
        Ok(LocalMarkAll {
            articles_marked,
            entries_superseded,
        })
    }

    // ------------------------------------------------------------------
    // Change queue
    // ------------------------------------------------------------------

    pub async fn enqueue_change(
        &self,
        article_id: ArticleId,
        remote_id: &str,
        action: ActionType,
        now: i64,
    ) -> Result<EnqueueOutcome> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .enqueue(article_id, remote_id, action, now)
            .await
    }

    pub async fn drain_queue(
        &self,
        max_items: usize,
        now: i64,
        retry: &RetryPolicy,
    ) -> Result<Vec<QueueEntry>> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .drain(max_items, now, retry)
            .await
    }

    pub async fn list_queue(&self) -> Result<Vec<QueueEntry>> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .list_live()
            .await
    }

    pub async fn remove_queue_entries(&self, ids: &[i64]) -> Result<u64> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .remove(ids)
            .await
    }

    pub async fn mark_queue_attempt(&self, id: i64, error: &str, now: i64) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .mark_attempt(id, error, now)
            .await
    }

    pub async fn dead_letter(&self, entry: &QueueEntry, error: &str, now: i64) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .dead_letter(entry, error, now)
            .await
    }

    pub async fn queue_len(&self) -> Result<u64> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection()).count().await
    }

    pub async fn oldest_queued_at(&self) -> Result<Option<i64>> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .oldest_created_at()
            .await
    }

    pub async fn has_due_retry(&self, now: i64, retry: &RetryPolicy) -> Result<bool> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .has_due_retry(now, retry)
            .await
    }

    pub async fn remove_reflected_entries(&self, pulled: &[RemoteArticle]) -> Result<Vec<i64>> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .remove_reflected(pulled)
            .await
    }

    pub async fn articles_with_pending_changes(
        &self,
        ids: &[ArticleId],
    ) -> Result<HashSet<ArticleId>> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .articles_with_live_entries(ids)
            .await
    }

    pub async fn list_failed(&self, limit: usize) -> Result<Vec<FailedQueueEntry>> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .list_failed(limit)
            .await
    }

    /// Move dead-lettered entries back into the live queue.
    ///
    /// Entries whose article no longer shows the target state are dropped.
    /// Returns the number of entries that re-entered the queue.
    pub async fn requeue_failed(&self, now: i64) -> Result<u32> {
        let db = self.db.lock().await;
        let conn = db.connection();
        let queue = LibSqlQueueRepository::new(conn);
        let articles = LibSqlArticleRepository::new(conn);

        let mut requeued = 0;
        for failed in queue.take_failed().await? {
            let Some(article) = articles.get(failed.article_id).await? else {
                continue;
            };
            if !failed
                .action_type
                .is_reflected_by(article.is_read, article.is_starred)
            {
                continue;
            }
            if let EnqueueOutcome::Inserted(_) | EnqueueOutcome::Replaced(_) = queue
                .enqueue(failed.article_id, &failed.remote_id, failed.action_type, now)
                .await?
            {
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    // ------------------------------------------------------------------
    // Sync metadata
    // ------------------------------------------------------------------

    pub async fn load_metadata(&self) -> Result<SyncMetadata> {
        let db = self.db.lock().await;
        LibSqlMetadataRepository::new(db.connection()).load().await
    }

    pub async fn save_call_counter(&self, count: u32, reset_at: i64) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlMetadataRepository::new(db.connection())
            .save_call_counter(count, reset_at)
            .await
    }

    pub async fn commit_watermarks(&self, mode: SyncMode, run_started_at: i64) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlMetadataRepository::new(db.connection())
            .commit_watermarks(mode, run_started_at)
            .await
    }

    pub async fn save_continuation(&self, mode: SyncMode, token: &str) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlMetadataRepository::new(db.connection())
            .save_continuation(mode, token)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn remote(id: &str, feed: &str) -> RemoteArticle {
        RemoteArticle {
            remote_id: id.to_string(),
            feed_id: feed.to_string(),
            title: format!("Title {id}"),
            url: None,
            published_at: 1_000,
            is_read: false,
            is_starred: false,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_record_local_change_updates_article_and_queue() {
        let service = DatabaseService::open_in_memory().await.unwrap();
        let id = service
            .insert_remote_article(&remote("r1", "feed/a"), 0)
            .await
            .unwrap();

        let (article, outcome) = service
            .record_local_change(id, ActionType::Read, 5_000)
            .await
            .unwrap();

        assert!(article.is_read);
        assert_eq!(article.local_update_ts, Some(5_000));
        assert!(matches!(outcome, EnqueueOutcome::Inserted(_)));
        assert_eq!(service.queue_len().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_record_local_change_rejects_unknown_article() {
        let service = DatabaseService::open_in_memory().await.unwrap();
        let result = service
            .record_local_change(ArticleId::new(42), ActionType::Star, 1)
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(service.queue_len().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_record_local_change_rolls_back_when_enqueue_fails() {
        let service = DatabaseService::open_in_memory().await.unwrap();
        let id = service
            .insert_remote_article(&remote("r1", "feed/a"), 0)
            .await
            .unwrap();
        service
            .db
            .lock()
            .await
            .connection()
            .execute(
                "CREATE TRIGGER reject_queue BEFORE INSERT ON sync_queue
                 BEGIN SELECT RAISE(ABORT, 'queue unavailable'); END",
                (),
            )
            .await
            .unwrap();

        let result = service.record_local_change(id, ActionType::Read, 5_000).await;

        assert!(result.is_err());
        let article = service.get_article(id).await.unwrap().unwrap();
        assert!(!article.is_read);
        assert_eq!(article.local_update_ts, None);
        assert_eq!(service.queue_len().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_apply_mark_all_read_supersedes_read_entries() {
        let service = DatabaseService::open_in_memory().await.unwrap();
        let a = service
            .insert_remote_article(&remote("r1", "feed/a"), 0)
            .await
            .unwrap();
        let b = service
            .insert_remote_article(&remote("r2", "feed/a"), 0)
            .await
            .unwrap();
        service
            .record_local_change(a, ActionType::Read, 10)
            .await
            .unwrap();
        service
            .record_local_change(b, ActionType::Star, 10)
            .await
            .unwrap();

        let result = service
            .apply_mark_all_read(&MarkAllScope::Feed("feed/a".to_string()), 20)
            .await
            .unwrap();

        assert_eq!(result.articles_marked, 1);
        assert_eq!(result.entries_superseded, 1);
        let queue = service.list_queue().await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].action_type, ActionType::Star);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_requeue_failed_skips_stale_entries() {
        let service = DatabaseService::open_in_memory().await.unwrap();
        let a = service
            .insert_remote_article(&remote("r1", "feed/a"), 0)
            .await
            .unwrap();
        let b = service
            .insert_remote_article(&remote("r2", "feed/a"), 0)
            .await
            .unwrap();
        service
            .record_local_change(a, ActionType::Star, 10)
            .await
            .unwrap();
        service
            .record_local_change(b, ActionType::Read, 10)
            .await
            .unwrap();
        for entry in service.list_queue().await.unwrap() {
            service.dead_letter(&entry, "HTTP 500", 20).await.unwrap();
        }
        // The user flipped `b` back to unread after the read was dead-lettered.
        service
            .record_local_change(b, ActionType::Unread, 30)
            .await
            .unwrap();
        let unread_entry = service.list_queue().await.unwrap();
        service
            .remove_queue_entries(&[unread_entry[0].id])
            .await
            .unwrap();

        let requeued = service.requeue_failed(40).await.unwrap();

        assert_eq!(requeued, 1);
        let queue = service.list_queue().await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].article_id, a);
        assert_eq!(queue[0].attempt_count, 0);
        assert!(service.list_failed(10).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_path_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("rill.db");

        let service = DatabaseService::open_path(&path).await.unwrap();

        assert!(path.exists());
        assert_eq!(service.db_path(), Some(path.as_path()));
    }
}
