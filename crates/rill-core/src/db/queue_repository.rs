//! Change queue repository: durable pending local changes

use std::collections::HashSet;

use crate::db::article_repository::scope_clause;
use crate::error::{Error, Result};
use crate::models::{
    ActionType, ArticleId, EnqueueOutcome, FailedQueueEntry, MarkAllScope, QueueEntry,
    RemoteArticle,
};
use crate::sync::RetryPolicy;
use crate::util::sql_placeholders;
use libsql::{params, params_from_iter, Connection, Value};

/// Maximum bound parameters per `IN (...)` statement
const ID_CHUNK: usize = 400;

const QUEUE_COLUMNS: &str =
    "id, article_id, remote_id, action_type, created_at, attempt_count, last_attempt_at, last_error";

/// Trait for change queue operations (async)
#[allow(async_fn_in_trait)]
pub trait QueueRepository {
    /// Record a local change, collapsing it against any live entry on the same axis
    async fn enqueue(
        &self,
        article_id: ArticleId,
        remote_id: &str,
        action: ActionType,
        now: i64,
    ) -> Result<EnqueueOutcome>;

    /// Entries eligible for transmission at `now`, oldest first, at most `max_items`
    async fn drain(&self, max_items: usize, now: i64, retry: &RetryPolicy)
        -> Result<Vec<QueueEntry>>;

    /// All live entries, oldest first
    async fn list_live(&self) -> Result<Vec<QueueEntry>>;

    /// Delete live entries by id; returns rows removed
    async fn remove(&self, ids: &[i64]) -> Result<u64>;

    /// Record a failed transmission attempt
    async fn mark_attempt(&self, id: i64, error: &str, now: i64) -> Result<()>;

    /// Move a live entry to the dead-letter table
    async fn dead_letter(&self, entry: &QueueEntry, error: &str, now: i64) -> Result<()>;

    /// Number of live entries
    async fn count(&self) -> Result<u64>;

    /// Creation time of the oldest live entry
    async fn oldest_created_at(&self) -> Result<Option<i64>>;

    /// Whether any previously-attempted entry has waited out its backoff
    async fn has_due_retry(&self, now: i64, retry: &RetryPolicy) -> Result<bool>;

    /// Remove entries whose target state the pulled records already show.
    /// Returns the removed entry ids.
    async fn remove_reflected(&self, pulled: &[RemoteArticle]) -> Result<Vec<i64>>;

    /// Remove read/unread entries for articles inside a mark-all scope
    async fn remove_read_axis_in_scope(&self, scope: &MarkAllScope) -> Result<u64>;

    /// Subset of `article_ids` that still have a live entry
    async fn articles_with_live_entries(
        &self,
        article_ids: &[ArticleId],
    ) -> Result<HashSet<ArticleId>>;

    /// Dead-lettered entries, newest failure first
    async fn list_failed(&self, limit: usize) -> Result<Vec<FailedQueueEntry>>;

    /// Remove and return every dead-lettered entry
    async fn take_failed(&self) -> Result<Vec<FailedQueueEntry>>;
}

/// libSQL implementation of `QueueRepository`
pub struct LibSqlQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_entry(row: &libsql::Row) -> Result<QueueEntry> {
        let action: String = row.get(3)?;
        Ok(QueueEntry {
            id: row.get(0)?,
            article_id: ArticleId::new(row.get(1)?),
            remote_id: row.get(2)?,
            action_type: action.parse().map_err(Error::Database)?,
            created_at: row.get(4)?,
            attempt_count: u32::try_from(row.get::<i64>(5)?).unwrap_or(u32::MAX),
            last_attempt_at: row.get(6)?,
            last_error: row.get(7)?,
        })
    }

    fn parse_failed(row: &libsql::Row) -> Result<FailedQueueEntry> {
        let action: String = row.get(3)?;
        Ok(FailedQueueEntry {
            id: row.get(0)?,
            article_id: ArticleId::new(row.get(1)?),
            remote_id: row.get(2)?,
            action_type: action.parse().map_err(Error::Database)?,
            attempt_count: u32::try_from(row.get::<i64>(4)?).unwrap_or(u32::MAX),
            last_error: row.get(5)?,
            failed_at: row.get(6)?,
        })
    }

    async fn query_entries(&self, sql: &str, values: Vec<Value>) -> Result<Vec<QueueEntry>> {
        let mut rows = self.conn.query(sql, params_from_iter(values)).await?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(Self::parse_entry(&row)?);
        }
        Ok(entries)
    }

    async fn attempted_entries(&self) -> Result<Vec<QueueEntry>> {
        self.query_entries(
            &format!(
                "SELECT {QUEUE_COLUMNS} FROM sync_queue
                 WHERE attempt_count > 0
                 ORDER BY created_at ASC, id ASC"
            ),
            Vec::new(),
        )
        .await
    }

    /// Collapsing enqueue without its own transaction; the caller owns one.
    pub async fn enqueue_in_transaction(
        &self,
        article_id: ArticleId,
        remote_id: &str,
        action: ActionType,
        now: i64,
    ) -> Result<EnqueueOutcome> {
        let axis = action.axis().as_str();
        let mut rows = self
            .conn
            .query(
                "SELECT id, action_type, attempt_count FROM sync_queue
                 WHERE article_id = ? AND axis = ?",
                params![article_id.get(), axis],
            )
            .await?;
        let existing = match rows.next().await? {
            Some(row) => {
                let kind: String = row.get(1)?;
                Some((
                    row.get::<i64>(0)?,
                    kind.parse::<ActionType>().map_err(Error::Database)?,
                    row.get::<i64>(2)?,
                ))
            }
            None => None,
        };
        drop(rows);

        let outcome = match existing {
            None => {
                self.conn.execute(
                    "INSERT INTO sync_queue (article_id, remote_id, action_type, axis, created_at)
                     VALUES (?, ?, ?, ?, ?)",
                    params![article_id.get(), remote_id, action.as_str(), axis, now],
                )
                .await?;
                EnqueueOutcome::Inserted(self.conn.last_insert_rowid())
            }
            Some((id, pending, attempts)) if pending == action.opposite() && attempts == 0 => {
                self.conn.execute("DELETE FROM sync_queue WHERE id = ?", [id]).await?;
                EnqueueOutcome::Cancelled
            }
            Some((id, _, _)) => {
                self.conn.execute(
                    "UPDATE sync_queue
                     SET action_type = ?, remote_id = ?, created_at = ?,
                         attempt_count = 0, last_attempt_at = NULL, last_error = NULL
                     WHERE id = ?",
                    params![action.as_str(), remote_id, now, id],
                )
                .await?;
                EnqueueOutcome::Replaced(id)
            }
        };

        Ok(outcome)
    }
}

impl QueueRepository for LibSqlQueueRepository<'_> {
    async fn enqueue(
        &self,
        article_id: ArticleId,
        remote_id: &str,
        action: ActionType,
        now: i64,
    ) -> Result<EnqueueOutcome> {
        let tx = self.conn.transaction().await?;
        let outcome = LibSqlQueueRepository::new(&tx)
            .enqueue_in_transaction(article_id, remote_id, action, now)
            .await?;
        tx.commit().await?;
        Ok(outcome)
    }

    async fn drain(
        &self,
        max_items: usize,
        now: i64,
        retry: &RetryPolicy,
    ) -> Result<Vec<QueueEntry>> {
        let live = self.list_live().await?;
        Ok(live
            .into_iter()
            .filter(|entry| retry.is_eligible(entry, now))
            .take(max_items)
            .collect())
    }

    async fn list_live(&self) -> Result<Vec<QueueEntry>> {
        self.query_entries(
            &format!("SELECT {QUEUE_COLUMNS} FROM sync_queue ORDER BY created_at ASC, id ASC"),
            Vec::new(),
        )
        .await
    }

    async fn remove(&self, ids: &[i64]) -> Result<u64> {
        let mut removed = 0;
        for chunk in ids.chunks(ID_CHUNK) {
            removed += self
                .conn
                .execute(
                    &format!(
                        "DELETE FROM sync_queue WHERE id IN ({})",
                        sql_placeholders(chunk.len())
                    ),
                    params_from_iter(chunk.iter().copied()),
                )
                .await?;
        }
        Ok(removed)
    }

    async fn mark_attempt(&self, id: i64, error: &str, now: i64) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE sync_queue
                 SET attempt_count = attempt_count + 1, last_attempt_at = ?, last_error = ?
                 WHERE id = ?",
                params![now, error, id],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(format!("queue entry {id}")));
        }
        Ok(())
    }

    async fn dead_letter(&self, entry: &QueueEntry, error: &str, now: i64) -> Result<()> {
        let tx = self.conn.transaction().await?;
        tx.execute(
            "INSERT INTO failed_sync_queue
                (article_id, remote_id, action_type, attempt_count, last_error, failed_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                entry.article_id.get(),
                entry.remote_id.clone(),
                entry.action_type.as_str(),
                i64::from(entry.attempt_count),
                error,
                now
            ],
        )
        .await?;
        tx.execute("DELETE FROM sync_queue WHERE id = ?", [entry.id])
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        let mut rows = self.conn.query("SELECT COUNT(*) FROM sync_queue", ()).await?;
        let count = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn oldest_created_at(&self) -> Result<Option<i64>> {
        let mut rows = self
            .conn
            .query("SELECT MIN(created_at) FROM sync_queue", ())
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<Option<i64>>(0)?),
            None => Ok(None),
        }
    }

    async fn has_due_retry(&self, now: i64, retry: &RetryPolicy) -> Result<bool> {
        Ok(self
            .attempted_entries()
            .await?
            .iter()
            .any(|entry| retry.is_eligible(entry, now)))
    }

    async fn remove_reflected(&self, pulled: &[RemoteArticle]) -> Result<Vec<i64>> {
        let mut satisfied = Vec::new();

        for chunk in pulled.chunks(ID_CHUNK) {
            let entries = self
                .query_entries(
                    &format!(
                        "SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE remote_id IN ({})",
                        sql_placeholders(chunk.len())
                    ),
                    chunk
                        .iter()
                        .map(|record| Value::from(record.remote_id.clone()))
                        .collect(),
                )
                .await?;

            for entry in entries {
                let reflected = chunk
                    .iter()
                    .filter(|record| record.remote_id == entry.remote_id)
                    .any(|record| {
                        entry
                            .action_type
                            .is_reflected_by(record.is_read, record.is_starred)
                    });
                if reflected {
                    satisfied.push(entry.id);
                }
            }
        }

        self.remove(&satisfied).await?;
        Ok(satisfied)
    }

    async fn remove_read_axis_in_scope(&self, scope: &MarkAllScope) -> Result<u64> {
        let (clause, values) = scope_clause(scope);
        let rows = self
            .conn
            .execute(
                &format!(
                    "DELETE FROM sync_queue
                     WHERE axis = 'read'
                       AND article_id IN (SELECT id FROM articles WHERE {clause})"
                ),
                params_from_iter(values),
            )
            .await?;
        Ok(rows)
    }

    async fn articles_with_live_entries(
        &self,
        article_ids: &[ArticleId],
    ) -> Result<HashSet<ArticleId>> {
        let mut found = HashSet::new();
        for chunk in article_ids.chunks(ID_CHUNK) {
            let mut rows = self
                .conn
                .query(
                    &format!(
                        "SELECT DISTINCT article_id FROM sync_queue WHERE article_id IN ({})",
                        sql_placeholders(chunk.len())
                    ),
                    params_from_iter(chunk.iter().map(|id| id.get())),
                )
                .await?;
            while let Some(row) = rows.next().await? {
                found.insert(ArticleId::new(row.get(0)?));
            }
        }
        Ok(found)
    }

    async fn list_failed(&self, limit: usize) -> Result<Vec<FailedQueueEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, article_id, remote_id, action_type, attempt_count, last_error, failed_at
                 FROM failed_sync_queue
                 ORDER BY failed_at DESC, id DESC
                 LIMIT ?",
                [i64::try_from(limit).unwrap_or(i64::MAX)],
            )
            .await?;

        let mut failed = Vec::new();
        while let Some(row) = rows.next().await? {
            failed.push(Self::parse_failed(&row)?);
        }
        Ok(failed)
    }

    async fn take_failed(&self) -> Result<Vec<FailedQueueEntry>> {
        let tx = self.conn.transaction().await?;
        let mut rows = tx
            .query(
                "SELECT id, article_id, remote_id, action_type, attempt_count, last_error, failed_at
                 FROM failed_sync_queue
                 ORDER BY failed_at ASC, id ASC",
                (),
            )
            .await?;
        let mut failed = Vec::new();
        while let Some(row) = rows.next().await? {
            failed.push(Self::parse_failed(&row)?);
        }
        drop(rows);

        tx.execute("DELETE FROM failed_sync_queue", ()).await?;
        tx.commit().await?;
        Ok(failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ArticleRepository, Database, LibSqlArticleRepository};
    use pretty_assertions::assert_eq;

    const MINUTE: i64 = 60_000;

    async fn setup_with_articles(count: usize) -> (Database, Vec<ArticleId>) {
        let db = Database::open_in_memory().await.unwrap();
        let articles = LibSqlArticleRepository::new(db.connection());
        let mut ids = Vec::new();
        for index in 0..count {
            let id = articles
                .insert_remote(&remote(&format!("r{index}"), false, false), 0)
                .await
                .unwrap();
            ids.push(id);
        }
        (db, ids)
    }

    fn remote(remote_id: &str, is_read: bool, is_starred: bool) -> RemoteArticle {
        RemoteArticle {
            remote_id: remote_id.to_string(),
            feed_id: "feed/a".to_string(),
            title: remote_id.to_string(),
            url: None,
            published_at: 0,
            is_read,
            is_starred,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_same_action_twice_yields_one_entry() {
        let (db, ids) = setup_with_articles(1).await;
        let queue = LibSqlQueueRepository::new(db.connection());

        let first = queue.enqueue(ids[0], "r0", ActionType::Read, 100).await.unwrap();
        let second = queue.enqueue(ids[0], "r0", ActionType::Read, 200).await.unwrap();

        let EnqueueOutcome::Inserted(id) = first else {
            panic!("expected insert, got {first:?}");
        };
        assert_eq!(second, EnqueueOutcome::Replaced(id));
        let live = queue.list_live().await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].created_at, 200);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_opposite_action_cancels_unattempted_entry() {
        let (db, ids) = setup_with_articles(1).await;
        let queue = LibSqlQueueRepository::new(db.connection());

        queue.enqueue(ids[0], "r0", ActionType::Read, 100).await.unwrap();
        let outcome = queue.enqueue(ids[0], "r0", ActionType::Unread, 110).await.unwrap();

        assert_eq!(outcome, EnqueueOutcome::Cancelled);
        assert_eq!(queue.count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_toggle_sequence_collapses_to_net_state() {
        let (db, ids) = setup_with_articles(1).await;
        let queue = LibSqlQueueRepository::new(db.connection());

        let toggles = [
            ActionType::Read,
            ActionType::Unread,
            ActionType::Read,
            ActionType::Unread,
            ActionType::Read,
        ];
        for (step, action) in toggles.into_iter().enumerate() {
            queue
                .enqueue(ids[0], "r0", action, 100 + step as i64)
                .await
                .unwrap();
        }

        let live = queue.list_live().await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].action_type, ActionType::Read);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_opposite_action_replaces_attempted_entry() {
        let (db, ids) = setup_with_articles(1).await;
        let queue = LibSqlQueueRepository::new(db.connection());

        let EnqueueOutcome::Inserted(id) =
            queue.enqueue(ids[0], "r0", ActionType::Star, 100).await.unwrap()
        else {
            panic!("expected insert");
        };
        queue.mark_attempt(id, "timeout", 150).await.unwrap();

        let outcome = queue.enqueue(ids[0], "r0", ActionType::Unstar, 200).await.unwrap();

        assert_eq!(outcome, EnqueueOutcome::Replaced(id));
        let live = queue.list_live().await.unwrap();
        assert_eq!(live[0].action_type, ActionType::Unstar);
        assert_eq!(live[0].attempt_count, 0);
        assert_eq!(live[0].last_attempt_at, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_axes_are_independent() {
        let (db, ids) = setup_with_articles(1).await;
        let queue = LibSqlQueueRepository::new(db.connection());

        queue.enqueue(ids[0], "r0", ActionType::Read, 100).await.unwrap();
        queue.enqueue(ids[0], "r0", ActionType::Star, 101).await.unwrap();

        assert_eq!(queue.count().await.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_drain_is_oldest_first_and_capped() {
        let (db, ids) = setup_with_articles(3).await;
        let queue = LibSqlQueueRepository::new(db.connection());
        queue.enqueue(ids[0], "r0", ActionType::Read, 300).await.unwrap();
        queue.enqueue(ids[1], "r1", ActionType::Read, 100).await.unwrap();
        queue.enqueue(ids[2], "r2", ActionType::Read, 200).await.unwrap();

        let drained = queue
            .drain(2, 1_000, &RetryPolicy::default())
            .await
            .unwrap();

        assert_eq!(
            drained.iter().map(|e| e.remote_id.as_str()).collect::<Vec<_>>(),
            vec!["r1", "r2"]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_drain_skips_entries_in_backoff() {
        let (db, ids) = setup_with_articles(2).await;
        let queue = LibSqlQueueRepository::new(db.connection());
        let retry = RetryPolicy::default();
        let EnqueueOutcome::Inserted(waiting) =
            queue.enqueue(ids[0], "r0", ActionType::Read, 0).await.unwrap()
        else {
            panic!("expected insert");
        };
        queue.enqueue(ids[1], "r1", ActionType::Read, 10).await.unwrap();
        queue.mark_attempt(waiting, "network down", 0).await.unwrap();

        let drained = queue.drain(10, 5 * MINUTE, &retry).await.unwrap();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].remote_id, "r1");
        assert!(!queue.has_due_retry(5 * MINUTE, &retry).await.unwrap());

        let drained = queue.drain(10, 10 * MINUTE, &retry).await.unwrap();
        assert_eq!(drained.len(), 2);
        assert!(queue.has_due_retry(10 * MINUTE, &retry).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_remove_reflected_only_clears_matching_state() {
        let (db, ids) = setup_with_articles(2).await;
        let queue = LibSqlQueueRepository::new(db.connection());
        queue.enqueue(ids[0], "r0", ActionType::Read, 1).await.unwrap();
        queue.enqueue(ids[1], "r1", ActionType::Star, 2).await.unwrap();

        let removed = queue
            .remove_reflected(&[remote("r0", true, false), remote("r1", false, false)])
            .await
            .unwrap();

        assert_eq!(removed.len(), 1);
        let live = queue.list_live().await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].remote_id, "r1");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dead_letter_and_take_failed() {
        let (db, ids) = setup_with_articles(1).await;
        let queue = LibSqlQueueRepository::new(db.connection());
        queue.enqueue(ids[0], "r0", ActionType::Unread, 1).await.unwrap();
        let entry = queue.list_live().await.unwrap().remove(0);

        queue.dead_letter(&entry, "HTTP 500", 99).await.unwrap();

        assert_eq!(queue.count().await.unwrap(), 0);
        let failed = queue.list_failed(10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].last_error.as_deref(), Some("HTTP 500"));
        assert_eq!(failed[0].failed_at, 99);

        let taken = queue.take_failed().await.unwrap();
        assert_eq!(taken.len(), 1);
        assert!(queue.list_failed(10).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_remove_read_axis_in_feed_scope_keeps_stars() {
        let (db, ids) = setup_with_articles(2).await;
        let queue = LibSqlQueueRepository::new(db.connection());
        queue.enqueue(ids[0], "r0", ActionType::Unread, 1).await.unwrap();
        queue.enqueue(ids[0], "r0", ActionType::Star, 2).await.unwrap();
        queue.enqueue(ids[1], "r1", ActionType::Read, 3).await.unwrap();

        let removed = queue
            .remove_read_axis_in_scope(&MarkAllScope::Feed("feed/a".to_string()))
            .await
            .unwrap();

        assert_eq!(removed, 2);
        let live = queue.list_live().await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].action_type, ActionType::Star);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_articles_with_live_entries() {
        let (db, ids) = setup_with_articles(3).await;
        let queue = LibSqlQueueRepository::new(db.connection());
        queue.enqueue(ids[1], "r1", ActionType::Read, 1).await.unwrap();

        let pending = queue.articles_with_live_entries(&ids).await.unwrap();
        assert_eq!(pending, HashSet::from([ids[1]]));
    }
}
