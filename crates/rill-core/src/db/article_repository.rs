//! Article and feed repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT/OFFSET

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::models::{
    ActionAxis, ActionType, Article, ArticleId, Feed, MarkAllScope, RemoteArticle, Subscription,
};
use crate::util::sql_placeholders;
use libsql::{params, params_from_iter, Connection, Value};

/// Maximum bound parameters per `IN (...)` lookup
const LOOKUP_CHUNK: usize = 400;

const ARTICLE_COLUMNS: &str = "id, remote_id, feed_id, title, url, published_at, is_read, \
                               is_starred, local_update_ts, sync_update_ts";

/// Trait for article storage operations (async)
#[allow(async_fn_in_trait)]
pub trait ArticleRepository {
    /// Get an article by local id
    async fn get(&self, id: ArticleId) -> Result<Option<Article>>;

    /// Look up articles by remote id; missing ids are absent from the map
    async fn get_by_remote_ids(&self, remote_ids: &[String]) -> Result<HashMap<String, Article>>;

    /// List articles newest first
    async fn list(&self, limit: usize, offset: usize, unread_only: bool) -> Result<Vec<Article>>;

    /// Insert an article first seen in a pull
    async fn insert_remote(&self, remote: &RemoteArticle, sync_ts: i64) -> Result<ArticleId>;

    /// Overwrite local state with an inbound record stamped `watermark`.
    ///
    /// The write only lands while the row has no local edit at or after
    /// `watermark` and no queued change; returns whether it landed.
    /// Leaves `local_update_ts` alone.
    async fn overwrite_from_remote(
        &self,
        id: ArticleId,
        remote: &RemoteArticle,
        watermark: i64,
    ) -> Result<bool>;

    /// Apply a user action locally and stamp `local_update_ts`
    async fn apply_local_action(
        &self,
        id: ArticleId,
        action: ActionType,
        now: i64,
    ) -> Result<Article>;

    /// Mark every unread article in scope as read locally; returns rows changed
    async fn mark_read_in_scope(&self, scope: &MarkAllScope, now: i64) -> Result<u64>;

    /// Replace the subscription listing
    async fn replace_feeds(&self, subscriptions: &[Subscription]) -> Result<()>;

    /// List known feeds
    async fn list_feeds(&self) -> Result<Vec<Feed>>;
}

/// libSQL implementation of `ArticleRepository`
pub struct LibSqlArticleRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlArticleRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse an article from a database row
    fn parse_article(row: &libsql::Row) -> Result<Article> {
        Ok(Article {
            id: ArticleId::new(row.get(0)?),
            remote_id: row.get(1)?,
            feed_id: row.get(2)?,
            title: row.get(3)?,
            url: row.get(4)?,
            published_at: row.get(5)?,
            is_read: row.get::<i64>(6)? != 0,
            is_starred: row.get::<i64>(7)? != 0,
            local_update_ts: row.get(8)?,
            sync_update_ts: row.get(9)?,
        })
    }
}

/// SQL predicate over `articles` selecting a mark-all scope, with its parameters
pub(crate) fn scope_clause(scope: &MarkAllScope) -> (&'static str, Vec<Value>) {
    match scope {
        MarkAllScope::Feed(stream_id) => ("feed_id = ?", vec![Value::from(stream_id.clone())]),
        MarkAllScope::Folder(label) => (
            "feed_id IN (SELECT stream_id FROM feeds WHERE folder = ? COLLATE NOCASE)",
            vec![Value::from(label.clone())],
        ),
        MarkAllScope::Global => ("1 = 1", Vec::new()),
    }
}

impl ArticleRepository for LibSqlArticleRepository<'_> {
    async fn get(&self, id: ArticleId) -> Result<Option<Article>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ?"),
                [id.get()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_article(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_by_remote_ids(&self, remote_ids: &[String]) -> Result<HashMap<String, Article>> {
        let mut found = HashMap::with_capacity(remote_ids.len());

        for chunk in remote_ids.chunks(LOOKUP_CHUNK) {
            let sql = format!(
                "SELECT {ARTICLE_COLUMNS} FROM articles WHERE remote_id IN ({})",
                sql_placeholders(chunk.len())
            );
            let mut rows = self
                .conn
                .query(&sql, params_from_iter(chunk.iter().cloned()))
                .await?;

            while let Some(row) = rows.next().await? {
                let article = Self::parse_article(&row)?;
                found.insert(article.remote_id.clone(), article);
            }
        }

        Ok(found)
    }

    async fn list(&self, limit: usize, offset: usize, unread_only: bool) -> Result<Vec<Article>> {
        let filter = if unread_only { "WHERE is_read = 0" } else { "" };
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {ARTICLE_COLUMNS} FROM articles {filter}
                     ORDER BY published_at DESC, id DESC
                     LIMIT ? OFFSET ?"
                ),
                params![limit as i64, offset as i64],
            )
            .await?;

        let mut articles = Vec::new();
        while let Some(row) = rows.next().await? {
            articles.push(Self::parse_article(&row)?);
        }
        Ok(articles)
    }

    async fn insert_remote(&self, remote: &RemoteArticle, sync_ts: i64) -> Result<ArticleId> {
        self.conn
            .execute(
                "INSERT INTO articles
                    (remote_id, feed_id, title, url, published_at, is_read, is_starred, sync_update_ts)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    remote.remote_id.clone(),
                    remote.feed_id.clone(),
                    remote.title.clone(),
                    remote.url.clone(),
                    remote.published_at,
                    i64::from(remote.is_read),
                    i64::from(remote.is_starred),
                    sync_ts
                ],
            )
            .await?;

        Ok(ArticleId::new(self.conn.last_insert_rowid()))
    }

    async fn overwrite_from_remote(
        &self,
        id: ArticleId,
        remote: &RemoteArticle,
        watermark: i64,
    ) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE articles
                 SET feed_id = ?, title = ?, url = ?, is_read = ?, is_starred = ?, sync_update_ts = ?
                 WHERE id = ?
                   AND (local_update_ts IS NULL OR local_update_ts < ?)
                   AND NOT EXISTS (SELECT 1 FROM sync_queue WHERE sync_queue.article_id = articles.id)",
                params![
                    remote.feed_id.clone(),
                    remote.title.clone(),
                    remote.url.clone(),
                    i64::from(remote.is_read),
                    i64::from(remote.is_starred),
                    watermark,
                    id.get(),
                    watermark
                ],
            )
            .await?;

        Ok(rows > 0)
    }

    async fn apply_local_action(
        &self,
        id: ArticleId,
        action: ActionType,
        now: i64,
    ) -> Result<Article> {
        let column = match action.axis() {
            ActionAxis::Read => "is_read",
            ActionAxis::Star => "is_starred",
        };

        let rows = self
            .conn
            .execute(
                &format!("UPDATE articles SET {column} = ?, local_update_ts = ? WHERE id = ?"),
                params![i64::from(action.flag_value()), now, id.get()],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(format!("article {id}")));
        }

        self.get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("article {id}")))
    }

    async fn mark_read_in_scope(&self, scope: &MarkAllScope, now: i64) -> Result<u64> {
        let (clause, scope_params) = scope_clause(scope);
        let mut values = vec![Value::from(now)];
        values.extend(scope_params);

        let rows = self
            .conn
            .execute(
                &format!(
                    "UPDATE articles SET is_read = 1, local_update_ts = ?
                     WHERE is_read = 0 AND {clause}"
                ),
                params_from_iter(values),
            )
            .await?;

        Ok(rows)
    }

    async fn replace_feeds(&self, subscriptions: &[Subscription]) -> Result<()> {
        let tx = self.conn.transaction().await?;
        tx.execute("DELETE FROM feeds", ()).await?;
        for subscription in subscriptions {
            tx.execute(
                "INSERT OR REPLACE INTO feeds (stream_id, title, url, folder) VALUES (?, ?, ?, ?)",
                params![
                    subscription.stream_id.clone(),
                    subscription.title.clone(),
                    subscription.url.clone(),
                    subscription.folder.clone()
                ],
            )
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_feeds(&self) -> Result<Vec<Feed>> {
        let mut rows = self
            .conn
            .query(
                "SELECT stream_id, title, url, folder FROM feeds ORDER BY title COLLATE NOCASE",
                (),
            )
            .await?;

        let mut feeds = Vec::new();
        while let Some(row) = rows.next().await? {
            feeds.push(Feed {
                stream_id: row.get(0)?,
                title: row.get(1)?,
                url: row.get(2)?,
                folder: row.get(3)?,
            });
        }
        Ok(feeds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::db::{LibSqlQueueRepository, QueueRepository};
    use pretty_assertions::assert_eq;

    fn remote(remote_id: &str, feed_id: &str, is_read: bool) -> RemoteArticle {
        RemoteArticle {
            remote_id: remote_id.to_string(),
            feed_id: feed_id.to_string(),
            title: format!("Article {remote_id}"),
            url: Some(format!("https://example.com/{remote_id}")),
            published_at: 1_700_000_000_000,
            is_read,
            is_starred: false,
        }
    }

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_insert_and_lookup_by_remote_id() {
        let db = setup().await;
        let repo = LibSqlArticleRepository::new(db.connection());

        let id = repo.insert_remote(&remote("r1", "feed/a", false), 10).await.unwrap();
        repo.insert_remote(&remote("r2", "feed/a", true), 10).await.unwrap();

        let found = repo
            .get_by_remote_ids(&["r1".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        let article = &found["r1"];
        assert_eq!(article.id, id);
        assert_eq!(article.sync_update_ts, Some(10));
        assert_eq!(article.local_update_ts, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_local_action_stamps_local_ts_only() {
        let db = setup().await;
        let repo = LibSqlArticleRepository::new(db.connection());
        let id = repo.insert_remote(&remote("r1", "feed/a", false), 10).await.unwrap();

        let article = repo.apply_local_action(id, ActionType::Star, 500).await.unwrap();

        assert!(article.is_starred);
        assert!(!article.is_read);
        assert_eq!(article.local_update_ts, Some(500));
        assert_eq!(article.sync_update_ts, Some(10));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_overwrite_keeps_local_ts() {
        let db = setup().await;
        let repo = LibSqlArticleRepository::new(db.connection());
        let id = repo.insert_remote(&remote("r1", "feed/a", false), 10).await.unwrap();
        repo.apply_local_action(id, ActionType::Read, 20).await.unwrap();

        let written = repo
            .overwrite_from_remote(id, &remote("r1", "feed/a", false), 30)
            .await
            .unwrap();

        assert!(written);
        let article = repo.get(id).await.unwrap().unwrap();
        assert!(!article.is_read);
        assert_eq!(article.local_update_ts, Some(20));
        assert_eq!(article.sync_update_ts, Some(30));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_overwrite_skips_rows_touched_since_watermark() {
        let db = setup().await;
        let repo = LibSqlArticleRepository::new(db.connection());
        let edited = repo.insert_remote(&remote("r1", "feed/a", false), 10).await.unwrap();
        let queued = repo.insert_remote(&remote("r2", "feed/a", false), 10).await.unwrap();
        repo.apply_local_action(edited, ActionType::Read, 40).await.unwrap();
        LibSqlQueueRepository::new(db.connection())
            .enqueue(queued, "r2", ActionType::Star, 5)
            .await
            .unwrap();

        let edited_written = repo
            .overwrite_from_remote(edited, &remote("r1", "feed/a", false), 30)
            .await
            .unwrap();
        let queued_written = repo
            .overwrite_from_remote(queued, &remote("r2", "feed/a", true), 30)
            .await
            .unwrap();

        assert!(!edited_written);
        assert!(!queued_written);
        let edited = repo.get(edited).await.unwrap().unwrap();
        assert!(edited.is_read);
        assert_eq!(edited.sync_update_ts, Some(10));
        let queued = repo.get(queued).await.unwrap().unwrap();
        assert!(!queued.is_read);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_apply_local_action_missing_article() {
        let db = setup().await;
        let repo = LibSqlArticleRepository::new(db.connection());

        let result = repo
            .apply_local_action(ArticleId::new(99), ActionType::Read, 1)
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_mark_read_in_folder_scope() {
        let db = setup().await;
        let repo = LibSqlArticleRepository::new(db.connection());
        repo.replace_feeds(&[
            Subscription {
                stream_id: "feed/a".to_string(),
                title: "A".to_string(),
                url: None,
                folder: Some("Tech".to_string()),
            },
            Subscription {
                stream_id: "feed/b".to_string(),
                title: "B".to_string(),
                url: None,
                folder: Some("News".to_string()),
            },
        ])
        .await
        .unwrap();
        repo.insert_remote(&remote("r1", "feed/a", false), 1).await.unwrap();
        repo.insert_remote(&remote("r2", "feed/a", true), 1).await.unwrap();
        repo.insert_remote(&remote("r3", "feed/b", false), 1).await.unwrap();

        let changed = repo
            .mark_read_in_scope(&MarkAllScope::Folder("tech".to_string()), 42)
            .await
            .unwrap();
        assert_eq!(changed, 1);

        let unread = repo.list(10, 0, true).await.unwrap();
        assert_eq!(
            unread.iter().map(|a| a.remote_id.as_str()).collect::<Vec<_>>(),
            vec!["r3"]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_replace_feeds_drops_unsubscribed() {
        let db = setup().await;
        let repo = LibSqlArticleRepository::new(db.connection());
        let sub = |id: &str| Subscription {
            stream_id: id.to_string(),
            title: id.to_string(),
            url: None,
            folder: None,
        };

        repo.replace_feeds(&[sub("feed/a"), sub("feed/b")]).await.unwrap();
        repo.replace_feeds(&[sub("feed/b")]).await.unwrap();

        let feeds = repo.list_feeds().await.unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].stream_id, "feed/b");
    }
}
