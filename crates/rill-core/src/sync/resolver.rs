//! Conflict resolution for inbound records.
//!
//! A pulled record overwrites the local row unless the user changed the row
//! at or after the last successful sync, or the row still has a pending
//! change in the queue. In both cases the local edit wins and the queue
//! carries it to the remote on the next push.

use std::collections::HashSet;

use crate::models::{Article, ArticleId, RemoteArticle, SyncRunId};
use crate::services::DatabaseService;
use crate::sync::events::{SyncEvent, SyncEventSink};
use crate::Result;

/// Decision for one inbound record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Not known locally
    Insert,
    /// Remote state replaces local state
    Overwrite,
    /// Nothing to change
    Unchanged,
    /// Local edit newer than the watermark is kept
    KeepLocal { local_update_ts: i64 },
}

/// Decide what to do with `remote` given the matching local row.
///
/// `watermark` is the start of the last successful sync (0 if none).
#[must_use]
pub fn resolve(
    local: Option<&Article>,
    remote: &RemoteArticle,
    has_pending_change: bool,
    watermark: i64,
) -> Resolution {
    let Some(local) = local else {
        return Resolution::Insert;
    };

    if !differs(local, remote) {
        return Resolution::Unchanged;
    }

    match local.local_update_ts {
        Some(local_update_ts) if local_update_ts >= watermark || has_pending_change => {
            Resolution::KeepLocal { local_update_ts }
        }
        _ if has_pending_change => Resolution::KeepLocal {
            local_update_ts: watermark,
        },
        _ => Resolution::Overwrite,
    }
}

fn differs(local: &Article, remote: &RemoteArticle) -> bool {
    local.is_read != remote.is_read
        || local.is_starred != remote.is_starred
        || local.title != remote.title
        || local.url != remote.url
        || local.feed_id != remote.feed_id
}

/// Totals for one reconcile pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileTally {
    pub new: u32,
    pub updated: u32,
    pub conflicts: u32,
}

pub struct ConflictResolver<'a> {
    store: &'a DatabaseService,
    events: &'a dyn SyncEventSink,
}

impl<'a> ConflictResolver<'a> {
    pub const fn new(store: &'a DatabaseService, events: &'a dyn SyncEventSink) -> Self {
        Self { store, events }
    }

    /// Apply inbound records to the store.
    ///
    /// Written rows get `sync_update_ts = watermark`.
    pub async fn reconcile(
        &self,
        run_id: SyncRunId,
        records: &[RemoteArticle],
        watermark: i64,
    ) -> Result<ReconcileTally> {
        let mut tally = ReconcileTally::default();
        if records.is_empty() {
            return Ok(tally);
        }

        let remote_ids: Vec<String> = records.iter().map(|r| r.remote_id.clone()).collect();
        let existing = self.store.articles_by_remote_ids(&remote_ids).await?;
        let known: Vec<ArticleId> = existing.values().map(|article| article.id).collect();
        let pending: HashSet<ArticleId> =
            self.store.articles_with_pending_changes(&known).await?;

        let mut seen = HashSet::with_capacity(records.len());
        for record in records {
            if !seen.insert(record.remote_id.as_str()) {
                continue;
            }
            let local = existing.get(&record.remote_id);
            let has_pending = local.is_some_and(|article| pending.contains(&article.id));

            match resolve(local, record, has_pending, watermark) {
                Resolution::Insert => {
                    self.store.insert_remote_article(record, watermark).await?;
                    tally.new += 1;
                }
                Resolution::Overwrite => {
                    let Some(article) = local else { continue };
                    if self
                        .store
                        .overwrite_article(article.id, record, watermark)
                        .await?
                    {
                        tally.updated += 1;
                    } else {
                        // Edited or queued after the snapshot above.
                        let local_update_ts = self
                            .store
                            .get_article(article.id)
                            .await?
                            .and_then(|current| current.local_update_ts)
                            .unwrap_or(watermark);
                        self.record_conflict(run_id, article.id, record, local_update_ts, watermark);
                        tally.conflicts += 1;
                    }
                }
                Resolution::Unchanged => {}
                Resolution::KeepLocal { local_update_ts } => {
                    if let Some(article) = local {
                        self.record_conflict(run_id, article.id, record, local_update_ts, watermark);
                    }
                    tally.conflicts += 1;
                }
            }
        }

        Ok(tally)
    }

    fn record_conflict(
        &self,
        run_id: SyncRunId,
        article_id: ArticleId,
        record: &RemoteArticle,
        local_update_ts: i64,
        watermark: i64,
    ) {
        self.events.record(&SyncEvent::Conflict {
            run_id,
            article_id,
            remote_id: record.remote_id.clone(),
            local_update_ts,
            watermark,
        });
    }
}
