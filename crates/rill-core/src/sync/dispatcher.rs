//! Batch dispatcher: drains the change queue into grouped remote tag edits.

use std::collections::HashSet;

use crate::models::{ActionType, MarkAllScope, QueueEntry};
use crate::services::{DatabaseService, LocalMarkAll};
use crate::sync::client::RemoteSyncClient;
use crate::sync::clock::Clock;
use crate::sync::error::{SyncError, SyncResult};
use crate::sync::events::{SyncEvent, SyncEventSink};
use crate::sync::remote::{CredentialProvider, RemoteApi};
use crate::sync::retry::{RetryManager, RetryPolicy};

/// What one dispatch pass achieved
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Entries acknowledged by the remote and removed from the queue
    pub pushed: u32,
    /// Entries whose transmission failed and went to the retry manager
    pub failed: u32,
    pub dead_lettered: u32,
    pub batches: u32,
    /// Set when the pass stopped early; remaining entries were left untouched
    pub halted: Option<SyncError>,
    /// Last non-halting failure, kept so the run can report it
    pub last_error: Option<SyncError>,
}

pub struct BatchDispatcher<'a, A, C> {
    client: &'a RemoteSyncClient<A, C>,
    store: &'a DatabaseService,
    retry: RetryPolicy,
    events: &'a dyn SyncEventSink,
    clock: &'a dyn Clock,
    batch_size: usize,
    max_drain: usize,
}

impl<'a, A: RemoteApi, C: CredentialProvider> BatchDispatcher<'a, A, C> {
    pub fn new(
        client: &'a RemoteSyncClient<A, C>,
        store: &'a DatabaseService,
        retry: RetryPolicy,
        events: &'a dyn SyncEventSink,
        clock: &'a dyn Clock,
        batch_size: usize,
        max_drain: usize,
    ) -> Self {
        Self {
            client,
            store,
            retry,
            events,
            clock,
            batch_size: batch_size.max(1),
            max_drain,
        }
    }

    /// Drain eligible entries and push them, one remote call per chunk.
    ///
    /// Only store failures are returned as `Err`; remote failures are recorded
    /// in the report.
    pub async fn dispatch(&self) -> SyncResult<DispatchReport> {
        let now = self.clock.now_ms();
        let entries = self.store.drain_queue(self.max_drain, now, &self.retry).await?;
        let mut report = DispatchReport::default();
        if entries.is_empty() {
            return Ok(report);
        }

        let retry = RetryManager::new(self.store, self.retry, self.events);
        for (action, group) in group_by_action(entries) {
            for chunk in group.chunks(self.batch_size) {
                let remote_ids: Vec<String> =
                    chunk.iter().map(|entry| entry.remote_id.clone()).collect();
                report.batches += 1;

                match self.client.send_action_batch(action, &remote_ids).await {
                    Ok(outcome) if outcome.rejected.is_empty() => {
                        let ids: Vec<i64> = chunk.iter().map(|entry| entry.id).collect();
                        self.store.remove_queue_entries(&ids).await?;
                        report.pushed += count(chunk.len());
                        self.events.record(&SyncEvent::BatchSent {
                            action,
                            items: chunk.len(),
                        });
                    }
                    Ok(outcome) => {
                        let rejected: HashSet<&str> =
                            outcome.rejected.iter().map(String::as_str).collect();
                        let (refused, accepted): (Vec<QueueEntry>, Vec<QueueEntry>) = chunk
                            .iter()
                            .cloned()
                            .partition(|entry| rejected.contains(entry.remote_id.as_str()));

                        let accepted_ids: Vec<i64> = accepted.iter().map(|entry| entry.id).collect();
                        self.store.remove_queue_entries(&accepted_ids).await?;
                        report.pushed += count(accepted.len());

                        let error = SyncError::PartialFailure {
                            rejected: outcome.rejected.clone(),
                            total: chunk.len(),
                        };
                        let tally = retry
                            .record_failure(&refused, &error.to_string(), self.clock.now_ms())
                            .await?;
                        report.failed += count(refused.len());
                        report.dead_lettered += tally.dead_lettered;
                        self.events.record(&SyncEvent::ItemsRejected {
                            action,
                            rejected: refused.len(),
                            total: chunk.len(),
                        });
                        report.last_error = Some(error);
                    }
                    Err(error) if error.halts_cycle() => {
                        self.events.record(&SyncEvent::BatchFailed {
                            action,
                            items: chunk.len(),
                            kind: error.kind(),
                            message: error.to_string(),
                        });
                        if let SyncError::Store(_) = error {
                            return Err(error);
                        }
                        report.halted = Some(error);
                        return Ok(report);
                    }
                    Err(error) => {
                        let tally = retry
                            .record_failure(chunk, &error.to_string(), self.clock.now_ms())
                            .await?;
                        report.failed += count(chunk.len());
                        report.dead_lettered += tally.dead_lettered;
                        self.events.record(&SyncEvent::BatchFailed {
                            action,
                            items: chunk.len(),
                            kind: error.kind(),
                            message: error.to_string(),
                        });
                        report.last_error = Some(error);
                    }
                }
            }
        }

        Ok(report)
    }

    /// Mark everything in `scope` read remotely, then mirror it locally.
    ///
    /// The local store is untouched when the remote call fails.
    pub async fn mark_all_as_read(&self, scope: &MarkAllScope) -> SyncResult<LocalMarkAll> {
        let older_than = self.clock.now_ms();
        self.client.mark_all_as_read(scope, older_than).await?;

        let local = self
            .store
            .apply_mark_all_read(scope, self.clock.now_ms())
            .await?;
        self.events.record(&SyncEvent::MarkedAllRead {
            scope: scope.clone(),
            articles: local.articles_marked,
        });
        Ok(local)
    }
}

/// Group entries by action, ordering groups by their oldest entry
fn group_by_action(entries: Vec<QueueEntry>) -> Vec<(ActionType, Vec<QueueEntry>)> {
    let mut groups: Vec<(ActionType, Vec<QueueEntry>)> = Vec::new();
    for entry in entries {
        match groups
            .iter_mut()
            .find(|(action, _)| *action == entry.action_type)
        {
            Some((_, group)) => group.push(entry),
            None => groups.push((entry.action_type, vec![entry])),
        }
    }
    groups
}

fn count(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ArticleId;
    use pretty_assertions::assert_eq;

    fn entry(id: i64, action: ActionType) -> QueueEntry {
        QueueEntry {
            id,
            article_id: ArticleId::new(id),
            remote_id: format!("r{id}"),
            action_type: action,
            created_at: id,
            attempt_count: 0,
            last_attempt_at: None,
            last_error: None,
        }
    }

    #[test]
    fn groups_follow_oldest_entry_order() {
        let groups = group_by_action(vec![
            entry(1, ActionType::Star),
            entry(2, ActionType::Read),
            entry(3, ActionType::Star),
            entry(4, ActionType::Unread),
        ]);

        let shape: Vec<(ActionType, Vec<i64>)> = groups
            .into_iter()
            .map(|(action, group)| (action, group.iter().map(|e| e.id).collect()))
            .collect();
        assert_eq!(
            shape,
            vec![
                (ActionType::Star, vec![1, 3]),
                (ActionType::Read, vec![2]),
                (ActionType::Unread, vec![4]),
            ]
        );
    }
}
