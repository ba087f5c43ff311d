//! Retry policy and dead-lettering for failed queue entries.

use std::time::Duration;

use crate::models::QueueEntry;
use crate::services::DatabaseService;
use crate::sync::clock::duration_ms;
use crate::sync::events::{SyncEvent, SyncEventSink};
use crate::Result;

pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Exponential backoff for queue entries.
///
/// After the n-th failed attempt an entry waits `base * 2^(n-1)` before it
/// becomes eligible again. A failure that would push `attempt_count` past
/// `max_retries` moves the entry to the dead-letter table instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_backoff: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_backoff: DEFAULT_BASE_BACKOFF,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl RetryPolicy {
    /// Wait required after `attempt_count` failed attempts
    #[must_use]
    pub fn backoff_for(&self, attempt_count: u32) -> Duration {
        if attempt_count == 0 {
            return Duration::ZERO;
        }
        let exponent = (attempt_count - 1).min(20);
        self.base_backoff.saturating_mul(1 << exponent)
    }

    /// Unix ms at which `entry` may be transmitted again
    #[must_use]
    pub fn next_eligible_at(&self, entry: &QueueEntry) -> i64 {
        match entry.last_attempt_at {
            Some(last) if entry.attempt_count > 0 => {
                last.saturating_add(duration_ms(self.backoff_for(entry.attempt_count)))
            }
            _ => entry.created_at,
        }
    }

    #[must_use]
    pub fn is_eligible(&self, entry: &QueueEntry, now: i64) -> bool {
        entry.attempt_count == 0 || now >= self.next_eligible_at(entry)
    }

    /// Whether a failure bringing the entry to `attempts` attempts is terminal
    #[must_use]
    pub const fn is_exhausted(&self, attempts: u32) -> bool {
        attempts > self.max_retries
    }
}

/// What happened to a set of failed entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryTally {
    pub rescheduled: u32,
    pub dead_lettered: u32,
}

/// Applies the retry policy to entries whose transmission failed
pub struct RetryManager<'a> {
    store: &'a DatabaseService,
    policy: RetryPolicy,
    events: &'a dyn SyncEventSink,
}

impl<'a> RetryManager<'a> {
    pub const fn new(
        store: &'a DatabaseService,
        policy: RetryPolicy,
        events: &'a dyn SyncEventSink,
    ) -> Self {
        Self {
            store,
            policy,
            events,
        }
    }

    pub async fn record_failure(
        &self,
        entries: &[QueueEntry],
        error: &str,
        now: i64,
    ) -> Result<RetryTally> {
        let mut tally = RetryTally::default();

        for entry in entries {
            let attempts = entry.attempt_count.saturating_add(1);
            if self.policy.is_exhausted(attempts) {
                let mut dead = entry.clone();
                dead.attempt_count = attempts;
                self.store.dead_letter(&dead, error, now).await?;
                self.events.record(&SyncEvent::EntryDeadLettered {
                    entry_id: entry.id,
                    article_id: entry.article_id,
                    action: entry.action_type,
                    attempts,
                    error: error.to_string(),
                });
                tally.dead_lettered += 1;
            } else {
                self.store.mark_queue_attempt(entry.id, error, now).await?;
                tally.rescheduled += 1;
            }
        }

        Ok(tally)
    }
}
