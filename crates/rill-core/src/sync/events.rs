//! Structured sync events.
//!
//! Every transition, batch, conflict and quota decision is reported through a
//! [`SyncEventSink`]. The default sink forwards to `tracing`.

use std::sync::Mutex;

use crate::models::{
    ActionType, ArticleId, MarkAllScope, SyncErrorKind, SyncMode, SyncRun, SyncRunId, SyncTrigger,
};
use crate::state::SyncPhase;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    RunStarted {
        run_id: SyncRunId,
        trigger: SyncTrigger,
    },
    RunSkipped {
        run_id: SyncRunId,
        reason: &'static str,
    },
    RunCoalesced {
        in_flight: SyncRunId,
        trigger: SyncTrigger,
    },
    PhaseChanged {
        run_id: SyncRunId,
        from: SyncPhase,
        to: SyncPhase,
    },
    ModeSelected {
        run_id: SyncRunId,
        mode: SyncMode,
        newer_than: Option<i64>,
        resuming: bool,
    },
    BatchSent {
        action: ActionType,
        items: usize,
    },
    BatchFailed {
        action: ActionType,
        items: usize,
        kind: SyncErrorKind,
        message: String,
    },
    ItemsRejected {
        action: ActionType,
        rejected: usize,
        total: usize,
    },
    EntryDeadLettered {
        entry_id: i64,
        article_id: ArticleId,
        action: ActionType,
        attempts: u32,
        error: String,
    },
    Conflict {
        run_id: SyncRunId,
        article_id: ArticleId,
        remote_id: String,
        local_update_ts: i64,
        watermark: i64,
    },
    EchoesCleared {
        run_id: SyncRunId,
        entries: usize,
    },
    QuotaExhausted {
        used: u32,
        limit: u32,
        resets_at: i64,
    },
    CredentialsRefreshed,
    MarkedAllRead {
        scope: MarkAllScope,
        articles: u64,
    },
    RunFinished {
        run: SyncRun,
    },
}

pub trait SyncEventSink: Send + Sync {
    fn record(&self, event: &SyncEvent);
}

/// Forwards events to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl SyncEventSink for TracingEventSink {
    fn record(&self, event: &SyncEvent) {
        match event {
            SyncEvent::RunStarted { run_id, trigger } => {
                tracing::info!(%run_id, ?trigger, "sync run started");
            }
            SyncEvent::RunSkipped { run_id, reason } => {
                tracing::debug!(%run_id, reason, "scheduled sync skipped");
            }
            SyncEvent::RunCoalesced { in_flight, trigger } => {
                tracing::debug!(%in_flight, ?trigger, "sync already running; trigger coalesced");
            }
            SyncEvent::PhaseChanged { run_id, from, to } => {
                tracing::debug!(%run_id, from = from.as_str(), to = to.as_str(), "sync phase");
            }
            SyncEvent::ModeSelected {
                run_id,
                mode,
                newer_than,
                resuming,
            } => {
                tracing::info!(
                    %run_id,
                    mode = mode.as_str(),
                    ?newer_than,
                    resuming,
                    "sync mode selected"
                );
            }
            SyncEvent::BatchSent { action, items } => {
                tracing::info!(action = action.as_str(), items, "batch sent");
            }
            SyncEvent::BatchFailed {
                action,
                items,
                kind,
                message,
            } => {
                tracing::warn!(
                    action = action.as_str(),
                    items,
                    kind = kind.as_str(),
                    "batch failed: {message}"
                );
            }
            SyncEvent::ItemsRejected {
                action,
                rejected,
                total,
            } => {
                tracing::warn!(
                    action = action.as_str(),
                    rejected,
                    total,
                    "remote rejected part of a batch"
                );
            }
            SyncEvent::EntryDeadLettered {
                entry_id,
                article_id,
                action,
                attempts,
                error,
            } => {
                tracing::warn!(
                    entry_id,
                    %article_id,
                    action = action.as_str(),
                    attempts,
                    "queue entry dead-lettered: {error}"
                );
            }
            SyncEvent::Conflict {
                run_id,
                article_id,
                remote_id,
                local_update_ts,
                watermark,
            } => {
                tracing::info!(
                    %run_id,
                    %article_id,
                    remote_id = %remote_id,
                    local_update_ts,
                    watermark,
                    "local edit kept over remote state"
                );
            }
            SyncEvent::EchoesCleared { run_id, entries } => {
                tracing::debug!(%run_id, entries, "queue entries already reflected remotely");
            }
            SyncEvent::QuotaExhausted {
                used,
                limit,
                resets_at,
            } => {
                tracing::warn!(used, limit, resets_at, "daily remote call quota exhausted");
            }
            SyncEvent::CredentialsRefreshed => {
                tracing::info!("remote credentials refreshed");
            }
            SyncEvent::MarkedAllRead { scope, articles } => {
                tracing::info!(?scope, articles, "marked all as read");
            }
            SyncEvent::RunFinished { run } => match &run.error {
                Some(failure) => tracing::warn!(
                    run_id = %run.id,
                    kind = failure.kind.as_str(),
                    counts = ?run.counts,
                    "sync run failed: {}",
                    failure.message
                ),
                None => tracing::info!(
                    run_id = %run.id,
                    status = ?run.status,
                    counts = ?run.counts,
                    "sync run finished"
                ),
            },
        }
    }
}

/// Keeps events in memory; used by tests and diagnostics
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<SyncEvent>>,
}

impl MemoryEventSink {
    pub fn events(&self) -> Vec<SyncEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl SyncEventSink for MemoryEventSink {
    fn record(&self, event: &SyncEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

impl<T: SyncEventSink + ?Sized> SyncEventSink for std::sync::Arc<T> {
    fn record(&self, event: &SyncEvent) {
        (**self).record(event);
    }
}
