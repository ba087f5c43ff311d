//! Sync orchestrator: one push-then-pull cycle.

use std::sync::Mutex;

use crate::config::SyncSettings;
use crate::db::SyncMetadata;
use crate::models::{StreamQuery, SyncMode, SyncRun, SyncRunId};
use crate::services::DatabaseService;
use crate::state::SyncPhase;
use crate::sync::client::RemoteSyncClient;
use crate::sync::clock::{duration_ms, Clock};
use crate::sync::dispatcher::BatchDispatcher;
use crate::sync::error::SyncResult;
use crate::sync::events::{SyncEvent, SyncEventSink};
use crate::sync::remote::{CredentialProvider, RemoteApi};
use crate::sync::resolver::ConflictResolver;

/// What the next pull should fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullPlan {
    pub mode: SyncMode,
    pub query: StreamQuery,
    /// Continuing a capped pull from a previous run
    pub resuming: bool,
}

/// Pick the pull mode and window from stored metadata
#[must_use]
pub fn plan_pull(metadata: &SyncMetadata, now: i64, settings: &SyncSettings) -> PullPlan {
    if let (Some(token), Some(mode)) = (
        metadata.pull_continuation.clone(),
        metadata.pull_continuation_mode,
    ) {
        return PullPlan {
            mode,
            query: query_for(mode, metadata, settings, Some(token)),
            resuming: true,
        };
    }

    let full_due = metadata.last_full_sync_ts.is_none_or(|last| {
        now.saturating_sub(last) >= duration_ms(settings.full_sync_interval())
    });
    let mode = if full_due {
        SyncMode::Full
    } else {
        SyncMode::Incremental
    };

    PullPlan {
        mode,
        query: query_for(mode, metadata, settings, None),
        resuming: false,
    }
}

fn query_for(
    mode: SyncMode,
    metadata: &SyncMetadata,
    settings: &SyncSettings,
    continuation: Option<String>,
) -> StreamQuery {
    match mode {
        SyncMode::Full => StreamQuery {
            newer_than: None,
            exclude_read: false,
            max_items: settings.pull_page_size,
            continuation,
        },
        SyncMode::Incremental => StreamQuery {
            newer_than: metadata.last_incremental_sync_ts,
            exclude_read: true,
            max_items: settings.pull_page_size,
            continuation,
        },
    }
}

/// Tracks the orchestrator phase and reports each transition
pub struct PhaseTracker<'a> {
    run_id: SyncRunId,
    current: &'a Mutex<SyncPhase>,
    events: &'a dyn SyncEventSink,
}

impl<'a> PhaseTracker<'a> {
    pub const fn new(
        run_id: SyncRunId,
        current: &'a Mutex<SyncPhase>,
        events: &'a dyn SyncEventSink,
    ) -> Self {
        Self {
            run_id,
            current,
            events,
        }
    }

    pub fn enter(&self, next: SyncPhase) {
        let Ok(mut current) = self.current.lock() else {
            return;
        };
        let from = *current;
        if from == next {
            return;
        }
        if !from.can_transition_to(next) {
            tracing::warn!(
                run_id = %self.run_id,
                from = from.as_str(),
                to = next.as_str(),
                "unexpected sync phase transition"
            );
        }
        *current = next;
        drop(current);
        self.events.record(&SyncEvent::PhaseChanged {
            run_id: self.run_id,
            from,
            to: next,
        });
    }

    /// Record a failure and return to idle
    pub fn fail(&self) {
        self.enter(SyncPhase::Failed);
        self.enter(SyncPhase::Idle);
    }
}

pub struct SyncOrchestrator<'a, A, C> {
    client: &'a RemoteSyncClient<A, C>,
    store: &'a DatabaseService,
    settings: &'a SyncSettings,
    events: &'a dyn SyncEventSink,
    clock: &'a dyn Clock,
    phase: &'a Mutex<SyncPhase>,
}

impl<'a, A: RemoteApi, C: CredentialProvider> SyncOrchestrator<'a, A, C> {
    pub const fn new(
        client: &'a RemoteSyncClient<A, C>,
        store: &'a DatabaseService,
        settings: &'a SyncSettings,
        events: &'a dyn SyncEventSink,
        clock: &'a dyn Clock,
        phase: &'a Mutex<SyncPhase>,
    ) -> Self {
        Self {
            client,
            store,
            settings,
            events,
            clock,
            phase,
        }
    }

    /// Push pending changes, then pull and reconcile.
    ///
    /// Counts are written into `run` as the cycle progresses so a timeout
    /// still leaves an accurate partial record.
    pub async fn run_cycle(&self, run: &mut SyncRun) -> SyncResult<()> {
        let dispatcher = BatchDispatcher::new(
            self.client,
            self.store,
            self.settings.retry_policy(),
            self.events,
            self.clock,
            self.settings.batch_size,
            self.settings.max_drain,
        );
        let report = dispatcher.dispatch().await?;
        run.counts.pushed += report.pushed;
        run.counts.failed += report.failed;
        if let Some(error) = report.halted {
            return Err(error);
        }

        let tracker = PhaseTracker::new(run.id, self.phase, self.events);
        let push_clean = report.last_error.is_none();
        match self.pull(run, &tracker, push_clean).await {
            Ok(()) => {
                tracker.enter(SyncPhase::Idle);
                report.last_error.map_or(Ok(()), Err)
            }
            Err(error) => {
                tracker.fail();
                Err(error)
            }
        }
    }

    async fn pull(
        &self,
        run: &mut SyncRun,
        tracker: &PhaseTracker<'_>,
        advance_watermarks: bool,
    ) -> SyncResult<()> {
        tracker.enter(SyncPhase::DeterminingMode);
        let metadata = self.store.load_metadata().await?;
        let plan = plan_pull(&metadata, self.clock.now_ms(), self.settings);
        run.mode = Some(plan.mode);
        self.events.record(&SyncEvent::ModeSelected {
            run_id: run.id,
            mode: plan.mode,
            newer_than: plan.query.newer_than,
            resuming: plan.resuming,
        });

        tracker.enter(SyncPhase::Pulling);
        if plan.mode == SyncMode::Full && !plan.resuming {
            let subscriptions = self.client.subscriptions().await?;
            self.store.replace_feeds(&subscriptions).await?;
        }
        let page = self.client.pull_stream(&plan.query).await?;
        run.counts.fetched += u32::try_from(page.items.len()).unwrap_or(u32::MAX);

        tracker.enter(SyncPhase::Reconciling);
        let echoes = self.store.remove_reflected_entries(&page.items).await?;
        if !echoes.is_empty() {
            self.events.record(&SyncEvent::EchoesCleared {
                run_id: run.id,
                entries: echoes.len(),
            });
        }
        let tally = ConflictResolver::new(self.store, self.events)
            .reconcile(run.id, &page.items, metadata.conflict_watermark())
            .await?;
        run.counts.new += tally.new;
        run.counts.updated += tally.updated;
        run.counts.conflicts += tally.conflicts;

        tracker.enter(SyncPhase::UpdatingWatermarks);
        match page.continuation {
            Some(token) => {
                self.store.save_continuation(plan.mode, &token).await?;
            }
            None if advance_watermarks => {
                self.store
                    .commit_watermarks(plan.mode, run.started_at)
                    .await?;
            }
            None => {
                tracing::debug!(run_id = %run.id, "push failures this run; watermarks held");
            }
        }

        Ok(())
    }
}
