//! Sync engine: the entry point the presentation layer talks to.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::config::SyncSettings;
use crate::models::{
    ActionType, Article, ArticleId, EnqueueOutcome, FailedQueueEntry, MarkAllScope, SyncRun,
    SyncRunId, SyncRunStatus, SyncTrigger, UnreadCount,
};
use crate::services::{DatabaseService, LocalMarkAll};
use crate::state::SyncPhase;
use crate::sync::client::{QuotaStatus, RemoteSyncClient};
use crate::sync::clock::{Clock, SystemClock};
use crate::sync::dispatcher::BatchDispatcher;
use crate::sync::error::{SyncError, SyncResult};
use crate::sync::events::{SyncEvent, SyncEventSink, TracingEventSink};
use crate::sync::orchestrator::{PhaseTracker, SyncOrchestrator};
use crate::sync::remote::{CredentialProvider, RemoteApi};
use crate::sync::scheduler::{evaluate_gate, GateDecision};

/// Runs kept for status queries
pub const RUN_HISTORY: usize = 64;

/// Assembles a [`SyncEngine`]
pub struct SyncEngineBuilder<A, C> {
    store: DatabaseService,
    api: A,
    credentials: C,
    settings: SyncSettings,
    clock: Arc<dyn Clock>,
    events: Arc<dyn SyncEventSink>,
}

impl<A: RemoteApi, C: CredentialProvider> SyncEngineBuilder<A, C> {
    #[must_use]
    pub fn settings(mut self, settings: SyncSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn events(mut self, events: Arc<dyn SyncEventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn build(self) -> crate::Result<SyncEngine<A, C>> {
        self.settings.validate()?;
        let client = RemoteSyncClient::new(
            self.api,
            self.credentials,
            self.store.clone(),
            Arc::clone(&self.clock),
            Arc::clone(&self.events),
            self.settings.daily_call_limit,
        );

        Ok(SyncEngine {
            store: self.store,
            client,
            settings: self.settings,
            clock: self.clock,
            events: self.events,
            in_flight: Mutex::new(None),
            runs: Mutex::new(VecDeque::with_capacity(RUN_HISTORY)),
            phase: Mutex::new(SyncPhase::Idle),
        })
    }
}

/// Owns the store handle, the remote client and the run registry.
///
/// At most one cycle runs at a time; a trigger that arrives while one is in
/// flight returns the in-flight run id without starting anything.
pub struct SyncEngine<A, C> {
    store: DatabaseService,
    client: RemoteSyncClient<A, C>,
    settings: SyncSettings,
    clock: Arc<dyn Clock>,
    events: Arc<dyn SyncEventSink>,
    in_flight: Mutex<Option<SyncRunId>>,
    runs: Mutex<VecDeque<SyncRun>>,
    phase: Mutex<SyncPhase>,
}

/// Releases the in-flight slot when the cycle ends, however it ends
struct InFlightGuard<'a>(&'a Mutex<Option<SyncRunId>>);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = None;
        }
    }
}

enum CycleOutcome {
    Skipped(&'static str),
    Finished(SyncResult<()>),
}

impl<A: RemoteApi, C: CredentialProvider> SyncEngine<A, C> {
    pub fn builder(store: DatabaseService, api: A, credentials: C) -> SyncEngineBuilder<A, C> {
        SyncEngineBuilder {
            store,
            api,
            credentials,
            settings: SyncSettings::default(),
            clock: Arc::new(SystemClock),
            events: Arc::new(TracingEventSink),
        }
    }

    pub const fn store(&self) -> &DatabaseService {
        &self.store
    }

    pub const fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub const fn client(&self) -> &RemoteSyncClient<A, C> {
        &self.client
    }

    pub fn current_phase(&self) -> SyncPhase {
        self.phase.lock().map(|phase| *phase).unwrap_or_default()
    }

    /// Start a cycle, or report the one already running.
    ///
    /// Scheduled triggers pass through the gate and may produce a skipped run.
    pub async fn trigger_sync(&self, trigger: SyncTrigger) -> SyncResult<SyncRunId> {
        let mut run = SyncRun::start(trigger, self.clock.now_ms());

        if let Some(in_flight) = self.claim(run.id) {
            self.events
                .record(&SyncEvent::RunCoalesced { in_flight, trigger });
            return Ok(in_flight);
        }
        let _slot = InFlightGuard(&self.in_flight);
        self.remember(&run);

        match self.execute(&mut run).await {
            CycleOutcome::Skipped(reason) => {
                run.skip(self.clock.now_ms());
                self.events.record(&SyncEvent::RunSkipped {
                    run_id: run.id,
                    reason,
                });
            }
            CycleOutcome::Finished(Ok(())) => run.complete(self.clock.now_ms()),
            CycleOutcome::Finished(Err(error)) => {
                run.fail(error.kind(), error.to_string(), self.clock.now_ms());
            }
        }

        self.remember(&run);
        if run.status != SyncRunStatus::Skipped {
            self.events.record(&SyncEvent::RunFinished { run: run.clone() });
        }
        Ok(run.id)
    }

    async fn execute(&self, run: &mut SyncRun) -> CycleOutcome {
        if run.trigger == SyncTrigger::Scheduled {
            match self.scheduled_skip_reason(run.started_at).await {
                Ok(Some(reason)) => return CycleOutcome::Skipped(reason),
                Ok(None) => {}
                Err(error) => return CycleOutcome::Finished(Err(error)),
            }
        }

        self.events.record(&SyncEvent::RunStarted {
            run_id: run.id,
            trigger: run.trigger,
        });
        let orchestrator = SyncOrchestrator::new(
            &self.client,
            &self.store,
            &self.settings,
            self.events.as_ref(),
            self.clock.as_ref(),
            &self.phase,
        );
        let timeout = self.settings.run_timeout();
        let outcome = tokio::time::timeout(timeout, orchestrator.run_cycle(run)).await;
        match outcome {
            Ok(result) => CycleOutcome::Finished(result),
            Err(_) => {
                PhaseTracker::new(run.id, &self.phase, self.events.as_ref()).fail();
                CycleOutcome::Finished(Err(SyncError::Timeout(format!(
                    "sync cycle exceeded {}s",
                    timeout.as_secs()
                ))))
            }
        }
    }

    async fn scheduled_skip_reason(&self, now: i64) -> SyncResult<Option<&'static str>> {
        if self.client.quota_status().await?.is_exhausted() {
            return Ok(Some("daily quota exhausted"));
        }
        match evaluate_gate(&self.store, &self.settings, now).await? {
            GateDecision::Run(reason) => {
                tracing::debug!(?reason, "scheduled sync gate open");
                Ok(None)
            }
            GateDecision::Skip => Ok(Some("nothing to sync")),
        }
    }

    fn claim(&self, run_id: SyncRunId) -> Option<SyncRunId> {
        let Ok(mut slot) = self.in_flight.lock() else {
            return None;
        };
        match *slot {
            Some(in_flight) => Some(in_flight),
            None => {
                *slot = Some(run_id);
                None
            }
        }
    }

    fn remember(&self, run: &SyncRun) {
        let Ok(mut runs) = self.runs.lock() else {
            return;
        };
        if let Some(existing) = runs.iter_mut().find(|existing| existing.id == run.id) {
            *existing = run.clone();
            return;
        }
        if runs.len() == RUN_HISTORY {
            runs.pop_front();
        }
        runs.push_back(run.clone());
    }

    pub fn sync_run_status(&self, id: SyncRunId) -> Option<SyncRun> {
        self.runs
            .lock()
            .ok()?
            .iter()
            .find(|run| run.id == id)
            .cloned()
    }

    /// Most recent runs, newest first
    pub fn recent_runs(&self, limit: usize) -> Vec<SyncRun> {
        self.runs
            .lock()
            .map(|runs| runs.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// Apply a user action locally and queue it for the next push
    pub async fn enqueue_local_change(
        &self,
        article_id: ArticleId,
        action: ActionType,
    ) -> SyncResult<(Article, EnqueueOutcome)> {
        Ok(self
            .store
            .record_local_change(article_id, action, self.clock.now_ms())
            .await?)
    }

    pub async fn mark_all_as_read(&self, scope: &MarkAllScope) -> SyncResult<LocalMarkAll> {
        let dispatcher = BatchDispatcher::new(
            &self.client,
            &self.store,
            self.settings.retry_policy(),
            self.events.as_ref(),
            self.clock.as_ref(),
            self.settings.batch_size,
            self.settings.max_drain,
        );
        dispatcher.mark_all_as_read(scope).await
    }

    pub async fn list_failed(&self, limit: usize) -> SyncResult<Vec<FailedQueueEntry>> {
        Ok(self.store.list_failed(limit).await?)
    }

    /// Put dead-lettered entries back into the live queue
    pub async fn requeue_failed(&self) -> SyncResult<u32> {
        let requeued = self.store.requeue_failed(self.clock.now_ms()).await?;
        tracing::info!("Requeued {requeued} dead-lettered changes");
        Ok(requeued)
    }

    pub async fn remote_unread_counts(&self) -> SyncResult<Vec<UnreadCount>> {
        self.client.unread_counts().await
    }

    pub async fn quota_status(&self) -> SyncResult<QuotaStatus> {
        self.client.quota_status().await
    }
}
