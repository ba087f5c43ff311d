//! Sync scheduler: the periodic gate and the loop that drives it.

use std::future::Future;

use tokio::time::MissedTickBehavior;

use crate::config::SyncSettings;
use crate::models::{SyncRunId, SyncTrigger};
use crate::services::DatabaseService;
use crate::sync::clock::duration_ms;
use crate::sync::engine::SyncEngine;
use crate::sync::error::SyncResult;
use crate::sync::remote::{CredentialProvider, RemoteApi};
use crate::Result;

/// Why a scheduled cycle is worth running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunReason {
    EnoughChanges(u64),
    RetryDue,
    StaleChange,
    FullSyncDue,
    PullOverdue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Run(RunReason),
    Skip,
}

/// Decide whether a scheduled tick should run a cycle.
///
/// Manual triggers never consult the gate.
pub async fn evaluate_gate(
    store: &DatabaseService,
    settings: &SyncSettings,
    now: i64,
) -> Result<GateDecision> {
    let pending = store.queue_len().await?;
    if pending >= settings.min_changes {
        return Ok(GateDecision::Run(RunReason::EnoughChanges(pending)));
    }

    if store.has_due_retry(now, &settings.retry_policy()).await? {
        return Ok(GateDecision::Run(RunReason::RetryDue));
    }

    if let Some(oldest) = store.oldest_queued_at().await? {
        if now.saturating_sub(oldest) >= duration_ms(settings.stale_age()) {
            return Ok(GateDecision::Run(RunReason::StaleChange));
        }
    }

    let metadata = store.load_metadata().await?;
    let full_due = metadata.last_full_sync_ts.is_none_or(|last| {
        now.saturating_sub(last) >= duration_ms(settings.full_sync_interval())
    });
    if full_due {
        return Ok(GateDecision::Run(RunReason::FullSyncDue));
    }

    let pull_overdue = metadata.last_incremental_sync_ts.is_none_or(|last| {
        now.saturating_sub(last) >= duration_ms(settings.max_pull_age())
    });
    if pull_overdue || metadata.pull_continuation.is_some() {
        return Ok(GateDecision::Run(RunReason::PullOverdue));
    }

    Ok(GateDecision::Skip)
}

/// Drives scheduled triggers against an engine
pub struct SyncScheduler<'a, A, C> {
    engine: &'a SyncEngine<A, C>,
}

impl<'a, A: RemoteApi, C: CredentialProvider> SyncScheduler<'a, A, C> {
    pub const fn new(engine: &'a SyncEngine<A, C>) -> Self {
        Self { engine }
    }

    /// One scheduling decision
    pub async fn tick(&self) -> SyncResult<SyncRunId> {
        self.engine.trigger_sync(SyncTrigger::Scheduled).await
    }

    /// Tick every `sync_interval` until `shutdown` resolves
    pub async fn run<F: Future<Output = ()>>(&self, shutdown: F) {
        let period = self.engine.settings().sync_interval();
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!("Sync scheduler started (every {}s)", period.as_secs());
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = interval.tick() => {
                    if let Err(error) = self.tick().await {
                        tracing::error!("Scheduled sync failed: {error}");
                    }
                }
            }
        }
        tracing::info!("Sync scheduler stopped");
    }
}
