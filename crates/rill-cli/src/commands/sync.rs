use rill_core::db::SyncMetadata;
use rill_core::models::{SyncRunStatus, SyncTrigger};
use rill_core::sync::{QuotaStatus, SyncScheduler};
use serde::Serialize;

use crate::commands::common::{
    format_run_summary, format_timestamp, now_ms, print_json, Context,
};
use crate::error::CliError;

pub async fn run_sync(context: &Context, as_json: bool) -> Result<(), CliError> {
    let engine = context.open_engine().await?;
    let run_id = engine.trigger_sync(SyncTrigger::Manual).await?;

    let Some(run) = engine.sync_run_status(run_id) else {
        return Err(CliError::Config(format!("sync run {run_id} was not recorded")));
    };

    if as_json {
        print_json(&run)?;
    } else {
        println!("{}", format_run_summary(&run));
    }

    match (run.status, run.error) {
        (SyncRunStatus::Failed, Some(error)) => Err(CliError::RunFailed {
            kind: error.kind,
            message: error.message,
        }),
        _ => Ok(()),
    }
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub last_incremental_sync_ts: Option<i64>,
    pub last_full_sync_ts: Option<i64>,
    pub pull_resume_pending: bool,
    pub queued_changes: u64,
    pub oldest_queued_at: Option<i64>,
    pub failed_changes: usize,
    pub quota: QuotaStatus,
}

impl StatusReport {
    pub fn from_parts(
        metadata: &SyncMetadata,
        queued_changes: u64,
        oldest_queued_at: Option<i64>,
        failed_changes: usize,
        daily_call_limit: u32,
        now: i64,
    ) -> Self {
        Self {
            last_incremental_sync_ts: metadata.last_incremental_sync_ts,
            last_full_sync_ts: metadata.last_full_sync_ts,
            pull_resume_pending: metadata.pull_continuation.is_some(),
            queued_changes,
            oldest_queued_at,
            failed_changes,
            quota: QuotaStatus::from_metadata(metadata, daily_call_limit, now),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        let stamp = |value: Option<i64>| value.map_or_else(|| "never".to_string(), format_timestamp);
        let mut lines = vec![
            format!("Last incremental sync: {}", stamp(self.last_incremental_sync_ts)),
            format!("Last full sync:        {}", stamp(self.last_full_sync_ts)),
            format!("Queued changes:        {}", self.queued_changes),
            format!("Failed changes:        {}", self.failed_changes),
            format!(
                "Remote calls today:    {}/{} (resets {})",
                self.quota.used,
                self.quota.limit,
                format_timestamp(self.quota.resets_at)
            ),
        ];
        if let Some(oldest) = self.oldest_queued_at {
            lines.insert(3, format!("Oldest queued change:  {}", format_timestamp(oldest)));
        }
        if self.pull_resume_pending {
            lines.push("A capped pull will resume on the next sync".to_string());
        }
        lines
    }
}

/// Local view only; never calls the remote
pub async fn run_status(context: &Context, as_json: bool) -> Result<(), CliError> {
    const FAILED_SCAN_LIMIT: usize = 10_000;

    let store = context.open_store().await?;
    let metadata = store.load_metadata().await?;
    let report = StatusReport::from_parts(
        &metadata,
        store.queue_len().await?,
        store.oldest_queued_at().await?,
        store.list_failed(FAILED_SCAN_LIMIT).await?.len(),
        context.config.sync.daily_call_limit,
        now_ms(),
    );

    if as_json {
        return print_json(&report);
    }
    for line in report.lines() {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_daemon(context: &Context) -> Result<(), CliError> {
    let engine = context.open_engine().await?;
    println!(
        "Syncing every {}s against {} (Ctrl-C to stop)",
        context.config.sync.sync_interval_secs, context.config.remote.base_url
    );

    SyncScheduler::new(&engine)
        .run(async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {error}");
            }
        })
        .await;

    Ok(())
}
