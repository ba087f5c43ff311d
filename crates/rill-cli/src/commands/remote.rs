use rill_core::sync::QuotaStatus;

use crate::commands::common::{format_timestamp, now_ms, print_json, Context};
use crate::error::CliError;

pub async fn run_unread_counts(context: &Context, as_json: bool) -> Result<(), CliError> {
    let engine = context.open_engine().await?;
    let counts = engine.remote_unread_counts().await?;

    if as_json {
        return print_json(&counts);
    }
    for count in counts {
        println!("{:>6}  {}", count.count, count.stream_id);
    }
    Ok(())
}

pub async fn run_quota(context: &Context) -> Result<(), CliError> {
    let store = context.open_store().await?;
    let metadata = store.load_metadata().await?;
    let quota =
        QuotaStatus::from_metadata(&metadata, context.config.sync.daily_call_limit, now_ms());
    println!(
        "{}/{} remote calls used, {} remaining (resets {})",
        quota.used,
        quota.limit,
        quota.remaining(),
        format_timestamp(quota.resets_at)
    );
    Ok(())
}

pub async fn run_feeds(context: &Context, as_json: bool) -> Result<(), CliError> {
    let store = context.open_store().await?;
    let feeds = store.list_feeds().await?;

    if as_json {
        return print_json(&feeds);
    }
    if feeds.is_empty() {
        println!("No feeds known yet. A full sync lists them.");
        return Ok(());
    }
    for feed in feeds {
        let folder = feed.folder.as_deref().unwrap_or("-");
        println!("{folder:<16}  {:<40}  {}", feed.title, feed.stream_id);
    }
    Ok(())
}
