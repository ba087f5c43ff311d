use crate::commands::common::{format_failed_lines, now_ms, print_json, Context};
use crate::error::CliError;

pub async fn run_failed(context: &Context, limit: usize, as_json: bool) -> Result<(), CliError> {
    let store = context.open_store().await?;
    let entries = store.list_failed(limit).await?;

    if as_json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("No failed changes.");
        return Ok(());
    }
    for line in format_failed_lines(&entries) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_requeue(context: &Context) -> Result<(), CliError> {
    let store = context.open_store().await?;
    let requeued = store.requeue_failed(now_ms()).await?;
    println!("Requeued {requeued} failed changes");
    Ok(())
}
