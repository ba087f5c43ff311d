use rill_core::models::{ActionType, EnqueueOutcome, MarkAllScope};

use crate::commands::common::{
    article_to_list_item, format_article_lines, now_ms, parse_article_ids, print_json,
    ArticleListItem, Context,
};
use crate::error::CliError;

pub async fn run_list(
    context: &Context,
    limit: usize,
    unread_only: bool,
    as_json: bool,
) -> Result<(), CliError> {
    let store = context.open_store().await?;
    let articles = store.list_articles(limit, 0, unread_only).await?;
    let now = now_ms();

    if as_json {
        let items = articles
            .iter()
            .map(|article| article_to_list_item(article, now))
            .collect::<Vec<ArticleListItem>>();
        return print_json(&items);
    }

    if articles.is_empty() {
        println!("No articles stored yet. Run `rill sync` first.");
        return Ok(());
    }
    for line in format_article_lines(&articles, now) {
        println!("{line}");
    }
    Ok(())
}

/// Apply `action` locally and queue it; works offline
pub async fn run_set_state(
    context: &Context,
    action: ActionType,
    raw_ids: &[String],
) -> Result<(), CliError> {
    let ids = parse_article_ids(raw_ids)?;
    let store = context.open_store().await?;

    for id in ids {
        if store.get_article(id).await?.is_none() {
            return Err(CliError::ArticleNotFound(id.to_string()));
        }
        let (article, outcome) = store.record_local_change(id, action, now_ms()).await?;
        let effect = match outcome {
            EnqueueOutcome::Inserted(_) => "queued",
            EnqueueOutcome::Replaced(_) => "replaced pending change",
            EnqueueOutcome::Cancelled => "cancelled pending change",
        };
        println!("{action} {} ({effect}): {}", article.id, article.title);
    }
    Ok(())
}

pub fn scope_from_flags(feed: Option<String>, folder: Option<String>) -> MarkAllScope {
    match (feed, folder) {
        (Some(feed), _) => MarkAllScope::Feed(feed),
        (None, Some(folder)) => MarkAllScope::Folder(folder),
        (None, None) => MarkAllScope::Global,
    }
}

pub async fn run_mark_all_read(
    context: &Context,
    feed: Option<String>,
    folder: Option<String>,
) -> Result<(), CliError> {
    let scope = scope_from_flags(feed, folder);
    let engine = context.open_engine().await?;
    let result = engine.mark_all_as_read(&scope).await?;

    println!(
        "Marked {} articles read; dropped {} pending read changes",
        result.articles_marked, result.entries_superseded
    );
    Ok(())
}
