use std::env;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rill_core::models::{Article, ArticleId, FailedQueueEntry, SyncRun};
use rill_core::sync::ReaderApiClient;
use rill_core::{DatabaseService, SyncEngine};
use serde::Serialize;

use crate::auth::CliCredentials;
use crate::config_file::CliConfig;
use crate::error::CliError;

pub type CliEngine = SyncEngine<ReaderApiClient, CliCredentials>;

/// Everything a command needs, resolved once from flags, env and config file
pub struct Context {
    pub db_path: PathBuf,
    pub config_path: PathBuf,
    pub config: CliConfig,
}

impl Context {
    pub async fn open_store(&self) -> Result<DatabaseService, CliError> {
        Ok(DatabaseService::open_path(self.db_path.clone()).await?)
    }

    /// Store plus engine wired to the reader API; fails when no credentials exist
    pub async fn open_engine(&self) -> Result<CliEngine, CliError> {
        let credentials =
            CliCredentials::resolve(&self.config.remote, env::var("RILL_ACCESS_TOKEN").ok())?;
        tracing::debug!("Using credentials from {}", credentials.source());

        let remote = &self.config.remote;
        let api = ReaderApiClient::new(
            remote.base_url.clone(),
            remote.app_id.clone(),
            remote.app_key.clone(),
        )?;
        let store = self.open_store().await?;
        Ok(SyncEngine::builder(store, api, credentials)
            .settings(self.config.sync.clone())
            .build()?)
    }
}

#[derive(Debug, Serialize)]
pub struct ArticleListItem {
    pub id: i64,
    pub remote_id: String,
    pub feed_id: String,
    pub title: String,
    pub url: Option<String>,
    pub published_at: i64,
    pub relative_time: String,
    pub is_read: bool,
    pub is_starred: bool,
    pub pending_local_change: bool,
}

pub fn article_to_list_item(article: &Article, now_ms: i64) -> ArticleListItem {
    ArticleListItem {
        id: article.id.get(),
        remote_id: article.remote_id.clone(),
        feed_id: article.feed_id.clone(),
        title: article.title.clone(),
        url: article.url.clone(),
        published_at: article.published_at,
        relative_time: format_relative_time(article.published_at, now_ms),
        is_read: article.is_read,
        is_starred: article.is_starred,
        pending_local_change: article.local_update_ts.is_some(),
    }
}

pub fn format_article_lines(articles: &[Article], now_ms: i64) -> Vec<String> {
    articles
        .iter()
        .map(|article| {
            let read = if article.is_read { ' ' } else { '*' };
            let star = if article.is_starred { '★' } else { ' ' };
            let title = truncate(&article.title, 50);
            let relative_time = format_relative_time(article.published_at, now_ms);
            format!(
                "{:>6}  {read}{star}  {title:<50}  {relative_time}",
                article.id
            )
        })
        .collect()
}

pub fn format_failed_lines(entries: &[FailedQueueEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            format!(
                "{}  {:<6}  article={}  attempts={}  {}",
                format_timestamp(entry.failed_at),
                entry.action_type,
                entry.article_id,
                entry.attempt_count,
                entry.last_error.as_deref().unwrap_or("-")
            )
        })
        .collect()
}

pub fn format_run_summary(run: &SyncRun) -> String {
    let mode = run.mode.map_or("-", |mode| mode.as_str());
    let counts = &run.counts;
    let mut summary = format!(
        "Sync {:?} ({mode}): pushed={} fetched={} new={} updated={} conflicts={} failed={}",
        run.status,
        counts.pushed,
        counts.fetched,
        counts.new,
        counts.updated,
        counts.conflicts,
        counts.failed
    );
    if let Some(error) = &run.error {
        summary.push_str(&format!("\n  {}: {}", error.kind, error.message));
    }
    summary
}

pub fn truncate(value: &str, max_chars: usize) -> String {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let mut truncated = collapsed
            .chars()
            .take(max_chars.saturating_sub(3))
            .collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn parse_article_ids(raw: &[String]) -> Result<Vec<ArticleId>, CliError> {
    if raw.is_empty() {
        return Err(CliError::NoArticleIds);
    }
    raw.iter()
        .map(|value| {
            value
                .parse::<ArticleId>()
                .map_err(|_| CliError::InvalidArticleId(value.clone()))
        })
        .collect()
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    match cli_db_path.or_else(|| env::var_os("RILL_DB_PATH").map(PathBuf::from)) {
        Some(path) => Ok(path),
        None => default_db_path(),
    }
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("rill").join("rill.db"))
        .ok_or_else(|| CliError::Config("Failed to resolve data directory".to_string()))
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn display_path(path: &Path) -> String {
    path.display().to_string()
}
