use std::io;

use rill_core::models::SyncErrorKind;
use rill_core::sync::RemoteError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] rill_core::Error),
    #[error(transparent)]
    Sync(#[from] rill_core::SyncError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No article ids provided")]
    NoArticleIds,
    #[error("Invalid article id: {0}")]
    InvalidArticleId(String),
    #[error("Article not found: {0}")]
    ArticleNotFound(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Authentication error: {0}")]
    Auth(String),
    #[error("Sync failed ({kind}): {message}")]
    RunFailed {
        kind: SyncErrorKind,
        message: String,
    },
    #[error(
        "Sync is not configured. Set RILL_ACCESS_TOKEN, or configure token_endpoint/client_id and run `rill auth login`."
    )]
    SyncNotConfigured,
}
