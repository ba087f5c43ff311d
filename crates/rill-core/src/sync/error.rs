//! Error types for remote calls and sync cycles

use thiserror::Error;

use crate::models::SyncErrorKind;

/// Failure reported by a [`RemoteApi`](crate::sync::RemoteApi) implementation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Remote rate limit reached")]
    RateLimited,
    #[error("Network error: {0}")]
    Network(String),
    #[error("Remote request timed out")]
    Timeout,
    #[error("Remote credentials expired: {0}")]
    AuthExpired(String),
    #[error("Remote API error: {message} ({status})")]
    Api { status: u16, message: String },
    #[error("Invalid remote payload: {0}")]
    InvalidPayload(String),
    #[error("Invalid remote configuration: {0}")]
    InvalidConfiguration(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_decode() {
            Self::InvalidPayload(error.to_string())
        } else {
            Self::Network(error.to_string())
        }
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Failure of a sync operation, classified by [`SyncErrorKind`]
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Daily remote call quota exhausted")]
    RateLimit { resets_at: Option<i64> },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Authentication expired: {0}")]
    AuthExpired(String),
    #[error("Remote rejected {} of {total} items", rejected.len())]
    PartialFailure { rejected: Vec<String>, total: usize },
    #[error("Remote API error: {0}")]
    RemoteApi(String),
    #[error(transparent)]
    Store(#[from] crate::Error),
}

impl SyncError {
    #[must_use]
    pub const fn kind(&self) -> SyncErrorKind {
        match self {
            Self::RateLimit { .. } => SyncErrorKind::RateLimit,
            Self::Network(_) => SyncErrorKind::NetworkError,
            Self::Timeout(_) => SyncErrorKind::Timeout,
            Self::AuthExpired(_) => SyncErrorKind::AuthExpired,
            Self::PartialFailure { .. } => SyncErrorKind::PartialFailure,
            Self::RemoteApi(_) => SyncErrorKind::RemoteApi,
            Self::Store(_) => SyncErrorKind::Store,
        }
    }

    /// Whether the cycle must stop instead of moving on to the next batch
    #[must_use]
    pub const fn halts_cycle(&self) -> bool {
        matches!(
            self,
            Self::RateLimit { .. } | Self::AuthExpired(_) | Self::Store(_)
        )
    }
}

impl From<RemoteError> for SyncError {
    fn from(error: RemoteError) -> Self {
        match error {
            RemoteError::RateLimited => Self::RateLimit { resets_at: None },
            RemoteError::Network(message) => Self::Network(message),
            RemoteError::Timeout => Self::Timeout("remote request".to_string()),
            RemoteError::AuthExpired(message) => Self::AuthExpired(message),
            error @ (RemoteError::Api { .. }
            | RemoteError::InvalidPayload(_)
            | RemoteError::InvalidConfiguration(_)) => Self::RemoteApi(error.to_string()),
        }
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_errors_map_to_kinds() {
        let cases = [
            (RemoteError::RateLimited, SyncErrorKind::RateLimit),
            (
                RemoteError::Network("reset".to_string()),
                SyncErrorKind::NetworkError,
            ),
            (RemoteError::Timeout, SyncErrorKind::Timeout),
            (
                RemoteError::AuthExpired("401".to_string()),
                SyncErrorKind::AuthExpired,
            ),
            (
                RemoteError::Api {
                    status: 500,
                    message: "boom".to_string(),
                },
                SyncErrorKind::RemoteApi,
            ),
        ];
        for (remote, kind) in cases {
            assert_eq!(SyncError::from(remote).kind(), kind);
        }
    }

    #[test]
    fn only_quota_auth_and_store_failures_halt() {
        assert!(SyncError::RateLimit { resets_at: None }.halts_cycle());
        assert!(SyncError::AuthExpired("x".to_string()).halts_cycle());
        assert!(!SyncError::Network("x".to_string()).halts_cycle());
        assert!(!SyncError::Timeout("x".to_string()).halts_cycle());
    }

    #[test]
    fn partial_failure_message_counts_items() {
        let error = SyncError::PartialFailure {
            rejected: vec!["a".to_string()],
            total: 3,
        };
        assert_eq!(error.to_string(), "Remote rejected 1 of 3 items");
    }
}
