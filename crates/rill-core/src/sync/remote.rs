//! Seams to the remote aggregator: the API itself and the credentials it needs.

use crate::models::{
    ActionType, BatchOutcome, MarkAllScope, PullPage, StreamQuery, Subscription, UnreadCount,
};
use crate::sync::error::{RemoteError, RemoteResult};

/// Raw remote aggregator operations. One method call is one API call.
#[allow(async_fn_in_trait)]
pub trait RemoteApi {
    /// Apply the tag change behind `action` to every id in one request
    async fn edit_tag(
        &self,
        token: &str,
        action: ActionType,
        remote_ids: &[String],
    ) -> RemoteResult<BatchOutcome>;

    /// Fetch one page of the reading list
    async fn stream_contents(&self, token: &str, query: &StreamQuery) -> RemoteResult<PullPage>;

    /// Mark everything in `scope` older than `older_than` (Unix ms) as read
    async fn mark_all_as_read(
        &self,
        token: &str,
        scope: &MarkAllScope,
        older_than: i64,
    ) -> RemoteResult<()>;

    async fn subscriptions(&self, token: &str) -> RemoteResult<Vec<Subscription>>;

    async fn unread_counts(&self, token: &str) -> RemoteResult<Vec<UnreadCount>>;
}

/// Source of bearer tokens for [`RemoteApi`] calls
#[allow(async_fn_in_trait)]
pub trait CredentialProvider {
    async fn access_token(&self) -> RemoteResult<String>;

    /// Obtain a fresh token after the remote reported the current one expired
    async fn refresh(&self) -> RemoteResult<String>;
}

/// A fixed token that cannot be refreshed
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_tuple("StaticToken").field(&"[REDACTED]").finish()
    }
}

impl CredentialProvider for StaticToken {
    async fn access_token(&self) -> RemoteResult<String> {
        Ok(self.0.clone())
    }

    async fn refresh(&self) -> RemoteResult<String> {
        Err(RemoteError::AuthExpired(
            "static access token cannot be refreshed".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_token_cannot_refresh() {
        let token = StaticToken::new("secret");
        assert_eq!(token.access_token().await.unwrap(), "secret");
        assert!(matches!(
            token.refresh().await,
            Err(RemoteError::AuthExpired(_))
        ));
        assert!(!format!("{token:?}").contains("secret"));
    }
}
