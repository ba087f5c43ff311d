//! Remote sync client: daily quota accounting and auth refresh around [`RemoteApi`].

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::db::SyncMetadata;
use crate::models::{
    ActionType, BatchOutcome, MarkAllScope, PullPage, StreamQuery, Subscription, UnreadCount,
};
use crate::services::DatabaseService;
use crate::sync::clock::Clock;
use crate::sync::error::{RemoteError, RemoteResult, SyncError, SyncResult};
use crate::sync::events::{SyncEvent, SyncEventSink};
use crate::sync::remote::{CredentialProvider, RemoteApi};

const DAY_MS: i64 = 86_400_000;

/// Next UTC midnight strictly after `now_ms`
#[must_use]
pub const fn next_utc_midnight(now_ms: i64) -> i64 {
    (now_ms.div_euclid(DAY_MS) + 1) * DAY_MS
}

/// Daily call counter as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaStatus {
    pub used: u32,
    pub limit: u32,
    /// Unix ms of the next reset
    pub resets_at: i64,
}

impl QuotaStatus {
    /// Read the stored counter, treating a passed reset time as a fresh day
    #[must_use]
    pub const fn from_metadata(metadata: &SyncMetadata, limit: u32, now: i64) -> Self {
        match metadata.call_count_reset_at {
            Some(resets_at) if now < resets_at => Self {
                used: metadata.daily_call_count,
                limit,
                resets_at,
            },
            _ => Self {
                used: 0,
                limit,
                resets_at: next_utc_midnight(now),
            },
        }
    }

    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.used)
    }

    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.used >= self.limit
    }
}

/// Every remote call goes through here. Calls are serialized, counted against
/// the daily quota and retried once after a credential refresh.
pub struct RemoteSyncClient<A, C> {
    api: A,
    credentials: C,
    store: DatabaseService,
    clock: Arc<dyn Clock>,
    events: Arc<dyn SyncEventSink>,
    daily_limit: u32,
    call_lock: Mutex<()>,
}

impl<A: RemoteApi, C: CredentialProvider> RemoteSyncClient<A, C> {
    pub fn new(
        api: A,
        credentials: C,
        store: DatabaseService,
        clock: Arc<dyn Clock>,
        events: Arc<dyn SyncEventSink>,
        daily_limit: u32,
    ) -> Self {
        Self {
            api,
            credentials,
            store,
            clock,
            events,
            daily_limit,
            call_lock: Mutex::new(()),
        }
    }

    pub const fn api(&self) -> &A {
        &self.api
    }

    /// Current quota window, rolled over if the reset time has passed
    pub async fn quota_status(&self) -> SyncResult<QuotaStatus> {
        let now = self.clock.now_ms();
        let metadata = self.store.load_metadata().await?;
        Ok(QuotaStatus::from_metadata(&metadata, self.daily_limit, now))
    }

    pub async fn send_action_batch(
        &self,
        action: ActionType,
        remote_ids: &[String],
    ) -> SyncResult<BatchOutcome> {
        self.call(move |token| async move { self.api.edit_tag(&token, action, remote_ids).await })
            .await
    }

    pub async fn pull_stream(&self, query: &StreamQuery) -> SyncResult<PullPage> {
        self.call(move |token| async move { self.api.stream_contents(&token, query).await })
            .await
    }

    pub async fn mark_all_as_read(&self, scope: &MarkAllScope, older_than: i64) -> SyncResult<()> {
        self.call(move |token| async move {
            self.api
                .mark_all_as_read(&token, scope, older_than)
                .await
        })
        .await
    }

    pub async fn subscriptions(&self) -> SyncResult<Vec<Subscription>> {
        self.call(move |token| async move { self.api.subscriptions(&token).await })
            .await
    }

    pub async fn unread_counts(&self) -> SyncResult<Vec<UnreadCount>> {
        self.call(move |token| async move { self.api.unread_counts(&token).await })
            .await
    }

    async fn call<T, F, Fut>(&self, operation: F) -> SyncResult<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        let _serialized = self.call_lock.lock().await;

        let quota = self.quota_status().await?;
        if quota.is_exhausted() {
            self.events.record(&SyncEvent::QuotaExhausted {
                used: quota.used,
                limit: quota.limit,
                resets_at: quota.resets_at,
            });
            return Err(SyncError::RateLimit {
                resets_at: Some(quota.resets_at),
            });
        }

        let token = self.credentials.access_token().await?;
        let result = match operation(token).await {
            Err(RemoteError::AuthExpired(reason)) => {
                tracing::info!("Remote rejected access token ({reason}); refreshing");
                let token = self.credentials.refresh().await?;
                self.events.record(&SyncEvent::CredentialsRefreshed);
                operation(token).await
            }
            other => other,
        };

        match result {
            Ok(value) => {
                self.store
                    .save_call_counter(quota.used.saturating_add(1), quota.resets_at)
                    .await?;
                Ok(value)
            }
            Err(RemoteError::RateLimited) => {
                // The remote's own counter is authoritative once it says no.
                self.store
                    .save_call_counter(quota.limit, quota.resets_at)
                    .await?;
                self.events.record(&SyncEvent::QuotaExhausted {
                    used: quota.limit,
                    limit: quota.limit,
                    resets_at: quota.resets_at,
                });
                Err(SyncError::RateLimit {
                    resets_at: Some(quota.resets_at),
                })
            }
            Err(error) => Err(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::clock::ManualClock;
    use crate::sync::events::MemoryEventSink;
    use crate::sync::remote::StaticToken;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Counts calls; the first `expire_first` calls fail with an expired token.
    #[derive(Default)]
    struct CountingApi {
        calls: AtomicU32,
        expire_first: u32,
        rate_limited: bool,
    }

    impl RemoteApi for CountingApi {
        async fn edit_tag(
            &self,
            _token: &str,
            _action: ActionType,
            _remote_ids: &[String],
        ) -> RemoteResult<BatchOutcome> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.expire_first {
                return Err(RemoteError::AuthExpired("401".to_string()));
            }
            if self.rate_limited {
                return Err(RemoteError::RateLimited);
            }
            Ok(BatchOutcome::default())
        }

        async fn stream_contents(&self, _token: &str, _query: &StreamQuery) -> RemoteResult<PullPage> {
            Ok(PullPage::default())
        }

        async fn mark_all_as_read(
            &self,
            _token: &str,
            _scope: &MarkAllScope,
            _older_than: i64,
        ) -> RemoteResult<()> {
            Ok(())
        }

        async fn subscriptions(&self, _token: &str) -> RemoteResult<Vec<Subscription>> {
            Ok(Vec::new())
        }

        async fn unread_counts(&self, _token: &str) -> RemoteResult<Vec<UnreadCount>> {
            Ok(Vec::new())
        }
    }

    struct Refreshable {
        refreshed: AtomicU32,
    }

    impl CredentialProvider for Refreshable {
        async fn access_token(&self) -> RemoteResult<String> {
            Ok("stale".to_string())
        }

        async fn refresh(&self) -> RemoteResult<String> {
            self.refreshed.fetch_add(1, Ordering::SeqCst);
            Ok("fresh".to_string())
        }
    }

    async fn client<C: CredentialProvider>(
        api: CountingApi,
        credentials: C,
        limit: u32,
        clock: Arc<ManualClock>,
    ) -> RemoteSyncClient<CountingApi, C> {
        let store = DatabaseService::open_in_memory().await.unwrap();
        RemoteSyncClient::new(
            api,
            credentials,
            store,
            clock,
            Arc::new(MemoryEventSink::default()),
            limit,
        )
    }

    fn ids() -> Vec<String> {
        vec!["a".to_string()]
    }

    #[test]
    fn next_utc_midnight_rolls_forward() {
        assert_eq!(next_utc_midnight(0), DAY_MS);
        assert_eq!(next_utc_midnight(DAY_MS - 1), DAY_MS);
        assert_eq!(next_utc_midnight(DAY_MS), 2 * DAY_MS);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn exhausted_quota_fails_without_calling_remote() {
        let clock = Arc::new(ManualClock::new(1_000));
        let client = client(CountingApi::default(), StaticToken::new("t"), 2, clock).await;

        client.send_action_batch(ActionType::Read, &ids()).await.unwrap();
        client.send_action_batch(ActionType::Read, &ids()).await.unwrap();
        let third = client.send_action_batch(ActionType::Read, &ids()).await;

        assert!(matches!(third, Err(SyncError::RateLimit { .. })));
        assert_eq!(client.api().calls.load(Ordering::SeqCst), 2);
        assert_eq!(client.quota_status().await.unwrap().used, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn quota_resets_at_next_utc_midnight() {
        let clock = Arc::new(ManualClock::new(1_000));
        let client = client(CountingApi::default(), StaticToken::new("t"), 1, clock.clone()).await;

        client.send_action_batch(ActionType::Read, &ids()).await.unwrap();
        assert!(client.quota_status().await.unwrap().is_exhausted());

        clock.set(DAY_MS);
        let status = client.quota_status().await.unwrap();
        assert_eq!(status.used, 0);
        assert_eq!(status.resets_at, 2 * DAY_MS);
        client.send_action_batch(ActionType::Read, &ids()).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn expired_token_is_refreshed_once() {
        let clock = Arc::new(ManualClock::new(1_000));
        let api = CountingApi {
            expire_first: 1,
            ..CountingApi::default()
        };
        let credentials = Refreshable {
            refreshed: AtomicU32::new(0),
        };
        let client = client(api, credentials, 10, clock).await;

        client.send_action_batch(ActionType::Star, &ids()).await.unwrap();

        assert_eq!(client.credentials.refreshed.load(Ordering::SeqCst), 1);
        assert_eq!(client.api().calls.load(Ordering::SeqCst), 2);
        assert_eq!(client.quota_status().await.unwrap().used, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn second_auth_failure_is_fatal() {
        let clock = Arc::new(ManualClock::new(1_000));
        let api = CountingApi {
            expire_first: 2,
            ..CountingApi::default()
        };
        let credentials = Refreshable {
            refreshed: AtomicU32::new(0),
        };
        let client = client(api, credentials, 10, clock).await;

        let result = client.send_action_batch(ActionType::Star, &ids()).await;

        assert!(matches!(result, Err(SyncError::AuthExpired(_))));
        assert_eq!(client.quota_status().await.unwrap().used, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remote_rate_limit_exhausts_local_counter() {
        let clock = Arc::new(ManualClock::new(1_000));
        let api = CountingApi {
            rate_limited: true,
            ..CountingApi::default()
        };
        let client = client(api, StaticToken::new("t"), 50, clock).await;

        let result = client.send_action_batch(ActionType::Read, &ids()).await;

        assert!(matches!(result, Err(SyncError::RateLimit { .. })));
        assert!(client.quota_status().await.unwrap().is_exhausted());
    }
}
