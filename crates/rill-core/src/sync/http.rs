//! Reader API client (Inoreader / Google Reader protocol) over reqwest.

use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use crate::models::{
    ActionType, BatchOutcome, MarkAllScope, PullPage, RemoteArticle, StreamQuery, Subscription,
    UnreadCount,
};
use crate::sync::error::{RemoteError, RemoteResult};
use crate::sync::remote::RemoteApi;
use crate::util::{compact_text, is_http_url, normalize_text_option};

pub const DEFAULT_BASE_URL: &str = "https://www.inoreader.com";
pub const READING_LIST: &str = "user/-/state/com.google/reading-list";
pub const READ_TAG: &str = "user/-/state/com.google/read";
pub const STARRED_TAG: &str = "user/-/state/com.google/starred";
const LABEL_PREFIX: &str = "user/-/label/";
const API_PATH: &str = "/reader/api/0";
const HTTP_TIMEOUT_SECS: u64 = 30;

/// HTTP implementation of [`RemoteApi`]
#[derive(Clone)]
pub struct ReaderApiClient {
    base_url: String,
    app_id: Option<String>,
    app_key: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for ReaderApiClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ReaderApiClient")
            .field("base_url", &self.base_url)
            .field("app_id", &self.app_id)
            .field("app_key", &self.app_key.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl ReaderApiClient {
    pub fn new(
        base_url: impl Into<String>,
        app_id: Option<String>,
        app_key: Option<String>,
    ) -> RemoteResult<Self> {
        let base_url = normalize_text_option(Some(base_url.into())).ok_or_else(|| {
            RemoteError::InvalidConfiguration("base URL must not be empty".to_string())
        })?;
        if !is_http_url(&base_url) {
            return Err(RemoteError::InvalidConfiguration(
                "base URL must include http:// or https://".to_string(),
            ));
        }

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            app_id: normalize_text_option(app_id),
            app_key: normalize_text_option(app_key),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
                .build()?,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{API_PATH}/{path}", self.base_url)
    }

    fn authorize(&self, request: RequestBuilder, token: &str) -> RequestBuilder {
        let mut request = request.bearer_auth(token);
        if let Some(app_id) = &self.app_id {
            request = request.header("AppId", app_id);
        }
        if let Some(app_key) = &self.app_key {
            request = request.header("AppKey", app_key);
        }
        request
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }
}

impl RemoteApi for ReaderApiClient {
    async fn edit_tag(
        &self,
        token: &str,
        action: ActionType,
        remote_ids: &[String],
    ) -> RemoteResult<BatchOutcome> {
        let (param, tag) = edit_tag_param(action);
        let mut form: Vec<(&str, &str)> = Vec::with_capacity(remote_ids.len() + 1);
        form.push((param, tag));
        form.extend(remote_ids.iter().map(|id| ("i", id.as_str())));

        let request = self.authorize(self.client.post(self.endpoint("edit-tag")), token);
        let body = self.send(request.form(&form)).await?.text().await?;
        if body.trim() == "OK" {
            Ok(BatchOutcome::default())
        } else {
            Err(RemoteError::InvalidPayload(format!(
                "edit-tag returned '{}'",
                compact_text(&body)
            )))
        }
    }

    async fn stream_contents(&self, token: &str, query: &StreamQuery) -> RemoteResult<PullPage> {
        let url = self.endpoint(&format!(
            "stream/contents/{}",
            urlencoding::encode(READING_LIST)
        ));
        let mut params: Vec<(&str, String)> = vec![
            ("n", query.max_items.to_string()),
            ("r", "o".to_string()),
        ];
        if let Some(newer_than) = query.newer_than {
            params.push(("ot", (newer_than / 1_000).to_string()));
        }
        if query.exclude_read {
            params.push(("xt", READ_TAG.to_string()));
        }
        if let Some(continuation) = &query.continuation {
            params.push(("c", continuation.clone()));
        }

        let request = self.authorize(self.client.get(url).query(&params), token);
        let body = self.send(request).await?.text().await?;
        parse_stream_page(&body)
    }

    async fn mark_all_as_read(
        &self,
        token: &str,
        scope: &MarkAllScope,
        older_than: i64,
    ) -> RemoteResult<()> {
        let form = [
            ("s", scope_stream_id(scope)),
            ("ts", older_than.saturating_mul(1_000).to_string()),
        ];
        let request = self.authorize(self.client.post(self.endpoint("mark-all-as-read")), token);
        self.send(request.form(&form)).await?;
        Ok(())
    }

    async fn subscriptions(&self, token: &str) -> RemoteResult<Vec<Subscription>> {
        let request = self.authorize(self.client.get(self.endpoint("subscription/list")), token);
        let body = self.send(request).await?.text().await?;
        parse_subscriptions(&body)
    }

    async fn unread_counts(&self, token: &str) -> RemoteResult<Vec<UnreadCount>> {
        let request = self.authorize(self.client.get(self.endpoint("unread-count")), token);
        let body = self.send(request).await?.text().await?;
        parse_unread_counts(&body)
    }
}

/// Form parameter and tag for an action: `a` adds a tag, `r` removes it
#[must_use]
pub const fn edit_tag_param(action: ActionType) -> (&'static str, &'static str) {
    match action {
        ActionType::Read => ("a", READ_TAG),
        ActionType::Unread => ("r", READ_TAG),
        ActionType::Star => ("a", STARRED_TAG),
        ActionType::Unstar => ("r", STARRED_TAG),
    }
}

#[must_use]
pub fn scope_stream_id(scope: &MarkAllScope) -> String {
    match scope {
        MarkAllScope::Feed(stream_id) => stream_id.clone(),
        MarkAllScope::Folder(label) => format!("{LABEL_PREFIX}{label}"),
        MarkAllScope::Global => READING_LIST.to_string(),
    }
}

fn classify_status(status: StatusCode, body: &str) -> RemoteError {
    let message = if compact_text(body).is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        compact_text(body)
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::AuthExpired(message),
        StatusCode::TOO_MANY_REQUESTS => RemoteError::RateLimited,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => RemoteError::Timeout,
        _ => RemoteError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct StreamPayload {
    #[serde(default)]
    items: Vec<ItemPayload>,
    continuation: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemPayload {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    published: Option<i64>,
    #[serde(default)]
    canonical: Vec<LinkPayload>,
    #[serde(default)]
    alternate: Vec<LinkPayload>,
    #[serde(default)]
    origin: Option<OriginPayload>,
    #[serde(default)]
    categories: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LinkPayload {
    href: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OriginPayload {
    stream_id: Option<String>,
}

impl From<ItemPayload> for RemoteArticle {
    fn from(item: ItemPayload) -> Self {
        let has_category = |tag: &str| item.categories.iter().any(|category| category.ends_with(tag));
        let is_read = has_category("/state/com.google/read");
        let is_starred = has_category("/state/com.google/starred");
        let url = item
            .canonical
            .iter()
            .chain(item.alternate.iter())
            .find_map(|link| normalize_text_option(link.href.clone()));

        Self {
            remote_id: item.id,
            feed_id: item
                .origin
                .and_then(|origin| origin.stream_id)
                .unwrap_or_default(),
            title: item.title.unwrap_or_default(),
            url,
            published_at: item.published.unwrap_or_default().saturating_mul(1_000),
            is_read,
            is_starred,
        }
    }
}

pub fn parse_stream_page(body: &str) -> RemoteResult<PullPage> {
    let payload: StreamPayload = serde_json::from_str(body)
        .map_err(|error| RemoteError::InvalidPayload(format!("stream contents: {error}")))?;
    Ok(PullPage {
        items: payload.items.into_iter().map(RemoteArticle::from).collect(),
        continuation: normalize_text_option(payload.continuation),
    })
}

#[derive(Debug, Deserialize)]
struct SubscriptionListPayload {
    #[serde(default)]
    subscriptions: Vec<SubscriptionPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionPayload {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    categories: Vec<CategoryPayload>,
}

#[derive(Debug, Deserialize)]
struct CategoryPayload {
    label: Option<String>,
}

pub fn parse_subscriptions(body: &str) -> RemoteResult<Vec<Subscription>> {
    let payload: SubscriptionListPayload = serde_json::from_str(body)
        .map_err(|error| RemoteError::InvalidPayload(format!("subscription list: {error}")))?;
    Ok(payload
        .subscriptions
        .into_iter()
        .map(|subscription| Subscription {
            title: subscription.title.unwrap_or_else(|| subscription.id.clone()),
            stream_id: subscription.id,
            url: normalize_text_option(subscription.url.or(subscription.html_url)),
            folder: subscription
                .categories
                .into_iter()
                .find_map(|category| normalize_text_option(category.label)),
        })
        .collect())
}

#[derive(Debug, Deserialize)]
struct UnreadCountPayload {
    #[serde(default)]
    unreadcounts: Vec<UnreadCountEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnreadCountEntry {
    id: String,
    count: u64,
    #[serde(default)]
    newest_item_timestamp_usec: Option<String>,
}

pub fn parse_unread_counts(body: &str) -> RemoteResult<Vec<UnreadCount>> {
    let payload: UnreadCountPayload = serde_json::from_str(body)
        .map_err(|error| RemoteError::InvalidPayload(format!("unread counts: {error}")))?;
    Ok(payload
        .unreadcounts
        .into_iter()
        .map(|entry| UnreadCount {
            stream_id: entry.id,
            count: entry.count,
            newest_item_at: entry
                .newest_item_timestamp_usec
                .and_then(|usec| usec.parse::<i64>().ok())
                .map(|usec| usec / 1_000),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn new_rejects_invalid_base_url() {
        assert!(ReaderApiClient::new("", None, None).is_err());
        assert!(ReaderApiClient::new("www.inoreader.com", None, None).is_err());
        let client = ReaderApiClient::new("https://www.inoreader.com/", None, None).unwrap();
        assert_eq!(
            client.endpoint("edit-tag"),
            "https://www.inoreader.com/reader/api/0/edit-tag"
        );
    }

    #[test]
    fn debug_redacts_app_key() {
        let client = ReaderApiClient::new(
            DEFAULT_BASE_URL,
            Some("1000".to_string()),
            Some("app-secret".to_string()),
        )
        .unwrap();
        assert!(!format!("{client:?}").contains("app-secret"));
    }

    #[test]
    fn edit_tag_params_cover_every_action() {
        assert_eq!(edit_tag_param(ActionType::Read), ("a", READ_TAG));
        assert_eq!(edit_tag_param(ActionType::Unread), ("r", READ_TAG));
        assert_eq!(edit_tag_param(ActionType::Star), ("a", STARRED_TAG));
        assert_eq!(edit_tag_param(ActionType::Unstar), ("r", STARRED_TAG));
    }

    #[test]
    fn scope_stream_ids() {
        assert_eq!(
            scope_stream_id(&MarkAllScope::Feed("feed/https://a.example/rss".to_string())),
            "feed/https://a.example/rss"
        );
        assert_eq!(
            scope_stream_id(&MarkAllScope::Folder("Tech".to_string())),
            "user/-/label/Tech"
        );
        assert_eq!(scope_stream_id(&MarkAllScope::Global), READING_LIST);
    }

    #[test]
    fn classify_status_maps_auth_and_quota() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, ""),
            RemoteError::AuthExpired(_)
        ));
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "limit"),
            RemoteError::RateLimited
        );
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR, ""),
            RemoteError::Api {
                status: 500,
                message: "HTTP 500".to_string()
            }
        );
    }

    #[test]
    fn parse_stream_page_reads_state_tags() {
        let body = r#"{
            "id": "user/-/state/com.google/reading-list",
            "continuation": "trXk3aF",
            "items": [
                {
                    "id": "tag:google.com,2005:reader/item/00000000148b9369",
                    "title": "Rust 2.0",
                    "published": 1700000000,
                    "canonical": [{"href": "https://blog.example/rust"}],
                    "categories": [
                        "user/1005921515/state/com.google/reading-list",
                        "user/1005921515/state/com.google/read",
                        "user/1005921515/label/Tech"
                    ],
                    "origin": {"streamId": "feed/https://blog.example/rss", "title": "Blog"}
                },
                {
                    "id": "tag:google.com,2005:reader/item/00000000148b936a",
                    "categories": ["user/-/state/com.google/starred"],
                    "alternate": [{"href": "https://b.example/post", "type": "text/html"}]
                }
            ]
        }"#;

        let page = parse_stream_page(body).unwrap();

        assert_eq!(page.continuation.as_deref(), Some("trXk3aF"));
        assert_eq!(page.items.len(), 2);
        assert_eq!(
            page.items[0],
            RemoteArticle {
                remote_id: "tag:google.com,2005:reader/item/00000000148b9369".to_string(),
                feed_id: "feed/https://blog.example/rss".to_string(),
                title: "Rust 2.0".to_string(),
                url: Some("https://blog.example/rust".to_string()),
                published_at: 1_700_000_000_000,
                is_read: true,
                is_starred: false,
            }
        );
        assert!(!page.items[1].is_read);
        assert!(page.items[1].is_starred);
        assert_eq!(page.items[1].url.as_deref(), Some("https://b.example/post"));
    }

    #[test]
    fn parse_stream_page_rejects_garbage() {
        assert!(matches!(
            parse_stream_page("<html>"),
            Err(RemoteError::InvalidPayload(_))
        ));
    }

    #[test]
    fn parse_subscriptions_takes_first_folder() {
        let body = r#"{"subscriptions": [
            {
                "id": "feed/https://a.example/rss",
                "title": "A",
                "url": "https://a.example/rss",
                "htmlUrl": "https://a.example",
                "categories": [{"id": "user/1/label/Tech", "label": "Tech"}]
            },
            {"id": "feed/https://b.example/rss", "categories": []}
        ]}"#;

        let subscriptions = parse_subscriptions(body).unwrap();

        assert_eq!(subscriptions[0].folder.as_deref(), Some("Tech"));
        assert_eq!(subscriptions[1].title, "feed/https://b.example/rss");
        assert_eq!(subscriptions[1].folder, None);
    }

    #[test]
    fn parse_unread_counts_converts_microseconds() {
        let body = r#"{"max": 1000, "unreadcounts": [
            {"id": "feed/https://a.example/rss", "count": 7, "newestItemTimestampUsec": "1700000000123456"}
        ]}"#;

        let counts = parse_unread_counts(body).unwrap();

        assert_eq!(
            counts,
            vec![UnreadCount {
                stream_id: "feed/https://a.example/rss".to_string(),
                count: 7,
                newest_item_at: Some(1_700_000_000_123),
            }]
        );
    }
}
