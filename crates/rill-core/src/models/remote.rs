//! Records exchanged with the remote aggregator

use serde::{Deserialize, Serialize};

/// An article as reported by a stream pull
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteArticle {
    pub remote_id: String,
    pub feed_id: String,
    pub title: String,
    pub url: Option<String>,
    /// Publication time (Unix ms, remote clock; informational only)
    pub published_at: i64,
    pub is_read: bool,
    pub is_starred: bool,
}

/// One page of a stream pull
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullPage {
    pub items: Vec<RemoteArticle>,
    /// Set when the remote holds more items than the page cap
    pub continuation: Option<String>,
}

/// Parameters of a stream pull
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamQuery {
    /// Only items newer than this (Unix ms). `None` pulls everything.
    pub newer_than: Option<i64>,
    pub exclude_read: bool,
    pub max_items: usize,
    pub continuation: Option<String>,
}

/// A subscription entry from the remote listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub stream_id: String,
    pub title: String,
    pub url: Option<String>,
    pub folder: Option<String>,
}

/// Unread count per stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadCount {
    pub stream_id: String,
    pub count: u64,
    /// Newest item timestamp in the stream (Unix ms)
    pub newest_item_at: Option<i64>,
}

/// Target of a mark-all-as-read request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum MarkAllScope {
    /// A single subscription, by remote stream id
    Feed(String),
    /// Every feed filed under a folder label
    Folder(String),
    /// Everything
    Global,
}

/// Acknowledgement of a batched tag edit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Remote ids the service refused; everything else was applied
    pub rejected: Vec<String>,
}
