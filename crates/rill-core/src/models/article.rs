//! Article and feed models

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Local identifier of an article (store row id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArticleId(i64);

impl ArticleId {
    /// Wrap a raw store row id
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Raw store row id
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ArticleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ArticleId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

/// An article mirrored from the remote aggregator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    /// Local identifier
    pub id: ArticleId,
    /// Identifier assigned by the remote service
    pub remote_id: String,
    /// Remote stream id of the owning subscription
    pub feed_id: String,
    /// Headline
    pub title: String,
    /// Canonical link, if the remote provided one
    pub url: Option<String>,
    /// Publication time (Unix ms)
    pub published_at: i64,
    /// Read flag
    pub is_read: bool,
    /// Starred flag
    pub is_starred: bool,
    /// Last local user mutation (Unix ms, local clock). `None` if never edited locally.
    pub local_update_ts: Option<i64>,
    /// Watermark of the sync run that last wrote this row. `None` until first overwrite.
    pub sync_update_ts: Option<i64>,
}

/// A subscribed feed as listed by the remote service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
    /// Remote stream id, e.g. `feed/https://example.com/rss`
    pub stream_id: String,
    /// Display title
    pub title: String,
    /// Feed URL
    pub url: Option<String>,
    /// Folder label the feed is filed under
    pub folder: Option<String>,
}
