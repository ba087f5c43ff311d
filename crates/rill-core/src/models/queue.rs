//! Change queue models

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ArticleId;

/// A local state change waiting to be transmitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Read,
    Unread,
    Star,
    Unstar,
}

/// The independent state dimension an action changes.
///
/// Read/unread share one axis, star/unstar another; the queue keeps at most
/// one live entry per article and axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionAxis {
    Read,
    Star,
}

impl ActionType {
    pub const ALL: [Self; 4] = [Self::Read, Self::Unread, Self::Star, Self::Unstar];

    #[must_use]
    pub const fn axis(self) -> ActionAxis {
        match self {
            Self::Read | Self::Unread => ActionAxis::Read,
            Self::Star | Self::Unstar => ActionAxis::Star,
        }
    }

    /// The action that undoes this one
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Read => Self::Unread,
            Self::Unread => Self::Read,
            Self::Star => Self::Unstar,
            Self::Unstar => Self::Star,
        }
    }

    /// Whether the action sets its flag (read, star) or clears it
    #[must_use]
    pub const fn flag_value(self) -> bool {
        matches!(self, Self::Read | Self::Star)
    }

    /// Whether a record with the given flags already reflects this action
    #[must_use]
    pub const fn is_reflected_by(self, is_read: bool, is_starred: bool) -> bool {
        match self.axis() {
            ActionAxis::Read => is_read == self.flag_value(),
            ActionAxis::Star => is_starred == self.flag_value(),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Unread => "unread",
            Self::Star => "star",
            Self::Unstar => "unstar",
        }
    }
}

impl ActionAxis {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Star => "star",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read" => Ok(Self::Read),
            "unread" => Ok(Self::Unread),
            "star" => Ok(Self::Star),
            "unstar" => Ok(Self::Unstar),
            other => Err(format!("unknown action type '{other}'")),
        }
    }
}

/// A pending local change, persisted with its retry state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: i64,
    pub article_id: ArticleId,
    pub remote_id: String,
    pub action_type: ActionType,
    /// Unix ms of the latest enqueue that produced this entry
    pub created_at: i64,
    pub attempt_count: u32,
    pub last_attempt_at: Option<i64>,
    pub last_error: Option<String>,
}

/// A queue entry that exhausted its retries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedQueueEntry {
    pub id: i64,
    pub article_id: ArticleId,
    pub remote_id: String,
    pub action_type: ActionType,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub failed_at: i64,
}

/// What an enqueue did to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new live entry was created
    Inserted(i64),
    /// An existing same-axis entry was replaced in place
    Replaced(i64),
    /// The action cancelled a never-attempted opposite entry
    Cancelled,
}
