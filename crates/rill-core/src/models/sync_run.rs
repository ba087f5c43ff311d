//! Sync run model exposed to the presentation layer

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A unique identifier for a sync run, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncRunId(Uuid);

impl SyncRunId {
    /// Create a new unique run ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SyncRunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SyncRunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SyncRunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// What started a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncTrigger {
    Manual,
    Scheduled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncRunStatus {
    Running,
    Completed,
    Failed,
    /// The scheduler decided there was nothing worth spending quota on
    Skipped,
}

/// Pull strategy chosen for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Incremental,
    Full,
}

impl SyncMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Incremental => "incremental",
            Self::Full => "full",
        }
    }
}

impl FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "incremental" => Ok(Self::Incremental),
            "full" => Ok(Self::Full),
            other => Err(format!("unknown sync mode '{other}'")),
        }
    }
}

/// Machine-readable failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncErrorKind {
    RateLimit,
    NetworkError,
    Timeout,
    AuthExpired,
    PartialFailure,
    RemoteApi,
    Store,
}

impl SyncErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RateLimit => "RATE_LIMIT",
            Self::NetworkError => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::AuthExpired => "AUTH_EXPIRED",
            Self::PartialFailure => "PARTIAL_FAILURE",
            Self::RemoteApi => "REMOTE_API",
            Self::Store => "STORE",
        }
    }

    /// Failures the retry manager recovers from without halting the cycle
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            Self::NetworkError | Self::Timeout | Self::PartialFailure | Self::RemoteApi
        )
    }
}

impl fmt::Display for SyncErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure summary attached to a failed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub kind: SyncErrorKind,
    pub message: String,
}

/// Per-run tallies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
    /// Queue entries acknowledged by the remote
    pub pushed: u32,
    /// Records returned by the pull
    pub fetched: u32,
    /// Records inserted locally
    pub new: u32,
    /// Existing articles overwritten by remote state
    pub updated: u32,
    /// Records whose local state was kept over remote state
    pub conflicts: u32,
    /// Queue entries whose transmission failed this run
    pub failed: u32,
}

/// One execution of the sync cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: SyncRunId,
    pub trigger: SyncTrigger,
    pub status: SyncRunStatus,
    pub mode: Option<SyncMode>,
    /// Unix ms (local clock)
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub counts: SyncCounts,
    pub error: Option<SyncFailure>,
}

impl SyncRun {
    #[must_use]
    pub fn start(trigger: SyncTrigger, now: i64) -> Self {
        Self {
            id: SyncRunId::new(),
            trigger,
            status: SyncRunStatus::Running,
            mode: None,
            started_at: now,
            completed_at: None,
            counts: SyncCounts::default(),
            error: None,
        }
    }

    pub fn complete(&mut self, now: i64) {
        self.status = SyncRunStatus::Completed;
        self.completed_at = Some(now);
    }

    pub fn fail(&mut self, kind: SyncErrorKind, message: impl Into<String>, now: i64) {
        self.status = SyncRunStatus::Failed;
        self.completed_at = Some(now);
        self.error = Some(SyncFailure {
            kind,
            message: message.into(),
        });
    }

    pub fn skip(&mut self, now: i64) {
        self.status = SyncRunStatus::Skipped;
        self.completed_at = Some(now);
    }

    #[must_use]
    pub const fn is_finished(&self) -> bool {
        !matches!(self.status, SyncRunStatus::Running)
    }

    /// Whether the run failed with `kind`
    #[must_use]
    pub fn failed_with(&self, kind: SyncErrorKind) -> bool {
        self.error
            .as_ref()
            .is_some_and(|failure| failure.kind == kind)
    }
}
