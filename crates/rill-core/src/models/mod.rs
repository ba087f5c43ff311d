//! Data models for Rill

mod article;
mod queue;
mod remote;
mod sync_run;

pub use article::{Article, ArticleId, Feed};
pub use queue::{ActionAxis, ActionType, EnqueueOutcome, FailedQueueEntry, QueueEntry};
pub use remote::{
    BatchOutcome, MarkAllScope, PullPage, RemoteArticle, StreamQuery, Subscription, UnreadCount,
};
pub use sync_run::{
    SyncCounts, SyncErrorKind, SyncFailure, SyncMode, SyncRun, SyncRunId, SyncRunStatus,
    SyncTrigger,
};
