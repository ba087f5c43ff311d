//! Bidirectional sync between the local store and the remote aggregator.

mod client;
mod clock;
mod credentials;
mod dispatcher;
mod engine;
mod error;
mod events;
pub mod http;
mod orchestrator;
mod remote;
mod resolver;
mod retry;
mod scheduler;

pub use client::{next_utc_midnight, QuotaStatus, RemoteSyncClient};
pub use clock::{duration_ms, Clock, ManualClock, SystemClock};
pub use credentials::{AccessToken, OAuthCredentials};
pub use dispatcher::{BatchDispatcher, DispatchReport};
pub use engine::{SyncEngine, SyncEngineBuilder, RUN_HISTORY};
pub use error::{RemoteError, RemoteResult, SyncError, SyncResult};
pub use events::{MemoryEventSink, SyncEvent, SyncEventSink, TracingEventSink};
pub use http::ReaderApiClient;
pub use orchestrator::{plan_pull, PhaseTracker, PullPlan, SyncOrchestrator};
pub use remote::{CredentialProvider, RemoteApi, StaticToken};
pub use resolver::{resolve, ConflictResolver, ReconcileTally, Resolution};
pub use retry::{RetryManager, RetryPolicy, RetryTally, DEFAULT_BASE_BACKOFF, DEFAULT_MAX_RETRIES};
pub use scheduler::{evaluate_gate, GateDecision, RunReason, SyncScheduler};
