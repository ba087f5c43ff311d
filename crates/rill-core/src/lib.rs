//! rill-core - Core library for Rill
//!
//! This crate holds the article state store and the sync engine that keeps
//! read/starred state consistent with a remote feed aggregator under a daily
//! call budget. The CLI (and any future UI) drives it through [`SyncEngine`].

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use config::{RemoteConfig, SyncSettings};
pub use error::{Error, Result};
pub use models::{Article, ArticleId};
pub use services::DatabaseService;
pub use state::SyncPhase;
pub use sync::{SyncEngine, SyncError, SyncResult};
