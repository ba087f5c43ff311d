//! Sync engine and remote endpoint configuration.
//!
//! Both structs deserialize from JSON with every field defaulted, so a config
//! file only has to name what it changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sync::http::DEFAULT_BASE_URL;
use crate::sync::RetryPolicy;
use crate::util::{is_http_url, normalize_text_option};
use crate::{Error, Result};

/// Largest page the reader API accepts for `stream/contents`
pub const MAX_PULL_PAGE_SIZE: usize = 1_000;

/// Tunables for scheduling, batching, quota and retries
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSettings {
    /// Scheduler period
    pub sync_interval_secs: u64,
    /// Live queue entries that justify a scheduled cycle
    pub min_changes: u64,
    /// Age of the oldest live entry that justifies a scheduled cycle
    pub stale_age_secs: u64,
    /// Longest gap between successful pulls before the scheduler forces one
    pub max_pull_age_secs: u64,
    pub full_sync_interval_secs: u64,
    /// Remote ids per tag-edit call
    pub batch_size: usize,
    /// Queue entries drained per cycle
    pub max_drain: usize,
    pub pull_page_size: usize,
    /// Remote calls allowed per UTC day
    pub daily_call_limit: u32,
    pub base_backoff_secs: u64,
    pub max_retries: u32,
    pub run_timeout_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            sync_interval_secs: 5 * 60,
            min_changes: 5,
            stale_age_secs: 15 * 60,
            max_pull_age_secs: 2 * 60 * 60,
            full_sync_interval_secs: 7 * 24 * 60 * 60,
            batch_size: 100,
            max_drain: 1_000,
            pull_page_size: 250,
            daily_call_limit: 100,
            base_backoff_secs: 10 * 60,
            max_retries: 3,
            run_timeout_secs: 2 * 60,
        }
    }
}

impl SyncSettings {
    pub fn validate(&self) -> Result<()> {
        if self.sync_interval_secs == 0 {
            return Err(invalid("sync_interval_secs must be positive"));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size must be positive"));
        }
        if self.max_drain == 0 {
            return Err(invalid("max_drain must be positive"));
        }
        if self.pull_page_size == 0 || self.pull_page_size > MAX_PULL_PAGE_SIZE {
            return Err(invalid(&format!(
                "pull_page_size must be between 1 and {MAX_PULL_PAGE_SIZE}"
            )));
        }
        if self.run_timeout_secs == 0 {
            return Err(invalid("run_timeout_secs must be positive"));
        }
        Ok(())
    }

    #[must_use]
    pub const fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    #[must_use]
    pub const fn stale_age(&self) -> Duration {
        Duration::from_secs(self.stale_age_secs)
    }

    #[must_use]
    pub const fn max_pull_age(&self) -> Duration {
        Duration::from_secs(self.max_pull_age_secs)
    }

    #[must_use]
    pub const fn full_sync_interval(&self) -> Duration {
        Duration::from_secs(self.full_sync_interval_secs)
    }

    #[must_use]
    pub const fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_backoff: Duration::from_secs(self.base_backoff_secs),
            max_retries: self.max_retries,
        }
    }
}

/// Where and how to reach the remote aggregator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteConfig {
    pub base_url: String,
    pub app_id: Option<String>,
    pub app_key: Option<String>,
    /// OAuth token endpoint; enables refresh-token credentials when set
    pub token_endpoint: Option<String>,
    pub client_id: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            app_id: None,
            app_key: None,
            token_endpoint: None,
            client_id: None,
        }
    }
}

impl RemoteConfig {
    /// Trim fields and check URLs
    pub fn normalized(self) -> Result<Self> {
        let base_url = normalize_required_http_url(self.base_url, "base_url")?;
        let token_endpoint = match normalize_text_option(self.token_endpoint) {
            Some(endpoint) => Some(normalize_required_http_url(endpoint, "token_endpoint")?),
            None => None,
        };

        Ok(Self {
            base_url,
            app_id: normalize_text_option(self.app_id),
            app_key: normalize_text_option(self.app_key),
            token_endpoint,
            client_id: normalize_text_option(self.client_id),
        })
    }
}

fn invalid(message: &str) -> Error {
    Error::InvalidInput(message.to_string())
}

fn normalize_required_http_url(raw: String, field: &str) -> Result<String> {
    let value = normalize_text_option(Some(raw))
        .ok_or_else(|| invalid(&format!("config field '{field}' is required")))?;
    if is_http_url(&value) {
        Ok(value.trim_end_matches('/').to_string())
    } else {
        Err(invalid(&format!(
            "config field '{field}' must include http:// or https://"
        )))
    }
}
