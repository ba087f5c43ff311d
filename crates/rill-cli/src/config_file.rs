//! Persistent CLI configuration.

use std::path::{Path, PathBuf};

use rill_core::{RemoteConfig, SyncSettings};
use serde::{Deserialize, Serialize};

use crate::error::CliError;

const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub sync: SyncSettings,
}

const fn default_config_version() -> u32 {
    1
}

pub fn default_config_path() -> Result<PathBuf, CliError> {
    dirs::config_dir()
        .map(|dir| dir.join("rill").join(CONFIG_FILE_NAME))
        .ok_or_else(|| CliError::Config("Failed to resolve config directory".to_string()))
}

pub fn resolve_config_path(explicit: Option<PathBuf>) -> Result<PathBuf, CliError> {
    match explicit.or_else(|| std::env::var_os("RILL_CONFIG").map(PathBuf::from)) {
        Some(path) => Ok(path),
        None => default_config_path(),
    }
}

impl CliConfig {
    /// Load the file (missing means defaults), apply `RILL_*` overrides, validate
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let mut config = Self::load_from_path(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validated()
    }

    pub fn load_from_path(path: &Path) -> Result<Self, CliError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|error| {
            CliError::Config(format!(
                "Failed to read config at {}: {error}",
                path.display()
            ))
        })?;
        serde_json::from_str::<Self>(&raw).map_err(|error| {
            CliError::Config(format!(
                "Failed to parse config at {}: {error}",
                path.display()
            ))
        })
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), CliError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                CliError::Config(format!(
                    "Failed to create config directory {}: {error}",
                    parent.display()
                ))
            })?;
        }

        let normalized = self.clone().validated()?;
        let serialized = serde_json::to_string_pretty(&normalized)?;
        std::fs::write(path, serialized).map_err(|error| {
            CliError::Config(format!(
                "Failed to write config at {}: {error}",
                path.display()
            ))
        })
    }

    /// Overlay environment values; `lookup` is `std::env::var` outside tests
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), CliError> {
        if let Some(value) = lookup("RILL_BASE_URL") {
            self.remote.base_url = value;
        }
        if let Some(value) = lookup("RILL_APP_ID") {
            self.remote.app_id = Some(value);
        }
        if let Some(value) = lookup("RILL_APP_KEY") {
            self.remote.app_key = Some(value);
        }
        if let Some(value) = lookup("RILL_TOKEN_ENDPOINT") {
            self.remote.token_endpoint = Some(value);
        }
        if let Some(value) = lookup("RILL_CLIENT_ID") {
            self.remote.client_id = Some(value);
        }
        if let Some(value) = lookup("RILL_DAILY_CALL_LIMIT") {
            self.sync.daily_call_limit = parse_number("RILL_DAILY_CALL_LIMIT", &value)?;
        }
        if let Some(value) = lookup("RILL_SYNC_INTERVAL_SECS") {
            self.sync.sync_interval_secs = parse_number("RILL_SYNC_INTERVAL_SECS", &value)?;
        }
        Ok(())
    }

    fn validated(self) -> Result<Self, CliError> {
        self.sync.validate()?;
        Ok(Self {
            version: self.version,
            remote: self.remote.normalized()?,
            sync: self.sync,
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, CliError> {
    value
        .trim()
        .parse()
        .map_err(|_| CliError::Config(format!("{key} must be a non-negative integer")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CliConfig::load_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.sync, SyncSettings::default());
        assert_eq!(config.remote, RemoteConfig::default());
    }

    #[test]
    fn config_roundtrip_normalizes_remote() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);

        let mut config = CliConfig::default();
        config.remote.base_url = " https://reader.example.com/ ".to_string();
        config.remote.client_id = Some("  ".to_string());
        config.sync.batch_size = 25;

        config.save_to_path(&path).unwrap();
        let loaded = CliConfig::load_from_path(&path).unwrap();
        assert_eq!(loaded.remote.base_url, "https://reader.example.com");
        assert_eq!(loaded.remote.client_id, None);
        assert_eq!(loaded.sync.batch_size, 25);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, r#"{"sync": {"min_changes": 2}}"#).unwrap();

        let config = CliConfig::load_from_path(&path).unwrap();
        assert_eq!(config.version, 1);
        assert_eq!(config.sync.min_changes, 2);
        assert_eq!(config.sync.batch_size, 100);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, r#"{"sync": {"batch_sise": 2}}"#).unwrap();

        assert!(matches!(
            CliConfig::load_from_path(&path),
            Err(CliError::Config(_))
        ));
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("RILL_APP_ID", "app"),
            ("RILL_DAILY_CALL_LIMIT", "5000"),
        ]);
        let mut config = CliConfig::default();
        config
            .apply_env_overrides(|key| env.get(key).map(ToString::to_string))
            .unwrap();

        assert_eq!(config.remote.app_id.as_deref(), Some("app"));
        assert_eq!(config.sync.daily_call_limit, 5_000);
        assert_eq!(config.sync.min_changes, 5);
    }

    #[test]
    fn non_numeric_override_is_a_config_error() {
        let mut config = CliConfig::default();
        let result = config.apply_env_overrides(|key| {
            (key == "RILL_SYNC_INTERVAL_SECS").then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(CliError::Config(_))));
    }
}
