//! Remote credentials for the CLI, with keychain persistence of OAuth secrets.

#[cfg(test)]
use std::collections::HashMap;
use std::sync::Mutex;
#[cfg(test)]
use std::sync::OnceLock;

#[cfg(not(test))]
use keyring::Entry;
use rill_core::sync::{CredentialProvider, OAuthCredentials, RemoteResult, StaticToken};
use rill_core::RemoteConfig;
use serde::{Deserialize, Serialize};

use crate::error::CliError;

#[cfg(not(test))]
const KEYRING_SERVICE_NAME: &str = "rill-cli";

/// OAuth secrets kept in the platform keychain
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOAuth {
    pub refresh_token: String,
    pub client_secret: String,
}

impl std::fmt::Debug for StoredOAuth {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("StoredOAuth")
            .field("refresh_token", &"[REDACTED]")
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct SecretStore {
    username: String,
}

impl SecretStore {
    pub fn new(client_id: &str) -> Self {
        Self {
            username: format!("oauth:{client_id}"),
        }
    }

    #[cfg(test)]
    fn test_store() -> &'static Mutex<HashMap<String, String>> {
        static STORE: OnceLock<Mutex<HashMap<String, String>>> = OnceLock::new();
        STORE.get_or_init(|| Mutex::new(HashMap::new()))
    }

    #[cfg(not(test))]
    fn entry(&self) -> Result<Entry, CliError> {
        Entry::new(KEYRING_SERVICE_NAME, &self.username)
            .map_err(|error| CliError::Auth(error.to_string()))
    }

    #[cfg(not(test))]
    pub fn load(&self) -> Result<Option<StoredOAuth>, CliError> {
        match self.entry()?.get_password() {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(CliError::Auth(error.to_string())),
        }
    }

    #[cfg(test)]
    pub fn load(&self) -> Result<Option<StoredOAuth>, CliError> {
        let guard = Self::test_store()
            .lock()
            .map_err(|error| CliError::Auth(error.to_string()))?;
        match guard.get(&self.username) {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }

    #[cfg(not(test))]
    pub fn save(&self, secrets: &StoredOAuth) -> Result<(), CliError> {
        let raw = serde_json::to_string(secrets)?;
        self.entry()?
            .set_password(&raw)
            .map_err(|error| CliError::Auth(error.to_string()))
    }

    #[cfg(test)]
    pub fn save(&self, secrets: &StoredOAuth) -> Result<(), CliError> {
        let raw = serde_json::to_string(secrets)?;
        let mut guard = Self::test_store()
            .lock()
            .map_err(|error| CliError::Auth(error.to_string()))?;
        guard.insert(self.username.clone(), raw);
        Ok(())
    }

    #[cfg(not(test))]
    pub fn clear(&self) -> Result<(), CliError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(CliError::Auth(error.to_string())),
        }
    }

    #[cfg(test)]
    pub fn clear(&self) -> Result<(), CliError> {
        let mut guard = Self::test_store()
            .lock()
            .map_err(|error| CliError::Auth(error.to_string()))?;
        guard.remove(&self.username);
        Ok(())
    }
}

/// Whichever credential source the environment and keychain provide
#[derive(Debug)]
pub enum CliCredentials {
    Static(StaticToken),
    OAuth {
        credentials: OAuthCredentials,
        store: SecretStore,
        /// Last secrets written to the keychain
        stored: Mutex<StoredOAuth>,
    },
}

impl CliCredentials {
    /// `RILL_ACCESS_TOKEN` wins; otherwise keychain secrets plus configured endpoint
    pub fn resolve(
        remote: &RemoteConfig,
        env_token: Option<String>,
    ) -> Result<Self, CliError> {
        if let Some(token) = rill_core::util::normalize_text_option(env_token) {
            return Ok(Self::Static(StaticToken::new(token)));
        }

        let (Some(endpoint), Some(client_id)) = (&remote.token_endpoint, &remote.client_id) else {
            return Err(CliError::SyncNotConfigured);
        };
        let store = SecretStore::new(client_id);
        let Some(stored) = store.load()? else {
            return Err(CliError::SyncNotConfigured);
        };
        let credentials = OAuthCredentials::new(
            endpoint.clone(),
            client_id.clone(),
            stored.client_secret.clone(),
            stored.refresh_token.clone(),
        )?;
        Ok(Self::OAuth {
            credentials,
            store,
            stored: Mutex::new(stored),
        })
    }

    pub const fn source(&self) -> &'static str {
        match self {
            Self::Static(_) => "RILL_ACCESS_TOKEN",
            Self::OAuth { .. } => "keychain refresh token",
        }
    }

    /// Save a refresh token the endpoint rotated during this process
    async fn persist_rotation(&self) -> Result<(), CliError> {
        let Self::OAuth {
            credentials,
            store,
            stored,
        } = self
        else {
            return Ok(());
        };
        let current = credentials.refresh_token().await;
        let mut stored = stored
            .lock()
            .map_err(|error| CliError::Auth(error.to_string()))?;
        if current == stored.refresh_token {
            return Ok(());
        }
        let updated = StoredOAuth {
            refresh_token: current,
            client_secret: stored.client_secret.clone(),
        };
        store.save(&updated)?;
        *stored = updated;
        tracing::info!("Stored rotated refresh token");
        Ok(())
    }

    /// Runs after every exchange; the old refresh token may already be void
    async fn save_after_exchange(&self) {
        if let Err(error) = self.persist_rotation().await {
            tracing::warn!("Could not store rotated refresh token: {error}");
        }
    }
}

impl CredentialProvider for CliCredentials {
    async fn access_token(&self) -> RemoteResult<String> {
        match self {
            Self::Static(token) => token.access_token().await,
            Self::OAuth { credentials, .. } => {
                let token = credentials.access_token().await?;
                self.save_after_exchange().await;
                Ok(token)
            }
        }
    }

    async fn refresh(&self) -> RemoteResult<String> {
        match self {
            Self::Static(token) => token.refresh().await,
            Self::OAuth { credentials, .. } => {
                let token = credentials.refresh().await?;
                self.save_after_exchange().await;
                Ok(token)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    fn oauth_remote(client_id: &str) -> RemoteConfig {
        RemoteConfig {
            token_endpoint: Some("https://auth.example.com/oauth2/token".to_string()),
            client_id: Some(client_id.to_string()),
            ..RemoteConfig::default()
        }
    }

    fn secrets() -> StoredOAuth {
        StoredOAuth {
            refresh_token: "secret-refresh".to_string(),
            client_secret: "secret-client".to_string(),
        }
    }

    #[test]
    fn env_token_takes_precedence() {
        let credentials =
            CliCredentials::resolve(&oauth_remote("env-first"), Some(" tok ".to_string()))
                .unwrap();
        assert_eq!(credentials.source(), "RILL_ACCESS_TOKEN");
    }

    #[test]
    fn nothing_configured_is_reported() {
        let result = CliCredentials::resolve(&RemoteConfig::default(), Some("  ".to_string()));
        assert!(matches!(result, Err(CliError::SyncNotConfigured)));
    }

    #[test]
    fn endpoint_without_stored_secrets_is_not_configured() {
        let result = CliCredentials::resolve(&oauth_remote("never-logged-in"), None);
        assert!(matches!(result, Err(CliError::SyncNotConfigured)));
    }

    #[test]
    fn stored_secrets_enable_oauth() {
        let store = SecretStore::new("logged-in");
        store.save(&secrets()).unwrap();

        let credentials = CliCredentials::resolve(&oauth_remote("logged-in"), None).unwrap();
        assert_eq!(credentials.source(), "keychain refresh token");

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn stored_secrets_debug_is_redacted() {
        let rendered = format!("{:?}", secrets());
        assert!(!rendered.contains("secret-refresh"));
        assert!(!rendered.contains("secret-client"));
        assert!(rendered.contains("[REDACTED]"));
    }

    /// Answers one token request with a rotated refresh token
    async fn rotating_token_endpoint() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buffer = [0_u8; 1024];
            loop {
                let read = socket.read(&mut buffer).await.unwrap();
                request.extend_from_slice(&buffer[..read]);
                let text = String::from_utf8_lossy(&request);
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let length = text[..header_end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + length {
                        break;
                    }
                }
                if read == 0 {
                    break;
                }
            }
            let body = r#"{"access_token":"fresh","expires_in":3600,"refresh_token":"rotated-refresh"}"#;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{address}/oauth2/token")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rotated_refresh_token_is_stored_on_exchange() {
        let endpoint = rotating_token_endpoint().await;
        let store = SecretStore::new("rotating");
        store.save(&secrets()).unwrap();
        let remote = RemoteConfig {
            token_endpoint: Some(endpoint),
            client_id: Some("rotating".to_string()),
            ..RemoteConfig::default()
        };
        let credentials = CliCredentials::resolve(&remote, None).unwrap();

        let token = credentials.access_token().await.unwrap();

        assert_eq!(token, "fresh");
        let saved = store.load().unwrap().unwrap();
        assert_eq!(saved.refresh_token, "rotated-refresh");
        assert_eq!(saved.client_secret, "secret-client");
        store.clear().unwrap();
    }
}
