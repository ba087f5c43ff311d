//! OAuth refresh-token credentials for the reader API.

use std::time::{SystemTime, UNIX_EPOCH};

use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::sync::error::{RemoteError, RemoteResult};
use crate::sync::remote::CredentialProvider;
use crate::util::{compact_text, is_http_url, normalize_text_option};

/// Refresh this many seconds before the advertised expiry
const EXPIRY_SKEW_SECS: i64 = 60;

#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    /// Unix seconds
    pub expires_at: i64,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("AccessToken")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Exchanges a long-lived refresh token for short-lived access tokens
pub struct OAuthCredentials {
    endpoint: String,
    client_id: String,
    client_secret: String,
    refresh_token: Mutex<String>,
    current: Mutex<Option<AccessToken>>,
    client: reqwest::Client,
}

impl std::fmt::Debug for OAuthCredentials {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("OAuthCredentials")
            .field("endpoint", &self.endpoint)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl OAuthCredentials {
    pub fn new(
        endpoint: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> RemoteResult<Self> {
        let endpoint = normalize_endpoint(endpoint.into())?;
        let client_id = required(client_id.into(), "client_id")?;
        let client_secret = required(client_secret.into(), "client_secret")?;
        let refresh_token = required(refresh_token.into(), "refresh_token")?;

        Ok(Self {
            endpoint,
            client_id,
            client_secret,
            refresh_token: Mutex::new(refresh_token),
            current: Mutex::new(None),
            client: reqwest::Client::builder().build()?,
        })
    }

    /// Seed a token obtained elsewhere, e.g. from a previous session
    pub async fn with_access_token(self, token: AccessToken) -> Self {
        *self.current.lock().await = Some(token);
        self
    }

    /// Current refresh token, which the endpoint may have rotated
    pub async fn refresh_token(&self) -> String {
        self.refresh_token.lock().await.clone()
    }

    async fn exchange(&self) -> RemoteResult<AccessToken> {
        let refresh_token = self.refresh_token.lock().await.clone();
        let response = self
            .client
            .post(&self.endpoint)
            .header("Accept", "application/json")
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = parse_api_error(status, &body);
            return Err(
                if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
                    RemoteError::AuthExpired(message)
                } else {
                    RemoteError::Api {
                        status: status.as_u16(),
                        message,
                    }
                },
            );
        }

        let payload = response.json::<TokenResponse>().await?;
        if let Some(rotated) = normalize_text_option(payload.refresh_token.clone()) {
            *self.refresh_token.lock().await = rotated;
        }
        payload.try_into()
    }
}

impl CredentialProvider for OAuthCredentials {
    async fn access_token(&self) -> RemoteResult<String> {
        let mut current = self.current.lock().await;
        if let Some(token) = current.as_ref() {
            if token.expires_at - EXPIRY_SKEW_SECS > unix_timestamp_now() {
                return Ok(token.token.clone());
            }
        }

        let fresh = self.exchange().await?;
        let token = fresh.token.clone();
        *current = Some(fresh);
        Ok(token)
    }

    async fn refresh(&self) -> RemoteResult<String> {
        let mut current = self.current.lock().await;
        let fresh = self.exchange().await?;
        let token = fresh.token.clone();
        *current = Some(fresh);
        Ok(token)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
}

impl TryFrom<TokenResponse> for AccessToken {
    type Error = RemoteError;

    fn try_from(value: TokenResponse) -> RemoteResult<Self> {
        let token = normalize_text_option(value.access_token).ok_or_else(|| {
            RemoteError::InvalidPayload("response did not include access_token".to_string())
        })?;
        let expires_in = value.expires_in.ok_or_else(|| {
            RemoteError::InvalidPayload("response did not include expires_in".to_string())
        })?;

        Ok(Self {
            token,
            expires_at: unix_timestamp_now().saturating_add(expires_in),
        })
    }
}

#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: Option<String>,
    error_description: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<OAuthErrorBody>(body) {
        if let Some(message) = payload.error_description.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{trimmed} ({})", status.as_u16())
    }
}

fn normalize_endpoint(raw: String) -> RemoteResult<String> {
    let endpoint = required(raw, "token endpoint")?;
    if is_http_url(&endpoint) {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(RemoteError::InvalidConfiguration(
            "token endpoint must include http:// or https://".to_string(),
        ))
    }
}

fn required(raw: String, field: &str) -> RemoteResult<String> {
    normalize_text_option(Some(raw))
        .ok_or_else(|| RemoteError::InvalidConfiguration(format!("{field} must not be empty")))
}

fn unix_timestamp_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| {
            i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
        })
}
