//! Google OAuth session shared by the Gmail and Calendar providers.
//!
//! Credentials (client id/secret and a refresh token) come from the OS
//! keychain. Access tokens are obtained from the token endpoint on first use
//! and refreshed once when the API rejects them.

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tokio::sync::RwLock;

use super::{ProviderError, Result};
use crate::storage::GoogleCredentials;

const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// OAuth token response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[allow(dead_code)]
    expires_in: Option<u64>,
}

/// Authorized HTTP session against Google APIs.
pub struct GoogleSession {
    client: Client,
    credentials: GoogleCredentials,
    token_url: String,
    access_token: RwLock<Option<String>>,
}

impl GoogleSession {
    /// Creates a session for the given credentials.
    ///
    /// No request is made until the first API call.
    pub fn new(credentials: GoogleCredentials) -> Self {
        Self {
            client: Client::new(),
            credentials,
            token_url: GOOGLE_TOKEN_URL.to_string(),
            access_token: RwLock::new(None),
        }
    }

    /// Overrides the token endpoint.
    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }

    /// Returns a valid access token, refreshing if none is cached.
    async fn access_token(&self) -> Result<String> {
        if let Some(token) = self.access_token.read().await.as_ref() {
            return Ok(token.clone());
        }

        let mut slot = self.access_token.write().await;
        if let Some(token) = slot.as_ref() {
            return Ok(token.clone());
        }
        let token = self.refresh_access_token().await?;
        *slot = Some(token.clone());
        Ok(token)
    }

    /// Exchanges the refresh token for a new access token.
    async fn refresh_access_token(&self) -> Result<String> {
        let params = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("refresh_token", self.credentials.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];

        let response = self
            .client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| ProviderError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Authentication(format!(
                "token refresh failed ({}): {}",
                status, body
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Internal(format!("parse token response: {}", e)))?;

        tracing::debug!("Refreshed Google access token");
        Ok(token_response.access_token)
    }

    /// Drops the cached access token.
    async fn invalidate(&self) {
        *self.access_token.write().await = None;
    }

    /// Sends an authorized request built by `build`.
    ///
    /// Retries once with a fresh token on 401. Unsuccessful statuses are
    /// mapped to [`ProviderError`].
    pub async fn send<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let response = self.send_once(&build).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return check_status(response).await;
        }

        tracing::debug!("Access token rejected, refreshing");
        self.invalidate().await;
        let response = self.send_once(&build).await?;
        check_status(response).await
    }

    async fn send_once<F>(&self, build: &F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let token = self.access_token().await?;
        build(&self.client)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ProviderError::Connection(e.to_string()))
    }
}

/// Passes successful responses through and maps the rest to errors.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::from_status(status.as_u16(), retry_after, body))
}

/// Decodes a JSON response body.
///
/// A body cut off mid-read is a connection failure; only a complete body that
/// does not parse is [`ProviderError::Internal`].
pub async fn json<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ProviderError::Connection(format!("read response: {}", e)))?;
    parse_json(&bytes)
}

fn parse_json<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| ProviderError::Internal(format!("parse response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> GoogleCredentials {
        GoogleCredentials {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            refresh_token: "refresh".to_string(),
        }
    }

    #[derive(Debug, Deserialize)]
    struct IdOnly {
        id: String,
    }

    #[test]
    fn parse_json_reads_complete_body() {
        let parsed: IdOnly = parse_json(br#"{"id":"abc","extra":1}"#).unwrap();
        assert_eq!(parsed.id, "abc");
    }

    #[test]
    fn unparseable_body_is_internal_not_undecodable() {
        let err = parse_json::<IdOnly>(b"<html>").unwrap_err();
        assert!(matches!(err, ProviderError::Internal(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn session_starts_without_token() {
        let session = GoogleSession::new(credentials());
        assert!(session.access_token.read().await.is_none());
    }

    #[tokio::test]
    async fn unreachable_token_endpoint_is_a_connection_error() {
        let session =
            GoogleSession::new(credentials()).with_token_url("http://127.0.0.1:9/token");
        let err = session.access_token().await.unwrap_err();
        assert!(matches!(err, ProviderError::Connection(_)));
    }

    #[tokio::test]
    async fn cached_token_is_reused() {
        let session =
            GoogleSession::new(credentials()).with_token_url("http://127.0.0.1:9/token");
        *session.access_token.write().await = Some("cached".to_string());

        assert_eq!(session.access_token().await.unwrap(), "cached");
        session.invalidate().await;
        assert!(session.access_token.read().await.is_none());
    }
}
