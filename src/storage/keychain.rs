//! Keychain access for secure credential storage.
//!
//! Wraps the keyring crate to provide OS-native storage for the Google OAuth
//! client credentials and refresh token.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during keychain operations.
#[derive(Debug, Error)]
pub enum KeychainError {
    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Credential not found: {0}")]
    NotFound(String),

    #[error("Stored credential is invalid: {0}")]
    Invalid(#[from] serde_json::Error),

    #[error("Failed to spawn blocking task: {0}")]
    TaskFailed(String),
}

/// Result type for keychain operations.
pub type Result<T> = std::result::Result<T, KeychainError>;

/// OAuth credentials for the Google mail and calendar APIs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoogleCredentials {
    /// OAuth client ID.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// Long-lived refresh token.
    pub refresh_token: String,
}

/// Provides access to the OS keychain for credential storage.
///
/// Credentials are stored using the service name as a namespace.
#[derive(Debug, Clone)]
pub struct KeychainAccess {
    service_name: String,
}

impl KeychainAccess {
    /// Default service name for classcal credentials.
    pub const DEFAULT_SERVICE: &'static str = "io.classcal.app";

    /// Creates a new KeychainAccess with the default service name.
    pub fn new() -> Self {
        Self {
            service_name: Self::DEFAULT_SERVICE.to_string(),
        }
    }

    /// Creates a new KeychainAccess with a custom service name.
    pub fn with_service(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    /// Stores a credential in the keychain, overwriting any existing value.
    pub async fn store(&self, key: &str, value: &str) -> Result<()> {
        let service = self.service_name.clone();
        let key = key.to_string();
        let value = value.to_string();

        tokio::task::spawn_blocking(move || {
            let entry = keyring::Entry::new(&service, &key)?;
            entry.set_password(&value)?;
            Ok(())
        })
        .await
        .map_err(|e| KeychainError::TaskFailed(e.to_string()))?
    }

    /// Retrieves a credential from the keychain.
    ///
    /// Returns `None` if no credential exists for the key.
    pub async fn retrieve(&self, key: &str) -> Result<Option<String>> {
        let service = self.service_name.clone();
        let key = key.to_string();

        tokio::task::spawn_blocking(move || {
            let entry = keyring::Entry::new(&service, &key)?;
            match entry.get_password() {
                Ok(password) => Ok(Some(password)),
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(e) => Err(KeychainError::Keyring(e)),
            }
        })
        .await
        .map_err(|e| KeychainError::TaskFailed(e.to_string()))?
    }

    /// Stores the Google OAuth credentials for a mailbox user.
    pub async fn store_google_credentials(
        &self,
        user_id: &str,
        credentials: &GoogleCredentials,
    ) -> Result<()> {
        let json = serde_json::to_string(credentials)?;
        self.store(&Self::google_credentials_key(user_id), &json)
            .await
    }

    /// Loads the Google OAuth credentials for a mailbox user.
    pub async fn google_credentials(&self, user_id: &str) -> Result<GoogleCredentials> {
        let key = Self::google_credentials_key(user_id);
        let json = self
            .retrieve(&key)
            .await?
            .ok_or(KeychainError::NotFound(key))?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Returns the service name used for this keychain access.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Generates the keychain key for a user's Google OAuth credentials.
    pub fn google_credentials_key(user_id: &str) -> String {
        format!("google.oauth.{}", user_id)
    }
}

impl Default for KeychainAccess {
    fn default() -> Self {
        Self::new()
    }
}
