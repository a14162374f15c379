//! Application settings and configuration types.
//!
//! Settings are persisted to `~/.config/classcal/settings.json` (or the
//! platform equivalent) and loaded once at startup. The resulting [`Settings`]
//! value is passed explicitly into the sync and poll services.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Settings file name inside the config directory.
const SETTINGS_FILE: &str = "settings.json";

/// State file name inside the data directory.
const STATE_FILE: &str = "state.json";

/// Errors that can occur while loading or validating settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid setting: {0}")]
    Invalid(String),

    #[error("Could not determine a home directory for settings")]
    NoHomeDir,
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Top-level application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Mailbox query settings.
    pub mail: MailSettings,
    /// Target calendar settings.
    pub calendar: CalendarSettings,
    /// Poll and persistence settings.
    pub sync: SyncSettings,
    /// Confirmation template settings.
    pub extractor: ExtractorSettings,
    /// Credential lookup settings.
    pub auth: AuthSettings,
}

impl Settings {
    /// Returns the default settings file location.
    pub fn default_path() -> Result<PathBuf> {
        Ok(project_dirs()?.config_dir().join(SETTINGS_FILE))
    }

    /// Loads settings from `path`, falling back to defaults if it does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No settings file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Writes settings to `path` as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(io_err)
    }

    /// Checks that the settings can drive a sync.
    pub fn validate(&self) -> Result<()> {
        if self.mail.sender.trim().is_empty() {
            return Err(ConfigError::Invalid("mail.sender must be set".to_string()));
        }
        if self.calendar.calendar_id.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "calendar.calendar_id must not be empty".to_string(),
            ));
        }
        if self.sync.poll_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "sync.poll_interval_seconds must be positive".to_string(),
            ));
        }
        if self.calendar.event_duration_minutes == 0 {
            return Err(ConfigError::Invalid(
                "calendar.event_duration_minutes must be positive".to_string(),
            ));
        }
        if self.calendar.timezone.parse::<Tz>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "unknown timezone: {}",
                self.calendar.timezone
            )));
        }
        if self.extractor.marker.is_empty() {
            return Err(ConfigError::Invalid(
                "extractor.marker must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the state file location, defaulting to the data directory.
    pub fn state_path(&self) -> Result<PathBuf> {
        match &self.sync.state_path {
            Some(path) => Ok(path.clone()),
            None => Ok(project_dirs()?.data_dir().join(STATE_FILE)),
        }
    }
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("io", "classcal", "classcal").ok_or(ConfigError::NoHomeDir)
}

/// Mailbox query configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailSettings {
    /// Sender address the confirmations come from.
    pub sender: String,
    /// Fixed subject substring of the confirmations.
    pub subject: String,
    /// Mailbox user; "me" is the authenticated user.
    pub user_id: String,
}

impl Default for MailSettings {
    fn default() -> Self {
        Self {
            sender: String::new(),
            subject: "Potwierdzenie rezerwacji".to_string(),
            user_id: "me".to_string(),
        }
    }
}

/// Target calendar configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarSettings {
    /// Calendar that receives the events.
    pub calendar_id: String,
    /// IANA zone the extracted local times are in.
    pub timezone: String,
    /// Length of each created event.
    pub event_duration_minutes: u32,
    /// Whether events use the calendar's default reminders.
    pub use_default_reminders: bool,
}

impl Default for CalendarSettings {
    fn default() -> Self {
        Self {
            calendar_id: "primary".to_string(),
            timezone: "Europe/Warsaw".to_string(),
            event_duration_minutes: 90,
            use_default_reminders: true,
        }
    }
}

/// When the sync store is written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushPolicy {
    /// After every recorded message.
    PerItem,
    /// Once at the end of each pass.
    PerPass,
}

/// Poll loop and persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Seconds to wait between passes.
    pub poll_interval_seconds: u64,
    /// Override for the state file location.
    pub state_path: Option<PathBuf>,
    /// Store flush granularity.
    pub flush: FlushPolicy,
}

impl SyncSettings {
    /// Returns the poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 5,
            state_path: None,
            flush: FlushPolicy::PerItem,
        }
    }
}

/// Confirmation template configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorSettings {
    /// Substring that identifies the booking service's template.
    pub marker: String,
    /// chrono format of the date field.
    pub date_format: String,
    /// chrono format of the time field.
    pub time_format: String,
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            marker: "Zdrofit".to_string(),
            date_format: "%d-%m-%Y".to_string(),
            time_format: "%H:%M".to_string(),
        }
    }
}

/// Credential lookup configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Keychain service the OAuth credentials are stored under.
    pub keychain_service: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            keychain_service: "io.classcal.app".to_string(),
        }
    }
}
