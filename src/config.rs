//! Application-level configuration loading: teamspace lifetime, operation budget and
//! notification delivery policy.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, DurationSeconds, serde_as};
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "PARTY_MATCHING_CONFIG_PATH";

const DEFAULT_TEAMSPACE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_NOTIFICATION_ATTEMPTS: u32 = 3;
const DEFAULT_NOTIFICATION_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Lifetime of teamspace records and membership claims, refreshed on every write.
    pub teamspace_ttl: Duration,
    /// Upper bound for one lifecycle operation against the store.
    pub operation_timeout: Duration,
    /// Outbox retry policy and strict reporting.
    pub notifications: NotificationSettings,
}

#[derive(Debug, Clone)]
/// How observer notifications are delivered after a committed change.
pub struct NotificationSettings {
    /// Fail the request with `NOTIFICATION_FAILED` when an observer could not be reached.
    pub strict: bool,
    /// Redelivery attempts made by the outbox before giving up.
    pub max_attempts: u32,
    /// Delay before the first redelivery; doubled after each attempt.
    pub initial_delay: Duration,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(app_config) => {
                    info!(
                        path = %path.display(),
                        ttl_secs = app_config.teamspace_ttl.as_secs(),
                        strict_notifications = app_config.notifications.strict,
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a JSON configuration document; omitted fields keep their defaults.
    pub fn from_json(contents: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

impl Default for NotificationSettings {
    fn default() -> Self {
        RawNotifications::default().into()
    }
}

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "teamspaceTtlSecs")]
    teamspace_ttl: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "operationTimeoutMs")]
    operation_timeout: Duration,
    notifications: RawNotifications,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            teamspace_ttl: DEFAULT_TEAMSPACE_TTL,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            notifications: RawNotifications::default(),
        }
    }
}

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawNotifications {
    strict: bool,
    max_attempts: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "initialDelayMs")]
    initial_delay: Duration,
}

impl Default for RawNotifications {
    fn default() -> Self {
        Self {
            strict: false,
            max_attempts: DEFAULT_NOTIFICATION_ATTEMPTS,
            initial_delay: DEFAULT_NOTIFICATION_DELAY,
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            teamspace_ttl: value.teamspace_ttl,
            operation_timeout: value.operation_timeout,
            notifications: value.notifications.into(),
        }
    }
}

impl From<RawNotifications> for NotificationSettings {
    fn from(value: RawNotifications) -> Self {
        Self {
            strict: value.strict,
            max_attempts: value.max_attempts,
            initial_delay: value.initial_delay,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
