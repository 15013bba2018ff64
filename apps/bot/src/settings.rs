use std::path::{Path, PathBuf};

use bot_core::EncryptedCommandPolicy;
use config::{Config, Environment, File, Map};
use serde::Deserialize;
use shared::domain::UserId;
use thiserror::Error;
use url::Url;

pub const ENV_PREFIX: &str = "BOT";
pub const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load settings from {}: {source}", .path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: config::ConfigError,
    },
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub homeserver: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_device_name")]
    pub device_name: String,
    #[serde(default)]
    pub welcome_text: Option<String>,
    pub commander: UserId,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub encrypted_commands: EncryptedCommandPolicy,
    #[serde(default = "default_sync_timeout_ms")]
    pub sync_timeout_ms: u64,
    /// Saved session plus the client's state and crypto databases.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
}

fn default_device_name() -> String {
    "room-bot".into()
}

fn default_log_level() -> String {
    "info".into()
}

fn default_sync_timeout_ms() -> u64 {
    30_000
}

fn default_store_path() -> PathBuf {
    PathBuf::from("bot-store")
}

impl Settings {
    /// Empty or missing text disables the startup broadcast.
    pub fn welcome_text(&self) -> Option<&str> {
        self.welcome_text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }

    fn validate(self) -> Result<Self, ConfigError> {
        let homeserver = Url::parse(self.homeserver.trim()).map_err(|err| ConfigError::Invalid {
            field: "homeserver",
            reason: err.to_string(),
        })?;
        if !matches!(homeserver.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid {
                field: "homeserver",
                reason: format!("expected an http(s) url, got '{}'", self.homeserver),
            });
        }
        for (field, value) in [
            ("username", self.username.as_str()),
            ("password", self.password.as_str()),
            ("commander", self.commander.as_str()),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must not be empty".into(),
                });
            }
        }
        if self.store_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "store_path",
                reason: "must not be empty".into(),
            });
        }
        Ok(self)
    }
}

/// Loads `path` (format picked from its extension) with `BOT__*`
/// environment overrides on top.
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    load_settings_with_env(path, None)
}

/// Like [`load_settings`], but reads overrides from `env` instead of the
/// process environment when given.
pub fn load_settings_with_env(
    path: &Path,
    env: Option<Map<String, String>>,
) -> Result<Settings, ConfigError> {
    let load_error = |source| ConfigError::Load {
        path: path.to_path_buf(),
        source,
    };
    let settings: Settings = Config::builder()
        .add_source(File::from(path).required(true))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .try_parsing(true)
                .source(env),
        )
        .build()
        .map_err(load_error)?
        .try_deserialize()
        .map_err(load_error)?;
    settings.validate()
}

#[cfg(test)]
#[path = "tests/settings_tests.rs"]
mod tests;
