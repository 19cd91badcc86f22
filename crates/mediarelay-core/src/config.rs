//! Configuration and settings management
//!
//! Loads layered settings (files, then environment) and defines runtime constants.

use chrono_tz::Tz;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while loading or validating settings
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Error from the layered configuration loader
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    /// A numeric setting is outside its allowed range
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        /// Dotted path of the offending field
        field: &'static str,
        /// Value that was supplied
        value: u64,
        /// Inclusive lower bound
        min: u64,
        /// Inclusive upper bound
        max: u64,
    },
    /// The configured timezone is not a known IANA name
    #[error("Unknown timezone: {0}")]
    Timezone(String),
}

/// Process-wide settings: bot credential and poll intervals
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct GeneralSettings {
    /// Telegram Bot API token
    pub bot_token: String,
    /// IANA timezone used for footers and ETAs
    pub timezone: String,
    /// Streams poll interval in seconds
    pub update_seconds: u64,
    /// Statistics poll interval in seconds
    pub stats_update_seconds: u64,
    /// Downloads poll interval in seconds
    pub qb_update_seconds: u64,
    /// Library channel title refresh interval in seconds
    pub library_update_seconds: u64,
    /// File holding the slot -> message id mapping
    pub message_id_file: PathBuf,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            timezone: "Europe/Stockholm".to_string(),
            update_seconds: 60,
            stats_update_seconds: 86_400,
            qb_update_seconds: 120,
            library_update_seconds: 3600,
            message_id_file: PathBuf::from("/data/message_ids.json"),
        }
    }
}

/// Live streams feature
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct StreamsSettings {
    /// Chat that receives the streams summary
    pub channel_id: Option<i64>,
    /// Attach poster previews resolved through Radarr/Sonarr
    pub post_thumbnails: bool,
}

impl Default for StreamsSettings {
    fn default() -> Self {
        Self {
            channel_id: None,
            post_thumbnails: true,
        }
    }
}

/// Chats whose titles mirror library counts
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct LibraryChannels {
    /// Chat titled with the movie count
    pub movies_channel: Option<i64>,
    /// Chat titled with the TV show count
    pub tv_shows_channel: Option<i64>,
    /// Chat titled with the user count
    pub user_count_channel: Option<i64>,
}

impl LibraryChannels {
    /// Returns `true` if at least one title channel is configured
    #[must_use]
    pub const fn any(&self) -> bool {
        self.movies_channel.is_some()
            || self.tv_shows_channel.is_some()
            || self.user_count_channel.is_some()
    }
}

/// Daily statistics feature
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct StatsSettings {
    /// Chat that receives the statistics summary
    pub channel_id: Option<i64>,
}

/// Radarr/Sonarr endpoints used for poster lookups
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct ArrSettings {
    /// Radarr base URL
    pub radarr_host: Option<String>,
    /// Radarr API key
    pub radarr_api_key: Option<String>,
    /// Sonarr base URL
    pub sonarr_host: Option<String>,
    /// Sonarr API key
    pub sonarr_api_key: Option<String>,
}

impl ArrSettings {
    /// Returns `true` if Radarr or Sonarr is fully configured
    #[must_use]
    pub fn any(&self) -> bool {
        (is_set(self.radarr_host.as_deref()) && is_set(self.radarr_api_key.as_deref()))
            || (is_set(self.sonarr_host.as_deref()) && is_set(self.sonarr_api_key.as_deref()))
    }
}

/// qBittorrent Web API access and the downloads feature
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct QbitSettings {
    /// Web UI base URL, e.g. `http://qbittorrent:8080`
    pub host: Option<String>,
    /// Web UI user
    pub username: Option<String>,
    /// Web UI password
    pub password: Option<String>,
    /// Chat that receives the downloads summary
    pub channel_id: Option<i64>,
}

/// Tautulli API access
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct TautulliSettings {
    /// Tautulli base URL
    pub url: Option<String>,
    /// Tautulli API key
    pub api_key: Option<String>,
}

/// Application settings
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    /// Credential, timezone and intervals
    pub general: GeneralSettings,
    /// Live streams feature
    pub streams: StreamsSettings,
    /// Library count chat titles
    pub library_channels: LibraryChannels,
    /// Statistics feature
    pub stats: StatsSettings,
    /// Poster lookups
    pub arr: ArrSettings,
    /// qBittorrent and the downloads feature
    pub qbit: QbitSettings,
    /// Tautulli access
    pub tautulli: TautulliSettings,
}

/// Returns `true` when an optional string setting holds a non-blank value
#[must_use]
pub fn is_set(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

/// Build the layered configuration source.
///
/// Order: `config/default`, `config/{RUN_MODE}`, `config/local`, the file named
/// by `MEDIARELAY_CONFIG`, then `APP__*` environment variables.
///
/// # Errors
///
/// Returns a `ConfigError` if a present source cannot be parsed.
pub fn build_config() -> Result<Config, ConfigError> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

    let mut builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
        // Local overrides, not checked into git
        .add_source(File::with_name("config/local").required(false));

    if let Ok(path) = std::env::var("MEDIARELAY_CONFIG") {
        if !path.is_empty() {
            builder = builder.add_source(File::with_name(&path).required(false));
        }
    }

    // Eg. `APP__GENERAL__BOT_TOKEN=123:abc`
    builder
        .add_source(
            Environment::with_prefix("APP")
                .prefix_separator("__")
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        )
        .build()
}

impl Settings {
    /// Load and validate settings from files and environment
    ///
    /// # Errors
    ///
    /// Returns a `SettingsError` if loading fails or a value is out of range.
    pub fn new() -> Result<Self, SettingsError> {
        let settings: Self = build_config()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check interval bounds and the timezone name
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let g = &self.general;
        check_range("general.update_seconds", g.update_seconds, 10, 3600)?;
        check_range(
            "general.stats_update_seconds",
            g.stats_update_seconds,
            300,
            604_800,
        )?;
        check_range("general.qb_update_seconds", g.qb_update_seconds, 10, 3600)?;
        check_range(
            "general.library_update_seconds",
            g.library_update_seconds,
            60,
            604_800,
        )?;
        g.timezone
            .parse::<Tz>()
            .map_err(|_| SettingsError::Timezone(g.timezone.clone()))?;
        Ok(())
    }

    /// Configured timezone, UTC if the name does not parse
    #[must_use]
    pub fn timezone(&self) -> Tz {
        self.general.timezone.parse().unwrap_or(chrono_tz::UTC)
    }

    /// Returns the trimmed bot token, or `None` when it is blank
    #[must_use]
    pub fn bot_token(&self) -> Option<&str> {
        let token = self.general.bot_token.trim();
        (!token.is_empty()).then_some(token)
    }
}

fn check_range(field: &'static str, value: u64, min: u64, max: u64) -> Result<(), SettingsError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(SettingsError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

/// Last error recorded when the supervisor is started without a credential
pub const MISSING_TOKEN_ERROR: &str = "Bot token not set";

/// Timeout applied to every outbound HTTP call
pub const HTTP_TIMEOUT_SECS: u64 = 10;
/// Initial delay of the remote client backoff
pub const REMOTE_BACKOFF_INITIAL_SECS: u64 = 5;
/// Upper bound of the remote client backoff
pub const REMOTE_BACKOFF_MAX_SECS: u64 = 300;
/// Interval between connection liveness probes
pub const HEARTBEAT_INTERVAL_SECS: u64 = 60;
/// Consecutive failed probes after which the connection counts as lost
pub const HEARTBEAT_MAX_FAILURES: u32 = 5;

// Transport API retry (send/edit), in milliseconds
/// First retry delay for transport calls
pub const TRANSPORT_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Maximum retry delay for transport calls
pub const TRANSPORT_API_MAX_BACKOFF_MS: u64 = 4000;
/// Attempts after the first failure
pub const TRANSPORT_API_MAX_RETRIES: usize = 3;

/// Telegram allows 4096 characters; keep a margin for the truncation marker
pub const MAX_MESSAGE_CHARS: usize = 4000;
/// Sessions shown in the streams summary
pub const STREAMS_MAX_SESSIONS: usize = 6;
/// Torrents shown in the downloads summary
pub const DOWNLOADS_MAX_TORRENTS: usize = 10;
/// Rows per block in the statistics summary
pub const STATS_ROWS: usize = 5;

/// Get the HTTP timeout from env or default.
///
/// Environment variable: `HTTP_TIMEOUT_SECS`.
#[must_use]
pub fn get_http_timeout_secs() -> u64 {
    std::env::var("HTTP_TIMEOUT_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(HTTP_TIMEOUT_SECS)
}

/// Get the heartbeat interval from env or default.
///
/// Environment variable: `HEARTBEAT_INTERVAL_SECS`.
#[must_use]
pub fn get_heartbeat_interval_secs() -> u64 {
    std::env::var("HEARTBEAT_INTERVAL_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(HEARTBEAT_INTERVAL_SECS)
}
