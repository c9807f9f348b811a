//! Configuration for the sync core.
//!
//! Handles loading, saving and validating the settings that drive the polling
//! intervals, retry budgets, playback timing and telemetry batching.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::logging::LoggingConfig;
use crate::model::DEFAULT_LIKED_SONGS_NAME;

/// Default remote API endpoint.
pub const DEFAULT_API_ENDPOINT: &str = "http://localhost:5000";

/// Default number of attempts a backoff loop makes before giving up.
pub const DEFAULT_TRY_COUNT_UNTIL_FOUND: u32 = 40;

/// Default batch size for liked-song seeding.
pub const DEFAULT_SEED_BATCH_SIZE: usize = 30;

/// Polling supervisor settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PollingConfig {
    /// Delay between spotify/slack connection checks (ms).
    pub connect_check_interval_ms: u64,
    /// Delay between device-triggered refresh checks (ms).
    pub device_refresh_interval_ms: u64,
    /// Delay before refreshing playlists after a successful connect (ms).
    pub post_connect_refresh_delay_ms: u64,
    /// Attempts a backoff loop makes before giving up.
    pub try_count_until_found: u32,
    /// Interval of the recurring device/player-context watch (ms).
    pub context_watch_interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            connect_check_interval_ms: 10_000,
            device_refresh_interval_ms: 1_000,
            post_connect_refresh_delay_ms: 2_000,
            try_count_until_found: DEFAULT_TRY_COUNT_UNTIL_FOUND,
            context_watch_interval_ms: 5_000,
        }
    }
}

impl PollingConfig {
    /// Connection check interval as a [`Duration`].
    #[must_use]
    pub const fn connect_check_interval(&self) -> Duration {
        Duration::from_millis(self.connect_check_interval_ms)
    }

    /// Device refresh interval as a [`Duration`].
    #[must_use]
    pub const fn device_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.device_refresh_interval_ms)
    }

    /// Post-connect playlist refresh delay as a [`Duration`].
    #[must_use]
    pub const fn post_connect_refresh_delay(&self) -> Duration {
        Duration::from_millis(self.post_connect_refresh_delay_ms)
    }

    /// Context watch interval as a [`Duration`].
    #[must_use]
    pub const fn context_watch_interval(&self) -> Duration {
        Duration::from_millis(self.context_watch_interval_ms)
    }
}

/// Playback state machine settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Time given to a freshly launched backend before the play command (ms).
    pub launch_settle_delay_ms: u64,
    /// Delay before the post-command device/context refresh (ms).
    pub post_play_refresh_delay_ms: u64,
    /// Cancel a superseded launch timer instead of letting it fire as a no-op.
    pub cancel_superseded_launch: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            launch_settle_delay_ms: 4_000,
            post_play_refresh_delay_ms: 1_000,
            cancel_superseded_launch: false,
        }
    }
}

impl PlaybackConfig {
    /// Launch settle delay as a [`Duration`].
    #[must_use]
    pub const fn launch_settle_delay(&self) -> Duration {
        Duration::from_millis(self.launch_settle_delay_ms)
    }

    /// Post-play refresh delay as a [`Duration`].
    #[must_use]
    pub const fn post_play_refresh_delay(&self) -> Duration {
        Duration::from_millis(self.post_play_refresh_delay_ms)
    }
}

/// Ordering applied to remote playlists before synthetic insertion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaylistSortOrder {
    /// Keep the order the remote returned (default).
    #[default]
    Remote,
    /// Case-insensitive alphabetical by name.
    Alphabetical,
}

/// Playlist reconciler settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlaylistConfig {
    /// Delay before retrying a failed playlist fetch (ms).
    pub fetch_retry_delay_ms: u64,
    /// Maximum consecutive retries of a failed playlist fetch.
    pub max_fetch_retries: u32,
    /// Sort order of remote playlists.
    pub sort_order: PlaylistSortOrder,
    /// Display name of the synthetic liked-songs playlist.
    pub liked_songs_name: String,
}

impl Default for PlaylistConfig {
    fn default() -> Self {
        Self {
            fetch_retry_delay_ms: 3_000,
            max_fetch_retries: 5,
            sort_order: PlaylistSortOrder::default(),
            liked_songs_name: DEFAULT_LIKED_SONGS_NAME.to_string(),
        }
    }
}

impl PlaylistConfig {
    /// Fetch retry delay as a [`Duration`].
    #[must_use]
    pub const fn fetch_retry_delay(&self) -> Duration {
        Duration::from_millis(self.fetch_retry_delay_ms)
    }
}

/// Telemetry settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Whether telemetry is sent at all.
    pub enabled: bool,
    /// Maximum records per session-seed call.
    pub seed_batch_size: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            seed_batch_size: DEFAULT_SEED_BATCH_SIZE,
        }
    }
}

/// Session cache settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionCacheConfig {
    /// Whether memoization is enabled.
    pub enabled: bool,
    /// Default time-to-live for entries (seconds).
    pub ttl_secs: u64,
}

impl Default for SessionCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 60,
        }
    }
}

impl SessionCacheConfig {
    /// Default TTL as a [`Duration`].
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Top-level configuration of the sync core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncConfig {
    /// Base URL of the remote backend.
    pub api_endpoint: String,
    /// Plugin identifier sent with heartbeats.
    #[serde(default = "default_plugin_id")]
    pub plugin_id: u32,
    /// Timeout applied to every remote request (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Polling supervisor settings.
    #[serde(default)]
    pub polling: PollingConfig,
    /// Playback state machine settings.
    #[serde(default)]
    pub playback: PlaybackConfig,
    /// Playlist reconciler settings.
    #[serde(default)]
    pub playlists: PlaylistConfig,
    /// Telemetry settings.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Session cache settings.
    #[serde(default)]
    pub cache: SessionCacheConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

const fn default_plugin_id() -> u32 {
    1
}

const fn default_request_timeout() -> u64 {
    15
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
            plugin_id: default_plugin_id(),
            request_timeout_secs: default_request_timeout(),
            polling: PollingConfig::default(),
            playback: PlaybackConfig::default(),
            playlists: PlaylistConfig::default(),
            telemetry: TelemetryConfig::default(),
            cache: SessionCacheConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from the default location, or create it if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let config_path = config_file_path();

        if !config_path.exists() {
            debug!("Config file not found, using defaults");
            let config = Self::default();
            if let Err(e) = config.save() {
                warn!("Failed to save default config: {}", e);
            }
            return Ok(config);
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::FileSystem {
            path: path.to_path_buf(),
            message: format!("Failed to read config file: {e}"),
        })?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Configuration(format!("Failed to parse config file: {e}")))?;
        config.validate()?;

        info!("Loaded config from {}", path.display());
        debug!("API endpoint: {}", config.api_endpoint);

        Ok(config)
    }

    /// Save configuration to the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be written.
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_file_path())
    }

    /// Save configuration to an explicit path.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory or file cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.exists()
        {
            fs::create_dir_all(parent).map_err(|e| Error::FileSystem {
                path: parent.to_path_buf(),
                message: format!("Failed to create config directory: {e}"),
            })?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).map_err(|e| Error::FileSystem {
            path: path.to_path_buf(),
            message: format!("Failed to write config file: {e}"),
        })?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Check values that would make the core misbehave.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if !(self.api_endpoint.starts_with("http://") || self.api_endpoint.starts_with("https://"))
        {
            return Err(Error::Configuration(format!(
                "API endpoint must be an http(s) URL: {}",
                self.api_endpoint
            )));
        }
        if self.telemetry.seed_batch_size == 0 {
            return Err(Error::Configuration(
                "Seed batch size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Request timeout as a [`Duration`].
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Get the path to the config file.
    #[must_use]
    pub fn config_file_path() -> PathBuf {
        config_file_path()
    }
}

/// Get the path to the config file.
fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("playsync")
        .join("config.json")
}
