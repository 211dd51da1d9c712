use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address the HTTP server binds to.
    #[serde(default = "Config::default_http_addr")]
    pub http_addr: String,
    /// Allowed CORS origins. Required unless cors_permissive is true.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Explicitly allow all origins (development only). Defaults to false.
    #[serde(default)]
    pub cors_permissive: bool,
    pub feed: FeedConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

/// Configuration for the live vehicle-positions feed.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Upstream API key. Required; there is no usable default.
    pub api_key: String,
    #[serde(default = "FeedConfig::default_base_url")]
    pub base_url: String,
    #[serde(default = "FeedConfig::default_resource_id")]
    pub resource_id: String,
    /// How often to poll vehicle positions (seconds). Defaults to 10.
    #[serde(default = "FeedConfig::default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Vehicles not observed for this long are evicted. Defaults to 300.
    #[serde(default = "FeedConfig::default_stale_after_secs")]
    pub stale_after_secs: u64,
    /// Zoom level used to derive vehicle tile IDs. Defaults to 14.
    #[serde(default = "FeedConfig::default_tile_zoom")]
    pub tile_zoom: u32,
    /// IANA timezone the feed's timestamps are local to. The upstream
    /// reports wall-clock strings without an offset, so this must match
    /// the operator's timezone, including DST transitions.
    #[serde(default = "FeedConfig::default_timezone")]
    pub timezone: String,
}

/// Configuration for the static schedule archive sync.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "ScheduleConfig::default_enabled")]
    pub enabled: bool,
    #[serde(default = "ScheduleConfig::default_url")]
    pub url: String,
    /// How often to re-download the archive (hours). Defaults to 24;
    /// the download uses conditional requests, so an unchanged archive
    /// transfers nothing.
    #[serde(default = "ScheduleConfig::default_update_interval_hours")]
    pub update_interval_hours: u64,
    /// Directory for the raw archive and parsed-snapshot caches.
    /// Empty means the OS temp dir (overridable via SCHEDULE_CACHE_DIR).
    #[serde(default)]
    pub cache_dir: String,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;
        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Log warnings for suspicious values. Nothing here is fatal; the
    /// service keeps running with what it has.
    pub fn validate(&self) {
        if self.feed.poll_interval_secs == 0 {
            warn!("feed.poll_interval_secs is 0, the upstream will be polled in a tight loop");
        }
        if self.feed.stale_after_secs < self.feed.poll_interval_secs {
            warn!(
                stale_after_secs = self.feed.stale_after_secs,
                poll_interval_secs = self.feed.poll_interval_secs,
                "stale_after is shorter than the poll interval, vehicles will flap"
            );
        }
        if self.feed.timezone.parse::<chrono_tz::Tz>().is_err() {
            warn!(
                timezone = %self.feed.timezone,
                "invalid IANA timezone, falling back to Europe/Warsaw"
            );
        }
        if self.schedule.enabled && !self.schedule.url.starts_with("https://") {
            warn!(url = %self.schedule.url, "schedule archive URL does not use HTTPS");
        }
    }

    fn default_http_addr() -> String {
        "0.0.0.0:8080".to_string()
    }
}

impl FeedConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    /// Parse the configured timezone, falling back to Europe/Warsaw.
    pub fn parsed_timezone(&self) -> chrono_tz::Tz {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .unwrap_or(chrono_tz::Europe::Warsaw)
    }

    fn default_base_url() -> String {
        "https://api.um.warszawa.pl/api/action/busestrams_get".to_string()
    }
    fn default_resource_id() -> String {
        "f2e5503e-927d-4ad3-9500-4ab9e55deb59".to_string()
    }
    fn default_poll_interval_secs() -> u64 {
        10
    }
    fn default_stale_after_secs() -> u64 {
        300
    }
    fn default_tile_zoom() -> u32 {
        14
    }
    fn default_timezone() -> String {
        "Europe/Warsaw".to_string()
    }
}

impl ScheduleConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_hours * 60 * 60)
    }

    fn default_enabled() -> bool {
        true
    }
    fn default_url() -> String {
        "https://mkuran.pl/gtfs/warsaw.zip".to_string()
    }
    fn default_update_interval_hours() -> u64 {
        24
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            url: Self::default_url(),
            update_interval_hours: Self::default_update_interval_hours(),
            cache_dir: String::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
}
