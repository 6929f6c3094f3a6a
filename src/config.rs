//! Persistent application configuration model and defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};

const CONFIG_FILE_NAME: &str = "config.toml";
const MIN_CONCURRENT_FETCHES: usize = 1;
const MAX_CONCURRENT_FETCHES: usize = 16;

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// On-disk layout for cached media and the favorites database.
    pub paths: PathsConfig,
    #[serde(default)]
    /// Remote search provider settings.
    pub provider: ProviderConfig,
    #[serde(default)]
    /// Download worker and timeout settings.
    pub fetch: FetchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PathsConfig {
    /// Explicit downloads.
    #[serde(default = "default_songs_dir")]
    pub songs_dir: PathBuf,
    /// Play cache; favorites are cached here before they are stored.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Ephemeral thumbnails, removed on shutdown.
    #[serde(default = "default_image_dir")]
    pub image_dir: PathBuf,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_endpoint")]
    pub endpoint: String,
    /// Catalog source forwarded as the `type` form field.
    #[serde(default = "default_provider_source")]
    pub source: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct FetchConfig {
    /// Upper bound on simultaneous background downloads.
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    #[serde(default = "default_audio_timeout_secs")]
    pub audio_timeout_secs: u64,
    #[serde(default = "default_image_timeout_secs")]
    pub image_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LoggingConfig {
    /// One of `error`, `warn`, `info`, `debug`, `trace`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_songs_dir() -> PathBuf {
    PathBuf::from("./songs")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./temp")
}

fn default_image_dir() -> PathBuf {
    PathBuf::from("./image")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./music.db")
}

fn default_provider_endpoint() -> String {
    "https://deqing.ricuo.com/".to_string()
}

fn default_provider_source() -> String {
    "netease".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/80.0.3987.87 Safari/537.36".to_string()
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_max_concurrent_fetches() -> usize {
    5
}

fn default_audio_timeout_secs() -> u64 {
    30
}

fn default_image_timeout_secs() -> u64 {
    20
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            songs_dir: default_songs_dir(),
            cache_dir: default_cache_dir(),
            image_dir: default_image_dir(),
            database_path: default_database_path(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: default_provider_endpoint(),
            source: default_provider_source(),
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: default_max_concurrent_fetches(),
            audio_timeout_secs: default_audio_timeout_secs(),
            image_timeout_secs: default_image_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl FetchConfig {
    pub fn worker_count(&self) -> usize {
        self.max_concurrent_fetches
            .clamp(MIN_CONCURRENT_FETCHES, MAX_CONCURRENT_FETCHES)
    }

    pub fn audio_timeout(&self) -> Duration {
        Duration::from_secs(self.audio_timeout_secs.max(1))
    }

    pub fn image_timeout(&self) -> Duration {
        Duration::from_secs(self.image_timeout_secs.max(1))
    }
}

impl LoggingConfig {
    pub fn level_filter(&self) -> log::LevelFilter {
        self.level
            .trim()
            .parse::<log::LevelFilter>()
            .unwrap_or(log::LevelFilter::Info)
    }
}

/// Errors raised while reading or writing `config.toml`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|path| path.join("freetune"))
}

pub fn config_file_path(config_dir: &Path) -> PathBuf {
    config_dir.join(CONFIG_FILE_NAME)
}

/// Loads `config.toml` from `config_dir`, writing the defaults when it is missing.
pub fn load_or_create(config_dir: &Path) -> Result<Config, ConfigError> {
    let path = config_file_path(config_dir);
    if !path.exists() {
        let config = Config::default();
        std::fs::create_dir_all(config_dir)?;
        std::fs::write(&path, toml::to_string_pretty(&config)?)?;
        info!("Wrote default configuration to {}", path.display());
        return Ok(config);
    }
    let content = std::fs::read_to_string(&path)?;
    let config: Config = toml::from_str(&content)?;
    if config.fetch.worker_count() != config.fetch.max_concurrent_fetches {
        warn!(
            "fetch.max_concurrent_fetches={} is out of range; using {}",
            config.fetch.max_concurrent_fetches,
            config.fetch.worker_count()
        );
    }
    Ok(config)
}
