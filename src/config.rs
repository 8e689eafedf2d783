use crate::fetcher::MAX_FOLLOWING_PAGE_SIZE;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TWITTER_BASE_URL: &str = "https://api.twitter.com/2/";

const CONFIG_FILE_NAME: &str = "followwatch.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub twitter: TwitterConfig,
    #[serde(default)]
    pub collection: CollectionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TwitterConfig {
    #[serde(default)]
    pub bearer_token: String,
    /// Public list whose members are tracked
    #[serde(default)]
    pub list_id: String,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Records requested per following-list page
    pub page_size: Option<u32>,
    /// Estimated calls allowed per cooldown window
    pub call_budget: Option<u32>,
    pub cooldown_secs: Option<u64>,
    /// Distance in days between the compared snapshots
    pub window_days: Option<u32>,
    /// Snapshots are dated this many days before the run
    pub date_lag_days: Option<u32>,
    /// Distinct originators a target needs before it is reported
    pub min_originators: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: Option<String>,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            page_size: Some(1000),
            call_budget: Some(15),
            cooldown_secs: Some(900),
            window_days: Some(1),
            date_lag_days: Some(1),
            min_originators: Some(2),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: Some("data".to_string()),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Some("info".to_string()),
        }
    }
}

/// Read an environment variable and parse it, naming the variable on failure
fn env_parsed<T: FromStr>(name: &str, expected: &str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(format!("{name} must be {expected}"))),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Load configuration from TOML file with XDG directory support and environment variable overrides
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config_file = match config_path {
            Some(path) => path,
            None => Self::find_config_file(),
        };

        let mut config = if config_file.exists() {
            tracing::debug!("Loading config from: {}", config_file.display());
            let content = std::fs::read_to_string(&config_file)?;
            toml::from_str::<Config>(&content)?
        } else {
            tracing::debug!("No config file found, using environment variables only");
            Config {
                twitter: TwitterConfig::default(),
                collection: CollectionConfig::default(),
                storage: StorageConfig::default(),
                logging: LoggingConfig::default(),
            }
        };

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Find configuration file in the working directory, then the user config directory
    fn find_config_file() -> PathBuf {
        let current_dir_config = PathBuf::from(CONFIG_FILE_NAME);
        if current_dir_config.exists() {
            return current_dir_config;
        }

        let user_config_dir = env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(dirs::config_dir);

        if let Some(dir) = user_config_dir {
            let candidate = dir.join("followwatch").join(CONFIG_FILE_NAME);
            if candidate.exists() {
                return candidate;
            }
        }

        // May not exist; load() then falls back to the environment
        current_dir_config
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(token) = env::var("FOLLOWWATCH_TWITTER_BEARER_TOKEN") {
            self.twitter.bearer_token = token;
        }
        if let Ok(list_id) = env::var("FOLLOWWATCH_TWITTER_LIST_ID") {
            self.twitter.list_id = list_id;
        }
        if let Ok(base_url) = env::var("FOLLOWWATCH_TWITTER_BASE_URL") {
            self.twitter.base_url = Some(base_url);
        }

        if let Some(page_size) = env_parsed("FOLLOWWATCH_PAGE_SIZE", "a positive number")? {
            self.collection.page_size = Some(page_size);
        }
        if let Some(budget) = env_parsed("FOLLOWWATCH_CALL_BUDGET", "a positive number")? {
            self.collection.call_budget = Some(budget);
        }
        if let Some(cooldown) = env_parsed("FOLLOWWATCH_COOLDOWN_SECS", "a number of seconds")? {
            self.collection.cooldown_secs = Some(cooldown);
        }
        if let Some(days) = env_parsed("FOLLOWWATCH_WINDOW_DAYS", "a positive number")? {
            self.collection.window_days = Some(days);
        }
        if let Some(lag) = env_parsed("FOLLOWWATCH_DATE_LAG_DAYS", "a number of days")? {
            self.collection.date_lag_days = Some(lag);
        }
        if let Some(min) = env_parsed("FOLLOWWATCH_MIN_ORIGINATORS", "a positive number")? {
            self.collection.min_originators = Some(min);
        }

        if let Ok(data_dir) = env::var("FOLLOWWATCH_DATA_DIR") {
            self.storage.data_dir = Some(data_dir);
        }

        if let Ok(level) = env::var("FOLLOWWATCH_LOG_LEVEL") {
            self.logging.level = Some(level);
        }

        Ok(())
    }

    /// Validate that all required configuration is present
    fn validate(&self) -> Result<(), ConfigError> {
        if self.twitter.bearer_token.trim().is_empty() {
            return Err(ConfigError::MissingRequired(
                "twitter.bearer_token or FOLLOWWATCH_TWITTER_BEARER_TOKEN".to_string(),
            ));
        }

        if self.twitter.list_id.trim().is_empty() {
            return Err(ConfigError::MissingRequired(
                "twitter.list_id or FOLLOWWATCH_TWITTER_LIST_ID".to_string(),
            ));
        }

        if let Some(ref base_url) = self.twitter.base_url {
            url::Url::parse(base_url).map_err(|e| {
                ConfigError::InvalidValue(format!("twitter.base_url is not a valid URL: {e}"))
            })?;
        }

        let positive = [
            ("collection.page_size", self.collection.page_size.map(|v| v as u64)),
            ("collection.call_budget", self.collection.call_budget.map(|v| v as u64)),
            ("collection.window_days", self.collection.window_days.map(|v| v as u64)),
            (
                "collection.min_originators",
                self.collection.min_originators.map(|v| v as u64),
            ),
        ];
        for (name, value) in positive {
            if value == Some(0) {
                return Err(ConfigError::InvalidValue(format!(
                    "{name} must be at least 1"
                )));
            }
        }

        if let Some(page_size) = self.collection.page_size {
            if page_size > MAX_FOLLOWING_PAGE_SIZE {
                return Err(ConfigError::InvalidValue(format!(
                    "collection.page_size must be at most {MAX_FOLLOWING_PAGE_SIZE}"
                )));
            }
        }

        Ok(())
    }

    /// Get the API base URL with default fallback
    pub fn twitter_base_url(&self) -> &str {
        self.twitter
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_TWITTER_BASE_URL)
    }

    pub fn page_size(&self) -> u32 {
        self.collection.page_size.unwrap_or(1000)
    }

    pub fn call_budget(&self) -> u32 {
        self.collection.call_budget.unwrap_or(15)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.collection.cooldown_secs.unwrap_or(900))
    }

    pub fn window_days(&self) -> u32 {
        self.collection.window_days.unwrap_or(1)
    }

    pub fn date_lag_days(&self) -> u32 {
        self.collection.date_lag_days.unwrap_or(1)
    }

    pub fn min_originators(&self) -> usize {
        self.collection.min_originators.unwrap_or(2)
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(self.storage.data_dir.as_deref().unwrap_or("data"))
    }

    pub fn log_level(&self) -> &str {
        self.logging.level.as_deref().unwrap_or("info")
    }
}
