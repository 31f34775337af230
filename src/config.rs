use directories::ProjectDirs;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config directory not found")]
    NoConfigDir,
    #[error("config file not found at {0}")]
    NotFound(PathBuf),
    #[error("failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("validation failed: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
    #[serde(default)]
    pub slideshow: SlideshowConfig,
    #[serde(default)]
    pub sponsorblock: SponsorblockConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub filters: FiltersConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub name: Option<String>,
    pub url: String,
    pub api_key: String,
    pub user_id: String,
}

impl ServerConfig {
    /// Stable identifier for cache keys; falls back to the URL when unnamed.
    pub fn id(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.url)
    }
}

/// Timings and sizing of the rotating media bar. Recomputed from config on
/// each load, immutable for the lifetime of a session.
#[derive(Debug, Clone, Deserialize)]
pub struct SlideshowConfig {
    #[serde(default = "default_rotation_interval_ms")]
    pub rotation_interval_ms: u64,
    #[serde(default = "default_fade_duration_ms")]
    pub fade_duration_ms: u64,
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    #[serde(default = "default_preload_count")]
    pub preload_count: usize,
}

impl Default for SlideshowConfig {
    fn default() -> Self {
        Self {
            rotation_interval_ms: default_rotation_interval_ms(),
            fade_duration_ms: default_fade_duration_ms(),
            max_items: default_max_items(),
            preload_count: default_preload_count(),
        }
    }
}

fn default_rotation_interval_ms() -> u64 {
    8000
}

fn default_fade_duration_ms() -> u64 {
    400
}

fn default_max_items() -> usize {
    10
}

fn default_preload_count() -> usize {
    2
}

#[derive(Debug, Clone, Deserialize)]
pub struct SponsorblockConfig {
    #[serde(default = "default_sponsorblock_url")]
    pub base_url: String,
    #[serde(default = "default_skip_categories")]
    pub categories: Vec<String>,
}

impl Default for SponsorblockConfig {
    fn default() -> Self {
        Self {
            base_url: default_sponsorblock_url(),
            categories: default_skip_categories(),
        }
    }
}

fn default_sponsorblock_url() -> String {
    "https://sponsor.ajay.app".to_string()
}

fn default_skip_categories() -> Vec<String> {
    ["sponsor", "intro", "outro"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractorConfig {
    #[serde(default = "default_extractor_url")]
    pub base_url: String,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            base_url: default_extractor_url(),
        }
    }
}

fn default_extractor_url() -> String {
    "https://inv.nadeko.net".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FiltersConfig {
    /// Official ratings whose items are dropped from the media bar.
    #[serde(default)]
    pub blocked_ratings: Vec<String>,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &PathBuf) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.clone()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn config_path() -> Result<PathBuf, ConfigError> {
        ProjectDirs::from("", "", "mediabar")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .ok_or(ConfigError::NoConfigDir)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.servers.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one [[servers]] entry is required".to_string(),
            ));
        }

        for server in &self.servers {
            let url = server.url.trim_end_matches('/');
            if url.is_empty() {
                return Err(ConfigError::ValidationError(
                    "servers.url cannot be empty".to_string(),
                ));
            }
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::ValidationError(
                    "servers.url must start with http:// or https://".to_string(),
                ));
            }
            if server.api_key.is_empty() {
                return Err(ConfigError::ValidationError(
                    "servers.api_key cannot be empty".to_string(),
                ));
            }
            if server.user_id.is_empty() {
                return Err(ConfigError::ValidationError(
                    "servers.user_id cannot be empty".to_string(),
                ));
            }
        }

        if self.slideshow.max_items == 0 {
            return Err(ConfigError::ValidationError(
                "slideshow.max_items must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
