use crate::error::{StudioError, StudioResult};
use crate::state::library::{Library, DEFAULT_CAPACITY_BYTES};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub video: VideoConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub image_model: String,
    pub video_model: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".into(),
            api_key: None,
            image_model: "gemini-2.5-flash-image-preview".into(),
            video_model: "veo-2.0-generate-001".into(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for masterbot.db; the platform data dir when unset
    pub data_dir: Option<PathBuf>,
    pub capacity_bytes: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            capacity_bytes: DEFAULT_CAPACITY_BYTES,
        }
    }
}

impl StorageConfig {
    pub fn db_path(&self) -> StudioResult<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.join("masterbot.db")),
            None => Library::default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub poll_interval_secs: u64,
    pub max_attempts: u32,
    pub message_interval_secs: u64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            max_attempts: 60,
            message_interval_secs: 15,
        }
    }
}

impl VideoConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn message_interval(&self) -> Duration {
        Duration::from_secs(self.message_interval_secs)
    }
}

/// Layer `masterbot.toml`, an optional explicit file and `MASTERBOT__*` env vars.
pub fn load_config(path: Option<&Path>) -> StudioResult<AppConfig> {
    let mut builder = Config::builder()
        .add_source(File::with_name("masterbot").required(false));

    if let Some(path) = path {
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("MASTERBOT").separator("__"));

    let config = builder
        .build()
        .map_err(|err| StudioError::Config(err.to_string()))?;

    let parsed: AppConfig = config
        .try_deserialize()
        .map_err(|err| StudioError::Config(err.to_string()))?;

    if parsed.video.max_attempts == 0 {
        return Err(StudioError::Config("video.max_attempts must be at least 1".into()));
    }
    if parsed.video.message_interval_secs == 0 {
        return Err(StudioError::Config("video.message_interval_secs must be at least 1".into()));
    }

    Ok(parsed)
}
