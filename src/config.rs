use crate::nai_api::{DEFAULT_ENDPOINT, DEFAULT_MODEL};
use crate::thumbnail::{ThumbnailOptions, THUMB_JPEG_QUALITY_DEFAULT, THUMB_SIZE_DEFAULT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE: &str = "studio_config.json";
pub const DATABASE_FILE: &str = "nai_studio.db";
const DATA_DIR_NAME: &str = "nai-studio";

const THUMB_JPEG_QUALITY_MIN: u8 = 40;
const THUMB_JPEG_QUALITY_MAX: u8 = 95;
const DB_POOL_SIZE_DEFAULT: u32 = 4;
const DB_POOL_SIZE_MIN: u32 = 1;
const DB_POOL_SIZE_MAX: u32 = 32;

/// Process-level settings. Missing fields take their defaults, so an empty
/// `{}` file is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudioConfig {
    pub endpoint: String,
    pub model: String,
    /// Transport timeout per request. Unset means requests wait indefinitely.
    pub request_timeout_secs: Option<u64>,
    pub thumbnail_size: u32,
    pub thumbnail_jpeg_quality: u8,
    pub db_pool_size: u32,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            request_timeout_secs: None,
            thumbnail_size: THUMB_SIZE_DEFAULT,
            thumbnail_jpeg_quality: THUMB_JPEG_QUALITY_DEFAULT,
            db_pool_size: DB_POOL_SIZE_DEFAULT,
        }
    }
}

impl StudioConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn thumbnail_options(&self) -> ThumbnailOptions {
        ThumbnailOptions {
            max_edge: self.thumbnail_size.max(1),
            jpeg_quality: self
                .thumbnail_jpeg_quality
                .clamp(THUMB_JPEG_QUALITY_MIN, THUMB_JPEG_QUALITY_MAX),
        }
    }

    pub fn pool_size(&self) -> u32 {
        self.db_pool_size.clamp(DB_POOL_SIZE_MIN, DB_POOL_SIZE_MAX)
    }

    /// Applies `NAI_STUDIO_*` environment overrides on top of the file values.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = non_empty(lookup("NAI_STUDIO_ENDPOINT")) {
            self.endpoint = endpoint;
        }
        if let Some(model) = non_empty(lookup("NAI_STUDIO_MODEL")) {
            self.model = model;
        }
        if let Some(quality) = parse_env::<u8>(&lookup, "NAI_STUDIO_THUMB_JPEG_QUALITY") {
            self.thumbnail_jpeg_quality =
                quality.clamp(THUMB_JPEG_QUALITY_MIN, THUMB_JPEG_QUALITY_MAX);
        }
        if let Some(size) = parse_env::<u32>(&lookup, "NAI_STUDIO_THUMB_SIZE") {
            self.thumbnail_size = size.max(1);
        }
        if let Some(pool_size) = parse_env::<u32>(&lookup, "NAI_STUDIO_DB_POOL_SIZE") {
            self.db_pool_size = pool_size.clamp(DB_POOL_SIZE_MIN, DB_POOL_SIZE_MAX);
        }
        self
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_env<T: std::str::FromStr>(
    lookup: &dyn Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = non_empty(lookup(key))?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("Ignoring invalid {}={:?}", key, raw);
            None
        }
    }
}

/// Per-user data directory, falling back to the working directory when the
/// platform reports none.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(DATA_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(".").join(DATA_DIR_NAME))
}

/// Reads a config file. A missing or unreadable file yields the defaults.
pub fn load_config(path: &Path) -> StudioConfig {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => return StudioConfig::default(),
    };

    serde_json::from_str::<StudioConfig>(&content).unwrap_or_else(|error| {
        log::warn!(
            "Ignoring malformed config {}: {}",
            path.display(),
            error
        );
        StudioConfig::default()
    })
}

pub fn persist_config(path: &Path, config: &StudioConfig) -> Result<(), crate::error::StoreError> {
    let payload = serde_json::to_string_pretty(config)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, payload)?;
    Ok(())
}
