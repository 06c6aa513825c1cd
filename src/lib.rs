//! Batch image generation against the NovelAI image endpoint, with local
//! history, seed and preset persistence.
//!
//! The entry point for a UI layer is [`Studio`]; the pieces it is built from
//! are public for callers that want a different arrangement.

pub mod batch;
pub mod config;
pub mod error;
pub mod nai_api;
pub mod png_meta;
pub mod prompt;
pub mod settings;
pub mod storage;
pub mod studio;
pub mod thumbnail;

pub use batch::{BatchOrchestrator, BatchOutcome, BatchProgress, BatchStage, GeneratedImage};
pub use config::{load_config, persist_config, StudioConfig};
pub use error::{GenerateError, ServiceError, StoreError, StudioError, ThumbnailError};
pub use nai_api::{GenerationPayload, ImageBytes, ImageService, NovelAiClient};
pub use prompt::{combine, PromptSet};
pub use settings::{SettingsForm, SettingsPatch, SettingsSnapshot, SizePreset};
pub use studio::Studio;

use chrono::SecondsFormat;

/// Initializes `env_logger` from `RUST_LOG`. Safe to call more than once.
pub fn init_logging() {
    if env_logger::try_init().is_ok() {
        log::debug!("Logging initialized");
    }
}

/// Opens the studio in the default data directory, reading
/// `studio_config.json` there and applying environment overrides.
pub fn open_default() -> Result<Studio, StudioError> {
    let data_dir = config::default_data_dir();
    let config = load_config(&data_dir.join(config::CONFIG_FILE)).with_env_overrides();
    Studio::open(&data_dir, &config)
}

/// Current UTC time as an ISO-8601 string with millisecond precision.
pub(crate) fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
