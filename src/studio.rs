//! Per-process studio context.
//!
//! `Studio` owns everything the UI layer manipulates: the editable prompt and
//! settings fields, the session token and the persistent ledgers. The token
//! lives only in memory and is never written to any store.

use crate::batch::{BatchOrchestrator, BatchOutcome, BatchProgress};
use crate::config::{StudioConfig, DATABASE_FILE};
use crate::error::{StoreError, StudioError};
use crate::nai_api::{ImageService, NovelAiClient};
use crate::prompt::PromptSet;
use crate::settings::{SettingsForm, SettingsPatch, SettingsSnapshot};
use crate::storage::{
    HistoryEntry, HistoryLedger, Preset, PresetBundle, PresetStore, SeedLedger, SqliteStore,
    Storage,
};
use std::path::Path;
use std::sync::Arc;

pub struct Studio {
    token: Option<String>,
    pub prompts: PromptSet,
    pub form: SettingsForm,
    history: HistoryLedger,
    seeds: SeedLedger,
    presets: PresetStore,
    orchestrator: BatchOrchestrator,
    last_seed: Option<i64>,
}

impl Studio {
    /// Opens the SQLite-backed studio in `data_dir`, creating it if needed.
    pub fn open(data_dir: &Path, config: &StudioConfig) -> Result<Self, StudioError> {
        std::fs::create_dir_all(data_dir).map_err(StoreError::from)?;
        let db_path = data_dir.join(DATABASE_FILE);
        let store = SqliteStore::open(&db_path, config.pool_size())?;
        let client = NovelAiClient::new(&config.endpoint, config.request_timeout())?;
        log::info!(
            "Opened studio at {} (endpoint {})",
            db_path.display(),
            client.endpoint()
        );

        Ok(Self::with_service(
            Storage::new(Arc::new(store)),
            Arc::new(client),
            config,
        ))
    }

    pub fn with_service(
        storage: Storage,
        service: Arc<dyn ImageService>,
        config: &StudioConfig,
    ) -> Self {
        let history = HistoryLedger::new(storage.clone());
        let seeds = SeedLedger::new(storage.clone());
        let orchestrator = BatchOrchestrator::new(service, history.clone(), seeds.clone())
            .with_model(config.model.clone())
            .with_thumbnail_options(config.thumbnail_options());

        Self {
            token: None,
            prompts: PromptSet::default(),
            form: SettingsForm::default(),
            history,
            seeds,
            presets: PresetStore::new(storage),
            orchestrator,
            last_seed: None,
        }
    }

    /// Studio with process-local stores and default configuration.
    pub fn in_memory(service: Arc<dyn ImageService>) -> Self {
        Self::with_service(Storage::in_memory(), service, &StudioConfig::default())
    }

    pub fn set_token(&mut self, token: &str) {
        let token = token.trim();
        self.token = (!token.is_empty()).then(|| token.to_string());
    }

    pub fn clear_token(&mut self) {
        self.token = None;
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    pub fn settings(&self) -> SettingsSnapshot {
        self.form.capture()
    }

    /// Seed of the last image produced by this session.
    pub fn last_seed(&self) -> Option<i64> {
        self.last_seed
    }

    pub async fn generate(&mut self) -> BatchOutcome {
        self.generate_with_progress(|_| {}).await
    }

    pub async fn generate_with_progress<F>(&mut self, on_progress: F) -> BatchOutcome
    where
        F: FnMut(BatchProgress) + Send,
    {
        let settings = self.form.capture();
        let token = self.token.as_deref().unwrap_or_default();
        let outcome = self
            .orchestrator
            .generate_with_progress(
                token,
                &self.prompts.main,
                &self.prompts.character,
                &self.prompts.negative,
                &settings,
                on_progress,
            )
            .await;

        if let Some(image) = outcome.images.last() {
            self.last_seed = Some(image.seed());
        }
        outcome
    }

    pub fn clipboard_text(&self) -> String {
        self.prompts.clipboard_text()
    }

    pub fn reset_settings(&mut self) {
        self.form.reset();
    }

    pub fn apply_seed(&mut self, seed: i64) {
        self.form.seed = seed.to_string();
    }

    pub fn presets(&self) -> Vec<Preset> {
        self.presets.list()
    }

    pub fn preset_store(&self) -> &PresetStore {
        &self.presets
    }

    /// Saves the current prompts and settings under `name`.
    pub fn save_preset(&self, name: &str) -> Result<Preset, StoreError> {
        let bundle = PresetBundle {
            prompts: self.prompts.clone(),
            settings: SettingsPatch::from(&self.form.capture()),
        };
        self.presets.save(name, bundle)
    }

    /// Applies the preset called `name` to the prompts and form. Returns the
    /// preset, or `None` when no preset has that name.
    pub fn load_preset(&mut self, name: &str) -> Option<Preset> {
        let preset = self.presets.load(name)?;
        self.prompts = preset.prompts.clone();
        self.form.restore(&preset.settings);
        Some(preset)
    }

    pub fn delete_preset(&self, name: &str) -> Result<(), StoreError> {
        self.presets.delete(name)
    }

    pub fn clear_presets(&self) -> Result<(), StoreError> {
        self.presets.clear()
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history.list()
    }

    /// Restores prompts and settings from history entry `index`, with the
    /// batch size set back to one.
    pub fn load_history_entry(&mut self, index: usize) -> Option<HistoryEntry> {
        let entry = self.history.get(index)?;
        self.prompts = entry.prompts();
        self.form.restore(&entry.settings_patch());
        Some(entry)
    }

    pub fn seeds(&self) -> Vec<i64> {
        self.seeds.list()
    }

    /// Clears the history and the seed list together.
    pub fn clear_history(&self) -> Result<(), StoreError> {
        self.history.clear()?;
        self.seeds.clear()
    }
}
