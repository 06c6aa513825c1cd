//! Named prompt + settings bundles saved by the user.

use super::{Storage, KEY_PRESETS};
use crate::error::StoreError;
use crate::prompt::PromptSet;
use crate::settings::SettingsPatch;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Content of a preset, without its name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresetBundle {
    pub prompts: PromptSet,
    pub settings: SettingsPatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    #[serde(default)]
    pub prompts: PromptSet,
    /// Partial on purpose: presets saved by older versions may lack fields.
    #[serde(default)]
    pub settings: SettingsPatch,
    #[serde(rename = "ts", default)]
    pub timestamp: String,
}

impl Preset {
    pub fn bundle(&self) -> PresetBundle {
        PresetBundle {
            prompts: self.prompts.clone(),
            settings: self.settings.clone(),
        }
    }

    /// One-line summary of the stored settings, `?` for missing fields.
    pub fn summary(&self) -> String {
        fn or_unknown<T: ToString>(value: Option<T>) -> String {
            value
                .map(|value| value.to_string())
                .unwrap_or_else(|| "?".to_string())
        }

        let settings = &self.settings;
        format!(
            "{}x{} steps {} cfg {} sampler {}",
            or_unknown(settings.width),
            or_unknown(settings.height),
            or_unknown(settings.steps),
            or_unknown(settings.cfg),
            or_unknown(settings.sampler.as_deref()),
        )
    }
}

/// Unbounded preset collection keyed by name, most recently saved first.
///
/// Not safe for concurrent writers; see the module docs of [`crate::storage`].
#[derive(Clone)]
pub struct PresetStore {
    storage: Storage,
}

impl PresetStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub fn list(&self) -> Vec<Preset> {
        self.storage.load_or_default(KEY_PRESETS)
    }

    /// Saves `bundle` under `name`, replacing any preset with the same name.
    /// The saved preset moves to the front.
    pub fn save(&self, name: &str, bundle: PresetBundle) -> Result<Preset, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::Validation(
                "Preset name must not be empty".to_string(),
            ));
        }

        let preset = Preset {
            name: name.to_string(),
            prompts: bundle.prompts,
            settings: bundle.settings,
            timestamp: crate::now_timestamp(),
        };

        let mut presets = self.list();
        presets.retain(|existing| existing.name != preset.name);
        presets.insert(0, preset.clone());
        self.storage.save(KEY_PRESETS, &presets)?;
        Ok(preset)
    }

    /// Names are matched after trimming, as they are on save.
    pub fn load(&self, name: &str) -> Option<Preset> {
        let name = name.trim();
        self.list().into_iter().find(|preset| preset.name == name)
    }

    /// Removes the preset called `name`. Deleting an unknown name is a no-op.
    pub fn delete(&self, name: &str) -> Result<(), StoreError> {
        let name = name.trim();
        let mut presets = self.list();
        let before = presets.len();
        presets.retain(|preset| preset.name != name);
        if presets.len() == before {
            return Ok(());
        }
        self.storage.save(KEY_PRESETS, &presets)
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.storage.remove(KEY_PRESETS)
    }

    /// Writes every preset to a portable file. `.json` files are written as
    /// JSON, anything else as YAML.
    pub fn export_to(&self, path: &Path) -> Result<usize, StoreError> {
        let presets = self.list();
        let payload = if is_json_path(path) {
            serde_json::to_string_pretty(&presets)?
        } else {
            serde_yaml::to_string(&presets)?
        };
        std::fs::write(path, payload)?;
        log::info!("Exported {} presets to {}", presets.len(), path.display());
        Ok(presets.len())
    }

    /// Reads presets from a file written by [`PresetStore::export_to`] and
    /// saves each one, replacing presets with the same name. File order is
    /// preserved at the front of the store.
    pub fn import_from(&self, path: &Path) -> Result<usize, StoreError> {
        let content = std::fs::read_to_string(path)?;
        let imported: Vec<Preset> = if is_json_path(path) {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };

        let mut presets = self.list();
        let mut count = 0usize;
        for preset in imported.into_iter().rev() {
            let name = preset.name.trim().to_string();
            if name.is_empty() {
                log::warn!("Skipping unnamed preset in {}", path.display());
                continue;
            }
            presets.retain(|existing| existing.name != name);
            presets.insert(0, Preset { name, ..preset });
            count += 1;
        }

        self.storage.save(KEY_PRESETS, &presets)?;
        log::info!("Imported {} presets from {}", count, path.display());
        Ok(count)
    }
}

fn is_json_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}
