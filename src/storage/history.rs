//! Generation history: thumbnails plus the parameters that produced them.

use super::{Storage, KEY_HISTORY};
use crate::error::StoreError;
use crate::prompt::PromptSet;
use crate::settings::{
    integer_value, positive_u32, SettingsPatch, DEFAULT_CFG, DEFAULT_HEIGHT, DEFAULT_SAMPLER,
    DEFAULT_STEPS, DEFAULT_WIDTH, RANDOM_SEED,
};
use serde::Serialize;
use serde_json::{Map, Value};

pub const MAX_HISTORY: usize = 24;

/// One successful generation. Prompt fields are empty when prompt storage
/// was disabled at the time of capture.
///
/// Stored entries are read back with [`HistoryEntry::from_value`], never
/// through a strict derive, so entries written before a field existed still
/// load.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    #[serde(rename = "ts")]
    pub timestamp: String,
    #[serde(rename = "thumbDataUrl")]
    pub thumbnail: String,
    pub seed: i64,
    #[serde(rename = "w")]
    pub width: u32,
    #[serde(rename = "h")]
    pub height: u32,
    pub steps: u32,
    pub cfg: f64,
    pub sampler: String,
    #[serde(rename = "main")]
    pub main_prompt: String,
    #[serde(rename = "char")]
    pub char_prompt: String,
    #[serde(rename = "neg")]
    pub neg_prompt: String,
}

impl HistoryEntry {
    /// Decodes one stored entry field by field. Missing or ill-typed fields
    /// take their defaults; only a non-object value is rejected.
    pub fn from_value(value: &Value) -> Option<Self> {
        let Some(object) = value.as_object() else {
            log::debug!("Dropping non-object history entry");
            return None;
        };

        let entry = Self {
            timestamp: text_field(object, "ts"),
            thumbnail: text_field(object, "thumbDataUrl"),
            seed: object
                .get("seed")
                .and_then(integer_value)
                .filter(|seed| *seed >= RANDOM_SEED)
                .unwrap_or(RANDOM_SEED),
            width: object.get("w").and_then(positive_u32).unwrap_or(DEFAULT_WIDTH),
            height: object.get("h").and_then(positive_u32).unwrap_or(DEFAULT_HEIGHT),
            steps: object.get("steps").and_then(positive_u32).unwrap_or(DEFAULT_STEPS),
            cfg: object
                .get("cfg")
                .and_then(Value::as_f64)
                .filter(|cfg| cfg.is_finite())
                .unwrap_or(DEFAULT_CFG),
            sampler: object
                .get("sampler")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|sampler| !sampler.is_empty())
                .unwrap_or(DEFAULT_SAMPLER)
                .to_string(),
            main_prompt: text_field(object, "main"),
            char_prompt: text_field(object, "char"),
            neg_prompt: text_field(object, "neg"),
        };

        for key in ["seed", "w", "h", "steps", "cfg", "sampler"] {
            if !object.contains_key(key) {
                log::debug!("History entry {} lacks '{}', using default", entry.timestamp, key);
            }
        }

        Some(entry)
    }

    pub fn prompts(&self) -> PromptSet {
        PromptSet::new(&self.main_prompt, &self.char_prompt, &self.neg_prompt)
    }

    /// Settings to load back into the form. Batch is reset to one so that
    /// re-running an entry reproduces a single image.
    pub fn settings_patch(&self) -> SettingsPatch {
        SettingsPatch {
            width: Some(self.width),
            height: Some(self.height),
            steps: Some(self.steps),
            cfg: Some(self.cfg),
            sampler: Some(self.sampler.clone()),
            seed: Some(self.seed),
            batch: Some(1),
            store_prompts: None,
            store_images: None,
        }
    }
}

/// Bounded, newest-first history of generations.
///
/// Not safe for concurrent writers; see the module docs of [`crate::storage`].
#[derive(Clone)]
pub struct HistoryLedger {
    storage: Storage,
}

impl HistoryLedger {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub fn list(&self) -> Vec<HistoryEntry> {
        self.storage
            .load_or_default::<Vec<Value>>(KEY_HISTORY)
            .iter()
            .filter_map(HistoryEntry::from_value)
            .collect()
    }

    pub fn get(&self, index: usize) -> Option<HistoryEntry> {
        self.list().into_iter().nth(index)
    }

    pub fn len(&self) -> usize {
        self.list().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn record(&self, entry: HistoryEntry) -> Result<(), StoreError> {
        self.record_all(vec![entry])
    }

    /// Prepends `entries` in order, so the last one ends up first, and
    /// persists the list with a single write.
    pub fn record_all(&self, entries: Vec<HistoryEntry>) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut history = self.list();
        for entry in entries {
            history.insert(0, entry);
        }
        history.truncate(MAX_HISTORY);
        self.storage.save(KEY_HISTORY, &history)
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.storage.remove(KEY_HISTORY)
    }
}

fn text_field(object: &Map<String, Value>, key: &str) -> String {
    object
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
