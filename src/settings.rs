//! Generation settings: the immutable snapshot handed to the orchestrator,
//! the raw form state it is captured from, and validated partial restores.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_WIDTH: u32 = 768;
pub const DEFAULT_HEIGHT: u32 = 768;
pub const DEFAULT_STEPS: u32 = 28;
pub const DEFAULT_CFG: f64 = 11.0;
pub const DEFAULT_SAMPLER: &str = "k_euler_ancestral";
/// Seed sentinel asking the service to pick a random seed.
pub const RANDOM_SEED: i64 = -1;
pub const DEFAULT_BATCH: i64 = 1;

/// Generation parameters as read at the moment of use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsSnapshot {
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub cfg: f64,
    pub sampler: String,
    pub seed: i64,
    /// Requested batch size; clamped by the orchestrator, not here.
    pub batch: i64,
    pub store_prompts: bool,
    pub store_images: bool,
}

impl Default for SettingsSnapshot {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            steps: DEFAULT_STEPS,
            cfg: DEFAULT_CFG,
            sampler: DEFAULT_SAMPLER.to_string(),
            seed: RANDOM_SEED,
            batch: DEFAULT_BATCH,
            store_prompts: true,
            store_images: true,
        }
    }
}

/// A partial set of settings, as found in presets and history written by
/// older versions that lacked some fields.
///
/// Deserialization goes through [`SettingsPatch::from_value`], so a stored
/// patch with an ill-typed field still loads; that field is simply absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "Value")]
pub struct SettingsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cfg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampler: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_prompts: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_images: Option<bool>,
}

const KNOWN_PATCH_KEYS: &[&str] = &[
    "width",
    "height",
    "steps",
    "cfg",
    "sampler",
    "seed",
    "batch",
    "storePrompts",
    "storeImages",
];

impl SettingsPatch {
    /// Builds a patch from loosely-shaped JSON, checking every field on its
    /// own. Fields with the wrong type or out of range are dropped, unknown
    /// keys are ignored.
    pub fn from_value(value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            if !value.is_null() {
                log::debug!("Ignoring non-object settings payload");
            }
            return Self::default();
        };

        for key in object.keys() {
            if !KNOWN_PATCH_KEYS.contains(&key.as_str()) {
                log::debug!("Ignoring unrecognized settings field '{}'", key);
            }
        }

        let patch = Self {
            width: object.get("width").and_then(positive_u32),
            height: object.get("height").and_then(positive_u32),
            steps: object.get("steps").and_then(positive_u32),
            cfg: object
                .get("cfg")
                .and_then(Value::as_f64)
                .filter(|cfg| cfg.is_finite()),
            sampler: object
                .get("sampler")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|sampler| !sampler.is_empty())
                .map(ToString::to_string),
            seed: object
                .get("seed")
                .and_then(integer_value)
                .filter(|seed| *seed >= RANDOM_SEED),
            batch: object.get("batch").and_then(integer_value),
            store_prompts: object.get("storePrompts").and_then(Value::as_bool),
            store_images: object.get("storeImages").and_then(Value::as_bool),
        };

        for (key, present, accepted) in [
            ("width", object.contains_key("width"), patch.width.is_some()),
            ("height", object.contains_key("height"), patch.height.is_some()),
            ("steps", object.contains_key("steps"), patch.steps.is_some()),
            ("cfg", object.contains_key("cfg"), patch.cfg.is_some()),
            ("sampler", object.contains_key("sampler"), patch.sampler.is_some()),
            ("seed", object.contains_key("seed"), patch.seed.is_some()),
            ("batch", object.contains_key("batch"), patch.batch.is_some()),
        ] {
            if present && !accepted {
                log::debug!("Dropping invalid settings field '{}'", key);
            }
        }

        patch
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

impl From<Value> for SettingsPatch {
    fn from(value: Value) -> Self {
        Self::from_value(&value)
    }
}

impl From<&SettingsSnapshot> for SettingsPatch {
    fn from(snapshot: &SettingsSnapshot) -> Self {
        Self {
            width: Some(snapshot.width),
            height: Some(snapshot.height),
            steps: Some(snapshot.steps),
            cfg: Some(snapshot.cfg),
            sampler: Some(snapshot.sampler.clone()),
            seed: Some(snapshot.seed),
            batch: Some(snapshot.batch),
            store_prompts: Some(snapshot.store_prompts),
            store_images: Some(snapshot.store_images),
        }
    }
}

pub(crate) fn integer_value(value: &Value) -> Option<i64> {
    if let Some(integer) = value.as_i64() {
        return Some(integer);
    }
    value
        .as_f64()
        .filter(|number| number.is_finite() && number.fract() == 0.0)
        .filter(|number| *number >= i64::MIN as f64 && *number <= i64::MAX as f64)
        .map(|number| number as i64)
}

pub(crate) fn positive_u32(value: &Value) -> Option<u32> {
    integer_value(value)
        .and_then(|integer| u32::try_from(integer).ok())
        .filter(|integer| *integer > 0)
}

/// Well-known output sizes offered next to the free-form width/height fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizePreset {
    Square768,
    Portrait512x768,
    Landscape768x512,
    Square1024,
    Custom,
}

impl SizePreset {
    pub const ALL: [SizePreset; 5] = [
        SizePreset::Square768,
        SizePreset::Portrait512x768,
        SizePreset::Landscape768x512,
        SizePreset::Square1024,
        SizePreset::Custom,
    ];

    pub fn dimensions(self) -> Option<(u32, u32)> {
        match self {
            Self::Square768 => Some((768, 768)),
            Self::Portrait512x768 => Some((512, 768)),
            Self::Landscape768x512 => Some((768, 512)),
            Self::Square1024 => Some((1024, 1024)),
            Self::Custom => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Square768 => "768x768",
            Self::Portrait512x768 => "512x768",
            Self::Landscape768x512 => "768x512",
            Self::Square1024 => "1024x1024",
            Self::Custom => "custom",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL
            .into_iter()
            .find(|preset| preset.label().eq_ignore_ascii_case(label))
    }

    pub fn from_dimensions(width: u32, height: u32) -> Self {
        Self::ALL
            .into_iter()
            .find(|preset| preset.dimensions() == Some((width, height)))
            .unwrap_or(Self::Custom)
    }
}

/// Raw settings fields as typed by the user.
///
/// Numeric fields stay strings until [`SettingsForm::capture`] coerces them,
/// mirroring free-text inputs in the UI.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsForm {
    pub width: String,
    pub height: String,
    pub steps: String,
    pub cfg: String,
    pub sampler: String,
    pub seed: String,
    pub batch: String,
    pub store_prompts: bool,
    pub store_images: bool,
}

impl Default for SettingsForm {
    fn default() -> Self {
        Self::from(&SettingsSnapshot::default())
    }
}

impl From<&SettingsSnapshot> for SettingsForm {
    fn from(snapshot: &SettingsSnapshot) -> Self {
        Self {
            width: snapshot.width.to_string(),
            height: snapshot.height.to_string(),
            steps: snapshot.steps.to_string(),
            cfg: snapshot.cfg.to_string(),
            sampler: snapshot.sampler.clone(),
            seed: snapshot.seed.to_string(),
            batch: snapshot.batch.to_string(),
            store_prompts: snapshot.store_prompts,
            store_images: snapshot.store_images,
        }
    }
}

impl SettingsForm {
    /// Reads the current field values into a snapshot. A numeric field that
    /// cannot be parsed takes its default value.
    pub fn capture(&self) -> SettingsSnapshot {
        let defaults = SettingsSnapshot::default();
        SettingsSnapshot {
            width: coerce_u32("width", &self.width, defaults.width),
            height: coerce_u32("height", &self.height, defaults.height),
            steps: coerce_u32("steps", &self.steps, defaults.steps),
            cfg: coerce_f64("cfg", &self.cfg, defaults.cfg),
            sampler: self.sampler.trim().to_string(),
            seed: coerce_i64("seed", &self.seed, defaults.seed),
            batch: coerce_i64("batch", &self.batch, defaults.batch),
            store_prompts: self.store_prompts,
            store_images: self.store_images,
        }
    }

    /// Applies the fields present in `patch`, leaving the others untouched.
    pub fn restore(&mut self, patch: &SettingsPatch) {
        if let Some(width) = patch.width {
            self.width = width.to_string();
        }
        if let Some(height) = patch.height {
            self.height = height.to_string();
        }
        if let Some(steps) = patch.steps {
            self.steps = steps.to_string();
        }
        if let Some(cfg) = patch.cfg {
            self.cfg = cfg.to_string();
        }
        if let Some(sampler) = patch.sampler.as_ref() {
            self.sampler = sampler.clone();
        }
        if let Some(seed) = patch.seed {
            self.seed = seed.to_string();
        }
        if let Some(batch) = patch.batch {
            self.batch = batch.to_string();
        }
        if let Some(store_prompts) = patch.store_prompts {
            self.store_prompts = store_prompts;
        }
        if let Some(store_images) = patch.store_images {
            self.store_images = store_images;
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn size_preset(&self) -> SizePreset {
        match (parse_integer(&self.width), parse_integer(&self.height)) {
            (Some(width), Some(height)) => match (u32::try_from(width), u32::try_from(height)) {
                (Ok(width), Ok(height)) => SizePreset::from_dimensions(width, height),
                _ => SizePreset::Custom,
            },
            _ => SizePreset::Custom,
        }
    }

    pub fn apply_size_preset(&mut self, preset: SizePreset) {
        if let Some((width, height)) = preset.dimensions() {
            self.width = width.to_string();
            self.height = height.to_string();
        }
    }
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|number| number.is_finite())
}

fn parse_integer(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if let Ok(integer) = trimmed.parse::<i64>() {
        return Some(integer);
    }
    parse_number(trimmed)
        .filter(|number| number.fract() == 0.0)
        .filter(|number| *number >= i64::MIN as f64 && *number <= i64::MAX as f64)
        .map(|number| number as i64)
}

fn coerce_u32(field: &str, raw: &str, default: u32) -> u32 {
    match parse_integer(raw).and_then(|value| u32::try_from(value).ok()) {
        Some(value) => value,
        None => {
            log::warn!("Invalid {} value '{}', using {}", field, raw, default);
            default
        }
    }
}

fn coerce_i64(field: &str, raw: &str, default: i64) -> i64 {
    match parse_integer(raw) {
        Some(value) => value,
        None => {
            log::warn!("Invalid {} value '{}', using {}", field, raw, default);
            default
        }
    }
}

fn coerce_f64(field: &str, raw: &str, default: f64) -> f64 {
    match parse_number(raw) {
        Some(value) => value,
        None => {
            log::warn!("Invalid {} value '{}', using {}", field, raw, default);
            default
        }
    }
}
