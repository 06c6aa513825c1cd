//! Sequential batch generation.
//!
//! A batch is a run of single-image requests sharing prompts and settings.
//! Item `i` is only requested once item `i - 1` has resolved, and the first
//! failure ends the batch. Images obtained before the failure are kept and
//! persisted like those of a complete batch.

use crate::error::GenerateError;
use crate::nai_api::{GenerationPayload, ImageBytes, ImageService, DEFAULT_MODEL};
use crate::png_meta;
use crate::prompt::combine;
use crate::settings::{SettingsSnapshot, RANDOM_SEED};
use crate::storage::{HistoryEntry, HistoryLedger, SeedLedger};
use crate::thumbnail::{self, ThumbnailOptions};
use serde::Serialize;
use std::sync::Arc;

pub const MIN_BATCH: i64 = 1;
pub const MAX_BATCH: i64 = 12;

/// Clamps a requested batch size to `MIN_BATCH..=MAX_BATCH`.
pub fn clamp_batch_size(requested: i64) -> usize {
    requested.clamp(MIN_BATCH, MAX_BATCH) as usize
}

/// Seed for batch item `index`. The random sentinel is never incremented, so
/// items of a random batch are unrelated to each other.
pub fn derive_seed(base: i64, index: usize) -> i64 {
    if base == RANDOM_SEED {
        return RANDOM_SEED;
    }
    base.saturating_add(index as i64)
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedImage {
    pub index: usize,
    /// Seed sent with the request; `-1` when the service was asked to pick.
    pub requested_seed: i64,
    /// Seed reported back in the image metadata, when present.
    pub resolved_seed: Option<i64>,
    pub mime: String,
    #[serde(skip)]
    pub image: ImageBytes,
}

impl GeneratedImage {
    /// Best known seed: the resolved one, else the requested one.
    pub fn seed(&self) -> i64 {
        self.resolved_seed.unwrap_or(self.requested_seed)
    }

    pub fn seed_label(&self) -> String {
        match self.seed() {
            RANDOM_SEED => "random".to_string(),
            seed => seed.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStage {
    Requesting,
    Persisting,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    /// 1-based item number for `Requesting`, number of images otherwise.
    pub current: usize,
    pub total: usize,
    pub stage: BatchStage,
}

/// Result of a batch: every image obtained, plus the error that stopped it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutcome {
    pub images: Vec<GeneratedImage>,
    pub error: Option<GenerateError>,
    /// Non-fatal problems, e.g. history that could not be written.
    pub warnings: Vec<String>,
}

impl BatchOutcome {
    fn rejected(error: GenerateError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    pub fn status_message(&self) -> String {
        match (&self.error, self.images.len()) {
            (None, count) => format!(
                "Generated {} image{}",
                count,
                if count == 1 { "" } else { "s" }
            ),
            (Some(error), 0) => error.to_string(),
            (Some(error), count) => format!(
                "Generated {} image{} before failing: {}",
                count,
                if count == 1 { "" } else { "s" },
                error
            ),
        }
    }
}

pub struct BatchOrchestrator {
    service: Arc<dyn ImageService>,
    history: HistoryLedger,
    seeds: SeedLedger,
    model: String,
    thumbnails: ThumbnailOptions,
}

impl BatchOrchestrator {
    pub fn new(service: Arc<dyn ImageService>, history: HistoryLedger, seeds: SeedLedger) -> Self {
        Self {
            service,
            history,
            seeds,
            model: DEFAULT_MODEL.to_string(),
            thumbnails: ThumbnailOptions::default(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_thumbnail_options(mut self, options: ThumbnailOptions) -> Self {
        self.thumbnails = options;
        self
    }

    pub async fn generate(
        &self,
        token: &str,
        main_prompt: &str,
        char_prompt: &str,
        neg_prompt: &str,
        settings: &SettingsSnapshot,
    ) -> BatchOutcome {
        self.generate_with_progress(token, main_prompt, char_prompt, neg_prompt, settings, |_| {})
            .await
    }

    /// Runs the batch, calling `on_progress` before every request, when
    /// persistence starts and once at the end.
    pub async fn generate_with_progress<F>(
        &self,
        token: &str,
        main_prompt: &str,
        char_prompt: &str,
        neg_prompt: &str,
        settings: &SettingsSnapshot,
        mut on_progress: F,
    ) -> BatchOutcome
    where
        F: FnMut(BatchProgress) + Send,
    {
        let token = token.trim();
        if token.is_empty() {
            return BatchOutcome::rejected(GenerateError::validation("An API token is required"));
        }

        let combined = combine(main_prompt, char_prompt);
        if combined.is_empty() {
            return BatchOutcome::rejected(GenerateError::validation(
                "Enter a main prompt or a character prompt",
            ));
        }

        let total = clamp_batch_size(settings.batch);
        let base_payload = GenerationPayload::new(&combined, neg_prompt, settings, &self.model);
        log::info!(
            "Starting batch of {} ({}x{}, {} steps, base seed {})",
            total,
            settings.width,
            settings.height,
            settings.steps,
            settings.seed
        );

        let mut images = Vec::with_capacity(total);
        let mut error = None;

        for index in 0..total {
            let seed = derive_seed(settings.seed, index);
            on_progress(BatchProgress {
                current: index + 1,
                total,
                stage: BatchStage::Requesting,
            });

            match self
                .service
                .request_one(token, &base_payload.with_seed(seed))
                .await
            {
                Ok(image) => {
                    let resolved_seed = png_meta::resolved_seed(&image.data);
                    images.push(GeneratedImage {
                        index,
                        requested_seed: seed,
                        resolved_seed,
                        mime: image.mime(),
                        image,
                    });
                }
                Err(service_error) => {
                    log::warn!(
                        "Batch item {}/{} failed: {}",
                        index + 1,
                        total,
                        service_error
                    );
                    error = Some(GenerateError::from_service(index, service_error));
                    break;
                }
            }
        }

        let mut warnings = Vec::new();
        if !images.is_empty() {
            if settings.store_images {
                on_progress(BatchProgress {
                    current: images.len(),
                    total,
                    stage: BatchStage::Persisting,
                });
            }
            warnings = self
                .persist(&images, main_prompt, char_prompt, neg_prompt, settings)
                .await;
        }

        log::info!(
            "Batch finished: {}/{} images{}",
            images.len(),
            total,
            if error.is_some() { " (aborted)" } else { "" }
        );
        on_progress(BatchProgress {
            current: images.len(),
            total,
            stage: BatchStage::Done,
        });

        BatchOutcome {
            images,
            error,
            warnings,
        }
    }

    /// Writes history (when enabled) in one go, then records every seed.
    async fn persist(
        &self,
        images: &[GeneratedImage],
        main_prompt: &str,
        char_prompt: &str,
        neg_prompt: &str,
        settings: &SettingsSnapshot,
    ) -> Vec<String> {
        let mut warnings = Vec::new();

        if settings.store_images {
            let mut entries = Vec::with_capacity(images.len());
            for image in images {
                let thumbnail =
                    match thumbnail::render_thumbnail(image.image.data.clone(), self.thumbnails)
                        .await
                    {
                        Ok(url) => url,
                        Err(error) => {
                            log::warn!(
                                "Thumbnail for batch item {} unavailable: {}",
                                image.index + 1,
                                error
                            );
                            String::new()
                        }
                    };

                let (main, character, negative) = if settings.store_prompts {
                    (
                        main_prompt.to_string(),
                        char_prompt.to_string(),
                        neg_prompt.to_string(),
                    )
                } else {
                    (String::new(), String::new(), String::new())
                };

                entries.push(HistoryEntry {
                    timestamp: crate::now_timestamp(),
                    thumbnail,
                    seed: image.seed(),
                    width: settings.width,
                    height: settings.height,
                    steps: settings.steps,
                    cfg: settings.cfg,
                    sampler: settings.sampler.clone(),
                    main_prompt: main,
                    char_prompt: character,
                    neg_prompt: negative,
                });
            }

            if let Err(error) = self.history.record_all(entries) {
                log::error!("Failed to persist history: {}", error);
                warnings.push(format!("History not saved: {}", error));
            }
        }

        for image in images {
            if let Err(error) = self.seeds.record(image.seed()) {
                log::error!("Failed to persist seed {}: {}", image.seed(), error);
                warnings.push(format!("Seed {} not saved: {}", image.seed(), error));
            }
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::storage::Storage;
    use async_trait::async_trait;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::collections::VecDeque;
    use std::io::Cursor;
    use std::sync::Mutex;

    fn real_png() -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, image::Rgb([10, 20, 30])));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png)
            .expect("failed to encode test png");
        out.into_inner()
    }

    /// Scripted service: pops one response per call, succeeding once the
    /// script runs out. Records every seed it was asked for.
    #[derive(Default)]
    struct FakeService {
        script: Mutex<VecDeque<Result<ImageBytes, ServiceError>>>,
        seeds: Mutex<Vec<i64>>,
    }

    impl FakeService {
        fn scripted(script: Vec<Result<ImageBytes, ServiceError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                seeds: Mutex::new(Vec::new()),
            })
        }

        fn requested_seeds(&self) -> Vec<i64> {
            self.seeds.lock().expect("seed lock poisoned").clone()
        }
    }

    #[async_trait]
    impl ImageService for FakeService {
        async fn request_one(
            &self,
            _token: &str,
            payload: &GenerationPayload,
        ) -> Result<ImageBytes, ServiceError> {
            self.seeds
                .lock()
                .expect("seed lock poisoned")
                .push(payload.parameters.seed);
            self.script
                .lock()
                .expect("script lock poisoned")
                .pop_front()
                .unwrap_or_else(|| Ok(ImageBytes::new(real_png())))
        }
    }

    struct Fixture {
        service: Arc<FakeService>,
        history: HistoryLedger,
        seeds: SeedLedger,
        orchestrator: BatchOrchestrator,
    }

    fn fixture(script: Vec<Result<ImageBytes, ServiceError>>) -> Fixture {
        let storage = Storage::in_memory();
        let service = FakeService::scripted(script);
        let history = HistoryLedger::new(storage.clone());
        let seeds = SeedLedger::new(storage);
        let orchestrator = BatchOrchestrator::new(service.clone(), history.clone(), seeds.clone())
            .with_thumbnail_options(ThumbnailOptions {
                max_edge: 4,
                jpeg_quality: 60,
            });
        Fixture {
            service,
            history,
            seeds,
            orchestrator,
        }
    }

    fn settings(seed: i64, batch: i64) -> SettingsSnapshot {
        SettingsSnapshot {
            seed,
            batch,
            ..SettingsSnapshot::default()
        }
    }

    #[test]
    fn test_clamp_batch_size() {
        assert_eq!(clamp_batch_size(0), 1);
        assert_eq!(clamp_batch_size(15), 12);
        assert_eq!(clamp_batch_size(-3), 1);
        assert_eq!(clamp_batch_size(7), 7);
    }

    #[test]
    fn test_derive_seed() {
        let seeds: Vec<i64> = (0..4).map(|i| derive_seed(100, i)).collect();
        assert_eq!(seeds, vec![100, 101, 102, 103]);
        assert!((0..12).all(|i| derive_seed(RANDOM_SEED, i) == RANDOM_SEED));
        assert_eq!(derive_seed(i64::MAX, 3), i64::MAX);
    }

    #[tokio::test]
    async fn test_batch_increments_seed_from_base() {
        for batch in 1..=12 {
            let fx = fixture(vec![]);
            let outcome = fx
                .orchestrator
                .generate("token", "castle", "", "", &settings(500, batch))
                .await;

            let expected: Vec<i64> = (0..batch).map(|i| 500 + i).collect();
            assert!(outcome.is_complete());
            assert_eq!(outcome.images.len(), batch as usize);
            assert_eq!(fx.service.requested_seeds(), expected);
        }
    }

    #[tokio::test]
    async fn test_random_seed_is_never_incremented() {
        let fx = fixture(vec![]);
        let outcome = fx
            .orchestrator
            .generate("token", "castle", "", "", &settings(RANDOM_SEED, 4))
            .await;

        assert_eq!(outcome.images.len(), 4);
        assert_eq!(fx.service.requested_seeds(), vec![-1, -1, -1, -1]);
        assert!(outcome.images.iter().all(|img| img.seed_label() == "random"));
    }

    #[tokio::test]
    async fn test_batch_size_is_clamped_before_use() {
        for (requested, expected) in [(0, 1), (15, 12), (-3, 1)] {
            let fx = fixture(vec![]);
            fx.orchestrator
                .generate("token", "castle", "", "", &settings(1, requested))
                .await;
            assert_eq!(fx.service.requested_seeds().len(), expected);
        }
    }

    #[tokio::test]
    async fn test_empty_prompts_are_rejected_before_any_request() {
        let fx = fixture(vec![]);
        let outcome = fx
            .orchestrator
            .generate("token", "  ", "", "negative only", &settings(1, 3))
            .await;

        assert!(matches!(
            outcome.error,
            Some(GenerateError::Validation { .. })
        ));
        assert!(outcome.images.is_empty());
        assert!(fx.service.requested_seeds().is_empty());
        assert!(fx.seeds.list().is_empty());
    }

    #[tokio::test]
    async fn test_missing_token_is_rejected_before_any_request() {
        let fx = fixture(vec![]);
        let outcome = fx
            .orchestrator
            .generate("   ", "castle", "", "", &settings(1, 1))
            .await;

        assert!(matches!(
            outcome.error,
            Some(GenerateError::Validation { .. })
        ));
        assert!(fx.service.requested_seeds().is_empty());
    }

    #[tokio::test]
    async fn test_failure_mid_batch_keeps_earlier_images_and_stops() {
        let fx = fixture(vec![
            Ok(ImageBytes::new(real_png())),
            Err(ServiceError::Request {
                status: 429,
                body_excerpt: "Too many requests".to_string(),
            }),
        ]);
        let outcome = fx
            .orchestrator
            .generate("token", "castle", "knight", "", &settings(40, 3))
            .await;

        assert_eq!(outcome.images.len(), 1);
        assert_eq!(outcome.images[0].index, 0);
        assert_eq!(
            outcome.error,
            Some(GenerateError::Request {
                index: 1,
                status: 429,
                body_excerpt: "Too many requests".to_string(),
            })
        );
        assert_eq!(fx.service.requested_seeds(), vec![40, 41]);
        assert_eq!(fx.seeds.list(), vec![40]);

        let history = fx.history.list();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].seed, 40);
        assert!(history[0].thumbnail.starts_with("data:image/jpeg;base64,"));
    }

    #[tokio::test]
    async fn test_transport_failure_on_first_item_persists_nothing() {
        let fx = fixture(vec![Err(ServiceError::Transport(
            "connection refused".to_string(),
        ))]);
        let outcome = fx
            .orchestrator
            .generate("token", "castle", "", "", &settings(9, 2))
            .await;

        assert!(outcome.images.is_empty());
        assert_eq!(outcome.error.as_ref().and_then(GenerateError::index), Some(0));
        assert_eq!(fx.service.requested_seeds(), vec![9]);
        assert!(fx.history.is_empty());
        assert!(fx.seeds.list().is_empty());
    }

    #[tokio::test]
    async fn test_seeds_recorded_without_history_when_images_not_stored() {
        let fx = fixture(vec![]);
        let snapshot = SettingsSnapshot {
            store_images: false,
            ..settings(10, 3)
        };
        let outcome = fx
            .orchestrator
            .generate("token", "castle", "", "", &snapshot)
            .await;

        assert!(outcome.is_complete());
        assert!(fx.history.is_empty());
        assert_eq!(fx.seeds.list(), vec![12, 11, 10]);
    }

    #[tokio::test]
    async fn test_prompts_omitted_from_history_when_disabled() {
        let fx = fixture(vec![]);
        let snapshot = SettingsSnapshot {
            store_prompts: false,
            ..settings(1, 2)
        };
        fx.orchestrator
            .generate("token", "castle", "knight", "blurry", &snapshot)
            .await;

        let history = fx.history.list();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|entry| entry.main_prompt.is_empty()
            && entry.char_prompt.is_empty()
            && entry.neg_prompt.is_empty()));
        assert_eq!(history[0].seed, 2);
    }

    #[tokio::test]
    async fn test_history_keeps_raw_prompts_when_enabled() {
        let fx = fixture(vec![]);
        fx.orchestrator
            .generate("token", "castle ", "knight", "blurry", &settings(1, 1))
            .await;

        let entry = fx.history.get(0).expect("history entry");
        assert_eq!(entry.main_prompt, "castle ");
        assert_eq!(entry.char_prompt, "knight");
        assert_eq!(entry.neg_prompt, "blurry");
    }

    #[tokio::test]
    async fn test_resolved_seed_from_metadata_is_recorded() {
        let png = crate::png_meta::tests::novelai_png(r#"{"seed":987654}"#);
        let fx = fixture(vec![Ok(ImageBytes::new(png))]);
        let outcome = fx
            .orchestrator
            .generate("token", "castle", "", "", &settings(RANDOM_SEED, 1))
            .await;

        let image = &outcome.images[0];
        assert_eq!(image.requested_seed, RANDOM_SEED);
        assert_eq!(image.resolved_seed, Some(987654));
        assert_eq!(fx.seeds.list(), vec![987654]);
        // No pixel data in the fixture, so the thumbnail falls back to empty.
        assert_eq!(fx.history.get(0).map(|entry| entry.thumbnail), Some(String::new()));
    }

    #[tokio::test]
    async fn test_image_mime_falls_back_to_response_header() {
        let unrecognized = ImageBytes {
            data: b"opaque image bytes".to_vec().into(),
            content_type: Some("image/avif".to_string()),
        };
        let fx = fixture(vec![Ok(unrecognized), Ok(ImageBytes::new(real_png()))]);
        let outcome = fx
            .orchestrator
            .generate("token", "castle", "", "", &settings(1, 2))
            .await;

        let mimes: Vec<&str> = outcome.images.iter().map(|img| img.mime.as_str()).collect();
        assert_eq!(mimes, vec!["image/avif", "image/png"]);
    }

    #[tokio::test]
    async fn test_progress_reports_each_request_then_done() {
        let fx = fixture(vec![]);
        let mut events = Vec::new();
        fx.orchestrator
            .generate_with_progress(
                "token",
                "castle",
                "",
                "",
                &settings(1, 2),
                |progress| events.push(progress),
            )
            .await;

        let stages: Vec<(usize, BatchStage)> =
            events.iter().map(|event| (event.current, event.stage)).collect();
        assert_eq!(
            stages,
            vec![
                (1, BatchStage::Requesting),
                (2, BatchStage::Requesting),
                (2, BatchStage::Persisting),
                (2, BatchStage::Done),
            ]
        );
        assert!(events.iter().all(|event| event.total == 2));
    }

    #[test]
    fn test_status_message() {
        let outcome = BatchOutcome {
            error: Some(GenerateError::Transport {
                index: 2,
                message: "offline".to_string(),
            }),
            ..BatchOutcome::default()
        };
        assert_eq!(outcome.status_message(), "request 2 failed: offline");
        assert_eq!(BatchOutcome::default().status_message(), "Generated 0 images");
    }
}
