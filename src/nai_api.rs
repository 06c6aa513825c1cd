use crate::error::ServiceError;
use crate::settings::SettingsSnapshot;
use crate::thumbnail::{mime_from_image_bytes, UNKNOWN_MIME};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "https://image.novelai.net/ai/generate-image";
pub const DEFAULT_MODEL: &str = "nai-diffusion";
/// Longest error body kept for diagnostics, in characters.
pub const BODY_EXCERPT_LIMIT: usize = 400;
const ZIP_LOCAL_HEADER: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];
const MAX_PREALLOC: u64 = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParameters {
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub scale: f64,
    pub sampler: String,
    pub seed: i64,
    pub n_samples: u32,
    /// Negative prompt.
    pub uc: String,
}

/// JSON body of one generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationPayload {
    pub input: String,
    pub model: String,
    pub parameters: GenerationParameters,
}

impl GenerationPayload {
    /// Builds a single-sample payload. The seed is taken from `settings` and
    /// is usually replaced per batch item with [`GenerationPayload::with_seed`].
    pub fn new(
        combined_prompt: &str,
        negative_prompt: &str,
        settings: &SettingsSnapshot,
        model: &str,
    ) -> Self {
        Self {
            input: combined_prompt.to_string(),
            model: model.to_string(),
            parameters: GenerationParameters {
                width: settings.width,
                height: settings.height,
                steps: settings.steps,
                scale: settings.cfg,
                sampler: settings.sampler.clone(),
                seed: settings.seed,
                n_samples: 1,
                uc: negative_prompt.to_string(),
            },
        }
    }

    pub fn with_seed(&self, seed: i64) -> Self {
        let mut payload = self.clone();
        payload.parameters.seed = seed;
        payload
    }
}

/// Raw image returned by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBytes {
    pub data: Arc<[u8]>,
    pub content_type: Option<String>,
}

impl ImageBytes {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            data: data.into(),
            content_type: None,
        }
    }

    /// MIME type sniffed from the bytes. When the format is not recognized,
    /// an `image/*` Content-Type from the response is used instead.
    pub fn mime(&self) -> String {
        match mime_from_image_bytes(&self.data) {
            UNKNOWN_MIME => self
                .content_type
                .as_deref()
                .and_then(|value| value.split(';').next())
                .map(str::trim)
                .filter(|value| value.starts_with("image/"))
                .unwrap_or(UNKNOWN_MIME)
                .to_string(),
            sniffed => sniffed.to_string(),
        }
    }
}

/// One generation attempt against the remote service.
///
/// Implementations make exactly one attempt per call; retry policy, if any,
/// belongs to the caller.
#[async_trait]
pub trait ImageService: Send + Sync {
    async fn request_one(
        &self,
        token: &str,
        payload: &GenerationPayload,
    ) -> Result<ImageBytes, ServiceError>;
}

/// HTTP client for the NovelAI image endpoint.
#[derive(Clone)]
pub struct NovelAiClient {
    client: reqwest::Client,
    endpoint: String,
}

impl NovelAiClient {
    /// `timeout` of `None` lets a request wait indefinitely.
    pub fn new(endpoint: &str, timeout: Option<Duration>) -> Result<Self, ServiceError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("image/png"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|error| {
            ServiceError::Transport(format!("Failed to build HTTP client: {}", error))
        })?;

        Ok(Self {
            client,
            endpoint: normalize_endpoint(endpoint),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ImageService for NovelAiClient {
    async fn request_one(
        &self,
        token: &str,
        payload: &GenerationPayload,
    ) -> Result<ImageBytes, ServiceError> {
        let auth = bearer_header(token)?;

        let response = self
            .client
            .post(&self.endpoint)
            .header(AUTHORIZATION, auth)
            .json(payload)
            .send()
            .await
            .map_err(|error| {
                ServiceError::Transport(format_send_transport_error(&self.endpoint, &error))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::warn!(
                "Image request to {} failed with status {}",
                self.endpoint,
                status
            );
            return Err(ServiceError::Request {
                status: status.as_u16(),
                body_excerpt: body_excerpt(&body),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string);
        let body = response.bytes().await.map_err(|error| {
            ServiceError::Transport(format!(
                "Failed reading image response from {}: {}",
                self.endpoint, error
            ))
        })?;

        if body.is_empty() {
            return Err(ServiceError::Transport(format!(
                "Empty image response from {}",
                self.endpoint
            )));
        }

        if body.starts_with(&ZIP_LOCAL_HEADER) {
            let data = unwrap_zip_archive(&body).map_err(ServiceError::Transport)?;
            return Ok(ImageBytes {
                data: data.into(),
                content_type: None,
            });
        }

        Ok(ImageBytes {
            data: body.to_vec().into(),
            content_type,
        })
    }
}

fn bearer_header(token: &str) -> Result<HeaderValue, ServiceError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(ServiceError::Transport("Missing API token".to_string()));
    }
    HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|_| ServiceError::Transport("API token contains invalid characters".to_string()))
}

fn normalize_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        DEFAULT_ENDPOINT.to_string()
    } else {
        trimmed.to_string()
    }
}

/// First `BODY_EXCERPT_LIMIT` characters of an error body.
pub fn body_excerpt(body: &str) -> String {
    body.trim().chars().take(BODY_EXCERPT_LIMIT).collect()
}

/// Returns the first decodable image stored in a ZIP archive.
fn unwrap_zip_archive(bytes: &[u8]) -> Result<Vec<u8>, String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|error| format!("Malformed ZIP image response: {}", error))?;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|error| format!("Unreadable ZIP entry {}: {}", index, error))?;
        if entry.is_dir() {
            continue;
        }

        let mut data = Vec::with_capacity(entry.size().min(MAX_PREALLOC) as usize);
        entry
            .read_to_end(&mut data)
            .map_err(|error| format!("Failed to extract {}: {}", entry.name(), error))?;
        if image::guess_format(&data).is_ok() {
            return Ok(data);
        }
        log::debug!("Skipping non-image ZIP entry {}", entry.name());
    }

    Err("ZIP image response contained no image".to_string())
}

fn format_send_transport_error(endpoint: &str, error: &reqwest::Error) -> String {
    if error.is_timeout() {
        return format!("Image request timed out at {}", endpoint);
    }

    if error.is_connect() {
        return format!(
            "Connection failed at {}. Check network access; browsers may also block this endpoint via CORS.",
            endpoint
        );
    }

    format!("Transport error at {}: {}", endpoint, error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn png_bytes() -> Vec<u8> {
        crate::png_meta::tests::png_with_chunks(&[])
    }

    #[test]
    fn test_payload_shape_matches_service_contract() {
        let settings = SettingsSnapshot {
            seed: 77,
            ..SettingsSnapshot::default()
        };
        let payload = GenerationPayload::new("knight, castle", "lowres", &settings, DEFAULT_MODEL);

        let encoded = serde_json::to_value(payload.with_seed(78)).expect("serialize");
        assert_eq!(
            encoded,
            json!({
                "input": "knight, castle",
                "model": "nai-diffusion",
                "parameters": {
                    "width": 768,
                    "height": 768,
                    "steps": 28,
                    "scale": 11.0,
                    "sampler": "k_euler_ancestral",
                    "seed": 78,
                    "n_samples": 1,
                    "uc": "lowres"
                }
            })
        );
    }

    #[test]
    fn test_body_excerpt_is_bounded_by_characters() {
        let body = "é".repeat(BODY_EXCERPT_LIMIT + 50);
        let excerpt = body_excerpt(&body);
        assert_eq!(excerpt.chars().count(), BODY_EXCERPT_LIMIT);
        assert_eq!(body_excerpt("  short  "), "short");
    }

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(
            normalize_endpoint(" https://example.test/ai/generate-image/ "),
            "https://example.test/ai/generate-image"
        );
        assert_eq!(normalize_endpoint(""), DEFAULT_ENDPOINT);
    }

    #[test]
    fn test_unwrap_zip_archive_returns_first_image() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        writer
            .start_file("readme.txt", options)
            .expect("failed to start text entry");
        writer.write_all(b"hello").expect("failed to write text");
        writer
            .start_file("image_0.png", options)
            .expect("failed to start image entry");
        writer.write_all(&png_bytes()).expect("failed to write png");
        let archive = writer.finish().expect("failed to finish zip").into_inner();

        let extracted = unwrap_zip_archive(&archive).expect("expected image entry");
        assert_eq!(extracted, png_bytes());
    }

    #[test]
    fn test_unwrap_zip_archive_rejects_garbage() {
        let mut bytes = ZIP_LOCAL_HEADER.to_vec();
        bytes.extend_from_slice(b"garbage");
        assert!(unwrap_zip_archive(&bytes).is_err());
    }

    #[test]
    fn test_mime_prefers_sniffed_format_over_header() {
        let png = ImageBytes {
            data: png_bytes().into(),
            content_type: Some("application/octet-stream".to_string()),
        };
        assert_eq!(png.mime(), "image/png");

        let unrecognized = ImageBytes {
            data: b"not a known format".to_vec().into(),
            content_type: Some("image/avif; charset=binary".to_string()),
        };
        assert_eq!(unrecognized.mime(), "image/avif");

        let text = ImageBytes {
            data: b"plain".to_vec().into(),
            content_type: Some("text/plain".to_string()),
        };
        assert_eq!(text.mime(), UNKNOWN_MIME);
        assert_eq!(ImageBytes::new(b"plain".to_vec()).mime(), UNKNOWN_MIME);
    }

    #[tokio::test]
    async fn test_blank_token_fails_without_network() {
        let client = NovelAiClient::new("http://127.0.0.1:9/unused", None)
            .expect("client should build");
        let payload =
            GenerationPayload::new("a", "", &SettingsSnapshot::default(), DEFAULT_MODEL);

        let result = client.request_one("   ", &payload).await;
        assert_eq!(
            result,
            Err(ServiceError::Transport("Missing API token".to_string()))
        );
    }
}
