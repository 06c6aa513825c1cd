//! Error types shared across the generation, storage and thumbnail layers.

use serde::Serialize;
use thiserror::Error;

/// Failure of a single request to the image service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// The request never produced a response (connection, TLS, request
    /// construction, body read).
    #[error("transport error: {0}")]
    Transport(String),

    /// The service answered with a non-success status.
    #[error("HTTP {status}: {body_excerpt}")]
    Request { status: u16, body_excerpt: String },
}

/// Outcome-level error reported by the batch orchestrator.
///
/// Returned as data inside a `BatchOutcome`, never propagated past it, so the
/// caller can render the images obtained before a failure.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GenerateError {
    #[error("{message}")]
    Validation { message: String },

    #[error("request {index} failed: {message}")]
    Transport { index: usize, message: String },

    #[error("request {index} failed with HTTP {status}: {body_excerpt}")]
    Request {
        index: usize,
        status: u16,
        body_excerpt: String,
    },
}

impl GenerateError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub(crate) fn from_service(index: usize, error: ServiceError) -> Self {
        match error {
            ServiceError::Transport(message) => Self::Transport { index, message },
            ServiceError::Request {
                status,
                body_excerpt,
            } => Self::Request {
                index,
                status,
                body_excerpt,
            },
        }
    }

    /// Batch index of the failed request, if the failure came from the network.
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::Validation { .. } => None,
            Self::Transport { index, .. } | Self::Request { index, .. } => Some(*index),
        }
    }
}

/// Write-side failure of the persistent stores.
///
/// Read-side decode failures are never reported; the stores substitute an
/// empty collection instead.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("failed to encode {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Validation(String),
}

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("failed to encode thumbnail: {0}")]
    Encode(#[source] image::ImageError),

    #[error("thumbnail task failed: {0}")]
    Join(String),
}

/// Failure to assemble a [`crate::studio::Studio`] from its data directory.
#[derive(Debug, Error)]
pub enum StudioError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Service(#[from] ServiceError),
}
