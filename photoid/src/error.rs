//! Error types for the identification pipeline
//!
//! Only run-fatal conditions surface as [`PipelineError`]. Per-item failures
//! are recorded on the item (see `types::ItemFailure`) and never abort a run.

use std::time::Duration;
use thiserror::Error;

/// Run-fatal pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Source image missing, oversized, or undecodable
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Remote source image could not be fetched
    #[error("Image fetch failed: {0}")]
    ImageFetch(String),

    /// Caller supplied options outside their valid ranges
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    /// Region enumeration failed; there is nothing to identify
    #[error("Region enumeration failed: {0}")]
    Enumeration(#[from] EnumerationError),
}

/// Failure reported by an external service call
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Payload arrived but is missing required fields or unparseable
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl ServiceError {
    pub fn is_malformed(&self) -> bool {
        matches!(self, ServiceError::MalformedResponse(_))
    }
}

/// Region enumeration errors (always run-fatal)
#[derive(Debug, Error)]
pub enum EnumerationError {
    #[error("Detection service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Malformed detection response: {0}")]
    MalformedResponse(String),
}

/// Crop extraction errors (item-level)
#[derive(Debug, Error)]
pub enum CropError {
    #[error("Region box is outside the image or has no area: {0}")]
    InvalidRegion(String),

    #[error("Failed to encode crop: {0}")]
    Encode(String),
}

/// Identification errors (item-level)
#[derive(Debug, Error)]
pub enum IdentificationError {
    /// Item timeout elapsed; never retried
    #[error("Identification timed out after {0:?}")]
    Timeout(Duration),

    /// Service error or malformed payload after all attempts
    #[error("Identification failed: {0}")]
    Service(#[from] ServiceError),
}
