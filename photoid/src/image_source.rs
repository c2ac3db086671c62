//! Source image intake
//!
//! Accepts a photo as raw bytes, a `data:image/...;base64,` URL, or an
//! http(s) URL, and produces a decoded [`SourceImage`] for cropping.
//!
//! # Limits
//! - Encoded payload must not exceed [`MAX_IMAGE_BYTES`]
//! - Payload must decode as PNG, JPEG, WebP or GIF

use crate::error::PipelineError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::DynamicImage;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Maximum encoded image size accepted (10 MiB)
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Request timeout of the default client used to fetch URL images
pub const IMAGE_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

const DATA_URL_PREFIX: &str = "data:image/";

/// Encoded image bytes with their MIME type
///
/// Cheap to clone; bytes are shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub bytes: Arc<[u8]>,
    pub mime_type: String,
}

impl ImagePayload {
    pub fn new(bytes: impl Into<Arc<[u8]>>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Encode as `data:<mime>;base64,<payload>`
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, STANDARD.encode(&self.bytes))
    }
}

/// Caller-owned handle to the photo to analyze
#[derive(Debug, Clone)]
pub enum ImageRef {
    /// Encoded image bytes (format is sniffed)
    Bytes(Arc<[u8]>),
    /// `data:image/<type>;base64,<payload>`
    DataUrl(String),
    /// http(s) URL fetched at the start of the run
    Url(String),
}

impl ImageRef {
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        ImageRef::Bytes(bytes.into())
    }

    pub fn from_data_url(url: impl Into<String>) -> Self {
        ImageRef::DataUrl(url.into())
    }

    pub fn from_url(url: impl Into<String>) -> Self {
        ImageRef::Url(url.into())
    }

    /// Resolve the reference into a decoded image
    pub async fn load(&self, http: &reqwest::Client) -> Result<SourceImage, PipelineError> {
        let bytes: Arc<[u8]> = match self {
            ImageRef::Bytes(bytes) => bytes.clone(),
            ImageRef::DataUrl(url) => decode_data_url(url)?.into(),
            ImageRef::Url(url) => fetch(http, url).await?.into(),
        };
        SourceImage::decode(bytes)
    }
}

/// Decoded source photo
#[derive(Debug, Clone)]
pub struct SourceImage {
    image: DynamicImage,
    payload: ImagePayload,
}

impl SourceImage {
    /// Decode encoded bytes, enforcing the size limit
    pub fn decode(bytes: Arc<[u8]>) -> Result<Self, PipelineError> {
        if bytes.is_empty() {
            return Err(PipelineError::InvalidImage("image is empty".to_string()));
        }
        check_size(bytes.len())?;

        let format = image::guess_format(&bytes)
            .map_err(|e| PipelineError::InvalidImage(format!("unrecognized image format: {}", e)))?;
        let image = image::load_from_memory_with_format(&bytes, format)
            .map_err(|e| PipelineError::InvalidImage(format!("failed to decode image: {}", e)))?;

        if image.width() == 0 || image.height() == 0 {
            return Err(PipelineError::InvalidImage("image has zero dimensions".to_string()));
        }

        debug!(
            width = image.width(),
            height = image.height(),
            bytes = bytes.len(),
            format = ?format,
            "Decoded source image"
        );

        Ok(Self {
            image,
            payload: ImagePayload::new(bytes, format.to_mime_type()),
        })
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    /// Original encoded bytes (sent to the detection service)
    pub fn payload(&self) -> &ImagePayload {
        &self.payload
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

fn check_size(len: usize) -> Result<(), PipelineError> {
    if len > MAX_IMAGE_BYTES {
        return Err(PipelineError::InvalidImage(format!(
            "image is {} bytes; limit is {} bytes",
            len, MAX_IMAGE_BYTES
        )));
    }
    Ok(())
}

/// Decode a `data:image/...;base64,` URL into raw bytes
pub fn decode_data_url(url: &str) -> Result<Vec<u8>, PipelineError> {
    if !url.starts_with(DATA_URL_PREFIX) {
        return Err(PipelineError::InvalidImage(
            "data URL must start with data:image/".to_string(),
        ));
    }

    let (header, data) = url
        .split_once(',')
        .ok_or_else(|| PipelineError::InvalidImage("data URL has no payload".to_string()))?;

    if !header.ends_with(";base64") {
        return Err(PipelineError::InvalidImage(
            "data URL must be base64 encoded".to_string(),
        ));
    }

    // Reject before decoding: base64 expands by 4/3
    check_size(data.len() / 4 * 3)?;

    STANDARD
        .decode(data.trim())
        .map_err(|e| PipelineError::InvalidImage(format!("invalid base64 payload: {}", e)))
}

async fn fetch(http: &reqwest::Client, url: &str) -> Result<Vec<u8>, PipelineError> {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(PipelineError::InvalidImage(format!(
            "unsupported image URL scheme: {}",
            url
        )));
    }

    debug!(url = %url, "Fetching source image");

    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| PipelineError::ImageFetch(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(PipelineError::ImageFetch(format!("HTTP {} for {}", status, url)));
    }

    if let Some(len) = response.content_length() {
        check_size(len as usize)?;
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| PipelineError::ImageFetch(e.to_string()))?;
    check_size(bytes.len())?;

    Ok(bytes.to_vec())
}
