//! External vision services
//!
//! The pipeline talks to three logical services: detection, identification
//! and validation. Each returns an untyped JSON reply; the stage that calls
//! it is responsible for coercing the reply into a domain type and rejecting
//! it when required fields are missing.
//!
//! One [`VisionClient`] implements all three against an OpenAI-compatible
//! chat-completions endpoint. Tests substitute scripted implementations.

pub mod reply;
pub mod vision_client;

pub use vision_client::VisionClient;

use crate::error::ServiceError;
use crate::image_source::ImagePayload;
use crate::types::Identification;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// The identity claim a validator is asked to confirm
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimedIdentity {
    pub brand: Option<String>,
    pub model: Option<String>,
    pub category: Option<String>,
    pub confidence: f32,
}

impl From<&Identification> for ClaimedIdentity {
    fn from(identification: &Identification) -> Self {
        Self {
            brand: identification.brand.clone(),
            model: identification.model.clone(),
            category: identification.category.clone(),
            confidence: identification.confidence,
        }
    }
}

/// Locates candidate objects in a full photo
#[async_trait]
pub trait DetectionService: Send + Sync {
    fn name(&self) -> &'static str;

    async fn detect(&self, image: &ImagePayload) -> Result<Value, ServiceError>;
}

/// Names the brand/model shown in a crop
#[async_trait]
pub trait IdentificationService: Send + Sync {
    fn name(&self) -> &'static str;

    async fn identify(
        &self,
        crop: &ImagePayload,
        category_hint: Option<&str>,
    ) -> Result<Value, ServiceError>;
}

/// Re-examines a crop against a claimed identity
#[async_trait]
pub trait ValidationService: Send + Sync {
    fn name(&self) -> &'static str;

    async fn validate(
        &self,
        crop: &ImagePayload,
        claim: &ClaimedIdentity,
    ) -> Result<Value, ServiceError>;
}
