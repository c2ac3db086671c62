//! OpenAI-compatible vision client
//!
//! Implements detection, identification and validation as chat-completions
//! requests carrying the image as a base64 data URL. Replies are requested
//! in JSON mode and parsed with fence tolerance.
//!
//! # Rate Limiting
//! An optional minimum interval between requests is enforced across all
//! three services (`vision.min_request_interval_ms`).

use super::reply::parse_json_reply;
use super::{ClaimedIdentity, DetectionService, IdentificationService, ValidationService};
use crate::error::ServiceError;
use crate::image_source::ImagePayload;
use async_trait::async_trait;
use photoid_common::config::{resolve_api_key, VisionConfig};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

const USER_AGENT: &str = concat!("photoid/", env!("CARGO_PKG_VERSION"));

const DETECT_PROMPT: &str = "You locate distinct physical products in a photo. \
Return JSON: {\"objects\": [{\"label\": string, \"box\": {\"x\": number, \"y\": number, \
\"width\": number, \"height\": number}, \"confidence\": number}]}. \
Box values are fractions of the image width/height (0-1), x/y is the top-left corner. \
Confidence is 0-1. Return {\"objects\": []} if there are no products.";

const IDENTIFY_PROMPT: &str = "You identify the brand and model of the single product shown. \
Return JSON: {\"brand\": string|null, \"model\": string|null, \"category\": string|null, \
\"description\": string|null, \"color\": string|null, \"confidence\": number}. \
Use null for anything you cannot read or infer; never guess a brand without evidence. \
Confidence is 0-1.";

const VALIDATE_PROMPT: &str = "You verify a claimed product identification against an image. \
Return JSON: {\"verdict\": \"verified\"|\"mismatch\"|\"uncertain\", \"discrepancies\": [string], \
\"correctedBrand\": string|null, \"correctedModel\": string|null, \
\"correctedConfidence\": number|null}. Use mismatch only when the image visibly contradicts \
the claim; supply corrections only when the true brand/model is visible.";

/// Minimum interval between requests
struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval_ms: u64) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval: Duration::from_millis(min_interval_ms),
        }
    }

    /// Wait if necessary to comply with rate limit
    async fn wait(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                debug!("Rate limiting: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Vision model client
pub struct VisionClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    image_detail: String,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl VisionClient {
    /// Create client with an explicit API key
    pub fn new(config: &VisionConfig, api_key: String) -> Result<Self, ServiceError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        let rate_limiter = (config.min_request_interval_ms > 0)
            .then(|| Arc::new(RateLimiter::new(config.min_request_interval_ms)));

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            image_detail: config.image_detail.clone(),
            rate_limiter,
        })
    }

    /// Create client resolving the API key from ENV or TOML
    pub fn from_config(config: &VisionConfig) -> photoid_common::Result<Self> {
        let api_key = resolve_api_key(config)?;
        Self::new(config, api_key).map_err(|e| photoid_common::Error::Config(e.to_string()))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, system_prompt: &str, user_text: &str, image: &ImagePayload) -> Value {
        json!({
            "model": self.model,
            "temperature": 0.1,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": system_prompt },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": user_text },
                        {
                            "type": "image_url",
                            "image_url": { "url": image.to_data_url(), "detail": self.image_detail }
                        }
                    ]
                }
            ]
        })
    }

    /// Send one chat-completions request and parse the JSON reply
    async fn complete_json(
        &self,
        operation: &'static str,
        system_prompt: &str,
        user_text: &str,
        image: &ImagePayload,
    ) -> Result<Value, ServiceError> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.wait().await;
        }

        let url = format!("{}/chat/completions", self.base_url);
        debug!(
            operation = operation,
            model = %self.model,
            image_bytes = image.len(),
            "Sending vision request"
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(system_prompt, user_text, image))
            .send()
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        let status = response.status();

        if status == 429 {
            let message = response.text().await.unwrap_or_default();
            return Err(ServiceError::RateLimited(message));
        }

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ServiceError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| ServiceError::MalformedResponse(e.to_string()))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                ServiceError::MalformedResponse("completion has no message content".to_string())
            })?;

        debug!(operation = operation, reply_len = content.len(), "Vision reply received");

        parse_json_reply(&content)
    }
}

#[async_trait]
impl DetectionService for VisionClient {
    fn name(&self) -> &'static str {
        "vision-detect"
    }

    async fn detect(&self, image: &ImagePayload) -> Result<Value, ServiceError> {
        self.complete_json(
            "detect",
            DETECT_PROMPT,
            "List every distinct product visible in this photo.",
            image,
        )
        .await
    }
}

#[async_trait]
impl IdentificationService for VisionClient {
    fn name(&self) -> &'static str {
        "vision-identify"
    }

    async fn identify(
        &self,
        crop: &ImagePayload,
        category_hint: Option<&str>,
    ) -> Result<Value, ServiceError> {
        let user_text = identify_text(category_hint);
        self.complete_json("identify", IDENTIFY_PROMPT, &user_text, crop)
            .await
    }
}

#[async_trait]
impl ValidationService for VisionClient {
    fn name(&self) -> &'static str {
        "vision-validate"
    }

    async fn validate(
        &self,
        crop: &ImagePayload,
        claim: &ClaimedIdentity,
    ) -> Result<Value, ServiceError> {
        let user_text = validate_text(claim);
        self.complete_json("validate", VALIDATE_PROMPT, &user_text, crop)
            .await
    }
}

fn identify_text(category_hint: Option<&str>) -> String {
    match category_hint {
        Some(hint) => format!("Identify this product. It is expected to be: {}.", hint),
        None => "Identify this product.".to_string(),
    }
}

fn validate_text(claim: &ClaimedIdentity) -> String {
    format!(
        "Claimed identification: brand={}, model={}, category={}, confidence={:.2}. \
Does the image support this claim?",
        claim.brand.as_deref().unwrap_or("unknown"),
        claim.model.as_deref().unwrap_or("unknown"),
        claim.category.as_deref().unwrap_or("unknown"),
        claim.confidence
    )
}
