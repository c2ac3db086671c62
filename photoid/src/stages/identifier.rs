//! Identifier (Stage 3)
//!
//! Sends one crop to the identification service and coerces the reply
//! into an [`Identification`].
//!
//! # Retry policy
//! - `identify_timeout_ms` bounds the whole item; a retry only gets the
//!   time the earlier attempts left over
//! - Service errors and malformed replies are retried up to
//!   `identify_retries` times, immediately
//! - A timeout ends the item; it is never retried

use crate::error::{IdentificationError, ServiceError};
use crate::services::reply::{self, as_object, field};
use crate::services::IdentificationService;
use crate::types::{Crop, Identification};
use crate::workflow::options::PipelineOptions;
use serde_json::Value;
use std::sync::Arc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

/// Identification outcome plus the number of attempts it took
#[derive(Debug)]
pub struct IdentifyAttempts {
    pub result: Result<Identification, IdentificationError>,
    pub attempts: u32,
}

/// Identification stage
pub struct Identifier {
    service: Arc<dyn IdentificationService>,
}

impl Identifier {
    /// Create new identifier over an identification service
    pub fn new(service: Arc<dyn IdentificationService>) -> Self {
        Self { service }
    }

    /// Identify the product shown in a crop
    pub async fn identify(
        &self,
        crop: &Crop,
        options: &PipelineOptions,
    ) -> Result<Identification, IdentificationError> {
        self.identify_with_attempts(crop, options).await.result
    }

    /// Identify, also reporting how many attempts were made
    pub async fn identify_with_attempts(
        &self,
        crop: &Crop,
        options: &PipelineOptions,
    ) -> IdentifyAttempts {
        let limit = options.identify_timeout();
        let deadline = Instant::now() + limit;
        let max_attempts = options.identify_retries + 1;
        let mut attempts = 0;

        loop {
            attempts += 1;

            let call = self
                .service
                .identify(&crop.image, options.category_hint.as_deref());
            let error = match timeout_at(deadline, call).await {
                Err(_) => {
                    warn!(
                        region_id = %crop.region_id,
                        timeout_ms = limit.as_millis() as u64,
                        attempt = attempts,
                        "Identification timed out"
                    );
                    return IdentifyAttempts {
                        result: Err(IdentificationError::Timeout(limit)),
                        attempts,
                    };
                }
                Ok(reply) => match reply.and_then(|value| coerce_identification(&value)) {
                    Ok(identification) => {
                        debug!(
                            region_id = %crop.region_id,
                            item = ?identification.display_name(),
                            confidence = identification.confidence,
                            attempts = attempts,
                            "Crop identified"
                        );
                        return IdentifyAttempts {
                            result: Ok(identification),
                            attempts,
                        };
                    }
                    Err(e) => e,
                },
            };

            if attempts >= max_attempts {
                warn!(
                    region_id = %crop.region_id,
                    attempts = attempts,
                    error = %error,
                    "Identification failed"
                );
                return IdentifyAttempts {
                    result: Err(IdentificationError::Service(error)),
                    attempts,
                };
            }

            warn!(
                region_id = %crop.region_id,
                attempt = attempts,
                error = %error,
                "Identification attempt failed, retrying"
            );
        }
    }
}

/// Coerce an identification reply
///
/// `confidence` is required; brand/model/category/description/color are
/// optional and placeholder values ("unknown", "") become None.
pub fn coerce_identification(value: &Value) -> Result<Identification, ServiceError> {
    let object = as_object(value, "identification")?;

    let confidence = field(object, &["confidence", "score"])
        .and_then(reply::confidence)
        .ok_or_else(|| {
            ServiceError::MalformedResponse(
                "identification reply has no numeric confidence".to_string(),
            )
        })?;

    Ok(Identification {
        brand: reply::optional_string(object, &["brand"]),
        model: reply::optional_string(object, &["model"]),
        category: reply::optional_string(object, &["category"]),
        description: reply::optional_string(object, &["description", "notes"]),
        color: reply::optional_string(object, &["color", "colour"]),
        confidence,
    })
}
