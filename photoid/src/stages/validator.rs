//! Validator (Stage 4)
//!
//! Second opinion on an identification. Validation never fails an item:
//! service errors, malformed replies and timeouts yield
//! [`ValidationOutcome::Skipped`] and the identification stands as-is.
//!
//! # Verdict coercion
//! - `verdict` (or `recommendation`) is required
//! - confirmed / likely / verified → Verified
//! - mismatch / rejected / incorrect → Mismatch
//! - uncertain / unsure → Uncertain
//!
//! An `uncertain` verdict always carries a corrected confidence below the
//! claimed one. A corrected brand equivalent to the claimed brand is
//! discarded.

use crate::error::ServiceError;
use crate::services::reply::{self, as_object, field};
use crate::services::{ClaimedIdentity, ValidationService};
use crate::types::{Crop, FailureReason, Identification, Validation, Verdict};
use crate::workflow::options::PipelineOptions;
use serde_json::Value;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Confidence multiplier applied to uncertain verdicts lacking a lower score
pub const UNCERTAIN_CONFIDENCE_FACTOR: f32 = 0.5;

/// Brands at least this long tolerate one edit when compared
const FUZZY_BRAND_MIN_LEN: usize = 5;

/// Result of the validation stage
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Completed(Validation),
    Skipped { reason: FailureReason, message: String },
}

/// Validation stage
pub struct Validator {
    service: Arc<dyn ValidationService>,
}

impl Validator {
    /// Create new validator over a validation service
    pub fn new(service: Arc<dyn ValidationService>) -> Self {
        Self { service }
    }

    /// Validate an identification against its crop
    pub async fn validate(
        &self,
        crop: &Crop,
        identification: &Identification,
        options: &PipelineOptions,
    ) -> ValidationOutcome {
        let limit = options.validate_timeout();
        let claim = ClaimedIdentity::from(identification);

        let reply = match timeout(limit, self.service.validate(&crop.image, &claim)).await {
            Ok(reply) => reply,
            Err(_) => {
                warn!(
                    region_id = %crop.region_id,
                    timeout_ms = limit.as_millis() as u64,
                    "Validation timed out (non-fatal)"
                );
                return ValidationOutcome::Skipped {
                    reason: FailureReason::Timeout,
                    message: format!("validation timed out after {:?}", limit),
                };
            }
        };

        match reply.and_then(|value| coerce_validation(&value, identification)) {
            Ok(validation) => {
                debug!(
                    region_id = %crop.region_id,
                    verdict = validation.verdict.as_str(),
                    discrepancies = validation.discrepancies.len(),
                    "Identification validated"
                );
                ValidationOutcome::Completed(validation)
            }
            Err(e) => {
                warn!(
                    region_id = %crop.region_id,
                    error = %e,
                    "Validation skipped (non-fatal)"
                );
                let reason = if e.is_malformed() {
                    FailureReason::MalformedResponse
                } else {
                    FailureReason::ServiceError
                };
                ValidationOutcome::Skipped {
                    reason,
                    message: e.to_string(),
                }
            }
        }
    }
}

/// Map a verdict string (case-insensitive) to a Verdict
pub fn parse_verdict(raw: &str) -> Option<Verdict> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "verified" | "confirmed" | "likely" | "match" => Some(Verdict::Verified),
        "mismatch" | "rejected" | "incorrect" => Some(Verdict::Mismatch),
        "uncertain" | "unsure" | "inconclusive" => Some(Verdict::Uncertain),
        _ => None,
    }
}

/// True when two brand strings name the same brand
///
/// Equal ignoring case, one containing the other, or (for brands of five
/// or more characters) within one edit of each other.
pub fn brands_match(a: &str, b: &str) -> bool {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b || a.contains(&b) || b.contains(&a) {
        return true;
    }
    a.chars().count() >= FUZZY_BRAND_MIN_LEN
        && b.chars().count() >= FUZZY_BRAND_MIN_LEN
        && strsim::levenshtein(&a, &b) <= 1
}

/// Coerce a validation reply against the claimed identification
pub fn coerce_validation(
    value: &Value,
    claimed: &Identification,
) -> Result<Validation, ServiceError> {
    let object = as_object(value, "validation")?;

    let verdict = field(object, &["verdict", "recommendation"])
        .and_then(Value::as_str)
        .and_then(parse_verdict)
        .ok_or_else(|| {
            ServiceError::MalformedResponse("validation reply has no recognizable verdict".to_string())
        })?;

    let discrepancies = reply::string_list(object, &["discrepancies"]);
    let reported_confidence = field(
        object,
        &["correctedConfidence", "corrected_confidence", "visualMatchScore"],
    )
    .and_then(reply::confidence);

    let mut validation = Validation {
        verdict,
        discrepancies,
        corrected_brand: None,
        corrected_model: None,
        corrected_confidence: reported_confidence,
    };

    match verdict {
        Verdict::Verified => {}
        Verdict::Uncertain => {
            let ceiling = claimed.confidence * UNCERTAIN_CONFIDENCE_FACTOR;
            validation.corrected_confidence = Some(
                reported_confidence
                    .filter(|c| *c < claimed.confidence)
                    .unwrap_or(ceiling),
            );
        }
        Verdict::Mismatch => {
            validation.corrected_brand =
                reply::optional_string(object, &["correctedBrand", "corrected_brand"])
                    .filter(|brand| {
                        !claimed
                            .brand
                            .as_deref()
                            .is_some_and(|claimed| brands_match(claimed, brand))
                    });
            validation.corrected_model =
                reply::optional_string(object, &["correctedModel", "corrected_model"])
                    .filter(|model| {
                        !claimed
                            .model
                            .as_deref()
                            .is_some_and(|claimed| claimed.eq_ignore_ascii_case(model))
                    });
        }
    }

    Ok(validation)
}
