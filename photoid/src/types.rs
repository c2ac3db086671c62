//! Core item-level types for the identification pipeline
//!
//! Defines the per-region data flowing through the four stages:
//! - **Stage 1:** Region (detector output, normalized bounding box)
//! - **Stage 2:** Crop (padded sub-image of a Region)
//! - **Stage 3:** Identification (brand/model guess with confidence)
//! - **Stage 4:** Validation (verdict on the identification)
//!
//! `IdentifiedItem` is the per-region result returned to callers.

use crate::image_source::ImagePayload;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Tolerance for floating point edges of normalized boxes
const UNIT_EPSILON: f32 = 1e-4;

// ============================================================================
// Regions
// ============================================================================

/// Region identifier, unique within a run and never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(pub u32);

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "region-{}", self.0)
    }
}

/// Axis-aligned rectangle in normalized image coordinates
///
/// `x`/`y` are the top-left corner; all values are fractions of the image
/// width/height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    /// Box area (0.0 for degenerate boxes)
    pub fn area(&self) -> f32 {
        if self.is_degenerate() {
            0.0
        } else {
            self.width * self.height
        }
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }

    /// True when the box has no usable area
    pub fn is_degenerate(&self) -> bool {
        !self.is_finite() || self.width <= 0.0 || self.height <= 0.0
    }

    /// True when the box lies fully within [0,1]×[0,1]
    pub fn is_normalized(&self) -> bool {
        self.is_finite()
            && self.x >= 0.0
            && self.y >= 0.0
            && self.width >= 0.0
            && self.height >= 0.0
            && self.right() <= 1.0 + UNIT_EPSILON
            && self.bottom() <= 1.0 + UNIT_EPSILON
    }

    /// Intersect the box with the unit square
    ///
    /// Boxes entirely outside the image collapse to zero area.
    pub fn clamp_to_unit(&self) -> Self {
        if !self.is_finite() {
            return Self::new(0.0, 0.0, 0.0, 0.0);
        }
        let left = self.x.clamp(0.0, 1.0);
        let top = self.y.clamp(0.0, 1.0);
        let right = self.right().clamp(0.0, 1.0);
        let bottom = self.bottom().clamp(0.0, 1.0);
        Self::new(left, top, (right - left).max(0.0), (bottom - top).max(0.0))
    }

    /// Area of the overlap between two boxes
    pub fn intersection_area(&self, other: &BoundingBox) -> f32 {
        let overlap_w = self.right().min(other.right()) - self.x.max(other.x);
        let overlap_h = self.bottom().min(other.bottom()) - self.y.max(other.y);
        if overlap_w <= 0.0 || overlap_h <= 0.0 {
            0.0
        } else {
            overlap_w * overlap_h
        }
    }

    /// Intersection over union (0.0-1.0)
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let intersection = self.intersection_area(other);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            (intersection / union).clamp(0.0, 1.0)
        }
    }
}

/// One candidate object location within the source image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: RegionId,
    /// Normalized box, always within the unit square and never degenerate
    pub bounding_box: BoundingBox,
    /// Coarse detector label (advisory only)
    pub label_guess: Option<String>,
    /// Detector-reported confidence when the detection service provides one
    pub detector_confidence: Option<f32>,
}

/// Padded sub-image of a Region, encoded for the external services
#[derive(Debug, Clone)]
pub struct Crop {
    pub region_id: RegionId,
    pub image: ImagePayload,
    /// Pixel dimensions of the encoded crop
    pub width: u32,
    pub height: u32,
}

// ============================================================================
// Identification and validation
// ============================================================================

/// Structured identification of one crop
///
/// Unknown values are `None`, never empty strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identification {
    pub brand: Option<String>,
    pub model: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
    /// Confidence score (0.0-1.0)
    pub confidence: f32,
}

impl Identification {
    /// "Brand Model" style label, or None when neither is known
    pub fn display_name(&self) -> Option<String> {
        match (&self.brand, &self.model) {
            (Some(brand), Some(model)) => Some(format!("{} {}", brand, model)),
            (Some(brand), None) => Some(brand.clone()),
            (None, Some(model)) => Some(model.clone()),
            (None, None) => None,
        }
    }
}

/// Validator verdict on an identification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// The claim is consistent with the crop
    Verified,
    /// The crop visibly contradicts the claim
    Mismatch,
    /// The validator could neither confirm nor deny
    Uncertain,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Verified => "verified",
            Verdict::Mismatch => "mismatch",
            Verdict::Uncertain => "uncertain",
        }
    }
}

/// Result of re-examining a crop against its identification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Validation {
    pub verdict: Verdict,
    pub discrepancies: Vec<String>,
    pub corrected_brand: Option<String>,
    pub corrected_model: Option<String>,
    pub corrected_confidence: Option<f32>,
}

// ============================================================================
// Stages and outcomes
// ============================================================================

/// Pipeline stage names (used for timings and failure attribution)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Enumeration,
    CropExtraction,
    Identification,
    Validation,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Enumeration => "enumeration",
            PipelineStage::CropExtraction => "crop_extraction",
            PipelineStage::Identification => "identification",
            PipelineStage::Validation => "validation",
        }
    }
}

/// Terminal per-item status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    /// Identified; validation never started (run cancelled first)
    Identified,
    IdentificationFailed,
    IdentificationTimeout,
    /// Identified and validated (see the verdict)
    Validated,
    /// Identified; validation failed or timed out
    ValidationSkipped,
}

impl StageOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageOutcome::Identified => "identified",
            StageOutcome::IdentificationFailed => "identification_failed",
            StageOutcome::IdentificationTimeout => "identification_timeout",
            StageOutcome::Validated => "validated",
            StageOutcome::ValidationSkipped => "validation_skipped",
        }
    }

    /// True when the identification stage succeeded
    pub fn is_identified(&self) -> bool {
        matches!(
            self,
            StageOutcome::Identified | StageOutcome::Validated | StageOutcome::ValidationSkipped
        )
    }
}

/// Why an item stopped short of a full result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// External call returned an error
    ServiceError,
    /// External call returned a payload missing required fields
    MalformedResponse,
    /// External call exceeded its per-item timeout
    Timeout,
    /// Run was cancelled (caller signal or run budget) before the work started
    RunCancelled,
    /// Crop could not be produced for the region
    CropFailed,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::ServiceError => "service_error",
            FailureReason::MalformedResponse => "malformed_response",
            FailureReason::Timeout => "timeout",
            FailureReason::RunCancelled => "run_cancelled",
            FailureReason::CropFailed => "crop_failed",
        }
    }
}

/// Failure detail attached to an item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub stage: PipelineStage,
    pub reason: FailureReason,
    pub message: String,
}

/// Per-region result returned to the caller
#[derive(Debug, Clone)]
pub struct IdentifiedItem {
    pub region: Region,
    pub identification: Option<Identification>,
    /// Present only when `identification` is present
    pub validation: Option<Validation>,
    pub stage_outcome: StageOutcome,
    pub failure: Option<ItemFailure>,
    /// Identification attempts made (0 if never started)
    pub identify_attempts: u32,
    /// Crop bytes, only when the caller asked to retain crops
    pub crop: Option<Crop>,
}

impl IdentifiedItem {
    pub fn verdict(&self) -> Option<Verdict> {
        self.validation.as_ref().map(|v| v.verdict)
    }

    /// Brand to display: the validator's correction on mismatch, else the original
    pub fn effective_brand(&self) -> Option<&str> {
        if let Some(validation) = &self.validation {
            if validation.verdict == Verdict::Mismatch {
                if let Some(brand) = &validation.corrected_brand {
                    return Some(brand);
                }
            }
        }
        self.identification.as_ref().and_then(|i| i.brand.as_deref())
    }

    /// Model to display: the validator's correction on mismatch, else the original
    pub fn effective_model(&self) -> Option<&str> {
        if let Some(validation) = &self.validation {
            if validation.verdict == Verdict::Mismatch {
                if let Some(model) = &validation.corrected_model {
                    return Some(model);
                }
            }
        }
        self.identification.as_ref().and_then(|i| i.model.as_deref())
    }

    /// Confidence after validation (corrected when the validator supplied one)
    pub fn effective_confidence(&self) -> Option<f32> {
        let original = self.identification.as_ref()?.confidence;
        Some(
            self.validation
                .as_ref()
                .and_then(|v| v.corrected_confidence)
                .unwrap_or(original),
        )
    }
}

// ============================================================================
// Run-level types
// ============================================================================

/// Elapsed time per stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageTimings(BTreeMap<PipelineStage, Duration>);

impl StageTimings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, stage: PipelineStage, elapsed: Duration) {
        self.0.insert(stage, elapsed);
    }

    pub fn get(&self, stage: PipelineStage) -> Option<Duration> {
        self.0.get(&stage).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PipelineStage, Duration)> + '_ {
        self.0.iter().map(|(stage, elapsed)| (*stage, *elapsed))
    }
}

/// Run lifecycle state (forward only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Enumerating,
    Identifying,
    Validating,
    Complete,
}

impl RunState {
    /// A run never returns to an earlier state
    pub fn can_advance_to(&self, next: RunState) -> bool {
        next > *self
    }
}
