//! Per-run pipeline options
//!
//! Serialized in camelCase for callers that pass options as JSON. TOML
//! `[pipeline]` defaults (snake_case, all optional) overlay the compiled
//! defaults via [`PipelineOptions::from_defaults`].

use crate::error::PipelineError;
use crate::stages::crop_extractor::DEFAULT_CROP_PADDING;
use crate::stages::region_enumerator::DEFAULT_IOU_THRESHOLD;
use photoid_common::config::PipelineDefaults;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Options for one `identify_items_in_photo` run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineOptions {
    /// Passed through to the identification service
    pub category_hint: Option<String>,
    /// Cap on regions enumerated
    pub max_items: usize,
    /// Max in-flight identify/validate calls (shared pool)
    pub concurrency: usize,
    /// Identification timeout per item, shared by its retries
    pub identify_timeout_ms: u64,
    pub validate_timeout_ms: u64,
    /// Overall run budget
    pub run_timeout_ms: u64,
    /// Keep crop bytes on returned items
    pub retain_crops: bool,
    /// Overlap above which the smaller of two regions is dropped
    pub iou_threshold: f32,
    /// Crop padding per side, as a fraction of the region's longer side
    pub crop_padding: f32,
    /// Identification retries after a service error (timeouts never retry)
    pub identify_retries: u32,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            category_hint: None,
            max_items: 12,
            concurrency: 4,
            identify_timeout_ms: 15_000,
            validate_timeout_ms: 10_000,
            run_timeout_ms: 60_000,
            retain_crops: false,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            crop_padding: DEFAULT_CROP_PADDING,
            identify_retries: 1,
        }
    }
}

impl PipelineOptions {
    /// Compiled defaults overlaid with TOML `[pipeline]` values
    pub fn from_defaults(defaults: &PipelineDefaults) -> Self {
        let base = Self::default();
        Self {
            category_hint: defaults.category_hint.clone().or(base.category_hint),
            max_items: defaults.max_items.unwrap_or(base.max_items),
            concurrency: defaults.concurrency.unwrap_or(base.concurrency),
            identify_timeout_ms: defaults.identify_timeout_ms.unwrap_or(base.identify_timeout_ms),
            validate_timeout_ms: defaults.validate_timeout_ms.unwrap_or(base.validate_timeout_ms),
            run_timeout_ms: defaults.run_timeout_ms.unwrap_or(base.run_timeout_ms),
            retain_crops: defaults.retain_crops.unwrap_or(base.retain_crops),
            iou_threshold: defaults.iou_threshold.unwrap_or(base.iou_threshold),
            crop_padding: defaults.crop_padding.unwrap_or(base.crop_padding),
            identify_retries: defaults.identify_retries.unwrap_or(base.identify_retries),
        }
    }

    /// Reject out-of-range values before any work starts
    pub fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |msg: String| Err(PipelineError::InvalidOptions(msg));

        if self.max_items == 0 {
            return invalid("maxItems must be at least 1".to_string());
        }
        if self.concurrency == 0 {
            return invalid("concurrency must be at least 1".to_string());
        }
        for (name, value) in [
            ("identifyTimeoutMs", self.identify_timeout_ms),
            ("validateTimeoutMs", self.validate_timeout_ms),
            ("runTimeoutMs", self.run_timeout_ms),
        ] {
            if value == 0 {
                return invalid(format!("{} must be greater than 0", name));
            }
        }
        if !(self.iou_threshold > 0.0 && self.iou_threshold <= 1.0) {
            return invalid(format!(
                "iouThreshold must be in (0, 1], got {}",
                self.iou_threshold
            ));
        }
        if !(self.crop_padding >= 0.0 && self.crop_padding <= 1.0) {
            return invalid(format!(
                "cropPadding must be in [0, 1], got {}",
                self.crop_padding
            ));
        }
        Ok(())
    }

    pub fn identify_timeout(&self) -> Duration {
        Duration::from_millis(self.identify_timeout_ms)
    }

    pub fn validate_timeout(&self) -> Duration {
        Duration::from_millis(self.validate_timeout_ms)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_millis(self.run_timeout_ms)
    }
}
