//! Caller-facing run report
//!
//! Flattened camelCase JSON view of a [`PipelineRun`]. Enum values are
//! emitted as snake_case strings; crops appear as data URLs only when the
//! run retained them.

use super::PipelineRun;
use crate::types::{BoundingBox, IdentifiedItem};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub cancelled: bool,
    pub image: ImageReport,
    pub items: Vec<ItemReport>,
    pub statistics: StatisticsReport,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageReport {
    pub width: u32,
    pub height: u32,
    pub mime_type: String,
    pub byte_length: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoxReport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl From<BoundingBox> for BoxReport {
    fn from(b: BoundingBox) -> Self {
        Self {
            x: b.x,
            y: b.y,
            width: b.width,
            height: b.height,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentificationReport {
    pub brand: Option<String>,
    pub model: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub verdict: String,
    pub discrepancies: Vec<String>,
    pub corrected_brand: Option<String>,
    pub corrected_model: Option<String>,
    pub corrected_confidence: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemReport {
    pub region_id: u32,
    pub bounding_box: BoxReport,
    pub label_guess: Option<String>,
    pub detector_confidence: Option<f32>,
    pub stage_outcome: String,
    pub failure_stage: Option<String>,
    pub failure_reason: Option<String>,
    pub failure_message: Option<String>,
    pub identification: Option<IdentificationReport>,
    pub validation: Option<ValidationReport>,
    pub effective_brand: Option<String>,
    pub effective_model: Option<String>,
    pub effective_confidence: Option<f32>,
    pub identify_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub crop_data_url: Option<String>,
}

impl From<&IdentifiedItem> for ItemReport {
    fn from(item: &IdentifiedItem) -> Self {
        Self {
            region_id: item.region.id.0,
            bounding_box: item.region.bounding_box.into(),
            label_guess: item.region.label_guess.clone(),
            detector_confidence: item.region.detector_confidence,
            stage_outcome: item.stage_outcome.as_str().to_string(),
            failure_stage: item.failure.as_ref().map(|f| f.stage.as_str().to_string()),
            failure_reason: item.failure.as_ref().map(|f| f.reason.as_str().to_string()),
            failure_message: item.failure.as_ref().map(|f| f.message.clone()),
            identification: item.identification.as_ref().map(|i| IdentificationReport {
                brand: i.brand.clone(),
                model: i.model.clone(),
                category: i.category.clone(),
                description: i.description.clone(),
                color: i.color.clone(),
                confidence: i.confidence,
            }),
            validation: item.validation.as_ref().map(|v| ValidationReport {
                verdict: v.verdict.as_str().to_string(),
                discrepancies: v.discrepancies.clone(),
                corrected_brand: v.corrected_brand.clone(),
                corrected_model: v.corrected_model.clone(),
                corrected_confidence: v.corrected_confidence,
            }),
            effective_brand: item.effective_brand().map(str::to_string),
            effective_model: item.effective_model().map(str::to_string),
            effective_confidence: item.effective_confidence(),
            identify_attempts: item.identify_attempts,
            crop_data_url: item.crop.as_ref().map(|c| c.image.to_data_url()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsReport {
    pub total_detected: usize,
    pub total_identified: usize,
    pub total_verified: usize,
    pub total_mismatch: usize,
    pub total_uncertain: usize,
    pub total_partial: usize,
    pub total_failed: usize,
    /// Stage name → elapsed milliseconds
    pub stage_timings_ms: BTreeMap<String, u64>,
}

impl From<&PipelineRun> for RunReport {
    fn from(run: &PipelineRun) -> Self {
        let stats = &run.statistics;
        Self {
            run_id: run.run_id.to_string(),
            started_at: run.started_at,
            completed_at: run.completed_at,
            cancelled: run.cancelled,
            image: ImageReport {
                width: run.image.width,
                height: run.image.height,
                mime_type: run.image.mime_type.clone(),
                byte_length: run.image.byte_len,
            },
            items: run.items.iter().map(ItemReport::from).collect(),
            statistics: StatisticsReport {
                total_detected: stats.total_detected,
                total_identified: stats.total_identified,
                total_verified: stats.total_verified,
                total_mismatch: stats.total_mismatch,
                total_uncertain: stats.total_uncertain,
                total_partial: stats.total_partial,
                total_failed: stats.total_failed,
                stage_timings_ms: run
                    .stage_timings
                    .iter()
                    .map(|(stage, elapsed)| (stage.as_str().to_string(), elapsed.as_millis() as u64))
                    .collect(),
            },
        }
    }
}
