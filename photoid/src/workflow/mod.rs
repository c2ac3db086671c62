//! Identification workflow
//!
//! Orchestrates the four stages over one photo and assembles the run result.
//!
//! # Architecture
//! - [`pipeline`]: `Pipeline` orchestrator (bounded pool, deadlines, cancellation)
//! - [`options`]: per-run tunables
//! - [`statistics`]: run-level counts
//! - [`telemetry`]: per-item outcome records
//! - [`report`]: camelCase wire format for callers

pub mod options;
pub mod pipeline;
pub mod report;
pub mod statistics;
pub mod telemetry;

pub use options::PipelineOptions;
pub use pipeline::Pipeline;
pub use report::RunReport;
pub use statistics::RunStatistics;
pub use telemetry::{ItemOutcomeRecord, OutcomeRecorder, TracingRecorder};

use crate::types::{IdentifiedItem, RegionId, RunState, StageOutcome, StageTimings, Verdict};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Dimensions and encoding of the analyzed photo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSummary {
    pub width: u32,
    pub height: u32,
    pub mime_type: String,
    pub byte_len: usize,
}

/// Result of one `identify_items_in_photo` call
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub image: ImageSummary,
    pub options: PipelineOptions,
    pub stage_timings: StageTimings,
    /// One entry per enumerated region, in discovery order
    pub items: Vec<IdentifiedItem>,
    pub statistics: RunStatistics,
    /// True when the caller or the run budget stopped new work early
    pub cancelled: bool,
}

/// Progress events emitted while a run executes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    RunStarted {
        run_id: Uuid,
        timestamp: i64,
    },
    StateChanged {
        run_id: Uuid,
        state: RunState,
    },
    RegionsEnumerated {
        run_id: Uuid,
        region_count: usize,
    },
    ItemCompleted {
        run_id: Uuid,
        region_id: RegionId,
        stage_outcome: StageOutcome,
        verdict: Option<Verdict>,
    },
    RunCompleted {
        run_id: Uuid,
        total_identified: usize,
        total_failed: usize,
        cancelled: bool,
        timestamp: i64,
    },
}
