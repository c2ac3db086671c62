//! Per-item outcome telemetry
//!
//! Every item that reaches a terminal state is handed to an
//! [`OutcomeRecorder`] before the run returns. Recording is awaited but its
//! failures are the recorder's concern; the pipeline never fails because of
//! telemetry.

use crate::types::{FailureReason, IdentifiedItem, RegionId, StageOutcome, Verdict};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Telemetry record for one finished item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemOutcomeRecord {
    pub run_id: Uuid,
    pub region_id: RegionId,
    pub stage_outcome: StageOutcome,
    pub verdict: Option<Verdict>,
    pub failure_reason: Option<FailureReason>,
    pub identify_attempts: u32,
    pub identify_ms: Option<u64>,
    pub validate_ms: Option<u64>,
    pub recorded_at: DateTime<Utc>,
}

impl ItemOutcomeRecord {
    /// Build a record from a finished item and its stage durations
    pub fn new(
        run_id: Uuid,
        item: &IdentifiedItem,
        identify_elapsed: Option<Duration>,
        validate_elapsed: Option<Duration>,
    ) -> Self {
        Self {
            run_id,
            region_id: item.region.id,
            stage_outcome: item.stage_outcome,
            verdict: item.verdict(),
            failure_reason: item.failure.as_ref().map(|f| f.reason),
            identify_attempts: item.identify_attempts,
            identify_ms: identify_elapsed.map(|d| d.as_millis() as u64),
            validate_ms: validate_elapsed.map(|d| d.as_millis() as u64),
            recorded_at: Utc::now(),
        }
    }
}

/// Sink for per-item outcomes
#[async_trait]
pub trait OutcomeRecorder: Send + Sync {
    async fn record(&self, record: &ItemOutcomeRecord);
}

/// Records outcomes as structured `tracing` events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRecorder;

#[async_trait]
impl OutcomeRecorder for TracingRecorder {
    async fn record(&self, record: &ItemOutcomeRecord) {
        info!(
            run_id = %record.run_id,
            region_id = %record.region_id,
            stage_outcome = record.stage_outcome.as_str(),
            verdict = record.verdict.map(|v| v.as_str()),
            failure_reason = record.failure_reason.map(|r| r.as_str()),
            identify_attempts = record.identify_attempts,
            identify_ms = record.identify_ms,
            validate_ms = record.validate_ms,
            "Item outcome"
        );
    }
}
