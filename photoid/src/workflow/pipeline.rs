//! Pipeline orchestrator
//!
//! Runs one photo through enumeration, cropping, identification and
//! validation, and assembles the [`PipelineRun`].
//!
//! # Architecture
//! - Enumeration is a single call, raced against cancellation and the run
//!   deadline. Its failure is the only stage failure that aborts a run.
//! - Crops are cut synchronously, one per region.
//! - Identification and validation share one bounded pool of
//!   `concurrency` permits. Each task holds a permit only while its
//!   external call runs. Identify tasks are fed in as earlier ones finish,
//!   at most `concurrency` waiting at a time, so a validation queued by a
//!   finished identification is never stuck behind the whole backlog.
//! - Item results are written back by region index, so output order is
//!   discovery order regardless of completion order.
//!
//! # Cancellation
//! A caller token (or the run deadline) cancels a child token. Work that
//! has not acquired a permit is not started; in-flight calls finish or hit
//! their own timeout. Items that never started identification are marked
//! `identification_failed` / `run_cancelled`.

use super::options::PipelineOptions;
use super::statistics::RunStatistics;
use super::telemetry::{ItemOutcomeRecord, OutcomeRecorder, TracingRecorder};
use super::{ImageSummary, PipelineEvent, PipelineRun};
use crate::error::{IdentificationError, PipelineError};
use crate::image_source::{ImageRef, IMAGE_FETCH_TIMEOUT};
use crate::services::{DetectionService, IdentificationService, ValidationService, VisionClient};
use crate::stages::{
    crop_extractor, IdentifyAttempts, Identifier, RegionEnumerator, ValidationOutcome, Validator,
};
use crate::types::{
    Crop, FailureReason, Identification, IdentifiedItem, ItemFailure, PipelineStage, Region,
    RunState, StageOutcome, StageTimings, Validation,
};
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore, SemaphorePermit};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

// ============================================================================
// In-flight bookkeeping
// ============================================================================

/// Outcome of pooled work: either it ran, or cancellation kept it from starting
enum Work<T> {
    NotStarted,
    Finished {
        result: T,
        started: Instant,
        finished: Instant,
    },
}

/// Completed pool task, returned to the orchestrator loop
enum WorkerReport {
    Identify {
        index: usize,
        crop: Crop,
        work: Work<IdentifyAttempts>,
    },
    Validate {
        index: usize,
        crop: Crop,
        work: Work<ValidationOutcome>,
    },
}

/// Wall-clock window from the first call start to the last call end
#[derive(Debug, Default, Clone, Copy)]
struct ActivityWindow {
    first_start: Option<Instant>,
    last_end: Option<Instant>,
}

impl ActivityWindow {
    fn include(&mut self, started: Instant, finished: Instant) {
        self.first_start = Some(self.first_start.map_or(started, |s| s.min(started)));
        self.last_end = Some(self.last_end.map_or(finished, |e| e.max(finished)));
    }

    fn elapsed(&self) -> Option<Duration> {
        Some(self.last_end?.saturating_duration_since(self.first_start?))
    }
}

/// Per-region state while the run is in flight
struct ItemSlot {
    region: Region,
    identification: Option<Identification>,
    validation: Option<Validation>,
    outcome: Option<StageOutcome>,
    failure: Option<ItemFailure>,
    identify_attempts: u32,
    identify_elapsed: Option<Duration>,
    validate_elapsed: Option<Duration>,
    finished: Option<IdentifiedItem>,
}

impl ItemSlot {
    fn new(region: Region) -> Self {
        Self {
            region,
            identification: None,
            validation: None,
            outcome: None,
            failure: None,
            identify_attempts: 0,
            identify_elapsed: None,
            validate_elapsed: None,
            finished: None,
        }
    }

    fn fail(
        &mut self,
        outcome: StageOutcome,
        stage: PipelineStage,
        reason: FailureReason,
        message: impl Into<String>,
    ) {
        self.outcome = Some(outcome);
        self.failure = Some(ItemFailure {
            stage,
            reason,
            message: message.into(),
        });
    }

    /// Freeze the slot into its final item
    fn finish(&mut self, crop: Option<Crop>, retain_crops: bool) -> &IdentifiedItem {
        let item = IdentifiedItem {
            region: self.region.clone(),
            identification: self.identification.take(),
            validation: self.validation.take(),
            stage_outcome: self.outcome.unwrap_or(StageOutcome::IdentificationFailed),
            failure: self.failure.take(),
            identify_attempts: self.identify_attempts,
            crop: if retain_crops { crop } else { None },
        };
        self.finished.insert(item)
    }
}

/// Acquire a pool permit unless the run is cancelled first
async fn acquire<'a>(pool: &'a Semaphore, cancel: &CancellationToken) -> Option<SemaphorePermit<'a>> {
    let permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => return None,
        permit = pool.acquire() => permit.ok()?,
    };
    // Cancellation may have raced the permit grant
    if cancel.is_cancelled() {
        return None;
    }
    Some(permit)
}

// ============================================================================
// Pipeline
// ============================================================================

/// Photo-to-items identification pipeline
pub struct Pipeline {
    enumerator: RegionEnumerator,
    identifier: Identifier,
    validator: Validator,
    recorder: Arc<dyn OutcomeRecorder>,
    event_tx: Option<mpsc::Sender<PipelineEvent>>,
    http_client: reqwest::Client,
}

impl Pipeline {
    /// Create new pipeline over the three external services
    pub fn new(
        detector: Arc<dyn DetectionService>,
        identifier: Arc<dyn IdentificationService>,
        validator: Arc<dyn ValidationService>,
    ) -> Self {
        Self {
            enumerator: RegionEnumerator::new(detector),
            identifier: Identifier::new(identifier),
            validator: Validator::new(validator),
            recorder: Arc::new(TracingRecorder),
            event_tx: None,
            http_client: reqwest::Client::builder()
                .timeout(IMAGE_FETCH_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Create pipeline backed by one vision client for all three services
    pub fn from_vision_client(client: Arc<VisionClient>) -> Self {
        Self::new(client.clone(), client.clone(), client)
    }

    /// Attach an event channel for progress reporting
    pub fn with_events(mut self, event_tx: mpsc::Sender<PipelineEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Replace the default tracing-based outcome recorder
    pub fn with_recorder(mut self, recorder: Arc<dyn OutcomeRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// HTTP client used to fetch URL image references
    pub fn with_http_client(mut self, http_client: reqwest::Client) -> Self {
        self.http_client = http_client;
        self
    }

    /// Identify every product visible in a photo
    pub async fn identify_items_in_photo(
        &self,
        image: &ImageRef,
        options: PipelineOptions,
    ) -> Result<PipelineRun, PipelineError> {
        self.identify_items_in_photo_with_cancel(image, options, CancellationToken::new())
            .await
    }

    /// Identify items, stopping new work when `cancel` fires
    ///
    /// Cancellation yields a partial run (`cancelled = true`), not an error.
    /// The one exception is a URL image still downloading when `cancel` fires
    /// or the run budget runs out: with no photo there is no run to report,
    /// so that case returns [`PipelineError::ImageFetch`].
    pub async fn identify_items_in_photo_with_cancel(
        &self,
        image: &ImageRef,
        options: PipelineOptions,
        cancel: CancellationToken,
    ) -> Result<PipelineRun, PipelineError> {
        options.validate()?;

        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline_run", run_id = %run_id);
        self.execute(run_id, image, options, cancel)
            .instrument(span)
            .await
    }

    async fn execute(
        &self,
        run_id: Uuid,
        image: &ImageRef,
        options: PipelineOptions,
        cancel: CancellationToken,
    ) -> Result<PipelineRun, PipelineError> {
        let started_at = Utc::now();
        let deadline = Instant::now() + options.run_timeout();
        let run_token = cancel.child_token();
        let mut state = RunState::Enumerating;
        let mut timings = StageTimings::new();

        info!(
            max_items = options.max_items,
            concurrency = options.concurrency,
            run_timeout_ms = options.run_timeout_ms,
            category_hint = ?options.category_hint,
            "Starting identification run"
        );
        self.emit_event(PipelineEvent::RunStarted {
            run_id,
            timestamp: started_at.timestamp(),
        })
        .await;

        // A URL fetch is bounded by the run budget and the caller's token
        let loaded = tokio::select! {
            biased;
            result = image.load(&self.http_client) => result,
            _ = run_token.cancelled() => Err(PipelineError::ImageFetch(
                "run cancelled while loading the source image".to_string(),
            )),
            _ = sleep_until(deadline) => {
                run_token.cancel();
                Err(PipelineError::ImageFetch(format!(
                    "source image not loaded within the {} ms run budget",
                    options.run_timeout_ms
                )))
            }
        };
        let source = loaded.map_err(|e| {
            error!(error = %e, "Source image rejected");
            e
        })?;
        let summary = ImageSummary {
            width: source.width(),
            height: source.height(),
            mime_type: source.payload().mime_type.clone(),
            byte_len: source.payload().len(),
        };

        // ====================================================================
        // Stage 1: region enumeration
        // ====================================================================
        let enumeration_start = Instant::now();
        let enumerated = tokio::select! {
            biased;
            _ = run_token.cancelled() => None,
            _ = sleep_until(deadline) => {
                run_token.cancel();
                None
            }
            result = self.enumerator.enumerate(&source, &options) => Some(result),
        };
        timings.record(PipelineStage::Enumeration, enumeration_start.elapsed());

        let regions = match enumerated {
            Some(Ok(regions)) => regions,
            Some(Err(e)) => {
                error!(error = %e, "Region enumeration failed");
                return Err(e.into());
            }
            None => {
                warn!("Run cancelled during region enumeration");
                Vec::new()
            }
        };
        self.emit_event(PipelineEvent::RegionsEnumerated {
            run_id,
            region_count: regions.len(),
        })
        .await;

        // ====================================================================
        // Stage 2: crop extraction (synchronous)
        // ====================================================================
        let crop_start = Instant::now();
        let mut slots = Vec::with_capacity(regions.len());
        let mut crops = Vec::with_capacity(regions.len());
        for region in regions {
            crops.push(crop_extractor::extract(&source, &region, options.crop_padding));
            slots.push(ItemSlot::new(region));
        }
        timings.record(PipelineStage::CropExtraction, crop_start.elapsed());
        drop(source);

        // ====================================================================
        // Stages 3-4: identification and validation on the shared pool
        // ====================================================================
        self.advance(run_id, &mut state, RunState::Identifying).await;

        let pool = Semaphore::new(options.concurrency);
        let mut tasks: FuturesUnordered<BoxFuture<'_, WorkerReport>> = FuturesUnordered::new();
        let mut backlog = Vec::with_capacity(crops.len());
        let mut identify_window = ActivityWindow::default();
        let mut validate_window = ActivityWindow::default();

        for (index, crop) in crops.into_iter().enumerate() {
            match crop {
                Ok(crop) => backlog.push((index, crop)),
                Err(e) => {
                    let slot = &mut slots[index];
                    warn!(region_id = %slot.region.id, error = %e, "Crop extraction failed");
                    slot.fail(
                        StageOutcome::IdentificationFailed,
                        PipelineStage::CropExtraction,
                        FailureReason::CropFailed,
                        e.to_string(),
                    );
                    self.complete_item(run_id, slot, None, false).await;
                }
            }
        }

        let mut pending_identify = backlog.len();
        let mut backlog = backlog.into_iter();
        for (index, crop) in backlog.by_ref().take(options.concurrency) {
            tasks.push(
                self.identify_worker(index, crop, &options, &pool, &run_token)
                    .boxed(),
            );
        }

        if pending_identify == 0 {
            self.advance(run_id, &mut state, RunState::Validating).await;
        }

        loop {
            tokio::select! {
                report = tasks.next() => {
                    let Some(report) = report else { break };

                    match report {
                        WorkerReport::Identify { index, crop, work } => {
                            pending_identify -= 1;
                            let slot = &mut slots[index];

                            match work {
                                Work::NotStarted => {
                                    slot.fail(
                                        StageOutcome::IdentificationFailed,
                                        PipelineStage::Identification,
                                        FailureReason::RunCancelled,
                                        "run cancelled before identification started",
                                    );
                                    self.complete_item(run_id, slot, Some(crop), options.retain_crops)
                                        .await;
                                }
                                Work::Finished { result, started, finished } => {
                                    identify_window.include(started, finished);
                                    slot.identify_attempts = result.attempts;
                                    slot.identify_elapsed =
                                        Some(finished.saturating_duration_since(started));

                                    match result.result {
                                        Ok(identification) if !run_token.is_cancelled() => {
                                            slot.identification = Some(identification.clone());
                                            slot.outcome = Some(StageOutcome::Identified);
                                            tasks.push(
                                                self.validate_worker(
                                                    index,
                                                    crop,
                                                    identification,
                                                    &options,
                                                    &pool,
                                                    &run_token,
                                                )
                                                .boxed(),
                                            );
                                        }
                                        Ok(identification) => {
                                            debug!(
                                                region_id = %slot.region.id,
                                                "Run cancelled, validation not started"
                                            );
                                            slot.identification = Some(identification);
                                            slot.outcome = Some(StageOutcome::Identified);
                                            self.complete_item(run_id, slot, Some(crop), options.retain_crops)
                                                .await;
                                        }
                                        Err(IdentificationError::Timeout(limit)) => {
                                            slot.fail(
                                                StageOutcome::IdentificationTimeout,
                                                PipelineStage::Identification,
                                                FailureReason::Timeout,
                                                format!("identification timed out after {:?}", limit),
                                            );
                                            self.complete_item(run_id, slot, Some(crop), options.retain_crops)
                                                .await;
                                        }
                                        Err(IdentificationError::Service(e)) => {
                                            let reason = if e.is_malformed() {
                                                FailureReason::MalformedResponse
                                            } else {
                                                FailureReason::ServiceError
                                            };
                                            slot.fail(
                                                StageOutcome::IdentificationFailed,
                                                PipelineStage::Identification,
                                                reason,
                                                e.to_string(),
                                            );
                                            self.complete_item(run_id, slot, Some(crop), options.retain_crops)
                                                .await;
                                        }
                                    }
                                }
                            }

                            // Queued after this item's validation, so that goes first
                            if let Some((next, next_crop)) = backlog.next() {
                                tasks.push(
                                    self.identify_worker(next, next_crop, &options, &pool, &run_token)
                                        .boxed(),
                                );
                            }

                            if pending_identify == 0 {
                                self.advance(run_id, &mut state, RunState::Validating).await;
                            }
                        }

                        WorkerReport::Validate { index, crop, work } => {
                            let slot = &mut slots[index];

                            match work {
                                Work::NotStarted => {
                                    debug!(
                                        region_id = %slot.region.id,
                                        "Run cancelled, validation not started"
                                    );
                                }
                                Work::Finished { result, started, finished } => {
                                    validate_window.include(started, finished);
                                    slot.validate_elapsed =
                                        Some(finished.saturating_duration_since(started));

                                    match result {
                                        ValidationOutcome::Completed(validation) => {
                                            slot.validation = Some(validation);
                                            slot.outcome = Some(StageOutcome::Validated);
                                        }
                                        ValidationOutcome::Skipped { reason, message } => {
                                            slot.fail(
                                                StageOutcome::ValidationSkipped,
                                                PipelineStage::Validation,
                                                reason,
                                                message,
                                            );
                                        }
                                    }
                                }
                            }

                            self.complete_item(run_id, slot, Some(crop), options.retain_crops)
                                .await;
                        }
                    }
                }

                _ = sleep_until(deadline), if !run_token.is_cancelled() => {
                    warn!(
                        run_timeout_ms = options.run_timeout_ms,
                        "Run budget exhausted, no new work will start"
                    );
                    run_token.cancel();
                }
            }
        }

        drop(tasks);

        if let Some(elapsed) = identify_window.elapsed() {
            timings.record(PipelineStage::Identification, elapsed);
        }
        if let Some(elapsed) = validate_window.elapsed() {
            timings.record(PipelineStage::Validation, elapsed);
        }

        let mut items = Vec::with_capacity(slots.len());
        for mut slot in slots {
            if slot.finished.is_none() {
                slot.fail(
                    StageOutcome::IdentificationFailed,
                    PipelineStage::Identification,
                    FailureReason::RunCancelled,
                    "run ended before the item finished",
                );
                self.complete_item(run_id, &mut slot, None, false).await;
            }
            if let Some(item) = slot.finished {
                items.push(item);
            }
        }

        self.advance(run_id, &mut state, RunState::Complete).await;

        let cancelled = run_token.is_cancelled();
        let statistics = RunStatistics::from_items(&items, timings.clone());

        info!(
            cancelled = cancelled,
            summary = %statistics.display_string(),
            "Identification run complete"
        );
        self.emit_event(PipelineEvent::RunCompleted {
            run_id,
            total_identified: statistics.total_identified,
            total_failed: statistics.total_failed,
            cancelled,
            timestamp: Utc::now().timestamp(),
        })
        .await;

        Ok(PipelineRun {
            run_id,
            started_at,
            completed_at: Utc::now(),
            image: summary,
            options,
            stage_timings: timings,
            items,
            statistics,
            cancelled,
        })
    }

    /// Identify one crop once a pool permit is available
    async fn identify_worker(
        &self,
        index: usize,
        crop: Crop,
        options: &PipelineOptions,
        pool: &Semaphore,
        cancel: &CancellationToken,
    ) -> WorkerReport {
        let work = match acquire(pool, cancel).await {
            None => Work::NotStarted,
            Some(_permit) => {
                let started = Instant::now();
                let result = self.identifier.identify_with_attempts(&crop, options).await;
                Work::Finished {
                    result,
                    started,
                    finished: Instant::now(),
                }
            }
        };
        WorkerReport::Identify { index, crop, work }
    }

    /// Validate one identification once a pool permit is available
    async fn validate_worker(
        &self,
        index: usize,
        crop: Crop,
        identification: Identification,
        options: &PipelineOptions,
        pool: &Semaphore,
        cancel: &CancellationToken,
    ) -> WorkerReport {
        let work = match acquire(pool, cancel).await {
            None => Work::NotStarted,
            Some(_permit) => {
                let started = Instant::now();
                let result = self.validator.validate(&crop, &identification, options).await;
                Work::Finished {
                    result,
                    started,
                    finished: Instant::now(),
                }
            }
        };
        WorkerReport::Validate { index, crop, work }
    }

    /// Finalize an item: telemetry, then progress event
    async fn complete_item(
        &self,
        run_id: Uuid,
        slot: &mut ItemSlot,
        crop: Option<Crop>,
        retain_crops: bool,
    ) {
        let identify_elapsed = slot.identify_elapsed;
        let validate_elapsed = slot.validate_elapsed;
        let item = slot.finish(crop, retain_crops);

        let record = ItemOutcomeRecord::new(run_id, item, identify_elapsed, validate_elapsed);
        let event = PipelineEvent::ItemCompleted {
            run_id,
            region_id: item.region.id,
            stage_outcome: item.stage_outcome,
            verdict: item.verdict(),
        };

        self.recorder.record(&record).await;
        self.emit_event(event).await;
    }

    /// Move the run state forward (never backward)
    async fn advance(&self, run_id: Uuid, state: &mut RunState, next: RunState) {
        if !state.can_advance_to(next) {
            return;
        }
        debug!(from = ?state, to = ?next, "Run state changed");
        *state = next;
        self.emit_event(PipelineEvent::StateChanged { run_id, state: next })
            .await;
    }

    /// Emit event if channel configured
    async fn emit_event(&self, event: PipelineEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }
}
