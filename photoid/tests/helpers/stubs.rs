//! Scripted stand-ins for the external vision services
//!
//! Replies are keyed by region index (see `scene::region_index`). Every
//! identify/validate call passes through a shared [`CallGauge`] so tests
//! can assert the in-flight bound.

use super::scene::region_index;
use async_trait::async_trait;
use photoid::services::{
    ClaimedIdentity, DetectionService, IdentificationService, ValidationService,
};
use photoid::workflow::{ItemOutcomeRecord, OutcomeRecorder};
use photoid::{BoundingBox, ImagePayload, ServiceError};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Call gauge
// ============================================================================

/// Tracks concurrent and total external calls, and the order they started in
#[derive(Debug, Default)]
pub struct CallGauge {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    total: AtomicUsize,
    starts: Mutex<Vec<&'static str>>,
}

impl CallGauge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mark a `kind` call as started; it ends when the guard drops
    pub fn enter(self: &Arc<Self>, kind: &'static str) -> GaugeGuard {
        self.starts.lock().unwrap().push(kind);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
        GaugeGuard(Arc::clone(self))
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Call kinds ("identify" / "validate") in start order
    pub fn starts(&self) -> Vec<&'static str> {
        self.starts.lock().unwrap().clone()
    }
}

pub struct GaugeGuard(Arc<CallGauge>);

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Scripted replies
// ============================================================================

/// One scripted reply, optionally delayed
#[derive(Debug, Clone)]
pub struct Scripted {
    pub delay: Duration,
    pub reply: Result<Value, ServiceError>,
}

impl Scripted {
    pub fn ok(value: Value) -> Self {
        Self {
            delay: Duration::ZERO,
            reply: Ok(value),
        }
    }

    pub fn err(error: ServiceError) -> Self {
        Self {
            delay: Duration::ZERO,
            reply: Err(error),
        }
    }

    pub fn after_ms(mut self, millis: u64) -> Self {
        self.delay = Duration::from_millis(millis);
        self
    }
}

pub fn identification_reply(brand: &str, model: &str, confidence: f64) -> Value {
    json!({
        "brand": brand,
        "model": model,
        "category": "product",
        "description": format!("{} {}", brand, model),
        "confidence": confidence
    })
}

pub fn detection_reply(boxes: &[BoundingBox]) -> Value {
    let objects: Vec<Value> = boxes
        .iter()
        .map(|b| {
            json!({
                "label": "product",
                "box": { "x": b.x, "y": b.y, "width": b.width, "height": b.height },
                "confidence": 0.9
            })
        })
        .collect();
    json!({ "objects": objects })
}

// ============================================================================
// Detection
// ============================================================================

pub struct StubDetector {
    script: Scripted,
    calls: AtomicUsize,
}

impl StubDetector {
    pub fn new(script: Scripted) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn returning(boxes: &[BoundingBox]) -> Arc<Self> {
        Self::new(Scripted::ok(detection_reply(boxes)))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DetectionService for StubDetector {
    fn name(&self) -> &'static str {
        "stub-detector"
    }

    async fn detect(&self, _image: &ImagePayload) -> Result<Value, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.script.delay).await;
        self.script.reply.clone()
    }
}

// ============================================================================
// Identification
// ============================================================================

pub struct StubIdentifier {
    overrides: HashMap<usize, Scripted>,
    base_delay: Duration,
    gauge: Arc<CallGauge>,
    cancel_after: Option<(usize, CancellationToken)>,
    completed: AtomicUsize,
    hints: Mutex<Vec<Option<String>>>,
}

impl StubIdentifier {
    /// Region `i` is identified as "Brand{i}" / "Model {i}" unless overridden
    pub fn new(gauge: Arc<CallGauge>) -> Self {
        Self {
            overrides: HashMap::new(),
            base_delay: Duration::ZERO,
            gauge,
            cancel_after: None,
            completed: AtomicUsize::new(0),
            hints: Mutex::new(Vec::new()),
        }
    }

    pub fn with_reply(mut self, region: usize, script: Scripted) -> Self {
        self.overrides.insert(region, script);
        self
    }

    pub fn with_delay_ms(mut self, millis: u64) -> Self {
        self.base_delay = Duration::from_millis(millis);
        self
    }

    /// Cancel `token` as the `calls`-th call completes
    pub fn cancel_after(mut self, calls: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((calls, token));
        self
    }

    pub fn hints(&self) -> Vec<Option<String>> {
        self.hints.lock().unwrap().clone()
    }
}

#[async_trait]
impl IdentificationService for StubIdentifier {
    fn name(&self) -> &'static str {
        "stub-identifier"
    }

    async fn identify(
        &self,
        crop: &ImagePayload,
        category_hint: Option<&str>,
    ) -> Result<Value, ServiceError> {
        let region = region_index(crop);
        self.hints
            .lock()
            .unwrap()
            .push(category_hint.map(str::to_string));
        let _in_flight = self.gauge.enter("identify");

        let script = self.overrides.get(&region).cloned().unwrap_or_else(|| {
            Scripted::ok(identification_reply(
                &format!("Brand{}", region),
                &format!("Model {}", region),
                0.9,
            ))
        });
        tokio::time::sleep(self.base_delay + script.delay).await;

        let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, token)) = &self.cancel_after {
            if done == *after {
                token.cancel();
            }
        }

        script.reply
    }
}

// ============================================================================
// Validation
// ============================================================================

pub struct StubValidator {
    overrides: HashMap<usize, Scripted>,
    base_delay: Duration,
    gauge: Arc<CallGauge>,
    claims: Mutex<Vec<ClaimedIdentity>>,
}

impl StubValidator {
    /// Every region is verified unless overridden
    pub fn new(gauge: Arc<CallGauge>) -> Self {
        Self {
            overrides: HashMap::new(),
            base_delay: Duration::ZERO,
            gauge,
            claims: Mutex::new(Vec::new()),
        }
    }

    pub fn with_reply(mut self, region: usize, script: Scripted) -> Self {
        self.overrides.insert(region, script);
        self
    }

    pub fn with_delay_ms(mut self, millis: u64) -> Self {
        self.base_delay = Duration::from_millis(millis);
        self
    }

    pub fn claims(&self) -> Vec<ClaimedIdentity> {
        self.claims.lock().unwrap().clone()
    }
}

#[async_trait]
impl ValidationService for StubValidator {
    fn name(&self) -> &'static str {
        "stub-validator"
    }

    async fn validate(
        &self,
        crop: &ImagePayload,
        claim: &ClaimedIdentity,
    ) -> Result<Value, ServiceError> {
        let region = region_index(crop);
        self.claims.lock().unwrap().push(claim.clone());
        let _in_flight = self.gauge.enter("validate");

        let script = self
            .overrides
            .get(&region)
            .cloned()
            .unwrap_or_else(|| Scripted::ok(json!({ "verdict": "verified", "discrepancies": [] })));
        tokio::time::sleep(self.base_delay + script.delay).await;

        script.reply
    }
}

// ============================================================================
// Telemetry
// ============================================================================

/// Keeps every outcome record in memory
#[derive(Default)]
pub struct RecordingRecorder {
    records: Mutex<Vec<ItemOutcomeRecord>>,
}

impl RecordingRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn records(&self) -> Vec<ItemOutcomeRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutcomeRecorder for RecordingRecorder {
    async fn record(&self, record: &ItemOutcomeRecord) {
        self.records.lock().unwrap().push(record.clone());
    }
}
