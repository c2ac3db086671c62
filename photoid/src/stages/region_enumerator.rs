//! Region Enumerator (Stage 1)
//!
//! Asks the detection service for candidate objects, then normalizes,
//! de-duplicates and caps them.
//!
//! # Algorithm
//! 1. Coerce each detection into a box (object or `[x, y, w, h]` form);
//!    pixel-space boxes are normalized by the image dimensions
//! 2. Assign region ids in detector order (ids are never reused)
//! 3. Clamp boxes to the unit square, drop zero-area boxes
//! 4. Greedy de-dup, largest first: drop a box whose IoU with any kept box
//!    is at or above the threshold
//! 5. Rank by detector confidence (if every region has one) else by area,
//!    keep the top `max_items`
//! 6. Return regions in discovery order

use crate::error::EnumerationError;
use crate::image_source::SourceImage;
use crate::services::reply::{self, field};
use crate::services::DetectionService;
use crate::types::{BoundingBox, Region, RegionId};
use crate::workflow::options::PipelineOptions;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default overlap at which the smaller of two regions is dropped
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.6;

/// Keys under which detectors return their object list
const LIST_KEYS: &[&str] = &["objects", "items", "regions", "detections", "products"];
const BOX_KEYS: &[&str] = &["box", "boundingBox", "bounding_box", "bbox"];
const LABEL_KEYS: &[&str] = &["labelGuess", "label", "name", "category"];
const CONFIDENCE_KEYS: &[&str] = &["detectorConfidence", "confidence", "score"];

/// One detection before de-duplication
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bounding_box: BoundingBox,
    pub label_guess: Option<String>,
    pub confidence: Option<f32>,
}

/// Region enumeration stage
pub struct RegionEnumerator {
    service: Arc<dyn DetectionService>,
}

impl RegionEnumerator {
    /// Create new enumerator over a detection service
    pub fn new(service: Arc<dyn DetectionService>) -> Self {
        Self { service }
    }

    /// Enumerate candidate regions in the source image
    ///
    /// An empty list is a valid result; detector errors are not.
    pub async fn enumerate(
        &self,
        image: &SourceImage,
        options: &PipelineOptions,
    ) -> Result<Vec<Region>, EnumerationError> {
        debug!(service = self.service.name(), "Requesting object detection");

        let reply = self.service.detect(image.payload()).await?;
        let detections = parse_detections(&reply, image.width(), image.height())?;
        let candidates = detections.len();
        let regions = select_regions(detections, options.iou_threshold, options.max_items);

        info!(
            candidates = candidates,
            regions = regions.len(),
            max_items = options.max_items,
            "Regions enumerated"
        );

        Ok(regions)
    }
}

// ============================================================================
// Reply coercion
// ============================================================================

/// Coerce a detection reply into detections, in detector order
///
/// Entries without a usable box are skipped. A reply that is not a list
/// (bare or under a known key) is malformed.
pub fn parse_detections(
    reply: &Value,
    image_width: u32,
    image_height: u32,
) -> Result<Vec<Detection>, EnumerationError> {
    let entries = match reply {
        Value::Array(entries) => entries,
        Value::Object(object) => match field(object, LIST_KEYS) {
            Some(Value::Array(entries)) => entries,
            _ => {
                return Err(EnumerationError::MalformedResponse(
                    "detection reply has no object list".to_string(),
                ))
            }
        },
        _ => {
            return Err(EnumerationError::MalformedResponse(
                "detection reply is neither a list nor an object".to_string(),
            ))
        }
    };

    let mut detections = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let Some(object) = entry.as_object() else {
            warn!(index = index, "Skipping detection that is not an object");
            continue;
        };
        let Some(raw_box) = field(object, BOX_KEYS).and_then(parse_box) else {
            warn!(index = index, "Skipping detection without a usable box");
            continue;
        };

        detections.push(Detection {
            bounding_box: normalize_box(raw_box, image_width, image_height),
            label_guess: reply::optional_string(object, LABEL_KEYS),
            confidence: field(object, CONFIDENCE_KEYS).and_then(reply::confidence),
        });
    }

    Ok(detections)
}

fn parse_box(value: &Value) -> Option<BoundingBox> {
    match value {
        Value::Array(items) if items.len() == 4 => {
            let n: Vec<f32> = items.iter().filter_map(reply::number).collect();
            (n.len() == 4).then(|| BoundingBox::new(n[0], n[1], n[2], n[3]))
        }
        Value::Object(object) => parse_box_object(object),
        _ => None,
    }
}

fn parse_box_object(object: &Map<String, Value>) -> Option<BoundingBox> {
    let get = |keys: &[&str]| field(object, keys).and_then(reply::number);
    Some(BoundingBox::new(
        get(&["x", "left"])?,
        get(&["y", "top"])?,
        get(&["width", "w"])?,
        get(&["height", "h"])?,
    ))
}

/// Boxes with any coordinate beyond 1.0 are taken as pixel coordinates
fn normalize_box(raw: BoundingBox, image_width: u32, image_height: u32) -> BoundingBox {
    let pixel_space = [raw.x, raw.y, raw.width, raw.height]
        .iter()
        .any(|v| *v > 1.0);
    if !pixel_space || image_width == 0 || image_height == 0 {
        return raw;
    }
    let (w, h) = (image_width as f32, image_height as f32);
    BoundingBox::new(raw.x / w, raw.y / h, raw.width / w, raw.height / h)
}

// ============================================================================
// Selection
// ============================================================================

/// Clamp, de-duplicate, cap, and order detections as Regions
pub fn select_regions(
    detections: Vec<Detection>,
    iou_threshold: f32,
    max_items: usize,
) -> Vec<Region> {
    let mut candidates: Vec<Region> = detections
        .into_iter()
        .enumerate()
        .filter_map(|(index, detection)| {
            let id = RegionId(index as u32);
            let bounding_box = detection.bounding_box.clamp_to_unit();
            if bounding_box.is_degenerate() {
                debug!(region_id = %id, "Dropping zero-area detection");
                return None;
            }
            Some(Region {
                id,
                bounding_box,
                label_guess: detection.label_guess,
                detector_confidence: detection.confidence,
            })
        })
        .collect();

    // Largest first; ties keep detector order
    candidates.sort_by(|a, b| by_area_desc(a, b).then(a.id.cmp(&b.id)));

    let mut kept: Vec<Region> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let duplicate_of = kept
            .iter()
            .find(|k| k.bounding_box.iou(&candidate.bounding_box) >= iou_threshold);
        match duplicate_of {
            Some(larger) => debug!(
                dropped = %candidate.id,
                kept = %larger.id,
                "Dropping overlapping detection"
            ),
            None => kept.push(candidate),
        }
    }

    if kept.iter().all(|r| r.detector_confidence.is_some()) {
        kept.sort_by(|a, b| {
            let (ca, cb) = (a.detector_confidence.unwrap_or(0.0), b.detector_confidence.unwrap_or(0.0));
            cb.partial_cmp(&ca)
                .unwrap_or(Ordering::Equal)
                .then_with(|| by_area_desc(a, b))
                .then(a.id.cmp(&b.id))
        });
    }
    kept.truncate(max_items);

    kept.sort_by_key(|r| r.id);
    kept
}

fn by_area_desc(a: &Region, b: &Region) -> Ordering {
    b.bounding_box
        .area()
        .partial_cmp(&a.bounding_box.area())
        .unwrap_or(Ordering::Equal)
}
