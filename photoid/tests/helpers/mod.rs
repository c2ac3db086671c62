//! Test Helper Utilities
//!
//! Shared utilities for testing photoid

pub mod log_capture;
pub mod scene;
pub mod stubs;

// Re-export commonly used items
pub use log_capture::{capture_logs, LogCapture};
pub use scene::{row_of_boxes, scene_png};
pub use stubs::{
    identification_reply, CallGauge, RecordingRecorder, Scripted, StubDetector, StubIdentifier,
    StubValidator,
};
