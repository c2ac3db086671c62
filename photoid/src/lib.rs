//! # photoid
//!
//! Photo-to-items identification: given one photo, find every distinct
//! product in it and name each one's brand and model, with a second-pass
//! validation of every identification.
//!
//! # Architecture
//! - [`stages`]: region enumeration, crop extraction, identification, validation
//! - [`workflow`]: the [`Pipeline`] orchestrator, options, statistics, telemetry
//! - [`services`]: external vision service traits and the OpenAI-compatible client
//! - [`image_source`]: image intake (bytes, data URLs, http URLs)
//!
//! # Example
//! ```no_run
//! # async fn run() -> anyhow::Result<()> {
//! use photoid::{ImageRef, Pipeline, PipelineOptions, RunReport, VisionClient};
//! use photoid_common::config::load_config;
//! use std::sync::Arc;
//!
//! let config = load_config(None)?;
//! photoid_common::logging::init_logging(&config.logging)?;
//! let client = Arc::new(VisionClient::from_config(&config.vision)?);
//! let pipeline = Pipeline::from_vision_client(client);
//!
//! let image = ImageRef::from_bytes(std::fs::read("shelf.jpg")?);
//! let run = pipeline
//!     .identify_items_in_photo(&image, PipelineOptions::from_defaults(&config.pipeline))
//!     .await?;
//! println!("{}", serde_json::to_string_pretty(&RunReport::from(&run))?);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod image_source;
pub mod services;
pub mod stages;
pub mod types;
pub mod workflow;

pub use error::{EnumerationError, IdentificationError, PipelineError, ServiceError};
pub use image_source::{ImagePayload, ImageRef, SourceImage};
pub use services::VisionClient;
pub use types::{
    BoundingBox, Crop, FailureReason, Identification, IdentifiedItem, ItemFailure, PipelineStage,
    Region, RegionId, RunState, StageOutcome, StageTimings, Validation, Verdict,
};
pub use workflow::{
    OutcomeRecorder, Pipeline, PipelineEvent, PipelineOptions, PipelineRun, RunReport,
    RunStatistics,
};
