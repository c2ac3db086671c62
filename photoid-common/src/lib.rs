//! # photoid Common Library
//!
//! Shared code for the photoid crates:
//! - Error types
//! - TOML configuration loading and API key resolution
//! - Tracing subscriber setup

pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
