//! Concurrent thumbnail gallery builder.
//!
//! Fetches every item definition's source image, fingerprints and downsizes
//! it, drops near-duplicates, and seals the survivors plus a
//! `definitions.json` manifest into one zip archive.

pub mod config;
pub mod core;
pub mod services;

pub use config::{GalleryConfig, RetryPolicy};
pub use crate::core::pipeline::{GalleryOutput, GalleryPipeline, PipelineError, PipelineState};
