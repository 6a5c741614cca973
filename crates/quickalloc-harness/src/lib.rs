//! Tooling around quickalloc-core.
//!
//! This crate provides:
//! - Size-class reports: the class table an instance would build, as JSON
//! - Stress runs: a seeded multi-threaded malloc/realloc/free workload that
//!   checks alignment, pointer distinctness and content preservation
//! - Configuration loading from JSON files and `QUICKALLOC_*` variables

#![deny(unsafe_code)]

pub mod size_classes;
pub mod stress;

use std::path::Path;

use quickalloc_core::{AllocError, QuickAllocConfig};
use thiserror::Error;

pub use size_classes::SizeClassReport;
pub use stress::{StressOptions, StressReport};

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("allocator: {0}")]
    Alloc(#[from] AllocError),
    #[error("invalid option: {0}")]
    InvalidOption(String),
    #[error("stress worker {thread} panicked")]
    WorkerPanicked { thread: usize },
}

/// Resolves the configuration for a command.
///
/// A config file wins over the environment; with neither, the built-in
/// defaults are used.
pub fn load_config(path: Option<&Path>, from_env: bool) -> Result<QuickAllocConfig, HarnessError> {
    if let Some(path) = path {
        let text = std::fs::read_to_string(path)?;
        return Ok(QuickAllocConfig::from_json(&text)?);
    }
    if from_env {
        return Ok(QuickAllocConfig::from_env());
    }
    Ok(QuickAllocConfig::default())
}
