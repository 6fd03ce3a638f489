//! Layout CLI: single generations, batch jobs and demo sites.
//!
//! - `layout generate`: one request file in, one result file out
//! - `layout batch`: a manifest of jobs through the retrying worker
//! - `layout demo`: write a synthetic request to try the engine with

pub mod backoff;
pub mod config;
pub mod demo;
pub mod worker;

use anyhow::{Context, Result};
use layout_core::{EngineConfig, ErrorClass, LayoutError};
use std::path::Path;

/// Engine configuration from a JSON file, or the defaults.
pub fn load_engine_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading engine config {}", path.display()))?;
    Ok(EngineConfig::from_json_str(&raw)?)
}

/// Process exit code for an error class.
pub fn exit_code(class: ErrorClass) -> i32 {
    match class {
        ErrorClass::InvalidInput => 2,
        ErrorClass::Internal => 3,
        ErrorClass::Retryable => 4,
    }
}

/// Exit code for an error reaching `main`. Errors that are not engine
/// errors (unreadable files, bad JSON) count as invalid input.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    let class = err
        .downcast_ref::<LayoutError>()
        .map(LayoutError::class)
        .unwrap_or(ErrorClass::InvalidInput);
    exit_code(class)
}
