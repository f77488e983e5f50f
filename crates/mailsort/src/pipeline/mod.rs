//! Per-account sync → classify → act runs.

pub mod config;
pub mod error;
pub mod runner;
pub mod summary;

pub use config::{ActionMode, PipelineConfig};
pub use error::PipelineError;
pub use runner::PipelineDriver;
pub use summary::RunSummary;
