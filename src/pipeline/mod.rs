//! Interruptible pipeline orchestration.

pub mod orchestrator;

pub use orchestrator::{Orchestrator, PipelineOutcome};
