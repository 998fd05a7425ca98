//! Core domain model types for releaseflow.
//!
//! This module contains the fundamental types used throughout the orchestrator:
//! - Stage and run status enums
//! - Stage output type with factory methods
//! - Image artifacts and the compensation record of a failed stage

mod artifact;
mod compensation;
mod output;
mod status;

pub use artifact::{archive_digest, ImageArtifact, ImageReference};
pub use compensation::{CompensationOutcome, CompensationRecord};
pub use output::StageOutput;
pub use status::{RunStatus, StageStatus};
