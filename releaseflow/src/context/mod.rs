//! Context management for pipeline runs.
//!
//! This module provides:
//! - Run identity and trigger events
//! - The immutable run context shared by every stage of a run
//! - Per-stage contexts carrying the outputs of upstream stages

mod execution;
mod identity;
mod inputs;

pub use execution::{RunContext, StageContext};
pub use identity::{RunIdentity, TriggerEvent};
pub use inputs::StageInputs;
