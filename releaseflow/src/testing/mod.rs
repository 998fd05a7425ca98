//! Test doubles and fixtures.
//!
//! Everything here is usable from downstream crates' tests as well: a
//! scripted [`CommandRunner`](crate::exec::CommandRunner) that simulates the
//! file effects of `git clone` and `docker save`, a configurable mock stage,
//! and ready-made contexts.

mod fixtures;
mod mocks;

pub use fixtures::{
    stage_context, stage_context_for, stage_context_with_image, test_config, test_run_context,
    SAMPLE_DEPLOYMENT, TEST_RUN_NUMBER,
};
pub use mocks::{MockStage, ScriptedCommandRunner};
