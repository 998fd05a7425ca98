//! Stage trait and implementations.
//!
//! Stages are the units of work of a release pipeline. The concrete release
//! stages live in [`release`].

pub mod release;

use crate::context::StageContext;
use crate::core::{CompensationRecord, StageOutput};
use async_trait::async_trait;
use std::fmt::Debug;

/// Trait for pipeline stages.
///
/// A stage runs to completion and reports `succeeded` or `failed` through
/// its [`StageOutput`]; it is never suspended or cancelled midway.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// Executes the stage.
    async fn execute(&self, ctx: &StageContext) -> StageOutput;
}

/// A compensating action attached to a stage's failure transition.
///
/// It runs after the stage failed and before the stage is recorded as
/// terminal, so downstream stages observe its effects. It cannot turn the
/// failure into a success.
#[async_trait]
pub trait Compensation: Send + Sync + Debug {
    /// Returns the name of the compensation.
    fn name(&self) -> &str;

    /// Reacts to the failed output of the stage.
    async fn compensate(&self, ctx: &StageContext, failure: &StageOutput) -> CompensationRecord;
}

/// A simple function-based stage.
pub struct FnStage<F>
where
    F: Fn(&StageContext) -> StageOutput + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&StageContext) -> StageOutput + Send + Sync,
{
    /// Creates a new function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(&StageContext) -> StageOutput + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&StageContext) -> StageOutput + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        (self.func)(ctx)
    }
}

/// A stage that does nothing and succeeds.
#[derive(Debug, Clone)]
pub struct NoOpStage {
    name: String,
}

impl NoOpStage {
    /// Creates a new no-op stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Stage for NoOpStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &StageContext) -> StageOutput {
        StageOutput::succeeded_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::stage_context;

    #[tokio::test]
    async fn test_fn_stage() {
        let stage = FnStage::new("test", |ctx| {
            StageOutput::succeeded_value("stage", serde_json::json!(ctx.stage_name()))
        });

        assert_eq!(stage.name(), "test");

        let output = stage.execute(&stage_context("test")).await;
        assert!(output.is_success());
        assert_eq!(output.get("stage"), Some(&serde_json::json!("test")));
    }

    #[tokio::test]
    async fn test_noop_stage() {
        let stage = NoOpStage::new("noop");
        assert_eq!(stage.name(), "noop");

        let output = stage.execute(&stage_context("noop")).await;
        assert!(output.is_success());
    }
}
