//! Pipeline builder with validation.

use super::{StageGraph, StageSpec};
use crate::errors::{ContractErrorInfo, CycleDetectedError, PipelineValidationError};
use crate::stages::Stage;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Builder for creating validated pipelines.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    name: String,
    stages: HashMap<String, StageSpec>,
    /// Insertion order for stages.
    stage_order: Vec<String>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: HashMap::new(),
            stage_order: Vec::new(),
        }
    }

    /// Builds a pipeline from specifications given in any order.
    ///
    /// Unlike [`add_stage_spec`](Self::add_stage_spec), dependencies may be
    /// declared before the stage they name, so cycles are possible and are
    /// rejected here.
    ///
    /// # Errors
    ///
    /// Returns an error on duplicate names, unknown dependencies or cycles.
    pub fn from_specs(
        name: impl Into<String>,
        specs: impl IntoIterator<Item = StageSpec>,
    ) -> Result<Self, PipelineValidationError> {
        let mut builder = Self::new(name);
        for spec in specs {
            spec.validate()?;
            builder.check_duplicate(&spec)?;
            builder.stage_order.push(spec.name.clone());
            builder.stages.insert(spec.name.clone(), spec);
        }

        for name in &builder.stage_order {
            if let Some(spec) = builder.stages.get(name) {
                builder.check_dependencies(spec)?;
            }
        }
        builder.detect_cycles()?;
        Ok(builder)
    }

    /// Adds a stage to the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails (missing dependency, duplicate, etc.)
    pub fn stage(
        self,
        name: impl Into<String>,
        runner: Arc<dyn Stage>,
        dependencies: &[&str],
    ) -> Result<Self, PipelineValidationError> {
        let spec = StageSpec::new(name, runner).with_dependencies(dependencies.iter().copied());
        self.spec(spec)
    }

    /// Adds a full stage specification, builder style.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn spec(mut self, spec: StageSpec) -> Result<Self, PipelineValidationError> {
        self.add_stage_spec(spec)?;
        Ok(self)
    }

    /// Adds a stage with a specification.
    ///
    /// Dependencies must already be part of the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn add_stage_spec(&mut self, spec: StageSpec) -> Result<(), PipelineValidationError> {
        spec.validate()?;
        self.check_duplicate(&spec)?;
        self.check_dependencies(&spec)?;

        self.stage_order.push(spec.name.clone());
        self.stages.insert(spec.name.clone(), spec);
        Ok(())
    }

    /// Builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the builder has no stages.
    pub fn build(self) -> Result<StageGraph, PipelineValidationError> {
        if self.stages.is_empty() {
            return Err(PipelineValidationError::new("Pipeline has no stages")
                .with_error_info(
                    ContractErrorInfo::new("CONTRACT-004-EMPTY", "Cannot build an empty pipeline")
                        .with_fix_hint("Add at least one stage to the pipeline before building."),
                ));
        }

        Ok(StageGraph::new(self.name, self.stages, self.stage_order))
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    fn check_duplicate(&self, spec: &StageSpec) -> Result<(), PipelineValidationError> {
        if self.stages.contains_key(&spec.name) {
            return Err(PipelineValidationError::new(format!(
                "Stage '{}' is defined twice",
                spec.name
            ))
            .with_stages(vec![spec.name.clone()])
            .with_error_info(
                ContractErrorInfo::new(
                    "CONTRACT-004-DUPLICATE",
                    format!("Stage name '{}' is already taken", spec.name),
                )
                .with_fix_hint("Give every stage a unique name."),
            ));
        }
        Ok(())
    }

    fn check_dependencies(&self, spec: &StageSpec) -> Result<(), PipelineValidationError> {
        match spec.dependencies.iter().find(|dep| !self.stages.contains_key(*dep)) {
            Some(dep) => Err(PipelineValidationError::new(format!(
                "Stage '{}' depends on unknown stage '{}'",
                spec.name, dep
            ))
            .with_stages(vec![spec.name.clone(), dep.clone()])
            .with_error_info(
                ContractErrorInfo::new(
                    "CONTRACT-004-MISSING_DEP",
                    format!("Dependency '{dep}' not found"),
                )
                .with_fix_hint("Ensure the dependency is added before the stage that depends on it.")
                .with_context_entry("stage", spec.name.clone()),
            )),
            None => Ok(()),
        }
    }

    /// Detects cycles in the dependency graph.
    fn detect_cycles(&self) -> Result<(), CycleDetectedError> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for name in &self.stage_order {
            if !visited.contains(name) {
                if let Some(cycle) = self.dfs_cycle(name, &mut visited, &mut rec_stack, &mut path) {
                    return Err(CycleDetectedError::new(cycle));
                }
            }
        }

        Ok(())
    }

    fn dfs_cycle(
        &self,
        node: &str,
        visited: &mut HashSet<String>,
        rec_stack: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        visited.insert(node.to_string());
        rec_stack.insert(node.to_string());
        path.push(node.to_string());

        if let Some(spec) = self.stages.get(node) {
            for dep in &spec.dependencies {
                if rec_stack.contains(dep) {
                    let start = path.iter().position(|n| n == dep).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(dep.clone());
                    return Some(cycle);
                }
                if !visited.contains(dep) {
                    if let Some(cycle) = self.dfs_cycle(dep, visited, rec_stack, path) {
                        return Some(cycle);
                    }
                }
            }
        }

        path.pop();
        rec_stack.remove(node);
        None
    }
}
