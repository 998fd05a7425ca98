//! Upstream outputs visible to a stage.

use crate::core::ImageArtifact;
use crate::errors::ReleaseflowError;
use std::collections::HashMap;
use std::sync::Arc;

/// Outputs of the succeeded ancestors of a stage.
///
/// Artifacts are shared by reference; a stage can read them but never
/// mutate or take them back from the executor.
#[derive(Debug, Clone, Default)]
pub struct StageInputs {
    artifacts: HashMap<String, Arc<ImageArtifact>>,
    data: HashMap<String, HashMap<String, serde_json::Value>>,
}

impl StageInputs {
    /// Creates stage inputs.
    #[must_use]
    pub fn new(
        artifacts: HashMap<String, Arc<ImageArtifact>>,
        data: HashMap<String, HashMap<String, serde_json::Value>>,
    ) -> Self {
        Self { artifacts, data }
    }

    /// Returns the artifact produced by a specific stage.
    #[must_use]
    pub fn artifact_from(&self, stage: &str) -> Option<&Arc<ImageArtifact>> {
        self.artifacts.get(stage)
    }

    /// Returns the image produced upstream, if any.
    ///
    /// When several ancestors produced images the one from the
    /// lexicographically first stage wins, so the choice is deterministic.
    #[must_use]
    pub fn image(&self) -> Option<&Arc<ImageArtifact>> {
        let mut stages: Vec<&String> = self.artifacts.keys().collect();
        stages.sort();
        stages.first().and_then(|stage| self.artifacts.get(*stage))
    }

    /// Returns the upstream image or an error naming the consumer.
    pub fn require_image(&self, consumer: &str) -> Result<Arc<ImageArtifact>, ReleaseflowError> {
        self.image()
            .cloned()
            .ok_or_else(|| ReleaseflowError::MissingArtifact {
                stage: consumer.to_string(),
            })
    }

    /// Gets a data value published by an upstream stage.
    #[must_use]
    pub fn get(&self, stage: &str, key: &str) -> Option<&serde_json::Value> {
        self.data.get(stage).and_then(|values| values.get(key))
    }

    /// Returns true if no upstream stage produced anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty() && self.data.is_empty()
    }
}
