//! Append-only store of stage results for one run.

use crate::core::StageResult;
use crate::errors::OutputConflictError;
use serde::{Deserialize, Serialize};

/// Insertion-ordered mapping from stage name to its result.
///
/// A stage name can be written once; a second insert is an
/// [`OutputConflictError`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineContext {
    results: Vec<StageResult>,
}

impl PipelineContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a result.
    ///
    /// # Errors
    ///
    /// Returns [`OutputConflictError`] if a result for the same stage exists.
    pub fn insert(&mut self, result: StageResult) -> Result<(), OutputConflictError> {
        if self.contains(&result.stage_name) {
            return Err(OutputConflictError::new(
                &result.stage_name,
                "a result for this stage is already recorded",
            ));
        }
        self.results.push(result);
        Ok(())
    }

    /// Gets the result for a stage.
    #[must_use]
    pub fn get(&self, stage: &str) -> Option<&StageResult> {
        self.results.iter().find(|r| r.stage_name == stage)
    }

    /// Checks if a result exists for a stage.
    #[must_use]
    pub fn contains(&self, stage: &str) -> bool {
        self.get(stage).is_some()
    }

    /// Returns the number of results.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns true if no stage has produced a result.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Iterates results in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &StageResult> {
        self.results.iter()
    }

    /// Returns stage names in insertion order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.results.iter().map(|r| r.stage_name.as_str()).collect()
    }

    /// Returns the most recently inserted result.
    #[must_use]
    pub fn last(&self) -> Option<&StageResult> {
        self.results.last()
    }
}

impl<'a> IntoIterator for &'a PipelineContext {
    type Item = &'a StageResult;
    type IntoIter = std::slice::Iter<'a, StageResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}
