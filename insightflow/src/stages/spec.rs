//! Stage specifications.

use super::{Gate, StageCondition};
use crate::agent::Agent;
use crate::context::{PromptTemplate, DATASET_ROOT};
use crate::core::OutputKind;
use crate::errors::{ContractErrorInfo, PipelineValidationError};
use std::sync::Arc;

/// Specification for a single stage in a pipeline.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// The unique name of the stage.
    pub name: String,
    /// The agent answering this stage's prompt.
    pub agent: Arc<Agent>,
    /// The prompt template.
    pub template: PromptTemplate,
    /// Stages whose results this stage consumes, in declaration order.
    pub depends_on: Vec<String>,
    /// Optional gate evaluated on this stage's result.
    pub gate: Option<Gate>,
    /// What to extract from the response.
    pub expects: OutputKind,
    /// Whether an extraction miss fails the run.
    pub required: bool,
    /// Optional run condition; false means the stage is skipped.
    pub condition: Option<StageCondition>,
    /// Whether extracted code is executed in the sandbox.
    pub execute_code: bool,
}

impl StageSpec {
    /// Creates a required text stage with no dependencies.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        agent: impl Into<Arc<Agent>>,
        template: impl Into<PromptTemplate>,
    ) -> Self {
        Self {
            name: name.into(),
            agent: agent.into(),
            template: template.into(),
            depends_on: Vec::new(),
            gate: None,
            expects: OutputKind::Text,
            required: true,
            condition: None,
            execute_code: false,
        }
    }

    /// Sets the dependencies, dropping repeats.
    #[must_use]
    pub fn depends_on(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.depends_on.clear();
        for dep in deps {
            self = self.with_dependency(dep);
        }
        self
    }

    /// Adds a dependency.
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        let dep = dep.into();
        if !self.depends_on.contains(&dep) {
            self.depends_on.push(dep);
        }
        self
    }

    /// Sets the expected output kind.
    #[must_use]
    pub fn expects(mut self, kind: OutputKind) -> Self {
        self.expects = kind;
        self
    }

    /// Sets the gate.
    #[must_use]
    pub fn with_gate(mut self, gate: Gate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Marks the stage optional: an extraction miss is tolerated.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Sets the run condition.
    #[must_use]
    pub fn with_condition(mut self, condition: StageCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Runs extracted code in the sandbox. Implies `expects(OutputKind::Code)`.
    #[must_use]
    pub fn execute_code(mut self) -> Self {
        self.execute_code = true;
        self.expects = OutputKind::Code;
        self
    }

    /// Validates the stage in isolation.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage takes the reserved `dataset` name,
    /// depends on itself, gates non-JSON output, or its template references
    /// a stage outside `depends_on`.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        if self.name == DATASET_ROOT {
            return Err(PipelineValidationError::new(format!(
                "Stage name '{DATASET_ROOT}' is reserved"
            ))
            .with_stages(vec![self.name.clone()])
            .with_error_info(ContractErrorInfo::new(
                "CONTRACT-004-RESERVED_NAME",
                format!("'{DATASET_ROOT}' placeholders always resolve to the dataset summary"),
            )));
        }

        if self.depends_on.contains(&self.name) {
            return Err(PipelineValidationError::new(format!(
                "Stage '{}' cannot depend on itself",
                self.name
            ))
            .with_stages(vec![self.name.clone()])
            .with_error_info(ContractErrorInfo::new(
                "CONTRACT-004-SELF_DEP",
                format!("Stage '{}' lists itself in depends_on", self.name),
            )));
        }

        if self.gate.is_some() && self.expects != OutputKind::Json {
            return Err(PipelineValidationError::new(format!(
                "Stage '{}' has a gate but expects {}",
                self.name, self.expects
            ))
            .with_stages(vec![self.name.clone()])
            .with_error_info(
                ContractErrorInfo::new("CONTRACT-004-GATE_EXPECTS", "Gated stages must expect JSON")
                    .with_context_entry("expects", self.expects.to_string()),
            ));
        }

        for referenced in self.template.referenced_stages() {
            if !self.depends_on.contains(&referenced) {
                return Err(PipelineValidationError::new(format!(
                    "Stage '{}' template references '{}' which is not a declared dependency",
                    self.name, referenced
                ))
                .with_stages(vec![self.name.clone(), referenced.clone()])
                .with_error_info(
                    ContractErrorInfo::new(
                        "CONTRACT-004-TEMPLATE_REF",
                        format!("Undeclared template reference '{referenced}'"),
                    )
                    .with_fix_hint(format!("Add '{referenced}' to depends_on for '{}'.", self.name)),
                ));
            }
        }

        Ok(())
    }
}
