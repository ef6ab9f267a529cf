//! The standard dataset-analysis pipeline.
//!
//! Five stages, each backed by its own persona:
//!
//! | stage      | expects | notes                                   |
//! |------------|---------|-----------------------------------------|
//! | `clean`    | JSON    | optional; cleaning instructions only    |
//! | `validate` | JSON    | gated on `decision == YES`              |
//! | `relate`   | JSON    | chart relations `[{x, y, type}]`        |
//! | `codegen`  | code    | executed in the sandbox                 |
//! | `insights` | JSON    | optional                                |

use super::{Pipeline, PipelineBuilder};
use crate::agent::{Agent, CompletionBackend, GenerationParams, Persona};
use crate::config::PipelineConfig;
use crate::core::OutputKind;
use crate::errors::PipelineValidationError;
use crate::stages::{Gate, StageSpec};
use std::sync::Arc;

/// Cleaning stage name.
pub const CLEAN: &str = "clean";
/// Validation stage name.
pub const VALIDATE: &str = "validate";
/// Relation stage name.
pub const RELATE: &str = "relate";
/// Code synthesis stage name.
pub const CODEGEN: &str = "codegen";
/// Insights stage name.
pub const INSIGHTS: &str = "insights";

/// Stage names in execution order.
pub const STAGES: [&str; 5] = [CLEAN, VALIDATE, RELATE, CODEGEN, INSIGHTS];

const CLEAN_TEMPLATE: &str = "\
Here is the dataset to prepare for analysis:

{{dataset}}

List the cleaning steps this dataframe needs. Do not write code. \
Reply with JSON only: {\"steps\": [{\"column\": \"<name>\", \"action\": \"<what to do>\", \"reason\": \"<why>\"}]}";

const VALIDATE_TEMPLATE: &str = "\
Dataset:

{{dataset}}

Proposed cleaning steps:
{{clean}}

Decide whether this dataset is usable for analysis once cleaned. \
Reply with JSON only: {\"decision\": \"YES\" or \"NO\", \"reason\": \"<one sentence>\"}";

const RELATE_TEMPLATE: &str = "\
Columns: {{dataset.column_names}}

{{dataset.preview}}

The validator said: {{validate.reason}}

Pick the column pairs most worth visualizing, preferring numerical columns. \
Reply with JSON only: [{\"x\": \"<column>\", \"y\": \"<column>\", \"type\": \"scatter|line|bar|hist\"}]";

const CODEGEN_TEMPLATE: &str = "\
Write a standalone Python script using pandas and matplotlib that loads the dataset \
from '{{dataset.source}}', applies these cleaning steps:
{{clean}}

and draws one chart per relation:
{{relate}}

Save every chart as a PNG file in the current directory with plt.savefig. \
Never call plt.show(). Reply with a single ```python fenced block.";

const INSIGHTS_TEMPLATE: &str = "\
Dataset:

{{dataset}}

Chart relations:
{{relate}}

Chart script run:
{{codegen.execution}}

Summarize what the cleaned data shows. \
Reply with JSON only: {\"patterns\": [...], \"correlations\": [...], \"distributions\": [...]}";

/// Persona of the cleaning stage.
#[must_use]
pub fn cleaner_persona() -> Persona {
    Persona::new(
        "Clean dataset",
        "Generate JSON instructions for cleaning the dataframe without writing code.",
        "A no-nonsense data mechanic who hates messy CSVs and turns corrupt data into \
         clean, analysis-ready tables.",
    )
    .with_name("Data Cleaner")
}

/// Persona of the gated validation stage.
#[must_use]
pub fn validator_persona() -> Persona {
    Persona::new(
        "Validate dataset usability",
        "Return JSON {decision: YES/NO, reason: text}. If NO, the pipeline stops.",
        "A strict dataset gatekeeper. You do not sugarcoat bad data; if a dataset is \
         unusable you shut the whole pipeline down.",
    )
    .with_name("Dataset Validator")
}

/// Persona of the relation stage.
#[must_use]
pub fn relation_persona() -> Persona {
    Persona::new(
        "Analyze dataset and identify key relationships",
        "Find numerical columns to visualize. Return JSON: [{\"x\":\"col\",\"y\":\"col\",\"type\":\"scatter\"}]",
        "Data analysis expert. Fast and direct.",
    )
    .with_name("Analyst")
}

/// Persona of the code synthesis stage.
#[must_use]
pub fn code_generator_persona() -> Persona {
    Persona::new(
        "Write visualization code",
        "Generate matplotlib code for the provided chart relations.",
        "Python developer focused on matplotlib.",
    )
    .with_name("Code Generator")
}

/// Persona of the insights stage.
#[must_use]
pub fn insights_persona() -> Persona {
    Persona::new(
        "Generate insights from cleaned dataset",
        "Return patterns, correlations and distributions in JSON.",
        "A data-driven storyteller who reads datasets closely and reports only what \
         the numbers support.",
    )
    .with_name("Insights Agent")
}

/// Builds the five standard stages over one backend.
#[must_use]
pub fn analyst_stages(backend: &Arc<dyn CompletionBackend>) -> Vec<StageSpec> {
    let agent = |id: &str, persona: Persona| Agent::new(id, persona, backend.clone());
    let deterministic = GenerationParams {
        temperature: Some(0.0),
        max_tokens: None,
    };

    vec![
        StageSpec::new(CLEAN, agent(CLEAN, cleaner_persona()), CLEAN_TEMPLATE)
            .expects(OutputKind::Json)
            .optional(),
        StageSpec::new(
            VALIDATE,
            agent(VALIDATE, validator_persona()).with_params(deterministic),
            VALIDATE_TEMPLATE,
        )
        .depends_on([CLEAN])
        .expects(OutputKind::Json)
        .with_gate(Gate::field_equals("decision", "YES")),
        StageSpec::new(RELATE, agent(RELATE, relation_persona()), RELATE_TEMPLATE)
            .depends_on([CLEAN, VALIDATE])
            .expects(OutputKind::Json),
        StageSpec::new(CODEGEN, agent(CODEGEN, code_generator_persona()), CODEGEN_TEMPLATE)
            .depends_on([CLEAN, RELATE])
            .execute_code(),
        StageSpec::new(INSIGHTS, agent(INSIGHTS, insights_persona()), INSIGHTS_TEMPLATE)
            .depends_on([CLEAN, RELATE, CODEGEN])
            .expects(OutputKind::Json)
            .optional(),
    ]
}

/// Builds the standard analyst pipeline.
///
/// # Errors
///
/// Returns [`PipelineValidationError`] only if the stage table above is
/// inconsistent.
pub fn analyst_pipeline(
    backend: Arc<dyn CompletionBackend>,
    config: PipelineConfig,
) -> Result<Pipeline, PipelineValidationError> {
    let name = config.name.clone();
    analyst_stages(&backend)
        .into_iter()
        .try_fold(PipelineBuilder::new(name).with_config(config), PipelineBuilder::stage)?
        .build()
}
