//! Plan Parser
//!
//! Loads plan definitions from YAML files and writes them back out.

use std::fs;
use std::path::Path;

use log::{debug, info, warn};
use thiserror::Error;

use super::model::Plan;
use super::validator::{unreachable_steps, validate_plan, ValidationError};
use crate::execution::pipeline::STAGE_COUNT;

/// Errors raised while loading or saving a plan file.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Failed to read plan file '{path}': {source}. Check that the file exists and is readable.")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write plan file '{path}': {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse plan YAML: {0}. Check the file format.")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid plan:\n{}", join_errors(.0))]
    Invalid(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parses and validates a plan from YAML text.
pub fn parse_plan(yaml_content: &str) -> Result<Plan, PlanError> {
    debug!("YAML content loaded ({} bytes)", yaml_content.len());

    let plan: Plan = serde_yaml::from_str(yaml_content)?;

    info!(
        "Parsed {} plan: {} phase(s), {} steps",
        plan.mode(),
        plan.phases().len(),
        plan.step_count()
    );

    validate_plan(&plan).map_err(PlanError::Invalid)?;

    for phase in plan.phases() {
        let ignored = unreachable_steps(&phase, STAGE_COUNT);
        if !ignored.is_empty() {
            warn!(
                "Phase '{}': {} step(s) beyond the {}-stage pipeline will not be evaluated",
                phase.id,
                ignored.len(),
                STAGE_COUNT
            );
        }
    }

    Ok(plan)
}

/// Loads a plan from a YAML file.
///
/// # Example
///
/// ```rust,no_run
/// use flowpilot::workflow::load_plan;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let plan = load_plan("checkout.yaml")?;
///     println!("Loaded {} steps", plan.step_count());
///     Ok(())
/// }
/// ```
pub fn load_plan(path: impl AsRef<Path>) -> Result<Plan, PlanError> {
    let path = path.as_ref();
    info!("Loading plan from: {}", path.display());

    let yaml_content = fs::read_to_string(path).map_err(|source| PlanError::Read {
        path: path.display().to_string(),
        source,
    })?;

    parse_plan(&yaml_content)
}

/// Saves a plan to a YAML file.
pub fn save_plan(plan: &Plan, path: impl AsRef<Path>) -> Result<(), PlanError> {
    let path = path.as_ref();
    let yaml_content = serde_yaml::to_string(plan)?;
    fs::write(path, yaml_content).map_err(|source| PlanError::Write {
        path: path.display().to_string(),
        source,
    })?;
    info!("Plan saved to: {}", path.display());
    Ok(())
}
