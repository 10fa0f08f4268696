//! Plan Validation
//!
//! Structural checks run on a plan before it is handed to the engine:
//! - The plan contains at least one step
//! - Phase ids are present and unique
//! - Phase titles and step labels are not blank
//!
//! A phase with no steps is allowed; it completes immediately.

use std::fmt;

use log::{debug, info, warn};

use super::model::{ExecutionPhase, Plan, Step};

/// Validation error types for user-friendly error messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    EmptyPlan,
    EmptyPhaseId { index: usize },
    DuplicatePhaseId(String),
    EmptyPhaseTitle(String),
    EmptyStepText { phase: String, index: usize },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyPlan => write!(f, "Plan has no steps"),
            Self::EmptyPhaseId { index } => {
                write!(f, "Phase #{} has empty or whitespace-only ID", index + 1)
            }
            Self::DuplicatePhaseId(id) => write!(f, "Duplicate phase ID: '{}'", id),
            Self::EmptyPhaseTitle(id) => write!(f, "Phase '{}' has no title", id),
            Self::EmptyStepText { phase, index } => {
                write!(f, "Phase '{}': step #{} has no text", phase, index + 1)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validates the steps of a single phase.
fn validate_phase(phase: &ExecutionPhase) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if phase.title.trim().is_empty() {
        errors.push(ValidationError::EmptyPhaseTitle(phase.id.clone()));
    }

    for (index, step) in phase.steps.iter().enumerate() {
        if step.text.trim().is_empty() {
            errors.push(ValidationError::EmptyStepText {
                phase: phase.id.clone(),
                index,
            });
        }
    }

    if phase.steps.is_empty() {
        warn!("Phase '{}' has no steps and will complete immediately", phase.id);
    }

    let failing = phase.steps.iter().filter(|s| s.fail_flag).count();
    if failing > 0 {
        debug!("Phase '{}' has {} step(s) flagged to fail", phase.id, failing);
    }

    errors
}

/// Validates the entire plan structure.
///
/// Returns every problem found, not just the first.
pub fn validate_plan(plan: &Plan) -> Result<(), Vec<ValidationError>> {
    info!(
        "Validating {} plan with {} steps",
        plan.mode(),
        plan.step_count()
    );

    if plan.step_count() == 0 {
        return Err(vec![ValidationError::EmptyPlan]);
    }

    let mut errors = Vec::new();
    let phases = plan.phases();

    for (index, phase) in phases.iter().enumerate() {
        if phase.id.trim().is_empty() {
            errors.push(ValidationError::EmptyPhaseId { index });
        }
        errors.extend(validate_phase(phase));
    }

    errors.extend(
        plan.duplicate_phase_ids()
            .into_iter()
            .map(ValidationError::DuplicatePhaseId),
    );

    if !errors.is_empty() {
        return Err(errors);
    }

    info!("Plan validated: {} phase(s)", phases.len());
    Ok(())
}

/// Returns the steps of a plan that will never be evaluated.
///
/// Only the first four steps of a phase line up with pipeline stages.
pub fn unreachable_steps(phase: &ExecutionPhase, stage_count: usize) -> &[Step] {
    if phase.steps.len() > stage_count {
        &phase.steps[stage_count..]
    } else {
        &[]
    }
}
