//! Execution Errors

use thiserror::Error;

use super::pipeline::Stage;

/// Terminal failure of an engine run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// A flagged step kept failing after the retry budget ran out.
    #[error("Stage '{stage}' failed after {attempts} attempt(s): {reason}")]
    StepValidationFailure {
        stage: Stage,
        attempts: u32,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message() {
        let err = ExecutionError::StepValidationFailure {
            stage: Stage::LocateElement,
            attempts: 4,
            reason: "Validation failed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Stage 'locate-element' failed after 4 attempt(s): Validation failed"
        );
    }
}
