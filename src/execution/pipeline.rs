//! Execution Pipeline
//!
//! Every phase is driven through the same four fixed stages. This module
//! defines those stages, the per-stage status, and the deterministic log
//! entries each stage produces on success.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of stages in the pipeline.
pub const STAGE_COUNT: usize = 4;

/// Reason attached to a stage that failed validation.
pub const FAILURE_REASON: &str = "Validation failed: element disabled or action blocked.";

/// One of the fixed pipeline stages.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    FetchContext,
    LocateElement,
    PerformAction,
    ValidateResult,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; STAGE_COUNT] = [
        Stage::FetchContext,
        Stage::LocateElement,
        Stage::PerformAction,
        Stage::ValidateResult,
    ];

    pub fn from_index(index: usize) -> Option<Stage> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Label shown next to the stage while it runs.
    pub fn label(self) -> &'static str {
        match self {
            Stage::FetchContext => "Fetching image and XML",
            Stage::LocateElement => "Searching required element",
            Stage::PerformAction => "Executing action on device",
            Stage::ValidateResult => "Validating action",
        }
    }

    /// Goal/action pairs appended to the log when this stage succeeds.
    fn log_templates(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Stage::FetchContext => &[
                (
                    "Open the application under test.",
                    "Launching application from its package name.",
                ),
                (
                    "Capture UI snapshot.",
                    "Waiting for the screen to settle, then capturing screenshot and XML.",
                ),
            ],
            Stage::LocateElement => &[(
                "Locate target element.",
                "Detected the required element using the accessibility tree.",
            )],
            Stage::PerformAction => &[(
                "Interact with target element.",
                "Dispatched the interaction to the device.",
            )],
            Stage::ValidateResult => &[(
                "Verify resulting state.",
                "Post-action UI state matches the expected outcome.",
            )],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::FetchContext => "fetch-context",
            Stage::LocateElement => "locate-element",
            Stage::PerformAction => "perform-action",
            Stage::ValidateResult => "validate-result",
        };
        f.write_str(name)
    }
}

/// Status of one pipeline stage during a run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    #[default]
    Pending,
    Executing,
    Completed,
    Error,
}

/// A single line of the execution log.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// 1-based, strictly increasing within one run
    pub sequence_number: u32,
    pub goal: String,
    pub action: String,
}

/// Append-only execution log that assigns sequence numbers.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct ExecutionLog {
    entries: Vec<LogEntry>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, goal: impl Into<String>, action: impl Into<String>) {
        let sequence_number = self.entries.len() as u32 + 1;
        self.entries.push(LogEntry {
            sequence_number,
            goal: goal.into(),
            action: action.into(),
        });
    }

    /// Appends the deterministic entries for a completed stage.
    pub fn record_stage(&mut self, stage: Stage) {
        for (goal, action) in stage.log_templates() {
            self.push(*goal, *action);
        }
    }

    /// Appends an automatic retry entry.
    pub fn record_retry(&mut self, stage: Stage, attempt: u32) {
        self.push(
            format!("Retrying step {}", stage.index() + 1),
            format!("Auto retry attempt {}", attempt),
        );
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
