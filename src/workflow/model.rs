//! Plan Data Model
//!
//! Step descriptors and the phase/plan structures that group them.
//!
//! # Example YAML Format
//!
//! ```yaml
//! mode: autonomous
//! phases:
//!   - id: prep
//!     title: Preparation
//!     steps:
//!       - text: Locate product
//!         detail: Finding the product on the page
//!         category: search
//!   - id: action
//!     title: Action
//!     steps:
//!       - text: Find CTA
//!         detail: Add to Cart button is disabled
//!         category: view
//!         fail: true
//! settings:
//!   delay_ms: 250
//! ```

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Kind of interaction a step represents.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum StepCategory {
    Search,
    Click,
    View,
    #[default]
    Action,
}

impl fmt::Display for StepCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Search => "search",
            Self::Click => "click",
            Self::View => "view",
            Self::Action => "action",
        };
        f.write_str(name)
    }
}

/// A single abstract step of an automation task.
///
/// Steps are immutable once built. The engine reads `fail_flag` to decide
/// whether the pipeline stage aligned with this step fails validation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Short label, e.g. "Locate product"
    pub text: String,

    /// Longer explanation shown under the label
    #[serde(default)]
    pub detail: String,

    #[serde(default)]
    pub category: StepCategory,

    /// Forces validation of this step to fail
    #[serde(default, rename = "fail", alias = "should_fail")]
    pub fail_flag: bool,
}

impl Step {
    /// Creates a new step that succeeds.
    ///
    /// # Example
    ///
    /// ```
    /// use flowpilot::workflow::{Step, StepCategory};
    ///
    /// let step = Step::new("Find CTA", "Locating the Add to Cart button")
    ///     .with_category(StepCategory::View)
    ///     .failing();
    /// assert!(step.fail_flag);
    /// ```
    pub fn new(text: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            text: text.into().trim().to_string(),
            detail: detail.into().trim().to_string(),
            category: StepCategory::default(),
            fail_flag: false,
        }
    }

    pub fn with_category(mut self, category: StepCategory) -> Self {
        self.category = category;
        self
    }

    /// Marks this step to fail validation.
    pub fn failing(mut self) -> Self {
        self.fail_flag = true;
        self
    }
}

/// A named, ordered group of steps executed as one engine run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPhase {
    /// Identifier, unique within a plan
    pub id: String,

    pub title: String,

    #[serde(default)]
    pub steps: Vec<Step>,
}

impl ExecutionPhase {
    pub fn new(id: impl Into<String>, title: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            id: id.into().trim().to_string(),
            title: title.into().trim().to_string(),
            steps,
        }
    }

    /// Returns true if any step in this phase is flagged to fail.
    pub fn has_failing_step(&self) -> bool {
        self.steps.iter().any(|s| s.fail_flag)
    }
}

/// Execution mode selected by the user.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// User-paced, small retry budget
    Guided,
    /// Self-driving, larger retry budget
    Autonomous,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Guided => f.write_str("guided"),
            Self::Autonomous => f.write_str("autonomous"),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "guided" => Ok(Self::Guided),
            "autonomous" | "auto" => Ok(Self::Autonomous),
            other => Err(format!(
                "Unknown mode '{}': expected 'guided' or 'autonomous'",
                other
            )),
        }
    }
}

/// Optional pacing overrides carried by a plan file.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanSettings {
    /// Delay before each stage is evaluated, in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,

    /// Automatic retries allowed per run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

impl PlanSettings {
    pub fn delay(&self) -> Option<Duration> {
        self.delay_ms.map(Duration::from_millis)
    }

    pub fn is_empty(&self) -> bool {
        self.delay_ms.is_none() && self.max_retries.is_none()
    }
}

/// A fully resolved plan, ready to be handed to the engine or aggregator.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Plan {
    /// One titled step sequence driven by a single engine
    Guided {
        title: String,
        steps: Vec<Step>,
        #[serde(default, skip_serializing_if = "PlanSettings::is_empty")]
        settings: PlanSettings,
    },
    /// Ordered phases sequenced by the aggregator
    Autonomous {
        phases: Vec<ExecutionPhase>,
        #[serde(default, skip_serializing_if = "PlanSettings::is_empty")]
        settings: PlanSettings,
    },
}

impl Plan {
    pub fn guided(title: impl Into<String>, steps: Vec<Step>) -> Self {
        Self::Guided {
            title: title.into(),
            steps,
            settings: PlanSettings::default(),
        }
    }

    pub fn autonomous(phases: Vec<ExecutionPhase>) -> Self {
        Self::Autonomous {
            phases,
            settings: PlanSettings::default(),
        }
    }

    pub fn mode(&self) -> Mode {
        match self {
            Self::Guided { .. } => Mode::Guided,
            Self::Autonomous { .. } => Mode::Autonomous,
        }
    }

    pub fn settings(&self) -> &PlanSettings {
        match self {
            Self::Guided { settings, .. } | Self::Autonomous { settings, .. } => settings,
        }
    }

    /// Returns the plan as a list of phases.
    ///
    /// A guided plan becomes a single phase with id `guided`.
    pub fn phases(&self) -> Vec<ExecutionPhase> {
        match self {
            Self::Guided { title, steps, .. } => {
                vec![ExecutionPhase::new("guided", title.clone(), steps.clone())]
            }
            Self::Autonomous { phases, .. } => phases.clone(),
        }
    }

    /// Total number of steps across all phases.
    pub fn step_count(&self) -> usize {
        match self {
            Self::Guided { steps, .. } => steps.len(),
            Self::Autonomous { phases, .. } => phases.iter().map(|p| p.steps.len()).sum(),
        }
    }

    /// Returns the ids of phases that appear more than once.
    pub fn duplicate_phase_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut dups = Vec::new();
        if let Self::Autonomous { phases, .. } = self {
            for phase in phases {
                if !seen.insert(phase.id.as_str()) && !dups.contains(&phase.id) {
                    dups.push(phase.id.clone());
                }
            }
        }
        dups
    }
}
