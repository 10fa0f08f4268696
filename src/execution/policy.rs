//! Retry and Pacing Policy
//!
//! The per-mode delay and retry budget, and the single retry decision
//! used by the engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::workflow::{Mode, PlanSettings};

/// Delay before a guided stage is evaluated.
pub const GUIDED_DELAY: Duration = Duration::from_millis(900);

/// Delay before an autonomous stage is evaluated.
pub const AUTONOMOUS_DELAY: Duration = Duration::from_millis(2000);

pub const GUIDED_MAX_RETRIES: u32 = 1;
pub const AUTONOMOUS_MAX_RETRIES: u32 = 3;

/// Pacing and retry budget for one engine run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModePolicy {
    /// Delay between marking a stage executing and evaluating it
    #[serde(with = "millis")]
    pub delay: Duration,
    /// Automatic re-attempts allowed before a failure is terminal
    pub max_retries: u32,
}

impl ModePolicy {
    /// Default policy for a mode.
    pub fn for_mode(mode: Mode) -> Self {
        match mode {
            Mode::Guided => Self {
                delay: GUIDED_DELAY,
                max_retries: GUIDED_MAX_RETRIES,
            },
            Mode::Autonomous => Self {
                delay: AUTONOMOUS_DELAY,
                max_retries: AUTONOMOUS_MAX_RETRIES,
            },
        }
    }

    /// Applies plan-file overrides on top of this policy.
    pub fn with_settings(mut self, settings: &PlanSettings) -> Self {
        if let Some(delay) = settings.delay() {
            self.delay = delay;
        }
        if let Some(max_retries) = settings.max_retries {
            self.max_retries = max_retries;
        }
        self
    }

    /// Returns true if a failing stage gets another attempt.
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }
}

impl Mode {
    pub fn policy(self) -> ModePolicy {
        ModePolicy::for_mode(self)
    }
}

/// Retry decision using the default budget for `mode`.
pub fn should_retry(retry_count: u32, mode: Mode) -> bool {
    mode.policy().should_retry(retry_count)
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
