//! Execution Engine
//!
//! Drives one step sequence through the four pipeline stages:
//! - Marks the active stage executing and schedules its evaluation
//! - Retries a failing stage within the mode's retry budget
//! - Halts on the first terminal failure
//! - Publishes a fresh snapshot after every mutation
//!
//! The engine never sleeps. It hands out a [`Ticket`] for the next
//! transition and a driver (see [`super::driver`]) fires it after the
//! ticket's delay. Tickets made stale by a reset are ignored.

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::monitoring::{EventType, ExecutionTimeline};
use crate::workflow::{Mode, Step};

use super::driver::Driven;
use super::error::ExecutionError;
use super::pipeline::{ExecutionLog, LogEntry, Stage, StepStatus, FAILURE_REASON, STAGE_COUNT};
use super::policy::ModePolicy;
use super::timer::{DeferredTimer, Ticket};

/// Overall phase of an engine run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    Executing,
    Completed,
    Failed,
}

/// Terminal notification produced by an engine run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOutcome {
    Completed,
    Failed(ExecutionError),
}

/// Derived run-state owned by the engine.
#[derive(Debug, Clone)]
pub struct EngineState {
    pub active_step_index: usize,
    /// One status per pipeline stage
    pub statuses: Vec<StepStatus>,
    /// Automatic retries used so far in this run
    pub retry_count: u32,
    pub phase: RunPhase,
    pub log: ExecutionLog,
    pub started_at: DateTime<Utc>,
    pub failure_reason: Option<String>,
    /// Presentation hint; collapses once the run is terminal
    pub collapsed: bool,
}

impl EngineState {
    fn fresh() -> Self {
        Self {
            active_step_index: 0,
            statuses: vec![StepStatus::Pending; STAGE_COUNT],
            retry_count: 0,
            phase: RunPhase::Executing,
            log: ExecutionLog::new(),
            started_at: Utc::now(),
            failure_reason: None,
            collapsed: false,
        }
    }
}

/// Read-only view of an engine handed to subscribers.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct EngineSnapshot {
    pub mode: Mode,
    pub phase: RunPhase,
    pub active_step_index: usize,
    pub statuses: Vec<StepStatus>,
    pub retry_count: u32,
    pub log: Vec<LogEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub collapsed: bool,
    pub started_at: DateTime<Utc>,
    /// Synthetic time spent in this run
    pub elapsed_ms: u64,
}

impl EngineSnapshot {
    /// Pairs each stage with its current status.
    pub fn stages(&self) -> impl Iterator<Item = (Stage, StepStatus)> + '_ {
        Stage::ALL.iter().copied().zip(self.statuses.iter().copied())
    }
}

/// Execution engine for a single step sequence.
///
/// # Example
///
/// ```
/// use flowpilot::execution::{Engine, RunPhase, SyntheticClock};
/// use flowpilot::workflow::{Mode, Step};
///
/// let steps = vec![Step::new("Locate product", ""), Step::new("Find CTA", "")];
/// let mut engine = Engine::new();
/// assert!(engine.start(steps, Mode::Guided).is_none());
///
/// SyntheticClock::new().run_until_idle(&mut engine);
/// assert_eq!(engine.state().phase, RunPhase::Completed);
/// ```
pub struct Engine {
    steps: Vec<Step>,
    mode: Mode,
    policy: ModePolicy,
    policy_override: Option<ModePolicy>,
    state: EngineState,
    timer: DeferredTimer,
    timeline: ExecutionTimeline,
    /// Synthetic time spent by attempts abandoned through a manual retry
    earlier_attempts: Duration,
    snapshot_tx: watch::Sender<EngineSnapshot>,
}

impl Engine {
    /// Creates an idle engine. Nothing runs until [`Engine::start`].
    pub fn new() -> Self {
        let mode = Mode::Guided;
        let state = EngineState::fresh();
        let timeline = ExecutionTimeline::new();
        let (snapshot_tx, _) = watch::channel(build_snapshot(mode, &state, &timeline));

        Self {
            steps: Vec::new(),
            mode,
            policy: mode.policy(),
            policy_override: None,
            state,
            timer: DeferredTimer::new(),
            timeline,
            earlier_attempts: Duration::ZERO,
            snapshot_tx,
        }
    }

    /// Uses `policy` instead of the mode defaults for every run.
    pub fn with_policy(mut self, policy: ModePolicy) -> Self {
        self.policy_override = Some(policy);
        self
    }

    /// Starts a fresh run, discarding all previous run-state.
    ///
    /// Any transition scheduled by an earlier run is invalidated. An empty
    /// step sequence completes immediately.
    #[must_use = "an empty step sequence completes immediately"]
    pub fn start(&mut self, steps: Vec<Step>, mode: Mode) -> Option<EngineOutcome> {
        self.timer.cancel();

        self.steps = steps;
        self.mode = mode;
        self.policy = self.policy_override.unwrap_or_else(|| mode.policy());
        self.state = EngineState::fresh();
        self.timeline = ExecutionTimeline::new();
        self.earlier_attempts = Duration::ZERO;

        if self.steps.is_empty() {
            info!("No steps to execute - {} run completes immediately", mode);
            self.state.phase = RunPhase::Completed;
            self.state.collapsed = true;
            self.publish();
            return Some(EngineOutcome::Completed);
        }

        info!(
            "Starting {} run: {} step(s), delay {:?}, retry budget {}",
            mode,
            self.steps.len(),
            self.policy.delay,
            self.policy.max_retries
        );

        self.begin_stage(0);
        self.publish();
        None
    }

    /// Restarts a failed run with the same steps.
    ///
    /// Returns false, without touching state, if the run has not failed.
    pub fn reset_for_retry(&mut self) -> bool {
        if self.state.phase != RunPhase::Failed {
            warn!(
                "Manual retry ignored: run is {:?}, not failed",
                self.state.phase
            );
            return false;
        }

        info!("Manual retry requested");
        let carried = self.total_elapsed();
        let steps = self.steps.clone();
        // A failed run always has at least one step, so it cannot complete on start.
        let outcome = self.start(steps, self.mode);
        debug_assert!(outcome.is_none());
        self.earlier_attempts = carried;
        true
    }

    /// Cancels any pending transition. Used on teardown.
    pub fn stop(&mut self) {
        if self.timer.pending().is_some() {
            debug!("Cancelling pending transition");
        }
        self.timer.cancel();
    }

    /// Flips the collapsed flag. Has no effect on execution.
    pub fn toggle_collapsed(&mut self) {
        self.state.collapsed = !self.state.collapsed;
        self.publish();
    }

    /// Applies the scheduled transition for `ticket`.
    ///
    /// Stale tickets are ignored. Returns the terminal outcome when the run
    /// completes or fails.
    pub fn fire(&mut self, ticket: Ticket) -> Option<EngineOutcome> {
        if !self.timer.accept(ticket) {
            debug!(
                "Discarding stale transition (generation {}, current {})",
                ticket.generation(),
                self.timer.generation()
            );
            return None;
        }

        if self.state.phase != RunPhase::Executing {
            return None;
        }

        self.timeline.advance(ticket.delay());
        let outcome = self.evaluate_active_stage();
        self.publish();
        outcome
    }

    fn evaluate_active_stage(&mut self) -> Option<EngineOutcome> {
        let index = self.state.active_step_index;
        let stage = Stage::ALL[index];
        let failing = self.steps.get(index).is_some_and(|s| s.fail_flag);

        if failing {
            if self.policy.should_retry(self.state.retry_count) {
                self.state.retry_count += 1;
                warn!(
                    "Stage '{}' failed validation - auto retry {}/{}",
                    stage, self.state.retry_count, self.policy.max_retries
                );
                self.state.log.record_retry(stage, self.state.retry_count);
                self.timeline.add_event(stage, EventType::Retried);
                self.timer.schedule(self.policy.delay);
                return None;
            }

            let attempts = self.state.retry_count + 1;
            error!("Stage '{}' failed after {} attempt(s)", stage, attempts);

            self.state.statuses[index] = StepStatus::Error;
            self.state.phase = RunPhase::Failed;
            self.state.failure_reason = Some(FAILURE_REASON.to_string());
            self.state.collapsed = true;
            self.timeline.add_event(stage, EventType::Failed);

            return Some(EngineOutcome::Failed(ExecutionError::StepValidationFailure {
                stage,
                attempts,
                reason: FAILURE_REASON.to_string(),
            }));
        }

        debug!("Stage '{}' completed", stage);
        self.state.statuses[index] = StepStatus::Completed;
        self.state.log.record_stage(stage);
        self.timeline.add_event(stage, EventType::Completed);

        if index + 1 < STAGE_COUNT {
            self.begin_stage(index + 1);
            return None;
        }

        info!(
            "{} run completed in {} ms",
            self.mode,
            self.timeline.elapsed().as_millis()
        );
        self.state.phase = RunPhase::Completed;
        self.state.collapsed = true;
        Some(EngineOutcome::Completed)
    }

    fn begin_stage(&mut self, index: usize) {
        let stage = Stage::ALL[index];
        debug!("Executing stage '{}' ({})", stage, stage.label());

        self.state.active_step_index = index;
        self.state.statuses[index] = StepStatus::Executing;
        self.timeline.add_event(stage, EventType::Started);
        self.timer.schedule(self.policy.delay);
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    /// Returns a subscription that sees a new snapshot after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        build_snapshot(self.mode, &self.state, &self.timeline)
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn policy(&self) -> ModePolicy {
        self.policy
    }

    pub fn timeline(&self) -> &ExecutionTimeline {
        &self.timeline
    }

    /// Synthetic time of the current attempt plus every manually retried one.
    pub fn total_elapsed(&self) -> Duration {
        self.earlier_attempts + self.timeline.elapsed()
    }

    /// The outstanding transition, if any.
    pub fn pending(&self) -> Option<Ticket> {
        self.timer.pending()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Driven for Engine {
    type Ticket = Ticket;
    type Outcome = EngineOutcome;

    fn next_transition(&self) -> Option<(Ticket, Duration)> {
        self.timer.pending().map(|t| (t, t.delay()))
    }

    fn fire(&mut self, ticket: Ticket) -> Option<EngineOutcome> {
        Engine::fire(self, ticket)
    }
}

fn build_snapshot(mode: Mode, state: &EngineState, timeline: &ExecutionTimeline) -> EngineSnapshot {
    EngineSnapshot {
        mode,
        phase: state.phase,
        active_step_index: state.active_step_index,
        statuses: state.statuses.clone(),
        retry_count: state.retry_count,
        log: state.log.entries().to_vec(),
        failure_reason: state.failure_reason.clone(),
        collapsed: state.collapsed,
        started_at: state.started_at,
        elapsed_ms: timeline.elapsed().as_millis() as u64,
    }
}
