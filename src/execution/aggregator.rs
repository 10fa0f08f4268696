//! Workflow Aggregator
//!
//! Sequences the phases of a multi-phase plan. Each phase gets its own
//! [`Engine`]; the next phase only starts once the active one completes.
//! The first failure freezes the run at the failing phase until that
//! phase is retried manually.

use std::time::Duration;

use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::watch;

use crate::workflow::{ExecutionPhase, Mode};

use super::driver::Driven;
use super::engine::{Engine, EngineOutcome, EngineSnapshot};
use super::error::ExecutionError;
use super::policy::ModePolicy;
use super::timer::Ticket;

/// Status of a phase within a run.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Queued,
    Active,
    Completed,
    Failed,
}

/// Phase sequencing state.
#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatorState {
    /// Equals the phase count once every phase has completed
    pub active_index: usize,
    /// Sticky until the failed phase is retried
    pub failed_index: Option<usize>,
}

/// Terminal notification for a whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed {
        phase: usize,
        phase_id: String,
        error: ExecutionError,
    },
}

/// Transition handle scoped to one phase of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTicket {
    run: u64,
    phase: usize,
    ticket: Ticket,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PhaseView {
    pub id: String,
    pub title: String,
    pub status: PhaseStatus,
}

/// Read-only view of the aggregator handed to subscribers.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AggregatorSnapshot {
    pub active_index: usize,
    pub failed_index: Option<usize>,
    pub phases: Vec<PhaseView>,
    /// Engine of the active (or failed) phase
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<EngineSnapshot>,
}

impl AggregatorSnapshot {
    pub fn statuses(&self) -> Vec<PhaseStatus> {
        self.phases.iter().map(|p| p.status).collect()
    }
}

/// Sequences phases, one engine per phase.
pub struct WorkflowAggregator {
    mode: Mode,
    policy_override: Option<ModePolicy>,
    phases: Vec<ExecutionPhase>,
    engines: Vec<Option<Engine>>,
    state: AggregatorState,
    run: u64,
    snapshot_tx: watch::Sender<AggregatorSnapshot>,
}

impl WorkflowAggregator {
    pub fn new(mode: Mode) -> Self {
        let (snapshot_tx, _) = watch::channel(AggregatorSnapshot {
            active_index: 0,
            failed_index: None,
            phases: Vec::new(),
            engine: None,
        });

        Self {
            mode,
            policy_override: None,
            phases: Vec::new(),
            engines: Vec::new(),
            state: AggregatorState::default(),
            run: 0,
            snapshot_tx,
        }
    }

    /// Uses `policy` for every phase engine instead of the mode defaults.
    pub fn with_policy(mut self, policy: ModePolicy) -> Self {
        self.policy_override = Some(policy);
        self
    }

    /// Starts a new run over `phases`, abandoning any current run.
    ///
    /// Returns an outcome immediately only if every phase is empty.
    #[must_use = "a run with only empty phases completes immediately"]
    pub fn start(&mut self, phases: Vec<ExecutionPhase>) -> Option<RunOutcome> {
        self.stop();

        self.run += 1;
        self.engines = phases.iter().map(|_| None).collect();
        self.phases = phases;
        self.state = AggregatorState::default();

        info!(
            "Starting {} run #{} with {} phase(s)",
            self.mode,
            self.run,
            self.phases.len()
        );

        let outcome = self.activate(0);
        self.publish();
        outcome
    }

    /// Re-runs the failed phase.
    ///
    /// Returns false, without touching state, unless `phase` is the
    /// currently failed phase.
    pub fn retry(&mut self, phase: usize) -> bool {
        if self.state.failed_index != Some(phase) {
            warn!(
                "Retry of phase {} ignored: failed phase is {:?}",
                phase, self.state.failed_index
            );
            return false;
        }

        let Some(engine) = self.engines.get_mut(phase).and_then(Option::as_mut) else {
            warn!("Retry of phase {} ignored: phase never started", phase);
            return false;
        };

        if !engine.reset_for_retry() {
            return false;
        }

        info!("Retrying phase '{}'", self.phases[phase].id);
        self.state.failed_index = None;
        self.publish();
        true
    }

    /// Re-runs whichever phase has failed, if any.
    pub fn retry_failed(&mut self) -> bool {
        match self.state.failed_index {
            Some(phase) => self.retry(phase),
            None => {
                warn!("Retry ignored: no phase has failed");
                false
            }
        }
    }

    /// Cancels the active engine's pending transition. Used on teardown.
    pub fn stop(&mut self) {
        for engine in self.engines.iter_mut().flatten() {
            engine.stop();
        }
    }

    /// Applies a transition for the active phase.
    ///
    /// Tickets from earlier runs, other phases, or a frozen run are ignored.
    pub fn fire(&mut self, ticket: PhaseTicket) -> Option<RunOutcome> {
        if ticket.run != self.run
            || ticket.phase != self.state.active_index
            || self.state.failed_index.is_some()
        {
            debug!(
                "Discarding stale transition for phase {} (run {})",
                ticket.phase, ticket.run
            );
            return None;
        }

        let engine = self.engines.get_mut(ticket.phase)?.as_mut()?;
        let engine_outcome = engine.fire(ticket.ticket);

        let outcome = engine_outcome.and_then(|o| self.handle_engine_outcome(o));
        self.publish();
        outcome
    }

    fn handle_engine_outcome(&mut self, outcome: EngineOutcome) -> Option<RunOutcome> {
        let index = self.state.active_index;
        match outcome {
            EngineOutcome::Completed => {
                info!("Phase '{}' completed", self.phases[index].id);
                self.activate(index + 1)
            }
            EngineOutcome::Failed(error) => {
                let phase_id = self.phases[index].id.clone();
                error!("Phase '{}' failed: {}", phase_id, error);
                self.state.failed_index = Some(index);
                Some(RunOutcome::Failed {
                    phase: index,
                    phase_id,
                    error,
                })
            }
        }
    }

    /// Makes `index` the active phase and starts its engine.
    fn activate(&mut self, index: usize) -> Option<RunOutcome> {
        self.state.active_index = index;

        if index >= self.phases.len() {
            info!("All {} phase(s) completed", self.phases.len());
            return Some(RunOutcome::Completed);
        }

        let phase = &self.phases[index];
        info!(
            "Activating phase {}/{}: {}",
            index + 1,
            self.phases.len(),
            phase.title
        );

        let mut engine = match self.policy_override {
            Some(policy) => Engine::new().with_policy(policy),
            None => Engine::new(),
        };
        let started = engine.start(phase.steps.clone(), self.mode);
        self.engines[index] = Some(engine);

        started.and_then(|o| self.handle_engine_outcome(o))
    }

    /// Derived status of phase `index`.
    pub fn phase_status(&self, index: usize) -> PhaseStatus {
        let AggregatorState {
            active_index,
            failed_index,
        } = self.state;

        if failed_index == Some(index) {
            PhaseStatus::Failed
        } else if index < active_index {
            PhaseStatus::Completed
        } else if index == active_index {
            PhaseStatus::Active
        } else {
            PhaseStatus::Queued
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    /// Returns a subscription that sees a new snapshot after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<AggregatorSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> AggregatorSnapshot {
        AggregatorSnapshot {
            active_index: self.state.active_index,
            failed_index: self.state.failed_index,
            phases: self
                .phases
                .iter()
                .enumerate()
                .map(|(i, phase)| PhaseView {
                    id: phase.id.clone(),
                    title: phase.title.clone(),
                    status: self.phase_status(i),
                })
                .collect(),
            engine: self.active_engine().map(Engine::snapshot),
        }
    }

    pub fn state(&self) -> AggregatorState {
        self.state
    }

    pub fn phases(&self) -> &[ExecutionPhase] {
        &self.phases
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Engine of phase `index`, if that phase has been started.
    pub fn engine(&self, index: usize) -> Option<&Engine> {
        self.engines.get(index)?.as_ref()
    }

    /// Engine of the active (or failed) phase.
    pub fn active_engine(&self) -> Option<&Engine> {
        self.engine(self.state.active_index)
    }

    /// True once every phase has completed.
    pub fn is_finished(&self) -> bool {
        self.state.active_index >= self.phases.len()
    }

    /// Synthetic time spent across all started phases, manual retries included.
    pub fn elapsed(&self) -> Duration {
        self.engines.iter().flatten().map(Engine::total_elapsed).sum()
    }
}

impl Driven for WorkflowAggregator {
    type Ticket = PhaseTicket;
    type Outcome = RunOutcome;

    fn next_transition(&self) -> Option<(PhaseTicket, Duration)> {
        if self.state.failed_index.is_some() {
            return None;
        }
        let ticket = self.active_engine()?.pending()?;
        Some((
            PhaseTicket {
                run: self.run,
                phase: self.state.active_index,
                ticket,
            },
            ticket.delay(),
        ))
    }

    fn fire(&mut self, ticket: PhaseTicket) -> Option<RunOutcome> {
        WorkflowAggregator::fire(self, ticket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::driver::{SyntheticClock, Tick};
    use crate::execution::engine::RunPhase;
    use crate::execution::pipeline::StepStatus;
    use crate::workflow::Step;

    fn phase(id: &str, steps: Vec<Step>) -> ExecutionPhase {
        ExecutionPhase::new(id, id.to_uppercase(), steps)
    }

    fn ok_step(text: &str) -> Step {
        Step::new(text, "")
    }

    /// Three phases; the second phase's only step fails.
    fn failing_middle() -> Vec<ExecutionPhase> {
        vec![
            phase("prep", vec![ok_step("Locate product"), ok_step("Find CTA")]),
            phase("action", vec![ok_step("Click button").failing()]),
            phase("validation", vec![ok_step("Verify cart")]),
        ]
    }

    fn assert_single_active(snapshot: &AggregatorSnapshot) {
        let active = snapshot
            .phases
            .iter()
            .filter(|p| p.status == PhaseStatus::Active)
            .count();
        assert!(active <= 1, "more than one active phase: {:?}", snapshot);
    }

    #[test]
    fn test_initial_state() {
        let mut aggregator = WorkflowAggregator::new(Mode::Autonomous);
        assert!(aggregator.start(failing_middle()).is_none());

        assert_eq!(
            aggregator.snapshot().statuses(),
            vec![PhaseStatus::Active, PhaseStatus::Queued, PhaseStatus::Queued]
        );
        assert!(aggregator.engine(1).is_none());
    }

    #[test]
    fn test_all_phases_complete() {
        let mut aggregator = WorkflowAggregator::new(Mode::Autonomous);
        assert!(aggregator
            .start(vec![
                phase("prep", vec![ok_step("a"), ok_step("b")]),
                phase("action", vec![ok_step("c")]),
                phase("validation", vec![ok_step("d")]),
            ])
            .is_none());

        let mut clock = SyntheticClock::new();
        let outcome = clock.run_until_idle_with(&mut aggregator, |a| {
            assert_single_active(&a.snapshot())
        });

        assert_eq!(outcome, Some(RunOutcome::Completed));
        assert!(aggregator.is_finished());
        assert_eq!(clock.fired(), 12);
        assert_eq!(
            aggregator.snapshot().statuses(),
            vec![PhaseStatus::Completed; 3]
        );
        assert_eq!(aggregator.elapsed(), Duration::from_millis(24_000));
    }

    #[test]
    fn test_failure_freezes_at_failed_phase() {
        let mut aggregator = WorkflowAggregator::new(Mode::Autonomous);
        assert!(aggregator.start(failing_middle()).is_none());

        let mut clock = SyntheticClock::new();
        let mut validation_activated = false;
        let outcome = clock.run_until_idle_with(&mut aggregator, |a| {
            let snapshot = a.snapshot();
            assert_single_active(&snapshot);
            validation_activated |= snapshot.phases[2].status == PhaseStatus::Active;
        });

        match outcome {
            Some(RunOutcome::Failed {
                phase, phase_id, ..
            }) => {
                assert_eq!(phase, 1);
                assert_eq!(phase_id, "action");
            }
            other => panic!("expected failure, got {:?}", other),
        }

        // 4 stages for prep, then 1 initial + 3 retries on action
        assert_eq!(clock.fired(), 8);
        assert!(!validation_activated);

        let state = aggregator.state();
        assert_eq!(state.failed_index, Some(1));
        assert_eq!(state.active_index, 1);
        assert_eq!(
            aggregator.snapshot().statuses(),
            vec![PhaseStatus::Completed, PhaseStatus::Failed, PhaseStatus::Queued]
        );
        assert!(aggregator.engine(2).is_none());
        assert!(aggregator.next_transition().is_none());
    }

    #[test]
    fn test_failed_index_is_sticky() {
        let mut aggregator = WorkflowAggregator::new(Mode::Guided);
        assert!(aggregator.start(failing_middle()).is_none());
        SyntheticClock::new().run_until_idle(&mut aggregator);

        assert!(!aggregator.retry(0));
        assert!(!aggregator.retry(2));
        assert_eq!(aggregator.state().failed_index, Some(1));
        assert_eq!(SyntheticClock::new().tick(&mut aggregator), Tick::Idle);
    }

    #[test]
    fn test_manual_retry_resets_failed_phase() {
        let mut aggregator = WorkflowAggregator::new(Mode::Autonomous);
        assert!(aggregator.start(failing_middle()).is_none());
        SyntheticClock::new().run_until_idle(&mut aggregator);

        assert!(aggregator.retry(1));

        let state = aggregator.state();
        assert_eq!(state.failed_index, None);
        assert_eq!(state.active_index, 1);
        assert_eq!(aggregator.phase_status(1), PhaseStatus::Active);

        let engine = aggregator.engine(1).unwrap();
        assert_eq!(engine.state().phase, RunPhase::Executing);
        assert_eq!(engine.state().retry_count, 0);
        assert_eq!(engine.state().statuses[0], StepStatus::Executing);
        assert!(engine.state().statuses[1..]
            .iter()
            .all(|s| *s == StepStatus::Pending));
        assert!(aggregator.next_transition().is_some());
    }

    #[test]
    fn test_retry_fails_again_with_same_steps() {
        let mut aggregator = WorkflowAggregator::new(Mode::Guided);
        assert!(aggregator.start(failing_middle()).is_none());
        SyntheticClock::new().run_until_idle(&mut aggregator);
        let first = aggregator.engine(1).unwrap().snapshot();

        assert!(aggregator.retry_failed());
        let outcome = SyntheticClock::new().run_until_idle(&mut aggregator);

        assert!(matches!(outcome, Some(RunOutcome::Failed { phase: 1, .. })));
        let second = aggregator.engine(1).unwrap().snapshot();
        assert_eq!(first.statuses, second.statuses);
        assert_eq!(first.log, second.log);
    }

    #[test]
    fn test_elapsed_includes_retried_attempts() {
        let mut aggregator = WorkflowAggregator::new(Mode::Autonomous);
        assert!(aggregator.start(failing_middle()).is_none());
        SyntheticClock::new().run_until_idle(&mut aggregator);

        // prep: 4 stages; action: 4 attempts at its first stage
        assert_eq!(aggregator.elapsed(), Duration::from_millis(16_000));

        assert!(aggregator.retry(1));
        SyntheticClock::new().run_until_idle(&mut aggregator);
        assert_eq!(aggregator.elapsed(), Duration::from_millis(24_000));
    }

    #[test]
    fn test_retry_without_failure_is_ignored() {
        let mut aggregator = WorkflowAggregator::new(Mode::Guided);
        assert!(aggregator.start(failing_middle()).is_none());

        assert!(!aggregator.retry_failed());
        assert_eq!(aggregator.state(), AggregatorState::default());
    }

    #[test]
    fn test_single_phase_passes_through() {
        let steps = vec![ok_step("a"), ok_step("b").failing()];
        let mut aggregator = WorkflowAggregator::new(Mode::Guided);
        assert!(aggregator.start(vec![phase("guided", steps.clone())]).is_none());
        SyntheticClock::new().run_until_idle(&mut aggregator);

        let mut engine = Engine::new();
        assert!(engine.start(steps, Mode::Guided).is_none());
        SyntheticClock::new().run_until_idle(&mut engine);

        let via_aggregator = aggregator.engine(0).unwrap().snapshot();
        let direct = engine.snapshot();
        assert_eq!(via_aggregator.statuses, direct.statuses);
        assert_eq!(via_aggregator.log, direct.log);
        assert_eq!(via_aggregator.phase, direct.phase);
    }

    #[test]
    fn test_empty_phases_are_skipped() {
        let mut aggregator = WorkflowAggregator::new(Mode::Guided);
        let outcome = aggregator.start(vec![
            phase("empty", vec![]),
            phase("work", vec![ok_step("a")]),
        ]);

        assert!(outcome.is_none());
        assert_eq!(aggregator.state().active_index, 1);
        assert_eq!(aggregator.phase_status(0), PhaseStatus::Completed);
    }

    #[test]
    fn test_no_phases_complete_immediately() {
        let mut aggregator = WorkflowAggregator::new(Mode::Guided);
        assert_eq!(aggregator.start(Vec::new()), Some(RunOutcome::Completed));
        assert!(aggregator.is_finished());
    }

    #[test]
    fn test_stale_ticket_from_previous_run_is_ignored() {
        let mut aggregator = WorkflowAggregator::new(Mode::Guided);
        assert!(aggregator.start(failing_middle()).is_none());
        let (stale, _) = aggregator.next_transition().unwrap();

        assert!(aggregator.start(failing_middle()).is_none());
        assert!(aggregator.fire(stale).is_none());

        let engine = aggregator.active_engine().unwrap();
        assert_eq!(engine.state().statuses[0], StepStatus::Executing);
        assert!(engine.state().log.is_empty());
    }

    #[test]
    fn test_stop_cancels_active_engine() {
        let mut aggregator = WorkflowAggregator::new(Mode::Guided);
        assert!(aggregator.start(failing_middle()).is_none());
        let (ticket, _) = aggregator.next_transition().unwrap();

        aggregator.stop();

        assert!(aggregator.next_transition().is_none());
        assert!(aggregator.fire(ticket).is_none());
    }

    #[test]
    fn test_subscribers_see_progress() {
        let mut aggregator = WorkflowAggregator::new(Mode::Autonomous);
        let mut rx = aggregator.subscribe();
        assert!(aggregator.start(failing_middle()).is_none());
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        SyntheticClock::new().run_until_idle(&mut aggregator);

        let latest = rx.borrow_and_update().clone();
        assert_eq!(latest.failed_index, Some(1));
        let engine = latest.engine.unwrap();
        assert_eq!(engine.phase, RunPhase::Failed);
        assert_eq!(engine.retry_count, 3);
    }

    #[test]
    fn test_snapshot_json_shape() {
        let mut aggregator = WorkflowAggregator::new(Mode::Autonomous);
        assert!(aggregator.start(failing_middle()).is_none());

        let json = serde_json::to_value(aggregator.snapshot()).unwrap();
        assert_eq!(json["active_index"], 0);
        assert!(json["failed_index"].is_null());
        assert_eq!(json["phases"][0]["status"], "active");
        assert_eq!(json["phases"][2]["id"], "validation");
        assert_eq!(json["engine"]["phase"], "executing");
    }
}
