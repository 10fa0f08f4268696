//! Timer Drivers
//!
//! The engine and aggregator only ever have one pending transition. A
//! driver waits out that transition's delay and fires it, repeating until
//! nothing is pending.
//!
//! - [`SyntheticClock`]: fires immediately and tracks virtual time
//! - [`run_to_idle`]: waits on the tokio timer between firings

use std::time::Duration;

use log::debug;

/// Something that exposes at most one pending, delayed transition.
pub trait Driven {
    type Ticket: Copy;
    type Outcome;

    /// The outstanding transition and how long to wait before firing it.
    fn next_transition(&self) -> Option<(Self::Ticket, Duration)>;

    /// Applies a transition. Stale tickets are ignored.
    fn fire(&mut self, ticket: Self::Ticket) -> Option<Self::Outcome>;
}

/// Result of advancing a [`SyntheticClock`] by one transition.
#[derive(Debug, PartialEq, Eq)]
pub enum Tick<O> {
    /// Nothing was pending
    Idle,
    /// A transition fired, possibly producing a terminal outcome
    Fired(Option<O>),
}

/// Deterministic driver that never sleeps.
///
/// Each firing advances the clock by the transition's delay, so tests and
/// `--instant` runs report the same timings a real-time run would.
#[derive(Debug, Default, Clone)]
pub struct SyntheticClock {
    elapsed: Duration,
    fired: usize,
}

impl SyntheticClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the next pending transition, if any.
    pub fn tick<D: Driven>(&mut self, target: &mut D) -> Tick<D::Outcome> {
        let Some((ticket, delay)) = target.next_transition() else {
            return Tick::Idle;
        };

        self.elapsed += delay;
        self.fired += 1;
        Tick::Fired(target.fire(ticket))
    }

    /// Fires transitions until nothing is pending.
    ///
    /// Returns the last terminal outcome produced, if any.
    pub fn run_until_idle<D: Driven>(&mut self, target: &mut D) -> Option<D::Outcome> {
        self.run_until_idle_with(target, |_| {})
    }

    /// Like [`run_until_idle`](Self::run_until_idle), calling `observe`
    /// after every firing.
    pub fn run_until_idle_with<D, F>(&mut self, target: &mut D, mut observe: F) -> Option<D::Outcome>
    where
        D: Driven,
        F: FnMut(&D),
    {
        let mut outcome = None;
        while let Tick::Fired(result) = self.tick(target) {
            observe(target);
            if result.is_some() {
                outcome = result;
            }
        }
        debug!(
            "Synthetic clock idle after {} transition(s), {} ms",
            self.fired,
            self.elapsed.as_millis()
        );
        outcome
    }

    /// Virtual time consumed so far.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Number of transitions fired so far.
    pub fn fired(&self) -> usize {
        self.fired
    }
}

/// Drives `target` in real time until nothing is pending.
pub async fn run_to_idle<D: Driven>(target: &mut D) -> Option<D::Outcome> {
    run_to_idle_with(target, |_| {}).await
}

/// Like [`run_to_idle`], calling `observe` after every firing.
pub async fn run_to_idle_with<D, F>(target: &mut D, mut observe: F) -> Option<D::Outcome>
where
    D: Driven,
    F: FnMut(&D),
{
    let mut outcome = None;
    while let Some((ticket, delay)) = target.next_transition() {
        tokio::time::sleep(delay).await;
        let result = target.fire(ticket);
        observe(target);
        if result.is_some() {
            outcome = result;
        }
    }
    outcome
}
