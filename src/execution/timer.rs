//! Deferred Transition Timer
//!
//! A single-slot, cancellable timer. Scheduling returns a [`Ticket`]
//! stamped with a generation number; a ticket is only honored if its
//! generation is still current when it fires. Rescheduling or cancelling
//! bumps the generation, so a late firing from an earlier schedule is
//! discarded instead of mutating state.

use std::time::Duration;

/// Handle for one scheduled transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    generation: u64,
    delay: Duration,
}

impl Ticket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// How long the owner should wait before firing this ticket.
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

/// At most one outstanding transition at a time.
#[derive(Debug, Default)]
pub struct DeferredTimer {
    generation: u64,
    pending: Option<Ticket>,
}

impl DeferredTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules a transition, replacing any outstanding one.
    pub fn schedule(&mut self, delay: Duration) -> Ticket {
        self.generation += 1;
        let ticket = Ticket {
            generation: self.generation,
            delay,
        };
        self.pending = Some(ticket);
        ticket
    }

    /// Invalidates any outstanding ticket.
    pub fn cancel(&mut self) {
        self.generation += 1;
        self.pending = None;
    }

    /// Consumes `ticket` if it is the outstanding one.
    ///
    /// Returns false for stale or already-fired tickets.
    pub fn accept(&mut self, ticket: Ticket) -> bool {
        match self.pending {
            Some(current) if current == ticket && ticket.generation == self.generation => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    pub fn pending(&self) -> Option<Ticket> {
        self.pending
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}
