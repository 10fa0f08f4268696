//! Plan Execution Module
//!
//! Provides the execution engine that paces a step sequence through the
//! fixed pipeline, and the aggregator that sequences multi-phase runs.
//!
//! # Architecture
//!
//! - [`pipeline`]: Stages, statuses, and the execution log
//! - [`policy`]: Per-mode pacing and retry budget
//! - [`timer`]: Single-slot cancellable transitions
//! - [`engine`]: Drives one step sequence
//! - [`aggregator`]: Sequences phases, one engine each
//! - [`driver`]: Synthetic and real-time drivers

pub mod aggregator;
pub mod driver;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod policy;
pub mod timer;

pub use aggregator::{AggregatorSnapshot, PhaseStatus, RunOutcome, WorkflowAggregator};
pub use driver::{run_to_idle, run_to_idle_with, Driven, SyntheticClock};
pub use engine::{Engine, EngineOutcome, EngineSnapshot, RunPhase};
pub use error::ExecutionError;
pub use pipeline::{LogEntry, Stage, StepStatus};
pub use policy::{should_retry, ModePolicy};
