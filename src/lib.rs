//! FlowPilot - Paced Execution Engine for Automation Walkthroughs
//!
//! Walks a user through a simulated device-automation task, either in
//! guided mode (slow pacing, one automatic retry) or autonomous mode
//! (self-driving, three automatic retries). Every phase of a plan is
//! driven through the same four-stage pipeline with timed transitions,
//! bounded retries, and an accumulated execution log.
//!
//! # Architecture
//!
//! The library is organized into three main modules:
//!
//! - [`workflow`]: Step descriptors, plans, loading, and response composition
//! - [`execution`]: Execution engine, phase aggregator, and timer drivers
//! - [`monitoring`]: Execution timeline for run summaries
//!
//! # Example
//!
//! ```rust
//! use flowpilot::execution::{RunOutcome, SyntheticClock, WorkflowAggregator};
//! use flowpilot::workflow::{compose_response, Mode};
//!
//! let response = compose_response("add an orange to my cart", Mode::Autonomous);
//!
//! let mut aggregator = WorkflowAggregator::new(Mode::Autonomous);
//! assert!(aggregator.start(response.plan.phases()).is_none());
//!
//! let outcome = SyntheticClock::new().run_until_idle(&mut aggregator);
//! assert!(matches!(outcome, Some(RunOutcome::Failed { phase: 1, .. })));
//! ```

pub mod execution;
pub mod monitoring;
pub mod workflow;

// Re-export commonly used types
pub use execution::{Engine, WorkflowAggregator};
pub use workflow::model::{ExecutionPhase, Mode, Plan, Step};
pub use workflow::parser::load_plan;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "FlowPilot";
