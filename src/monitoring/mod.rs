//! Run Monitoring Module
//!
//! Provides the execution timeline recorded during engine runs.
//!
//! # Components
//!
//! - [`ExecutionTimeline`]: Stage start/retry/end timing for summaries and Gantt charts

pub mod timeline;

pub use timeline::{EventType, ExecutionTimeline, TimelineEvent};
