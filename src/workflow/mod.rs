//! Plan Definition Module
//!
//! Provides the step descriptors and plan structures handed to the
//! execution engine, along with loading, validation, and composition.
//!
//! # Structure
//!
//! - [`model`]: Core data structures (Step, ExecutionPhase, Plan)
//! - [`parser`]: YAML loading and saving
//! - [`validator`]: Structural validation rules
//! - [`composer`]: Maps a free-text request to a reply and plan

pub mod composer;
pub mod model;
pub mod parser;
pub mod validator;

pub use composer::{compose_response, AssistantResponse};
pub use model::{ExecutionPhase, Mode, Plan, PlanSettings, Step, StepCategory};
pub use parser::{load_plan, parse_plan, save_plan, PlanError};
pub use validator::{validate_plan, ValidationError};
