//! Multi-round review and revision of generated documents.
//!
//! A document is drafted (or supplied), desk screened, reviewed in parallel
//! by several reviewers, and then accepted, sent back for revision or
//! rejected. Every step that cannot be repeated cheaply is checkpointed so a
//! crashed workflow resumes where it stopped.

pub mod citations;
pub mod config;
pub mod decision;
pub mod errors;
pub mod generation;
pub mod logging;
pub mod parser;
pub mod research;
pub mod review;
pub mod workflow;

pub use config::RefereeConfig;
pub use errors::WorkflowError;
pub use workflow::{WorkflowBuilder, WorkflowInput, WorkflowOutcome, WorkflowResult};
