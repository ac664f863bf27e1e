//! Workflow orchestration: rounds, checkpoints, artifacts, status and the
//! state machine that ties them together.
//!
//! ## Usage
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use referee::decision::DecisionEngine;
//! # use referee::parser::StructuredOutputParser;
//! # use referee::review::Reviewer;
//! # use referee::generation::TextGenerator;
//! # use referee::workflow::{Author, StatusStore, WorkflowBuilder, WorkflowInput};
//! # async fn example(
//! #     reviewers: Vec<Reviewer>,
//! #     moderator: Arc<dyn TextGenerator>,
//! #     author: Arc<dyn Author>,
//! # ) -> anyhow::Result<()> {
//! let status = StatusStore::new();
//! let machine = WorkflowBuilder::new("soil-carbon")
//!     .with_reviewers(reviewers)
//!     .with_decision_engine(DecisionEngine::new(moderator, StructuredOutputParser::new()))
//!     .with_author(author)
//!     .with_status(Arc::new(status.handle("soil-carbon")))
//!     .build()?;
//!
//! let result = machine.run(WorkflowInput::new("Soil carbon sequestration")).await?;
//! println!("{} after {} rounds", result.outcome, result.rounds.len());
//! # Ok(())
//! # }
//! ```

mod artifacts;
mod author;
mod machine;
mod round;
mod state;
mod status;

pub use artifacts::ArtifactStore;
pub use author::{Author, GenerativeAuthor};
pub use machine::{
    WorkflowBuilder, WorkflowInput, WorkflowOutcome, WorkflowResult, WorkflowSettings,
    WorkflowStateMachine,
};
pub use round::{DiffSummary, Round};
pub use state::{Checkpoint, CheckpointStatus, CheckpointStore, RevisionRecord, WorkflowLock};
pub use status::{StatusCallback, StatusHandle, StatusStore, WorkflowPhase, WorkflowStatus};
