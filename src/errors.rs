//! Typed error hierarchy for the review workflow engine.
//!
//! One enum per subsystem:
//! - `ParseError`: structured output could not be recovered
//! - `GenerationError`: generative-text collaborator failures
//! - `ReviewError`: review round failures
//! - `DecisionError`: decision gate failures (always fatal)
//! - `CheckpointError`: checkpoint persistence failures
//! - `WorkflowError`: top-level state machine failures

use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;
use thiserror::Error;

/// Markers in an error message that identify a failure retrying cannot fix.
const PERMANENT_MARKERS: &[&str] = &[
    "unauthorized",
    "authentication",
    "authorization",
    "forbidden",
    "permission denied",
    "invalid api key",
    "not found",
];

/// 401/403/404 as a standalone status code, not part of a number or unit.
static PERMANENT_STATUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^\w.])(?:401|403|404)(?:$|[^\w.])").unwrap());

/// Errors from the structured output parser.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Structured output was empty")]
    Empty,

    #[error("Parsed value is not an object")]
    NotAnObject,

    #[error("No repair strategy recovered the structured output (starts with: {preview})")]
    Unrecoverable { preview: String },
}

/// Errors from a generative-text collaborator.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("Generation timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Transient generation failure: {0}")]
    Transient(String),

    #[error("Permanent generation failure: {0}")]
    Permanent(String),

    #[error("Generator process failed with exit code {exit_code}: {message}")]
    Process { exit_code: i32, message: String },

    #[error("Generation failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

impl GenerationError {
    /// Build an error from a raw failure message, classifying it as permanent
    /// when it mentions authentication, authorization or a missing resource.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        if is_permanent_message(&message) {
            Self::Permanent(message)
        } else {
            Self::Transient(message)
        }
    }

    /// Whether retrying (or falling back) might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Transient(msg) => !is_permanent_message(msg),
            Self::Process { message, .. } => !is_permanent_message(message),
            Self::Permanent(_) | Self::Exhausted { .. } => false,
        }
    }
}

fn is_permanent_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    PERMANENT_MARKERS.iter().any(|m| lower.contains(m)) || PERMANENT_STATUS.is_match(&lower)
}

/// Errors from a review round.
///
/// The per-reviewer variants never abort a round; the coordinator turns them
/// into on-leave placeholders.
#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("Reviewer call failed: {0}")]
    Call(#[from] GenerationError),

    #[error("Unparseable review: {0}")]
    Unparseable(#[source] ParseError),

    #[error("Review is missing scores for {}", missing.join(", "))]
    IncompleteScores { missing: Vec<String> },

    #[error("No reviewers configured for round {round}")]
    NoReviewers { round: u32 },

    #[error("All {count} reviewers failed in round {round}: {}", errors.join("; "))]
    AllReviewersFailed {
        round: u32,
        count: usize,
        errors: Vec<String>,
    },
}

/// Errors from the decision gate.
///
/// Every variant is fatal to the workflow: the gate never substitutes a
/// default verdict.
#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("Decision call failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("Decision output could not be parsed: {source}")]
    Unparseable {
        #[source]
        source: ParseError,
        raw: String,
    },

    #[error("Decision output has no recognizable verdict (got {value:?})")]
    InvalidVerdict { value: String },

    #[error("Verdict {verdict} is not allowed in round {round}")]
    VerdictNotAllowed { verdict: String, round: u32 },
}

/// Errors from checkpoint persistence.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Failed to read checkpoint at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write checkpoint at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkpoint at {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize checkpoint: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Workflow {workflow_id} is locked by another process")]
    Locked { workflow_id: String },
}

/// Errors from the workflow state machine.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Review(#[from] ReviewError),

    #[error(transparent)]
    Decision(#[from] DecisionError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("Drafting the initial document failed: {0}")]
    Draft(#[source] anyhow::Error),

    #[error("Revision for round {round} failed: {source}")]
    Revision {
        round: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("No checkpoint found for workflow {workflow_id}")]
    NoCheckpoint { workflow_id: String },

    #[error("Artifact I/O failed at {path}: {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No generator bound for provider '{provider}' (reviewer {reviewer})")]
    UnboundProvider { reviewer: String, provider: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
