//! Editorial decisions: desk screening, completeness, score trajectory and
//! the per-round decision gate.

mod completeness;
mod engine;
mod screening;
mod trajectory;
mod verdict;

pub use completeness::{
    CompletenessIssue, MIN_WORDS, check_completeness, has_conclusion, has_references,
    is_structurally_complete,
};
pub use engine::{DecisionEngine, DecisionInput, DecisionSettings, parse_decision};
pub use screening::{DeskScreener, ScreeningOutcome};
pub use trajectory::{ScoreTrajectory, StagnationFlag, TrajectoryPoint};
pub use verdict::{Decision, DecisionSource, Verdict};

pub(crate) use completeness::REFERENCES_HEADING;
