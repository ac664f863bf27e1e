//! Review rounds: reviewer descriptors, scored reviews and the round coordinator.
//!
//! ## Usage
//!
//! ```no_run
//! use referee::generation::{CommandGenerator, GeneratorRegistry};
//! use referee::review::{
//!     ReviewContext, ReviewRoundCoordinator, ReviewerProfile, ReviewerRole, bind_reviewers,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let registry = GeneratorRegistry::new()
//!     .with("claude", Arc::new(CommandGenerator::new("claude", "claude")));
//! let reviewers = bind_reviewers(
//!     &[
//!         ReviewerProfile::new("expert", ReviewerRole::DomainExpert, "claude"),
//!         ReviewerProfile::new("skeptic", ReviewerRole::Skeptic, "claude"),
//!     ],
//!     &registry,
//! )?;
//!
//! let round = ReviewRoundCoordinator::default()
//!     .run_round("# Draft\n...", 1, &reviewers, &ReviewContext::new("Soil carbon", 1))
//!     .await?;
//! println!("average {:.1}", round.overall_average);
//! # Ok(())
//! # }
//! ```

mod coordinator;
mod prompts;
mod report;
mod reviewer;
mod scores;

pub use coordinator::{
    OutlierReport, ReviewContext, ReviewRoundCoordinator, RoundReviews, detect_outliers,
};
pub use report::{Review, overall_average};
pub use reviewer::{Reviewer, ReviewerProfile, ReviewerRole, bind_reviewers};
pub use scores::{ScoreDimension, Scores};

#[cfg(test)]
pub(crate) use report::review_with_average;
