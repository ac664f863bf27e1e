//! Parallel review rounds.
//!
//! Every reviewer is called concurrently; the round succeeds as long as at
//! least one of them produces a usable review. A reviewer whose call fails,
//! or whose output cannot be parsed or leaves a dimension unscored, is
//! recorded as on leave.

use super::prompts::{REVIEW_SYSTEM, build_review_prompt};
use super::report::{Review, overall_average};
use super::reviewer::Reviewer;
use crate::errors::ReviewError;
use crate::generation::{ContinuationSettings, GenerationRequest, generate_with_continuation};
use crate::parser::StructuredOutputParser;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const SCORE_EPSILON: f64 = 1e-9;

/// Per-round inputs shared by every reviewer.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewContext {
    pub topic: String,
    pub context: Option<String>,
    pub round_number: u32,
    /// Digest of the previous round's reviews and decision, if any.
    pub previous_feedback: Option<String>,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl ReviewContext {
    pub fn new(topic: impl Into<String>, round_number: u32) -> Self {
        Self {
            topic: topic.into(),
            context: None,
            round_number,
            previous_feedback: None,
            temperature: 0.3,
            max_output_tokens: 8192,
        }
    }

    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }

    pub fn with_previous_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.previous_feedback = Some(feedback.into());
        self
    }

    pub fn with_generation(mut self, temperature: f32, max_output_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_output_tokens = max_output_tokens;
        self
    }
}

/// Reviewers scoring far below their peers. Informational only; stored
/// scores are never altered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutlierReport {
    /// Mean over active reviewers.
    pub group_mean: f64,
    /// Identities of flagged reviewers.
    #[serde(default)]
    pub flagged: Vec<String>,
    /// Mean with the flagged reviewers excluded, when any were flagged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjusted_mean: Option<f64>,
}

impl OutlierReport {
    pub fn has_outliers(&self) -> bool {
        !self.flagged.is_empty()
    }
}

/// Flag active reviewers whose average is at least `deviation` below the
/// group mean. Needs two or more active reviewers.
pub fn detect_outliers(reviews: &[Review], deviation: f64) -> OutlierReport {
    let active: Vec<&Review> = reviews.iter().filter(|r| r.is_active()).collect();
    let group_mean = overall_average(reviews);

    if active.len() < 2 {
        return OutlierReport {
            group_mean,
            ..Default::default()
        };
    }

    let (flagged, kept): (Vec<&Review>, Vec<&Review>) = active
        .into_iter()
        .partition(|r| group_mean - r.average + SCORE_EPSILON >= deviation);

    let adjusted_mean = (!flagged.is_empty() && !kept.is_empty())
        .then(|| kept.iter().map(|r| r.average).sum::<f64>() / kept.len() as f64);

    OutlierReport {
        group_mean,
        flagged: flagged.iter().map(|r| r.reviewer.clone()).collect(),
        adjusted_mean,
    }
}

/// Result of a review round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundReviews {
    pub round_number: u32,
    /// One entry per reviewer, in reviewer order, on-leave placeholders included.
    pub reviews: Vec<Review>,
    pub overall_average: f64,
    pub outliers: OutlierReport,
}

impl RoundReviews {
    pub fn active_count(&self) -> usize {
        self.reviews.iter().filter(|r| r.is_active()).count()
    }
}

/// Fans a review task out to every reviewer and aggregates the results.
#[derive(Debug, Clone)]
pub struct ReviewRoundCoordinator {
    parser: StructuredOutputParser,
    outlier_deviation: f64,
    continuation: ContinuationSettings,
}

impl Default for ReviewRoundCoordinator {
    fn default() -> Self {
        Self::new(StructuredOutputParser::new())
    }
}

impl ReviewRoundCoordinator {
    pub fn new(parser: StructuredOutputParser) -> Self {
        Self {
            parser,
            outlier_deviation: 1.5,
            continuation: ContinuationSettings::default(),
        }
    }

    pub fn with_outlier_deviation(mut self, deviation: f64) -> Self {
        self.outlier_deviation = deviation;
        self
    }

    pub fn with_continuation(mut self, continuation: ContinuationSettings) -> Self {
        self.continuation = continuation;
        self
    }

    /// Review `document` with every reviewer concurrently.
    ///
    /// Fails only when there are no reviewers or every reviewer failed.
    pub async fn run_round(
        &self,
        document: &str,
        round_number: u32,
        reviewers: &[Reviewer],
        context: &ReviewContext,
    ) -> Result<RoundReviews, ReviewError> {
        if reviewers.is_empty() {
            return Err(ReviewError::NoReviewers {
                round: round_number,
            });
        }

        info!(
            round = round_number,
            reviewers = reviewers.len(),
            "Starting review round"
        );

        let futures: Vec<_> = reviewers
            .iter()
            .map(|reviewer| self.run_single_review(reviewer, document, context))
            .collect();
        let results = join_all(futures).await;

        let mut reviews = Vec::with_capacity(reviewers.len());
        let mut errors = Vec::new();
        for (reviewer, result) in reviewers.iter().zip(results) {
            match result {
                Ok(review) => reviews.push(review),
                Err(e) => {
                    warn!(
                        round = round_number,
                        reviewer = reviewer.id(),
                        error = %e,
                        "Reviewer on leave"
                    );
                    errors.push(format!("{}: {e}", reviewer.id()));
                    reviews.push(Review::on_leave(reviewer, e.to_string()));
                }
            }
        }

        if errors.len() == reviewers.len() {
            return Err(ReviewError::AllReviewersFailed {
                round: round_number,
                count: errors.len(),
                errors,
            });
        }

        let overall_average = overall_average(&reviews);
        let outliers = detect_outliers(&reviews, self.outlier_deviation);
        if outliers.has_outliers() {
            warn!(
                round = round_number,
                flagged = ?outliers.flagged,
                group_mean = outliers.group_mean,
                adjusted_mean = ?outliers.adjusted_mean,
                "Outlier reviewers detected"
            );
        }

        info!(
            round = round_number,
            overall_average,
            on_leave = errors.len(),
            "Review round complete"
        );

        Ok(RoundReviews {
            round_number,
            reviews,
            overall_average,
            outliers,
        })
    }

    async fn run_single_review(
        &self,
        reviewer: &Reviewer,
        document: &str,
        context: &ReviewContext,
    ) -> Result<Review, ReviewError> {
        let request = GenerationRequest::new(build_review_prompt(reviewer, document, context))
            .with_system(REVIEW_SYSTEM)
            .with_temperature(context.temperature)
            .with_max_output_tokens(context.max_output_tokens);

        let generation =
            generate_with_continuation(reviewer.generator(), &request, self.continuation).await?;

        let map = self
            .parser
            .repair(&generation.content)
            .map_err(ReviewError::Unparseable)?;

        Review::from_parsed(reviewer, &map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::GenerationError;
    use crate::generation::testing::ScriptedGenerator;
    use crate::review::report::review_with_average;
    use crate::review::reviewer::{ReviewerProfile, ReviewerRole};
    use std::sync::Arc;

    fn scored(score: u32) -> String {
        format!(
            r#"{{"scores": {{"accuracy": {score}, "completeness": {score}, "clarity": {score},
               "novelty": {score}, "rigor": {score}, "citations": {score}}},
               "summary": "ok"}}"#
        )
    }

    fn reviewer(id: &str, generator: ScriptedGenerator) -> Reviewer {
        Reviewer::new(
            ReviewerProfile::new(id, ReviewerRole::DomainExpert, "p"),
            Arc::new(generator),
        )
    }

    fn context() -> ReviewContext {
        ReviewContext::new("topic", 1)
    }

    // =========================================
    // Outlier detection
    // =========================================

    #[test]
    fn test_outlier_flagged() {
        let reviews: Vec<Review> = [8.0, 8.0, 8.0, 4.0]
            .iter()
            .enumerate()
            .map(|(i, s)| review_with_average(&format!("r{i}"), *s))
            .collect();
        let report = detect_outliers(&reviews, 1.5);
        assert_eq!(report.group_mean, 7.0);
        assert_eq!(report.flagged, vec!["r3"]);
        assert_eq!(report.adjusted_mean, Some(8.0));
        assert_eq!(reviews[3].average, 4.0);
    }

    #[test]
    fn test_no_outlier_within_deviation() {
        let reviews: Vec<Review> = [8.0, 7.0, 6.0]
            .iter()
            .enumerate()
            .map(|(i, s)| review_with_average(&format!("r{i}"), *s))
            .collect();
        let report = detect_outliers(&reviews, 1.5);
        assert!(!report.has_outliers());
        assert_eq!(report.adjusted_mean, None);
    }

    #[test]
    fn test_outliers_need_two_active_reviewers() {
        let reviews = vec![review_with_average("solo", 2.0)];
        assert!(!detect_outliers(&reviews, 1.5).has_outliers());
    }

    // =========================================
    // Rounds
    // =========================================

    #[tokio::test]
    async fn test_all_reviewers_succeed() {
        let reviewers = vec![
            reviewer("a", ScriptedGenerator::replying("p", &scored(8))),
            reviewer("b", ScriptedGenerator::replying("p", &scored(6))),
        ];
        let round = ReviewRoundCoordinator::default()
            .run_round("doc", 1, &reviewers, &context())
            .await
            .unwrap();
        assert_eq!(round.reviews.len(), 2);
        assert_eq!(round.overall_average, 7.0);
        assert_eq!(round.active_count(), 2);
    }

    #[tokio::test]
    async fn test_partial_failures_become_on_leave() {
        let reviewers = vec![
            reviewer("a", ScriptedGenerator::replying("p", &scored(9))),
            reviewer(
                "b",
                ScriptedGenerator::failing("p", GenerationError::Timeout { secs: 1 }),
            ),
            reviewer("c", ScriptedGenerator::replying("p", "I refuse to answer.")),
            reviewer("d", ScriptedGenerator::replying("p", &scored(7))),
        ];
        let round = ReviewRoundCoordinator::default()
            .run_round("doc", 1, &reviewers, &context())
            .await
            .unwrap();

        assert_eq!(round.reviews.len(), 4);
        let ids: Vec<&str> = round.reviews.iter().map(|r| r.reviewer.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        assert!(round.reviews[1].on_leave);
        assert!(round.reviews[2].on_leave);
        assert!(round.reviews[2].error.as_deref().unwrap().contains("Unparseable"));
        assert_eq!(round.overall_average, 8.0);
        assert!(!round.outliers.flagged.contains(&"b".to_string()));
    }

    #[tokio::test]
    async fn test_all_reviewers_failed() {
        let reviewers = vec![
            reviewer("a", ScriptedGenerator::failing("p", GenerationError::Transient("x".into()))),
            reviewer("b", ScriptedGenerator::failing("p", GenerationError::Transient("y".into()))),
        ];
        let err = ReviewRoundCoordinator::default()
            .run_round("doc", 3, &reviewers, &context())
            .await
            .unwrap_err();
        match err {
            ReviewError::AllReviewersFailed { round, count, errors } => {
                assert_eq!(round, 3);
                assert_eq!(count, 2);
                assert!(errors[0].starts_with("a: "));
            }
            other => panic!("Expected AllReviewersFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_reviewers() {
        let err = ReviewRoundCoordinator::default()
            .run_round("doc", 1, &[], &context())
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewError::NoReviewers { round: 1 }));
    }

    #[tokio::test]
    async fn test_truncated_review_is_repaired() {
        let truncated = r#"{"scores": {"accuracy": 7, "completeness": 9, "clarity": 9,
            "novelty": 7, "rigor": 8, "citations": 8}, "summary": "Reads well but the ar"#;
        let reviewers = vec![reviewer("a", ScriptedGenerator::replying("p", truncated))];
        let round = ReviewRoundCoordinator::default()
            .run_round("doc", 1, &reviewers, &context())
            .await
            .unwrap();
        assert_eq!(round.reviews[0].average, 8.0);
        assert_eq!(round.reviews[0].summary, "Reads well but the ar");
    }

    #[tokio::test]
    async fn test_partial_score_map_puts_reviewer_on_leave() {
        let reviewers = vec![
            reviewer("a", ScriptedGenerator::replying("p", r#"{"scores": {"accuracy": 10}}"#)),
            reviewer("b", ScriptedGenerator::replying("p", &scored(6))),
        ];
        let round = ReviewRoundCoordinator::default()
            .run_round("doc", 1, &reviewers, &context())
            .await
            .unwrap();
        assert!(round.reviews[0].on_leave);
        assert!(round.reviews[0].error.as_deref().unwrap().contains("missing scores"));
        assert_eq!(round.overall_average, 6.0);
    }
}
