//! The decision gate.
//!
//! A round's reviews become exactly one [`Decision`]. When the average clears
//! the acceptance threshold and the document is structurally complete, the
//! decision is synthesized locally. Otherwise a moderator collaborator
//! decides, and anything it returns that cannot be turned into an allowed
//! verdict is an error: the gate never invents a verdict.

use super::completeness::{CompletenessIssue, is_structurally_complete};
use super::trajectory::{ScoreTrajectory, TrajectoryPoint};
use super::verdict::{Decision, DecisionSource, Verdict};
use crate::errors::DecisionError;
use crate::generation::{GenerationRequest, TextGenerator};
use crate::parser::{JsonMap, StructuredOutputParser, field_f64, field_list, field_str};
use crate::review::{OutlierReport, Review, overall_average};
use crate::workflow::Round;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, info};

const MODERATOR_SYSTEM: &str = "You are the handling editor. Weigh the reviews and decide. \
     Respond with a single JSON object and nothing else.";

const DOCUMENT_EXCERPT_CHARS: usize = 6_000;

/// Tunables for the decision gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionSettings {
    /// Scores at or above this are not considered stagnant.
    #[serde(default = "default_good_score")]
    pub good_score: f64,
    /// Minimum movement between rounds for a dimension to count as improving.
    #[serde(default = "default_stagnation_delta")]
    pub stagnation_delta: f64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

fn default_good_score() -> f64 {
    6.0
}

fn default_stagnation_delta() -> f64 {
    0.5
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_output_tokens() -> u32 {
    4096
}

impl Default for DecisionSettings {
    fn default() -> Self {
        Self {
            good_score: default_good_score(),
            stagnation_delta: default_stagnation_delta(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

/// Everything the gate looks at for one round.
#[derive(Debug, Clone, Copy)]
pub struct DecisionInput<'a> {
    pub topic: &'a str,
    pub document: &'a str,
    pub reviews: &'a [Review],
    pub round_number: u32,
    pub max_rounds: u32,
    /// Completed rounds before this one.
    pub history: &'a [Round],
    pub completeness_issues: &'a [CompletenessIssue],
    pub outliers: &'a OutlierReport,
    pub threshold: f64,
}

impl DecisionInput<'_> {
    pub fn is_final_round(&self) -> bool {
        self.round_number >= self.max_rounds
    }

    pub fn overall_average(&self) -> f64 {
        overall_average(self.reviews)
    }
}

/// Turns aggregated reviews into a decision.
pub struct DecisionEngine {
    generator: Arc<dyn TextGenerator>,
    parser: StructuredOutputParser,
    settings: DecisionSettings,
}

impl DecisionEngine {
    pub fn new(generator: Arc<dyn TextGenerator>, parser: StructuredOutputParser) -> Self {
        Self {
            generator,
            parser,
            settings: DecisionSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: DecisionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &DecisionSettings {
        &self.settings
    }

    /// The zero-cost auto-accept path, if it applies.
    pub fn fast_path(input: &DecisionInput<'_>) -> Option<Decision> {
        let average = input.overall_average();
        (average >= input.threshold && is_structurally_complete(input.document))
            .then(|| Decision::auto_accept(average, input.threshold))
    }

    /// Overall and per-dimension averages for every completed round plus
    /// the current one.
    pub fn trajectory(input: &DecisionInput<'_>) -> ScoreTrajectory {
        let mut trajectory = ScoreTrajectory::new();
        for round in input.history {
            trajectory.push(TrajectoryPoint::from_reviews(round.number, &round.reviews));
        }
        trajectory.push(TrajectoryPoint::from_reviews(input.round_number, input.reviews));
        trajectory
    }

    pub async fn decide(&self, input: &DecisionInput<'_>) -> Result<Decision, DecisionError> {
        if let Some(decision) = Self::fast_path(input) {
            info!(
                round = input.round_number,
                average = input.overall_average(),
                threshold = input.threshold,
                "Auto-accepting without moderator call"
            );
            return Ok(decision);
        }

        let request = GenerationRequest::new(self.build_prompt(input))
            .with_system(MODERATOR_SYSTEM)
            .with_temperature(self.settings.temperature)
            .with_max_output_tokens(self.settings.max_output_tokens);

        let generation = self.generator.generate(&request).await?;
        let map = self
            .parser
            .repair(&generation.content)
            .map_err(|source| DecisionError::Unparseable {
                source,
                raw: generation.content.clone(),
            })?;

        let decision = parse_decision(&map, input.round_number, input.max_rounds)?;
        info!(
            round = input.round_number,
            verdict = %decision.verdict,
            confidence = decision.confidence,
            "Moderator decision"
        );
        Ok(decision)
    }

    fn build_prompt(&self, input: &DecisionInput<'_>) -> String {
        let mut prompt = String::new();
        let _ = writeln!(
            prompt,
            "# Editorial Decision: round {} of {}\n\nTopic: {}\n",
            input.round_number, input.max_rounds, input.topic
        );

        prompt.push_str("## Reviews\n\n");
        for review in input.reviews.iter().filter(|r| r.is_active()) {
            prompt.push_str(&review.feedback_digest());
            prompt.push('\n');
        }
        let absent = input.reviews.iter().filter(|r| r.on_leave).count();
        if absent > 0 {
            let _ = writeln!(prompt, "({absent} reviewer(s) did not respond this round.)\n");
        }
        let _ = writeln!(
            prompt,
            "Overall average: {:.2} (acceptance threshold {:.2})\n",
            input.overall_average(),
            input.threshold
        );

        let trajectory = Self::trajectory(input);
        if trajectory.len() > 1 {
            prompt.push_str("## Score Trajectory\n\n");
            prompt.push_str(&trajectory.render());
            prompt.push('\n');
            let stagnant = trajectory
                .stagnant_dimensions(self.settings.stagnation_delta, self.settings.good_score);
            for flag in &stagnant {
                let _ = writeln!(
                    prompt,
                    "- STAGNANT: {} moved {:.2} -> {:.2} and is still below {:.1}",
                    flag.dimension, flag.previous, flag.current, self.settings.good_score
                );
            }
            if !stagnant.is_empty() {
                prompt.push('\n');
            }
        }

        let mut warnings: Vec<String> = input
            .completeness_issues
            .iter()
            .map(ToString::to_string)
            .collect();
        if input.outliers.has_outliers() {
            warnings.push(format!(
                "Outlier reviewers {} score far below the group mean {:.2}; mean without them {:.2}",
                input.outliers.flagged.join(", "),
                input.outliers.group_mean,
                input.outliers.adjusted_mean.unwrap_or(input.outliers.group_mean)
            ));
        }
        if !warnings.is_empty() {
            prompt.push_str("## Warnings\n\n");
            for warning in &warnings {
                let _ = writeln!(prompt, "- {warning}");
            }
            prompt.push('\n');
        }

        let excerpt: String = input.document.chars().take(DOCUMENT_EXCERPT_CHARS).collect();
        let _ = writeln!(prompt, "## Document (excerpt)\n\n{excerpt}\n");

        let allowed = Verdict::allowed_in_round(input.round_number, input.max_rounds);
        let allowed_list = allowed
            .iter()
            .map(Verdict::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        if input.is_final_round() {
            prompt.push_str(
                "This is the FINAL round. No further revision is possible: \
                 you must ACCEPT or REJECT.\n\n",
            );
        }
        let _ = writeln!(
            prompt,
            "## Response Format\n\nAllowed verdicts: {allowed_list}\n\n\
             {{\"verdict\": \"...\", \"confidence\": <0.0-1.0>, \"rationale\": \"...\", \
             \"required_changes\": [\"...\"]}}"
        );

        debug!(round = input.round_number, chars = prompt.len(), "Built moderator prompt");
        prompt
    }
}

/// Interpret a parsed moderator response.
pub fn parse_decision(
    map: &JsonMap,
    round_number: u32,
    max_rounds: u32,
) -> Result<Decision, DecisionError> {
    let raw_verdict = field_str(map, "verdict")
        .or_else(|| field_str(map, "decision"))
        .ok_or_else(|| DecisionError::InvalidVerdict {
            value: String::new(),
        })?;
    let verdict: Verdict = raw_verdict
        .parse()
        .map_err(|_| DecisionError::InvalidVerdict {
            value: raw_verdict.clone(),
        })?;

    if !Verdict::allowed_in_round(round_number, max_rounds).contains(&verdict) {
        return Err(DecisionError::VerdictNotAllowed {
            verdict: verdict.to_string(),
            round: round_number,
        });
    }

    let confidence = match field_f64(map, "confidence") {
        Some(c) if c > 1.0 && c <= 100.0 => c / 100.0,
        Some(c) => c,
        None => 0.5,
    };
    let rationale = field_str(map, "rationale")
        .or_else(|| field_str(map, "reasoning"))
        .unwrap_or_default();

    Ok(Decision::new(
        verdict,
        confidence,
        rationale,
        field_list(map, "required_changes"),
        DecisionSource::Moderator,
    ))
}
