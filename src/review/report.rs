use super::reviewer::{Reviewer, ReviewerRole};
use super::scores::Scores;
use crate::errors::ReviewError;
use crate::parser::{JsonMap, field_list, field_str};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One reviewer's assessment of one document version.
///
/// Built once by the coordinator and never modified afterwards. An active
/// review scores every [`ScoreDimension`](super::ScoreDimension); output
/// that leaves any dimension out puts the reviewer on leave instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub reviewer: String,
    pub role: ReviewerRole,
    pub scores: Scores,
    /// Mean of `scores`; zero when on leave.
    pub average: f64,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub detailed_feedback: String,
    /// The reviewer failed to produce a review this round.
    #[serde(default)]
    pub on_leave: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Review {
    /// Build a review from parsed reviewer output. Fails unless every
    /// dimension is scored.
    pub fn from_parsed(reviewer: &Reviewer, map: &JsonMap) -> Result<Self, ReviewError> {
        let scores = Scores::from_map(map);
        let missing = scores.missing();
        if !missing.is_empty() {
            return Err(ReviewError::IncompleteScores {
                missing: missing.iter().map(|d| d.key().to_string()).collect(),
            });
        }
        Ok(Self {
            reviewer: reviewer.id().to_string(),
            role: reviewer.role(),
            average: scores.average(),
            scores,
            summary: field_str(map, "summary").unwrap_or_default(),
            strengths: field_list(map, "strengths"),
            weaknesses: field_list(map, "weaknesses"),
            suggestions: field_list(map, "suggestions"),
            detailed_feedback: field_str(map, "detailed_feedback").unwrap_or_default(),
            on_leave: false,
            error: None,
            created_at: Utc::now(),
        })
    }

    /// Placeholder for a reviewer whose call failed.
    pub fn on_leave(reviewer: &Reviewer, error: impl Into<String>) -> Self {
        Self {
            reviewer: reviewer.id().to_string(),
            role: reviewer.role(),
            scores: Scores::zeroed(),
            average: 0.0,
            summary: String::new(),
            strengths: Vec::new(),
            weaknesses: Vec::new(),
            suggestions: Vec::new(),
            detailed_feedback: String::new(),
            on_leave: true,
            error: Some(error.into()),
            created_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        !self.on_leave
    }

    /// Compact text form used when passing feedback to other collaborators.
    pub fn feedback_digest(&self) -> String {
        let mut out = format!(
            "### {} ({}), average {:.1}\n",
            self.reviewer, self.role, self.average
        );
        if !self.summary.is_empty() {
            out.push_str(&format!("{}\n", self.summary));
        }
        for (label, items) in [
            ("Weaknesses", &self.weaknesses),
            ("Suggestions", &self.suggestions),
        ] {
            if !items.is_empty() {
                out.push_str(&format!("{label}:\n"));
                for item in items {
                    out.push_str(&format!("- {item}\n"));
                }
            }
        }
        out
    }
}

/// Mean of the active reviews' averages; zero when none are active.
pub fn overall_average(reviews: &[Review]) -> f64 {
    let active: Vec<f64> = reviews
        .iter()
        .filter(|r| r.is_active())
        .map(|r| r.average)
        .collect();
    if active.is_empty() {
        0.0
    } else {
        active.iter().sum::<f64>() / active.len() as f64
    }
}

#[cfg(test)]
pub(crate) fn review_with_average(reviewer: &str, average: f64) -> Review {
    use super::scores::ScoreDimension;
    let scores = ScoreDimension::ALL
        .iter()
        .fold(Scores::new(), |s, d| s.with(*d, average));
    Review {
        reviewer: reviewer.to_string(),
        role: ReviewerRole::DomainExpert,
        average: scores.average(),
        scores,
        summary: String::new(),
        strengths: Vec::new(),
        weaknesses: Vec::new(),
        suggestions: Vec::new(),
        detailed_feedback: String::new(),
        on_leave: false,
        error: None,
        created_at: Utc::now(),
    }
}
