//! Verdicts and decisions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Outcome of a decision gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Accept,
    MinorRevision,
    MajorRevision,
    Reject,
    /// Issued only by desk screening, before any review round.
    DeskReject,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "ACCEPT",
            Self::MinorRevision => "MINOR_REVISION",
            Self::MajorRevision => "MAJOR_REVISION",
            Self::Reject => "REJECT",
            Self::DeskReject => "DESK_REJECT",
        }
    }

    pub fn requires_revision(&self) -> bool {
        matches!(self, Self::MinorRevision | Self::MajorRevision)
    }

    /// Whether this verdict ends the workflow.
    pub fn is_terminal(&self) -> bool {
        !self.requires_revision()
    }

    /// Verdicts the moderator may return in `round` of `max_rounds`.
    ///
    /// The final round may only accept or reject.
    pub fn allowed_in_round(round: u32, max_rounds: u32) -> &'static [Verdict] {
        if round >= max_rounds {
            &[Self::Accept, Self::Reject]
        } else {
            &[
                Self::Accept,
                Self::MinorRevision,
                Self::MajorRevision,
                Self::Reject,
            ]
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verdict {
    type Err = String;

    /// Accepts the canonical names plus the spellings moderators tend to use
    /// (`"minor revision"`, `"Major-Revision"`, `"accepted"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .to_uppercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();
        match normalized.as_str() {
            "ACCEPT" | "ACCEPTED" => Ok(Self::Accept),
            "MINOR_REVISION" | "MINOR_REVISIONS" | "MINOR" => Ok(Self::MinorRevision),
            "MAJOR_REVISION" | "MAJOR_REVISIONS" | "MAJOR" => Ok(Self::MajorRevision),
            "REJECT" | "REJECTED" => Ok(Self::Reject),
            "DESK_REJECT" | "DESK_REJECTED" => Ok(Self::DeskReject),
            _ => Err(format!("unknown verdict '{s}'")),
        }
    }
}

/// Who produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// Synthesized by the fast path without an external call.
    AutoAccept,
    /// Returned by the moderator collaborator.
    Moderator,
    /// Issued by desk screening.
    Screening,
}

impl fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AutoAccept => write!(f, "auto-accept"),
            Self::Moderator => write!(f, "moderator"),
            Self::Screening => write!(f, "screening"),
        }
    }
}

/// The single decision recorded for a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub verdict: Verdict,
    /// 0.0 to 1.0.
    pub confidence: f64,
    pub rationale: String,
    /// Empty unless the verdict requests a revision.
    #[serde(default)]
    pub required_changes: Vec<String>,
    pub source: DecisionSource,
}

impl Decision {
    fn clamp_confidence(confidence: f64) -> f64 {
        if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.5
        }
    }

    /// Build a decision. `required_changes` is dropped unless the verdict
    /// requests a revision.
    pub fn new(
        verdict: Verdict,
        confidence: f64,
        rationale: impl Into<String>,
        required_changes: Vec<String>,
        source: DecisionSource,
    ) -> Self {
        Self {
            verdict,
            confidence: Self::clamp_confidence(confidence),
            rationale: rationale.into(),
            required_changes: if verdict.requires_revision() {
                required_changes
            } else {
                Vec::new()
            },
            source,
        }
    }

    /// Fast-path acceptance.
    pub fn auto_accept(overall_average: f64, threshold: f64) -> Self {
        Self::new(
            Verdict::Accept,
            1.0,
            format!(
                "Auto-accepted: average score {overall_average:.2} meets the threshold \
                 {threshold:.2} and the document is structurally complete."
            ),
            Vec::new(),
            DecisionSource::AutoAccept,
        )
    }

    pub fn desk_reject(reason: impl Into<String>) -> Self {
        Self::new(
            Verdict::DeskReject,
            1.0,
            reason,
            Vec::new(),
            DecisionSource::Screening,
        )
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:.0}% confidence, {}): {}",
            self.verdict,
            self.confidence * 100.0,
            self.source,
            self.rationale
        )
    }
}
