use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decision::Decision;
use crate::review::{OutlierReport, Review, RoundReviews};

/// One completed review round and its decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    /// 1-based, gapless.
    pub number: u32,
    /// Version of the document that was reviewed.
    pub document_version: u32,
    pub reviews: Vec<Review>,
    pub overall_average: f64,
    #[serde(default)]
    pub outliers: OutlierReport,
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_response: Option<String>,
    /// Filled in once the revised version exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<DiffSummary>,
    pub completed_at: DateTime<Utc>,
}

impl Round {
    pub fn new(document_version: u32, reviewed: RoundReviews, decision: Decision) -> Self {
        Self {
            number: reviewed.round_number,
            document_version,
            reviews: reviewed.reviews,
            overall_average: reviewed.overall_average,
            outliers: reviewed.outliers,
            decision,
            author_response: None,
            diff: None,
            completed_at: Utc::now(),
        }
    }

    pub fn with_author_response(mut self, response: Option<String>) -> Self {
        self.author_response = response;
        self
    }

    /// Decision, reviews and the author's response to them, as handed to
    /// the reviser and to the next round's reviewers.
    pub fn feedback_digest(&self) -> String {
        let mut out = format!(
            "Round {} decision: {}\n\n",
            self.number, self.decision
        );
        if !self.decision.required_changes.is_empty() {
            out.push_str("Required changes:\n");
            for change in &self.decision.required_changes {
                out.push_str(&format!("- {change}\n"));
            }
            out.push('\n');
        }
        for review in self.reviews.iter().filter(|r| r.is_active()) {
            out.push_str(&review.feedback_digest());
            out.push('\n');
        }
        if let Some(response) = &self.author_response {
            out.push_str(&format!("### Author response\n{}\n", response.trim()));
        }
        out
    }
}

/// Line-level summary of what a revision changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub added_lines: usize,
    pub removed_lines: usize,
    /// Headings of sections that were added, removed or edited.
    #[serde(default)]
    pub changed_sections: Vec<String>,
}

impl DiffSummary {
    /// Compare two versions as multisets of non-blank lines.
    pub fn compute(old: &str, new: &str) -> Self {
        let mut counts: HashMap<&str, i64> = HashMap::new();
        for line in content_lines(old) {
            *counts.entry(line).or_default() -= 1;
        }
        for line in content_lines(new) {
            *counts.entry(line).or_default() += 1;
        }
        let added_lines = counts.values().filter(|&&n| n > 0).map(|&n| n as usize).sum();
        let removed_lines = counts.values().filter(|&&n| n < 0).map(|&n| (-n) as usize).sum();

        let old_sections = sections(old);
        let new_sections = sections(new);
        let mut changed_sections = Vec::new();
        for (heading, body) in &new_sections {
            let before = old_sections.iter().find(|(h, _)| h == heading);
            if before.is_none_or(|(_, b)| b != body) {
                changed_sections.push(heading.clone());
            }
        }
        for (heading, _) in &old_sections {
            if !new_sections.iter().any(|(h, _)| h == heading) {
                changed_sections.push(heading.clone());
            }
        }

        Self {
            added_lines,
            removed_lines,
            changed_sections,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added_lines == 0 && self.removed_lines == 0
    }
}

impl std::fmt::Display for DiffSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "+{}/-{} lines", self.added_lines, self.removed_lines)?;
        if !self.changed_sections.is_empty() {
            write!(f, " in {}", self.changed_sections.join(", "))?;
        }
        Ok(())
    }
}

fn content_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().map(str::trim_end).filter(|l| !l.trim().is_empty())
}

fn heading_text(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|&c| c == '#').count();
    if (1..=6).contains(&hashes) && trimmed[hashes..].starts_with([' ', '\t']) {
        Some(trimmed[hashes..].trim())
    } else {
        None
    }
}

/// `(heading, body)` pairs in document order. Text before the first heading
/// is filed under "(preamble)".
fn sections(text: &str) -> Vec<(String, Vec<&str>)> {
    let mut out: Vec<(String, Vec<&str>)> = Vec::new();
    for line in content_lines(text) {
        match heading_text(line) {
            Some(heading) => out.push((heading.to_string(), Vec::new())),
            None => match out.last_mut() {
                Some((_, body)) => body.push(line),
                None => out.push(("(preamble)".to_string(), vec![line])),
            },
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{DecisionSource, Verdict};
    use crate::review::review_with_average;

    #[test]
    fn test_diff_counts_lines_as_multiset() {
        let old = "# A\n\nsame\nold line\n\n# B\n\nkept";
        let new = "# A\n\nsame\nnew line\nanother\n\n# B\n\nkept";
        let diff = DiffSummary::compute(old, new);
        assert_eq!(diff.added_lines, 2);
        assert_eq!(diff.removed_lines, 1);
        assert_eq!(diff.changed_sections, vec!["A".to_string()]);
        assert_eq!(diff.to_string(), "+2/-1 lines in A");
    }

    #[test]
    fn test_diff_reports_added_and_removed_sections() {
        let old = "# Intro\nx\n# Methods\ny";
        let new = "# Intro\nx\n# Results\nz";
        let diff = DiffSummary::compute(old, new);
        assert_eq!(diff.changed_sections, vec!["Results".to_string(), "Methods".to_string()]);
    }

    #[test]
    fn test_diff_of_identical_documents_is_empty() {
        let doc = "# T\n\nbody\n";
        let diff = DiffSummary::compute(doc, doc);
        assert!(diff.is_empty());
        assert!(diff.changed_sections.is_empty());
    }

    #[test]
    fn test_duplicate_lines_counted() {
        let diff = DiffSummary::compute("a\na", "a\na\na");
        assert_eq!(diff.added_lines, 1);
        assert_eq!(diff.removed_lines, 0);
        assert_eq!(diff.changed_sections, vec!["(preamble)".to_string()]);
    }

    #[test]
    fn test_round_feedback_digest() {
        let reviewed = RoundReviews {
            round_number: 2,
            reviews: vec![review_with_average("r1", 6.0)],
            overall_average: 6.0,
            outliers: OutlierReport::default(),
        };
        let decision = Decision::new(
            Verdict::MinorRevision,
            0.8,
            "Close",
            vec!["Tighten the abstract".into()],
            DecisionSource::Moderator,
        );
        let round = Round::new(2, reviewed, decision);
        assert_eq!(round.number, 2);
        let digest = round.feedback_digest();
        assert!(digest.starts_with("Round 2 decision: MINOR_REVISION"));
        assert!(digest.contains("- Tighten the abstract"));
        assert!(digest.contains("### r1"));
        assert!(!digest.contains("Author response"));

        let answered = round.with_author_response(Some("We will shorten it.".into()));
        let digest = answered.feedback_digest();
        assert!(digest.ends_with("### Author response\nWe will shorten it.\n"));
    }
}
