//! Structural completeness of a document.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static CONCLUSION_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^[ \t]*(?:#{1,6}[ \t]*)?(?:\d+(?:\.\d+)*\.?[ \t]*)?(?:\*\*)?(?:conclusions?|concluding remarks|summary and conclusions?|discussion and conclusions?|final thoughts)\b",
    )
    .unwrap()
});

pub(crate) static REFERENCES_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^[ \t]*(?:#{1,6}[ \t]*)?(?:\d+(?:\.\d+)*\.?[ \t]*)?(?:\*\*)?(?:references|bibliography|works cited|sources|literature cited)(?:\*\*)?[ \t]*:?[ \t]*\r?$",
    )
    .unwrap()
});

/// Documents shorter than this are flagged.
pub const MIN_WORDS: usize = 300;

/// A structural problem found in a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompletenessIssue {
    MissingConclusion,
    MissingReferences,
    TooShort { words: usize },
}

impl fmt::Display for CompletenessIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingConclusion => write!(f, "No concluding section"),
            Self::MissingReferences => write!(f, "No references or bibliography section"),
            Self::TooShort { words } => {
                write!(f, "Document is very short ({words} words, expected at least {MIN_WORDS})")
            }
        }
    }
}

pub fn has_conclusion(document: &str) -> bool {
    CONCLUSION_HEADING.is_match(document)
}

pub fn has_references(document: &str) -> bool {
    REFERENCES_HEADING.is_match(document)
}

/// Both a concluding section and a references section are present.
pub fn is_structurally_complete(document: &str) -> bool {
    has_conclusion(document) && has_references(document)
}

pub fn check_completeness(document: &str) -> Vec<CompletenessIssue> {
    let mut issues = Vec::new();
    if !has_conclusion(document) {
        issues.push(CompletenessIssue::MissingConclusion);
    }
    if !has_references(document) {
        issues.push(CompletenessIssue::MissingReferences);
    }
    let words = document.split_whitespace().count();
    if words < MIN_WORDS {
        issues.push(CompletenessIssue::TooShort { words });
    }
    issues
}
