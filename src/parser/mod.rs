//! Best-effort parsing of structured model output.
//!
//! Generative collaborators are asked for a JSON object, but what comes back
//! is often wrapped in prose, fenced, or cut off mid-value. The
//! [`StructuredOutputParser`] tries a fixed sequence of strategies and returns
//! the first one that yields an object:
//!
//! 1. Direct parse of the whole text
//! 2. Fenced blocks (```` ```json ````, ```` ``` ````, `~~~`), parsed directly and
//!    then structurally repaired
//! 3. The substring from the first `{` to the last `}`
//! 4. Structural repair: close open strings and containers, drop dangling keys
//! 5. Aggressive fallback: shrink the candidate from the end, repairing at
//!    each length, within a bounded window
//!
//! ## Usage
//!
//! ```
//! use referee::parser::StructuredOutputParser;
//!
//! let parser = StructuredOutputParser::new();
//! let map = parser.repair(r#"Sure! {"verdict": "ACCEPT", "confidence": 0.9"#).unwrap();
//! assert_eq!(map["verdict"], "ACCEPT");
//! ```

pub mod extract;
pub mod fields;
mod repair;

pub use fields::{clamp_score, field_f64, field_list, field_map, field_str};

use crate::errors::ParseError;
use serde_json::Value;
use std::path::PathBuf;
use tracing::{debug, warn};

/// A parsed JSON object.
pub type JsonMap = serde_json::Map<String, Value>;

/// Default number of trailing characters the aggressive fallback may discard.
pub const DEFAULT_AGGRESSIVE_WINDOW: usize = 2000;

const PREVIEW_CHARS: usize = 200;

enum Attempt {
    Object(JsonMap),
    NotObject,
    Invalid,
}

fn attempt(text: &str) -> Attempt {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Attempt::Object(map),
        Ok(_) => Attempt::NotObject,
        Err(_) => Attempt::Invalid,
    }
}

fn parse_object(text: &str) -> Option<JsonMap> {
    match attempt(text) {
        Attempt::Object(map) => Some(map),
        _ => None,
    }
}

/// Repairs and parses free-form text into a [`JsonMap`].
#[derive(Debug, Clone)]
pub struct StructuredOutputParser {
    aggressive_window: usize,
    failure_dir: Option<PathBuf>,
}

impl Default for StructuredOutputParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StructuredOutputParser {
    pub fn new() -> Self {
        Self {
            aggressive_window: DEFAULT_AGGRESSIVE_WINDOW,
            failure_dir: None,
        }
    }

    /// Bound how many trailing characters the aggressive fallback may shrink.
    pub fn with_aggressive_window(mut self, window: usize) -> Self {
        self.aggressive_window = window;
        self
    }

    /// Write the raw text of every unrecoverable input into `dir`.
    pub fn with_failure_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.failure_dir = Some(dir.into());
        self
    }

    pub fn aggressive_window(&self) -> usize {
        self.aggressive_window
    }

    /// Parse `text` into a map, repairing it if needed.
    ///
    /// Fails only when every strategy fails.
    pub fn repair(&self, text: &str) -> Result<JsonMap, ParseError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ParseError::Empty);
        }

        match attempt(trimmed) {
            Attempt::Object(map) => return Ok(map),
            Attempt::NotObject if !trimmed.contains('{') => return Err(ParseError::NotAnObject),
            _ => {}
        }

        for block in extract::fenced_blocks(trimmed) {
            if let Some(map) = parse_object(block) {
                debug!(strategy = "fenced", "Recovered structured output");
                return Ok(map);
            }
            if let Some(map) = extract::from_first_brace(block).and_then(|c| self.structural(c)) {
                debug!(strategy = "fenced+structural", "Recovered structured output");
                return Ok(map);
            }
        }

        if let Some(map) = extract::outer_braces(trimmed).and_then(parse_object) {
            debug!(strategy = "outer_braces", "Recovered structured output");
            return Ok(map);
        }

        if let Some(candidate) = extract::from_first_brace(trimmed) {
            if let Some(map) = self.structural(candidate) {
                debug!(strategy = "structural", "Recovered structured output");
                return Ok(map);
            }
            if let Some(map) = self.aggressive(candidate) {
                warn!(
                    strategy = "aggressive",
                    keys = map.len(),
                    "Recovered structured output by discarding a truncated tail"
                );
                return Ok(map);
            }
        }

        self.record_failure(text);
        Err(ParseError::Unrecoverable {
            preview: trimmed.chars().take(PREVIEW_CHARS).collect(),
        })
    }

    fn structural(&self, candidate: &str) -> Option<JsonMap> {
        parse_object(&repair::close_structure(candidate)).or_else(|| {
            repair::close_structure_truncating(candidate).and_then(|s| parse_object(&s))
        })
    }

    fn aggressive(&self, candidate: &str) -> Option<JsonMap> {
        let floor = candidate.len().saturating_sub(self.aggressive_window);
        let mut end = candidate.len();

        while end > floor {
            end -= 1;
            if end == 0 {
                break;
            }
            if !candidate.is_char_boundary(end) {
                continue;
            }
            if let Some(map) = parse_object(&repair::close_structure(&candidate[..end])) {
                return Some(map);
            }
        }
        None
    }

    fn record_failure(&self, text: &str) {
        let Some(dir) = &self.failure_dir else {
            return;
        };
        let name = format!(
            "parse_failure_{}_{}.txt",
            chrono::Utc::now().format("%Y%m%dT%H%M%S%.3f"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let path = dir.join(name);
        let result = std::fs::create_dir_all(dir).and_then(|_| std::fs::write(&path, text));
        match result {
            Ok(()) => debug!(path = %path.display(), "Recorded unparseable output"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to record unparseable output"),
        }
    }
}
