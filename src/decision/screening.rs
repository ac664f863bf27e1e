//! Desk screening: one cheap call before any review round.
//!
//! Screening fails open. If the call errors or its output cannot be
//! understood, the document passes and the review rounds decide.

use crate::generation::{GenerationRequest, TextGenerator};
use crate::parser::{StructuredOutputParser, field_str, fields::lookup};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

const SCREENING_SYSTEM: &str =
    "You are a managing editor doing a desk review. Respond with a single JSON object.";

/// Longest document prefix sent for screening.
const SCREENING_EXCERPT_CHARS: usize = 12_000;

/// Outcome of desk screening.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreeningOutcome {
    pub passed: bool,
    pub reason: String,
}

impl ScreeningOutcome {
    pub fn pass(reason: impl Into<String>) -> Self {
        Self {
            passed: true,
            reason: reason.into(),
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: reason.into(),
        }
    }
}

fn screening_prompt(topic: &str, document: &str) -> String {
    let excerpt: String = document.chars().take(SCREENING_EXCERPT_CHARS).collect();
    format!(
        r#"Decide whether this document is fit to be sent out for full review on the topic "{topic}".

Reject only if it is off-topic, empty, incoherent, or not a document at all.

## Document

{excerpt}

## Response Format

{{"decision": "PASS" or "DESK_REJECT", "reason": "..."}}
"#
    )
}

fn passed_from(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_uppercase().replace([' ', '-'], "_").as_str() {
            "PASS" | "PASSED" | "ACCEPT" | "SEND_OUT" | "TRUE" => Some(true),
            "DESK_REJECT" | "REJECT" | "REJECTED" | "FAIL" | "FALSE" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Runs desk screening against a generator.
pub struct DeskScreener {
    generator: Arc<dyn TextGenerator>,
    parser: StructuredOutputParser,
}

impl DeskScreener {
    pub fn new(generator: Arc<dyn TextGenerator>, parser: StructuredOutputParser) -> Self {
        Self { generator, parser }
    }

    pub async fn screen(&self, topic: &str, document: &str) -> ScreeningOutcome {
        let request = GenerationRequest::new(screening_prompt(topic, document))
            .with_system(SCREENING_SYSTEM)
            .with_temperature(0.0)
            .with_max_output_tokens(1024);

        let generation = match self.generator.generate(&request).await {
            Ok(generation) => generation,
            Err(e) => {
                warn!(error = %e, "Desk screening call failed, passing document");
                return ScreeningOutcome::pass(format!("Screening unavailable: {e}"));
            }
        };

        let map = match self.parser.repair(&generation.content) {
            Ok(map) => map,
            Err(e) => {
                warn!(error = %e, "Desk screening output unparseable, passing document");
                return ScreeningOutcome::pass(format!("Screening output unparseable: {e}"));
            }
        };

        let verdict = ["decision", "passed", "pass"]
            .iter()
            .find_map(|key| lookup(&map, key).and_then(passed_from));
        let reason = field_str(&map, "reason").unwrap_or_else(|| "No reason given".to_string());

        let outcome = match verdict {
            Some(true) => ScreeningOutcome::pass(reason),
            Some(false) => ScreeningOutcome::reject(reason),
            None => {
                warn!("Desk screening returned no recognizable decision, passing document");
                ScreeningOutcome::pass(format!("Screening decision unrecognized: {reason}"))
            }
        };
        info!(passed = outcome.passed, reason = %outcome.reason, "Desk screening complete");
        outcome
    }
}
