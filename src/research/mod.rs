//! Co-author research used when a workflow starts without a document.
//!
//! Each sub-topic is assigned to a co-author round-robin and researched
//! concurrently. A failed sub-topic becomes a placeholder brief; drafting
//! proceeds even if every sub-topic failed.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::citations::{GuardedReferenceSource, Reference};
use crate::generation::{GenerationRequest, TextGenerator};

const RESEARCH_SYSTEM: &str = "You are a co-author gathering background material for a document. \
Write concise research notes: key facts, open questions and the sources that support them.";

/// References requested per sub-topic.
const REFERENCES_PER_SUBTOPIC: usize = 5;

/// Notes gathered for one sub-topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchBrief {
    pub subtopic: String,
    /// Name of the co-author that produced the notes.
    pub author: String,
    pub notes: String,
    #[serde(default)]
    pub references: Vec<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResearchBrief {
    pub fn is_placeholder(&self) -> bool {
        self.error.is_some()
    }
}

/// Everything gathered during the research phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchOutcome {
    pub briefs: Vec<ResearchBrief>,
    /// Distinct references across all briefs, first occurrence wins.
    pub references: Vec<Reference>,
}

impl ResearchOutcome {
    fn from_briefs(briefs: Vec<ResearchBrief>) -> Self {
        let mut seen = HashSet::new();
        let references = briefs
            .iter()
            .flat_map(|b| b.references.iter())
            .filter(|r| seen.insert(r.dedup_key()))
            .cloned()
            .collect();
        Self { briefs, references }
    }

    pub fn successful(&self) -> impl Iterator<Item = &ResearchBrief> {
        self.briefs.iter().filter(|b| !b.is_placeholder())
    }

    /// Markdown digest of the successful briefs for the drafting prompt.
    pub fn digest(&self) -> String {
        let mut out = String::new();
        for brief in self.successful() {
            out.push_str(&format!("## {}\n\n{}\n\n", brief.subtopic, brief.notes.trim()));
        }
        if !self.references.is_empty() {
            out.push_str("## Available references\n\n");
            for (i, reference) in self.references.iter().enumerate() {
                out.push_str(&format!("[{}] {}\n", i + 1, reference.formatted()));
            }
        }
        out
    }
}

pub struct ResearchCoordinator {
    co_authors: Vec<Arc<dyn TextGenerator>>,
    references: Option<Arc<GuardedReferenceSource>>,
}

impl ResearchCoordinator {
    pub fn new(co_authors: Vec<Arc<dyn TextGenerator>>) -> Self {
        Self {
            co_authors,
            references: None,
        }
    }

    pub fn with_reference_source(mut self, source: Arc<GuardedReferenceSource>) -> Self {
        self.references = Some(source);
        self
    }

    pub async fn research(&self, topic: &str, subtopics: &[String]) -> ResearchOutcome {
        if self.co_authors.is_empty() || subtopics.is_empty() {
            return ResearchOutcome::default();
        }

        info!(
            topic,
            subtopics = subtopics.len(),
            co_authors = self.co_authors.len(),
            "Starting research phase"
        );

        let futures: Vec<_> = subtopics
            .iter()
            .enumerate()
            .map(|(i, subtopic)| {
                let author = &self.co_authors[i % self.co_authors.len()];
                self.research_subtopic(author.as_ref(), topic, subtopic)
            })
            .collect();
        let briefs = join_all(futures).await;

        let failed = briefs.iter().filter(|b| b.is_placeholder()).count();
        if failed == briefs.len() {
            warn!(topic, "Every research call failed, drafting without notes");
        }
        ResearchOutcome::from_briefs(briefs)
    }

    async fn research_subtopic(
        &self,
        author: &dyn TextGenerator,
        topic: &str,
        subtopic: &str,
    ) -> ResearchBrief {
        let references = match &self.references {
            Some(source) => match source
                .search(&format!("{topic} {subtopic}"), REFERENCES_PER_SUBTOPIC)
                .await
            {
                Ok(found) => found,
                Err(e) => {
                    warn!(subtopic, source = source.name(), error = %e, "Reference lookup failed");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let mut prompt = format!("Topic: {topic}\nSub-topic: {subtopic}\n\n");
        if !references.is_empty() {
            prompt.push_str("Known references:\n");
            for reference in &references {
                prompt.push_str(&format!("- {}\n", reference.formatted()));
            }
            prompt.push('\n');
        }
        prompt.push_str("Write research notes for this sub-topic.");

        let request = GenerationRequest::new(prompt).with_system(RESEARCH_SYSTEM);
        match author.generate(&request).await {
            Ok(generation) => ResearchBrief {
                subtopic: subtopic.to_string(),
                author: author.name().to_string(),
                notes: generation.content,
                references,
                error: None,
            },
            Err(e) => {
                warn!(subtopic, author = author.name(), error = %e, "Research call failed");
                ResearchBrief {
                    subtopic: subtopic.to_string(),
                    author: author.name().to_string(),
                    notes: String::new(),
                    references,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
