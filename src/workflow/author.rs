//! The author collaborator: drafts, revises and answers reviewers.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::round::Round;
use crate::generation::{
    ContinuationSettings, GenerationRequest, TextGenerator, generate_with_continuation,
};
use crate::research::ResearchOutcome;
use crate::review::RoundReviews;

/// Produces document text. Real implementation: [`GenerativeAuthor`].
#[async_trait]
pub trait Author: Send + Sync {
    /// Write the first version of the document.
    async fn draft(
        &self,
        topic: &str,
        context: Option<&str>,
        research: &ResearchOutcome,
    ) -> Result<String>;

    /// Rewrite `document` to address the round's reviews and decision. The
    /// round carries the author's own response to the reviewers when one was
    /// drafted.
    async fn revise(&self, document: &str, round: &Round) -> Result<String>;

    /// Point-by-point response to the reviewers.
    async fn respond(&self, document: &str, reviews: &RoundReviews) -> Result<String>;
}

const AUTHOR_SYSTEM: &str = "You are the author of a long-form document. \
Write in Markdown with section headings, a concluding section and a References section.";

const RESPONSE_SYSTEM: &str =
    "You are the author replying to reviewers. Answer each point briefly and concretely.";

pub struct GenerativeAuthor {
    generator: Arc<dyn TextGenerator>,
    continuation: ContinuationSettings,
    temperature: f32,
    max_output_tokens: u32,
}

impl GenerativeAuthor {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            generator,
            continuation: ContinuationSettings::default(),
            temperature: 0.7,
            max_output_tokens: 16_384,
        }
    }

    pub fn with_continuation(mut self, continuation: ContinuationSettings) -> Self {
        self.continuation = continuation;
        self
    }

    pub fn with_generation(mut self, temperature: f32, max_output_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_output_tokens = max_output_tokens;
        self
    }

    async fn write(&self, system: &str, prompt: String) -> Result<String> {
        let request = GenerationRequest::new(prompt)
            .with_system(system)
            .with_temperature(self.temperature)
            .with_max_output_tokens(self.max_output_tokens);
        let generation =
            generate_with_continuation(self.generator.as_ref(), &request, self.continuation)
                .await
                .with_context(|| format!("Author call to {} failed", self.generator.name()))?;
        let text = generation.content.trim().to_string();
        if text.is_empty() {
            anyhow::bail!("Author {} returned an empty document", self.generator.name());
        }
        Ok(text)
    }
}

#[async_trait]
impl Author for GenerativeAuthor {
    async fn draft(
        &self,
        topic: &str,
        context: Option<&str>,
        research: &ResearchOutcome,
    ) -> Result<String> {
        let mut prompt = format!("Write a complete document on: {topic}\n\n");
        if let Some(context) = context {
            prompt.push_str(&format!("Context:\n{context}\n\n"));
        }
        let notes = research.digest();
        if !notes.is_empty() {
            prompt.push_str(&format!("# Research notes\n\n{notes}\n"));
        }
        self.write(AUTHOR_SYSTEM, prompt).await
    }

    async fn revise(&self, document: &str, round: &Round) -> Result<String> {
        let prompt = format!(
            "Revise the document below to address the feedback. Return the full revised \
             document only.\n\n# Feedback\n\n{}\n# Current document\n\n{document}",
            round.feedback_digest()
        );
        self.write(AUTHOR_SYSTEM, prompt).await
    }

    async fn respond(&self, document: &str, reviews: &RoundReviews) -> Result<String> {
        let mut prompt = format!(
            "Round {} reviews of your document follow. Write a response to the reviewers.\n\n",
            reviews.round_number
        );
        for review in reviews.reviews.iter().filter(|r| r.is_active()) {
            prompt.push_str(&review.feedback_digest());
            prompt.push('\n');
        }
        let excerpt: String = document.chars().take(4_000).collect();
        prompt.push_str(&format!("# Document excerpt\n\n{excerpt}"));
        self.write(RESPONSE_SYSTEM, prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{Decision, DecisionSource, Verdict};
    use crate::errors::GenerationError;
    use crate::generation::testing::ScriptedGenerator;
    use crate::review::{OutlierReport, review_with_average};

    fn reviewed() -> RoundReviews {
        RoundReviews {
            round_number: 1,
            reviews: vec![review_with_average("r1", 5.0)],
            overall_average: 5.0,
            outliers: OutlierReport::default(),
        }
    }

    #[tokio::test]
    async fn test_draft_includes_research_notes() {
        let generator = Arc::new(ScriptedGenerator::replying("author", "# Draft\n"));
        let author = GenerativeAuthor::new(generator.clone());
        let research = ResearchOutcome {
            briefs: vec![crate::research::ResearchBrief {
                subtopic: "carbon".into(),
                author: "co".into(),
                notes: "Soils store carbon.".into(),
                references: Vec::new(),
                error: None,
            }],
            references: Vec::new(),
        };

        let doc = author.draft("Soil", Some("For farmers"), &research).await.unwrap();
        assert_eq!(doc, "# Draft");
        let prompt = &generator.requests()[0].prompt;
        assert!(prompt.contains("Soil"));
        assert!(prompt.contains("For farmers"));
        assert!(prompt.contains("Soils store carbon."));
    }

    #[tokio::test]
    async fn test_revise_sends_feedback_and_document() {
        let generator = Arc::new(ScriptedGenerator::replying("author", "v2"));
        let author = GenerativeAuthor::new(generator.clone());
        let round = Round::new(
            1,
            reviewed(),
            Decision::new(
                Verdict::MajorRevision,
                0.6,
                "Needs work",
                vec!["Add methods".into()],
                DecisionSource::Moderator,
            ),
        );

        assert_eq!(author.revise("v1 text", &round).await.unwrap(), "v2");
        let prompt = &generator.requests()[0].prompt;
        assert!(prompt.contains("Add methods"));
        assert!(prompt.contains("v1 text"));
    }

    #[tokio::test]
    async fn test_revise_includes_author_response() {
        let generator = Arc::new(ScriptedGenerator::replying("author", "v2"));
        let author = GenerativeAuthor::new(generator.clone());
        let round = Round::new(
            1,
            reviewed(),
            Decision::new(Verdict::MinorRevision, 0.7, "Close", vec![], DecisionSource::Moderator),
        )
        .with_author_response(Some("We will add a baseline comparison.".into()));

        author.revise("v1 text", &round).await.unwrap();
        let prompt = &generator.requests()[0].prompt;
        assert!(prompt.contains("We will add a baseline comparison."));
    }

    #[tokio::test]
    async fn test_empty_output_is_an_error() {
        let generator = Arc::new(ScriptedGenerator::replying("author", "   "));
        let author = GenerativeAuthor::new(generator);
        assert!(author.respond("doc", &reviewed()).await.is_err());
    }

    #[tokio::test]
    async fn test_generation_failure_propagates() {
        let generator = Arc::new(ScriptedGenerator::failing(
            "author",
            GenerationError::Permanent("401 unauthorized".into()),
        ));
        let author = GenerativeAuthor::new(generator);
        let err = author.revise("doc", &Round::new(
            1,
            reviewed(),
            Decision::new(Verdict::MinorRevision, 0.5, "x", vec![], DecisionSource::Moderator),
        ))
        .await
        .unwrap_err();
        assert!(err.to_string().contains("Author call to author failed"));
    }
}
