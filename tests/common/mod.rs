//! Shared fixtures for workflow integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tempfile::TempDir;

use referee::decision::{DecisionEngine, DeskScreener};
use referee::errors::GenerationError;
use referee::generation::{Generation, GenerationRequest, TextGenerator};
use referee::parser::StructuredOutputParser;
use referee::research::ResearchOutcome;
use referee::review::{Reviewer, ReviewerProfile, ReviewerRole, RoundReviews};
use referee::workflow::{
    Author, Round, StatusStore, WorkflowBuilder, WorkflowSettings, WorkflowStateMachine,
};

// =========================================
// Scripted generator
// =========================================

/// Replays queued replies in order and repeats the last one when drained.
pub struct ScriptedGenerator {
    name: String,
    script: Mutex<VecDeque<Result<String, GenerationError>>>,
    last: Mutex<Option<Result<String, GenerationError>>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            last: Mutex::new(None),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn then_ok(self, content: impl Into<String>) -> Self {
        self.script.lock().unwrap().push_back(Ok(content.into()));
        self
    }

    pub fn then_err(self, error: GenerationError) -> Self {
        self.script.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.clone());
        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        let result = match next {
            Some(result) => {
                *last = Some(result.clone());
                result
            }
            None => last
                .clone()
                .unwrap_or_else(|| Err(GenerationError::Permanent("script is empty".into()))),
        };
        result.map(Generation::complete)
    }
}

// =========================================
// Counting author
// =========================================

/// Author double that counts every call.
pub struct CountingAuthor {
    pub draft_text: String,
    pub revision_text: String,
    /// Revisions that fail before one succeeds.
    pub failing_revisions: AtomicUsize,
    pub drafts: AtomicUsize,
    pub revise_calls: AtomicUsize,
    pub responses: AtomicUsize,
    pub research_briefs: AtomicUsize,
    /// Feedback digest of every round handed to `revise`.
    pub revision_inputs: Mutex<Vec<String>>,
}

impl CountingAuthor {
    pub fn new(revision_text: impl Into<String>) -> Self {
        Self {
            draft_text: complete_document("Draft"),
            revision_text: revision_text.into(),
            failing_revisions: AtomicUsize::new(0),
            drafts: AtomicUsize::new(0),
            revise_calls: AtomicUsize::new(0),
            responses: AtomicUsize::new(0),
            research_briefs: AtomicUsize::new(0),
            revision_inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_first(self, count: usize) -> Self {
        self.failing_revisions.store(count, Ordering::SeqCst);
        self
    }

    pub fn revise_calls(&self) -> usize {
        self.revise_calls.load(Ordering::SeqCst)
    }

    pub fn responses(&self) -> usize {
        self.responses.load(Ordering::SeqCst)
    }

    pub fn drafts(&self) -> usize {
        self.drafts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Author for CountingAuthor {
    async fn draft(
        &self,
        _topic: &str,
        _context: Option<&str>,
        research: &ResearchOutcome,
    ) -> anyhow::Result<String> {
        self.drafts.fetch_add(1, Ordering::SeqCst);
        self.research_briefs
            .store(research.successful().count(), Ordering::SeqCst);
        Ok(self.draft_text.clone())
    }

    async fn revise(&self, _document: &str, round: &Round) -> anyhow::Result<String> {
        self.revise_calls.fetch_add(1, Ordering::SeqCst);
        self.revision_inputs
            .lock()
            .unwrap()
            .push(round.feedback_digest());
        let remaining = self.failing_revisions.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_revisions.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("author process killed");
        }
        Ok(self.revision_text.clone())
    }

    async fn respond(&self, _document: &str, _reviews: &RoundReviews) -> anyhow::Result<String> {
        self.responses.fetch_add(1, Ordering::SeqCst);
        Ok("We thank the reviewers.".to_string())
    }
}

// =========================================
// Fixtures
// =========================================

pub fn review_json(score: f64) -> String {
    format!(
        r#"{{"scores": {{"accuracy": {score}, "completeness": {score}, "clarity": {score},
            "novelty": {score}, "rigor": {score}, "citations": {score}}},
            "summary": "Scored {score}", "weaknesses": ["Needs depth"], "suggestions": ["Expand"]}}"#
    )
}

pub fn decision_json(verdict: &str) -> String {
    format!(
        r#"{{"verdict": "{verdict}", "confidence": 0.8, "rationale": "Per reviews",
            "required_changes": ["Strengthen the methods section"]}}"#
    )
}

/// A document with a conclusion and a references section.
pub fn complete_document(title: &str) -> String {
    format!(
        "# {title}\n\nBody text about soil carbon [1].\n\n## Conclusion\n\nIt matters.\n\n\
         ## References\n\n[1] Smith, J. (2020). Soil carbon dynamics. Nature.\n"
    )
}

/// A document without a concluding section, so the fast path never applies.
pub fn incomplete_document() -> String {
    "# Early draft\n\nSome notes.\n".to_string()
}

// =========================================
// Harness
// =========================================

pub struct Harness {
    pub dir: TempDir,
    pub reviewers: Vec<Arc<ScriptedGenerator>>,
    pub moderator: Arc<ScriptedGenerator>,
    pub screener: Arc<ScriptedGenerator>,
    pub author: Arc<CountingAuthor>,
    pub status: StatusStore,
    pub settings: WorkflowSettings,
}

impl Harness {
    pub fn new(
        reviewers: Vec<ScriptedGenerator>,
        moderator: ScriptedGenerator,
        author: CountingAuthor,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let settings = WorkflowSettings {
            max_rounds: 3,
            threshold: 8.0,
            state_dir: dir.path().to_path_buf(),
            desk_screening: true,
            speculative_response: true,
        };
        Self {
            dir,
            reviewers: reviewers.into_iter().map(Arc::new).collect(),
            moderator: Arc::new(moderator),
            screener: Arc::new(
                ScriptedGenerator::new("screener")
                    .then_ok(r#"{"decision": "PASS", "reason": "On topic"}"#),
            ),
            author: Arc::new(author),
            status: StatusStore::new(),
            settings,
        }
    }

    pub fn with_screener(mut self, screener: ScriptedGenerator) -> Self {
        self.screener = Arc::new(screener);
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.settings.max_rounds = max_rounds;
        self
    }

    pub fn builder(&self, workflow_id: &str) -> WorkflowBuilder {
        let reviewers = self
            .reviewers
            .iter()
            .enumerate()
            .map(|(i, generator)| {
                Reviewer::new(
                    ReviewerProfile::new(
                        format!("reviewer-{}", i + 1),
                        ReviewerRole::all()[i % 4],
                        "scripted",
                    ),
                    generator.clone(),
                )
            })
            .collect();
        let moderator: Arc<dyn TextGenerator> = self.moderator.clone();
        let screener: Arc<dyn TextGenerator> = self.screener.clone();
        let author: Arc<dyn Author> = self.author.clone();

        WorkflowBuilder::new(workflow_id)
            .with_settings(self.settings.clone())
            .with_reviewers(reviewers)
            .with_decision_engine(DecisionEngine::new(moderator, StructuredOutputParser::new()))
            .with_screener(DeskScreener::new(screener, StructuredOutputParser::new()))
            .with_author(author)
            .with_status(Arc::new(self.status.handle(workflow_id)))
    }

    pub fn machine(&self, workflow_id: &str) -> WorkflowStateMachine {
        self.builder(workflow_id).build().unwrap()
    }

    pub fn reviewer_calls(&self) -> Vec<usize> {
        self.reviewers.iter().map(|r| r.calls()).collect()
    }
}
