//! The workflow state machine.
//!
//! ```text
//! INIT -> DESK_SCREEN -> DESK_REJECTED
//!                     -> REVIEW_ROUND(n) -> DECISION(n) -> ACCEPTED
//!                                                       -> REJECTED | MAX_ROUNDS_EXHAUSTED
//!                                                       -> REVISION(n) -> REVIEW_ROUND(n+1)
//! ```
//!
//! The checkpoint is saved after desk screening, after each round's reviews,
//! after each decision (before the reviser runs) and after each revision.
//! A terminal decision moves the checkpoint to `finalizing`; finalization
//! writes `result.json` and deletes the checkpoint.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::artifacts::ArtifactStore;
use super::author::{Author, GenerativeAuthor};
use super::round::{DiffSummary, Round};
use super::state::{Checkpoint, CheckpointStatus, CheckpointStore, RevisionRecord};
use super::status::{StatusCallback, WorkflowPhase};
use crate::citations::{CitationIntegrityFilter, GuardedReferenceSource, Reference, ReferenceSource};
use crate::config::RefereeConfig;
use crate::decision::{
    Decision, DecisionEngine, DecisionInput, DeskScreener, ScreeningOutcome, Verdict,
    check_completeness,
};
use crate::errors::WorkflowError;
use crate::generation::{GeneratorRegistry, TextGenerator};
use crate::research::{ResearchCoordinator, ResearchOutcome};
use crate::review::{ReviewContext, ReviewRoundCoordinator, Reviewer, RoundReviews, bind_reviewers};

fn default_max_rounds() -> u32 {
    3
}

fn default_threshold() -> f64 {
    8.0
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".referee")
}

fn default_true() -> bool {
    true
}

/// The `[workflow]` configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSettings {
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    /// Acceptance threshold on the 1-10 overall average.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Checkpoints, locks and per-workflow artifacts live here.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_true")]
    pub desk_screening: bool,
    /// Draft the author response while the decision call is in flight.
    #[serde(default = "default_true")]
    pub speculative_response: bool,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            threshold: default_threshold(),
            state_dir: default_state_dir(),
            desk_screening: true,
            speculative_response: true,
        }
    }
}

/// What a new workflow starts from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowInput {
    pub topic: String,
    pub context: Option<String>,
    /// Skips research and drafting when present.
    pub initial_document: Option<String>,
    /// Research sub-topics for drafting.
    pub subtopics: Vec<String>,
    /// References the citation filter accepts.
    pub trusted_references: Vec<Reference>,
}

impl WorkflowInput {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_document(mut self, document: impl Into<String>) -> Self {
        self.initial_document = Some(document.into());
        self
    }

    pub fn with_subtopics(mut self, subtopics: Vec<String>) -> Self {
        self.subtopics = subtopics;
        self
    }

    pub fn with_trusted_references(mut self, references: Vec<Reference>) -> Self {
        self.trusted_references = references;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowOutcome {
    Accepted,
    Rejected,
    DeskRejected,
    /// Rejected in the final round.
    MaxRoundsExhausted,
}

impl fmt::Display for WorkflowOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted => write!(f, "accepted"),
            Self::Rejected => write!(f, "rejected"),
            Self::DeskRejected => write!(f, "desk rejected"),
            Self::MaxRoundsExhausted => write!(f, "max rounds exhausted"),
        }
    }
}

/// Final record of a workflow, stored as `result.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub workflow_id: String,
    pub topic: String,
    pub outcome: WorkflowOutcome,
    pub final_decision: Decision,
    pub document: String,
    pub document_version: u32,
    pub rounds: Vec<Round>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screening: Option<ScreeningOutcome>,
    pub completed_at: DateTime<Utc>,
}

impl WorkflowResult {
    fn from_checkpoint(checkpoint: Checkpoint) -> Result<Self, WorkflowError> {
        let (outcome, final_decision) = match (&checkpoint.screening, checkpoint.rounds.last()) {
            (Some(screening), _) if !screening.passed => (
                WorkflowOutcome::DeskRejected,
                Decision::desk_reject(screening.reason.clone()),
            ),
            (_, Some(round)) => {
                let outcome = match round.decision.verdict {
                    Verdict::Accept => WorkflowOutcome::Accepted,
                    Verdict::DeskReject => WorkflowOutcome::DeskRejected,
                    Verdict::Reject if round.number < checkpoint.max_rounds => {
                        WorkflowOutcome::Rejected
                    }
                    _ => WorkflowOutcome::MaxRoundsExhausted,
                };
                (outcome, round.decision.clone())
            }
            (_, None) => {
                return Err(WorkflowError::Other(anyhow::anyhow!(
                    "Workflow {} has no decision to finalize",
                    checkpoint.workflow_id
                )));
            }
        };

        Ok(Self {
            workflow_id: checkpoint.workflow_id,
            topic: checkpoint.topic,
            outcome,
            final_decision,
            document: checkpoint.document,
            document_version: checkpoint.document_version,
            rounds: checkpoint.rounds,
            screening: checkpoint.screening,
            completed_at: Utc::now(),
        })
    }
}

/// Assembles a [`WorkflowStateMachine`].
pub struct WorkflowBuilder {
    workflow_id: String,
    settings: WorkflowSettings,
    reviewers: Vec<Reviewer>,
    coordinator: ReviewRoundCoordinator,
    review_generation: (f32, u32),
    decision: Option<DecisionEngine>,
    screener: Option<DeskScreener>,
    author: Option<Arc<dyn Author>>,
    research: Option<ResearchCoordinator>,
    status: Option<Arc<dyn StatusCallback>>,
}

impl WorkflowBuilder {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            settings: WorkflowSettings::default(),
            reviewers: Vec::new(),
            coordinator: ReviewRoundCoordinator::default(),
            review_generation: (0.3, 8192),
            decision: None,
            screener: None,
            author: None,
            research: None,
            status: None,
        }
    }

    pub fn with_settings(mut self, settings: WorkflowSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_reviewers(mut self, reviewers: Vec<Reviewer>) -> Self {
        self.reviewers = reviewers;
        self
    }

    pub fn with_coordinator(mut self, coordinator: ReviewRoundCoordinator) -> Self {
        self.coordinator = coordinator;
        self
    }

    /// Temperature and output budget for reviewer calls.
    pub fn with_review_generation(mut self, temperature: f32, max_output_tokens: u32) -> Self {
        self.review_generation = (temperature, max_output_tokens);
        self
    }

    pub fn with_decision_engine(mut self, engine: DecisionEngine) -> Self {
        self.decision = Some(engine);
        self
    }

    pub fn with_screener(mut self, screener: DeskScreener) -> Self {
        self.screener = Some(screener);
        self
    }

    pub fn with_author(mut self, author: Arc<dyn Author>) -> Self {
        self.author = Some(author);
        self
    }

    pub fn with_research(mut self, research: ResearchCoordinator) -> Self {
        self.research = Some(research);
        self
    }

    pub fn with_status(mut self, status: Arc<dyn StatusCallback>) -> Self {
        self.status = Some(status);
        self
    }

    /// Wire every collaborator from configuration, resolving providers in
    /// `registry`. Reference lookups for research go through
    /// `reference_source` behind the configured rate limit and cache.
    pub fn from_config(
        workflow_id: impl Into<String>,
        config: &RefereeConfig,
        registry: &GeneratorRegistry,
        reference_source: Option<Arc<dyn ReferenceSource>>,
    ) -> Result<Self, WorkflowError> {
        let workflow_id = workflow_id.into();
        let artifacts = ArtifactStore::new(&config.workflow.state_dir, &workflow_id);
        let parser = config.parser(Some(artifacts.parse_failures_dir()));
        let bind = |role: &str, provider: &str| -> Result<Arc<dyn TextGenerator>, WorkflowError> {
            registry
                .get(provider)
                .ok_or_else(|| WorkflowError::UnboundProvider {
                    reviewer: role.to_string(),
                    provider: provider.to_string(),
                })
        };

        let reviewers = bind_reviewers(&config.review.reviewers, registry)?;
        let moderator = bind("moderator", &config.roles.moderator)?;
        let author = GenerativeAuthor::new(bind("author", &config.roles.author)?)
            .with_continuation(config.continuation());

        let mut builder = Self::new(workflow_id)
            .with_settings(config.workflow.clone())
            .with_reviewers(reviewers)
            .with_coordinator(config.coordinator(parser.clone()))
            .with_review_generation(config.review.temperature, config.review.max_output_tokens)
            .with_decision_engine(
                DecisionEngine::new(moderator, parser.clone())
                    .with_settings(config.decision.clone()),
            )
            .with_author(Arc::new(author));

        if config.workflow.desk_screening {
            let screener = bind("screener", &config.roles.screener)?;
            builder = builder.with_screener(DeskScreener::new(screener, parser));
        }

        if !config.roles.co_authors.is_empty() {
            let co_authors = config
                .roles
                .co_authors
                .iter()
                .map(|provider| bind("co-author", provider))
                .collect::<Result<Vec<_>, _>>()?;
            let mut research = ResearchCoordinator::new(co_authors);
            if let Some(source) = reference_source {
                research = research.with_reference_source(Arc::new(GuardedReferenceSource::new(
                    source,
                    &config.references,
                )));
            }
            builder = builder.with_research(research);
        }

        Ok(builder)
    }

    pub fn build(self) -> Result<WorkflowStateMachine, WorkflowError> {
        let decision = self
            .decision
            .ok_or_else(|| anyhow::anyhow!("A decision engine is required"))?;
        let author = self
            .author
            .ok_or_else(|| anyhow::anyhow!("An author is required"))?;
        if self.reviewers.is_empty() {
            return Err(anyhow::anyhow!("At least one reviewer is required").into());
        }
        if self.settings.max_rounds == 0 {
            return Err(anyhow::anyhow!("max_rounds must be at least 1").into());
        }

        Ok(WorkflowStateMachine {
            checkpoints: CheckpointStore::new(&self.settings.state_dir),
            artifacts: ArtifactStore::new(&self.settings.state_dir, &self.workflow_id),
            workflow_id: self.workflow_id,
            settings: self.settings,
            reviewers: self.reviewers,
            coordinator: self.coordinator,
            review_generation: self.review_generation,
            decision,
            screener: self.screener,
            author,
            research: self.research,
            status: self.status,
        })
    }
}

/// Sequences screening, review rounds and revisions for one workflow.
pub struct WorkflowStateMachine {
    workflow_id: String,
    settings: WorkflowSettings,
    checkpoints: CheckpointStore,
    artifacts: ArtifactStore,
    reviewers: Vec<Reviewer>,
    coordinator: ReviewRoundCoordinator,
    review_generation: (f32, u32),
    decision: DecisionEngine,
    screener: Option<DeskScreener>,
    author: Arc<dyn Author>,
    research: Option<ResearchCoordinator>,
    status: Option<Arc<dyn StatusCallback>>,
}

impl WorkflowStateMachine {
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    fn notify(&self, phase: WorkflowPhase, round: u32, message: &str) {
        if let Some(status) = &self.status {
            status.on_status(phase, round, message);
        }
    }

    /// Start a new workflow. An existing checkpoint for this id is resumed
    /// instead of being overwritten; artifacts of an earlier finished run
    /// under the same id are removed first.
    pub async fn run(&self, input: WorkflowInput) -> Result<WorkflowResult, WorkflowError> {
        let _lock = self.checkpoints.lock(&self.workflow_id)?;

        if let Some(checkpoint) = self.checkpoints.load(&self.workflow_id)? {
            warn!(
                workflow = %self.workflow_id,
                round = checkpoint.current_round,
                "Checkpoint already exists, resuming it"
            );
            return self.execute_reporting(checkpoint).await;
        }

        info!(workflow = %self.workflow_id, topic = %input.topic, "Starting workflow");
        let checkpoint = match self.start(input).await {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                self.notify(WorkflowPhase::Failed, 0, &e.to_string());
                return Err(e);
            }
        };
        self.execute_reporting(checkpoint).await
    }

    /// Continue from the last checkpoint. A finished workflow returns its
    /// stored result.
    pub async fn resume(&self) -> Result<WorkflowResult, WorkflowError> {
        let _lock = self.checkpoints.lock(&self.workflow_id)?;

        match self.checkpoints.load(&self.workflow_id)? {
            Some(checkpoint) => {
                info!(
                    workflow = %self.workflow_id,
                    round = checkpoint.current_round,
                    rounds_done = checkpoint.rounds.len(),
                    status = ?checkpoint.status,
                    "Resuming workflow"
                );
                self.execute_reporting(checkpoint).await
            }
            None => match self.artifacts.read_result::<WorkflowResult>()? {
                Some(result) => {
                    info!(workflow = %self.workflow_id, "Workflow already finished");
                    Ok(result)
                }
                None => Err(WorkflowError::NoCheckpoint {
                    workflow_id: self.workflow_id.clone(),
                }),
            },
        }
    }

    async fn execute_reporting(
        &self,
        checkpoint: Checkpoint,
    ) -> Result<WorkflowResult, WorkflowError> {
        let round = checkpoint.current_round;
        match self.execute(checkpoint).await {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!(workflow = %self.workflow_id, error = %e, "Workflow failed, checkpoint kept");
                self.notify(WorkflowPhase::Failed, round, &e.to_string());
                Err(e)
            }
        }
    }

    /// Draft if needed and write the first checkpoint.
    async fn start(&self, input: WorkflowInput) -> Result<Checkpoint, WorkflowError> {
        let mut checkpoint = Checkpoint::new(
            &self.workflow_id,
            &input.topic,
            self.settings.max_rounds,
            self.settings.threshold,
        );
        checkpoint.context = input.context.clone();
        checkpoint.trusted_references = input.trusted_references.clone();

        if self.artifacts.clear()? {
            warn!(
                workflow = %self.workflow_id,
                dir = %self.artifacts.dir().display(),
                "Removed artifacts of a previous run"
            );
        }

        let document = match input.initial_document {
            Some(document) => document,
            None => {
                self.notify(WorkflowPhase::Drafting, 0, "Drafting initial document");
                let research = match &self.research {
                    Some(research) => research.research(&input.topic, &input.subtopics).await,
                    None => ResearchOutcome::default(),
                };
                for reference in &research.references {
                    if !checkpoint
                        .trusted_references
                        .iter()
                        .any(|r| r.dedup_key() == reference.dedup_key())
                    {
                        checkpoint.trusted_references.push(reference.clone());
                    }
                }
                self.author
                    .draft(&input.topic, input.context.as_deref(), &research)
                    .await
                    .map_err(WorkflowError::Draft)?
            }
        };

        self.artifacts.write_document(1, &document)?;
        checkpoint.document = document;
        checkpoint.document_version = 1;
        self.checkpoints.save(&mut checkpoint)?;
        Ok(checkpoint)
    }

    async fn execute(&self, mut checkpoint: Checkpoint) -> Result<WorkflowResult, WorkflowError> {
        if checkpoint.status == CheckpointStatus::Finalizing {
            return self.finalize(checkpoint);
        }

        if checkpoint.screening.is_none()
            && checkpoint.rounds.is_empty()
            && let Some(outcome) = self.screen(&checkpoint).await
        {
            let rejected = !outcome.passed;
            checkpoint.screening = Some(outcome);
            if rejected {
                checkpoint.status = CheckpointStatus::Finalizing;
                self.checkpoints.save(&mut checkpoint)?;
                return self.finalize(checkpoint);
            }
            self.checkpoints.save(&mut checkpoint)?;
        }

        loop {
            if checkpoint.revision_pending() {
                self.revise(&mut checkpoint).await?;
                continue;
            }

            let round_number = checkpoint.current_round;
            let reviewed = match &checkpoint.pending_review {
                Some(pending) if pending.round_number == round_number => {
                    debug!(round = round_number, "Using saved reviews");
                    pending.clone()
                }
                _ => {
                    let reviewed = self.review(&checkpoint).await?;
                    checkpoint.pending_review = Some(reviewed.clone());
                    self.checkpoints.save(&mut checkpoint)?;
                    reviewed
                }
            };

            self.notify(WorkflowPhase::Deciding, round_number, "Deciding");
            let (decision, response) = self.decide(&checkpoint, &reviewed).await?;
            info!(
                workflow = %self.workflow_id,
                round = round_number,
                verdict = %decision.verdict,
                confidence = decision.confidence,
                source = %decision.source,
                "Round decided"
            );

            let round = Round::new(checkpoint.document_version, reviewed, decision)
                .with_author_response(response);
            self.artifacts.write_round(&round)?;
            let terminal = round.decision.verdict.is_terminal();
            checkpoint.rounds.push(round);
            checkpoint.pending_review = None;

            if terminal {
                checkpoint.status = CheckpointStatus::Finalizing;
                self.checkpoints.save(&mut checkpoint)?;
                return self.finalize(checkpoint);
            }
            self.checkpoints.save(&mut checkpoint)?;
        }
    }

    async fn screen(&self, checkpoint: &Checkpoint) -> Option<ScreeningOutcome> {
        if !self.settings.desk_screening {
            return None;
        }
        let screener = self.screener.as_ref()?;
        self.notify(WorkflowPhase::Screening, 0, "Desk screening");
        let outcome = screener.screen(&checkpoint.topic, &checkpoint.document).await;
        if !outcome.passed {
            info!(workflow = %self.workflow_id, reason = %outcome.reason, "Desk rejected");
        }
        Some(outcome)
    }

    async fn review(&self, checkpoint: &Checkpoint) -> Result<RoundReviews, WorkflowError> {
        let round_number = checkpoint.current_round;
        self.notify(
            WorkflowPhase::Reviewing,
            round_number,
            &format!("Review round {round_number} of {}", checkpoint.max_rounds),
        );

        let (temperature, max_output_tokens) = self.review_generation;
        let mut context = ReviewContext::new(&checkpoint.topic, round_number)
            .with_context(checkpoint.context.clone())
            .with_generation(temperature, max_output_tokens);
        if let Some(previous) = checkpoint.last_round() {
            context = context.with_previous_feedback(previous.feedback_digest());
        }

        let reviewed = self
            .coordinator
            .run_round(&checkpoint.document, round_number, &self.reviewers, &context)
            .await?;
        Ok(reviewed)
    }

    /// The round's decision, plus the author response drafted alongside it
    /// unless the decision was to accept.
    async fn decide(
        &self,
        checkpoint: &Checkpoint,
        reviewed: &RoundReviews,
    ) -> Result<(Decision, Option<String>), WorkflowError> {
        let issues = check_completeness(&checkpoint.document);
        let input = DecisionInput {
            topic: &checkpoint.topic,
            document: &checkpoint.document,
            reviews: &reviewed.reviews,
            round_number: checkpoint.current_round,
            max_rounds: checkpoint.max_rounds,
            history: &checkpoint.rounds,
            completeness_issues: &issues,
            outliers: &reviewed.outliers,
            threshold: checkpoint.threshold,
        };

        if let Some(decision) = DecisionEngine::fast_path(&input) {
            return Ok((decision, None));
        }

        if !self.settings.speculative_response {
            return Ok((self.decision.decide(&input).await?, None));
        }

        let (decision, response) = tokio::join!(
            self.decision.decide(&input),
            self.author.respond(&checkpoint.document, reviewed)
        );
        let decision = decision?;
        let response = match response {
            _ if decision.verdict == Verdict::Accept => None,
            Ok(text) => Some(text),
            Err(e) => {
                warn!(round = checkpoint.current_round, error = %e, "Author response failed");
                None
            }
        };
        Ok((decision, response))
    }

    /// Produce the next document version for the last round, then advance to
    /// the next round. A revision file is reused only when the checkpoint
    /// records writing it with the same content.
    async fn revise(&self, checkpoint: &mut Checkpoint) -> Result<(), WorkflowError> {
        let round_number = checkpoint.current_round;
        let next_version = checkpoint.document_version + 1;

        let recorded = match &checkpoint.revision {
            Some(record) if record.version == next_version => self
                .artifacts
                .read_document(next_version)?
                .filter(|text| record.matches(next_version, text)),
            _ => None,
        };

        let revised = match recorded {
            Some(existing) => {
                info!(
                    round = round_number,
                    version = next_version,
                    "Revised document already written, skipping revision"
                );
                existing
            }
            None => {
                if self.artifacts.has_document(next_version) {
                    warn!(
                        round = round_number,
                        version = next_version,
                        "Ignoring revised document not recorded in the checkpoint"
                    );
                }
                let Some(round) = checkpoint.last_round() else {
                    return Err(anyhow::anyhow!("No round to revise").into());
                };
                self.notify(
                    WorkflowPhase::Revising,
                    round_number,
                    &format!("Revising after {}", round.decision.verdict),
                );
                let text = self
                    .author
                    .revise(&checkpoint.document, round)
                    .await
                    .map_err(|source| WorkflowError::Revision {
                        round: round_number,
                        source,
                    })?;

                let report =
                    CitationIntegrityFilter::new(&checkpoint.trusted_references).apply(&text);
                if report.changed() {
                    info!(
                        round = round_number,
                        removed = ?report.removed,
                        "Removed unverifiable citations"
                    );
                }
                checkpoint.revision = Some(RevisionRecord::of(next_version, &report.document));
                self.checkpoints.save(checkpoint)?;
                self.artifacts.write_document(next_version, &report.document)?;
                report.document
            }
        };

        let diff = DiffSummary::compute(&checkpoint.document, &revised);
        debug!(round = round_number, diff = %diff, "Revision diff");
        if let Some(round) = checkpoint.rounds.last_mut() {
            round.diff = Some(diff);
            self.artifacts.write_round(round)?;
        }

        checkpoint.document = revised;
        checkpoint.document_version = next_version;
        checkpoint.current_round += 1;
        checkpoint.revision = None;
        self.checkpoints.save(checkpoint)?;
        Ok(())
    }

    fn finalize(&self, checkpoint: Checkpoint) -> Result<WorkflowResult, WorkflowError> {
        let round = checkpoint.current_round;
        let result = WorkflowResult::from_checkpoint(checkpoint)?;
        self.artifacts.write_result(&result)?;
        self.checkpoints.delete(&self.workflow_id)?;
        info!(
            workflow = %self.workflow_id,
            outcome = %result.outcome,
            rounds = result.rounds.len(),
            "Workflow finished"
        );
        self.notify(
            WorkflowPhase::Completed,
            round,
            &format!("Workflow {}", result.outcome),
        );
        if let Some(status) = &self.status {
            status.on_teardown();
        }
        Ok(result)
    }
}
