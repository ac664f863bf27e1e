//! End-to-end workflow tests driven by scripted generators.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use common::*;
use referee::citations::Reference;
use referee::decision::{Decision, DecisionSource, Verdict};
use referee::errors::{CheckpointError, DecisionError, GenerationError, ReviewError};
use referee::research::ResearchCoordinator;
use referee::review::{OutlierReport, RoundReviews};
use referee::workflow::{
    Checkpoint, CheckpointStatus, CheckpointStore, RevisionRecord, Round, StatusCallback,
    WorkflowPhase,
};
use referee::{WorkflowError, WorkflowInput, WorkflowOutcome, WorkflowResult};

fn reviewers(scores: &[&[f64]]) -> Vec<ScriptedGenerator> {
    scores
        .iter()
        .enumerate()
        .map(|(i, per_round)| {
            per_round
                .iter()
                .fold(ScriptedGenerator::new(&format!("r{i}")), |g, s| {
                    g.then_ok(review_json(*s))
                })
        })
        .collect()
}

// =========================================
// Single runs
// =========================================

#[tokio::test]
async fn test_fast_path_accept_in_first_round() {
    let harness = Harness::new(
        reviewers(&[&[9.0], &[9.0], &[8.5]]),
        ScriptedGenerator::new("moderator"),
        CountingAuthor::new(complete_document("v2")),
    );
    let machine = harness.machine("fast");

    let result = machine
        .run(WorkflowInput::new("Soil carbon").with_document(complete_document("v1")))
        .await
        .unwrap();

    assert_eq!(result.outcome, WorkflowOutcome::Accepted);
    assert_eq!(result.rounds.len(), 1);
    assert_eq!(result.final_decision.source, DecisionSource::AutoAccept);
    assert_eq!(harness.moderator.calls(), 0);
    assert_eq!(harness.author.responses(), 0);
    assert_eq!(harness.reviewer_calls(), vec![1, 1, 1]);

    assert!(!machine.checkpoints().exists("fast"));
    assert!(machine.artifacts().result_path().exists());
    assert!(machine.artifacts().round_path(1).exists());
    assert!(machine.artifacts().has_document(1));

    assert!(harness.status.get("fast").is_none());
}

#[tokio::test]
async fn test_desk_rejection_skips_review() {
    let harness = Harness::new(
        reviewers(&[&[9.0]]),
        ScriptedGenerator::new("moderator"),
        CountingAuthor::new(complete_document("v2")),
    )
    .with_screener(
        ScriptedGenerator::new("screener")
            .then_ok(r#"{"decision": "DESK_REJECT", "reason": "Off topic"}"#),
    );
    let machine = harness.machine("desk");

    let result = machine
        .run(WorkflowInput::new("Soil").with_document("A cake recipe."))
        .await
        .unwrap();

    assert_eq!(result.outcome, WorkflowOutcome::DeskRejected);
    assert_eq!(result.final_decision.verdict, Verdict::DeskReject);
    assert!(result.rounds.is_empty());
    assert_eq!(harness.reviewer_calls(), vec![0]);
    assert!(!machine.checkpoints().exists("desk"));
}

#[tokio::test]
async fn test_failed_screening_call_passes_document() {
    let harness = Harness::new(
        reviewers(&[&[9.0]]),
        ScriptedGenerator::new("moderator"),
        CountingAuthor::new(complete_document("v2")),
    )
    .with_screener(
        ScriptedGenerator::new("screener").then_err(GenerationError::Transient("overloaded".into())),
    );

    let result = harness
        .machine("open")
        .run(WorkflowInput::new("Soil").with_document(complete_document("v1")))
        .await
        .unwrap();
    assert_eq!(result.outcome, WorkflowOutcome::Accepted);
    assert!(result.screening.unwrap().passed);
}

#[tokio::test]
async fn test_revision_then_accept() {
    let harness = Harness::new(
        reviewers(&[&[5.0, 9.0], &[6.0, 9.0]]),
        ScriptedGenerator::new("moderator").then_ok(decision_json("MAJOR_REVISION")),
        CountingAuthor::new(complete_document("Revised")),
    );
    let machine = harness.machine("revise");

    let result = machine
        .run(WorkflowInput::new("Soil").with_document(incomplete_document()))
        .await
        .unwrap();

    assert_eq!(result.outcome, WorkflowOutcome::Accepted);
    assert_eq!(result.rounds.len(), 2);
    assert_eq!(result.document_version, 2);
    assert!(result.document.starts_with("# Revised"));
    assert_eq!(harness.author.revise_calls(), 1);
    assert_eq!(harness.moderator.calls(), 1);

    let first = &result.rounds[0];
    assert_eq!(first.decision.verdict, Verdict::MajorRevision);
    assert_eq!(first.author_response.as_deref(), Some("We thank the reviewers."));
    let diff = first.diff.as_ref().unwrap();
    assert!(diff.added_lines > 0);
    assert!(result.rounds[1].author_response.is_none());

    assert!(machine.artifacts().has_document(2));
    let stored = machine.artifacts().read_round(1).unwrap().unwrap();
    assert!(stored.diff.is_some());
}

#[tokio::test]
async fn test_author_response_reaches_reviser_and_next_round() {
    let harness = Harness::new(
        reviewers(&[&[5.0, 9.0]]),
        ScriptedGenerator::new("moderator").then_ok(decision_json("MAJOR_REVISION")),
        CountingAuthor::new(complete_document("Revised")),
    );

    harness
        .machine("answered")
        .run(WorkflowInput::new("Soil").with_document(incomplete_document()))
        .await
        .unwrap();

    let inputs = harness.author.revision_inputs.lock().unwrap().clone();
    assert_eq!(inputs.len(), 1);
    assert!(inputs[0].contains("### Author response\nWe thank the reviewers."));

    let prompts = harness.reviewers[0].prompts();
    assert_eq!(prompts.len(), 2);
    assert!(!prompts[0].contains("We thank the reviewers."));
    assert!(prompts[1].contains("We thank the reviewers."));
}

#[derive(Default)]
struct PhaseLog {
    phases: std::sync::Mutex<Vec<WorkflowPhase>>,
    teardowns: std::sync::atomic::AtomicUsize,
}

impl StatusCallback for PhaseLog {
    fn on_status(&self, phase: WorkflowPhase, _round: u32, _message: &str) {
        self.phases.lock().unwrap().push(phase);
    }

    fn on_teardown(&self) {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_status_is_torn_down_after_completion_only() {
    let harness = Harness::new(
        reviewers(&[&[9.0]]),
        ScriptedGenerator::new("moderator"),
        CountingAuthor::new(incomplete_document()),
    );
    let log = Arc::new(PhaseLog::default());
    let machine = harness
        .builder("observed")
        .with_status(log.clone())
        .build()
        .unwrap();

    machine
        .run(WorkflowInput::new("Soil").with_document(complete_document("v1")))
        .await
        .unwrap();
    assert_eq!(log.phases.lock().unwrap().last(), Some(&WorkflowPhase::Completed));
    assert_eq!(log.teardowns.load(Ordering::SeqCst), 1);

    let failing = Harness::new(
        vec![ScriptedGenerator::new("down").then_err(GenerationError::Transient("503".into()))],
        ScriptedGenerator::new("moderator"),
        CountingAuthor::new(incomplete_document()),
    );
    let log = Arc::new(PhaseLog::default());
    let machine = failing
        .builder("observed")
        .with_status(log.clone())
        .build()
        .unwrap();
    machine
        .run(WorkflowInput::new("Soil").with_document(complete_document("v1")))
        .await
        .unwrap_err();
    assert_eq!(log.teardowns.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_final_round_reject_exhausts_rounds() {
    let harness = Harness::new(
        reviewers(&[&[4.0]]),
        ScriptedGenerator::new("moderator")
            .then_ok(decision_json("MINOR_REVISION"))
            .then_ok(decision_json("REJECT")),
        CountingAuthor::new(incomplete_document()),
    )
    .with_max_rounds(2);

    let result = harness
        .machine("exhausted")
        .run(WorkflowInput::new("Soil").with_document(incomplete_document()))
        .await
        .unwrap();

    assert_eq!(result.outcome, WorkflowOutcome::MaxRoundsExhausted);
    assert_eq!(result.rounds.len(), 2);
    assert_eq!(result.final_decision.verdict, Verdict::Reject);
}

#[tokio::test]
async fn test_early_reject_is_rejected() {
    let harness = Harness::new(
        reviewers(&[&[2.0]]),
        ScriptedGenerator::new("moderator").then_ok(decision_json("REJECT")),
        CountingAuthor::new(incomplete_document()),
    );

    let result = harness
        .machine("early")
        .run(WorkflowInput::new("Soil").with_document(incomplete_document()))
        .await
        .unwrap();
    assert_eq!(result.outcome, WorkflowOutcome::Rejected);
    assert_eq!(harness.author.revise_calls(), 0);
}

#[tokio::test]
async fn test_revision_in_final_round_is_fatal() {
    let harness = Harness::new(
        reviewers(&[&[5.0]]),
        ScriptedGenerator::new("moderator").then_ok(decision_json("MAJOR_REVISION")),
        CountingAuthor::new(incomplete_document()),
    )
    .with_max_rounds(1);
    let machine = harness.machine("final");

    let err = machine
        .run(WorkflowInput::new("Soil").with_document(incomplete_document()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Decision(DecisionError::VerdictNotAllowed { round: 1, .. })
    ));
    assert!(machine.checkpoints().exists("final"));
}

#[tokio::test]
async fn test_unparseable_decision_is_fatal() {
    let harness = Harness::new(
        reviewers(&[&[5.0]]),
        ScriptedGenerator::new("moderator").then_ok("I cannot decide."),
        CountingAuthor::new(incomplete_document()),
    );
    let err = harness
        .machine("garbled")
        .run(WorkflowInput::new("Soil").with_document(incomplete_document()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Decision(DecisionError::Unparseable { .. })
    ));
}

#[tokio::test]
async fn test_partial_reviewer_failure_is_tolerated() {
    let failing = ScriptedGenerator::new("down")
        .then_err(GenerationError::Permanent("403 forbidden".into()));
    let mut generators = reviewers(&[&[9.0], &[9.0]]);
    generators.push(failing);
    let harness = Harness::new(
        generators,
        ScriptedGenerator::new("moderator"),
        CountingAuthor::new(incomplete_document()),
    );

    let result = harness
        .machine("partial")
        .run(WorkflowInput::new("Soil").with_document(complete_document("v1")))
        .await
        .unwrap();

    let reviews = &result.rounds[0].reviews;
    assert_eq!(reviews.len(), 3);
    assert!(reviews[2].on_leave);
    assert!(reviews[2].error.as_deref().unwrap().contains("403"));
    assert!((result.rounds[0].overall_average - 9.0).abs() < 1e-9);
    assert_eq!(result.outcome, WorkflowOutcome::Accepted);
}

#[tokio::test]
async fn test_all_reviewers_failing_is_fatal_and_keeps_checkpoint() {
    let down = || {
        ScriptedGenerator::new("down").then_err(GenerationError::Transient("503".into()))
    };
    let harness = Harness::new(
        vec![down(), down()],
        ScriptedGenerator::new("moderator"),
        CountingAuthor::new(incomplete_document()),
    );
    let machine = harness.machine("outage");

    let err = machine
        .run(WorkflowInput::new("Soil").with_document(incomplete_document()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Review(ReviewError::AllReviewersFailed { count: 2, .. })
    ));

    let checkpoint = machine.checkpoints().load("outage").unwrap().unwrap();
    assert_eq!(checkpoint.current_round, 1);
    assert!(checkpoint.rounds.is_empty());
    assert!(checkpoint.screening.is_some());

    let status = harness.status.get("outage").unwrap();
    assert_eq!(status.phase, WorkflowPhase::Failed);
    assert!(status.error.unwrap().contains("reviewers"));
}

#[tokio::test]
async fn test_draft_from_research_when_no_document() {
    let co_author: Arc<dyn referee::generation::TextGenerator> =
        Arc::new(ScriptedGenerator::new("co").then_ok("Notes on carbon."));
    let harness = Harness::new(
        reviewers(&[&[9.0]]),
        ScriptedGenerator::new("moderator"),
        CountingAuthor::new(incomplete_document()),
    );
    let machine = harness
        .builder("drafted")
        .with_research(ResearchCoordinator::new(vec![co_author]))
        .build()
        .unwrap();

    let result = machine
        .run(WorkflowInput::new("Soil").with_subtopics(vec!["carbon".into(), "water".into()]))
        .await
        .unwrap();

    assert_eq!(harness.author.drafts(), 1);
    assert_eq!(harness.author.research_briefs.load(Ordering::SeqCst), 2);
    assert_eq!(result.outcome, WorkflowOutcome::Accepted);
    assert_eq!(
        machine.artifacts().read_document(1).unwrap().unwrap(),
        complete_document("Draft")
    );
}

#[tokio::test]
async fn test_revision_drops_unverified_citations() {
    let revised = "# Revised\n\nClaims [1] and [2].\n\n## Conclusion\n\nDone.\n\n## References\n\n\
                   [1] Doe, A. (2019). A fabricated study. Journal of Nothing.\n\
                   [2] Smith, J. (2020). Soil carbon dynamics. Nature.\n";
    let harness = Harness::new(
        reviewers(&[&[5.0, 9.0]]),
        ScriptedGenerator::new("moderator").then_ok(decision_json("MINOR_REVISION")),
        CountingAuthor::new(revised),
    );
    let machine = harness.machine("cites");

    let result = machine
        .run(
            WorkflowInput::new("Soil")
                .with_document(incomplete_document())
                .with_trusted_references(vec![Reference::new("s", "Soil carbon dynamics")]),
        )
        .await
        .unwrap();

    assert!(!result.document.contains("fabricated"));
    assert!(result.document.contains("[1] Smith, J."));
    assert!(result.document.contains("Claims and [1]."));
}

// =========================================
// Resume
// =========================================

#[tokio::test]
async fn test_resume_mid_revision_runs_one_revision_then_next_review() {
    let harness = Harness::new(
        reviewers(&[&[5.0, 9.0], &[5.0, 9.0]]),
        ScriptedGenerator::new("moderator").then_ok(decision_json("MAJOR_REVISION")),
        CountingAuthor::new(complete_document("Revised")).failing_first(1),
    );

    let err = harness
        .machine("crash")
        .run(WorkflowInput::new("Soil").with_document(incomplete_document()))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Revision { round: 1, .. }));
    assert_eq!(harness.reviewer_calls(), vec![1, 1]);

    let checkpoint = CheckpointStore::new(harness.dir.path())
        .load("crash")
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.rounds.len(), 1);
    assert_eq!(checkpoint.document_version, 1);

    let result = harness.machine("crash").resume().await.unwrap();

    assert_eq!(harness.author.revise_calls(), 2);
    assert_eq!(harness.reviewer_calls(), vec![2, 2]);
    assert_eq!(harness.moderator.calls(), 1);
    assert_eq!(result.outcome, WorkflowOutcome::Accepted);
    assert_eq!(result.rounds.len(), 2);
    assert_eq!(result.rounds[1].document_version, 2);
}

#[tokio::test]
async fn test_resume_reuses_revised_document_on_disk() {
    let harness = Harness::new(
        reviewers(&[&[9.0]]),
        ScriptedGenerator::new("moderator"),
        CountingAuthor::new(incomplete_document()),
    );
    let machine = harness.machine("ondisk");

    let mut checkpoint = minor_revision_checkpoint("ondisk");
    checkpoint.revision = Some(RevisionRecord::of(2, &complete_document("Already revised")));
    machine.checkpoints().save(&mut checkpoint).unwrap();
    machine
        .artifacts()
        .write_document(2, &complete_document("Already revised"))
        .unwrap();

    let result = machine.resume().await.unwrap();

    assert_eq!(harness.author.revise_calls(), 0);
    assert_eq!(harness.reviewer_calls(), vec![1]);
    assert_eq!(result.outcome, WorkflowOutcome::Accepted);
    assert!(result.document.starts_with("# Already revised"));
    assert!(result.rounds[0].diff.is_some());
}

#[tokio::test]
async fn test_resume_ignores_unrecorded_revision_file() {
    let harness = Harness::new(
        reviewers(&[&[9.0]]),
        ScriptedGenerator::new("moderator"),
        CountingAuthor::new(complete_document("Freshly revised")),
    );
    let machine = harness.machine("stray");

    let mut checkpoint = minor_revision_checkpoint("stray");
    machine.checkpoints().save(&mut checkpoint).unwrap();
    machine
        .artifacts()
        .write_document(2, &complete_document("Stray file"))
        .unwrap();

    let result = machine.resume().await.unwrap();

    assert_eq!(harness.author.revise_calls(), 1);
    assert!(result.document.starts_with("# Freshly revised"));
    assert_eq!(
        machine.artifacts().read_document(2).unwrap().unwrap(),
        complete_document("Freshly revised")
    );
}

#[tokio::test]
async fn test_rerun_with_same_id_does_not_reuse_previous_revision() {
    let harness = Harness::new(
        reviewers(&[&[5.0, 9.0, 5.0, 9.0]]),
        ScriptedGenerator::new("moderator").then_ok(decision_json("MAJOR_REVISION")),
        CountingAuthor::new(complete_document("Revised")),
    );

    let first = harness
        .machine("again")
        .run(WorkflowInput::new("Soil").with_document(incomplete_document()))
        .await
        .unwrap();
    assert_eq!(first.document_version, 2);
    assert_eq!(harness.author.revise_calls(), 1);

    let machine = harness.machine("again");
    let second = machine
        .run(WorkflowInput::new("Groundwater").with_document("# Groundwater\n\nNotes.\n"))
        .await
        .unwrap();

    assert_eq!(harness.author.revise_calls(), 2);
    assert_eq!(second.topic, "Groundwater");
    assert_eq!(second.rounds.len(), 2);
    assert_eq!(
        machine.artifacts().read_document(1).unwrap().unwrap(),
        "# Groundwater\n\nNotes.\n"
    );
    let inputs = harness.author.revision_inputs.lock().unwrap().clone();
    assert_eq!(inputs.len(), 2);
}

fn minor_revision_checkpoint(id: &str) -> Checkpoint {
    let mut checkpoint = Checkpoint::new(id, "Soil", 3, 8.0);
    checkpoint.document = incomplete_document();
    checkpoint.document_version = 1;
    checkpoint.screening = Some(referee::decision::ScreeningOutcome::pass("ok"));
    checkpoint.rounds.push(Round::new(
        1,
        RoundReviews {
            round_number: 1,
            reviews: Vec::new(),
            overall_average: 5.0,
            outliers: OutlierReport::default(),
        },
        Decision::new(
            Verdict::MinorRevision,
            0.7,
            "Small fixes",
            vec!["Add a conclusion".into()],
            DecisionSource::Moderator,
        ),
    ));
    checkpoint
}

#[tokio::test]
async fn test_resume_of_accepted_checkpoint_only_finalizes() {
    let harness = Harness::new(
        vec![ScriptedGenerator::new("r").then_err(GenerationError::Permanent("unused".into()))],
        ScriptedGenerator::new("moderator"),
        CountingAuthor::new(incomplete_document()),
    );
    let machine = harness.machine("done");

    let mut checkpoint = Checkpoint::new("done", "Soil", 3, 8.0);
    checkpoint.document = complete_document("Final");
    checkpoint.document_version = 1;
    checkpoint.status = CheckpointStatus::Finalizing;
    checkpoint.rounds.push(Round::new(
        1,
        RoundReviews {
            round_number: 1,
            reviews: Vec::new(),
            overall_average: 9.0,
            outliers: OutlierReport::default(),
        },
        Decision::auto_accept(9.0, 8.0),
    ));
    machine.checkpoints().save(&mut checkpoint).unwrap();

    let result = machine.resume().await.unwrap();
    assert_eq!(result.outcome, WorkflowOutcome::Accepted);
    assert_eq!(harness.reviewer_calls(), vec![0]);
    assert_eq!(harness.moderator.calls(), 0);
    assert_eq!(harness.screener.calls(), 0);
    assert_eq!(harness.author.revise_calls(), 0);
    assert!(!machine.checkpoints().exists("done"));

    let again: WorkflowResult = machine.resume().await.unwrap();
    assert_eq!(again.outcome, WorkflowOutcome::Accepted);
    assert_eq!(again.document, result.document);
}

#[tokio::test]
async fn test_resume_uses_saved_reviews() {
    let harness = Harness::new(
        reviewers(&[&[9.0]]),
        ScriptedGenerator::new("moderator").then_ok(decision_json("ACCEPT")),
        CountingAuthor::new(incomplete_document()),
    );
    let machine = harness.machine("pending");

    let mut checkpoint = Checkpoint::new("pending", "Soil", 3, 8.0);
    checkpoint.document = incomplete_document();
    checkpoint.document_version = 1;
    checkpoint.screening = Some(referee::decision::ScreeningOutcome::pass("ok"));
    checkpoint.pending_review = Some(RoundReviews {
        round_number: 1,
        reviews: Vec::new(),
        overall_average: 7.0,
        outliers: OutlierReport::default(),
    });
    machine.checkpoints().save(&mut checkpoint).unwrap();

    let result = machine.resume().await.unwrap();
    assert_eq!(harness.reviewer_calls(), vec![0]);
    assert_eq!(harness.moderator.calls(), 1);
    assert_eq!(result.outcome, WorkflowOutcome::Accepted);
}

#[tokio::test]
async fn test_resume_without_checkpoint_or_result() {
    let harness = Harness::new(
        reviewers(&[&[9.0]]),
        ScriptedGenerator::new("moderator"),
        CountingAuthor::new(incomplete_document()),
    );
    let err = harness.machine("ghost").resume().await.unwrap_err();
    assert!(matches!(err, WorkflowError::NoCheckpoint { .. }));
}

#[tokio::test]
async fn test_locked_workflow_is_refused() {
    let harness = Harness::new(
        reviewers(&[&[9.0]]),
        ScriptedGenerator::new("moderator"),
        CountingAuthor::new(incomplete_document()),
    );
    let machine = harness.machine("busy");
    let _held = machine.checkpoints().lock("busy").unwrap();

    let err = machine
        .run(WorkflowInput::new("Soil").with_document(complete_document("v1")))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Checkpoint(CheckpointError::Locked { .. })
    ));
    assert_eq!(harness.reviewer_calls(), vec![0]);
}
