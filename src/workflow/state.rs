//! Checkpoint persistence.
//!
//! One JSON record per workflow, fully rewritten on every save through a
//! temporary file and a rename. A run holds an exclusive lock file for the
//! workflow so only one writer exists.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::round::Round;
use crate::citations::Reference;
use crate::decision::ScreeningOutcome;
use crate::errors::CheckpointError;
use crate::review::RoundReviews;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    InProgress,
    /// The last round's decision was terminal; only finalization remains.
    Finalizing,
}

/// A revised document this workflow wrote, identified by version and
/// content hash. Only a file matching the record is reused on resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionRecord {
    pub version: u32,
    pub sha256: String,
}

impl RevisionRecord {
    pub fn of(version: u32, document: &str) -> Self {
        Self {
            version,
            sha256: format!("{:x}", Sha256::digest(document.as_bytes())),
        }
    }

    pub fn matches(&self, version: u32, document: &str) -> bool {
        *self == Self::of(version, document)
    }
}

/// Resumable state of one workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub workflow_id: String,
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Round to run next, or the round whose revision is pending.
    pub current_round: u32,
    pub max_rounds: u32,
    pub threshold: f64,
    /// Current document snapshot.
    pub document: String,
    pub document_version: u32,
    #[serde(default)]
    pub rounds: Vec<Round>,
    /// Reviews of `current_round` that have not been decided yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_review: Option<RoundReviews>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screening: Option<ScreeningOutcome>,
    #[serde(default)]
    pub trusted_references: Vec<Reference>,
    /// Revision written for the pending round but not yet applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<RevisionRecord>,
    pub status: CheckpointStatus,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(
        workflow_id: impl Into<String>,
        topic: impl Into<String>,
        max_rounds: u32,
        threshold: f64,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            topic: topic.into(),
            context: None,
            current_round: 1,
            max_rounds,
            threshold,
            document: String::new(),
            document_version: 0,
            rounds: Vec::new(),
            pending_review: None,
            screening: None,
            trusted_references: Vec::new(),
            revision: None,
            status: CheckpointStatus::InProgress,
            updated_at: Utc::now(),
        }
    }

    pub fn last_round(&self) -> Option<&Round> {
        self.rounds.last()
    }

    pub fn has_document(&self) -> bool {
        self.document_version > 0
    }

    /// The last round asked for a revision that has not been applied yet.
    pub fn revision_pending(&self) -> bool {
        self.last_round().is_some_and(|round| {
            round.decision.verdict.requires_revision()
                && round.number == self.current_round
                && round.document_version == self.document_version
        })
    }
}

/// Reads and writes checkpoints under a state directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

/// Exclusive hold on a workflow. Released on drop.
#[derive(Debug)]
pub struct WorkflowLock {
    file: File,
    path: PathBuf,
}

impl Drop for WorkflowLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!(path = %self.path.display(), "Released workflow lock");
    }
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, workflow_id: &str) -> PathBuf {
        self.dir.join(format!("{workflow_id}.checkpoint.json"))
    }

    fn lock_path(&self, workflow_id: &str) -> PathBuf {
        self.dir.join(format!("{workflow_id}.lock"))
    }

    fn ensure_dir(&self) -> Result<(), CheckpointError> {
        fs::create_dir_all(&self.dir).map_err(|source| CheckpointError::Write {
            path: self.dir.clone(),
            source,
        })
    }

    /// Take the single-writer lock, failing if another holder exists.
    pub fn lock(&self, workflow_id: &str) -> Result<WorkflowLock, CheckpointError> {
        self.ensure_dir()?;
        let path = self.lock_path(workflow_id);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|source| CheckpointError::Write {
                path: path.clone(),
                source,
            })?;
        file.try_lock_exclusive()
            .map_err(|_| CheckpointError::Locked {
                workflow_id: workflow_id.to_string(),
            })?;
        debug!(path = %path.display(), "Acquired workflow lock");
        Ok(WorkflowLock { file, path })
    }

    /// Atomically replace the stored checkpoint.
    pub fn save(&self, checkpoint: &mut Checkpoint) -> Result<(), CheckpointError> {
        self.ensure_dir()?;
        checkpoint.updated_at = Utc::now();
        let json =
            serde_json::to_string_pretty(checkpoint).map_err(CheckpointError::Serialize)?;

        let path = self.path_for(&checkpoint.workflow_id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|source| CheckpointError::Write {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| CheckpointError::Write {
            path: path.clone(),
            source,
        })?;
        debug!(
            workflow = %checkpoint.workflow_id,
            round = checkpoint.current_round,
            status = ?checkpoint.status,
            "Checkpoint saved"
        );
        Ok(())
    }

    pub fn load(&self, workflow_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let path = self.path_for(workflow_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|source| CheckpointError::Read {
            path: path.clone(),
            source,
        })?;
        let checkpoint = serde_json::from_str(&content)
            .map_err(|source| CheckpointError::Corrupt { path, source })?;
        Ok(Some(checkpoint))
    }

    pub fn exists(&self, workflow_id: &str) -> bool {
        self.path_for(workflow_id).exists()
    }

    pub fn delete(&self, workflow_id: &str) -> Result<(), CheckpointError> {
        let path = self.path_for(workflow_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CheckpointError::Write { path, source }),
        }
    }
}
