//! Workflow progress reporting.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    Drafting,
    Screening,
    Reviewing,
    Deciding,
    Revising,
    Completed,
    Failed,
}

impl WorkflowPhase {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Drafting => "drafting",
            Self::Screening => "screening",
            Self::Reviewing => "reviewing",
            Self::Deciding => "deciding",
            Self::Revising => "revising",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Receives `(phase, round_number, message)` at every phase transition.
pub trait StatusCallback: Send + Sync {
    fn on_status(&self, phase: WorkflowPhase, round: u32, message: &str);

    /// Called once after the `Completed` notification; per-workflow state
    /// held for progress reporting can be released. Not called on failure.
    fn on_teardown(&self) {}
}

impl<F> StatusCallback for F
where
    F: Fn(WorkflowPhase, u32, &str) + Send + Sync,
{
    fn on_status(&self, phase: WorkflowPhase, round: u32, message: &str) {
        self(phase, round, message)
    }
}

/// Latest known state of one workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStatus {
    pub workflow_id: String,
    pub phase: WorkflowPhase,
    pub round: u32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Shared status table keyed by workflow id.
#[derive(Debug, Clone, Default)]
pub struct StatusStore {
    inner: Arc<RwLock<HashMap<String, WorkflowStatus>>>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<R>(&self, f: impl FnOnce(&mut HashMap<String, WorkflowStatus>) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn begin(&self, workflow_id: &str, phase: WorkflowPhase, round: u32) {
        let now = Utc::now();
        self.with_entries(|entries| {
            entries.insert(
                workflow_id.to_string(),
                WorkflowStatus {
                    workflow_id: workflow_id.to_string(),
                    phase,
                    round,
                    message: format!("Started ({phase})"),
                    error: None,
                    started_at: now,
                    updated_at: now,
                },
            );
        });
    }

    pub fn update(&self, workflow_id: &str, phase: WorkflowPhase, round: u32, message: &str) {
        let now = Utc::now();
        self.with_entries(|entries| {
            let entry = entries
                .entry(workflow_id.to_string())
                .or_insert_with(|| WorkflowStatus {
                    workflow_id: workflow_id.to_string(),
                    phase,
                    round,
                    message: String::new(),
                    error: None,
                    started_at: now,
                    updated_at: now,
                });
            entry.phase = phase;
            entry.round = round;
            entry.message = message.to_string();
            entry.updated_at = now;
        });
    }

    pub fn finish(&self, workflow_id: &str, round: u32, message: &str) {
        self.update(workflow_id, WorkflowPhase::Completed, round, message);
    }

    pub fn fail(&self, workflow_id: &str, round: u32, error: &str) {
        self.update(workflow_id, WorkflowPhase::Failed, round, "Workflow failed");
        self.with_entries(|entries| {
            if let Some(entry) = entries.get_mut(workflow_id) {
                entry.error = Some(error.to_string());
            }
        });
    }

    pub fn get(&self, workflow_id: &str) -> Option<WorkflowStatus> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        guard.get(workflow_id).cloned()
    }

    pub fn remove(&self, workflow_id: &str) -> Option<WorkflowStatus> {
        self.with_entries(|entries| entries.remove(workflow_id))
    }

    /// A callback that records into this store under `workflow_id`.
    pub fn handle(&self, workflow_id: impl Into<String>) -> StatusHandle {
        StatusHandle {
            store: self.clone(),
            workflow_id: workflow_id.into(),
        }
    }
}

/// [`StatusCallback`] bound to one workflow in a [`StatusStore`].
#[derive(Debug, Clone)]
pub struct StatusHandle {
    store: StatusStore,
    workflow_id: String,
}

impl StatusCallback for StatusHandle {
    fn on_status(&self, phase: WorkflowPhase, round: u32, message: &str) {
        match phase {
            WorkflowPhase::Failed => self.store.fail(&self.workflow_id, round, message),
            _ => self.store.update(&self.workflow_id, phase, round, message),
        }
    }

    fn on_teardown(&self) {
        self.store.remove(&self.workflow_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_store_lifecycle() {
        let store = StatusStore::new();
        store.begin("wf", WorkflowPhase::Screening, 0);
        assert_eq!(store.get("wf").unwrap().phase, WorkflowPhase::Screening);

        store.update("wf", WorkflowPhase::Reviewing, 1, "Round 1");
        let status = store.get("wf").unwrap();
        assert_eq!(status.round, 1);
        assert_eq!(status.message, "Round 1");

        store.finish("wf", 1, "Accepted");
        assert!(store.get("wf").unwrap().phase.is_finished());

        assert!(store.remove("wf").is_some());
        assert!(store.get("wf").is_none());
    }

    #[test]
    fn test_fail_records_error() {
        let store = StatusStore::new();
        store.fail("wf", 2, "all reviewers failed");
        let status = store.get("wf").unwrap();
        assert_eq!(status.phase, WorkflowPhase::Failed);
        assert_eq!(status.error.as_deref(), Some("all reviewers failed"));
    }

    #[test]
    fn test_handle_routes_to_store() {
        let store = StatusStore::new();
        let handle = store.handle("wf");
        handle.on_status(WorkflowPhase::Revising, 1, "Revising");
        assert_eq!(store.get("wf").unwrap().phase, WorkflowPhase::Revising);
        handle.on_status(WorkflowPhase::Failed, 1, "boom");
        assert_eq!(store.get("wf").unwrap().error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_handle_teardown_removes_entry() {
        let store = StatusStore::new();
        let handle = store.handle("wf");
        handle.on_status(WorkflowPhase::Completed, 2, "Accepted");
        assert!(store.get("wf").is_some());
        handle.on_teardown();
        assert!(store.get("wf").is_none());
    }

    #[test]
    fn test_closure_is_a_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback = move |phase: WorkflowPhase, round: u32, _msg: &str| {
            sink.lock().unwrap().push((phase, round));
        };
        let callback: &dyn StatusCallback = &callback;
        callback.on_status(WorkflowPhase::Completed, 3, "done");
        assert_eq!(*seen.lock().unwrap(), vec![(WorkflowPhase::Completed, 3)]);
    }
}
