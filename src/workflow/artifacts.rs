use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::round::Round;
use crate::errors::WorkflowError;

/// Per-workflow output files under `<state_dir>/<workflow_id>/`.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> WorkflowError + '_ {
    move |source| WorkflowError::Artifact {
        path: path.to_path_buf(),
        source,
    }
}

impl ArtifactStore {
    pub fn new(state_dir: &Path, workflow_id: &str) -> Self {
        Self {
            dir: state_dir.join(workflow_id),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn round_path(&self, round: u32) -> PathBuf {
        self.dir.join(format!("round_{round}.json"))
    }

    pub fn document_path(&self, version: u32) -> PathBuf {
        self.dir.join(format!("document_v{version}.md"))
    }

    pub fn result_path(&self) -> PathBuf {
        self.dir.join("result.json")
    }

    pub fn parse_failures_dir(&self) -> PathBuf {
        self.dir.join("parse_failures")
    }

    /// Remove everything a previous run left behind. Returns whether there
    /// was anything to remove.
    pub fn clear(&self) -> Result<bool, WorkflowError> {
        if !self.dir.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&self.dir).map_err(io_err(&self.dir))?;
        Ok(true)
    }

    fn write(&self, path: &Path, content: &str) -> Result<(), WorkflowError> {
        fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;
        fs::write(path, content).map_err(io_err(path))
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), WorkflowError> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| WorkflowError::Other(anyhow::Error::new(e)))?;
        self.write(path, &json)
    }

    fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, WorkflowError> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path).map_err(io_err(path))?;
        let value = serde_json::from_str(&content).map_err(|e| {
            WorkflowError::Other(anyhow::anyhow!("Invalid artifact {}: {e}", path.display()))
        })?;
        Ok(Some(value))
    }

    pub fn write_round(&self, round: &Round) -> Result<(), WorkflowError> {
        self.write_json(&self.round_path(round.number), round)
    }

    pub fn read_round(&self, number: u32) -> Result<Option<Round>, WorkflowError> {
        self.read_json(&self.round_path(number))
    }

    pub fn has_document(&self, version: u32) -> bool {
        self.document_path(version).exists()
    }

    pub fn write_document(&self, version: u32, document: &str) -> Result<(), WorkflowError> {
        self.write(&self.document_path(version), document)
    }

    pub fn read_document(&self, version: u32) -> Result<Option<String>, WorkflowError> {
        let path = self.document_path(version);
        if !path.exists() {
            return Ok(None);
        }
        fs::read_to_string(&path).map(Some).map_err(io_err(&path))
    }

    pub fn write_result<T: Serialize>(&self, result: &T) -> Result<(), WorkflowError> {
        self.write_json(&self.result_path(), result)
    }

    pub fn read_result<T: DeserializeOwned>(&self) -> Result<Option<T>, WorkflowError> {
        self.read_json(&self.result_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_layout() {
        let store = ArtifactStore::new(Path::new("/state"), "wf");
        assert_eq!(store.round_path(2), PathBuf::from("/state/wf/round_2.json"));
        assert_eq!(store.document_path(3), PathBuf::from("/state/wf/document_v3.md"));
        assert_eq!(store.parse_failures_dir(), PathBuf::from("/state/wf/parse_failures"));
    }

    #[test]
    fn test_document_roundtrip() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), "wf");
        assert!(!store.has_document(1));
        assert!(store.read_document(1).unwrap().is_none());

        store.write_document(1, "# Draft").unwrap();
        assert!(store.has_document(1));
        assert_eq!(store.read_document(1).unwrap().as_deref(), Some("# Draft"));
    }

    #[test]
    fn test_clear_removes_previous_run() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), "wf");
        assert!(!store.clear().unwrap());

        store.write_document(2, "# Old revision").unwrap();
        store.write_result(&serde_json::json!({"outcome": "accepted"})).unwrap();
        assert!(store.clear().unwrap());
        assert!(!store.has_document(2));
        assert!(!store.result_path().exists());
    }

    #[test]
    fn test_result_roundtrip() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), "wf");
        assert!(store.read_result::<serde_json::Value>().unwrap().is_none());
        store.write_result(&serde_json::json!({"outcome": "accepted"})).unwrap();
        let value: serde_json::Value = store.read_result().unwrap().unwrap();
        assert_eq!(value["outcome"], "accepted");
    }
}
