use super::{Generation, GenerationRequest, TextGenerator, estimate_tokens};
use crate::errors::GenerationError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Runs an external command per generation: the prompt is written to stdin
/// and the completion read from stdout.
///
/// The default arguments suit the `claude` CLI (`--print`), but any command
/// that reads a prompt on stdin works.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    name: String,
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandGenerator {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: vec!["--print".to_string()],
            working_dir: None,
        }
    }

    /// Replace the default argument list.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn stdin_payload(request: &GenerationRequest) -> String {
        match &request.system {
            Some(system) => format!("{system}\n\n{}", request.prompt),
            None => request.prompt.clone(),
        }
    }
}

#[async_trait]
impl TextGenerator for CommandGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenerationError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            GenerationError::classify(format!("failed to spawn {}: {e}", self.program))
        })?;

        let payload = Self::stdin_payload(request);
        if let Some(mut stdin) = child.stdin.take() {
            let written = match stdin.write_all(payload.as_bytes()).await {
                Ok(()) => stdin.shutdown().await,
                Err(e) => Err(e),
            };
            // A process that exits without reading stdin is judged by its exit status.
            match written {
                Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => {
                    return Err(GenerationError::Transient(format!(
                        "failed to write prompt: {e}"
                    )));
                }
                _ => {}
            }
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| GenerationError::Transient(format!("failed to wait for process: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(GenerationError::Process {
                exit_code: output.status.code().unwrap_or(-1),
                message: stderr,
            });
        }

        let content = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(
            generator = %self.name,
            chars = content.len(),
            "Command generation finished"
        );

        Ok(Generation::complete(content.clone())
            .with_usage(estimate_tokens(&payload), estimate_tokens(&content)))
    }
}
