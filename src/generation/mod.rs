//! Generative-text collaborators.
//!
//! Everything that produces text from a prompt implements [`TextGenerator`].
//! Behaviour that applies to any generator is layered on as a wrapper:
//!
//! - [`RetryingGenerator`] - exponential backoff, never retrying permanent failures
//! - [`FallbackGenerator`] - bounded wait, then one attempt on a fallback
//! - [`generate_with_continuation`] - resend "continue" prompts on truncation
//!
//! [`CommandGenerator`] is the one concrete binding shipped here: it runs a
//! command with the prompt on stdin and reads the completion from stdout.

mod command;
mod continuation;
mod fallback;
mod retry;

pub use command::CommandGenerator;
pub use continuation::{ContinuationSettings, generate_with_continuation};
pub use fallback::FallbackGenerator;
pub use retry::{RetryPolicy, RetryingGenerator};

use crate::errors::GenerationError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// One generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            temperature: 0.7,
            max_output_tokens: 8192,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    /// Same settings, different prompt.
    pub fn with_prompt(&self, prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..self.clone()
        }
    }
}

/// Why a generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    #[default]
    Normal,
    /// The output limit was reached before the model finished.
    Truncated,
}

/// Result of a generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub content: String,
    pub stop_reason: StopReason,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Generation {
    pub fn complete(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            stop_reason: StopReason::Normal,
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    pub fn truncated(content: impl Into<String>) -> Self {
        Self {
            stop_reason: StopReason::Truncated,
            ..Self::complete(content)
        }
    }

    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.input_tokens = input_tokens;
        self.output_tokens = output_tokens;
        self
    }

    pub fn is_truncated(&self) -> bool {
        self.stop_reason == StopReason::Truncated
    }
}

/// A generative-text collaborator.
///
/// Real implementation: [`CommandGenerator`]. Tests drive the workflow with
/// scripted in-memory implementations.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Short name used in logs and error messages.
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenerationError>;
}

/// Generators by provider name, used to bind reviewer descriptors.
#[derive(Default, Clone)]
pub struct GeneratorRegistry {
    generators: HashMap<String, Arc<dyn TextGenerator>>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: impl Into<String>, generator: Arc<dyn TextGenerator>) -> Self {
        self.register(provider, generator);
        self
    }

    pub fn register(&mut self, provider: impl Into<String>, generator: Arc<dyn TextGenerator>) {
        self.generators.insert(provider.into(), generator);
    }

    pub fn get(&self, provider: &str) -> Option<Arc<dyn TextGenerator>> {
        self.generators.get(provider).cloned()
    }

    pub fn providers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.generators.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for GeneratorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}

/// Rough token estimate for providers that do not report usage.
pub(crate) fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}
