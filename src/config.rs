//! Configuration loaded from `referee.toml`.
//!
//! Every field has a default, so an empty or missing file is valid.
//! Environment variables (after `.env` is loaded) override the file.
//!
//! # Configuration File Format
//!
//! ```toml
//! [workflow]
//! max_rounds = 3
//! threshold = 8.0
//! state_dir = ".referee"
//! desk_screening = true
//! speculative_response = true
//!
//! [review]
//! outlier_deviation = 1.5
//!
//! [[review.reviewers]]
//! id = "methods"
//! role = "methodologist"
//! provider = "default"
//!
//! [decision]
//! good_score = 6.0
//! stagnation_delta = 0.5
//!
//! [parser]
//! aggressive_window = 2000
//!
//! [generation]
//! command = "claude"
//! timeout_secs = 300
//!
//! [generation.retry]
//! max_attempts = 3
//!
//! [roles]
//! author = "default"
//! moderator = "default"
//!
//! [references]
//! requests_per_window = 10
//! window_secs = 1
//!
//! [logging]
//! json = false
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::citations::GuardSettings;
use crate::decision::DecisionSettings;
use crate::generation::{
    CommandGenerator, ContinuationSettings, FallbackGenerator, GeneratorRegistry, RetryPolicy,
    RetryingGenerator, TextGenerator,
};
use crate::logging::LoggingConfig;
use crate::parser::{DEFAULT_AGGRESSIVE_WINDOW, StructuredOutputParser};
use crate::review::{ReviewRoundCoordinator, ReviewerProfile};
use crate::workflow::WorkflowSettings;

pub const CONFIG_FILE: &str = "referee.toml";

/// Provider registered by [`RefereeConfig::command_registry`].
pub const DEFAULT_PROVIDER: &str = "default";

fn default_provider() -> String {
    DEFAULT_PROVIDER.to_string()
}

fn default_outlier_deviation() -> f64 {
    1.5
}

fn default_review_temperature() -> f32 {
    0.3
}

fn default_review_max_tokens() -> u32 {
    8192
}

/// The `[review]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// How far below the group mean a reviewer must be to be flagged.
    #[serde(default = "default_outlier_deviation")]
    pub outlier_deviation: f64,
    #[serde(default = "default_review_temperature")]
    pub temperature: f32,
    #[serde(default = "default_review_max_tokens")]
    pub max_output_tokens: u32,
    #[serde(default)]
    pub reviewers: Vec<ReviewerProfile>,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            outlier_deviation: default_outlier_deviation(),
            temperature: default_review_temperature(),
            max_output_tokens: default_review_max_tokens(),
            reviewers: Vec::new(),
        }
    }
}

fn default_aggressive_window() -> usize {
    DEFAULT_AGGRESSIVE_WINDOW
}

/// The `[parser]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParserConfig {
    #[serde(default = "default_aggressive_window")]
    pub aggressive_window: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            aggressive_window: default_aggressive_window(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_continuation_limit() -> u32 {
    2
}

fn default_continuation_overlap() -> usize {
    200
}

fn default_command() -> String {
    "claude".to_string()
}

fn default_args() -> Vec<String> {
    vec!["--print".to_string()]
}

/// The `[generation]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Bounded wait per call.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_continuation_limit")]
    pub continuation_limit: u32,
    #[serde(default = "default_continuation_overlap")]
    pub continuation_overlap: usize,
    /// Command that reads a prompt on stdin and prints the completion.
    #[serde(default = "default_command")]
    pub command: String,
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// Command used when the primary times out or fails transiently.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_command: Option<String>,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            continuation_limit: default_continuation_limit(),
            continuation_overlap: default_continuation_overlap(),
            command: default_command(),
            args: default_args(),
            fallback_command: None,
            retry: RetryPolicy::default(),
        }
    }
}

/// The `[roles]` section: which provider backs each non-reviewer
/// collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolesConfig {
    #[serde(default = "default_provider")]
    pub author: String,
    #[serde(default = "default_provider")]
    pub moderator: String,
    #[serde(default = "default_provider")]
    pub screener: String,
    #[serde(default)]
    pub co_authors: Vec<String>,
}

impl Default for RolesConfig {
    fn default() -> Self {
        Self {
            author: default_provider(),
            moderator: default_provider(),
            screener: default_provider(),
            co_authors: Vec::new(),
        }
    }
}

/// Root of `referee.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefereeConfig {
    #[serde(default)]
    pub workflow: WorkflowSettings,
    #[serde(default)]
    pub review: ReviewConfig,
    #[serde(default)]
    pub decision: DecisionSettings,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub roles: RolesConfig,
    #[serde(default)]
    pub references: GuardSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RefereeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse referee.toml")
    }

    /// Load `referee.toml` from `dir`, or defaults if it does not exist.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// [`load_or_default`](Self::load_or_default), then `.env` and
    /// environment overrides.
    pub fn load_with_env(dir: &Path) -> Result<Self> {
        let mut config = Self::load_or_default(dir)?;
        let _ = dotenvy::dotenv();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize referee.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `REFEREE_*` overrides from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup("REFEREE_MAX_ROUNDS") {
            self.workflow.max_rounds = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid REFEREE_MAX_ROUNDS '{value}'"))?;
        }
        if let Some(value) = lookup("REFEREE_THRESHOLD") {
            self.workflow.threshold = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid REFEREE_THRESHOLD '{value}'"))?;
        }
        if let Some(value) = lookup("REFEREE_STATE_DIR") {
            self.workflow.state_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("REFEREE_GENERATOR_CMD") {
            self.generation.command = value;
        }
        Ok(())
    }

    /// Human-readable problems that do not prevent loading.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !(1.0..=10.0).contains(&self.workflow.threshold) {
            warnings.push(format!(
                "workflow.threshold {} is outside the 1-10 score range",
                self.workflow.threshold
            ));
        }
        if self.workflow.max_rounds == 0 {
            warnings.push("workflow.max_rounds is 0, no review round can run".to_string());
        }
        if self.review.reviewers.is_empty() {
            warnings.push("No reviewers configured under [[review.reviewers]]".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        for reviewer in &self.review.reviewers {
            if !seen.insert(reviewer.id.as_str()) {
                warnings.push(format!("Duplicate reviewer id '{}'", reviewer.id));
            }
        }
        if self.generation.retry.max_attempts == 0 {
            warnings.push("generation.retry.max_attempts is 0, calls will never be made".to_string());
        }
        warnings
    }

    pub fn continuation(&self) -> ContinuationSettings {
        ContinuationSettings {
            limit: self.generation.continuation_limit,
            overlap: self.generation.continuation_overlap,
        }
    }

    /// Parser with this config's window, writing failures into `failure_dir`.
    pub fn parser(&self, failure_dir: Option<PathBuf>) -> StructuredOutputParser {
        let parser =
            StructuredOutputParser::new().with_aggressive_window(self.parser.aggressive_window);
        match failure_dir {
            Some(dir) => parser.with_failure_dir(dir),
            None => parser,
        }
    }

    pub fn coordinator(&self, parser: StructuredOutputParser) -> ReviewRoundCoordinator {
        ReviewRoundCoordinator::new(parser)
            .with_outlier_deviation(self.review.outlier_deviation)
            .with_continuation(self.continuation())
    }

    /// A registry with one command-backed provider, [`DEFAULT_PROVIDER`],
    /// wrapped in the configured timeout, fallback and retry policy.
    pub fn command_registry(&self) -> GeneratorRegistry {
        let primary: Arc<dyn TextGenerator> = Arc::new(
            CommandGenerator::new(DEFAULT_PROVIDER, &self.generation.command)
                .with_args(self.generation.args.clone()),
        );
        let mut bounded =
            FallbackGenerator::new(primary, Duration::from_secs(self.generation.timeout_secs));
        if let Some(fallback) = &self.generation.fallback_command {
            bounded = bounded.with_fallback(Arc::new(
                CommandGenerator::new(format!("{DEFAULT_PROVIDER}-fallback"), fallback)
                    .with_args(self.generation.args.clone()),
            ));
        }
        let retrying = RetryingGenerator::new(Arc::new(bounded), self.generation.retry.clone());
        GeneratorRegistry::new().with(DEFAULT_PROVIDER, Arc::new(retrying))
    }
}
