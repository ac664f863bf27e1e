//! Reviewer descriptors.
//!
//! A reviewer is a typed descriptor ([`ReviewerProfile`]: identity, role,
//! provider binding, focus) paired with the generator it was bound to.
//!
//! ## Example
//!
//! ```
//! use referee::review::{ReviewerProfile, ReviewerRole};
//!
//! let profile = ReviewerProfile::new("r1", ReviewerRole::Methodologist, "claude")
//!     .with_focus(vec!["statistical power".to_string()]);
//! assert_eq!(profile.role.display_name(), "Methodologist");
//! assert_eq!(profile.focus_areas(), vec!["statistical power"]);
//! ```

use crate::errors::WorkflowError;
use crate::generation::{GeneratorRegistry, TextGenerator};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

/// The kind of critique a reviewer provides.
///
/// ## Deserialization
///
/// Accepts snake_case names (`"domain_expert"`), hyphenated names
/// (`"domain-expert"`) and short aliases (`"expert"`, `"methods"`,
/// `"skeptic"`, `"editor"`).
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReviewerRole {
    /// Subject-matter accuracy and depth.
    #[default]
    DomainExpert,
    /// Methodology, evidence and reasoning.
    Methodologist,
    /// Adversarial reading: weakest claims, missing counter-arguments.
    Skeptic,
    /// Structure, clarity and presentation.
    Editor,
}

impl ReviewerRole {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::DomainExpert => "Domain Expert",
            Self::Methodologist => "Methodologist",
            Self::Skeptic => "Skeptic",
            Self::Editor => "Editor",
        }
    }

    /// Lowercase, hyphenated identifier.
    pub fn slug(&self) -> &'static str {
        match self {
            Self::DomainExpert => "domain-expert",
            Self::Methodologist => "methodologist",
            Self::Skeptic => "skeptic",
            Self::Editor => "editor",
        }
    }

    /// Default focus areas, used when a profile does not set its own.
    pub fn focus_areas(&self) -> Vec<&'static str> {
        match self {
            Self::DomainExpert => vec![
                "Factual accuracy of claims",
                "Coverage of the relevant literature",
                "Depth of domain insight",
                "Correct use of terminology",
            ],
            Self::Methodologist => vec![
                "Soundness of the method",
                "Whether evidence supports the conclusions",
                "Reproducibility of the approach",
                "Threats to validity",
            ],
            Self::Skeptic => vec![
                "Weakest or overstated claims",
                "Missing counter-arguments",
                "Unstated assumptions",
                "Alternative explanations",
            ],
            Self::Editor => vec![
                "Logical structure and flow",
                "Clarity of prose",
                "Consistency of citations and formatting",
                "Redundant or missing sections",
            ],
        }
    }

    pub fn all() -> [Self; 4] {
        [
            Self::DomainExpert,
            Self::Methodologist,
            Self::Skeptic,
            Self::Editor,
        ]
    }
}

impl std::fmt::Display for ReviewerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for ReviewerRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "domain_expert" | "expert" | "domain" => Ok(Self::DomainExpert),
            "methodologist" | "methods" | "methodology" => Ok(Self::Methodologist),
            "skeptic" | "sceptic" | "devils_advocate" => Ok(Self::Skeptic),
            "editor" | "editorial" => Ok(Self::Editor),
            _ => Err(format!(
                "unknown reviewer role '{s}' (expected domain_expert, methodologist, skeptic or editor)"
            )),
        }
    }
}

/// All string forms are routed through `FromStr` so every alias is accepted.
impl<'de> Deserialize<'de> for ReviewerRole {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::{self, Visitor};

        struct RoleVisitor;

        impl Visitor<'_> for RoleVisitor {
            type Value = ReviewerRole;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str(r#"a reviewer role string (e.g. "methodologist", "domain-expert")"#)
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<ReviewerRole, E> {
                ReviewerRole::from_str(value).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_str(RoleVisitor)
    }
}

/// Reviewer descriptor as configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewerProfile {
    /// Stable identity; reviews are aggregated by this.
    pub id: String,
    #[serde(default)]
    pub role: ReviewerRole,
    /// Name of the generator this reviewer is bound to.
    pub provider: String,
    /// Overrides the role's default focus areas when non-empty.
    #[serde(default)]
    pub focus: Vec<String>,
}

impl ReviewerProfile {
    pub fn new(id: impl Into<String>, role: ReviewerRole, provider: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            provider: provider.into(),
            focus: Vec::new(),
        }
    }

    pub fn with_focus(mut self, focus: Vec<String>) -> Self {
        self.focus = focus;
        self
    }

    pub fn focus_areas(&self) -> Vec<String> {
        if self.focus.is_empty() {
            self.role.focus_areas().into_iter().map(String::from).collect()
        } else {
            self.focus.clone()
        }
    }
}

/// A profile bound to its generator.
#[derive(Clone)]
pub struct Reviewer {
    profile: ReviewerProfile,
    generator: Arc<dyn TextGenerator>,
}

impl Reviewer {
    pub fn new(profile: ReviewerProfile, generator: Arc<dyn TextGenerator>) -> Self {
        Self { profile, generator }
    }

    pub fn id(&self) -> &str {
        &self.profile.id
    }

    pub fn role(&self) -> ReviewerRole {
        self.profile.role
    }

    pub fn profile(&self) -> &ReviewerProfile {
        &self.profile
    }

    pub fn generator(&self) -> &dyn TextGenerator {
        self.generator.as_ref()
    }
}

impl std::fmt::Debug for Reviewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reviewer")
            .field("profile", &self.profile)
            .field("generator", &self.generator.name())
            .finish()
    }
}

/// Bind each profile to the generator registered for its provider.
pub fn bind_reviewers(
    profiles: &[ReviewerProfile],
    registry: &GeneratorRegistry,
) -> Result<Vec<Reviewer>, WorkflowError> {
    profiles
        .iter()
        .map(|profile| {
            registry
                .get(&profile.provider)
                .map(|generator| Reviewer::new(profile.clone(), generator))
                .ok_or_else(|| WorkflowError::UnboundProvider {
                    reviewer: profile.id.clone(),
                    provider: profile.provider.clone(),
                })
        })
        .collect()
}
