//! Score dimensions and per-review score maps.

use crate::parser::{JsonMap, clamp_score, fields};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The fixed set of dimensions every reviewer scores, each on 1-10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreDimension {
    Accuracy,
    Completeness,
    Clarity,
    Novelty,
    Rigor,
    Citations,
}

impl ScoreDimension {
    pub const ALL: [ScoreDimension; 6] = [
        Self::Accuracy,
        Self::Completeness,
        Self::Clarity,
        Self::Novelty,
        Self::Rigor,
        Self::Citations,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Self::Accuracy => "accuracy",
            Self::Completeness => "completeness",
            Self::Clarity => "clarity",
            Self::Novelty => "novelty",
            Self::Rigor => "rigor",
            Self::Citations => "citations",
        }
    }
}

impl std::fmt::Display for ScoreDimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Scores by dimension. Dimensions a reviewer left out are absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scores(BTreeMap<ScoreDimension, f64>);

impl Scores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every dimension at zero, the placeholder for an on-leave reviewer.
    pub fn zeroed() -> Self {
        Self(ScoreDimension::ALL.iter().map(|d| (*d, 0.0)).collect())
    }

    /// Read scores from a parsed review. Looks in a nested `scores` object
    /// first, then at the top level. Values are clamped to 1-10.
    pub fn from_map(map: &JsonMap) -> Self {
        let source = fields::field_map(map, "scores").unwrap_or(map);
        Self(
            ScoreDimension::ALL
                .iter()
                .filter_map(|d| fields::field_f64(source, d.key()).map(|v| (*d, clamp_score(v))))
                .collect(),
        )
    }

    pub fn with(mut self, dimension: ScoreDimension, value: f64) -> Self {
        self.0.insert(dimension, value);
        self
    }

    pub fn get(&self, dimension: ScoreDimension) -> Option<f64> {
        self.0.get(&dimension).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Dimensions with no score, in canonical order.
    pub fn missing(&self) -> Vec<ScoreDimension> {
        ScoreDimension::ALL
            .iter()
            .filter(|d| !self.0.contains_key(d))
            .copied()
            .collect()
    }

    /// Every dimension in [`ScoreDimension::ALL`] is scored.
    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ScoreDimension, f64)> + '_ {
        self.0.iter().map(|(d, v)| (*d, *v))
    }

    /// Mean over the dimensions present; zero when empty. Reviews only
    /// reach an average once [`Scores::is_complete`] holds.
    pub fn average(&self) -> f64 {
        if self.0.is_empty() {
            return 0.0;
        }
        self.0.values().sum::<f64>() / self.0.len() as f64
    }
}
