//! Score trajectory across rounds, with stagnation detection.

use crate::review::{Review, ScoreDimension, overall_average};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Aggregate scores for one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub round: u32,
    pub overall: f64,
    pub dimensions: BTreeMap<ScoreDimension, f64>,
}

impl TrajectoryPoint {
    pub fn from_reviews(round: u32, reviews: &[Review]) -> Self {
        let active: Vec<&Review> = reviews.iter().filter(|r| r.is_active()).collect();
        let dimensions = ScoreDimension::ALL
            .iter()
            .filter_map(|d| {
                let values: Vec<f64> = active.iter().filter_map(|r| r.scores.get(*d)).collect();
                (!values.is_empty())
                    .then(|| (*d, values.iter().sum::<f64>() / values.len() as f64))
            })
            .collect();
        Self {
            round,
            overall: overall_average(reviews),
            dimensions,
        }
    }
}

/// A dimension that barely moved between the last two rounds while still
/// below the "good" score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagnationFlag {
    pub dimension: ScoreDimension,
    pub previous: f64,
    pub current: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreTrajectory {
    points: Vec<TrajectoryPoint>,
}

impl ScoreTrajectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, point: TrajectoryPoint) {
        self.points.push(point);
    }

    pub fn points(&self) -> &[TrajectoryPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Dimensions whose average changed by less than `delta` between the
    /// last two points while remaining below `good_score`.
    pub fn stagnant_dimensions(&self, delta: f64, good_score: f64) -> Vec<StagnationFlag> {
        let [.., previous, current] = self.points.as_slice() else {
            return Vec::new();
        };
        current
            .dimensions
            .iter()
            .filter_map(|(dimension, &now)| {
                let before = *previous.dimensions.get(dimension)?;
                ((now - before).abs() < delta && now < good_score).then_some(StagnationFlag {
                    dimension: *dimension,
                    previous: before,
                    current: now,
                })
            })
            .collect()
    }

    /// Plain-text table for prompts.
    pub fn render(&self) -> String {
        let mut out = String::from("| Round | Overall |");
        for d in ScoreDimension::ALL {
            let _ = write!(out, " {} |", d.key());
        }
        out.push('\n');
        out.push_str(&"|---".repeat(ScoreDimension::ALL.len() + 2));
        out.push_str("|\n");

        for point in &self.points {
            let _ = write!(out, "| {} | {:.2} |", point.round, point.overall);
            for d in ScoreDimension::ALL {
                match point.dimensions.get(&d) {
                    Some(v) => {
                        let _ = write!(out, " {v:.2} |");
                    }
                    None => out.push_str(" - |"),
                }
            }
            out.push('\n');
        }
        out
    }
}
