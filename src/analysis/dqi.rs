//! Data Quality Index scoring.
//!
//! Rolls per-dimension raw scores into a single 0-100 index using a fixed
//! weight table, then assigns a Green/Amber/Orange/Red band.

use crate::error::ConfigError;
use crate::models::{Dimension, DimensionInputs, DimensionScore, DqiBand, DqiScore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

pub const GREEN_THRESHOLD: f64 = 85.0;
pub const AMBER_THRESHOLD: f64 = 65.0;
pub const ORANGE_THRESHOLD: f64 = 40.0;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Weight of every DQI dimension. Must add up to 100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DqiWeights {
    #[serde(default = "default_safety")]
    pub safety: f64,
    #[serde(default = "default_compliance")]
    pub compliance: f64,
    #[serde(default = "default_completeness")]
    pub completeness: f64,
    #[serde(default = "default_operations")]
    pub operations: f64,
    #[serde(default = "default_timeliness")]
    pub timeliness: f64,
}

impl Default for DqiWeights {
    fn default() -> Self {
        Self {
            safety: default_safety(),
            compliance: default_compliance(),
            completeness: default_completeness(),
            operations: default_operations(),
            timeliness: default_timeliness(),
        }
    }
}

fn default_safety() -> f64 {
    35.0
}

fn default_compliance() -> f64 {
    25.0
}

fn default_completeness() -> f64 {
    20.0
}

fn default_operations() -> f64 {
    15.0
}

fn default_timeliness() -> f64 {
    5.0
}

impl DqiWeights {
    pub fn weight(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::Safety => self.safety,
            Dimension::Compliance => self.compliance,
            Dimension::Completeness => self.completeness,
            Dimension::Operations => self.operations,
            Dimension::Timeliness => self.timeliness,
        }
    }

    pub fn total(&self) -> f64 {
        Dimension::ALL.iter().map(|d| self.weight(*d)).sum()
    }

    /// Check that every weight is a finite non-negative number and the
    /// table sums to 100.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for dimension in Dimension::ALL {
            let value = self.weight(dimension);
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidWeight {
                    dimension: dimension.to_string(),
                    value,
                });
            }
        }

        let total = self.total();
        if (total - 100.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::WeightSum(total));
        }

        Ok(())
    }
}

/// Band for an overall DQI score.
pub fn band_for_score(score: f64) -> DqiBand {
    if score >= GREEN_THRESHOLD {
        DqiBand::Green
    } else if score >= AMBER_THRESHOLD {
        DqiBand::Amber
    } else if score >= ORANGE_THRESHOLD {
        DqiBand::Orange
    } else {
        DqiBand::Red
    }
}

/// Scores dimension inputs against a validated weight table.
#[derive(Debug, Clone)]
pub struct DqiScorer {
    weights: DqiWeights,
}

impl DqiScorer {
    /// Create a scorer. Fails if the weight table is invalid.
    pub fn new(weights: DqiWeights) -> Result<Self, ConfigError> {
        weights.validate()?;
        Ok(Self { weights })
    }

    pub fn weights(&self) -> &DqiWeights {
        &self.weights
    }

    /// Compute the DQI for one study.
    ///
    /// A dimension without input scores 0 and is listed in
    /// `missing_dimensions`.
    pub fn score(&self, inputs: &DimensionInputs) -> DqiScore {
        let mut dimension_scores = BTreeMap::new();
        let mut missing_dimensions = Vec::new();

        for dimension in Dimension::ALL {
            let weight = self.weights.weight(dimension);
            let (raw_score, contributing_features) = match inputs.get(&dimension) {
                Some(input) => (clamp_score(input.raw_score), input.contributing_features.clone()),
                None => {
                    missing_dimensions.push(dimension);
                    (0.0, Vec::new())
                }
            };

            dimension_scores.insert(
                dimension,
                DimensionScore {
                    raw_score,
                    weight,
                    weighted_score: raw_score * weight / 100.0,
                    contributing_features,
                },
            );
        }

        if !missing_dimensions.is_empty() {
            warn!("DQI inputs missing for {:?}, scored as 0", missing_dimensions);
        }

        let overall_score = clamp_score(dimension_scores.values().map(|d| d.weighted_score).sum());
        let band = band_for_score(overall_score);

        DqiScore {
            overall_score,
            risk_level: band.risk_level(),
            threshold_met: band.to_string(),
            band,
            dimension_scores,
            missing_dimensions,
        }
    }
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 100.0)
    }
}
