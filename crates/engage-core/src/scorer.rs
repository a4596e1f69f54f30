//! Engagement scoring.
//!
//! Turns the observations of one tick into a single score in `[0, 100]`.
//! The score is the mean weight of the observations whose label is known,
//! optionally scaled by the mean confidence of those same observations.

use tracing::{debug, warn};

use crate::models::{BehaviorWeightConfig, Observation};

/// Lowest possible engagement score.
pub const MIN_SCORE: u8 = 0;
/// Highest possible engagement score.
pub const MAX_SCORE: u8 = 100;

/// Compute the engagement score for one tick.
///
/// Unknown labels are dropped from both the numerator and the denominator, so
/// a tick with only unknown labels scores the same as an empty one. Rounding
/// is half-to-even.
pub fn score(observations: &[Observation], config: &BehaviorWeightConfig) -> u8 {
    if observations.is_empty() {
        debug!("no observations, score = 0");
        return MIN_SCORE;
    }

    let mut weights: Vec<f64> = Vec::with_capacity(observations.len());
    let mut confidences: Vec<f64> = Vec::with_capacity(observations.len());
    for obs in observations {
        match config.weight(&obs.label) {
            Some(w) => {
                weights.push(w as f64);
                confidences.push(obs.confidence);
            }
            None => warn!(label = %obs.label, "unknown behavior label, skipping"),
        }
    }

    if weights.is_empty() {
        debug!("no known labels after filtering, score = 0");
        return MIN_SCORE;
    }

    let mut raw = mean(&weights);

    if config.use_confidence {
        let strength = config.confidence_impact_strength.clamp(0.0, 1.0);
        let avg_confidence = mean(&confidences);
        let modifier = (1.0 - strength) + strength * avg_confidence;
        raw *= modifier;
        debug!(modifier, avg_confidence, strength, "confidence-adjusted score");
    }

    let score = clamp_score(raw);
    debug!(score, raw, labels = weights.len(), "tick scored");
    score
}

/// Round half-to-even and clamp into `[0, 100]`.
fn clamp_score(raw: f64) -> u8 {
    if raw.is_nan() {
        return MIN_SCORE;
    }
    raw.round_ties_even()
        .clamp(f64::from(MIN_SCORE), f64::from(MAX_SCORE)) as u8
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}
