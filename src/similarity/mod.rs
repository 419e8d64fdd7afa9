pub mod dtw;

use ndarray::{Array2, ArrayView1};

use crate::{
    config::DtwConfig,
    pipeline::features::FeatureSet,
    types::{NUM_LANDMARKS, SubScores},
};

use self::dtw::{band_half_width, dtw_cost};

/// Pseudo-weight per landmark that pulls near-still frames toward zero direction cost.
const DIRECTION_SPEED_FLOOR: f32 = 0.5;
const MIN_CHANNEL_SCALE: f32 = 1.0;
const MIN_DIRECTION_NORM: f32 = 1e-6;

/// The three frame-distance definitions the ensemble combines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DtwVariant {
    /// RMS landmark distance between positions.
    Position,
    /// Angle between landmark motion directions, weighted by speed.
    Direction,
    /// Weighted position, velocity and acceleration distance.
    MultiFeature,
}

impl DtwVariant {
    pub const ALL: [DtwVariant; 3] = [
        DtwVariant::Position,
        DtwVariant::Direction,
        DtwVariant::MultiFeature,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            DtwVariant::Position => "position",
            DtwVariant::Direction => "direction",
            DtwVariant::MultiFeature => "multi-feature",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimilarityScore {
    /// Weighted combination of the sub-scores, in [0, 1].
    pub ensemble: f32,
    pub sub_scores: SubScores,
}

/// Normalized alignment cost between two feature sets under one variant.
pub fn compute_cost(a: &FeatureSet, b: &FeatureSet, variant: DtwVariant, config: &DtwConfig) -> f32 {
    match variant {
        DtwVariant::Position => {
            let (n, m) = (a.position.nrows(), b.position.nrows());
            dtw_cost(n, m, band(n, m, config), |i, j| {
                rms_distance(a.position.row(i), b.position.row(j))
            })
        }
        DtwVariant::Direction => {
            let (n, m) = (a.velocity.nrows(), b.velocity.nrows());
            if n == 0 || m == 0 {
                return if n == m { 0.0 } else { 1.0 };
            }
            dtw_cost(n, m, band(n, m, config), |i, j| {
                direction_distance(a.velocity.row(i), b.velocity.row(j))
            })
        }
        DtwVariant::MultiFeature => {
            let (n, m) = (a.position.nrows(), b.position.nrows());
            let weights = config.feature_weights;
            let velocity_scale = channel_scale(&a.velocity, &b.velocity);
            let acceleration_scale = channel_scale(&a.acceleration, &b.acceleration);

            dtw_cost(n, m, band(n, m, config), |i, j| {
                let mut cost = weights.position * rms_distance(a.position.row(i), b.position.row(j));
                if let Some(d) = clamped_distance(&a.velocity, &b.velocity, i, j) {
                    cost += weights.velocity * d / velocity_scale;
                }
                if let Some(d) = clamped_distance(&a.acceleration, &b.acceleration, i, j) {
                    cost += weights.acceleration * d / acceleration_scale;
                }
                cost
            })
        }
    }
}

/// Maps a non-negative cost onto (0, 1], monotonically decreasing; `scale` maps to 0.5.
pub fn similarity(cost: f32, scale: f32) -> f32 {
    if !cost.is_finite() {
        return 0.0;
    }
    1.0 / (1.0 + cost.max(0.0) / scale)
}

/// Ensemble similarity of a query against a template.
pub fn score(query: &FeatureSet, template: &FeatureSet, config: &DtwConfig) -> SimilarityScore {
    let scales = config.scales;
    let sub_scores = SubScores {
        position: similarity(
            compute_cost(query, template, DtwVariant::Position, config),
            scales.position,
        ),
        direction: similarity(
            compute_cost(query, template, DtwVariant::Direction, config),
            scales.direction,
        ),
        multi_feature: similarity(
            compute_cost(query, template, DtwVariant::MultiFeature, config),
            scales.multi_feature,
        ),
    };

    let weights = config.weights;
    let ensemble = weights.position * sub_scores.position
        + weights.direction * sub_scores.direction
        + weights.multi_feature * sub_scores.multi_feature;

    SimilarityScore {
        ensemble: ensemble.clamp(0.0, 1.0),
        sub_scores,
    }
}

fn band(n: usize, m: usize, config: &DtwConfig) -> Option<usize> {
    config
        .band_ratio
        .and_then(|ratio| band_half_width(n, m, ratio))
}

fn rms_distance(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
    let sum: f32 = a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum();
    (sum / NUM_LANDMARKS as f32).sqrt()
}

/// Speed-weighted mean of `(1 - cos θ) / 2` over landmarks, in [0, 1].
fn direction_distance(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
    let mut weighted = 0.0f32;
    let mut weight = 0.0f32;

    for k in 0..NUM_LANDMARKS {
        let va = [a[k * 3], a[k * 3 + 1], a[k * 3 + 2]];
        let vb = [b[k * 3], b[k * 3 + 1], b[k * 3 + 2]];
        let na = (va[0] * va[0] + va[1] * va[1] + va[2] * va[2]).sqrt();
        let nb = (vb[0] * vb[0] + vb[1] * vb[1] + vb[2] * vb[2]).sqrt();

        let angular = if na > MIN_DIRECTION_NORM && nb > MIN_DIRECTION_NORM {
            let cos = (va[0] * vb[0] + va[1] * vb[1] + va[2] * vb[2]) / (na * nb);
            (1.0 - cos.clamp(-1.0, 1.0)) * 0.5
        } else {
            0.5
        };
        weighted += (na + nb) * angular;
        weight += na + nb;
    }

    weighted / (weight + DIRECTION_SPEED_FLOOR * NUM_LANDMARKS as f32)
}

/// Mean RMS magnitude of a channel's rows across both sequences, floored.
fn channel_scale(a: &Array2<f32>, b: &Array2<f32>) -> f32 {
    let magnitude = |channel: &Array2<f32>| -> Option<f32> {
        if channel.nrows() == 0 {
            return None;
        }
        let total: f32 = channel
            .rows()
            .into_iter()
            .map(|row| (row.iter().map(|v| v * v).sum::<f32>() / NUM_LANDMARKS as f32).sqrt())
            .sum();
        Some(total / channel.nrows() as f32)
    };

    let mags: Vec<f32> = [magnitude(a), magnitude(b)].into_iter().flatten().collect();
    if mags.is_empty() {
        return MIN_CHANNEL_SCALE;
    }
    (mags.iter().sum::<f32>() / mags.len() as f32).max(MIN_CHANNEL_SCALE)
}

/// Distance between derivative rows at position frames `i` and `j`, clamping to the
/// shorter derivative channel. `None` if either channel is empty.
fn clamped_distance(a: &Array2<f32>, b: &Array2<f32>, i: usize, j: usize) -> Option<f32> {
    let (n, m) = (a.nrows(), b.nrows());
    if n == 0 || m == 0 {
        return None;
    }
    Some(rms_distance(a.row(i.min(n - 1)), b.row(j.min(m - 1))))
}
