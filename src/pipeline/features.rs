use ndarray::{Array2, ArrayView1};

use crate::{
    pipeline::preprocess::NormalizedSequence,
    types::{Handedness, NUM_LANDMARKS},
};

/// Floats per frame in every channel: 21 landmarks times xyz.
pub const CHANNEL_WIDTH: usize = NUM_LANDMARKS * 3;

const MIN_DTAU: f32 = 1e-3;
const MIN_DURATION: f64 = 1e-6;

/// Per-sequence feature channels, rows are frames.
///
/// Derivatives are taken over normalized time (the sequence spans exactly one unit), so a
/// gesture performed at twice the tempo produces the same velocity and acceleration values.
#[derive(Clone, Debug)]
pub struct FeatureSet {
    /// N rows: shape landmarks offset by the wrist path.
    pub position: Array2<f32>,
    /// N - 1 rows.
    pub velocity: Array2<f32>,
    /// N - 2 rows.
    pub acceleration: Array2<f32>,
    pub summary: MotionSummary,
}

impl FeatureSet {
    pub fn frames(&self) -> usize {
        self.position.nrows()
    }
}

/// Coarse description of a whole performance, cheap to compare.
#[derive(Clone, Debug, PartialEq)]
pub struct MotionSummary {
    pub frames: usize,
    pub handedness: Handedness,
    /// Hand centroid travel from the first to the last frame.
    pub displacement: [f32; 3],
    /// Bounding box size of the centroid path.
    pub extent: [f32; 3],
    pub mean_speed: f32,
    /// Mean centroid position relative to the first frame.
    pub mean_offset: [f32; 3],
}

impl MotionSummary {
    /// Mean position and mean velocity, the space the template index clusters in.
    pub fn coarse_vector(&self) -> [f32; 6] {
        [
            self.mean_offset[0],
            self.mean_offset[1],
            self.mean_offset[2],
            self.displacement[0],
            self.displacement[1],
            self.displacement[2],
        ]
    }
}

pub fn extract(sequence: &NormalizedSequence) -> FeatureSet {
    let n = sequence.len();
    let mut position = Array2::<f32>::zeros((n, CHANNEL_WIDTH));
    for (f, frame) in sequence.frames.iter().enumerate() {
        for (k, point) in frame.shape.iter().enumerate() {
            for c in 0..3 {
                position[[f, k * 3 + c]] = point[c] + frame.wrist[c];
            }
        }
    }

    let tau = normalized_time(sequence);
    let velocity = differentiate(&position, |f| tau[f + 1] - tau[f]);
    let acceleration = differentiate(&velocity, |f| (tau[f + 2] - tau[f]) * 0.5);
    let summary = summarize(&position, &velocity, sequence.handedness);

    FeatureSet {
        position,
        velocity,
        acceleration,
        summary,
    }
}

fn normalized_time(sequence: &NormalizedSequence) -> Vec<f32> {
    let n = sequence.len();
    let (Some(first), Some(last)) = (sequence.frames.first(), sequence.frames.last()) else {
        return Vec::new();
    };
    let duration = last.timestamp - first.timestamp;

    if duration > MIN_DURATION {
        sequence
            .frames
            .iter()
            .map(|frame| ((frame.timestamp - first.timestamp) / duration) as f32)
            .collect()
    } else {
        let denom = (n.max(2) - 1) as f32;
        (0..n).map(|f| f as f32 / denom).collect()
    }
}

fn differentiate<F>(channel: &Array2<f32>, dt: F) -> Array2<f32>
where
    F: Fn(usize) -> f32,
{
    let rows = channel.nrows().saturating_sub(1);
    let mut out = Array2::<f32>::zeros((rows, CHANNEL_WIDTH));
    for f in 0..rows {
        let inv = 1.0 / dt(f).max(MIN_DTAU);
        let diff = &channel.row(f + 1) - &channel.row(f);
        out.row_mut(f).assign(&(diff * inv));
    }
    out
}

/// Mean of the 21 landmarks in one channel row.
pub fn centroid(row: ArrayView1<f32>) -> [f32; 3] {
    let mut sum = [0.0f32; 3];
    for (i, v) in row.iter().enumerate() {
        sum[i % 3] += v;
    }
    sum.map(|s| s / NUM_LANDMARKS as f32)
}

fn summarize(position: &Array2<f32>, velocity: &Array2<f32>, handedness: Handedness) -> MotionSummary {
    let centroids: Vec<[f32; 3]> = position.rows().into_iter().map(centroid).collect();
    let first = centroids.first().copied().unwrap_or_default();
    let last = centroids.last().copied().unwrap_or_default();

    let mut lo = [f32::MAX; 3];
    let mut hi = [f32::MIN; 3];
    let mut offset_sum = [0.0f32; 3];
    for c in &centroids {
        for axis in 0..3 {
            lo[axis] = lo[axis].min(c[axis]);
            hi[axis] = hi[axis].max(c[axis]);
            offset_sum[axis] += c[axis] - first[axis];
        }
    }
    let count = centroids.len().max(1) as f32;

    let speeds: Vec<f32> = velocity
        .rows()
        .into_iter()
        .map(|row| norm3(centroid(row)))
        .collect();
    let mean_speed = if speeds.is_empty() {
        0.0
    } else {
        speeds.iter().sum::<f32>() / speeds.len() as f32
    };

    MotionSummary {
        frames: position.nrows(),
        handedness,
        displacement: [last[0] - first[0], last[1] - first[1], last[2] - first[2]],
        extent: if centroids.is_empty() {
            [0.0; 3]
        } else {
            [hi[0] - lo[0], hi[1] - lo[1], hi[2] - lo[2]]
        },
        mean_speed,
        mean_offset: offset_sum.map(|s| s / count),
    }
}

pub(crate) fn norm3(v: [f32; 3]) -> f32 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}
