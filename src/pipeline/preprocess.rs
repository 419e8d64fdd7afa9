use nalgebra::{Matrix3, Vector3};

use crate::{
    error::MatchError,
    types::{Handedness, Landmark, NUM_LANDMARKS, PALM_LANDMARKS, Sequence, WRIST},
};

/// Canonical palm the frames are fitted onto, in `PALM_LANDMARKS` order.
/// Wrist at the origin, fingers along +y, palm width of roughly one unit.
const REFERENCE_PALM: [[f32; 3]; 6] = [
    [0.0, 0.0, 0.0],
    [-0.40, 0.35, 0.0],
    [-0.40, 1.30, 0.0],
    [0.0, 1.40, 0.0],
    [0.33, 1.32, 0.0],
    [0.60, 1.15, 0.0],
];

const MIN_PALM_SPREAD: f32 = 1e-6;
const MIN_RANK_RATIO: f32 = 1e-4;

#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedFrame {
    /// Landmarks relative to the wrist, rotated and scaled onto the canonical palm.
    pub shape: [Landmark; NUM_LANDMARKS],
    /// Wrist offset from the sequence's reference frame, in that frame's canonical coordinates.
    pub wrist: Landmark,
    pub timestamp: f64,
    /// The frame reused a neighbouring frame's transform.
    pub degenerate: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedSequence {
    pub frames: Vec<NormalizedFrame>,
    pub handedness: Handedness,
    pub degenerate_frames: usize,
}

impl NormalizedSequence {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[derive(Clone, Copy, Debug)]
struct PalmTransform {
    rotation: Matrix3<f32>,
    scale: f32,
}

impl PalmTransform {
    fn apply(&self, v: Vector3<f32>) -> Landmark {
        let out = self.rotation * v * self.scale;
        [out.x, out.y, out.z]
    }
}

/// Removes translation, rotation and hand size from every frame of a sequence.
///
/// Each frame is fitted independently: the least-squares rotation and uniform scale mapping
/// its palm landmarks (relative to the wrist) onto the canonical palm. The wrist path is kept
/// separately, expressed in the first valid frame's fitted coordinates, so the whole
/// output is invariant to any similarity transform applied to the input sequence.
///
/// Frames whose palm collapses to a point or a line reuse the previous valid frame's
/// transform (leading ones use the first valid frame's). A sequence with no valid frame
/// fails with [`MatchError::DegenerateGeometry`].
pub fn normalize(sequence: &Sequence) -> Result<NormalizedSequence, MatchError> {
    if sequence.is_empty() {
        return Err(MatchError::InsufficientData { frames: 0, min: 1 });
    }
    sequence.validate()?;

    let fits: Vec<Option<PalmTransform>> = sequence
        .frames
        .iter()
        .map(|frame| fit_palm(&frame.landmarks))
        .collect();

    let Some(reference_index) = fits.iter().position(Option::is_some) else {
        log::warn!(
            "all {} frames have degenerate palm geometry",
            sequence.len()
        );
        return Err(MatchError::DegenerateGeometry);
    };
    let Some(reference) = fits[reference_index] else {
        return Err(MatchError::DegenerateGeometry);
    };
    let reference_wrist = vec3(sequence.frames[reference_index].landmarks[WRIST]);

    let mut previous = reference;
    let mut degenerate_frames = 0;
    let mut frames = Vec::with_capacity(sequence.len());

    for (frame, fit) in sequence.frames.iter().zip(&fits) {
        let transform = match fit {
            Some(t) => {
                previous = *t;
                *t
            }
            None => {
                degenerate_frames += 1;
                previous
            }
        };

        let wrist = vec3(frame.landmarks[WRIST]);
        let mut shape = [[0.0f32; 3]; NUM_LANDMARKS];
        for (out, point) in shape.iter_mut().zip(&frame.landmarks) {
            *out = transform.apply(vec3(*point) - wrist);
        }

        frames.push(NormalizedFrame {
            shape,
            wrist: reference.apply(wrist - reference_wrist),
            timestamp: frame.timestamp,
            degenerate: fit.is_none(),
        });
    }

    if degenerate_frames > 0 {
        log::warn!(
            "{degenerate_frames} of {} frames had degenerate palm geometry, reused neighbouring transforms",
            sequence.len()
        );
    }

    Ok(NormalizedSequence {
        frames,
        handedness: sequence.handedness().unwrap_or(Handedness::Right),
        degenerate_frames,
    })
}

/// Kabsch fit of the frame's palm onto `REFERENCE_PALM`, both anchored at the wrist.
fn fit_palm(landmarks: &[Landmark]) -> Option<PalmTransform> {
    let wrist = vec3(landmarks[WRIST]);

    let mut covariance = Matrix3::<f32>::zeros();
    let mut spread = 0.0f32;
    let mut palm = [Vector3::<f32>::zeros(); 6];
    for (k, &idx) in PALM_LANDMARKS.iter().enumerate() {
        let p = vec3(landmarks[idx]) - wrist;
        covariance += p * vec3(REFERENCE_PALM[k]).transpose();
        spread += p.norm_squared();
        palm[k] = p;
    }
    if spread < MIN_PALM_SPREAD {
        return None;
    }

    let svd = covariance.svd(true, true);
    let (u, v_t) = (svd.u?, svd.v_t?);
    let sv = svd.singular_values;

    let mut order = [0usize, 1, 2];
    order.sort_by(|a, b| sv[*b].total_cmp(&sv[*a]));
    if !(sv[order[0]] > 0.0) || sv[order[1]] < MIN_RANK_RATIO * sv[order[0]] {
        return None;
    }

    let v = v_t.transpose();
    let mut correction = Matrix3::<f32>::identity();
    if (v * u.transpose()).determinant() < 0.0 {
        correction[(order[2], order[2])] = -1.0;
    }
    let rotation = v * correction * u.transpose();

    let aligned: f32 = palm
        .iter()
        .zip(REFERENCE_PALM.iter())
        .map(|(p, r)| (rotation * p).dot(&vec3(*r)))
        .sum();
    let scale = aligned / spread;
    if !scale.is_finite() || scale <= 0.0 {
        return None;
    }

    Some(PalmTransform { rotation, scale })
}

fn vec3(p: Landmark) -> Vector3<f32> {
    Vector3::new(p[0], p[1], p[2])
}
