use crate::{
    config::IndexConfig,
    pipeline::features::{MotionSummary, norm3},
};

/// Why a template was skipped before any DTW work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    Handedness,
    FrameCount,
    Displacement,
    Extent,
    Speed,
}

impl Rejection {
    pub fn label(&self) -> &'static str {
        match self {
            Rejection::Handedness => "handedness",
            Rejection::FrameCount => "frame count",
            Rejection::Displacement => "displacement",
            Rejection::Extent => "extent",
            Rejection::Speed => "speed",
        }
    }
}

/// Cheap early rejection on coarse motion statistics.
///
/// Tolerances are loose enough that two performances of the same gesture pass at any tempo
/// within `frame_ratio_tolerance`, any hand size and any position in view.
pub fn rejection(query: &MotionSummary, template: &MotionSummary, config: &IndexConfig) -> Option<Rejection> {
    if query.handedness != template.handedness {
        return Some(Rejection::Handedness);
    }

    let longer = query.frames.max(template.frames) as f32;
    let shorter = query.frames.min(template.frames).max(1) as f32;
    if longer / shorter > config.frame_ratio_tolerance {
        return Some(Rejection::FrameCount);
    }

    let delta = [
        query.displacement[0] - template.displacement[0],
        query.displacement[1] - template.displacement[1],
        query.displacement[2] - template.displacement[2],
    ];
    let reach = norm3(query.displacement).max(norm3(template.displacement));
    if norm3(delta) > config.displacement_tolerance + config.displacement_relative * reach {
        return Some(Rejection::Displacement);
    }

    for axis in 0..3 {
        let (a, b) = (query.extent[axis], template.extent[axis]);
        if (a - b).abs() > config.extent_tolerance + config.extent_relative * a.max(b) {
            return Some(Rejection::Extent);
        }
    }

    let faster = query.mean_speed.max(template.mean_speed);
    let slower = query.mean_speed.min(template.mean_speed);
    if faster > config.speed_floor && faster > config.speed_ratio_tolerance * slower {
        return Some(Rejection::Speed);
    }

    None
}
