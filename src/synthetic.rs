//! Procedural hand gestures for demos, benchmarks and tests.
//!
//! A fixed open-hand pose is moved along a parametric 2D path in normalized image
//! coordinates (x right, y down), optionally rotated, resized and jittered.

use std::f32::consts::{PI, SQRT_2};

use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

use crate::types::{Frame, Handedness, Landmark, NUM_LANDMARKS, Sequence, Template};

/// Open right hand, wrist at the origin, fingers pointing up the image.
const OPEN_HAND: [Landmark; NUM_LANDMARKS] = [
    [0.0, 0.0, 0.0],
    [-0.030, -0.020, 0.0],
    [-0.050, -0.040, -0.005],
    [-0.065, -0.060, -0.008],
    [-0.080, -0.075, -0.010],
    [-0.025, -0.090, 0.0],
    [-0.028, -0.125, -0.004],
    [-0.030, -0.150, -0.007],
    [-0.031, -0.170, -0.010],
    [0.000, -0.095, 0.0],
    [0.000, -0.135, -0.004],
    [0.000, -0.162, -0.007],
    [0.000, -0.185, -0.010],
    [0.022, -0.090, 0.0],
    [0.024, -0.125, -0.004],
    [0.025, -0.150, -0.007],
    [0.026, -0.168, -0.010],
    [0.042, -0.080, 0.0],
    [0.047, -0.105, -0.004],
    [0.050, -0.122, -0.007],
    [0.052, -0.138, -0.010],
];

pub fn canonical_hand() -> [Landmark; NUM_LANDMARKS] {
    OPEN_HAND
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GestureShape {
    SwipeRight,
    SwipeLeft,
    SwipeUp,
    SwipeDown,
    CircleClockwise,
    CircleCounterClockwise,
    DiagonalUpRight,
    DiagonalDownLeft,
    VStroke,
    Shake,
}

impl GestureShape {
    pub const ALL: [GestureShape; 10] = [
        GestureShape::SwipeRight,
        GestureShape::SwipeLeft,
        GestureShape::SwipeUp,
        GestureShape::SwipeDown,
        GestureShape::CircleClockwise,
        GestureShape::CircleCounterClockwise,
        GestureShape::DiagonalUpRight,
        GestureShape::DiagonalDownLeft,
        GestureShape::VStroke,
        GestureShape::Shake,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            GestureShape::SwipeRight => "swipe-right",
            GestureShape::SwipeLeft => "swipe-left",
            GestureShape::SwipeUp => "swipe-up",
            GestureShape::SwipeDown => "swipe-down",
            GestureShape::CircleClockwise => "circle-cw",
            GestureShape::CircleCounterClockwise => "circle-ccw",
            GestureShape::DiagonalUpRight => "diagonal-up-right",
            GestureShape::DiagonalDownLeft => "diagonal-down-left",
            GestureShape::VStroke => "v-stroke",
            GestureShape::Shake => "shake",
        }
    }

    /// Hand offset at progress `t` in [0, 1] for a gesture of size `a`.
    fn offset(&self, t: f32, a: f32) -> (f32, f32) {
        let r = a * 0.5;
        let turn = 2.0 * PI * t;
        match self {
            GestureShape::SwipeRight => (a * t, 0.0),
            GestureShape::SwipeLeft => (-a * t, 0.0),
            GestureShape::SwipeUp => (0.0, -a * t),
            GestureShape::SwipeDown => (0.0, a * t),
            GestureShape::CircleClockwise => (r * turn.cos() - r, r * turn.sin()),
            GestureShape::CircleCounterClockwise => (r * turn.cos() - r, -r * turn.sin()),
            GestureShape::DiagonalUpRight => (a * t / SQRT_2, -a * t / SQRT_2),
            GestureShape::DiagonalDownLeft => (-a * t / SQRT_2, a * t / SQRT_2),
            GestureShape::VStroke => (a * t, -a * (0.5 - (t - 0.5).abs())),
            GestureShape::Shake => (0.5 * a * (2.0 * turn).sin(), 0.0),
        }
    }
}

/// Builder for one synthetic performance.
#[derive(Clone, Debug)]
pub struct SyntheticGesture {
    shape: GestureShape,
    frames: usize,
    amplitude: f32,
    origin: (f32, f32),
    rotation_deg: f32,
    hand_scale: f32,
    jitter: f32,
    fps: f64,
    handedness: Handedness,
    seed: u64,
}

impl SyntheticGesture {
    pub fn new(shape: GestureShape, frames: usize) -> Self {
        Self {
            shape,
            frames,
            amplitude: 0.2,
            origin: (0.4, 0.6),
            rotation_deg: 0.0,
            hand_scale: 1.0,
            jitter: 0.0,
            fps: 10.0,
            handedness: Handedness::Right,
            seed: 0,
        }
    }

    pub fn amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude;
        self
    }

    pub fn origin(mut self, x: f32, y: f32) -> Self {
        self.origin = (x, y);
        self
    }

    /// In-plane hand rotation about the wrist, degrees.
    pub fn rotation(mut self, degrees: f32) -> Self {
        self.rotation_deg = degrees;
        self
    }

    pub fn hand_scale(mut self, scale: f32) -> Self {
        self.hand_scale = scale;
        self
    }

    /// Uniform per-coordinate noise in `[-jitter, jitter]`.
    pub fn jitter(mut self, jitter: f32) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn fps(mut self, fps: f64) -> Self {
        self.fps = fps;
        self
    }

    /// A left hand is the right-hand pose mirrored about the wrist.
    pub fn handedness(mut self, handedness: Handedness) -> Self {
        self.handedness = handedness;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn sequence(&self) -> Sequence {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let (sin, cos) = self.rotation_deg.to_radians().sin_cos();
        let mirror = match self.handedness {
            Handedness::Left => -1.0,
            Handedness::Right => 1.0,
        };
        let span = self.frames.saturating_sub(1).max(1) as f32;

        let frames = (0..self.frames)
            .map(|f| {
                let t = f as f32 / span;
                let (dx, dy) = self.shape.offset(t, self.amplitude);
                let landmarks = OPEN_HAND
                    .iter()
                    .map(|p| {
                        let px = p[0] * mirror;
                        let x = (px * cos - p[1] * sin) * self.hand_scale;
                        let y = (px * sin + p[1] * cos) * self.hand_scale;
                        let z = p[2] * self.hand_scale;
                        let mut point = [self.origin.0 + dx + x, self.origin.1 + dy + y, z];
                        if self.jitter > 0.0 {
                            for c in &mut point {
                                *c += rng.gen_range(-self.jitter..=self.jitter);
                            }
                        }
                        point
                    })
                    .collect();
                Frame {
                    landmarks,
                    handedness: self.handedness,
                    confidence: 0.95,
                    timestamp: f as f64 / self.fps,
                }
            })
            .collect();

        Sequence::new(frames)
    }
}

/// `per_shape` varied performances of every [`GestureShape`], ids ascending from 0 in shape
/// order. Each template is named and bound to the action of its shape's label.
pub fn template_library(per_shape: usize, seed: u64) -> Vec<Template> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut templates = Vec::with_capacity(per_shape * GestureShape::ALL.len());

    for shape in GestureShape::ALL {
        for _ in 0..per_shape {
            let sequence = SyntheticGesture::new(shape, rng.gen_range(12..=20))
                .amplitude(rng.gen_range(0.16..=0.24))
                .origin(rng.gen_range(0.3..=0.5), rng.gen_range(0.5..=0.7))
                .rotation(rng.gen_range(-8.0..=8.0))
                .hand_scale(rng.gen_range(0.85..=1.15))
                .jitter(0.0015)
                .seed(rng.gen_range(0..=u64::MAX))
                .sequence();
            let id = templates.len() as u64;
            templates.push(Template::new(id, shape.label(), sequence).with_action(shape.label()));
        }
    }
    templates
}
