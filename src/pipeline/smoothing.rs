//! One Euro filtering of normalized landmark streams.
//!
//! Smooth when the hand is slow (jitter dominates), responsive when it is fast (lag dominates).

use std::f32::consts::PI;

use crate::{
    config::SmootherConfig,
    pipeline::preprocess::{NormalizedFrame, NormalizedSequence},
    types::NUM_LANDMARKS,
};

/// 21 shape landmarks plus the wrist path, three coordinates each.
const CHANNELS: usize = (NUM_LANDMARKS + 1) * 3;

/// Speed-adaptive low-pass filter for one scalar signal.
#[derive(Clone, Debug)]
pub struct OneEuroFilter {
    min_cutoff: f32,
    beta: f32,
    d_cutoff: f32,
    min_dt: f32,

    x_prev: f32,
    dx_prev: f32,
    t_prev: f64,
    initialized: bool,
}

impl OneEuroFilter {
    pub fn new(config: &SmootherConfig) -> Self {
        Self {
            min_cutoff: config.min_cutoff,
            beta: config.beta,
            d_cutoff: config.d_cutoff,
            min_dt: config.min_dt,
            x_prev: 0.0,
            dx_prev: 0.0,
            t_prev: 0.0,
            initialized: false,
        }
    }

    fn smoothing_factor(t_e: f32, cutoff: f32) -> f32 {
        let r = 2.0 * PI * cutoff * t_e;
        r / (r + 1.0)
    }

    /// Filters `x` sampled at `t` seconds. The first sample passes through unchanged.
    pub fn filter(&mut self, t: f64, x: f32) -> f32 {
        if !self.initialized {
            self.x_prev = x;
            self.t_prev = t;
            self.initialized = true;
            return x;
        }

        let t_e = ((t - self.t_prev) as f32).max(self.min_dt);

        let a_d = Self::smoothing_factor(t_e, self.d_cutoff);
        let dx = (x - self.x_prev) / t_e;
        let dx_hat = a_d * dx + (1.0 - a_d) * self.dx_prev;

        let cutoff = self.min_cutoff + self.beta * dx_hat.abs();
        let a = Self::smoothing_factor(t_e, cutoff);
        let x_hat = a * x + (1.0 - a) * self.x_prev;

        self.x_prev = x_hat;
        self.dx_prev = dx_hat;
        self.t_prev = self.t_prev.max(t);

        x_hat
    }

    pub fn reset(&mut self) {
        self.initialized = false;
        self.dx_prev = 0.0;
    }
}

/// One filter per coordinate of a normalized frame. State lives for one sequence.
pub struct LandmarkSmoother {
    filters: Vec<OneEuroFilter>,
}

impl LandmarkSmoother {
    pub fn new(config: &SmootherConfig) -> Self {
        Self {
            filters: vec![OneEuroFilter::new(config); CHANNELS],
        }
    }

    pub fn reset(&mut self) {
        self.filters.iter_mut().for_each(OneEuroFilter::reset);
    }

    pub fn filter_frame(&mut self, frame: &NormalizedFrame) -> NormalizedFrame {
        let t = frame.timestamp;
        let mut out = frame.clone();
        let mut filters = self.filters.iter_mut();

        for point in out.shape.iter_mut().chain(std::iter::once(&mut out.wrist)) {
            for c in point.iter_mut() {
                if let Some(filter) = filters.next() {
                    *c = filter.filter(t, *c);
                }
            }
        }
        out
    }
}

/// Smooths a whole sequence with fresh filter state. Length and frame order are preserved.
pub fn smooth(sequence: &NormalizedSequence, config: &SmootherConfig) -> NormalizedSequence {
    if !config.enabled {
        return sequence.clone();
    }

    let mut smoother = LandmarkSmoother::new(config);
    NormalizedSequence {
        frames: sequence
            .frames
            .iter()
            .map(|frame| smoother.filter_frame(frame))
            .collect(),
        handedness: sequence.handedness,
        degenerate_frames: sequence.degenerate_frames,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        pipeline::preprocess::normalize,
        synthetic::{GestureShape, SyntheticGesture},
    };

    fn mean_shift(a: &NormalizedSequence, b: &NormalizedSequence) -> f32 {
        let mut total = 0.0;
        let mut count = 0;
        for (fa, fb) in a.frames.iter().zip(&b.frames) {
            for (pa, pb) in fa.shape.iter().zip(&fb.shape) {
                total += ((pa[0] - pb[0]).powi(2) + (pa[1] - pb[1]).powi(2) + (pa[2] - pb[2]).powi(2))
                    .sqrt();
                count += 1;
            }
        }
        total / count as f32
    }

    #[test]
    fn test_first_sample_passes_through() {
        let mut filter = OneEuroFilter::new(&SmootherConfig::default());
        assert_eq!(filter.filter(0.0, 3.5), 3.5);
        let next = filter.filter(0.1, 4.5);
        assert!(next > 3.5 && next < 4.5);
    }

    #[test]
    fn test_colliding_timestamps_stay_finite() {
        let mut filter = OneEuroFilter::new(&SmootherConfig::default());
        filter.filter(1.0, 0.0);
        for i in 0..5 {
            let y = filter.filter(1.0, i as f32);
            assert!(y.is_finite());
        }
    }

    #[test]
    fn test_fast_motion_lags_less_than_slow_motion() {
        let config = SmootherConfig::default();
        let mut slow = OneEuroFilter::new(&config);
        let mut fast = OneEuroFilter::new(&config);
        let mut slow_lag = 0.0;
        let mut fast_lag = 0.0;
        for i in 0..20 {
            let t = i as f64 * 0.1;
            slow_lag = (0.1 * t as f32) - slow.filter(t, 0.1 * t as f32);
            fast_lag = (10.0 * t as f32) - fast.filter(t, 10.0 * t as f32);
        }
        // relative to the distance covered per frame
        assert!(fast_lag / 1.0 < slow_lag / 0.01);
    }

    #[test]
    fn test_preserves_length_and_timestamps() {
        let seq = normalize(&SyntheticGesture::new(GestureShape::CircleCounterClockwise, 14).sequence())
            .unwrap();
        let smoothed = smooth(&seq, &SmootherConfig::default());
        assert_eq!(smoothed.len(), seq.len());
        for (a, b) in seq.frames.iter().zip(&smoothed.frames) {
            assert_eq!(a.timestamp, b.timestamp);
        }
        assert_eq!(smoothed.frames[0], seq.frames[0]);
    }

    #[test]
    fn test_resmoothing_changes_less_than_first_pass() {
        let raw = normalize(
            &SyntheticGesture::new(GestureShape::SwipeRight, 20)
                .amplitude(0.0)
                .jitter(0.002)
                .seed(3)
                .sequence(),
        )
        .unwrap();
        let config = SmootherConfig::default();
        let once = smooth(&raw, &config);
        let twice = smooth(&once, &config);

        let first = mean_shift(&raw, &once);
        let second = mean_shift(&once, &twice);
        assert!(first > 0.0);
        assert!(second < first, "second pass {second} >= first pass {first}");
    }

    #[test]
    fn test_disabled_is_identity() {
        let seq = normalize(&SyntheticGesture::new(GestureShape::SwipeUp, 10).jitter(0.003).sequence())
            .unwrap();
        let config = SmootherConfig {
            enabled: false,
            ..SmootherConfig::default()
        };
        assert_eq!(smooth(&seq, &config), seq);
    }
}
