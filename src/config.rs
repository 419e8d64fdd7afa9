use std::{fs, path::Path};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

pub const DEFAULT_THRESHOLD: f32 = 0.80;
pub const DEFAULT_MIN_FRAMES: usize = 10;
pub const DEFAULT_WORKERS: usize = 4;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Inclusive: a score equal to the threshold is a match.
    pub threshold: f32,
    pub min_frames: usize,
    /// Surface `InsufficientData` as an error instead of a no-match result.
    pub strict: bool,
    pub workers: usize,
    pub top_k: usize,
    pub smoothing: SmootherConfig,
    pub dtw: DtwConfig,
    pub index: IndexConfig,
    pub cache: CacheConfig,
    pub window: WindowConfig,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            min_frames: DEFAULT_MIN_FRAMES,
            strict: false,
            workers: DEFAULT_WORKERS,
            top_k: 5,
            smoothing: SmootherConfig::default(),
            dtw: DtwConfig::default(),
            index: IndexConfig::default(),
            cache: CacheConfig::default(),
            window: WindowConfig::default(),
        }
    }
}

impl MatcherConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read matcher config {}", path.display()))?;
        let config: MatcherConfig = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse matcher config {}", path.display()))?;
        config.validate()?;
        log::info!("loaded matcher config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(anyhow!("threshold {} outside [0, 1]", self.threshold));
        }
        if self.min_frames < 3 {
            return Err(anyhow!(
                "min_frames must be at least 3 to derive acceleration, got {}",
                self.min_frames
            ));
        }
        if self.workers == 0 {
            return Err(anyhow!("workers must be at least 1"));
        }
        self.dtw.weights.validate()?;
        self.dtw.feature_weights.validate()?;
        self.dtw.scales.validate()?;
        if let Some(ratio) = self.dtw.band_ratio {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(anyhow!("band_ratio {ratio} outside (0, 1]"));
            }
        }
        if self.smoothing.min_dt <= 0.0 {
            return Err(anyhow!("smoothing.min_dt must be positive"));
        }
        if self.cache.features == 0 || self.cache.distances == 0 || self.cache.results == 0 {
            return Err(anyhow!("cache capacities must be positive"));
        }
        if self.index.frame_ratio_tolerance < 1.0 || self.index.speed_ratio_tolerance < 1.0 {
            return Err(anyhow!("ratio tolerances must be at least 1.0"));
        }
        if self.window.max_frames < self.min_frames || self.window.stride == 0 {
            return Err(anyhow!(
                "window must hold at least min_frames frames and advance by at least one"
            ));
        }
        Ok(())
    }
}

/// One Euro filter parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmootherConfig {
    pub enabled: bool,
    /// Hz. Lower means smoother at rest.
    pub min_cutoff: f32,
    /// Cutoff gain per unit of speed. Higher means less lag on fast motion.
    pub beta: f32,
    pub d_cutoff: f32,
    /// Seconds. Colliding timestamps are spaced by at least this much.
    pub min_dt: f32,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_cutoff: 1.0,
            beta: 0.5,
            d_cutoff: 1.0,
            min_dt: 1e-3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DtwConfig {
    /// Sakoe-Chiba band half-width as a fraction of the longer sequence. `None` runs the full matrix.
    pub band_ratio: Option<f32>,
    pub weights: EnsembleWeights,
    pub feature_weights: FeatureWeights,
    pub scales: CostScales,
}

impl Default for DtwConfig {
    fn default() -> Self {
        Self {
            band_ratio: Some(0.25),
            weights: EnsembleWeights::default(),
            feature_weights: FeatureWeights::default(),
            scales: CostScales::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleWeights {
    pub position: f32,
    pub direction: f32,
    pub multi_feature: f32,
}

impl Default for EnsembleWeights {
    fn default() -> Self {
        Self {
            position: 0.2,
            direction: 0.3,
            multi_feature: 0.5,
        }
    }
}

impl EnsembleWeights {
    fn validate(&self) -> Result<()> {
        check_weights(
            "ensemble",
            &[self.position, self.direction, self.multi_feature],
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureWeights {
    pub position: f32,
    pub velocity: f32,
    pub acceleration: f32,
}

impl Default for FeatureWeights {
    fn default() -> Self {
        Self {
            position: 0.5,
            velocity: 0.3,
            acceleration: 0.2,
        }
    }
}

impl FeatureWeights {
    fn validate(&self) -> Result<()> {
        check_weights(
            "feature",
            &[self.position, self.velocity, self.acceleration],
        )
    }
}

/// Cost at which each variant's similarity drops to 0.5.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostScales {
    pub position: f32,
    pub direction: f32,
    pub multi_feature: f32,
}

impl Default for CostScales {
    fn default() -> Self {
        Self {
            position: 1.0,
            direction: 0.25,
            multi_feature: 1.5,
        }
    }
}

impl CostScales {
    fn validate(&self) -> Result<()> {
        if [self.position, self.direction, self.multi_feature]
            .iter()
            .any(|s| !(*s > 0.0))
        {
            return Err(anyhow!("cost scales must be positive"));
        }
        Ok(())
    }
}

fn check_weights(name: &str, weights: &[f32]) -> Result<()> {
    if weights.iter().any(|w| !(*w >= 0.0)) {
        return Err(anyhow!("{name} weights must be non-negative: {weights:?}"));
    }
    let sum: f32 = weights.iter().sum();
    if (sum - 1.0).abs() > 1e-3 {
        return Err(anyhow!("{name} weights must sum to 1, got {sum}"));
    }
    Ok(())
}

/// Tolerances are in palm-width units unless stated otherwise.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub enabled: bool,
    /// Longest/shortest frame count ratio still considered comparable.
    pub frame_ratio_tolerance: f32,
    pub displacement_tolerance: f32,
    pub displacement_relative: f32,
    pub extent_tolerance: f32,
    pub extent_relative: f32,
    pub speed_ratio_tolerance: f32,
    /// Below this mean speed both sequences count as still and speed is not compared.
    pub speed_floor: f32,
    /// Summary-space distance within which a template must never be pruned by clustering.
    pub match_radius: f32,
    pub min_candidates: usize,
    pub min_templates_for_clustering: usize,
    pub kmeans_iterations: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            frame_ratio_tolerance: 3.0,
            displacement_tolerance: 1.0,
            displacement_relative: 0.5,
            extent_tolerance: 1.0,
            extent_relative: 0.5,
            speed_ratio_tolerance: 2.5,
            speed_floor: 0.5,
            match_radius: 2.0,
            min_candidates: 8,
            min_templates_for_clustering: 16,
            kmeans_iterations: 20,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub features: usize,
    pub distances: usize,
    pub results: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            features: 1024,
            distances: 8192,
            results: 256,
        }
    }
}

/// Sliding window used when matching a live frame stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub max_frames: usize,
    /// Frames between match attempts once the window is long enough.
    pub stride: usize,
    pub min_confidence: f32,
    /// Seconds without frames after which the window starts over.
    pub max_gap: f64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            max_frames: 60,
            stride: 5,
            min_confidence: 0.2,
            max_gap: 0.5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MatcherConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.threshold, 0.80);
        assert_eq!(config.workers, 4);
        assert_eq!(config.dtw.weights.multi_feature, 0.5);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: MatcherConfig =
            serde_json::from_str(r#"{"threshold": 0.7, "dtw": {"band_ratio": null}}"#).unwrap();
        assert_eq!(config.threshold, 0.7);
        assert_eq!(config.dtw.band_ratio, None);
        assert_eq!(config.dtw.weights, EnsembleWeights::default());
        assert_eq!(config.min_frames, DEFAULT_MIN_FRAMES);
    }

    #[test]
    fn test_rejects_unbalanced_weights() {
        let mut config = MatcherConfig::default();
        config.dtw.weights.direction = 0.6;
        assert!(config.validate().is_err());

        let mut config = MatcherConfig::default();
        config.threshold = 1.2;
        assert!(config.validate().is_err());

        let mut config = MatcherConfig::default();
        config.min_frames = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_path_reports_missing_file() {
        let err = MatcherConfig::from_path(Path::new("/nonexistent/matcher.json")).unwrap_err();
        assert!(format!("{err:#}").contains("failed to read matcher config"));
    }
}
