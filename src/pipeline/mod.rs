pub mod features;
pub mod preprocess;
pub mod smoothing;
pub mod worker;

// Re-exports for convenience
pub use features::{FeatureSet, MotionSummary, extract};
pub use preprocess::{NormalizedSequence, normalize};
pub use smoothing::{LandmarkSmoother, OneEuroFilter, smooth};
pub use worker::{FrameWindow, start_match_worker};

use crate::{config::MatcherConfig, error::MatchError, types::Sequence};

/// Normalize, smooth, extract.
pub fn prepare(sequence: &Sequence, config: &MatcherConfig) -> Result<FeatureSet, MatchError> {
    let normalized = normalize(sequence)?;
    let smoothed = smooth(&normalized, &config.smoothing);
    Ok(extract(&smoothed))
}
