use thiserror::Error;

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("insufficient data: sequence has {frames} frames, need at least {min}")]
    InsufficientData { frames: usize, min: usize },

    #[error("malformed frame {index}: {reason}")]
    MalformedFrame { index: usize, reason: String },

    #[error("every frame in the sequence has degenerate palm geometry")]
    DegenerateGeometry,

    /// The template index is being rebuilt by another query.
    #[error("template index is mid-rebuild")]
    IndexStale,

    #[error("match cancelled")]
    Cancelled,

    #[error("matching failed: {0}")]
    Internal(String),
}

impl MatchError {
    pub fn malformed(index: usize, reason: impl Into<String>) -> Self {
        MatchError::MalformedFrame {
            index,
            reason: reason.into(),
        }
    }
}
