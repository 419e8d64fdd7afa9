//! Real-time matching of recorded hand gestures against user templates.
//!
//! A gesture is a sequence of 21-landmark hand frames. Each sequence is normalized for
//! position, rotation and hand size, smoothed, turned into position, velocity and
//! acceleration channels, and scored against candidate templates with an ensemble of
//! DTW variants. A k-means index and three LRU caches keep per-query work small.

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod index;
pub mod matcher;
pub mod pipeline;
pub mod similarity;
pub mod store;
pub mod synthetic;
pub mod types;

pub use config::MatcherConfig;
pub use context::MatchingContext;
pub use error::MatchError;
pub use matcher::{CancelToken, GestureMatcher, MatchOptions};
pub use store::{InMemoryTemplateStore, TemplateEvent, TemplateStore};
pub use types::{
    Frame, Handedness, MatchResult, NoMatchReason, Sequence, SubScores, Template, TemplateId,
    TemplateMeta,
};
