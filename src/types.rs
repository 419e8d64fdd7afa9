use std::{
    collections::hash_map::DefaultHasher,
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::error::MatchError;

pub const NUM_LANDMARKS: usize = 21;

pub const WRIST: usize = 0;
pub const THUMB_CMC: usize = 1;
pub const INDEX_MCP: usize = 5;
pub const MIDDLE_MCP: usize = 9;
pub const RING_MCP: usize = 13;
pub const PINKY_MCP: usize = 17;

/// Landmarks that stay rigid while the fingers articulate.
pub const PALM_LANDMARKS: [usize; 6] = [WRIST, THUMB_CMC, INDEX_MCP, MIDDLE_MCP, RING_MCP, PINKY_MCP];

pub type Landmark = [f32; 3];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Handedness {
    Left,
    Right,
}

impl Handedness {
    pub fn label(&self) -> &'static str {
        match self {
            Handedness::Left => "left",
            Handedness::Right => "right",
        }
    }

    /// Maps a tracker handedness score (probability of a right hand) onto a label.
    pub fn from_score(score: f32) -> Self {
        if score >= 0.5 {
            Handedness::Right
        } else {
            Handedness::Left
        }
    }
}

/// One sampled instant of a tracked hand.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub landmarks: Vec<Landmark>,
    pub handedness: Handedness,
    pub confidence: f32,
    /// Seconds since an arbitrary, per-sequence epoch.
    pub timestamp: f64,
}

impl Frame {
    pub fn validate(&self, index: usize) -> Result<(), MatchError> {
        if self.landmarks.len() != NUM_LANDMARKS {
            return Err(MatchError::malformed(
                index,
                format!(
                    "expected {NUM_LANDMARKS} landmarks, got {}",
                    self.landmarks.len()
                ),
            ));
        }
        if let Some(k) = self
            .landmarks
            .iter()
            .position(|p| p.iter().any(|c| !c.is_finite()))
        {
            return Err(MatchError::malformed(
                index,
                format!("landmark {k} has a non-finite coordinate"),
            ));
        }
        if !self.timestamp.is_finite() {
            return Err(MatchError::malformed(index, "timestamp is not finite"));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(MatchError::malformed(
                index,
                format!("confidence {} outside [0, 1]", self.confidence),
            ));
        }
        Ok(())
    }
}

/// One gesture performance: frames in capture order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    pub frames: Vec<Frame>,
}

impl Sequence {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self { frames }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Every frame must be well formed and timestamps must never decrease. Equal timestamps
    /// are allowed.
    pub fn validate(&self) -> Result<(), MatchError> {
        let mut previous = f64::NEG_INFINITY;
        for (index, frame) in self.frames.iter().enumerate() {
            frame.validate(index)?;
            if frame.timestamp < previous {
                return Err(MatchError::malformed(
                    index,
                    format!(
                        "timestamp {} is earlier than the previous frame's {previous}",
                        frame.timestamp
                    ),
                ));
            }
            previous = frame.timestamp;
        }
        Ok(())
    }

    /// Majority handedness label; ties go to the first frame's label.
    pub fn handedness(&self) -> Option<Handedness> {
        let first = self.frames.first()?.handedness;
        let right = self
            .frames
            .iter()
            .filter(|f| f.handedness == Handedness::Right)
            .count();
        let left = self.frames.len() - right;
        Some(match right.cmp(&left) {
            std::cmp::Ordering::Greater => Handedness::Right,
            std::cmp::Ordering::Less => Handedness::Left,
            std::cmp::Ordering::Equal => first,
        })
    }

    pub fn duration(&self) -> f64 {
        match (self.frames.first(), self.frames.last()) {
            (Some(first), Some(last)) => (last.timestamp - first.timestamp).max(0.0),
            _ => 0.0,
        }
    }

    /// Stable hash of everything the matching pipeline reads from the sequence.
    pub fn content_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.frames.len().hash(&mut hasher);
        for frame in &self.frames {
            frame.timestamp.to_bits().hash(&mut hasher);
            frame.handedness.hash(&mut hasher);
            frame.landmarks.len().hash(&mut hasher);
            for point in &frame.landmarks {
                for c in point {
                    c.to_bits().hash(&mut hasher);
                }
            }
        }
        hasher.finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(pub u64);

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateMeta {
    pub user_id: String,
    pub name: String,
    pub action: String,
    pub context: String,
    pub active: bool,
    /// Unix seconds.
    pub created_at: u64,
}

impl Default for TemplateMeta {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            name: String::new(),
            action: String::new(),
            context: String::new(),
            active: true,
            created_at: 0,
        }
    }
}

/// A recorded reference performance. The landmark payload is shared and never mutated.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    #[serde(default)]
    pub meta: TemplateMeta,
    pub sequence: Arc<Sequence>,
}

impl Template {
    pub fn new(id: u64, name: impl Into<String>, sequence: Sequence) -> Self {
        Self {
            id: TemplateId(id),
            meta: TemplateMeta {
                name: name.into(),
                ..TemplateMeta::default()
            },
            sequence: Arc::new(sequence),
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.meta.action = action.into();
        self
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SubScores {
    pub position: f32,
    pub direction: f32,
    pub multi_feature: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoMatchReason {
    BelowThreshold,
    InsufficientData,
    NoCandidates,
}

impl NoMatchReason {
    pub fn label(&self) -> &'static str {
        match self {
            NoMatchReason::BelowThreshold => "below threshold",
            NoMatchReason::InsufficientData => "insufficient data",
            NoMatchReason::NoCandidates => "no candidates",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub template_id: TemplateId,
    pub score: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheHits {
    /// The whole result came from the match-result cache.
    pub result: bool,
    pub features: usize,
    pub distances: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub template_id: Option<TemplateId>,
    pub template_name: Option<String>,
    pub action: Option<String>,
    /// Best ensemble score seen, reported even when it misses the threshold.
    pub score: f32,
    pub sub_scores: Option<SubScores>,
    pub reason: Option<NoMatchReason>,
    /// Highest scoring candidates, best first.
    pub ranked: Vec<RankedCandidate>,
    pub candidates_evaluated: usize,
    pub elapsed_ms: f64,
    pub cache: CacheHits,
}

impl MatchResult {
    pub fn no_match(reason: NoMatchReason) -> Self {
        Self {
            template_id: None,
            template_name: None,
            action: None,
            score: 0.0,
            sub_scores: None,
            reason: Some(reason),
            ranked: Vec::new(),
            candidates_evaluated: 0,
            elapsed_ms: 0.0,
            cache: CacheHits::default(),
        }
    }

    pub fn is_match(&self) -> bool {
        self.template_id.is_some()
    }

    pub fn display_text(&self) -> String {
        match (&self.template_id, &self.reason) {
            (Some(id), _) => format!(
                "{} {} ({:.0}%)",
                self.template_name.as_deref().unwrap_or("template"),
                id,
                self.score * 100.0
            ),
            (None, Some(reason)) => {
                format!("no match: {} ({:.0}%)", reason.label(), self.score * 100.0)
            }
            (None, None) => "no match".to_string(),
        }
    }
}
