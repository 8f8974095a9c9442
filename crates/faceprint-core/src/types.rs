use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Axis-aligned face bounding box as reported by a detector, in frame pixels.
///
/// Detector output is noisy: coordinates may be negative and extents may
/// run past the frame edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }
}

/// Pixel dimensions of a source frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Integer crop rectangle guaranteed to lie strictly inside its frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRegion {
    /// Exclusive right edge.
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

/// Face signature vector (512-dimensional for the default recognition model).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub values: Vec<f32>,
}

impl Signature {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean (L2) norm.
    pub fn norm(&self) -> f32 {
        self.values
            .iter()
            .map(|&v| (v as f64) * (v as f64))
            .sum::<f64>()
            .sqrt() as f32
    }
}

/// A registered face identity with its persisted signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredIdentity {
    pub id: String,
    pub name: String,
    pub signature: Signature,
    /// Optional reference to an enrolment photo kept by the caller.
    pub photo_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of comparing two signatures.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Cosine similarity in [-1, 1].
    pub similarity: f32,
    /// `1 - similarity`.
    pub distance: f32,
    pub is_match: bool,
    /// `round(similarity * 100)`, unclamped. Only meaningful relative to the threshold.
    pub confidence_percent: i32,
}

impl MatchResult {
    /// Apply the inclusive decision rule `similarity >= threshold`.
    pub fn from_similarity(similarity: f32, threshold: f32) -> Self {
        Self {
            similarity,
            distance: 1.0 - similarity,
            is_match: similarity >= threshold,
            confidence_percent: (similarity * 100.0).round() as i32,
        }
    }
}

/// Best gallery candidate for a probe signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryMatch {
    pub identity_id: String,
    pub name: String,
    pub result: MatchResult,
}
