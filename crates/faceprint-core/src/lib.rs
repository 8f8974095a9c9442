//! faceprint-core: Face signature pipeline and similarity matching.
//!
//! Turns a detector bounding box and a frame into a unit-length 512-d
//! signature (crop → normalize → ONNX inference → L2 normalization) and
//! decides matches by cosine similarity against a fixed threshold.

pub mod config;
pub mod crop;
pub mod embedding;
pub mod engine;
pub mod matcher;
pub mod normalize;
pub mod pipeline;
pub mod store;
pub mod types;

pub use config::PipelineConfig;
pub use crop::CropRegionCalculator;
pub use embedding::EmbeddingPostProcessor;
pub use engine::{EngineError, InferenceEngine, LazyEngine, OnnxEngine};
pub use matcher::{MatchError, SimilarityMatcher};
pub use normalize::{ImageNormalizer, NormalizedTensor};
pub use pipeline::{EmbeddingPipeline, PipelineError};
pub use store::{IdentityStore, MemoryStore, StoreError};
pub use types::{
    BoundingBox, CropRegion, FrameSize, GalleryMatch, MatchResult, RegisteredIdentity, Signature,
};
