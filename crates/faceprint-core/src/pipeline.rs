//! Crop → normalize → infer → post-process → match.
//!
//! [`EmbeddingPipeline`] is built once with a [`PipelineConfig`] and an
//! inference engine, then shared by reference. Every stage is a pure function
//! of its input; per-call buffers (cropped image, resized image, luma plane,
//! tensor) are scoped to the call and dropped before it returns.

use crate::config::PipelineConfig;
use crate::crop::CropRegionCalculator;
use crate::embedding::EmbeddingPostProcessor;
use crate::engine::{EngineError, InferenceEngine};
use crate::matcher::{MatchError, SimilarityMatcher};
use crate::normalize::{ImageNormalizer, NormalizeError, NormalizedTensor};
use crate::store::{IdentityStore, StoreError};
use crate::types::{
    BoundingBox, CropRegion, FrameSize, GalleryMatch, MatchResult, RegisteredIdentity, Signature,
};
use chrono::Utc;
use image::DynamicImage;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("normalization: {0}")]
    Normalize(#[from] NormalizeError),
    #[error("engine: {0}")]
    Engine(#[from] EngineError),
    #[error("match: {0}")]
    Match(#[from] MatchError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("frame {width}x{height} is too small to crop")]
    EmptyCrop { width: u32, height: u32 },
    #[error("signature has zero norm and cannot be registered")]
    DegenerateSignature,
    #[error("identity name must not be empty")]
    EmptyName,
    #[error("unknown identity: {0}")]
    UnknownIdentity(String),
}

/// The embedding and matching pipeline.
pub struct EmbeddingPipeline<E> {
    config: PipelineConfig,
    cropper: CropRegionCalculator,
    normalizer: ImageNormalizer,
    post_processor: EmbeddingPostProcessor,
    matcher: SimilarityMatcher,
    engine: E,
}

impl<E: InferenceEngine> EmbeddingPipeline<E> {
    pub fn new(config: PipelineConfig, engine: E) -> Self {
        Self {
            cropper: CropRegionCalculator::new(&config),
            normalizer: ImageNormalizer::new(&config),
            post_processor: EmbeddingPostProcessor,
            matcher: SimilarityMatcher::new(config.similarity_threshold),
            config,
            engine,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn matcher(&self) -> &SimilarityMatcher {
        &self.matcher
    }

    /// Crop region for `bounds` inside a frame of the given size.
    pub fn crop_region(&self, bounds: &BoundingBox, frame: FrameSize) -> CropRegion {
        self.cropper.compute(bounds, frame)
    }

    /// Crop and normalize the face at `bounds`, producing the model input.
    pub fn prepare(
        &self,
        frame: &DynamicImage,
        bounds: &BoundingBox,
    ) -> Result<(CropRegion, NormalizedTensor), PipelineError> {
        let size = FrameSize::new(frame.width(), frame.height());
        let region = self.cropper.compute(bounds, size);
        if region.width == 0 || region.height == 0 {
            return Err(PipelineError::EmptyCrop {
                width: size.width,
                height: size.height,
            });
        }

        let face = frame.crop_imm(region.x, region.y, region.width, region.height);
        let tensor = self.normalizer.normalize(&face)?;
        Ok((region, tensor))
    }

    /// Compute the unit-length signature of the face at `bounds`.
    pub fn embed(
        &self,
        frame: &DynamicImage,
        bounds: &BoundingBox,
    ) -> Result<Signature, PipelineError> {
        let (region, raw) = {
            let (region, tensor) = self.prepare(frame, bounds)?;
            (region, self.engine.infer(&tensor)?)
        };

        if raw.len() != self.config.embedding_dim {
            return Err(EngineError::OutputShape {
                expected: self.config.embedding_dim,
                actual: raw.len(),
            }
            .into());
        }
        if let Some(index) = raw.iter().position(|v| !v.is_finite()) {
            return Err(EngineError::InferenceFailed(format!(
                "non-finite embedding value at index {index}"
            ))
            .into());
        }

        let signature = self.post_processor.post_process(raw);
        tracing::debug!(?region, dim = signature.dim(), "signature computed");
        Ok(signature)
    }

    /// Compare two signatures with the configured threshold.
    pub fn compare(&self, a: &Signature, b: &Signature) -> Result<MatchResult, PipelineError> {
        Ok(self.matcher.compare(a, b)?)
    }

    /// Register the face at `bounds` under `name`.
    ///
    /// The signature is computed completely before the single store write;
    /// on any earlier failure the store is left untouched.
    pub fn register(
        &self,
        store: &dyn IdentityStore,
        name: &str,
        frame: &DynamicImage,
        bounds: &BoundingBox,
        photo_ref: Option<String>,
    ) -> Result<RegisteredIdentity, PipelineError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PipelineError::EmptyName);
        }

        let signature = self.embed(frame, bounds)?;
        if signature.norm() == 0.0 {
            return Err(PipelineError::DegenerateSignature);
        }

        let identity = RegisteredIdentity {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            signature,
            photo_ref,
            created_at: Utc::now(),
        };
        store.insert(&identity)?;

        tracing::info!(id = %identity.id, name = %identity.name, "identity registered");
        Ok(identity)
    }

    /// Verify the face at `bounds` against one registered identity.
    pub fn verify(
        &self,
        store: &dyn IdentityStore,
        id: &str,
        frame: &DynamicImage,
        bounds: &BoundingBox,
    ) -> Result<MatchResult, PipelineError> {
        let identity = store
            .get(id)?
            .ok_or_else(|| PipelineError::UnknownIdentity(id.to_string()))?;

        let probe = self.embed(frame, bounds)?;
        let result = self.matcher.compare(&probe, &identity.signature)?;

        tracing::info!(
            id,
            similarity = result.similarity,
            is_match = result.is_match,
            "verification complete"
        );
        Ok(result)
    }

    /// Find the registered identity nearest to the face at `bounds`.
    ///
    /// The probe is embedded before the gallery is read, so engine failures
    /// surface even when the store is empty. `None` when the store is empty.
    /// The nearest candidate is returned even below threshold; check
    /// `result.is_match`.
    pub fn identify(
        &self,
        store: &dyn IdentityStore,
        frame: &DynamicImage,
        bounds: &BoundingBox,
    ) -> Result<Option<GalleryMatch>, PipelineError> {
        let probe = self.embed(frame, bounds)?;

        let gallery = store.list()?;
        if gallery.is_empty() {
            return Ok(None);
        }
        let best = self.matcher.best_match(&probe, &gallery)?;

        if let Some(m) = &best {
            tracing::info!(
                id = %m.identity_id,
                similarity = m.result.similarity,
                is_match = m.result.is_match,
                gallery = gallery.len(),
                "identification complete"
            );
        }
        Ok(best)
    }
}
