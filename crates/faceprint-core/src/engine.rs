//! Recognition model contract, ONNX Runtime adapter and one-time loader.
//!
//! The model consumes a `[1, 3, 112, 112]` f32 tensor and produces a
//! `[1, 512]` f32 embedding. Loading is expensive, so [`LazyEngine`] runs the
//! loader at most once; callers arriving during the load block until it
//! finishes and then share the same handle.

use crate::normalize::NormalizedTensor;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::{Mutex, OnceLock, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference engine unavailable: {0}")]
    Unavailable(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("expected {expected}-dim embedding, got {actual}")]
    OutputShape { expected: usize, actual: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Maps a normalized tensor to a raw (unnormalized) embedding.
pub trait InferenceEngine: Send + Sync {
    fn infer(&self, input: &NormalizedTensor) -> Result<Vec<f32>, EngineError>;
}

/// Recognition model served by ONNX Runtime.
pub struct OnnxEngine {
    // `Session::run` needs exclusive access.
    session: Mutex<Session>,
    embedding_dim: usize,
}

impl OnnxEngine {
    /// Load the recognition model from `model_path`.
    pub fn load(model_path: &Path, embedding_dim: usize) -> Result<Self, EngineError> {
        if !model_path.exists() {
            return Err(EngineError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            embedding_dim,
            "loaded recognition model"
        );

        Ok(Self {
            session: Mutex::new(session),
            embedding_dim,
        })
    }
}

impl InferenceEngine for OnnxEngine {
    fn infer(&self, input: &NormalizedTensor) -> Result<Vec<f32>, EngineError> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| EngineError::Unavailable("session lock poisoned".into()))?;

        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EngineError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != self.embedding_dim {
            return Err(EngineError::OutputShape {
                expected: self.embedding_dim,
                actual: raw.len(),
            });
        }

        let embedding = raw.to_vec();
        Ok(embedding)
    }
}

type Loader<E> = Box<dyn Fn() -> Result<E, EngineError> + Send + Sync>;

/// Engine handle initialized on first use, exactly once.
///
/// A failed load is reported as [`EngineError::Unavailable`] and leaves the
/// handle empty, so a later call retries.
pub struct LazyEngine<E> {
    engine: OnceLock<E>,
    init: Mutex<()>,
    loader: Loader<E>,
}

impl<E: InferenceEngine> LazyEngine<E> {
    pub fn new(loader: impl Fn() -> Result<E, EngineError> + Send + Sync + 'static) -> Self {
        Self {
            engine: OnceLock::new(),
            init: Mutex::new(()),
            loader: Box::new(loader),
        }
    }

    /// Wrap an engine that is already loaded.
    pub fn ready(engine: E) -> Self {
        let lazy = Self::new(|| Err(EngineError::Unavailable("engine already provided".into())));
        let _ = lazy.engine.set(engine);
        lazy
    }

    /// Return the engine, loading it if no caller has yet.
    pub fn get(&self) -> Result<&E, EngineError> {
        if let Some(engine) = self.engine.get() {
            return Ok(engine);
        }

        let _guard = self.init.lock().unwrap_or_else(PoisonError::into_inner);

        // Another caller may have finished loading while we waited.
        if let Some(engine) = self.engine.get() {
            return Ok(engine);
        }

        tracing::info!("initializing inference engine");
        let engine = (self.loader)().map_err(|e| {
            tracing::warn!(error = %e, "inference engine failed to initialize");
            match e {
                EngineError::Unavailable(msg) => EngineError::Unavailable(msg),
                other => EngineError::Unavailable(other.to_string()),
            }
        })?;

        Ok(self.engine.get_or_init(|| engine))
    }

    pub fn is_loaded(&self) -> bool {
        self.engine.get().is_some()
    }
}

impl<E: InferenceEngine> InferenceEngine for LazyEngine<E> {
    fn infer(&self, input: &NormalizedTensor) -> Result<Vec<f32>, EngineError> {
        self.get()?.infer(input)
    }
}
