use crate::config::Config;
use faceprint_core::{
    BoundingBox, EmbeddingPipeline, GalleryMatch, IdentityStore, InferenceEngine, LazyEngine,
    MatchResult, OnnxEngine, PipelineError, RegisteredIdentity, StoreError,
};
use faceprint_store::SqliteStore;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("{0}")]
    Pipeline(#[from] PipelineError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Snapshot of engine state for status reporting.
#[derive(Debug, Clone, Copy)]
pub struct EngineStatus {
    pub model_loaded: bool,
    pub identities: usize,
}

/// Face input shared by register/verify/identify requests.
#[derive(Debug, Clone)]
pub struct FaceInput {
    pub image_path: PathBuf,
    pub bounds: BoundingBox,
}

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Register {
        name: String,
        face: FaceInput,
        photo_ref: Option<String>,
        reply: Reply<RegisteredIdentity>,
    },
    Verify {
        id: String,
        face: FaceInput,
        reply: Reply<MatchResult>,
    },
    Identify {
        face: FaceInput,
        reply: Reply<Option<GalleryMatch>>,
    },
    List {
        reply: Reply<Vec<RegisteredIdentity>>,
    },
    Remove {
        id: String,
        reply: Reply<bool>,
    },
    Status {
        reply: Reply<EngineStatus>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Register the face in `face` under `name`.
    pub async fn register(
        &self,
        name: String,
        face: FaceInput,
        photo_ref: Option<String>,
    ) -> Result<RegisteredIdentity, EngineError> {
        self.request(|reply| EngineRequest::Register {
            name,
            face,
            photo_ref,
            reply,
        })
        .await
    }

    /// Verify the face in `face` against identity `id`.
    pub async fn verify(&self, id: String, face: FaceInput) -> Result<MatchResult, EngineError> {
        self.request(|reply| EngineRequest::Verify { id, face, reply })
            .await
    }

    /// Find the nearest registered identity.
    pub async fn identify(&self, face: FaceInput) -> Result<Option<GalleryMatch>, EngineError> {
        self.request(|reply| EngineRequest::Identify { face, reply })
            .await
    }

    pub async fn list(&self) -> Result<Vec<RegisteredIdentity>, EngineError> {
        self.request(|reply| EngineRequest::List { reply }).await
    }

    pub async fn remove(&self, id: String) -> Result<bool, EngineError> {
        self.request(|reply| EngineRequest::Remove { id, reply })
            .await
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }
}

/// Open the identity database, prepare the recognition model and spawn the
/// engine thread.
///
/// The database is opened synchronously (fail-fast). The model is loaded on
/// the first request unless `eager_load` is set, in which case a missing or
/// broken model fails startup.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    if let Some(parent) = config.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                EngineError::Store(StoreError::Backend(Box::new(e)))
            })?;
        }
    }
    let store = SqliteStore::open(&config.db_path, config.pipeline.embedding_dim)?;

    let model_path = config.model_path.clone();
    let embedding_dim = config.pipeline.embedding_dim;
    let engine = LazyEngine::new(move || OnnxEngine::load(&model_path, embedding_dim));

    if config.eager_load {
        engine
            .get()
            .map_err(|e| EngineError::Pipeline(PipelineError::Engine(e)))?;
        tracing::info!(path = %config.model_path.display(), "recognition model loaded at startup");
    }

    let pipeline = EmbeddingPipeline::new(config.pipeline.clone(), engine);
    spawn_worker(pipeline, Box::new(store), |engine| engine.is_loaded())
}

/// Run `pipeline` and `store` on a dedicated OS thread, one request at a time.
pub fn spawn_worker<E>(
    pipeline: EmbeddingPipeline<E>,
    store: Box<dyn IdentityStore>,
    is_loaded: fn(&E) -> bool,
) -> Result<EngineHandle, EngineError>
where
    E: InferenceEngine + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("faceprint-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                handle_request(&pipeline, store.as_ref(), is_loaded, req);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn handle_request<E: InferenceEngine>(
    pipeline: &EmbeddingPipeline<E>,
    store: &dyn IdentityStore,
    is_loaded: fn(&E) -> bool,
    req: EngineRequest,
) {
    match req {
        EngineRequest::Register {
            name,
            face,
            photo_ref,
            reply,
        } => {
            let result = run_register(pipeline, store, &name, &face, photo_ref);
            let _ = reply.send(result);
        }
        EngineRequest::Verify { id, face, reply } => {
            let result = load_frame(&face).and_then(|frame| {
                Ok(pipeline.verify(store, &id, &frame, &face.bounds)?)
            });
            let _ = reply.send(result);
        }
        EngineRequest::Identify { face, reply } => {
            let result = load_frame(&face)
                .and_then(|frame| Ok(pipeline.identify(store, &frame, &face.bounds)?));
            let _ = reply.send(result);
        }
        EngineRequest::List { reply } => {
            let _ = reply.send(store.list().map_err(EngineError::from));
        }
        EngineRequest::Remove { id, reply } => {
            let result = store.remove(&id).map_err(EngineError::from);
            if let Ok(true) = result {
                tracing::info!(id = %id, "identity removed");
            }
            let _ = reply.send(result);
        }
        EngineRequest::Status { reply } => {
            let result = store.count().map_err(EngineError::from).map(|identities| EngineStatus {
                model_loaded: is_loaded(pipeline.engine()),
                identities,
            });
            let _ = reply.send(result);
        }
    }
}

fn run_register<E: InferenceEngine>(
    pipeline: &EmbeddingPipeline<E>,
    store: &dyn IdentityStore,
    name: &str,
    face: &FaceInput,
    photo_ref: Option<String>,
) -> Result<RegisteredIdentity, EngineError> {
    let frame = load_frame(face)?;
    let identity = pipeline.register(store, name, &frame, &face.bounds, photo_ref)?;
    Ok(identity)
}

fn load_frame(face: &FaceInput) -> Result<image::DynamicImage, EngineError> {
    let frame = image::open(&face.image_path)?;
    tracing::debug!(
        path = %face.image_path.display(),
        width = frame.width(),
        height = frame.height(),
        "decoded frame"
    );
    Ok(frame)
}
