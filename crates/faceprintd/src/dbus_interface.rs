use crate::engine::{EngineError, EngineHandle, FaceInput};
use crate::throttle::Throttle;
use chrono::{DateTime, Utc};
use faceprint_core::{BoundingBox, PipelineError, RegisteredIdentity};
use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use zbus::fdo;
use zbus::interface;

pub const BUS_NAME: &str = "org.faceprint.Faceprint1";
pub const OBJECT_PATH: &str = "/org/faceprint/Faceprint1";

/// D-Bus interface for the faceprint daemon.
///
/// Bus name: org.faceprint.Faceprint1
/// Object path: /org/faceprint/Faceprint1
pub struct FaceprintService {
    engine: EngineHandle,
    throttle: Throttle,
}

impl FaceprintService {
    pub fn new(engine: EngineHandle, min_verify_interval: Duration) -> Self {
        Self {
            engine,
            throttle: Throttle::new(min_verify_interval),
        }
    }

    fn check_throttle(&self) -> fdo::Result<()> {
        self.throttle.try_acquire(Instant::now()).map_err(|wait| {
            tracing::warn!(retry_after_ms = wait.as_millis() as u64, "attempt throttled");
            fdo::Error::LimitsExceeded(format!(
                "too many attempts, retry in {} ms",
                wait.as_millis()
            ))
        })
    }
}

/// Identity as reported over D-Bus; the signature stays inside the daemon.
#[derive(Debug, Serialize)]
struct IdentitySummary {
    id: String,
    name: String,
    photo_ref: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<RegisteredIdentity> for IdentitySummary {
    fn from(identity: RegisteredIdentity) -> Self {
        Self {
            id: identity.id,
            name: identity.name,
            photo_ref: identity.photo_ref,
            created_at: identity.created_at,
        }
    }
}

#[interface(name = "org.faceprint.Faceprint1")]
impl FaceprintService {
    /// Register the face inside (x, y, w, h) of the image at `image_path`.
    /// Returns the new identity id. An empty `photo_ref` is stored as none.
    #[allow(clippy::too_many_arguments)]
    async fn register(
        &self,
        name: &str,
        image_path: &str,
        x: f64,
        y: f64,
        w: f64,
        h: f64,
        photo_ref: &str,
    ) -> fdo::Result<String> {
        tracing::info!(name, image_path, "register requested");
        let face = face_input(image_path, x, y, w, h)?;
        let photo_ref = (!photo_ref.is_empty()).then(|| photo_ref.to_string());

        let identity = self
            .engine
            .register(name.to_string(), face, photo_ref)
            .await
            .map_err(to_fdo_error)?;
        Ok(identity.id)
    }

    /// Compare the face against identity `id`. Returns a JSON match result.
    async fn verify(
        &self,
        id: &str,
        image_path: &str,
        x: f64,
        y: f64,
        w: f64,
        h: f64,
    ) -> fdo::Result<String> {
        tracing::info!(id, image_path, "verify requested");
        let face = face_input(image_path, x, y, w, h)?;
        self.check_throttle()?;

        let result = self
            .engine
            .verify(id.to_string(), face)
            .await
            .map_err(to_fdo_error)?;
        to_json(&result)
    }

    /// Find the nearest registered identity. Returns JSON, `null` when none
    /// are registered.
    async fn identify(
        &self,
        image_path: &str,
        x: f64,
        y: f64,
        w: f64,
        h: f64,
    ) -> fdo::Result<String> {
        tracing::info!(image_path, "identify requested");
        let face = face_input(image_path, x, y, w, h)?;
        self.check_throttle()?;

        let best = self.engine.identify(face).await.map_err(to_fdo_error)?;
        to_json(&best)
    }

    async fn list_identities(&self) -> fdo::Result<String> {
        let identities = self.engine.list().await.map_err(to_fdo_error)?;
        let summaries: Vec<IdentitySummary> =
            identities.into_iter().map(IdentitySummary::from).collect();
        to_json(&summaries)
    }

    async fn remove_identity(&self, id: &str) -> fdo::Result<bool> {
        tracing::info!(id, "remove requested");
        self.engine
            .remove(id.to_string())
            .await
            .map_err(to_fdo_error)
    }

    /// Return daemon status information.
    async fn status(&self) -> fdo::Result<String> {
        let status = self.engine.status().await.map_err(to_fdo_error)?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "model_loaded": status.model_loaded,
            "identities": status.identities,
        })
        .to_string())
    }
}

fn face_input(image_path: &str, x: f64, y: f64, w: f64, h: f64) -> fdo::Result<FaceInput> {
    let image_path = PathBuf::from(image_path);
    if !image_path.is_absolute() {
        return Err(fdo::Error::InvalidArgs(format!(
            "image path must be absolute: {}",
            image_path.display()
        )));
    }
    if ![x, y, w, h].iter().all(|v| v.is_finite()) {
        return Err(fdo::Error::InvalidArgs(
            "bounding box must be finite".into(),
        ));
    }
    Ok(FaceInput {
        image_path,
        bounds: BoundingBox::new(x as f32, y as f32, w as f32, h as f32),
    })
}

fn to_json<T: Serialize>(value: &T) -> fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| fdo::Error::Failed(e.to_string()))
}

fn to_fdo_error(err: EngineError) -> fdo::Error {
    tracing::warn!(error = %err, "request failed");
    match err {
        EngineError::Image(e) => fdo::Error::InvalidArgs(format!("cannot read image: {e}")),
        EngineError::Pipeline(
            e @ (PipelineError::UnknownIdentity(_)
            | PipelineError::EmptyName
            | PipelineError::EmptyCrop { .. }),
        ) => fdo::Error::InvalidArgs(e.to_string()),
        other => fdo::Error::Failed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faceprint_core::{Signature, StoreError};

    #[test]
    fn test_face_input_requires_absolute_path() {
        assert!(matches!(
            face_input("frame.png", 0.0, 0.0, 10.0, 10.0),
            Err(fdo::Error::InvalidArgs(_))
        ));
        let face = face_input("/tmp/frame.png", 1.5, 2.0, 30.0, 40.0).unwrap();
        assert_eq!(face.bounds, BoundingBox::new(1.5, 2.0, 30.0, 40.0));
    }

    #[test]
    fn test_face_input_rejects_nan() {
        assert!(face_input("/tmp/frame.png", f64::NAN, 0.0, 10.0, 10.0).is_err());
        assert!(face_input("/tmp/frame.png", 0.0, 0.0, f64::INFINITY, 10.0).is_err());
    }

    #[test]
    fn test_error_mapping() {
        let unknown = EngineError::Pipeline(PipelineError::UnknownIdentity("ghost".into()));
        assert!(matches!(to_fdo_error(unknown), fdo::Error::InvalidArgs(_)));

        let store = EngineError::Store(StoreError::DuplicateId("a".into()));
        assert!(matches!(to_fdo_error(store), fdo::Error::Failed(_)));

        assert!(matches!(
            to_fdo_error(EngineError::ChannelClosed),
            fdo::Error::Failed(_)
        ));
    }

    #[test]
    fn test_summary_omits_signature() {
        let identity = RegisteredIdentity {
            id: "abc".into(),
            name: "alice".into(),
            signature: Signature::new(vec![1.0, 0.0]),
            photo_ref: None,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(IdentitySummary::from(identity)).unwrap();
        assert_eq!(json["id"], "abc");
        assert_eq!(json["name"], "alice");
        assert!(json.get("signature").is_none());
    }
}
