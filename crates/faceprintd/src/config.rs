use faceprint_core::PipelineConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Which D-Bus bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    Session,
    System,
}

/// Daemon configuration.
///
/// Layered: built-in defaults, then the TOML file named by `FACEPRINT_CONFIG`
/// (if set), then `FACEPRINT_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// ONNX recognition model.
    pub model_path: PathBuf,
    /// SQLite identity database.
    pub db_path: PathBuf,
    pub bus: BusKind,
    /// Minimum spacing between verify/identify attempts.
    pub min_verify_interval_ms: u64,
    /// Load the model at startup instead of on the first request.
    pub eager_load: bool,
    pub pipeline: PipelineConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            model_path: data_dir.join("models").join("recognition.onnx"),
            db_path: data_dir.join("identities.db"),
            bus: BusKind::Session,
            min_verify_interval_ms: 1000,
            eager_load: false,
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the optional TOML file and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("FACEPRINT_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Override fields from `FACEPRINT_*` variables. Unparseable values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("FACEPRINT_MODEL_PATH") {
            self.model_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEPRINT_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        match lookup("FACEPRINT_BUS").as_deref() {
            Some("system") => self.bus = BusKind::System,
            Some("session") => self.bus = BusKind::Session,
            _ => {}
        }
        if let Some(v) = parse(&lookup, "FACEPRINT_MIN_VERIFY_INTERVAL_MS") {
            self.min_verify_interval_ms = v;
        }
        if let Some(v) = lookup("FACEPRINT_EAGER_LOAD") {
            self.eager_load = v != "0";
        }
        if let Some(v) = parse(&lookup, "FACEPRINT_SIMILARITY_THRESHOLD") {
            self.pipeline.similarity_threshold = v;
        }
    }
}

fn parse<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.parse().ok())
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("faceprint")
}
