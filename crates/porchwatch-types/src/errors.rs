use thiserror::Error;

pub type Result<T, E = PorchwatchError> = std::result::Result<T, E>;

/// Unified error type covering common failure scenarios across subsystems.
#[derive(Debug, Error)]
pub enum PorchwatchError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("capture error: {0}")]
    Capture(String),
    #[error("sensor error: {0}")]
    Sensor(String),
    #[error("detection error: {0}")]
    Detection(String),
    #[error("no frames buffered; nothing to promote")]
    EmptyBuffer,
    #[error("encoding error: {0}")]
    Encoding(String),
    #[error("relay error: {0}")]
    Relay(String),
    #[error("transcoder launch failed: {0}")]
    Launch(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("notification error: {0}")]
    Notification(String),
    #[error("engine error: {0}")]
    Engine(String),
    #[error("operational error: {0}")]
    Ops(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PorchwatchError {
    /// Short, stable name of the error kind, used in bus events and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PorchwatchError::Configuration(_) => "configuration",
            PorchwatchError::Capture(_) => "capture",
            PorchwatchError::Sensor(_) => "sensor",
            PorchwatchError::Detection(_) => "detection",
            PorchwatchError::EmptyBuffer => "empty_buffer",
            PorchwatchError::Encoding(_) => "encoding",
            PorchwatchError::Relay(_) => "relay",
            PorchwatchError::Launch(_) => "launch",
            PorchwatchError::Storage(_) => "storage",
            PorchwatchError::Notification(_) => "notification",
            PorchwatchError::Engine(_) => "engine",
            PorchwatchError::Ops(_) => "ops",
            PorchwatchError::Io(_) => "io",
            PorchwatchError::Other(_) => "other",
        }
    }
}
