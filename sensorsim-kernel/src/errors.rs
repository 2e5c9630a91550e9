use crate::models::ChannelId;

/// Erreurs possibles lors des opérations sur les drivers et le modèle machine
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("Unsupported channel kind: {0}")]
    UnsupportedKind(String),
    #[error("Malformed driver record: {0}")]
    MalformedRecord(String),
    #[error("Channel already exists: {0}")]
    DuplicateChannel(ChannelId),
    #[error("Channel not found: {0}")]
    UnknownChannel(ChannelId),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type SimResult<T> = Result<T, SimError>;
