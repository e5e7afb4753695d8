use std::path::PathBuf;

use thiserror::Error;

use crate::window::IndexWindow;

#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Window {window} is out of range for {len} stations")]
    IndexOutOfRange { window: IndexWindow, len: usize },

    #[error("Request from {origin} to {destination} failed: {cause}")]
    RequestFailed {
        origin: IndexWindow,
        destination: IndexWindow,
        cause: String,
    },

    #[error("Snapshot {path} is corrupt: {reason}")]
    SnapshotCorrupt { path: PathBuf, reason: String },

    #[error("Missing credential: {0} is not set")]
    MissingCredential(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
