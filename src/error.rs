// Camwarden Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WardenError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Worker already running for device {0}")]
    WorkerExists(i64),

    #[error("Thread spawn failed: {0}")]
    ThreadSpawn(String),

    #[error("Invalid storage location: {0}")]
    InvalidStorage(String),

    #[error("Frame decode error: {0}")]
    FrameDecode(String),

    #[error("License expired: {0}")]
    LicenseExpired(String),

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for WardenError {
    fn from(err: anyhow::Error) -> Self {
        WardenError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WardenError>;
