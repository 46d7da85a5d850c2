//! Error types for the terrain renderer

use thiserror::Error;

/// Main error type for the renderer
#[derive(Debug, Error)]
pub enum Error {
    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Invalid heightfield: {0}")]
    InvalidHeightfield(String),

    #[error("Unknown render parameter '{0}'")]
    UnknownParameter(String),

    #[error("Invalid value '{value}' for render parameter '{name}'")]
    InvalidParameter { name: String, value: String },

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}
