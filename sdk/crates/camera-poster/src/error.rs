//! Error types for capture, upload, configuration and setup.

use std::path::PathBuf;
use thiserror::Error;

/// Failures while acquiring the camera stream.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera capture is not supported on this platform or connection; a secure context may be required")]
    Unsupported,

    #[error("camera access was denied: {0}")]
    Denied(String),

    #[error("camera device error: {0}")]
    Device(String),
}

/// Failures while submitting a still frame.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload rejected with HTTP status {0}")]
    Status(u16),

    #[error("upload transport failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upload response was not a JSON object: {0}")]
    UnexpectedBody(String),

    #[error("failed to encode still frame: {0}")]
    Encode(#[from] image::ImageError),
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Frame width must be between {min} and {max}, got {width}")]
    FrameWidthOutOfRange { width: u32, min: u32, max: u32 },
}

/// Errors from setting up or driving a widget.
#[derive(Debug, Error)]
pub enum WidgetError {
    #[error("invalid upload destination {url:?}: {reason}")]
    InvalidDestination { url: String, reason: String },

    #[error("invalid widget configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to start widget runtime: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("camera widget is not running")]
    NotRunning,
}
