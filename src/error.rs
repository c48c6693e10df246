//! Error types for the vigil detection service
//!
//! One structured error enum covers the major failure domains: capture,
//! inference, recording, messaging, storage and the vision collaborator.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the vigil detection service
#[derive(Error, Debug)]
pub enum VigilError {
    // Configuration errors
    #[error("Configuration file not readable: {0}")]
    ConfigRead(PathBuf),

    #[error("Configuration parsing failed: {0}")]
    ConfigParse(String),

    #[error("Invalid configuration value: {field} = {value}")]
    InvalidConfigValue { field: String, value: String },

    // Capture pipeline errors
    #[error("Capture pipeline error: {0}")]
    Pipeline(String),

    #[error("Stream connection failed: {0}")]
    StreamConnectionFailed(String),

    // Inference errors
    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Model not loaded")]
    ModelNotLoaded,

    #[error("Inference execution failed: {0}")]
    Inference(String),

    #[error("Invalid model output: {0}")]
    InvalidOutput(String),

    // Recording and snapshot errors
    #[error("Recording error: {0}")]
    Recording(String),

    #[error("Snapshot encoding failed: {0}")]
    Snapshot(String),

    // Collaborator errors
    #[error("Message bus error: {0}")]
    Bus(String),

    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Vision request failed: {0}")]
    Vision(String),

    // I/O
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for convenience
pub type VigilResult<T> = std::result::Result<T, VigilError>;

impl From<toml::de::Error> for VigilError {
    fn from(err: toml::de::Error) -> Self {
        VigilError::ConfigParse(err.to_string())
    }
}

impl From<gstreamer::glib::Error> for VigilError {
    fn from(err: gstreamer::glib::Error) -> Self {
        VigilError::Pipeline(err.to_string())
    }
}

impl From<gstreamer::StateChangeError> for VigilError {
    fn from(err: gstreamer::StateChangeError) -> Self {
        VigilError::Pipeline(err.to_string())
    }
}
