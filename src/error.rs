//! Error types for voxline.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoxlineError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Missing credential: set {name} in the environment")]
    MissingCredential { name: String },

    // Language model errors
    #[error("Model request failed: {message}")]
    ModelRequest { message: String },

    #[error("Model stream failed: {message}")]
    ModelStream { message: String },

    // Speech synthesis errors
    #[error("Speech synthesis failed ({status}): {message}")]
    Synthesis { status: String, message: String },

    // Transcription errors
    #[error("Speech recognizer error: {message}")]
    Recognizer { message: String },

    // Telephony errors
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Media stream protocol error: {message}")]
    Protocol { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, VoxlineError>;
