//! Error types for voxd.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoxdError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    #[error("Audio playback failed: {message}")]
    AudioPlayback { message: String },

    // Backend errors
    #[error("Transcription model not found at {path}")]
    SttModelNotFound { path: String },

    #[error("Transcription failed: {message}")]
    Transcription { message: String },

    #[error("Generation failed: {message}")]
    Generation { message: String },

    #[error("Synthesis failed: {message}")]
    Synthesis { message: String },

    // Pipeline errors
    #[error("Pipeline error: {message}")]
    Pipeline { message: String },

    #[error("Timed out waiting for {operation}")]
    Timeout { operation: String },

    // IPC errors
    #[error("IPC socket error: {message}")]
    IpcSocket { message: String },

    #[error("IPC protocol error: {message}")]
    IpcProtocol { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, VoxdError>;
