//! Impulse response loading errors

use std::path::PathBuf;

use thiserror::Error;

/// Errors from opening, decoding or resampling a source file
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to open {path:?}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Unsupported audio format in {path:?}: {reason}")]
    UnsupportedFormat { path: PathBuf, reason: String },

    #[error("No audio track found in {0:?}")]
    NoAudioTrack(PathBuf),

    #[error("Failed to decode {path:?}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("{0:?} contains no audio frames")]
    Empty(PathBuf),

    #[error("Failed to resample {from}Hz -> {to}Hz: {reason}")]
    Resample { from: u32, to: u32, reason: String },
}

/// Result type for loader operations
pub type LoadResult<T> = Result<T, LoadError>;
