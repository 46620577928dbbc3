//! Error types for convolution engines
//!
//! These are the status codes an engine reports back to its owner. The engine
//! never panics on bad control input; it rejects it with one of these.

use thiserror::Error;

/// Errors reported by a convolution engine
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Engine construction parameters are unusable
    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    /// Channel index outside the engine's channel count
    #[error("Channel {channel} out of range (engine has {count} channels)")]
    ChannelOutOfRange { channel: usize, count: usize },

    /// The engine only routes input N to output N
    #[error("Routing input {input} to output {output} is not supported")]
    UnsupportedRouting { input: usize, output: usize },

    /// Impulse longer than the engine was created for
    #[error("Impulse of {length} frames exceeds the engine maximum of {max} frames")]
    ImpulseTooLong { length: usize, max: usize },

    /// Impulse needs more partition storage than is allocated, and
    /// reallocation was not permitted
    #[error("Impulse of {length} frames needs reallocation but only {capacity} frames are allocated")]
    AllocationTooSmall { length: usize, capacity: usize },

    /// FFT planning or execution failed
    #[error("FFT error: {0}")]
    Fft(String),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
