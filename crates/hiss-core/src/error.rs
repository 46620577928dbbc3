//! Node and graph error types

use thiserror::Error;

use crate::engine::EngineError;
use crate::loader::LoadError;

/// Errors surfaced to the control thread by nodes and the host graph
#[derive(Debug, Error)]
pub enum HissError {
    /// The engine factory refused to build an engine
    #[error("Failed to create convolution engine for '{node}': {source}")]
    EngineCreation { node: String, source: EngineError },

    /// The engine rejected one channel of an impulse response
    ///
    /// The node keeps the configuration it had before the load.
    #[error("Engine rejected the impulse for channel {channel}: {source}")]
    ImpulseRejected { channel: usize, source: EngineError },

    /// Impulse response holds no frames
    #[error("Impulse response is empty")]
    EmptyImpulse,

    /// Any other engine failure
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Impulse response source could not be decoded or resampled
    #[error("Failed to load impulse response: {0}")]
    Load(#[from] LoadError),

    /// Node is not part of the graph it was asked about
    #[error("Node '{0}' is not part of this graph")]
    NodeNotFound(String),

    /// Node's channel count differs from the graph it runs in
    #[error("Node '{node}' runs {node_channels} channels but the graph has {graph_channels}")]
    ChannelMismatch {
        node: String,
        node_channels: usize,
        graph_channels: usize,
    },

    /// A graph or node cannot run with this many channels
    #[error("Invalid channel count: {0}")]
    InvalidChannelCount(usize),
}

/// Result type for node and graph operations
pub type HissResult<T> = Result<T, HissError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HissError::ImpulseRejected {
            channel: 3,
            source: EngineError::ImpulseTooLong {
                length: 20000,
                max: 16384,
            },
        };
        assert!(err.to_string().contains("channel 3"));
        assert!(err.to_string().contains("20000"));

        let err: HissError = EngineError::InvalidConfig("bad".to_string()).into();
        assert!(matches!(err, HissError::Engine(_)));
    }
}
