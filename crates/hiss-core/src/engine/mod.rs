//! Convolution engine contract
//!
//! The convolver node treats its DSP engine as an opaque collaborator that it
//! creates, configures, runs and destroys through exactly this surface:
//!
//! - [`EngineFactory::create`] allocates an engine for a channel layout,
//!   latency mode and maximum impulse length
//! - [`ConvolutionEngine::set_impulse`] loads one channel's impulse
//! - [`ConvolutionEngine::process`] / [`ConvolutionEngine::process_in_place`]
//!   run one block
//! - [`ConvolutionEngine::clear_state`] drops pending convolution tails
//! - dropping the engine releases it
//!
//! [`PartitionedConvolver`] is the engine shipped with this crate.

mod channel;
mod error;
mod partitioned;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::{Sample, MAX_IMPULSE_LENGTH};

pub use error::{EngineError, EngineResult};
pub use partitioned::{PartitionedConvolver, PartitionedFactory};

/// Partition scheme selector, trading input-to-output latency for CPU cost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyMode {
    /// No added latency: the first partition is convolved in the time domain
    #[default]
    Zero,
    /// 256 frames of latency, FFT partitions only
    Short,
    /// 1024 frames of latency, cheapest per sample
    Medium,
}

impl LatencyMode {
    /// All modes in order of increasing latency
    pub const ALL: [LatencyMode; 3] = [LatencyMode::Zero, LatencyMode::Short, LatencyMode::Medium];

    /// FFT partition size (frames) of this mode
    pub fn partition_size(&self) -> usize {
        match self {
            LatencyMode::Zero => 128,
            LatencyMode::Short => 256,
            LatencyMode::Medium => 1024,
        }
    }

    /// Input-to-output delay (frames) this mode adds
    pub fn latency_frames(&self) -> usize {
        match self {
            LatencyMode::Zero => 0,
            LatencyMode::Short | LatencyMode::Medium => self.partition_size(),
        }
    }

    /// Whether the head of the impulse is convolved directly in the time domain
    pub fn uses_direct_head(&self) -> bool {
        matches!(self, LatencyMode::Zero)
    }

    /// Get the name of this mode
    pub fn name(&self) -> &'static str {
        match self {
            LatencyMode::Zero => "zero",
            LatencyMode::Short => "short",
            LatencyMode::Medium => "medium",
        }
    }
}

impl fmt::Display for LatencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LatencyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "zero" => Ok(LatencyMode::Zero),
            "short" => Ok(LatencyMode::Short),
            "medium" => Ok(LatencyMode::Medium),
            other => Err(format!(
                "unknown latency mode '{}' (expected zero, short or medium)",
                other
            )),
        }
    }
}

/// Construction parameters of an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub input_channels: usize,
    pub output_channels: usize,
    pub latency_mode: LatencyMode,
    /// Longest impulse (frames) the engine accepts
    pub max_impulse_length: usize,
}

impl EngineConfig {
    /// Create a config with equal input and output channel counts
    pub fn new(num_channels: usize, latency_mode: LatencyMode, max_impulse_length: usize) -> Self {
        Self {
            input_channels: num_channels,
            output_channels: num_channels,
            latency_mode,
            max_impulse_length,
        }
    }

    /// Check the config describes an engine that can exist
    pub fn validate(&self) -> EngineResult<()> {
        if self.input_channels == 0 || self.output_channels == 0 {
            return Err(EngineError::InvalidConfig(format!(
                "channel counts must be nonzero (in={}, out={})",
                self.input_channels, self.output_channels
            )));
        }
        if self.max_impulse_length == 0 {
            return Err(EngineError::InvalidConfig(
                "max impulse length must be nonzero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(2, LatencyMode::default(), MAX_IMPULSE_LENGTH)
    }
}

/// A multi-channel block-partitioned convolver
///
/// Implementations own all of their partition and FFT storage. Dropping the
/// engine releases it. `process` and `process_in_place` run on the render
/// thread and must not allocate or block.
pub trait ConvolutionEngine: Send {
    /// The parameters this engine was created with
    fn config(&self) -> &EngineConfig;

    /// Load the impulse convolving `input_channel` into `output_channel`
    ///
    /// An empty `impulse` removes the route, and the channel passes through
    /// unconvolved. When `allow_reallocate` is false the engine must fit the
    /// impulse into the storage it already holds.
    fn set_impulse(
        &mut self,
        input_channel: usize,
        output_channel: usize,
        impulse: &[Sample],
        allow_reallocate: bool,
    ) -> EngineResult<()>;

    /// Convolve `num_frames` frames out of place
    ///
    /// Reads `inputs[ch][input_offset..]`, writes `outputs[ch][output_offset..]`.
    /// Channel counts are the slice lengths and must not exceed the engine's.
    fn process(
        &mut self,
        inputs: &[&[Sample]],
        outputs: &mut [&mut [Sample]],
        input_offset: usize,
        output_offset: usize,
        num_frames: usize,
    );

    /// Convolve a planar block in place
    ///
    /// Channel `ch` starts at `block[channel_offsets[ch]]` and spans
    /// `num_frames` samples. Channel count is `channel_offsets.len()`.
    fn process_in_place(&mut self, block: &mut [Sample], channel_offsets: &[usize], num_frames: usize);

    /// Zero all pending convolution state without touching the impulses
    ///
    /// With `allow_reallocate` the engine may also release storage it no
    /// longer needs.
    fn clear_state(&mut self, allow_reallocate: bool);

    /// Input-to-output delay in frames
    fn latency_frames(&self) -> usize {
        self.config().latency_mode.latency_frames()
    }
}

/// Creates engines on behalf of a node
///
/// The node holds a factory rather than a concrete engine type so the engine
/// stays opaque and can be swapped (or mocked) without touching the node.
pub trait EngineFactory: Send + Sync {
    fn create(&self, config: &EngineConfig) -> EngineResult<Box<dyn ConvolutionEngine>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_mode_parse() {
        assert_eq!("zero".parse::<LatencyMode>(), Ok(LatencyMode::Zero));
        assert_eq!("SHORT".parse::<LatencyMode>(), Ok(LatencyMode::Short));
        assert_eq!("medium".parse::<LatencyMode>(), Ok(LatencyMode::Medium));
        assert!("long".parse::<LatencyMode>().is_err());
    }

    #[test]
    fn test_latency_mode_ordering() {
        let latencies: Vec<usize> = LatencyMode::ALL.iter().map(|m| m.latency_frames()).collect();
        assert_eq!(latencies, vec![0, 256, 1024]);
        assert!(LatencyMode::Zero.uses_direct_head());
        assert!(!LatencyMode::Medium.uses_direct_head());
    }

    #[test]
    fn test_engine_config_validation() {
        assert!(EngineConfig::default().validate().is_ok());
        assert!(EngineConfig::new(0, LatencyMode::Zero, 1024).validate().is_err());
        assert!(EngineConfig::new(2, LatencyMode::Zero, 0).validate().is_err());
    }
}
