//! Convolver node configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::engine::LatencyMode;
use crate::graph::{ChannelMode, GraphFormat};
use crate::types::MAX_IMPULSE_LENGTH;

/// Settings of one convolver node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvolverConfig {
    /// Partition scheme (zero, short, medium)
    /// Default: zero
    pub latency_mode: LatencyMode,

    /// Linear gain applied before convolution
    /// Default: 1.0
    pub pre_gain: f32,

    /// Fixed impulse ceiling in frames; 0 lets the engine grow and shrink
    /// its storage with each impulse
    /// Default: 0
    pub fixed_impulse_length: usize,

    /// Longest impulse the engine accepts when the length is not fixed
    /// Default: 16384
    pub max_impulse_length: usize,

    /// Pinned channel count; unset follows the graph
    pub channels: Option<usize>,

    /// Impulse response loaded when the node is built
    pub impulse_path: Option<PathBuf>,
}

impl Default for ConvolverConfig {
    fn default() -> Self {
        Self {
            latency_mode: LatencyMode::Zero,
            pre_gain: 1.0,
            fixed_impulse_length: 0,
            max_impulse_length: MAX_IMPULSE_LENGTH,
            channels: None,
            impulse_path: None,
        }
    }
}

impl ConvolverConfig {
    pub fn channel_mode(&self) -> ChannelMode {
        ChannelMode::from(self.channels)
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HissConfig {
    pub context: GraphFormat,
    pub convolver: ConvolverConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{load_config, save_config};

    #[test]
    fn test_defaults() {
        let config = ConvolverConfig::default();
        assert_eq!(config.latency_mode, LatencyMode::Zero);
        assert_eq!(config.pre_gain, 1.0);
        assert_eq!(config.max_impulse_length, 16384);
        assert_eq!(config.channel_mode(), ChannelMode::MatchesContext);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = "convolver:\n  latency_mode: medium\n  channels: 4\n";
        let config: HissConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.convolver.latency_mode, LatencyMode::Medium);
        assert_eq!(config.convolver.channel_mode(), ChannelMode::Specified(4));
        assert_eq!(config.convolver.pre_gain, 1.0);
        assert_eq!(config.context, GraphFormat::default());
    }

    #[test]
    fn test_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("convolver.yaml");

        let config = HissConfig {
            context: GraphFormat {
                sample_rate: 44100,
                frames_per_block: 256,
                num_channels: 6,
            },
            convolver: ConvolverConfig {
                latency_mode: LatencyMode::Short,
                pre_gain: 0.5,
                fixed_impulse_length: 8192,
                impulse_path: Some(PathBuf::from("/irs/hall.wav")),
                ..Default::default()
            },
        };
        save_config(&config, &path).unwrap();

        let loaded: HissConfig = load_config(&path);
        assert_eq!(loaded, config);
    }
}
