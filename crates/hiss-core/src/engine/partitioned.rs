//! Multi-channel partitioned convolution engine
//!
//! Runs one [`ChannelConvolver`] per channel pair, routing input N to output
//! N. Channels without an impulse pass through untouched.

use realfft::RealFftPlanner;

use super::channel::ChannelConvolver;
use super::error::{EngineError, EngineResult};
use super::{ConvolutionEngine, EngineConfig, EngineFactory};
use crate::types::Sample;

/// Uniformly partitioned FFT convolver with a zero-latency direct head
pub struct PartitionedConvolver {
    config: EngineConfig,
    channels: Vec<ChannelConvolver>,
}

impl PartitionedConvolver {
    /// Create an engine, allocating partition storage for the maximum
    /// impulse length on every channel
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;

        let mut planner = RealFftPlanner::<Sample>::new();
        let num_routes = config.input_channels.min(config.output_channels);
        let channels = (0..num_routes)
            .map(|_| ChannelConvolver::new(config.latency_mode, config.max_impulse_length, &mut planner))
            .collect();

        log::debug!(
            "Partitioned convolver created: {} in / {} out, {} latency mode ({} frame partitions), max impulse {} frames",
            config.input_channels,
            config.output_channels,
            config.latency_mode,
            config.latency_mode.partition_size(),
            config.max_impulse_length
        );

        Ok(Self { config, channels })
    }

    /// Frames of impulse a channel can hold without reallocating
    pub fn capacity_frames(&self, channel: usize) -> Option<usize> {
        self.channels.get(channel).map(|c| c.capacity_frames())
    }

    /// Whether a channel currently has an impulse routed
    pub fn is_channel_loaded(&self, channel: usize) -> bool {
        self.channels.get(channel).is_some_and(|c| c.is_loaded())
    }
}

impl ConvolutionEngine for PartitionedConvolver {
    fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn set_impulse(
        &mut self,
        input_channel: usize,
        output_channel: usize,
        impulse: &[Sample],
        allow_reallocate: bool,
    ) -> EngineResult<()> {
        if input_channel >= self.config.input_channels {
            return Err(EngineError::ChannelOutOfRange {
                channel: input_channel,
                count: self.config.input_channels,
            });
        }
        if output_channel >= self.config.output_channels {
            return Err(EngineError::ChannelOutOfRange {
                channel: output_channel,
                count: self.config.output_channels,
            });
        }
        if input_channel != output_channel {
            return Err(EngineError::UnsupportedRouting {
                input: input_channel,
                output: output_channel,
            });
        }

        self.channels[input_channel].set_impulse(impulse, allow_reallocate)
    }

    fn process(
        &mut self,
        inputs: &[&[Sample]],
        outputs: &mut [&mut [Sample]],
        input_offset: usize,
        output_offset: usize,
        num_frames: usize,
    ) {
        debug_assert!(inputs.len() <= self.config.input_channels);
        debug_assert!(outputs.len() <= self.config.output_channels);

        for (ch, output) in outputs.iter_mut().enumerate() {
            let output = &mut output[output_offset..output_offset + num_frames];
            let input = inputs
                .get(ch)
                .map(|input| &input[input_offset..input_offset + num_frames]);

            match (input, self.channels.get_mut(ch)) {
                (Some(input), Some(channel)) if channel.is_loaded() => channel.process(input, output),
                (Some(input), _) => output.copy_from_slice(input),
                (None, _) => output.fill(0.0),
            }
        }
    }

    fn process_in_place(&mut self, block: &mut [Sample], channel_offsets: &[usize], num_frames: usize) {
        debug_assert!(channel_offsets.len() <= self.config.input_channels);

        for (ch, &offset) in channel_offsets.iter().enumerate() {
            if let Some(channel) = self.channels.get_mut(ch).filter(|c| c.is_loaded()) {
                channel.process_block(&mut block[offset..offset + num_frames]);
            }
        }
    }

    fn clear_state(&mut self, allow_reallocate: bool) {
        for channel in &mut self.channels {
            channel.clear(allow_reallocate);
        }
    }
}

/// Factory producing [`PartitionedConvolver`] engines
#[derive(Debug, Clone, Copy, Default)]
pub struct PartitionedFactory;

impl EngineFactory for PartitionedFactory {
    fn create(&self, config: &EngineConfig) -> EngineResult<Box<dyn ConvolutionEngine>> {
        Ok(Box::new(PartitionedConvolver::new(*config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LatencyMode;

    /// Deterministic pseudo-random signal in [-1, 1]
    fn noise(len: usize, seed: u32) -> Vec<Sample> {
        let mut state = seed.wrapping_mul(747796405).wrapping_add(2891336453);
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1664525).wrapping_add(1013904223);
                (state >> 8) as Sample / (1u32 << 23) as Sample - 1.0
            })
            .collect()
    }

    /// Exponentially decaying noise, like a small room
    fn decaying_impulse(len: usize) -> Vec<Sample> {
        noise(len, 7)
            .into_iter()
            .enumerate()
            .map(|(i, s)| s * (-(i as Sample) / 200.0).exp() * 0.5)
            .collect()
    }

    fn direct_convolution(input: &[Sample], impulse: &[Sample], delay: usize) -> Vec<Sample> {
        (0..input.len())
            .map(|t| {
                if t < delay {
                    return 0.0;
                }
                let t = t - delay;
                impulse
                    .iter()
                    .enumerate()
                    .take(t + 1)
                    .map(|(m, &h)| h * input[t - m])
                    .sum()
            })
            .collect()
    }

    /// Feed `input` through channel 0 in uneven host-sized blocks
    fn run_in_blocks(engine: &mut PartitionedConvolver, input: &[Sample]) -> Vec<Sample> {
        let mut output = input.to_vec();
        let block_sizes = [64, 37, 300, 1, 128, 511];
        let mut pos = 0;
        let mut i = 0;
        while pos < output.len() {
            let len = block_sizes[i % block_sizes.len()].min(output.len() - pos);
            engine.process_in_place(&mut output[pos..pos + len], &[0], len);
            pos += len;
            i += 1;
        }
        output
    }

    fn assert_close(actual: &[Sample], expected: &[Sample], tolerance: Sample) {
        assert_eq!(actual.len(), expected.len());
        for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
            assert!(
                (a - e).abs() < tolerance,
                "sample {} differs: got {}, expected {}",
                i,
                a,
                e
            );
        }
    }

    #[test]
    fn test_matches_direct_convolution_in_every_mode() {
        let impulse = decaying_impulse(1500);
        let input = noise(6000, 3);

        for mode in LatencyMode::ALL {
            let mut engine = PartitionedConvolver::new(EngineConfig::new(1, mode, 4096)).unwrap();
            engine.set_impulse(0, 0, &impulse, true).unwrap();

            let output = run_in_blocks(&mut engine, &input);
            let expected = direct_convolution(&input, &impulse, mode.latency_frames());
            assert_close(&output, &expected, 1e-3);
        }
    }

    #[test]
    fn test_unit_impulse_is_identity_after_latency() {
        for mode in LatencyMode::ALL {
            let mut engine = PartitionedConvolver::new(EngineConfig::new(1, mode, 1024)).unwrap();
            engine.set_impulse(0, 0, &[1.0], true).unwrap();

            let input = noise(4096, 11);
            let output = run_in_blocks(&mut engine, &input);
            let latency = engine.latency_frames();

            assert!(output[..latency].iter().all(|s| s.abs() < 1e-5));
            assert_close(&output[latency..], &input[..input.len() - latency], 1e-4);
        }
    }

    #[test]
    fn test_unrouted_channels_pass_through() {
        let mut engine =
            PartitionedConvolver::new(EngineConfig::new(2, LatencyMode::Zero, 1024)).unwrap();
        engine.set_impulse(0, 0, &[0.5], true).unwrap();

        let mut block = vec![1.0; 16];
        engine.process_in_place(&mut block, &[0, 8], 8);

        assert!(block[..8].iter().all(|&s| s == 0.5));
        assert!(block[8..].iter().all(|&s| s == 1.0));
    }

    #[test]
    fn test_empty_impulse_unloads_channel() {
        let mut engine =
            PartitionedConvolver::new(EngineConfig::new(1, LatencyMode::Short, 1024)).unwrap();
        engine.set_impulse(0, 0, &[0.25; 300], true).unwrap();
        assert!(engine.is_channel_loaded(0));

        engine.set_impulse(0, 0, &[], true).unwrap();
        assert!(!engine.is_channel_loaded(0));

        let mut block = vec![0.75; 32];
        engine.process_in_place(&mut block, &[0], 32);
        assert!(block.iter().all(|&s| s == 0.75));
    }

    #[test]
    fn test_out_of_place_with_offsets() {
        let mut engine =
            PartitionedConvolver::new(EngineConfig::new(2, LatencyMode::Zero, 1024)).unwrap();
        engine.set_impulse(1, 1, &[0.0, 1.0], true).unwrap();

        let left = [1.0, 2.0, 3.0, 4.0];
        let right = [9.0, 1.0, 2.0, 3.0];
        let mut out_left = [0.0; 5];
        let mut out_right = [0.0; 5];
        {
            let inputs: [&[Sample]; 2] = [&left, &right];
            let mut outputs: [&mut [Sample]; 2] = [&mut out_left, &mut out_right];
            engine.process(&inputs, &mut outputs, 1, 2, 3);
        }

        assert_eq!(out_left, [0.0, 0.0, 2.0, 3.0, 4.0]);
        // One-sample delay on the routed channel
        assert_eq!(out_right, [0.0, 0.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_rejects_bad_routing_and_lengths() {
        let mut engine =
            PartitionedConvolver::new(EngineConfig::new(2, LatencyMode::Zero, 512)).unwrap();

        assert_eq!(
            engine.set_impulse(2, 2, &[1.0], true),
            Err(EngineError::ChannelOutOfRange { channel: 2, count: 2 })
        );
        assert_eq!(
            engine.set_impulse(0, 1, &[1.0], true),
            Err(EngineError::UnsupportedRouting { input: 0, output: 1 })
        );
        assert_eq!(
            engine.set_impulse(0, 0, &[0.1; 513], true),
            Err(EngineError::ImpulseTooLong { length: 513, max: 512 })
        );
    }

    #[test]
    fn test_fixed_allocation_refuses_to_grow() {
        let mut engine =
            PartitionedConvolver::new(EngineConfig::new(1, LatencyMode::Short, 2048)).unwrap();
        assert_eq!(engine.capacity_frames(0), Some(2048));

        // Dynamic load shrinks storage to fit
        engine.set_impulse(0, 0, &[0.1; 300], true).unwrap();
        assert_eq!(engine.capacity_frames(0), Some(512));

        // Growing without permission is refused
        let result = engine.set_impulse(0, 0, &[0.1; 1000], false);
        assert_eq!(
            result,
            Err(EngineError::AllocationTooSmall {
                length: 1000,
                capacity: 512
            })
        );

        // Shorter impulses fit into existing storage
        engine.set_impulse(0, 0, &[0.1; 100], false).unwrap();
        assert_eq!(engine.capacity_frames(0), Some(512));
    }

    #[test]
    fn test_clear_state_drops_tail() {
        let mut engine =
            PartitionedConvolver::new(EngineConfig::new(1, LatencyMode::Zero, 2048)).unwrap();
        let impulse = decaying_impulse(1000);
        engine.set_impulse(0, 0, &impulse, true).unwrap();

        let mut block = noise(700, 5);
        engine.process_in_place(&mut block, &[0], 700);

        engine.clear_state(false);

        let mut silence = vec![0.0; 1200];
        engine.process_in_place(&mut silence, &[0], 1200);
        assert!(silence.iter().all(|&s| s == 0.0));

        // Impulse survives the clear
        let mut unit = vec![0.0; 8];
        unit[0] = 1.0;
        engine.process_in_place(&mut unit, &[0], 8);
        assert_close(&unit, &impulse[..8], 1e-5);
    }

    #[test]
    fn test_clear_state_with_reallocation_releases_unused_storage() {
        let mut engine =
            PartitionedConvolver::new(EngineConfig::new(1, LatencyMode::Medium, 8192)).unwrap();
        engine.set_impulse(0, 0, &[0.1; 1000], false).unwrap();
        assert_eq!(engine.capacity_frames(0), Some(8192));

        engine.clear_state(false);
        assert_eq!(engine.capacity_frames(0), Some(8192));

        engine.clear_state(true);
        assert_eq!(engine.capacity_frames(0), Some(1024));
    }

    #[test]
    fn test_factory_validates_config() {
        let factory = PartitionedFactory;
        assert!(factory
            .create(&EngineConfig::new(0, LatencyMode::Zero, 1024))
            .is_err());

        let engine = factory
            .create(&EngineConfig::new(4, LatencyMode::Medium, 1024))
            .unwrap();
        assert_eq!(engine.config().input_channels, 4);
        assert_eq!(engine.latency_frames(), 1024);
    }
}
