//! Common types for Hiss
//!
//! This module contains the fundamental audio types shared by the convolution
//! engine, the convolver node and the host graph: the sample type, the
//! planar multi-channel buffer and the global sizing constants.

use std::ops::{Index, IndexMut};

/// Default sample rate (48kHz - standard professional audio rate)
pub const SAMPLE_RATE: u32 = 48000;

/// Default number of frames the host graph renders per block
pub const DEFAULT_FRAMES_PER_BLOCK: usize = 512;

/// Default number of channels for a render graph
pub const DEFAULT_NUM_CHANNELS: usize = 2;

/// Maximum impulse length (in frames) a convolution engine is sized for
///
/// 16384 frames = ~340ms at 48kHz.
pub const MAX_IMPULSE_LENGTH: usize = 16384;

/// Audio sample type (32-bit float for processing)
pub type Sample = f32;

/// A planar multi-channel audio buffer
///
/// Channels are stored back to back in a single allocation: channel `ch`
/// occupies `data[ch * num_frames..(ch + 1) * num_frames]`. This is the block
/// format the host graph hands to every node's render callback, and the
/// storage format of impulse responses.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AudioBuffer {
    data: Vec<Sample>,
    num_frames: usize,
    num_channels: usize,
}

impl AudioBuffer {
    /// Create a buffer filled with silence
    pub fn silence(num_frames: usize, num_channels: usize) -> Self {
        Self {
            data: vec![0.0; num_frames * num_channels],
            num_frames,
            num_channels,
        }
    }

    /// Create a buffer from separate channel slices
    ///
    /// Panics if the channels do not all have the same length.
    pub fn from_channels<C: AsRef<[Sample]>>(channels: &[C]) -> Self {
        let num_frames = channels.first().map(|c| c.as_ref().len()).unwrap_or(0);
        let mut data = Vec::with_capacity(num_frames * channels.len());
        for channel in channels {
            let channel = channel.as_ref();
            assert_eq!(channel.len(), num_frames, "Channel lengths must match");
            data.extend_from_slice(channel);
        }
        Self {
            data,
            num_frames,
            num_channels: channels.len(),
        }
    }

    /// Create a buffer from interleaved samples [c0, c1, ..., c0, c1, ...]
    pub fn from_interleaved(interleaved: &[Sample], num_channels: usize) -> Self {
        assert!(num_channels > 0, "Interleaved buffer needs at least one channel");
        assert!(
            interleaved.len() % num_channels == 0,
            "Interleaved length must be a multiple of the channel count"
        );
        let num_frames = interleaved.len() / num_channels;
        let mut buffer = Self::silence(num_frames, num_channels);
        for (frame, chunk) in interleaved.chunks_exact(num_channels).enumerate() {
            for (ch, &sample) in chunk.iter().enumerate() {
                buffer.data[ch * num_frames + frame] = sample;
            }
        }
        buffer
    }

    /// Number of frames per channel
    #[inline]
    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    /// Number of channels
    #[inline]
    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// Total number of samples across all channels
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the buffer holds no samples
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get one channel's samples
    #[inline]
    pub fn channel(&self, ch: usize) -> &[Sample] {
        let start = ch * self.num_frames;
        &self.data[start..start + self.num_frames]
    }

    /// Get one channel's samples mutably
    #[inline]
    pub fn channel_mut(&mut self, ch: usize) -> &mut [Sample] {
        let start = ch * self.num_frames;
        &mut self.data[start..start + self.num_frames]
    }

    /// Iterate over the channels in order
    pub fn channels(&self) -> impl Iterator<Item = &[Sample]> {
        (0..self.num_channels).map(move |ch| self.channel(ch))
    }

    /// Get all samples (planar layout)
    #[inline]
    pub fn as_slice(&self) -> &[Sample] {
        &self.data
    }

    /// Get all samples mutably (planar layout)
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [Sample] {
        &mut self.data
    }

    /// Scale all samples by a factor
    pub fn scale(&mut self, factor: Sample) {
        for sample in &mut self.data {
            *sample *= factor;
        }
    }

    /// Fill the buffer with silence
    pub fn fill_silence(&mut self) {
        self.data.fill(0.0);
    }

    /// Copy samples to a new interleaved Vec
    pub fn to_interleaved(&self) -> Vec<Sample> {
        let mut output = vec![0.0; self.data.len()];
        for ch in 0..self.num_channels {
            for (frame, &sample) in self.channel(ch).iter().enumerate() {
                output[frame * self.num_channels + ch] = sample;
            }
        }
        output
    }

    /// Get the peak amplitude in the buffer
    pub fn peak(&self) -> Sample {
        self.data.iter().map(|s| s.abs()).fold(0.0, Sample::max)
    }
}

impl Index<usize> for AudioBuffer {
    type Output = [Sample];

    #[inline]
    fn index(&self, ch: usize) -> &Self::Output {
        self.channel(ch)
    }
}

impl IndexMut<usize> for AudioBuffer {
    #[inline]
    fn index_mut(&mut self, ch: usize) -> &mut Self::Output {
        self.channel_mut(ch)
    }
}

/// Convert a decibel value to a linear gain factor
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert a linear gain factor to decibels (-inf for zero)
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    20.0 * linear.log10()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_from_channels_is_planar() {
        let buffer = AudioBuffer::from_channels(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);

        assert_eq!(buffer.num_frames(), 3);
        assert_eq!(buffer.num_channels(), 2);
        assert_eq!(buffer.as_slice(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(&buffer[1], &[4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_buffer_interleaved_conversion() {
        let interleaved = [1.0, 10.0, 2.0, 20.0, 3.0, 30.0];
        let buffer = AudioBuffer::from_interleaved(&interleaved, 2);

        assert_eq!(buffer.channel(0), &[1.0, 2.0, 3.0]);
        assert_eq!(buffer.channel(1), &[10.0, 20.0, 30.0]);
        assert_eq!(buffer.to_interleaved(), interleaved.to_vec());
    }

    #[test]
    fn test_buffer_scale_and_peak() {
        let mut buffer = AudioBuffer::from_channels(&[[0.5, -1.0], [0.25, 0.0]]);
        buffer.scale(0.5);

        assert_eq!(buffer.channel(0), &[0.25, -0.5]);
        assert_eq!(buffer.peak(), 0.5);

        buffer.fill_silence();
        assert_eq!(buffer.peak(), 0.0);
    }

    #[test]
    #[should_panic(expected = "Channel lengths must match")]
    fn test_buffer_rejects_ragged_channels() {
        let _ = AudioBuffer::from_channels(&[vec![1.0, 2.0], vec![1.0]]);
    }

    #[test]
    fn test_db_conversion() {
        assert!((db_to_linear(0.0) - 1.0).abs() < 1e-6);
        assert!((db_to_linear(-6.0) - 0.501).abs() < 1e-3);
        assert!((linear_to_db(0.1) + 20.0).abs() < 1e-4);
    }
}
