//! Single-channel uniformly partitioned convolver
//!
//! Overlap-save convolution with a frequency-domain delay line (FDL):
//!
//! - The impulse is cut into partitions of `B` frames, each zero-padded to
//!   `2B` and transformed once when the impulse is loaded.
//! - Input is collected into blocks of `B` frames. When a block completes,
//!   the last `2B` input frames are transformed, pushed into the FDL, and
//!   multiplied-accumulated against every partition. The second half of the
//!   inverse transform is the convolution output for that block.
//! - That output is emitted while the next block is collected, so the FFT
//!   path always lags the input by exactly `B` frames.
//!
//! In [`LatencyMode::Zero`] the first `B` taps are instead convolved directly
//! in the time domain and the FFT path only covers the rest of the impulse,
//! whose inherent `B`-frame offset cancels the FFT lag. Other modes run the
//! whole impulse through the FFT path and report `B` frames of latency.

use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

use super::error::{EngineError, EngineResult};
use super::LatencyMode;
use crate::types::Sample;

const ZERO: Complex<Sample> = Complex { re: 0.0, im: 0.0 };

pub(super) struct ChannelConvolver {
    /// Partition size B
    block_size: usize,
    /// Longest impulse this channel accepts
    max_length: usize,
    direct_head: bool,

    /// Time-domain taps convolved directly (zero-latency mode only)
    head: Vec<Sample>,
    /// Ring of the last B inputs for the direct head
    history: Vec<Sample>,
    history_pos: usize,

    /// Pre-transformed impulse partitions, B + 1 bins each
    partitions: Vec<Vec<Complex<Sample>>>,
    /// Input spectra, one slot per active partition
    fdl: Vec<Vec<Complex<Sample>>>,
    active_partitions: usize,
    fdl_pos: usize,

    /// Last 2B input frames: [previous block | current block]
    window: Vec<Sample>,
    /// FFT-path output for the block currently being collected
    pending: Vec<Sample>,
    /// Position inside the current block
    pos: usize,

    fft_input: Vec<Sample>,
    fft_output: Vec<Sample>,
    accum: Vec<Complex<Sample>>,
    forward: Arc<dyn RealToComplex<Sample>>,
    inverse: Arc<dyn ComplexToReal<Sample>>,
    forward_scratch: Vec<Complex<Sample>>,
    inverse_scratch: Vec<Complex<Sample>>,

    loaded: bool,
}

impl ChannelConvolver {
    /// Allocate a channel with partition storage for `max_length` frames
    pub(super) fn new(
        mode: LatencyMode,
        max_length: usize,
        planner: &mut RealFftPlanner<Sample>,
    ) -> Self {
        let block_size = mode.partition_size();
        let fft_size = block_size * 2;
        let direct_head = mode.uses_direct_head();

        let forward = planner.plan_fft_forward(fft_size);
        let inverse = planner.plan_fft_inverse(fft_size);
        let forward_scratch = forward.make_scratch_vec();
        let inverse_scratch = inverse.make_scratch_vec();

        let mut channel = Self {
            block_size,
            max_length,
            direct_head,
            head: Vec::with_capacity(if direct_head { block_size } else { 0 }),
            history: vec![0.0; if direct_head { block_size } else { 0 }],
            history_pos: 0,
            partitions: Vec::new(),
            fdl: Vec::new(),
            active_partitions: 0,
            fdl_pos: 0,
            window: vec![0.0; fft_size],
            pending: vec![0.0; block_size],
            pos: 0,
            fft_input: vec![0.0; fft_size],
            fft_output: vec![0.0; fft_size],
            accum: vec![ZERO; block_size + 1],
            forward,
            inverse,
            forward_scratch,
            inverse_scratch,
            loaded: false,
        };
        let capacity = channel.partitions_for(max_length);
        channel.resize_partitions(capacity);
        channel
    }

    /// Whether an impulse is routed through this channel
    #[inline]
    pub(super) fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Frames of impulse the current storage holds without reallocating
    pub(super) fn capacity_frames(&self) -> usize {
        let head = if self.direct_head { self.block_size } else { 0 };
        head + self.partitions.len() * self.block_size
    }

    /// Number of FFT partitions an impulse of `length` frames occupies
    fn partitions_for(&self, length: usize) -> usize {
        let fft_frames = if self.direct_head {
            length.saturating_sub(self.block_size)
        } else {
            length
        };
        fft_frames.div_ceil(self.block_size)
    }

    fn resize_partitions(&mut self, count: usize) {
        let bins = self.block_size + 1;
        self.partitions.resize_with(count, || vec![ZERO; bins]);
        self.fdl.resize_with(count, || vec![ZERO; bins]);
    }

    /// Load an impulse; an empty one unloads the channel
    pub(super) fn set_impulse(&mut self, impulse: &[Sample], allow_reallocate: bool) -> EngineResult<()> {
        if impulse.len() > self.max_length {
            return Err(EngineError::ImpulseTooLong {
                length: impulse.len(),
                max: self.max_length,
            });
        }

        let needed = self.partitions_for(impulse.len());
        if allow_reallocate {
            if needed != self.partitions.len() {
                self.resize_partitions(needed);
            }
        } else if needed > self.partitions.len() {
            return Err(EngineError::AllocationTooSmall {
                length: impulse.len(),
                capacity: self.capacity_frames(),
            });
        }

        let head_len = if self.direct_head {
            impulse.len().min(self.block_size)
        } else {
            0
        };
        self.head.clear();
        self.head.extend_from_slice(&impulse[..head_len]);

        // Fold the inverse transform's 1/N into the partitions
        let scale = 1.0 / (self.block_size * 2) as Sample;
        for (k, chunk) in impulse[head_len..].chunks(self.block_size).enumerate() {
            self.fft_input.fill(0.0);
            for (dst, &src) in self.fft_input.iter_mut().zip(chunk) {
                *dst = src * scale;
            }
            self.forward
                .process_with_scratch(
                    &mut self.fft_input,
                    &mut self.partitions[k],
                    &mut self.forward_scratch,
                )
                .map_err(|e| EngineError::Fft(e.to_string()))?;
        }

        self.active_partitions = needed;
        self.loaded = !impulse.is_empty();
        self.reset();
        Ok(())
    }

    /// Zero all convolution state (input history, FDL, pending output)
    pub(super) fn reset(&mut self) {
        for slot in &mut self.fdl {
            slot.fill(ZERO);
        }
        self.fdl_pos = 0;
        self.window.fill(0.0);
        self.pending.fill(0.0);
        self.history.fill(0.0);
        self.history_pos = 0;
        self.pos = 0;
    }

    /// Reset, and with `allow_reallocate` give back partition storage the
    /// current impulse does not use
    pub(super) fn clear(&mut self, allow_reallocate: bool) {
        self.reset();
        if allow_reallocate && self.partitions.len() > self.active_partitions {
            self.partitions.truncate(self.active_partitions);
            self.partitions.shrink_to_fit();
            self.fdl.truncate(self.active_partitions);
            self.fdl.shrink_to_fit();
        }
    }

    /// Convolve a block in place
    pub(super) fn process_block(&mut self, buffer: &mut [Sample]) {
        for sample in buffer.iter_mut() {
            *sample = self.process_sample(*sample);
        }
    }

    /// Convolve `input` into `output` (equal lengths)
    pub(super) fn process(&mut self, input: &[Sample], output: &mut [Sample]) {
        debug_assert_eq!(input.len(), output.len());
        for (out, &sample) in output.iter_mut().zip(input) {
            *out = self.process_sample(sample);
        }
    }

    #[inline]
    fn process_sample(&mut self, input: Sample) -> Sample {
        let block_size = self.block_size;
        self.window[block_size + self.pos] = input;

        let mut output = self.pending[self.pos];
        if !self.head.is_empty() {
            output += self.convolve_head(input);
        }

        self.pos += 1;
        if self.pos == block_size {
            self.advance_block();
            self.pos = 0;
        }
        output
    }

    #[inline]
    fn convolve_head(&mut self, input: Sample) -> Sample {
        let len = self.history.len();
        self.history[self.history_pos] = input;

        let mut acc = 0.0;
        let mut idx = self.history_pos;
        for &tap in &self.head {
            acc += tap * self.history[idx];
            idx = if idx == 0 { len - 1 } else { idx - 1 };
        }

        self.history_pos = (self.history_pos + 1) % len;
        acc
    }

    /// Run the FFT path for the block that just completed
    fn advance_block(&mut self) {
        let block_size = self.block_size;
        let count = self.active_partitions;

        if count > 0 {
            let slot = self.fdl_pos;
            self.fft_input.copy_from_slice(&self.window);
            let forward = self.forward.process_with_scratch(
                &mut self.fft_input,
                &mut self.fdl[slot],
                &mut self.forward_scratch,
            );
            debug_assert!(forward.is_ok(), "forward FFT length mismatch");

            self.accum.fill(ZERO);
            for (k, partition) in self.partitions[..count].iter().enumerate() {
                let spectrum = &self.fdl[(slot + count - k) % count];
                for ((acc, &x), &h) in self.accum.iter_mut().zip(spectrum).zip(partition) {
                    *acc += x * h;
                }
            }

            // DC and Nyquist bins of a real signal carry no imaginary part
            self.accum[0].im = 0.0;
            self.accum[block_size].im = 0.0;

            let inverse = self.inverse.process_with_scratch(
                &mut self.accum,
                &mut self.fft_output,
                &mut self.inverse_scratch,
            );
            debug_assert!(inverse.is_ok(), "inverse FFT length mismatch");

            self.pending.copy_from_slice(&self.fft_output[block_size..]);
            self.fdl_pos = (slot + 1) % count;
        } else {
            self.pending.fill(0.0);
        }

        self.window.copy_within(block_size.., 0);
    }
}
