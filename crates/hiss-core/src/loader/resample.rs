//! Offline sample rate conversion for impulse responses
//!
//! Whole-buffer conversion with rubato's FFT resampler. The resampler's
//! output delay is trimmed so frame 0 of the result lines up with frame 0 of
//! the input.

use rubato::{FftFixedIn, Resampler};

use super::error::{LoadError, LoadResult};
use crate::types::{AudioBuffer, Sample};

/// Input chunk size fed to the resampler
const CHUNK_SIZE: usize = 1024;

/// FFT sub-chunks per chunk (more = lower delay, more CPU)
const SUB_CHUNKS: usize = 2;

/// Number of frames `num_frames` at `from` Hz occupies at `to` Hz
pub fn resampled_length(num_frames: usize, from: u32, to: u32) -> usize {
    (num_frames as u64 * to as u64).div_ceil(from as u64) as usize
}

/// Convert a planar buffer from `from` Hz to `to` Hz
pub fn resample(buffer: &AudioBuffer, from: u32, to: u32) -> LoadResult<AudioBuffer> {
    if from == to || buffer.is_empty() {
        return Ok(buffer.clone());
    }
    let error = |reason: String| LoadError::Resample { from, to, reason };
    if from == 0 || to == 0 {
        return Err(error("sample rates must be nonzero".to_string()));
    }

    let num_channels = buffer.num_channels();
    let num_frames = buffer.num_frames();
    let mut resampler =
        FftFixedIn::<Sample>::new(from as usize, to as usize, CHUNK_SIZE, SUB_CHUNKS, num_channels)
            .map_err(|e| error(e.to_string()))?;

    let expected = resampled_length(num_frames, from, to);
    let delay = resampler.output_delay();
    let mut output: Vec<Vec<Sample>> = vec![Vec::with_capacity(expected + delay); num_channels];

    let mut pos = 0;
    while pos < num_frames {
        let needed = resampler.input_frames_next();
        let end = (pos + needed).min(num_frames);
        let chunk: Vec<&[Sample]> = buffer.channels().map(|c| &c[pos..end]).collect();

        let resampled = if end - pos == needed {
            resampler.process(&chunk, None)
        } else {
            resampler.process_partial(Some(&chunk), None)
        }
        .map_err(|e| error(e.to_string()))?;

        for (dst, src) in output.iter_mut().zip(resampled) {
            dst.extend_from_slice(&src);
        }
        pos = end;
    }

    // Flush the resampler's internal delay
    while output[0].len() < expected + delay {
        let resampled = resampler
            .process_partial(None::<&[Vec<Sample>]>, None)
            .map_err(|e| error(e.to_string()))?;
        if resampled.first().map_or(true, Vec::is_empty) {
            break;
        }
        for (dst, src) in output.iter_mut().zip(resampled) {
            dst.extend_from_slice(&src);
        }
    }

    let channels: Vec<Vec<Sample>> = output
        .into_iter()
        .map(|mut channel| {
            channel.drain(..delay.min(channel.len()));
            channel.resize(expected, 0.0);
            channel
        })
        .collect();

    log::debug!(
        "Resampled {} frames {}Hz -> {} frames {}Hz",
        num_frames,
        from,
        expected,
        to
    );
    Ok(AudioBuffer::from_channels(&channels))
}
