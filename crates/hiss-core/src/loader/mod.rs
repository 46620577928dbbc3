//! Audio source files for impulse responses
//!
//! [`SourceFile`] probes a file once on open (format, rate, channel count)
//! and decodes it on demand into a planar [`AudioBuffer`], optionally
//! converted to another sample rate. Decoding goes through symphonia,
//! resampling through rubato.

mod error;
mod resample;

use std::fs::File;
use std::path::{Path, PathBuf};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::types::AudioBuffer;

pub use error::{LoadError, LoadResult};
pub use resample::{resample, resampled_length};

/// An audio file that can be decoded into a buffer
#[derive(Debug, Clone)]
pub struct SourceFile {
    path: PathBuf,
    sample_rate: u32,
    num_channels: usize,
    num_frames: Option<u64>,
}

impl SourceFile {
    /// Open and probe an audio file
    pub fn open(path: impl AsRef<Path>) -> LoadResult<Self> {
        let path = path.as_ref().to_path_buf();
        let format = probe(&path)?;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| LoadError::NoAudioTrack(path.clone()))?;

        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| LoadError::UnsupportedFormat {
                path: path.clone(),
                reason: "unknown sample rate".to_string(),
            })?;
        let num_channels = track
            .codec_params
            .channels
            .map(|c| c.count())
            .ok_or_else(|| LoadError::UnsupportedFormat {
                path: path.clone(),
                reason: "unknown channel layout".to_string(),
            })?;
        let num_frames = track.codec_params.n_frames;

        log::debug!(
            "Opened {:?}: {}Hz, {} channels, {:?} frames",
            path,
            sample_rate,
            num_channels,
            num_frames
        );

        Ok(Self {
            path,
            sample_rate,
            num_channels,
            num_frames,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Native sample rate of the file
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// Frame count reported by the container, if it reports one
    pub fn num_frames(&self) -> Option<u64> {
        self.num_frames
    }

    /// Decode the whole file at its native sample rate
    pub fn load_buffer(&self) -> LoadResult<AudioBuffer> {
        let interleaved = self.decode()?;
        if interleaved.is_empty() {
            return Err(LoadError::Empty(self.path.clone()));
        }
        Ok(AudioBuffer::from_interleaved(&interleaved, self.num_channels))
    }

    /// Decode the whole file, converted to `sample_rate`
    pub fn load_buffer_at(&self, sample_rate: u32) -> LoadResult<AudioBuffer> {
        let buffer = self.load_buffer()?;
        if sample_rate == self.sample_rate {
            return Ok(buffer);
        }
        log::info!(
            "Resampling {:?} from {}Hz to {}Hz",
            self.path,
            self.sample_rate,
            sample_rate
        );
        resample(&buffer, self.sample_rate, sample_rate)
    }

    /// Decode every packet of the first audio track to interleaved f32
    fn decode(&self) -> LoadResult<Vec<f32>> {
        let mut format = probe(&self.path)?;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| LoadError::NoAudioTrack(self.path.clone()))?;
        let track_id = track.id;

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| LoadError::UnsupportedFormat {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        let mut samples: Vec<f32> = Vec::new();
        let mut sample_buf: Option<SampleBuffer<f32>> = None;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(e) => {
                    log::warn!("Stopped reading {:?} early: {}", self.path, e);
                    break;
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    log::warn!("Skipping corrupt packet in {:?}: {}", self.path, e);
                    continue;
                }
                Err(e) => {
                    return Err(LoadError::Decode {
                        path: self.path.clone(),
                        reason: e.to_string(),
                    });
                }
            };

            if decoded.spec().channels.count() != self.num_channels {
                return Err(LoadError::Decode {
                    path: self.path.clone(),
                    reason: format!(
                        "channel count changed mid-stream ({} -> {})",
                        self.num_channels,
                        decoded.spec().channels.count()
                    ),
                });
            }

            // Sized on first decode
            if sample_buf.is_none() {
                let spec = *decoded.spec();
                let duration = decoded.capacity() as u64;
                sample_buf = Some(SampleBuffer::new(duration, spec));
            }

            if let Some(ref mut buf) = sample_buf {
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
        }

        Ok(samples)
    }
}

fn probe(path: &Path) -> LoadResult<Box<dyn FormatReader>> {
    let file = File::open(path).map_err(|e| LoadError::Open {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| LoadError::UnsupportedFormat {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    Ok(probed.format)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav_i16(path: &Path, sample_rate: u32, channels: &[Vec<i16>]) {
        let spec = hound::WavSpec {
            channels: channels.len() as u16,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for frame in 0..channels[0].len() {
            for channel in channels {
                writer.write_sample(channel[frame]).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    fn write_wav_f32(path: &Path, sample_rate: u32, channels: &[Vec<f32>]) {
        let spec = hound::WavSpec {
            channels: channels.len() as u16,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for frame in 0..channels[0].len() {
            for channel in channels {
                writer.write_sample(channel[frame]).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_open_reports_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ir.wav");
        write_wav_i16(&path, 44100, &[vec![0; 100], vec![0; 100]]);

        let source = SourceFile::open(&path).unwrap();
        assert_eq!(source.sample_rate(), 44100);
        assert_eq!(source.num_channels(), 2);
        assert_eq!(source.num_frames(), Some(100));
        assert_eq!(source.path(), path.as_path());
    }

    #[test]
    fn test_decode_int_wav_to_planar() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ir.wav");
        write_wav_i16(&path, 48000, &[vec![16384, 0, -16384], vec![0, 8192, 0]]);

        let buffer = SourceFile::open(&path).unwrap().load_buffer().unwrap();
        assert_eq!(buffer.num_channels(), 2);
        assert_eq!(buffer.num_frames(), 3);
        assert_eq!(buffer.channel(0), &[0.5, 0.0, -0.5]);
        assert_eq!(buffer.channel(1), &[0.0, 0.25, 0.0]);
    }

    #[test]
    fn test_decode_float_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ir.wav");
        let samples = vec![1.0, 0.5, -0.125, 0.0, 0.75];
        write_wav_f32(&path, 48000, &[samples.clone()]);

        let buffer = SourceFile::open(&path).unwrap().load_buffer().unwrap();
        assert_eq!(buffer.channel(0), samples.as_slice());
    }

    #[test]
    fn test_load_at_other_rate_resamples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ir.wav");
        write_wav_f32(&path, 44100, &[vec![0.25; 4410], vec![0.0; 4410]]);

        let source = SourceFile::open(&path).unwrap();
        let buffer = source.load_buffer_at(48000).unwrap();
        assert_eq!(buffer.num_frames(), resampled_length(4410, 44100, 48000));
        assert_eq!(buffer.num_channels(), 2);

        let native = source.load_buffer_at(44100).unwrap();
        assert_eq!(native.num_frames(), 4410);
    }

    #[test]
    fn test_empty_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.wav");
        write_wav_f32(&path, 48000, &[Vec::new()]);

        let source = SourceFile::open(&path).unwrap();
        assert!(matches!(source.load_buffer(), Err(LoadError::Empty(_))));
    }

    #[test]
    fn test_missing_file() {
        let err = SourceFile::open("/nonexistent/ir.wav").unwrap_err();
        assert!(matches!(err, LoadError::Open { .. }));
    }

    #[test]
    fn test_garbage_file_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.wav");
        std::fs::write(&path, b"definitely not a riff header").unwrap();

        let err = SourceFile::open(&path).unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedFormat { .. }));
    }
}
