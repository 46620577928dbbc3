//! hiss-render - offline convolution of an audio file
//!
//! Runs a file through a convolver node in host-sized blocks, exactly as a
//! live graph would, then writes the wet result as a 32-bit float WAV.
//!
//! ## Usage
//!
//! ```text
//! hiss-render <input> <output.wav> [--ir <file>] [--config <yaml>]
//!             [--latency zero|short|medium] [--gain <linear>]
//! ```
//!
//! Settings come from `--config`, or the default config file when present;
//! flags override them. The engine's latency is compensated and the
//! impulse tail is rendered out.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use hiss_core::config::{default_config_path, load_config, try_load_config, HissConfig};
use hiss_core::loader::SourceFile;
use hiss_core::{AudioBuffer, AudioContext, ConvolverNode, GraphFormat, LatencyMode};

const USAGE: &str = "usage: hiss-render <input> <output.wav> [--ir <file>] [--config <yaml>] \
                     [--latency zero|short|medium] [--gain <linear>]";

#[derive(Debug, Default, PartialEq)]
struct Args {
    input: PathBuf,
    output: PathBuf,
    impulse: Option<PathBuf>,
    config: Option<PathBuf>,
    latency: Option<LatencyMode>,
    gain: Option<f32>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args> {
    let mut args = args.into_iter();
    let mut positional = Vec::new();
    let mut parsed = Args::default();

    while let Some(arg) = args.next() {
        let mut value = |flag: &str| {
            args.next()
                .with_context(|| format!("{} needs a value\n{}", flag, USAGE))
        };
        match arg.as_str() {
            "--ir" => parsed.impulse = Some(PathBuf::from(value("--ir")?)),
            "--config" => parsed.config = Some(PathBuf::from(value("--config")?)),
            "--latency" => {
                let mode = value("--latency")?;
                parsed.latency = Some(mode.parse().map_err(anyhow::Error::msg)?);
            }
            "--gain" => {
                let gain = value("--gain")?;
                parsed.gain = Some(
                    gain.parse()
                        .with_context(|| format!("invalid gain '{}'", gain))?,
                );
            }
            "-h" | "--help" => bail!("{}", USAGE),
            flag if flag.starts_with("--") => bail!("unknown flag '{}'\n{}", flag, USAGE),
            _ => positional.push(PathBuf::from(&arg)),
        }
    }

    let [input, output]: [PathBuf; 2] = positional
        .try_into()
        .map_err(|_| anyhow::anyhow!("expected an input and an output path\n{}", USAGE))?;
    parsed.input = input;
    parsed.output = output;
    Ok(parsed)
}

/// Config file settings with command line overrides applied
fn resolve_config(args: &Args) -> Result<HissConfig> {
    let mut config: HissConfig = match &args.config {
        Some(path) => try_load_config(path)?,
        None => load_config(&default_config_path()),
    };
    if let Some(path) = &args.impulse {
        config.convolver.impulse_path = Some(path.clone());
    }
    if let Some(mode) = args.latency {
        config.convolver.latency_mode = mode;
    }
    if let Some(gain) = args.gain {
        config.convolver.pre_gain = gain;
    }
    Ok(config)
}

/// Render `input` through the graph, compensating `latency` frames and
/// rendering `tail` extra frames after the input ends
fn render(ctx: &AudioContext, input: &AudioBuffer, latency: usize, tail: usize) -> AudioBuffer {
    let num_channels = input.num_channels();
    let input_frames = input.num_frames();
    let total = input_frames + latency + tail;
    let block = ctx.frames_per_block().max(1);

    let mut output = AudioBuffer::silence(input_frames + tail, num_channels);
    let mut chunk = AudioBuffer::silence(block, num_channels);

    for start in (0..total).step_by(block) {
        let len = block.min(total - start);
        if chunk.num_frames() != len {
            chunk = AudioBuffer::silence(len, num_channels);
        }
        for ch in 0..num_channels {
            let dst = chunk.channel_mut(ch);
            dst.fill(0.0);
            if start < input_frames {
                let end = (start + len).min(input_frames);
                dst[..end - start].copy_from_slice(&input.channel(ch)[start..end]);
            }
        }

        ctx.render(&mut chunk);

        // Drop the first `latency` frames of the stream
        let out_start = start.max(latency);
        let out_end = start + len;
        if out_end <= out_start {
            continue;
        }
        for ch in 0..num_channels {
            output.channel_mut(ch)[out_start - latency..out_end - latency]
                .copy_from_slice(&chunk.channel(ch)[out_start - start..]);
        }
    }
    output
}

fn write_wav(path: &Path, buffer: &AudioBuffer, sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: buffer.num_channels() as u16,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create {:?}", path))?;
    for sample in buffer.to_interleaved() {
        writer.write_sample(sample)?;
    }
    writer
        .finalize()
        .with_context(|| format!("Failed to finalize {:?}", path))?;
    Ok(())
}

fn run(args: Args) -> Result<()> {
    let config = resolve_config(&args)?;

    let source = SourceFile::open(&args.input)
        .with_context(|| format!("Failed to open input {:?}", args.input))?;
    let input = source.load_buffer()?;
    log::info!(
        "Input {:?}: {} frames, {} channels, {}Hz",
        args.input,
        input.num_frames(),
        input.num_channels(),
        source.sample_rate()
    );

    let ctx = AudioContext::new(GraphFormat {
        sample_rate: source.sample_rate(),
        frames_per_block: config.context.frames_per_block,
        num_channels: input.num_channels(),
    })?;
    let node = ConvolverNode::builder(&ctx)
        .config(config.convolver.clone())
        .build()
        .context("Failed to set up the convolver")?;
    ctx.add_node(node.clone())?;

    let tail = match node.buffer() {
        Some(impulse) => impulse.num_frames().saturating_sub(1),
        None => {
            log::warn!("No impulse response configured, output is the dry input");
            0
        }
    };
    let latency = node.latency_frames();
    log::info!(
        "Rendering with {} latency mode ({} frames), pre-gain {}",
        node.latency_mode(),
        latency,
        node.pre_gain()
    );

    let output = render(&ctx, &input, latency, tail);
    write_wav(&args.output, &output, source.sample_rate())?;
    log::info!(
        "Wrote {:?}: {} frames, peak {:.3}",
        args.output,
        output.num_frames(),
        output.peak()
    );
    Ok(())
}

fn main() -> Result<()> {
    // Set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = parse_args(std::env::args().skip(1))?;
    run(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hiss_core::ImpulseResponse;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args() {
        let args = parse_args(strings(&[
            "in.wav", "--latency", "short", "out.wav", "--gain", "0.5", "--ir", "hall.wav",
        ]))
        .unwrap();

        assert_eq!(args.input, PathBuf::from("in.wav"));
        assert_eq!(args.output, PathBuf::from("out.wav"));
        assert_eq!(args.latency, Some(LatencyMode::Short));
        assert_eq!(args.gain, Some(0.5));
        assert_eq!(args.impulse, Some(PathBuf::from("hall.wav")));
        assert_eq!(args.config, None);
    }

    #[test]
    fn test_parse_args_errors() {
        assert!(parse_args(strings(&["in.wav"])).is_err());
        assert!(parse_args(strings(&["in.wav", "out.wav", "--gain"])).is_err());
        assert!(parse_args(strings(&["in.wav", "out.wav", "--latency", "long"])).is_err());
        assert!(parse_args(strings(&["in.wav", "out.wav", "--wet"])).is_err());
    }

    #[test]
    fn test_render_compensates_latency_and_keeps_tail() {
        let ctx = AudioContext::new(GraphFormat {
            sample_rate: 48000,
            frames_per_block: 100,
            num_channels: 1,
        })
        .unwrap();
        let node = ConvolverNode::new(&ctx);
        ctx.add_node(node.clone()).unwrap();
        node.set_latency_mode(LatencyMode::Short).unwrap();
        node.set_buffer(ImpulseResponse::from_channels(&[[0.0, 0.0, 1.0]], 48000))
            .unwrap();

        let mut input = AudioBuffer::silence(500, 1);
        input.channel_mut(0)[10] = 1.0;

        let output = render(&ctx, &input, node.latency_frames(), 2);
        assert_eq!(output.num_frames(), 502);
        // Two-frame delay from the kernel, none from the engine
        for (i, &sample) in output.channel(0).iter().enumerate() {
            let expected = if i == 12 { 1.0 } else { 0.0 };
            assert!((sample - expected).abs() < 1e-4, "frame {}: {}", i, sample);
        }
    }

    #[test]
    fn test_run_writes_wet_file() {
        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("dry.wav");
        let ir_path = dir.path().join("ir.wav");
        let output_path = dir.path().join("wet.wav");

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 48000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&input_path, spec).unwrap();
        for i in 0..1000 {
            writer.write_sample(if i == 0 { 1.0f32 } else { 0.0 }).unwrap();
        }
        writer.finalize().unwrap();

        let mut writer = hound::WavWriter::create(&ir_path, spec).unwrap();
        for sample in [0.5f32, 0.25, 0.125] {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();

        let config_path = dir.path().join("render.yaml");
        std::fs::write(&config_path, "convolver:\n  latency_mode: medium\n").unwrap();

        run(Args {
            input: input_path,
            output: output_path.clone(),
            impulse: Some(ir_path),
            config: Some(config_path),
            latency: None,
            gain: Some(2.0),
        })
        .unwrap();

        let mut reader = hound::WavReader::open(&output_path).unwrap();
        let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), 1002);
        assert!((samples[0] - 1.0).abs() < 1e-4);
        assert!((samples[1] - 0.5).abs() < 1e-4);
        assert!((samples[2] - 0.25).abs() < 1e-4);
        assert!(samples[3..].iter().all(|s| s.abs() < 1e-4));
    }
}
