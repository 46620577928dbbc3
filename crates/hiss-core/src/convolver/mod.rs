//! FIR convolution node
//!
//! [`ConvolverNode`] applies a pre-gain and then convolves each channel of
//! the stream with the matching channel of an [`ImpulseResponse`], using a
//! partitioned engine created through an [`EngineFactory`](crate::engine::EngineFactory).
//!
//! ```ignore
//! let ctx = AudioContext::new(GraphFormat::default())?;
//! let reverb = ConvolverNode::new(&ctx);
//! ctx.add_node(reverb.clone())?;
//! reverb.load_file("hall.wav")?;
//! reverb.set_latency_mode(LatencyMode::Short)?;
//! ```

mod gain;
mod impulse;
mod node;

pub use gain::PreGain;
pub use impulse::ImpulseResponse;
pub use node::{ConvolverBuilder, ConvolverNode};
