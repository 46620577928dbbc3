//! Hiss - real-time partitioned convolution
//!
//! A convolver node for block-based audio graphs: reverb, cabinet and
//! speaker emulation with bounded per-block cost regardless of impulse
//! length.
//!
//! - [`engine`]: the convolution engine contract and the partitioned FFT
//!   engine behind it
//! - [`convolver`]: the node owning an engine and its impulse response
//! - [`graph`]: the host graph driving node lifecycles under one render lock
//! - [`loader`]: impulse response decoding and sample rate conversion
//! - [`config`]: YAML configuration

pub mod config;
pub mod convolver;
pub mod engine;
pub mod error;
pub mod graph;
pub mod loader;
pub mod types;

pub use convolver::{ConvolverNode, ImpulseResponse};
pub use engine::LatencyMode;
pub use error::{HissError, HissResult};
pub use graph::{AudioContext, ChannelMode, GraphFormat, Node};
pub use types::*;
