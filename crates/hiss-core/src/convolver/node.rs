//! Convolver node
//!
//! Owns one convolution engine and the active impulse response, and keeps
//! both consistent with the host graph's lifecycle.
//!
//! # Threading
//!
//! - Render thread: [`Node::process`] is called with the graph's render lock
//!   held. It reads node state with `try_lock`, which never contends because
//!   every control-side access to that state takes the render lock first.
//! - Control threads: every mutation of render-visible state (impulse,
//!   engine, reset, lifecycle) runs under the render lock. Changes to engine
//!   construction parameters go through [`AudioContext::reinitialize_node`],
//!   so no block sees a half-rebuilt node.
//! - The pre-gain is the only lock-free shared state.
//!
//! Lock order is always render lock, then node state.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError, Weak};

use super::gain::PreGain;
use super::impulse::{ImpulseResponse, ImpulseStore};
use crate::config::ConvolverConfig;
use crate::engine::{ConvolutionEngine, EngineConfig, EngineFactory, LatencyMode, PartitionedFactory};
use crate::error::{HissError, HissResult};
use crate::graph::{AudioContext, ChannelMode, GraphFormat, Node};
use crate::loader::SourceFile;
use crate::types::{AudioBuffer, Sample};

const DEFAULT_NAME: &str = "convolver";

/// Node state shared between control and render threads
struct ConvolverState {
    /// Present exactly while the node is initialized
    engine: Option<Box<dyn ConvolutionEngine>>,
    impulse: ImpulseStore,
    /// Per-channel start offsets into the render block
    channel_offsets: Vec<usize>,
    channel_mode: ChannelMode,
    latency_mode: LatencyMode,
    fixed_impulse_length: usize,
    max_impulse_length: usize,
}

impl ConvolverState {
    fn new(config: &ConvolverConfig) -> Self {
        Self {
            engine: None,
            impulse: ImpulseStore::default(),
            channel_offsets: Vec::new(),
            channel_mode: config.channel_mode(),
            latency_mode: config.latency_mode,
            fixed_impulse_length: config.fixed_impulse_length,
            max_impulse_length: config.max_impulse_length,
        }
    }

    /// Longest impulse the engine is created for
    fn engine_max_length(&self) -> usize {
        if self.fixed_impulse_length > 0 {
            self.fixed_impulse_length
        } else {
            self.max_impulse_length
        }
    }

    fn allow_reallocate(&self) -> bool {
        self.fixed_impulse_length == 0
    }

    /// Route `impulse` through the engine, channel N to channel N
    ///
    /// Engine channels beyond the impulse's width get an empty impulse so
    /// they pass through.
    fn apply_impulse(&mut self, impulse: &ImpulseResponse) -> HissResult<()> {
        let allow_reallocate = self.allow_reallocate();
        let Some(engine) = self.engine.as_mut() else {
            return Ok(());
        };

        let num_channels = engine.config().input_channels;
        let mapped = num_channels.min(impulse.num_channels());
        for ch in 0..num_channels {
            let samples: &[Sample] = if ch < mapped { impulse.channel(ch) } else { &[] };
            engine
                .set_impulse(ch, ch, samples, allow_reallocate)
                .map_err(|source| HissError::ImpulseRejected { channel: ch, source })?;
        }
        Ok(())
    }

    /// Drop every route so all channels pass through
    fn clear_routes(&mut self) {
        let allow_reallocate = self.allow_reallocate();
        if let Some(engine) = self.engine.as_mut() {
            for ch in 0..engine.config().input_channels {
                if let Err(e) = engine.set_impulse(ch, ch, &[], allow_reallocate) {
                    log::warn!("Failed to clear route {}: {}", ch, e);
                }
            }
        }
    }

    /// Install a new impulse, restoring the previous one if the engine
    /// rejects any channel
    fn set_impulse(&mut self, node: &str, impulse: Arc<ImpulseResponse>) -> HissResult<()> {
        let previous = self.impulse.replace(impulse.clone());
        if self.engine.is_none() {
            log::debug!("Convolver '{}': impulse stored, applied on initialize", node);
            return Ok(());
        }

        log::info!(
            "Convolver '{}': loading impulse of {} frames, {} channels",
            node,
            impulse.num_frames(),
            impulse.num_channels()
        );

        if let Err(e) = self.apply_impulse(&impulse) {
            log::error!("Convolver '{}': {}", node, e);
            self.rollback(node, previous);
            return Err(e);
        }

        log::info!("Convolver '{}': impulse loaded", node);
        Ok(())
    }

    fn rollback(&mut self, node: &str, previous: Option<Arc<ImpulseResponse>>) {
        match &previous {
            Some(impulse) => {
                log::warn!("Convolver '{}': restoring previous impulse", node);
                if let Err(e) = self.apply_impulse(impulse) {
                    log::warn!(
                        "Convolver '{}': previous impulse no longer fits ({}), passing through",
                        node,
                        e
                    );
                    self.clear_routes();
                    self.impulse.restore(None);
                    return;
                }
            }
            None => self.clear_routes(),
        }
        self.impulse.restore(previous);
    }
}

/// FIR convolution node: pre-gain, then partitioned convolution of each
/// channel with the matching impulse channel
pub struct ConvolverNode {
    name: String,
    context: Weak<AudioContext>,
    sample_rate: u32,
    factory: Box<dyn EngineFactory>,
    pre_gain: PreGain,
    initialized: AtomicBool,
    num_channels: AtomicUsize,
    state: Mutex<ConvolverState>,
}

/// Builder for [`ConvolverNode`]
pub struct ConvolverBuilder<'a> {
    context: &'a Arc<AudioContext>,
    name: String,
    factory: Box<dyn EngineFactory>,
    config: ConvolverConfig,
}

impl ConvolverBuilder<'_> {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Engine implementation (default: [`PartitionedFactory`])
    pub fn factory(mut self, factory: impl EngineFactory + 'static) -> Self {
        self.factory = Box::new(factory);
        self
    }

    pub fn config(mut self, config: ConvolverConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the node, loading the configured impulse file if any
    ///
    /// The node is not part of the graph yet; pass it to
    /// [`AudioContext::add_node`] to start processing.
    pub fn build(self) -> HissResult<Arc<ConvolverNode>> {
        if self.config.channels == Some(0) {
            return Err(HissError::InvalidChannelCount(0));
        }
        let impulse_path = self.config.impulse_path.clone();
        let node = Arc::new(self.assemble());
        if let Some(path) = impulse_path {
            node.load_file(&path)?;
        }
        Ok(node)
    }

    fn assemble(self) -> ConvolverNode {
        let channel_mode = self.config.channel_mode();
        let num_channels = channel_mode.resolve(self.context.num_channels());
        let pre_gain = PreGain::default();
        pre_gain.set(self.config.pre_gain);

        ConvolverNode {
            name: self.name,
            context: Arc::downgrade(self.context),
            sample_rate: self.context.sample_rate(),
            factory: self.factory,
            pre_gain,
            initialized: AtomicBool::new(false),
            num_channels: AtomicUsize::new(num_channels),
            state: Mutex::new(ConvolverState::new(&self.config)),
        }
    }
}

impl ConvolverNode {
    /// Create a node with default settings and the built-in engine
    pub fn new(context: &Arc<AudioContext>) -> Arc<Self> {
        Arc::new(Self::builder(context).assemble())
    }

    pub fn builder(context: &Arc<AudioContext>) -> ConvolverBuilder<'_> {
        ConvolverBuilder {
            context,
            name: DEFAULT_NAME.to_string(),
            factory: Box::new(PartitionedFactory),
            config: ConvolverConfig::default(),
        }
    }

    /// Sample rate impulse responses are converted to
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn lock_state(&self) -> MutexGuard<'_, ConvolverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` on the node state under the render lock
    ///
    /// Must not be called from host callbacks, which already hold the lock.
    fn with_state<R>(&self, f: impl FnOnce(&mut ConvolverState) -> R) -> R {
        let context = self.context.upgrade();
        let _graph = context.as_ref().map(|c| c.lock());
        let mut state = self.lock_state();
        f(&mut state)
    }

    /// Change engine construction parameters through a host-driven
    /// uninitialize/initialize cycle
    fn reconfigure(&self, f: impl FnOnce(&mut ConvolverState)) -> HissResult<()> {
        match self.context.upgrade() {
            Some(context) => context.reinitialize_node(self, || f(&mut self.lock_state())),
            None => {
                f(&mut self.lock_state());
                Ok(())
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Impulse response
    // ─────────────────────────────────────────────────────────────

    /// Replace the impulse response
    ///
    /// Channel N of the impulse convolves channel N of the stream; stream
    /// channels beyond the impulse's width pass through. If the engine
    /// rejects any channel the previous impulse stays active and
    /// [`HissError::ImpulseRejected`] is returned.
    pub fn set_buffer(&self, impulse: impl Into<Arc<ImpulseResponse>>) -> HissResult<()> {
        let impulse = impulse.into();
        if impulse.is_empty() {
            return Err(HissError::EmptyImpulse);
        }
        if impulse.sample_rate() != self.sample_rate {
            log::warn!(
                "Convolver '{}': impulse is {}Hz but the graph runs at {}Hz",
                self.name,
                impulse.sample_rate(),
                self.sample_rate
            );
        }
        self.with_state(|state| state.set_impulse(&self.name, impulse))
    }

    /// Decode a source file at the node's sample rate and install it
    pub fn load_buffer(&self, source: &SourceFile) -> HissResult<()> {
        let buffer = source.load_buffer_at(self.sample_rate)?;
        self.set_buffer(ImpulseResponse::new(buffer, self.sample_rate))
    }

    /// Open, decode and install an impulse file
    pub fn load_file(&self, path: impl AsRef<Path>) -> HissResult<()> {
        let source = SourceFile::open(path)?;
        self.load_buffer(&source)
    }

    /// The active impulse response
    pub fn buffer(&self) -> Option<Arc<ImpulseResponse>> {
        self.with_state(|state| state.impulse.current().cloned())
    }

    // ─────────────────────────────────────────────────────────────
    // Engine parameters
    // ─────────────────────────────────────────────────────────────

    pub fn latency_mode(&self) -> LatencyMode {
        self.with_state(|state| state.latency_mode)
    }

    /// Switch the partition scheme, rebuilding the engine
    pub fn set_latency_mode(&self, mode: LatencyMode) -> HissResult<()> {
        if self.latency_mode() == mode {
            return Ok(());
        }
        log::info!("Convolver '{}': latency mode -> {}", self.name, mode);
        self.reconfigure(|state| state.latency_mode = mode)
    }

    /// Input-to-output delay of the current engine in frames
    pub fn latency_frames(&self) -> usize {
        self.with_state(|state| {
            state
                .engine
                .as_ref()
                .map_or(state.latency_mode.latency_frames(), |engine| engine.latency_frames())
        })
    }

    pub fn fixed_impulse_length(&self) -> usize {
        self.with_state(|state| state.fixed_impulse_length)
    }

    /// Pin the engine's impulse storage to `frames` (0 = grow as needed)
    ///
    /// With a fixed length, impulses longer than `frames` are rejected and
    /// the engine never reallocates after initialization.
    pub fn set_fixed_impulse_length(&self, frames: usize) -> HissResult<()> {
        if self.fixed_impulse_length() == frames {
            return Ok(());
        }
        log::info!("Convolver '{}': fixed impulse length -> {}", self.name, frames);
        self.reconfigure(|state| state.fixed_impulse_length = frames)
    }

    pub fn max_impulse_length(&self) -> usize {
        self.with_state(|state| state.max_impulse_length)
    }

    pub fn set_max_impulse_length(&self, frames: usize) -> HissResult<()> {
        if self.max_impulse_length() == frames {
            return Ok(());
        }
        self.reconfigure(|state| state.max_impulse_length = frames)
    }

    pub fn channel_mode(&self) -> ChannelMode {
        self.with_state(|state| state.channel_mode)
    }

    pub fn set_channel_mode(&self, mode: ChannelMode) -> HissResult<()> {
        if mode == ChannelMode::Specified(0) {
            return Err(HissError::InvalidChannelCount(0));
        }
        if self.channel_mode() == mode {
            return Ok(());
        }
        log::info!("Convolver '{}': channel mode -> {:?}", self.name, mode);
        self.reconfigure(|state| {
            state.channel_mode = mode;
            if let ChannelMode::Specified(channels) = mode {
                self.num_channels.store(channels, Ordering::Release);
            }
        })
    }

    /// Apply a configuration: engine parameters in one rebuild, then gain,
    /// then the impulse file if one is named
    pub fn apply_config(&self, config: &ConvolverConfig) -> HissResult<()> {
        let channel_mode = config.channel_mode();
        if channel_mode == ChannelMode::Specified(0) {
            return Err(HissError::InvalidChannelCount(0));
        }

        let unchanged = self.with_state(|state| {
            state.latency_mode == config.latency_mode
                && state.fixed_impulse_length == config.fixed_impulse_length
                && state.max_impulse_length == config.max_impulse_length
                && state.channel_mode == channel_mode
        });
        if !unchanged {
            self.reconfigure(|state| {
                state.latency_mode = config.latency_mode;
                state.fixed_impulse_length = config.fixed_impulse_length;
                state.max_impulse_length = config.max_impulse_length;
                state.channel_mode = channel_mode;
                if let ChannelMode::Specified(channels) = channel_mode {
                    self.num_channels.store(channels, Ordering::Release);
                }
            })?;
        }

        self.set_pre_gain(config.pre_gain);

        if let Some(path) = &config.impulse_path {
            self.load_file(path)?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────
    // Gain and state
    // ─────────────────────────────────────────────────────────────

    pub fn pre_gain(&self) -> f32 {
        self.pre_gain.get()
    }

    /// Linear gain applied before convolution; takes effect next block
    pub fn set_pre_gain(&self, gain: f32) {
        self.pre_gain.set(gain);
    }

    pub fn pre_gain_db(&self) -> f32 {
        self.pre_gain.db()
    }

    pub fn set_pre_gain_db(&self, db: f32) {
        self.pre_gain.set_db(db);
    }

    /// Drop pending convolution tails; no-op when uninitialized
    pub fn reset(&self) {
        self.with_state(|state| {
            let allow_reallocate = state.allow_reallocate();
            if let Some(engine) = state.engine.as_mut() {
                engine.clear_state(allow_reallocate);
                log::debug!("Convolver '{}': state cleared", self.name);
            }
        });
    }
}

impl Node for ConvolverNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_channels(&self) -> usize {
        self.num_channels.load(Ordering::Acquire)
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn follows_context_channels(&self) -> bool {
        self.lock_state().channel_mode == ChannelMode::MatchesContext
    }

    fn initialize(&self, format: &GraphFormat) -> HissResult<()> {
        let mut state = self.lock_state();
        state.engine = None;
        self.initialized.store(false, Ordering::Release);

        let num_channels = state.channel_mode.resolve(format.num_channels);
        if num_channels != format.num_channels {
            return Err(HissError::ChannelMismatch {
                node: self.name.clone(),
                node_channels: num_channels,
                graph_channels: format.num_channels,
            });
        }

        let config = EngineConfig::new(num_channels, state.latency_mode, state.engine_max_length());
        let engine = self
            .factory
            .create(&config)
            .map_err(|source| HissError::EngineCreation {
                node: self.name.clone(),
                source,
            })?;
        state.engine = Some(engine);
        state.channel_offsets.clear();
        state.channel_offsets.resize(num_channels, 0);
        self.num_channels.store(num_channels, Ordering::Release);

        // Channel count may have changed, so the held impulse is re-mapped
        if let Some(impulse) = state.impulse.current().cloned() {
            if let Err(e) = state.apply_impulse(&impulse) {
                log::error!("Convolver '{}': failed to re-apply impulse: {}", self.name, e);
                state.engine = None;
                return Err(e);
            }
        }

        self.initialized.store(true, Ordering::Release);
        log::info!(
            "Convolver '{}' initialized: {} channels, {} latency mode, max impulse {} frames",
            self.name,
            num_channels,
            state.latency_mode,
            config.max_impulse_length
        );
        Ok(())
    }

    fn uninitialize(&self) {
        let mut state = self.lock_state();
        state.engine = None;
        self.initialized.store(false, Ordering::Release);
        log::debug!("Convolver '{}' uninitialized", self.name);
    }

    fn process(&self, buffer: &mut AudioBuffer) {
        let mut guard = match self.state.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return,
        };
        let state = &mut *guard;

        if !state.impulse.is_loaded() {
            return;
        }
        let Some(engine) = state.engine.as_mut() else {
            return;
        };

        let num_channels = buffer.num_channels();
        let num_frames = buffer.num_frames();
        assert_eq!(
            num_channels,
            state.channel_offsets.len(),
            "convolver '{}' received a block with the wrong channel count",
            self.name
        );

        // One gain per block
        buffer.scale(self.pre_gain.get());

        for (ch, offset) in state.channel_offsets.iter_mut().enumerate() {
            *offset = ch * num_frames;
        }
        engine.process_in_place(buffer.as_mut_slice(), &state.channel_offsets, num_frames);
    }
}
