//! Host audio graph
//!
//! A deliberately small host: it owns a chain of nodes, drives their
//! lifecycle callbacks, and serializes everything through one render lock.
//!
//! # Locking
//!
//! The render thread holds the graph lock for the duration of each block.
//! Control-thread operations that touch state the render thread reads take
//! the same lock first, so a block never observes a half-applied change.
//! Lifecycle cycles (uninitialize → reconfigure → initialize) run under a
//! single acquisition, so no block is rendered in between.
//!
//! The lock is not reentrant: never call back into the context (or into a
//! node's control methods) while holding [`AudioContext::lock`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::error::{HissError, HissResult};
use crate::types::{AudioBuffer, DEFAULT_FRAMES_PER_BLOCK, DEFAULT_NUM_CHANNELS, SAMPLE_RATE};

/// Stream format shared by every node in a graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphFormat {
    pub sample_rate: u32,
    pub frames_per_block: usize,
    pub num_channels: usize,
}

impl Default for GraphFormat {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            frames_per_block: DEFAULT_FRAMES_PER_BLOCK,
            num_channels: DEFAULT_NUM_CHANNELS,
        }
    }
}

/// How a node decides its channel count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelMode {
    /// Follow the graph's channel count, including later changes
    #[default]
    MatchesContext,
    /// Fixed channel count
    Specified(usize),
}

impl ChannelMode {
    /// Channel count for a graph running `context_channels` channels
    pub fn resolve(&self, context_channels: usize) -> usize {
        match self {
            ChannelMode::MatchesContext => context_channels,
            ChannelMode::Specified(channels) => *channels,
        }
    }
}

impl From<Option<usize>> for ChannelMode {
    fn from(channels: Option<usize>) -> Self {
        channels.map_or(ChannelMode::MatchesContext, ChannelMode::Specified)
    }
}

/// A processing node driven by the host graph
///
/// `initialize`, `uninitialize`, `follows_context_channels` and `process` are
/// host callbacks: the graph invokes them with the render lock held.
pub trait Node: Send + Sync {
    /// Name used in log messages and errors
    fn name(&self) -> &str;

    /// Channel count the node is configured for
    fn num_channels(&self) -> usize;

    /// Whether the node is ready to process
    fn is_initialized(&self) -> bool;

    /// Whether the node's channel count tracks the graph's
    fn follows_context_channels(&self) -> bool;

    /// Allocate processing resources for `format`
    fn initialize(&self, format: &GraphFormat) -> HissResult<()>;

    /// Release processing resources
    fn uninitialize(&self);

    /// Process one block in place (render thread)
    fn process(&self, buffer: &mut AudioBuffer);
}

/// Render-lock-protected graph state
pub struct Graph {
    format: GraphFormat,
    nodes: Vec<Arc<dyn Node>>,
}

impl Graph {
    /// Current stream format
    pub fn format(&self) -> &GraphFormat {
        &self.format
    }

    /// Number of nodes in the chain
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn position(&self, node: &dyn Node) -> Option<usize> {
        self.nodes
            .iter()
            .position(|n| std::ptr::addr_eq(Arc::as_ptr(n), node as *const dyn Node))
    }
}

/// The host graph: a serial chain of nodes behind one render lock
pub struct AudioContext {
    sample_rate: u32,
    frames_per_block: usize,
    graph: Mutex<Graph>,
}

impl AudioContext {
    /// Create a context for the given stream format
    pub fn new(format: GraphFormat) -> HissResult<Arc<Self>> {
        if format.num_channels == 0 {
            return Err(HissError::InvalidChannelCount(0));
        }
        log::info!(
            "Audio context: {}Hz, {} frames per block, {} channels",
            format.sample_rate,
            format.frames_per_block,
            format.num_channels
        );
        Ok(Arc::new(Self {
            sample_rate: format.sample_rate,
            frames_per_block: format.frames_per_block,
            graph: Mutex::new(Graph {
                format,
                nodes: Vec::new(),
            }),
        }))
    }

    /// Sample rate every node runs at
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frames rendered per block
    pub fn frames_per_block(&self) -> usize {
        self.frames_per_block
    }

    /// Current graph channel count
    pub fn num_channels(&self) -> usize {
        self.lock().format.num_channels
    }

    /// Acquire the render lock
    ///
    /// While the guard lives, no block is rendered and no other control
    /// operation runs.
    pub fn lock(&self) -> MutexGuard<'_, Graph> {
        self.graph.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Initialize a node and append it to the render chain
    pub fn add_node(&self, node: Arc<dyn Node>) -> HissResult<()> {
        let mut graph = self.lock();
        if graph.position(node.as_ref()).is_some() {
            log::warn!("Node '{}' is already part of the graph", node.name());
            return Ok(());
        }
        node.initialize(&graph.format)?;
        log::debug!("Added node '{}' to graph", node.name());
        graph.nodes.push(node);
        Ok(())
    }

    /// Uninitialize a node and remove it from the render chain
    pub fn remove_node(&self, node: &dyn Node) -> HissResult<()> {
        let mut graph = self.lock();
        let index = graph
            .position(node)
            .ok_or_else(|| HissError::NodeNotFound(node.name().to_string()))?;
        let node = graph.nodes.remove(index);
        node.uninitialize();
        log::debug!("Removed node '{}' from graph", node.name());
        Ok(())
    }

    /// Request a node be initialized for the current format
    pub fn initialize_node(&self, node: &dyn Node) -> HissResult<()> {
        let graph = self.lock();
        node.initialize(&graph.format)
    }

    /// Request a node release its processing resources
    pub fn uninitialize_node(&self, node: &dyn Node) {
        let _graph = self.lock();
        node.uninitialize();
    }

    /// Uninitialize a node, run `reconfigure`, then initialize it again,
    /// all under one render lock acquisition
    ///
    /// A node that is neither initialized nor part of the graph is only
    /// reconfigured. Nodes in the graph are always initialized afterwards,
    /// so a node left uninitialized by a failed cycle recovers on the next.
    pub fn reinitialize_node(&self, node: &dyn Node, reconfigure: impl FnOnce()) -> HissResult<()> {
        let graph = self.lock();
        let active = node.is_initialized() || graph.position(node).is_some();
        if active {
            node.uninitialize();
        }
        reconfigure();
        if active {
            node.initialize(&graph.format)?;
        }
        Ok(())
    }

    /// Change the graph channel count
    ///
    /// Every node following the graph's channel count is cycled through
    /// uninitialize/initialize so it rebuilds for the new layout. Fails
    /// without changing anything if a node with a pinned channel count
    /// cannot run at the new width. A node that fails to initialize stays
    /// uninitialized and the first such error is returned once every node
    /// has been cycled.
    pub fn set_num_channels(&self, num_channels: usize) -> HissResult<()> {
        if num_channels == 0 {
            return Err(HissError::InvalidChannelCount(num_channels));
        }

        let mut graph = self.lock();
        if graph.format.num_channels == num_channels {
            return Ok(());
        }
        if let Some(node) = graph
            .nodes
            .iter()
            .find(|n| !n.follows_context_channels() && n.num_channels() != num_channels)
        {
            return Err(HissError::ChannelMismatch {
                node: node.name().to_string(),
                node_channels: node.num_channels(),
                graph_channels: num_channels,
            });
        }
        log::info!(
            "Graph channel count {} -> {}",
            graph.format.num_channels,
            num_channels
        );
        graph.format.num_channels = num_channels;

        // Every node is cycled even after a failure, so none is left
        // initialized at the old width
        let format = graph.format;
        let mut first_error = None;
        for node in graph.nodes.iter().filter(|n| n.follows_context_channels()) {
            node.uninitialize();
            if let Err(e) = node.initialize(&format) {
                log::error!(
                    "Node '{}' failed to initialize at {} channels: {}",
                    node.name(),
                    num_channels,
                    e
                );
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Render one block through the node chain (render thread)
    pub fn render(&self, buffer: &mut AudioBuffer) {
        let graph = self.lock();
        for node in &graph.nodes {
            node.process(buffer);
        }
    }
}
