use std::path::PathBuf;

use prism_engine::device::DeviceError;
use prism_engine::graph::{GraphError, PropError};
use thiserror::Error;

/// Errors surfaced by roots, the reconciler and the resource cache.
#[derive(Debug, Error)]
pub enum PrismError {
    /// A tag outside the element vocabulary. Aborts the commit.
    #[error("unknown element `{0}`")]
    UnknownElement(String),

    /// An attach slot the parent does not have, or a child of the wrong kind.
    /// Logged at commit time; the slot is left unset.
    #[error("cannot attach `{child}` to `{parent}` slot `{slot}`: {reason}")]
    InvalidAttach { parent: String, child: String, slot: String, reason: String },

    /// A prop whose value has the wrong shape. Aborts the commit.
    #[error("invalid prop `{key}` on `{tag}`: {source}")]
    InvalidProp {
        tag: String,
        key: String,
        #[source]
        source: PropError,
    },

    /// A loader failed. The failure is cached and re-surfaced on access.
    #[error("failed to load `{key}`: {message}")]
    ResourceLoad { key: String, message: String },

    /// A frame callback returned an error. Reported, the tick continues.
    #[error("frame callback failed: {0}")]
    SchedulerCallback(String),

    /// A component returned an error of its own.
    #[error("component failed: {0}")]
    Component(String),

    /// Hooks were called in a different order than on the previous render.
    #[error("hook {index} changed kind between renders (expected {expected})")]
    HookOrder { index: usize, expected: &'static str },

    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Structural failure in the native graph.
    #[error(transparent)]
    Graph(GraphError),

    /// The registry was re-entered, e.g. `render` from inside a frame callback.
    #[error("root registry is busy")]
    Busy,

    #[error("invalid root config: {0}")]
    Config(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Markup(#[from] prism_markup::ParseError),
}

impl PrismError {
    pub(crate) fn invalid_prop(tag: &str, key: &str, source: PropError) -> Self {
        PrismError::InvalidProp { tag: tag.to_string(), key: key.to_string(), source }
    }
}

impl From<GraphError> for PrismError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::Device(device) => PrismError::Device(device),
            other => PrismError::Graph(other),
        }
    }
}

/// Outcome of a component render that did not produce a node.
#[derive(Debug)]
pub enum RenderError {
    /// Waiting on a pending resource. The component keeps its previous output
    /// and renders again once the resource settles.
    Suspended,
    Failed(PrismError),
}

impl From<PrismError> for RenderError {
    fn from(err: PrismError) -> Self {
        RenderError::Failed(err)
    }
}

impl From<anyhow::Error> for RenderError {
    fn from(err: anyhow::Error) -> Self {
        RenderError::Failed(PrismError::Component(format!("{err:#}")))
    }
}
