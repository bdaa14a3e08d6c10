//! Error taxonomy for the rendering pipeline.
//!
//! Errors are split by how far they are allowed to propagate:
//!
//! - [`LoaderError`]: thrown by route hooks (`get_data`, `get_meta`, `on_enter`).
//!   Recorded on the [`RouteContext`](crate::context::RouteContext), never fatal
//!   to the pipeline. A page can still render in a degraded state.
//! - [`ResourceError`]: a resource producer rejected. Surfaces as a loader-level
//!   or render-level failure depending on where the resource was consulted.
//! - [`RenderError`]: the renderer could not produce output. Fatal to the
//!   current response.
//! - [`PipelineError`]: the top-level umbrella returned by the request
//!   pipeline, including phase-ordering violations (protocol errors).
//!
//! No retries happen anywhere in this module tree. If a producer wants retry
//! behavior, it implements it itself before settling.

use thiserror::Error;

use crate::context::Phase;

/// Errors raised by route lifecycle hooks.
///
/// These are caught per-phase and attached to the context; the state machine
/// still advances so partial pages can render an error state.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LoaderError {
    /// A lifecycle hook returned an error.
    #[error("{phase} hook failed: {message}")]
    Hook { phase: &'static str, message: String },

    /// The context initializer module failed during construction.
    #[error("context initializer failed: {0}")]
    Init(String),

    /// A suspended resource settled with an error.
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

impl LoaderError {
    pub fn hook(phase: &'static str, message: impl Into<String>) -> Self {
        Self::Hook { phase, message: message.into() }
    }
}

/// Errors raised by resource producers.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResourceError {
    /// The producer's operation rejected.
    #[error("resource producer failed: {0}")]
    Producer(String),

    /// The data endpoint answered with a failure status.
    #[error("data endpoint returned status {0}")]
    Status(u16),

    /// The producer's payload could not be decoded.
    #[error("resource payload could not be decoded: {0}")]
    Decode(String),
}

/// Fatal rendering failures.
///
/// Unlike [`LoaderError`], any of these aborts the response: the caller turns
/// it into a server error instead of flushing a partial, malformed stream.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RenderError {
    /// The renderer failed while producing output.
    #[error("render failed: {0}")]
    Render(String),

    /// The renderer was unable to produce any output at all, e.g. because a
    /// required piece of context was missing.
    #[error("renderer protocol violation: {0}")]
    Protocol(String),

    /// The document template could not be split into a shell pair.
    #[error("invalid shell template: {0}")]
    Template(String),

    /// A suspended resource settled with an error during rendering.
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

/// Errors in the hydration serialization contract.
#[derive(Debug, Error)]
pub enum HydrationError {
    #[error("hydration payload could not be encoded: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("hydration payload could not be decoded: {0}")]
    Decode(#[source] serde_json::Error),

    /// The document did not carry the expected payload bindings.
    #[error("hydration binding `{0}` is missing")]
    MissingBinding(&'static str),
}

/// Top-level pipeline failures returned to the Host.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No route in the catalog matches the requested path.
    #[error("no route matches path `{0}`")]
    RouteNotFound(String),

    /// A lifecycle phase was driven out of order.
    #[error("phase order violation: expected {expected:?}, found {found:?}")]
    Phase { expected: Phase, found: Phase },

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Hydration(#[from] HydrationError),

    /// A loader error escalated because nothing could render around it.
    #[error(transparent)]
    Loader(#[from] LoaderError),
}
