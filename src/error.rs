//! Error types surfaced by the SDK.
//!
//! Every failure is a plain value. Nothing in this crate aborts the host
//! process on a precondition violation.

use thiserror::Error;

/// Errors returned by SDK entry points.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdError {
    /// Called before `init` or after `finalize`.
    #[error("ad SDK is not initialized")]
    NotInitialized,

    /// Null handle, stale generation, or an instance already `Released`.
    #[error("invalid or released ad handle")]
    InvalidHandle,

    /// A GL-thread-only operation was called from another thread.
    #[error("`{0}` must be called on the GL thread")]
    WrongThread(&'static str),

    /// Malformed vertex or texcoord arrays.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// The creative could not be fetched or decoded.
    #[error("ad fetch failed: {0}")]
    FetchFailed(String),

    /// The instance has no GPU resources yet, so GL-side mutation is not
    /// possible.
    #[error("ad has no GPU resources yet")]
    NotReady,

    /// GL object creation failed (usually a lost context).
    #[error("GPU error: {0}")]
    Gpu(String),

    /// Configuration could not be parsed or is out of range.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// `max_instances` ads are already alive.
    #[error("too many live ads (limit {0})")]
    CapacityExceeded(usize),

    /// No fetch worker thread could be started.
    #[error("failed to start fetch workers: {0}")]
    WorkerSpawn(String),
}

/// Failure reported by an [`AdSource`](crate::fetch::AdSource).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Transport-level failure (no fill, timeout, HTTP error...).
    #[error("network error: {0}")]
    Network(String),

    /// The creative bytes could not be decoded into pixels.
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<FetchError> for AdError {
    fn from(err: FetchError) -> Self {
        AdError::FetchFailed(err.to_string())
    }
}
