//! Error types shared by every layer of the stream.

use thiserror::Error;

/// Errors reported by a [`RangeFetch`](crate::transport::RangeFetch) implementation.
///
/// The variant decides the failover policy: transient errors are retried against
/// the same URI, permanent errors drop the URI from the pool.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The client is busy or being reallocated; the same URI may be retried.
    #[error("transient transport error: {0}")]
    Transient(String),

    /// The URI failed and should not be used again.
    #[error("transport error: {0}")]
    Permanent(String),

    /// The request was cancelled cooperatively.
    #[error("request cancelled")]
    Cancelled,
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Transient(_))
    }
}

/// Errors surfaced to callers of [`RangeStream`](crate::RangeStream) and
/// [`StreamFactory`](crate::StreamFactory).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StreamError {
    /// Every candidate URI failed and the refill round-trip supplied nothing usable.
    #[error("no source URI available")]
    NoUriAvailable,

    /// The probe response did not carry a usable `Content-Length`.
    #[error("remote server did not return Content-Length")]
    MissingContentLength,

    /// A second read was started on a handle that already has one outstanding.
    #[error("concurrent read on a single stream handle")]
    ConcurrentAccess,

    /// The requested range ends before it starts.
    #[error("invalid range: end {end} is before start {start}")]
    OutOfRange { start: u64, end: u64 },

    /// The operation was cancelled, either by the caller or by closing the handle.
    #[error("operation cancelled")]
    Cancelled,

    /// A strict length check failed.
    #[error("integrity check failed: expected {expected} bytes, got {actual}")]
    Integrity { expected: u64, actual: u64 },

    /// A transport failure outside the failover loop (probing, full download).
    #[error(transparent)]
    Transport(TransportError),
}

impl From<TransportError> for StreamError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Cancelled => StreamError::Cancelled,
            other => StreamError::Transport(other),
        }
    }
}

pub type Result<T, E = StreamError> = std::result::Result<T, E>;
