//! Strategies that turn a byte-range request into bytes.
//!
//! - [`Direct`]: every read goes to the network, nothing is cached.
//! - [`FullBuffer`]: the whole resource was downloaded up front.
//! - [`PartialBuffer`]: fetched ranges are cached and only gaps are requested.
//!
//! `Direct` and `PartialBuffer` share the URI failover loop in [`Upstream`].

mod direct;
mod full;
mod partial;
mod upstream;

pub use direct::Direct;
pub use full::FullBuffer;
pub use partial::PartialBuffer;
pub(crate) use upstream::Upstream;

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::metrics::MetricsCollector;

/// Per-read state passed down through every await point of a read.
pub struct ReadContext<'a> {
    cancel: &'a CancellationToken,
    progress: Option<&'a (dyn Fn(u64) + Send + Sync)>,
    transferred: AtomicU64,
}

impl<'a> ReadContext<'a> {
    pub fn new(cancel: &'a CancellationToken) -> Self {
        Self {
            cancel,
            progress: None,
            transferred: AtomicU64::new(0),
        }
    }

    /// Report network bytes received by this read through `progress`.
    pub fn with_progress(mut self, progress: &'a (dyn Fn(u64) + Send + Sync)) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn cancel(&self) -> &CancellationToken {
        self.cancel
    }

    /// Network bytes received by completed requests of this read.
    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }

    /// Report `in_request` bytes of the request currently in flight.
    pub(crate) fn report(&self, in_request: u64) {
        if let Some(progress) = self.progress {
            progress(self.transferred() + in_request);
        }
    }

    pub(crate) fn complete_request(&self, bytes: u64) {
        self.transferred.fetch_add(bytes, Ordering::Relaxed);
    }
}

/// Memory held by a backend's byte buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferUsage {
    pub allocated: u64,
    pub used: u64,
}

/// Capability set shared by all backends.
///
/// A backend is shared between every [`RangeStream`](crate::RangeStream) handle
/// cloned from the same stream.
#[async_trait]
pub trait FetchBackend: Send + Sync {
    /// Return the bytes of `range`, with the end clamped to [`size`](Self::size).
    async fn read_range(&self, range: Range<u64>, ctx: &ReadContext<'_>) -> Result<Bytes>;

    /// Append candidate URIs to the failover pool, if the backend has one.
    fn supply_new_uris(&self, uris: Vec<String>);

    /// Current candidate URIs, in failover order.
    fn active_uris(&self) -> Vec<String>;

    fn size(&self) -> u64;

    fn metrics(&self) -> &MetricsCollector;

    fn buffer_usage(&self) -> BufferUsage;
}

/// Clamp `range` to `[0, size)`, keeping `start <= end`.
pub(crate) fn clamp(range: Range<u64>, size: u64) -> Range<u64> {
    let end = range.end.min(size);
    range.start.min(end)..end
}
