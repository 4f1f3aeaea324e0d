//! The public stream handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::backend::{FetchBackend, ReadContext};
use crate::error::{Result, StreamError};
use crate::metrics::StreamMetrics;

/// Progress of a single read, reported while it is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadProgress {
    /// Network bytes received so far by this read.
    pub received: u64,
    /// Bytes the caller asked for, after clamping to the resource size.
    pub requested: u64,
}

/// A cursor into a remote resource of fixed size.
///
/// Handles are cheap: [`Clone`] creates a new handle at position 0 that shares
/// the backend, its URI pool and every cached byte. A single handle allows one
/// outstanding read at a time; concurrent readers each need their own handle.
///
/// An outstanding read borrows its handle, so dropping the read future (or
/// calling [`close`](Self::close) from elsewhere) is what cancels it. The
/// backend lives on while any handle still refers to it.
pub struct RangeStream {
    backend: Arc<dyn FetchBackend>,
    content_type: Arc<str>,
    position: AtomicU64,
    in_flight: AtomicBool,
    closed: CancellationToken,
}

impl RangeStream {
    pub(crate) fn new(backend: Arc<dyn FetchBackend>, content_type: impl Into<Arc<str>>) -> Self {
        Self {
            backend,
            content_type: content_type.into(),
            position: AtomicU64::new(0),
            in_flight: AtomicBool::new(false),
            closed: CancellationToken::new(),
        }
    }

    /// Wrap an already built backend in a fresh handle.
    pub fn from_backend(backend: Arc<dyn FetchBackend>) -> Self {
        Self::new(backend, "")
    }

    /// A new handle sharing this backend, positioned at `start`.
    pub fn clone_at(&self, start: u64) -> Self {
        let stream = Self::new(Arc::clone(&self.backend), Arc::clone(&self.content_type));
        stream.seek(start);
        stream
    }

    /// Read `len` bytes at the cursor and advance it past them.
    pub async fn read(&self, len: u64, cancel: &CancellationToken) -> Result<Bytes> {
        let position = self.position();
        self.read_at(position, len, cancel).await
    }

    /// Seek to `position` and read up to `len` bytes.
    ///
    /// Reads past the end are clamped; a read starting at or after
    /// [`size`](Self::size) returns an empty buffer.
    pub async fn read_at(&self, position: u64, len: u64, cancel: &CancellationToken) -> Result<Bytes> {
        self.read_inner(position, len, cancel, None).await
    }

    /// Like [`read_at`](Self::read_at), reporting progress while bytes arrive.
    pub async fn read_at_with_progress<F>(
        &self,
        position: u64,
        len: u64,
        cancel: &CancellationToken,
        progress: F,
    ) -> Result<Bytes>
    where
        F: Fn(ReadProgress) + Send + Sync,
    {
        let progress: &(dyn Fn(ReadProgress) + Send + Sync) = &progress;
        self.read_inner(position, len, cancel, Some(progress)).await
    }

    async fn read_inner(
        &self,
        position: u64,
        len: u64,
        cancel: &CancellationToken,
        progress: Option<&(dyn Fn(ReadProgress) + Send + Sync)>,
    ) -> Result<Bytes> {
        let end = position
            .checked_add(len)
            .ok_or(StreamError::OutOfRange { start: position, end: u64::MAX })?;

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(StreamError::ConcurrentAccess);
        }
        let _guard = InFlightGuard(&self.in_flight);

        if self.closed.is_cancelled() || cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        self.seek(position);

        let requested = end.min(self.size()).saturating_sub(position);
        let report = |received: u64| {
            if let Some(progress) = progress {
                progress(ReadProgress { received, requested });
            }
        };
        let ctx = ReadContext::new(cancel).with_progress(&report);

        // Closing the handle drops the backend read, which aborts its fetch
        // before anything is marked as buffered.
        let bytes = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(StreamError::Cancelled),
            result = self.backend.read_range(position..end, &ctx) => result?,
        };

        self.position.store(position + bytes.len() as u64, Ordering::Release);
        Ok(bytes)
    }

    /// Read the whole byte range `[start, end)`.
    ///
    /// Fails with [`StreamError::OutOfRange`] when `end < start`.
    pub async fn read_range_exact(
        &self,
        start: u64,
        end: u64,
        cancel: &CancellationToken,
    ) -> Result<Bytes> {
        if end < start {
            return Err(StreamError::OutOfRange { start, end });
        }
        self.read_at(start, end - start, cancel).await
    }

    pub fn seek(&self, position: u64) {
        self.position.store(position, Ordering::Release);
    }

    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    pub fn size(&self) -> u64 {
        self.backend.size()
    }

    /// The `Content-Type` reported by the server, empty if unknown.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn supply_new_uris(&self, uris: Vec<String>) {
        self.backend.supply_new_uris(uris);
    }

    pub fn active_uris(&self) -> Vec<String> {
        self.backend.active_uris()
    }

    pub fn enable_metrics(&self, enabled: bool) {
        self.backend.metrics().set_enabled(enabled);
    }

    /// Sample the backend's metrics, optionally resetting the deltas.
    pub fn get_metrics(&self, clear: bool) -> StreamMetrics {
        let usage = self.backend.buffer_usage();
        StreamMetrics {
            allocated_buffer_size: usage.allocated,
            used_buffer_size: usage.used,
            ..self.backend.metrics().get(clear)
        }
    }

    /// Cancel any outstanding read on this handle and refuse new ones.
    ///
    /// Other handles sharing the backend are unaffected.
    pub fn close(&self) {
        if !self.closed.is_cancelled() {
            debug!("closing stream handle");
            self.closed.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

impl Clone for RangeStream {
    fn clone(&self) -> Self {
        self.clone_at(0)
    }
}

impl std::fmt::Debug for RangeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeStream")
            .field("size", &self.size())
            .field("position", &self.position())
            .field("content_type", &self.content_type)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
