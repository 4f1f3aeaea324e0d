//! On-demand buffering backend.
//!
//! Bytes are fetched in chunk-aligned windows and kept for the lifetime of the
//! backend. An [`IntervalTracker`] records what is still missing, so a read only
//! goes to the network for the gaps it touches.
//!
//! ## Fetch loop
//!
//! For a read of `[start, end)`:
//!
//! 1. `end` is clamped to the resource size.
//! 2. While any part of `[start, end)` is missing, the read is widened to a
//!    coalesced window aligned to `chunk_size` (at least one chunk long). The
//!    first missing gap that touches `[start, end)` is clipped to that window
//!    and fetched; holes before `start` are left alone. One gap per round-trip
//!    keeps memory and latency per request bounded.
//! 3. Fetched bytes are copied into the buffer and marked in the tracker under
//!    the write lock. A failed or cancelled fetch marks nothing.
//! 4. The requested slice is copied out of the buffer.
//!
//! Concurrent reads of the same gap may both fetch it. Both writes carry the
//! same bytes, so the duplicate is wasted bandwidth but never corrupts state.

use std::ops::Range;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tracing::trace;

use super::{BufferUsage, FetchBackend, ReadContext, Upstream, clamp};
use crate::error::Result;
use crate::interval::IntervalTracker;
use crate::metrics::MetricsCollector;

struct BufferState {
    missing: IntervalTracker,
    data: Vec<u8>,
}

/// Caching backend that fills its buffer on demand.
pub struct PartialBuffer {
    size: u64,
    chunk_size: u64,
    state: RwLock<BufferState>,
    upstream: Upstream,
}

impl PartialBuffer {
    pub(crate) fn new(size: u64, chunk_size: u64, upstream: Upstream) -> Self {
        Self {
            size,
            chunk_size: chunk_size.max(1),
            state: RwLock::new(BufferState {
                missing: IntervalTracker::new(size),
                data: Vec::new(),
            }),
            upstream,
        }
    }

    /// Ranges not yet buffered.
    pub fn missing_ranges(&self) -> Vec<Range<u64>> {
        self.state.read().missing.ranges().to_vec()
    }

    /// Chunk-aligned window covering `[start, end)`, at least one chunk long.
    fn coalesced_window(&self, start: u64, end: u64) -> Range<u64> {
        let chunk = self.chunk_size;
        let window_start = start / chunk * chunk;
        let window_end = end
            .div_ceil(chunk)
            .saturating_mul(chunk)
            .max(window_start.saturating_add(chunk))
            .min(self.size);
        window_start..window_end
    }

    /// Next gap to fetch for `[start, end)`, or `None` once it is fully buffered.
    fn next_gap(&self, start: u64, end: u64) -> Option<Range<u64>> {
        let window = self.coalesced_window(start, end);
        self.state.read().missing.first_gap(start..end, window)
    }

    fn store(&self, offset: u64, bytes: &[u8]) {
        let fetched = offset..offset + bytes.len() as u64;
        let mut state = self.state.write();
        let needed = fetched.end as usize;
        if state.data.len() < needed {
            state.data.resize(needed, 0);
        }
        state.data[fetched.start as usize..needed].copy_from_slice(bytes);
        state.missing.mark_fetched(fetched);
    }
}

#[async_trait]
impl FetchBackend for PartialBuffer {
    async fn read_range(&self, range: Range<u64>, ctx: &ReadContext<'_>) -> Result<Bytes> {
        let Range { start, end } = clamp(range, self.size);
        if start == end {
            return Ok(Bytes::new());
        }

        while let Some(gap) = self.next_gap(start, end) {
            trace!(start = gap.start, end = gap.end, "buffer miss");
            let bytes = self.upstream.fetch(gap.clone(), ctx).await?;
            self.store(gap.start, &bytes);
        }

        let state = self.state.read();
        Ok(Bytes::copy_from_slice(&state.data[start as usize..end as usize]))
    }

    fn supply_new_uris(&self, uris: Vec<String>) {
        self.upstream.pool().supply(uris);
    }

    fn active_uris(&self) -> Vec<String> {
        self.upstream.pool().snapshot()
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn metrics(&self) -> &MetricsCollector {
        self.upstream.metrics()
    }

    fn buffer_usage(&self) -> BufferUsage {
        let state = self.state.read();
        BufferUsage {
            allocated: state.data.capacity() as u64,
            used: self.size - state.missing.missing_len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::{FakeFetcher, pattern};
    use crate::config::{DEFAULT_CHUNK_SIZE, StreamConfig};
    use crate::error::{StreamError, TransportError};
    use crate::pool::UriFailoverPool;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    const SIZE: u64 = 1_000_000;

    fn partial(fetcher: Arc<FakeFetcher>, chunk_size: u64) -> PartialBuffer {
        let upstream = Upstream::new(
            fetcher,
            UriFailoverPool::new(vec!["u1".into()]),
            MetricsCollector::new(true),
            &StreamConfig::default(),
            false,
        );
        PartialBuffer::new(SIZE, chunk_size, upstream)
    }

    #[tokio::test]
    async fn small_reads_fetch_aligned_chunks() {
        let fetcher = Arc::new(FakeFetcher::new(SIZE));
        let backend = partial(fetcher.clone(), DEFAULT_CHUNK_SIZE);
        let cancel = CancellationToken::new();

        let bytes = backend.read_range(0..10, &ReadContext::new(&cancel)).await.unwrap();
        assert_eq!(bytes, pattern(SIZE).slice(0..10));
        assert_eq!(fetcher.ranges(), vec![0..262_144]);
        assert_eq!(backend.missing_ranges(), vec![262_144..SIZE]);

        let bytes = backend
            .read_range(300_000..300_010, &ReadContext::new(&cancel))
            .await
            .unwrap();
        assert_eq!(bytes, pattern(SIZE).slice(300_000..300_010));
        assert_eq!(fetcher.ranges(), vec![0..262_144, 262_144..524_288]);
        assert_eq!(backend.missing_ranges(), vec![524_288..SIZE]);

        // buffered data is served without new requests
        backend.read_range(5..300_005, &ReadContext::new(&cancel)).await.unwrap();
        assert_eq!(fetcher.ranges().len(), 2);
    }

    #[tokio::test]
    async fn coalesced_fetch_covers_at_least_a_chunk() {
        let fetcher = Arc::new(FakeFetcher::new(SIZE));
        let backend = partial(fetcher.clone(), DEFAULT_CHUNK_SIZE);
        let cancel = CancellationToken::new();

        for start in [0u64, 1234, 262_140, 999_990] {
            let before = fetcher.ranges().len();
            let end = (start + 100).min(SIZE);
            backend.read_range(start..end, &ReadContext::new(&cancel)).await.unwrap();
            let ranges = fetcher.ranges();
            assert!(ranges.len() - before <= 1);
            if let Some(last) = ranges[before..].last() {
                assert!(last.end - last.start >= DEFAULT_CHUNK_SIZE.min(SIZE - start));
            }
        }
    }

    #[tokio::test]
    async fn only_gaps_are_fetched() {
        let fetcher = Arc::new(FakeFetcher::new(SIZE));
        let backend = partial(fetcher.clone(), 100);
        let cancel = CancellationToken::new();

        backend.read_range(200..300, &ReadContext::new(&cancel)).await.unwrap();
        backend.read_range(500..600, &ReadContext::new(&cancel)).await.unwrap();
        let bytes = backend.read_range(150..650, &ReadContext::new(&cancel)).await.unwrap();
        assert_eq!(bytes, pattern(SIZE).slice(150..650));
        assert_eq!(
            fetcher.ranges(),
            vec![200..300, 500..600, 100..200, 300..500, 600..700]
        );
    }

    #[tokio::test]
    async fn holes_before_the_read_are_not_fetched() {
        let fetcher = Arc::new(FakeFetcher::new(SIZE));
        let backend = partial(fetcher.clone(), 100);
        let cancel = CancellationToken::new();

        // a short body earlier left 150..160 buffered inside the 100..200 chunk
        backend.store(150, &pattern(SIZE)[150..160]);

        let bytes = backend.read_range(155..170, &ReadContext::new(&cancel)).await.unwrap();
        assert_eq!(bytes, pattern(SIZE).slice(155..170));
        assert_eq!(fetcher.ranges(), vec![160..200]);
        assert_eq!(backend.missing_ranges(), vec![0..150, 200..SIZE]);
    }

    #[tokio::test]
    async fn oversized_bodies_only_fill_the_gap() {
        let mut fetcher = FakeFetcher::new(SIZE);
        fetcher.overshoot = 500;
        let fetcher = Arc::new(fetcher);
        let backend = partial(fetcher.clone(), 100);
        let cancel = CancellationToken::new();

        let bytes = backend.read_range(0..10, &ReadContext::new(&cancel)).await.unwrap();
        assert_eq!(bytes, pattern(SIZE).slice(0..10));
        assert_eq!(backend.missing_ranges(), vec![100..SIZE]);
        assert_eq!(backend.buffer_usage().used, 100);
    }

    #[tokio::test]
    async fn same_bytes_regardless_of_chunking() {
        let expected = pattern(SIZE).slice(12_345..54_321);
        let cancel = CancellationToken::new();
        for chunk in [1000, 4096, DEFAULT_CHUNK_SIZE] {
            let backend = partial(Arc::new(FakeFetcher::new(SIZE)), chunk);
            // pre-fetch a few scattered pieces first
            for start in [13_000u64, 20_000, 40_000] {
                backend
                    .read_range(start..start + 10, &ReadContext::new(&cancel))
                    .await
                    .unwrap();
            }
            let bytes = backend
                .read_range(12_345..54_321, &ReadContext::new(&cancel))
                .await
                .unwrap();
            assert_eq!(bytes, expected);
        }
    }

    #[tokio::test]
    async fn over_read_is_clamped_to_size() {
        let fetcher = Arc::new(FakeFetcher::new(SIZE));
        let backend = partial(fetcher.clone(), DEFAULT_CHUNK_SIZE);
        let cancel = CancellationToken::new();

        let bytes = backend
            .read_range(SIZE - 4..SIZE + 100, &ReadContext::new(&cancel))
            .await
            .unwrap();
        assert_eq!(bytes.len(), 4);
        assert_eq!(fetcher.ranges(), vec![786_432..SIZE]);
    }

    #[tokio::test]
    async fn failed_fetch_keeps_earlier_data() {
        let fetcher = FakeFetcher::new(SIZE);
        fetcher.scripted.lock().insert(
            "u1".into(),
            VecDeque::from([TransportError::Permanent("gone".into())]),
        );
        let fetcher = Arc::new(fetcher);
        let backend = partial(fetcher.clone(), 100);
        let cancel = CancellationToken::new();

        let err = backend.read_range(0..10, &ReadContext::new(&cancel)).await.unwrap_err();
        assert_eq!(err, StreamError::NoUriAvailable);
        assert_eq!(backend.missing_ranges(), vec![0..SIZE]);

        backend.supply_new_uris(vec!["u2".into()]);
        backend.read_range(0..10, &ReadContext::new(&cancel)).await.unwrap();
        assert_eq!(backend.missing_ranges(), vec![100..SIZE]);
        assert_eq!(backend.buffer_usage().used, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_fetch_marks_nothing() {
        let mut fetcher = FakeFetcher::new(SIZE);
        fetcher.delay = Duration::from_secs(1);
        let backend = partial(Arc::new(fetcher), 100);
        let cancel = CancellationToken::new();

        let ctx = ReadContext::new(&cancel);
        let read = backend.read_range(0..10, &ctx);
        let canceller = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        };
        let (result, ()) = tokio::join!(read, canceller);
        assert_eq!(result.unwrap_err(), StreamError::Cancelled);
        assert_eq!(backend.missing_ranges(), vec![0..SIZE]);
        assert_eq!(backend.active_uris(), vec!["u1"]);
    }

    #[tokio::test]
    async fn concurrent_reads_of_one_gap_are_harmless() {
        let fetcher = Arc::new(FakeFetcher::new(SIZE));
        let backend = partial(fetcher.clone(), 1000);
        let cancel = CancellationToken::new();

        let (ctx_a, ctx_b) = (ReadContext::new(&cancel), ReadContext::new(&cancel));
        let (a, b) = tokio::join!(
            backend.read_range(0..500, &ctx_a),
            backend.read_range(250..750, &ctx_b)
        );
        assert_eq!(a.unwrap(), pattern(SIZE).slice(0..500));
        assert_eq!(b.unwrap(), pattern(SIZE).slice(250..750));
        assert_eq!(backend.missing_ranges(), vec![1000..SIZE]);
    }
}
