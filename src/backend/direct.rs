use std::ops::Range;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use super::{BufferUsage, FetchBackend, ReadContext, Upstream, clamp};
use crate::error::Result;
use crate::metrics::MetricsCollector;

/// Uncached backend: every read becomes one or more range requests.
pub struct Direct {
    size: u64,
    upstream: Upstream,
}

impl Direct {
    pub(crate) fn new(size: u64, upstream: Upstream) -> Self {
        Self { size, upstream }
    }
}

#[async_trait]
impl FetchBackend for Direct {
    async fn read_range(&self, range: Range<u64>, ctx: &ReadContext<'_>) -> Result<Bytes> {
        let range = clamp(range, self.size);
        let expected = (range.end - range.start) as usize;
        let mut buf = BytesMut::with_capacity(expected);

        // Servers may answer with less than asked; keep going from where they stopped.
        while buf.len() < expected {
            let current_start = range.start + buf.len() as u64;
            let chunk = self.upstream.fetch(current_start..range.end, ctx).await?;
            buf.extend_from_slice(&chunk);
        }

        Ok(buf.freeze())
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
        BufferUsage::default()
    }
}
