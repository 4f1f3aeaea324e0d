use std::ops::Range;

use async_trait::async_trait;
use bytes::Bytes;

use super::{BufferUsage, FetchBackend, ReadContext, clamp};
use crate::error::Result;
use crate::metrics::MetricsCollector;

/// A finished download; reads are plain memory copies.
pub struct FullBuffer {
    data: Bytes,
    metrics: MetricsCollector,
}

impl FullBuffer {
    pub(crate) fn new(data: Bytes, metrics: MetricsCollector) -> Self {
        Self { data, metrics }
    }
}

#[async_trait]
impl FetchBackend for FullBuffer {
    async fn read_range(&self, range: Range<u64>, _ctx: &ReadContext<'_>) -> Result<Bytes> {
        let range = clamp(range, self.size());
        Ok(self.data.slice(range.start as usize..range.end as usize))
    }

    fn supply_new_uris(&self, _uris: Vec<String>) {}

    fn active_uris(&self) -> Vec<String> {
        Vec::new()
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    fn buffer_usage(&self) -> BufferUsage {
        BufferUsage {
            allocated: self.size(),
            used: self.size(),
        }
    }
}
