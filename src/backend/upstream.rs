use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{Instrument, debug, debug_span, trace, warn};

use super::ReadContext;
use crate::config::StreamConfig;
use crate::error::{Result, StreamError, TransportError};
use crate::metrics::MetricsCollector;
use crate::pool::UriFailoverPool;
use crate::transport::RangeFetch;

/// Network side of a backend: the fetcher, its URI pool and the retry policy.
pub(crate) struct Upstream {
    fetcher: Arc<dyn RangeFetch>,
    pool: UriFailoverPool,
    metrics: MetricsCollector,
    max_transient_retries: u32,
    transient_backoff: Duration,
    strict: bool,
}

impl Upstream {
    pub fn new(
        fetcher: Arc<dyn RangeFetch>,
        pool: UriFailoverPool,
        metrics: MetricsCollector,
        config: &StreamConfig,
        strict: bool,
    ) -> Self {
        Self {
            fetcher,
            pool,
            metrics,
            max_transient_retries: config.max_transient_retries,
            transient_backoff: config.transient_backoff,
            strict,
        }
    }

    pub fn pool(&self) -> &UriFailoverPool {
        &self.pool
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Fetch `range`, failing over between URIs until one succeeds.
    ///
    /// Transient errors retry the same URI, any other error drops it. The
    /// returned bytes are never empty and never longer than `range`; they may
    /// be shorter unless strict length checking is on.
    pub async fn fetch(&self, range: Range<u64>, ctx: &ReadContext<'_>) -> Result<Bytes> {
        let expected = range.end - range.start;
        let mut transient = 0u32;

        loop {
            if ctx.cancel().is_cancelled() {
                return Err(StreamError::Cancelled);
            }
            let uri = self.pool.ensure_uri(ctx.cancel()).await?;

            let result = {
                let _conn = self.metrics.connection();
                let progress = |n: u64| ctx.report(n);
                let span = debug_span!("fetch", uri = %uri, start = range.start, end = range.end);
                self.fetcher
                    .fetch_range(&uri, range.clone(), ctx.cancel(), &progress)
                    .instrument(span)
                    .await
                    .and_then(|bytes| self.check_length(bytes, expected))
            };

            match result {
                Ok(bytes) => {
                    debug!(uri = %uri, start = range.start, len = bytes.len(), "fetched range");
                    self.metrics.record(bytes.len() as u64);
                    ctx.complete_request(bytes.len() as u64);
                    return Ok(bytes);
                }
                Err(TransportError::Cancelled) => return Err(StreamError::Cancelled),
                Err(TransportError::Transient(msg)) if transient < self.max_transient_retries => {
                    transient += 1;
                    warn!(
                        uri = %uri,
                        "transient error, retry {}/{}: {}",
                        transient, self.max_transient_retries, msg
                    );
                    self.backoff(transient, ctx).await?;
                }
                Err(err) => {
                    warn!(uri = %uri, error = %err, "source failed");
                    self.pool.drop_if_current(&uri);
                    transient = 0;
                }
            }
        }
    }

    fn check_length(&self, mut bytes: Bytes, expected: u64) -> Result<Bytes, TransportError> {
        let actual = bytes.len() as u64;
        if actual == 0 && expected > 0 {
            return Err(TransportError::Permanent("empty response body".into()));
        }
        if self.strict && actual != expected {
            return Err(TransportError::Permanent(format!(
                "expected {expected} bytes, got {actual}"
            )));
        }
        if actual > expected {
            trace!(expected, actual, "discarding bytes past the requested range");
            bytes.truncate(expected as usize);
        }
        Ok(bytes)
    }

    async fn backoff(&self, attempt: u32, ctx: &ReadContext<'_>) -> Result<()> {
        if self.transient_backoff.is_zero() {
            return Ok(());
        }
        tokio::select! {
            biased;
            _ = ctx.cancel().cancelled() => Err(StreamError::Cancelled),
            _ = tokio::time::sleep(self.transient_backoff * attempt) => Ok(()),
        }
    }
}
