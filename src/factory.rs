//! Stream construction.
//!
//! The factory probes the remote resource, picks a backend for the requested
//! [`BufferingMode`] and hands back a [`RangeStream`] positioned at 0.

use std::sync::Arc;

use clap::ValueEnum;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backend::{Direct, FetchBackend, FullBuffer, PartialBuffer, Upstream};
use crate::config::StreamConfig;
use crate::error::{Result, StreamError, TransportError};
use crate::metrics::MetricsCollector;
use crate::pool::{UriFailoverPool, UriRefill};
use crate::stream::RangeStream;
use crate::transport::{FullBody, HttpFetcher, ProbeInfo, RangeFetch};

/// How a stream buffers the remote resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BufferingMode {
    /// No cache; every read is a range request.
    Direct,
    /// Cache fetched ranges and only request what is missing.
    OnDemand,
    /// Download the whole resource before the stream is returned.
    ImmediateFull,
}

/// Builds [`RangeStream`]s over a shared transport.
pub struct StreamFactory {
    fetcher: Arc<dyn RangeFetch>,
    config: StreamConfig,
    refill: Option<Arc<dyn UriRefill>>,
}

impl StreamFactory {
    pub fn new(fetcher: Arc<dyn RangeFetch>, config: StreamConfig) -> Self {
        Self {
            fetcher,
            config,
            refill: None,
        }
    }

    /// Create a factory backed by a reqwest client built from `config`.
    pub fn http(config: StreamConfig) -> reqwest::Result<Self> {
        let fetcher = HttpFetcher::new(&config)?;
        Ok(Self::new(Arc::new(fetcher), config))
    }

    /// Ask `refill` for new URIs whenever a stream's pool runs dry.
    pub fn with_refill(mut self, refill: Arc<dyn UriRefill>) -> Self {
        self.refill = Some(refill);
        self
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Create a stream for `uri`.
    ///
    /// # Arguments
    ///
    /// * `uri` - The initial source URI
    /// * `mode` - Which backend to build
    /// * `extra_integrity_check` - Reject responses whose length differs from what was asked
    /// * `cancel` - Aborts probing or the up-front download
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::MissingContentLength`] if the probe does not reveal the
    /// resource size, or a transport error if no URI could be probed or downloaded.
    pub async fn create(
        &self,
        uri: &str,
        mode: BufferingMode,
        extra_integrity_check: bool,
        cancel: &CancellationToken,
    ) -> Result<RangeStream> {
        self.create_with_mirrors(vec![uri.to_string()], mode, extra_integrity_check, cancel)
            .await
    }

    /// Create a stream whose failover pool starts with every URI in `uris`.
    pub async fn create_with_mirrors(
        &self,
        uris: Vec<String>,
        mode: BufferingMode,
        extra_integrity_check: bool,
        cancel: &CancellationToken,
    ) -> Result<RangeStream> {
        let metrics = MetricsCollector::new(self.config.metrics_enabled);

        if mode == BufferingMode::ImmediateFull {
            let body = self.download(&uris, &metrics, cancel).await?;
            if extra_integrity_check
                && let Some(expected) = body.content_length
                && expected != body.data.len() as u64
            {
                let actual = body.data.len() as u64;
                return Err(StreamError::Integrity { expected, actual });
            }
            info!(size = body.data.len(), "resource fully buffered");
            let content_type = body.content_type.unwrap_or_default();
            let backend = FullBuffer::new(body.data, metrics);
            return Ok(RangeStream::new(Arc::new(backend), content_type));
        }

        let (probe, uris) = self.probe(uris, cancel).await?;
        if !probe.partial {
            warn!("server did not answer the range probe with 206 Partial Content, continuing anyway");
        }
        let size = probe.content_length.ok_or(StreamError::MissingContentLength)?;

        let mut pool = UriFailoverPool::new(uris);
        if let Some(refill) = &self.refill {
            pool = pool.with_refill(Arc::clone(refill));
        }
        let upstream = Upstream::new(
            Arc::clone(&self.fetcher),
            pool,
            metrics,
            &self.config,
            extra_integrity_check,
        );

        let backend: Arc<dyn FetchBackend> = match mode {
            BufferingMode::Direct => Arc::new(Direct::new(size, upstream)),
            _ => Arc::new(PartialBuffer::new(
                size,
                self.config.effective_chunk_size(),
                upstream,
            )),
        };
        info!(?mode, size, "stream ready");
        Ok(RangeStream::new(backend, probe.content_type.unwrap_or_default()))
    }

    /// Probe candidates in order; the ones that failed are left out of the returned list.
    async fn probe(
        &self,
        mut uris: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<(ProbeInfo, Vec<String>)> {
        let mut last_error = None;
        while !uris.is_empty() {
            let probe = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StreamError::Cancelled),
                probe = self.fetcher.probe(&uris[0]) => probe,
            };
            match probe {
                Ok(info) => return Ok((info, uris)),
                Err(err) => {
                    warn!(uri = %uris[0], error = %err, "probe failed");
                    uris.remove(0);
                    last_error = Some(err);
                }
            }
        }
        Err(match last_error {
            Some(err) => err.into(),
            None => StreamError::NoUriAvailable,
        })
    }

    async fn download(
        &self,
        uris: &[String],
        metrics: &MetricsCollector,
        cancel: &CancellationToken,
    ) -> Result<FullBody> {
        let mut last_error = StreamError::NoUriAvailable;
        for uri in uris {
            let result = {
                let _conn = metrics.connection();
                self.fetcher.fetch_all(uri, cancel, &|_: u64| {}).await
            };
            match result {
                Ok(body) => {
                    metrics.record(body.data.len() as u64);
                    return Ok(body);
                }
                Err(TransportError::Cancelled) => return Err(StreamError::Cancelled),
                Err(err) => {
                    warn!(uri = %uri, error = %err, "download failed");
                    last_error = err.into();
                }
            }
        }
        Err(last_error)
    }
}
