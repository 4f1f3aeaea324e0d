//! Shared fixtures for the integration tests.
//!
//! - `MemorySource`: a `RangeFetch` that serves deterministic bytes, logs every
//!   request and can mark URIs as broken
//! - `CountingRefill`: a `UriRefill` that counts its round-trips
//! - `RangeServer`: a real HTTP server on localhost answering Range requests

#![allow(dead_code)]

use std::collections::HashSet;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::extract::State;
use axum::http::header::{CONTENT_RANGE, CONTENT_TYPE, RANGE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use rangestream::transport::{FullBody, ProbeInfo, Progress};
use rangestream::{RangeFetch, TransportError, UriRefill};

pub fn pattern(size: u64) -> Bytes {
    (0..size).map(|i| (i % 251) as u8).collect()
}

pub struct MemorySource {
    data: Bytes,
    delay: Duration,
    broken: Mutex<HashSet<String>>,
    requests: Mutex<Vec<(String, Range<u64>)>>,
}

impl MemorySource {
    pub fn new(size: u64) -> Self {
        Self::with_delay(size, Duration::ZERO)
    }

    pub fn with_delay(size: u64, delay: Duration) -> Self {
        Self {
            data: pattern(size),
            delay,
            broken: Mutex::new(HashSet::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn break_uri(&self, uri: &str) {
        self.broken.lock().insert(uri.to_string());
    }

    pub fn requests(&self) -> Vec<(String, Range<u64>)> {
        self.requests.lock().clone()
    }

    pub fn ranges(&self) -> Vec<Range<u64>> {
        self.requests().into_iter().map(|(_, r)| r).collect()
    }
}

#[async_trait]
impl RangeFetch for MemorySource {
    async fn probe(&self, _uri: &str) -> Result<ProbeInfo, TransportError> {
        Ok(ProbeInfo {
            partial: true,
            content_length: Some(self.data.len() as u64),
            content_type: Some("audio/mp4".into()),
        })
    }

    async fn fetch_range(
        &self,
        uri: &str,
        range: Range<u64>,
        cancel: &CancellationToken,
        progress: Progress<'_>,
    ) -> Result<Bytes, TransportError> {
        self.requests.lock().push((uri.to_string(), range.clone()));
        if !self.delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                _ = tokio::time::sleep(self.delay) => {}
            }
        }
        if self.broken.lock().contains(uri) {
            return Err(TransportError::Permanent(format!("{uri} returned 500")));
        }
        let end = range.end.min(self.data.len() as u64);
        let start = range.start.min(end);
        let bytes = self.data.slice(start as usize..end as usize);
        progress(bytes.len() as u64);
        Ok(bytes)
    }

    async fn fetch_all(
        &self,
        _uri: &str,
        _cancel: &CancellationToken,
        progress: Progress<'_>,
    ) -> Result<FullBody, TransportError> {
        progress(self.data.len() as u64);
        Ok(FullBody {
            data: self.data.clone(),
            content_length: Some(self.data.len() as u64),
            content_type: Some("audio/mp4".into()),
        })
    }
}

pub struct CountingRefill {
    calls: AtomicUsize,
    uris: Vec<String>,
    delay: Duration,
}

impl CountingRefill {
    pub fn new(uris: &[&str], delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            uris: uris.iter().map(|u| u.to_string()).collect(),
            delay,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UriRefill for CountingRefill {
    async fn request_uris(&self) -> Vec<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.uris.clone()
    }
}

/// Localhost server exposing `/media.bin` with Range support, `/plain.bin`
/// without it and `/missing` answering 404.
pub struct RangeServer {
    pub base: String,
    shutdown: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl RangeServer {
    pub async fn start(data: Bytes) -> Self {
        let app = Router::new()
            .route("/media.bin", get(ranged))
            .route("/plain.bin", get(plain))
            .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
            .with_state(data);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let signal = shutdown.clone().cancelled_owned();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(signal)
                .await
                .unwrap();
        });

        Self {
            base: format!("http://{addr}"),
            shutdown,
            task,
        }
    }

    /// Stop accepting connections; later requests are refused.
    pub async fn stop(self) {
        self.shutdown.cancel();
        self.task.await.unwrap();
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}

async fn plain(State(data): State<Bytes>) -> Response {
    ([(CONTENT_TYPE, "audio/mpeg")], data).into_response()
}

async fn ranged(State(data): State<Bytes>, headers: HeaderMap) -> Response {
    let len = data.len() as u64;
    let Some((start, end)) = headers
        .get(RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_range(v, len))
    else {
        return plain(State(data)).await;
    };

    let content_range = format!("bytes {start}-{}/{len}", end - 1);
    (
        StatusCode::PARTIAL_CONTENT,
        [
            (CONTENT_RANGE, content_range),
            (CONTENT_TYPE, "audio/mpeg".to_string()),
        ],
        data.slice(start as usize..end as usize),
    )
        .into_response()
}

/// Parse `bytes=a-b` or `bytes=a-` into a half-open range clamped to `len`.
fn parse_range(value: &str, len: u64) -> Option<(u64, u64)> {
    let bounds = value.strip_prefix("bytes=")?;
    let (start, end) = bounds.split_once('-')?;
    let start: u64 = start.parse().ok()?;
    let end = match end {
        "" => len,
        end => end.parse::<u64>().ok()?.saturating_add(1).min(len),
    };
    (start < end).then_some((start, end))
}
