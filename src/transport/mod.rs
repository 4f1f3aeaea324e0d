mod http;

pub use http::HttpFetcher;

use std::ops::Range;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

/// Callback receiving the number of body bytes received so far by one request.
pub type Progress<'a> = &'a (dyn Fn(u64) + Send + Sync);

/// What a ranged probe learned about a remote resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeInfo {
    /// Whether the server answered `206 Partial Content`.
    pub partial: bool,
    /// Total size of the resource, if the server reported it.
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
}

/// A whole response body together with its metadata.
#[derive(Debug, Clone, Default)]
pub struct FullBody {
    pub data: Bytes,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
}

/// Trait for fetching byte ranges of a remote resource
#[async_trait]
pub trait RangeFetch: Send + Sync {
    /// Send a `Range: bytes=0-` request and report the response metadata
    async fn probe(&self, uri: &str) -> Result<ProbeInfo, TransportError>;

    /// Fetch the bytes of `range` from `uri`
    ///
    /// The returned buffer may be shorter than requested if the server sent less.
    async fn fetch_range(
        &self,
        uri: &str,
        range: Range<u64>,
        cancel: &CancellationToken,
        progress: Progress<'_>,
    ) -> Result<Bytes, TransportError>;

    /// Download the whole body of `uri` with a plain GET
    async fn fetch_all(
        &self,
        uri: &str,
        cancel: &CancellationToken,
        progress: Progress<'_>,
    ) -> Result<FullBody, TransportError>;
}
