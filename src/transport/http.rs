use std::ops::Range;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, HeaderMap, RANGE};
use reqwest::{Client, Response, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::{FullBody, ProbeInfo, Progress, RangeFetch};
use crate::config::StreamConfig;
use crate::error::TransportError;

/// HTTP Range fetcher backed by reqwest
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a new fetcher with timeouts and User-Agent taken from `config`
    pub fn new(config: &StreamConfig) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent())
            .build()?;
        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<Response, TransportError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            result = request.send() => result.map_err(map_error),
        }
    }
}

#[async_trait]
impl RangeFetch for HttpFetcher {
    async fn probe(&self, uri: &str) -> Result<ProbeInfo, TransportError> {
        let resp = self
            .client
            .get(uri)
            .header(RANGE, "bytes=0-")
            .send()
            .await
            .map_err(map_error)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Permanent(format!(
                "HTTP request failed with status: {status}"
            )));
        }

        // Only the headers matter; the body is dropped unread.
        let headers = resp.headers();
        Ok(ProbeInfo {
            partial: status == StatusCode::PARTIAL_CONTENT,
            content_length: total_length(headers),
            content_type: header_str(headers, CONTENT_TYPE.as_str()).map(str::to_owned),
        })
    }

    async fn fetch_range(
        &self,
        uri: &str,
        range: Range<u64>,
        cancel: &CancellationToken,
        progress: Progress<'_>,
    ) -> Result<Bytes, TransportError> {
        if range.start >= range.end {
            return Ok(Bytes::new());
        }

        let header = format!("bytes={}-{}", range.start, range.end - 1);
        trace!(uri, range = %header, "sending range request");
        let request = self.client.get(uri).header(RANGE, &header);
        let resp = self.send(request, cancel).await?;

        if resp.status() != StatusCode::PARTIAL_CONTENT {
            return Err(TransportError::Permanent(format!(
                "HTTP request failed with status: {}",
                resp.status()
            )));
        }

        read_body(resp, Some(range.end - range.start), cancel, progress).await
    }

    async fn fetch_all(
        &self,
        uri: &str,
        cancel: &CancellationToken,
        progress: Progress<'_>,
    ) -> Result<FullBody, TransportError> {
        let resp = self.send(self.client.get(uri), cancel).await?;
        if !resp.status().is_success() {
            return Err(TransportError::Permanent(format!(
                "HTTP request failed with status: {}",
                resp.status()
            )));
        }

        let content_length = total_length(resp.headers());
        let content_type = header_str(resp.headers(), CONTENT_TYPE.as_str()).map(str::to_owned);
        let data = read_body(resp, None, cancel, progress).await?;
        Ok(FullBody {
            data,
            content_length,
            content_type,
        })
    }
}

/// Read a response body chunk by chunk, stopping at `limit` bytes
async fn read_body(
    mut resp: Response,
    limit: Option<u64>,
    cancel: &CancellationToken,
    progress: Progress<'_>,
) -> Result<Bytes, TransportError> {
    let hint = limit.or(resp.content_length()).unwrap_or(0);
    let mut body = BytesMut::with_capacity(hint.min(64 * 1024 * 1024) as usize);

    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            chunk = resp.chunk() => chunk.map_err(map_error)?,
        };
        let Some(chunk) = chunk else {
            break;
        };

        match limit {
            Some(limit) => {
                let room = (limit - body.len() as u64) as usize;
                body.extend_from_slice(&chunk[..chunk.len().min(room)]);
                progress(body.len() as u64);
                if body.len() as u64 >= limit {
                    break;
                }
            }
            None => {
                body.extend_from_slice(&chunk);
                progress(body.len() as u64);
            }
        }
    }

    Ok(body.freeze())
}

/// Timeouts are worth retrying on the same URI. A refused connection or a
/// failed lookup means the URI is gone, so it is failed over right away.
fn map_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() && !e.is_connect() {
        TransportError::Transient(e.to_string())
    } else {
        TransportError::Permanent(e.to_string())
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Total resource size from `Content-Range: bytes a-b/total`, else `Content-Length`
fn total_length(headers: &HeaderMap) -> Option<u64> {
    header_str(headers, CONTENT_RANGE.as_str())
        .and_then(|v| v.rsplit_once('/'))
        .and_then(|(_, total)| total.trim().parse().ok())
        .or_else(|| {
            header_str(headers, CONTENT_LENGTH.as_str()).and_then(|s| s.trim().parse().ok())
        })
}
