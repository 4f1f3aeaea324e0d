use std::time::Duration;

/// Default size of a coalesced fetch window (256 KiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 256 * 1024;

/// Tuning knobs for stream construction and the fetch loop.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Minimum span fetched per request by the on-demand buffer.
    pub chunk_size: u64,
    /// Per-request timeout applied by the HTTP client.
    pub request_timeout: Duration,
    /// Connection timeout applied by the HTTP client.
    pub connect_timeout: Duration,
    /// Custom User-Agent header.
    pub user_agent: Option<String>,
    /// Retries of the same URI after transient errors before it is dropped.
    pub max_transient_retries: u32,
    /// Delay before a transient retry, multiplied by the attempt number.
    pub transient_backoff: Duration,
    /// Whether metrics are collected from the start.
    pub metrics_enabled: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: None,
            max_transient_retries: 10,
            transient_backoff: Duration::from_millis(500),
            metrics_enabled: false,
        }
    }
}

impl StreamConfig {
    pub(crate) fn effective_chunk_size(&self) -> u64 {
        self.chunk_size.max(1)
    }

    pub(crate) fn user_agent(&self) -> String {
        self.user_agent
            .clone()
            .unwrap_or_else(|| concat!("rangestream/", env!("CARGO_PKG_VERSION")).to_string())
    }
}
