//! Connection and throughput accounting for a backend.
//!
//! Throughput is weighted by connection time: the elapsed window only runs
//! while at least one connection is open, so idle gaps between reads do not
//! dilute the inbound rate.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// A sample taken by [`MetricsCollector::get`], extended with buffer usage by the stream.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StreamMetrics {
    pub active_connections: u64,
    pub requests_delta: u64,
    pub bytes_delta: u64,
    pub inbound_bits_per_second: f64,
    pub allocated_buffer_size: u64,
    pub used_buffer_size: u64,
}

#[derive(Debug)]
struct MetricsState {
    active_connections: u64,
    requests_delta: u64,
    bytes_delta: u64,
    connection_duration: Duration,
    last_start: Instant,
}

/// Accumulates request counts, bytes and open-connection time since the last clear.
#[derive(Debug)]
pub struct MetricsCollector {
    enabled: AtomicBool,
    state: Arc<Mutex<MetricsState>>,
}

impl MetricsCollector {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            state: Arc::new(Mutex::new(MetricsState {
                active_connections: 0,
                requests_delta: 0,
                bytes_delta: 0,
                connection_duration: Duration::ZERO,
                last_start: Instant::now(),
            })),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Open a connection window that closes when the guard is dropped.
    pub fn connection(&self) -> ConnectionGuard {
        if !self.is_enabled() {
            return ConnectionGuard { state: None };
        }
        let mut state = self.state.lock();
        if state.active_connections == 0 {
            state.last_start = Instant::now();
        }
        state.active_connections += 1;
        ConnectionGuard {
            state: Some(Arc::clone(&self.state)),
        }
    }

    /// Count one completed request that transferred `bytes`.
    pub fn record(&self, bytes: u64) {
        if !self.is_enabled() {
            return;
        }
        let mut state = self.state.lock();
        state.requests_delta += 1;
        state.bytes_delta += bytes;
    }

    /// Sample the counters, optionally resetting the deltas.
    ///
    /// `active_connections` survives a clear, and an open window restarts at the
    /// moment of the clear.
    pub fn get(&self, clear: bool) -> StreamMetrics {
        let now = Instant::now();
        let mut state = self.state.lock();

        let mut elapsed = state.connection_duration;
        if state.active_connections > 0 {
            elapsed += now.duration_since(state.last_start);
        }
        let secs = elapsed.as_secs_f64();
        let inbound_bits_per_second = if secs > 0.0 {
            state.bytes_delta as f64 * 8.0 / secs
        } else {
            0.0
        };

        let sample = StreamMetrics {
            active_connections: state.active_connections,
            requests_delta: state.requests_delta,
            bytes_delta: state.bytes_delta,
            inbound_bits_per_second,
            ..StreamMetrics::default()
        };

        if clear {
            state.requests_delta = 0;
            state.bytes_delta = 0;
            state.connection_duration = Duration::ZERO;
            state.last_start = now;
        }
        sample
    }
}

/// Closes a connection window on drop, including when the fetch is cancelled.
#[must_use]
pub struct ConnectionGuard {
    state: Option<Arc<Mutex<MetricsState>>>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let Some(state) = self.state.take() else {
            return;
        };
        let mut state = state.lock();
        state.active_connections = state.active_connections.saturating_sub(1);
        if state.active_connections == 0 {
            let open = Instant::now().duration_since(state.last_start);
            state.connection_duration += open;
        }
    }
}
