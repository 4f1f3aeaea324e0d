//! Ordered pool of candidate source URIs with single-flight refill.

use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, StreamError};

/// Application hook asked for fresh URIs when the pool runs dry.
#[async_trait]
pub trait UriRefill: Send + Sync {
    /// Return new candidate URIs, or an empty list when none are available.
    async fn request_uris(&self) -> Vec<String>;
}

type PendingRefill = Shared<BoxFuture<'static, ()>>;

/// Thread-safe list of candidate URIs for one resource.
///
/// The front entry is the current URI. Failed URIs are removed only while
/// they are still at the front, so racing fetchers never drop a replacement.
pub struct UriFailoverPool {
    uris: Arc<RwLock<Vec<String>>>,
    pending: Arc<Mutex<Option<PendingRefill>>>,
    refill: Option<Arc<dyn UriRefill>>,
}

impl UriFailoverPool {
    pub fn new(uris: Vec<String>) -> Self {
        Self {
            uris: Arc::new(RwLock::new(uris)),
            pending: Arc::new(Mutex::new(None)),
            refill: None,
        }
    }

    /// Attach the collaborator used by [`ensure_uri`](Self::ensure_uri).
    pub fn with_refill(mut self, refill: Arc<dyn UriRefill>) -> Self {
        self.refill = Some(refill);
        self
    }

    /// Copy of the candidate list, current URI first.
    pub fn snapshot(&self) -> Vec<String> {
        self.uris.read().clone()
    }

    /// Append new candidates behind the existing ones.
    pub fn supply(&self, new_uris: impl IntoIterator<Item = String>) {
        self.uris.write().extend(new_uris);
    }

    pub fn current(&self) -> Option<String> {
        self.uris.read().first().cloned()
    }

    /// Remove the front entry if it is still `uri`.
    ///
    /// Returns whether anything was removed.
    pub fn drop_if_current(&self, uri: &str) -> bool {
        let mut uris = self.uris.write();
        if uris.first().map(String::as_str) == Some(uri) {
            uris.remove(0);
            warn!(uri, remaining = uris.len(), "dropped failing source URI");
            true
        } else {
            false
        }
    }

    /// Return the current URI, asking the application for more if the pool is empty.
    ///
    /// At most one refill round-trip is outstanding at a time; concurrent callers
    /// wait for the same one. Fails with [`StreamError::NoUriAvailable`] when the
    /// pool is still empty afterwards.
    pub async fn ensure_uri(&self, cancel: &CancellationToken) -> Result<String> {
        if let Some(uri) = self.current() {
            return Ok(uri);
        }

        let Some(refill) = self.refill.clone() else {
            return Err(StreamError::NoUriAvailable);
        };

        let pending = {
            let mut slot = self.pending.lock();
            match slot.as_ref() {
                Some(pending) => pending.clone(),
                None => {
                    // Re-check under the slot lock: a refill may have just finished.
                    if let Some(uri) = self.current() {
                        return Ok(uri);
                    }
                    debug!("source pool exhausted, requesting new URIs");
                    let uris = Arc::clone(&self.uris);
                    let pending_slot = Arc::clone(&self.pending);
                    let fut = async move {
                        let fresh = refill.request_uris().await;
                        debug!(count = fresh.len(), "URI refill completed");
                        uris.write().extend(fresh);
                        *pending_slot.lock() = None;
                    }
                    .boxed()
                    .shared();
                    *slot = Some(fut.clone());
                    fut
                }
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StreamError::Cancelled),
            _ = pending => {}
        }

        self.current().ok_or(StreamError::NoUriAvailable)
    }
}
