//! # rangestream
//!
//! Seekable random-access streams over remote HTTP resources.
//!
//! A [`RangeStream`] lets a media player read arbitrary byte ranges of a remote
//! file (audio/video segments) while it is still downloading. Reads are turned
//! into HTTP Range requests by one of three backends:
//!
//! - [`BufferingMode::Direct`]: no cache, every read hits the network
//! - [`BufferingMode::OnDemand`]: fetched ranges are kept in memory and small
//!   reads are widened to whole chunks, so sequential playback needs few requests
//! - [`BufferingMode::ImmediateFull`]: the whole resource is downloaded up front
//!
//! Every stream keeps an ordered pool of candidate URIs. A URI that fails is
//! dropped and the next one is tried; when the pool runs dry the application is
//! asked, once, for fresh URIs through [`UriRefill`].
//!
//! ## Example
//!
//! ```no_run
//! use rangestream::{BufferingMode, StreamConfig, StreamFactory};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let factory = StreamFactory::http(StreamConfig::default())?;
//!     let cancel = CancellationToken::new();
//!
//!     let stream = factory
//!         .create("https://example.com/video.mp4", BufferingMode::OnDemand, false, &cancel)
//!         .await?;
//!
//!     // Read the first kilobyte, then seek near the end
//!     let head = stream.read_at(0, 1024, &cancel).await?;
//!     let tail = stream.read_at(stream.size().saturating_sub(1024), 1024, &cancel).await?;
//!     println!("{} + {} bytes of {}", head.len(), tail.len(), stream.content_type());
//!
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod factory;
pub mod interval;
pub mod metrics;
pub mod pool;
pub mod stream;
pub mod transport;

pub use cli::Cli;
pub use config::StreamConfig;
pub use error::{StreamError, TransportError};
pub use factory::{BufferingMode, StreamFactory};
pub use interval::IntervalTracker;
pub use metrics::{MetricsCollector, StreamMetrics};
pub use pool::{UriFailoverPool, UriRefill};
pub use stream::{RangeStream, ReadProgress};
pub use transport::{HttpFetcher, RangeFetch};
