//! Main entry point for the rangestream CLI application.
//!
//! Opens a [`RangeStream`] over a remote URL and copies a byte span of it to
//! stdout or a file, reading it the way a media player would: in fixed-size
//! sequential reads.

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use rangestream::{Cli, RangeStream, StreamFactory, StreamMetrics};

/// Application entry point.
///
/// Parses command-line arguments, builds the stream and copies the requested
/// span. Ctrl-C cancels the copy.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level())),
        )
        .with_writer(std::io::stderr)
        .init();

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let factory = StreamFactory::http(cli.stream_config())?;
    let stream = factory
        .create_with_mirrors(cli.sources(), cli.mode, cli.strict, &cancel)
        .await?;

    let copied = match &cli.output {
        Some(path) => {
            let mut file = tokio::fs::File::create(path).await?;
            copy_span(&stream, &cli, &mut file, &cancel).await?
        }
        None => {
            let mut stdout = tokio::io::stdout();
            copy_span(&stream, &cli, &mut stdout, &cancel).await?
        }
    };

    if !cli.quiet {
        eprintln!(
            "\nCopied {} of {} ({})",
            format_size(copied),
            format_size(stream.size()),
            if stream.content_type().is_empty() {
                "unknown type"
            } else {
                stream.content_type()
            }
        );
        if cli.metrics {
            print_metrics(&stream.get_metrics(false));
        }
    }

    Ok(())
}

/// Copy `[offset, offset + length)` of the stream into `out`.
///
/// # Returns
///
/// The number of bytes written.
async fn copy_span<W: AsyncWrite + Unpin>(
    stream: &RangeStream,
    cli: &Cli,
    out: &mut W,
    cancel: &CancellationToken,
) -> Result<u64> {
    let end = match cli.length {
        Some(len) => cli.offset.saturating_add(len).min(stream.size()),
        None => stream.size(),
    };
    let read_size = cli.read_size.max(1);

    stream.seek(cli.offset);
    let mut copied = 0u64;
    while stream.position() < end {
        let len = read_size.min(end - stream.position());
        let bytes = stream.read(len, cancel).await?;
        if bytes.is_empty() {
            break;
        }
        out.write_all(&bytes).await?;
        copied += bytes.len() as u64;
    }
    out.flush().await?;

    Ok(copied)
}

fn print_metrics(metrics: &StreamMetrics) {
    eprintln!("Requests: {}", metrics.requests_delta);
    eprintln!("Bytes transferred: {}", format_size(metrics.bytes_delta));
    eprintln!(
        "Throughput: {:.2} Mbit/s",
        metrics.inbound_bits_per_second / 1_000_000.0
    );
    eprintln!(
        "Buffer: {} used / {} allocated",
        format_size(metrics.used_buffer_size),
        format_size(metrics.allocated_buffer_size)
    );
}

/// Format a byte size into a human-readable string.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(format_size(500), "500 bytes");
/// assert_eq!(format_size(1536), "1.50 KB");
/// ```
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
