use clap::Parser;

use crate::config::{DEFAULT_CHUNK_SIZE, StreamConfig};
use crate::factory::BufferingMode;

#[derive(Parser, Debug)]
#[command(name = "rangestream")]
#[command(version)]
#[command(about = "Read byte ranges of a remote HTTP resource", long_about = None)]
#[command(after_help = "Examples:\n  \
  rangestream https://example.com/a.mp4 -n 1024 | xxd     dump the first KiB\n  \
  rangestream URL -s 1048576 -n 65536 -o part.bin         save 64 KiB from offset 1 MiB\n  \
  rangestream URL --mirror URL2 --metrics                 fail over to URL2, print throughput")]
pub struct Cli {
    /// Source URL
    #[arg(value_name = "URL")]
    pub url: String,

    /// Additional failover URLs, tried in order
    #[arg(long = "mirror", value_name = "URL")]
    pub mirrors: Vec<String>,

    /// Buffering mode
    #[arg(short = 'm', long, value_enum, default_value_t = BufferingMode::OnDemand)]
    pub mode: BufferingMode,

    /// Offset of the first byte to read
    #[arg(short = 's', long, default_value_t = 0)]
    pub offset: u64,

    /// Number of bytes to read (default: to the end)
    #[arg(short = 'n', long)]
    pub length: Option<u64>,

    /// Size of each read issued against the stream
    #[arg(long, default_value_t = 64 * 1024)]
    pub read_size: u64,

    /// Minimum span fetched per request in on-demand mode
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: u64,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,

    /// Transient retries per URI
    #[arg(long, default_value_t = 10)]
    pub retries: u32,

    /// Write output to FILE instead of stdout
    #[arg(short = 'o', value_name = "FILE")]
    pub output: Option<String>,

    /// Reject responses whose length differs from the requested range
    #[arg(long)]
    pub strict: bool,

    /// Print transfer metrics when done
    #[arg(long)]
    pub metrics: bool,

    /// Verbose logging (-vv => trace)
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode, no summary
    #[arg(short = 'q')]
    pub quiet: bool,
}

impl Cli {
    pub fn sources(&self) -> Vec<String> {
        std::iter::once(self.url.clone())
            .chain(self.mirrors.iter().cloned())
            .collect()
    }

    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        }
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            chunk_size: self.chunk_size,
            request_timeout: std::time::Duration::from_secs(self.timeout),
            max_transient_retries: self.retries,
            metrics_enabled: self.metrics,
            ..StreamConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sources_and_config() {
        let cli = Cli::parse_from([
            "rangestream",
            "http://a/x",
            "--mirror",
            "http://b/x",
            "-m",
            "direct",
            "--chunk-size",
            "1024",
            "--metrics",
        ]);
        assert_eq!(cli.sources(), vec!["http://a/x", "http://b/x"]);
        assert_eq!(cli.mode, BufferingMode::Direct);
        let config = cli.stream_config();
        assert_eq!(config.chunk_size, 1024);
        assert!(config.metrics_enabled);
        assert_eq!(cli.log_level(), "warn");
    }

    #[test]
    fn mode_names() {
        let cli = Cli::parse_from(["rangestream", "u", "--mode", "immediate-full", "-vv"]);
        assert_eq!(cli.mode, BufferingMode::ImmediateFull);
        assert_eq!(cli.log_level(), "trace");
    }
}
