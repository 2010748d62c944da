//! zpoolmond - ZFS metrics collector daemon.
//!
//! Gathers pool and ARC statistics on an interval and prints them to stdout
//! as InfluxDB line protocol or JSON lines.

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use zpoolmon::collector::{RealFs, SystemRunner, ZfsCollector};
use zpoolmon::config::ZfsConfig;
use zpoolmon::metrics::{JsonLinesSink, LineProtocolSink, MetricSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    /// InfluxDB line protocol.
    Line,
    /// One JSON object per line.
    Json,
}

/// ZFS metrics collector daemon.
#[derive(Parser)]
#[command(name = "zpoolmond", about = "ZFS metrics collector daemon", version)]
struct Args {
    /// Collection interval in seconds.
    #[arg(short, long, default_value = "10")]
    interval: u64,

    /// JSON configuration file. Command-line flags override its values.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory holding the ZFS kstat files.
    #[arg(long, value_name = "PATH")]
    kstat_path: Option<String>,

    /// Kstat files to read (comma separated).
    #[arg(long, value_delimiter = ',')]
    kstat_metrics: Vec<String>,

    /// Emit per-pool records (runs `zpool list` every interval).
    #[arg(long)]
    pool_metrics: bool,

    /// Stream `zpool iostat` in the background and add averaged I/O stats
    /// to per-pool records.
    #[arg(long)]
    pool_iostat_metrics: bool,

    /// Capacity of the iostat line queue.
    #[arg(long)]
    buffer_size: Option<usize>,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = Format::Line)]
    format: Format,

    /// Gather once and exit.
    #[arg(long)]
    once: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Initializes the tracing subscriber on stderr; stdout carries metrics.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["zpoolmond", "zpoolmon", "zpool_iostat"] {
        if let Ok(directive) = format!("{target}={level}").parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

/// Loads the config file (if any) and applies command-line overrides.
fn build_config(args: &Args) -> Result<ZfsConfig, String> {
    let mut config = match &args.config {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
            serde_json::from_str(&content)
                .map_err(|e| format!("invalid config {}: {}", path.display(), e))?
        }
        None => ZfsConfig::default(),
    };

    if let Some(path) = &args.kstat_path {
        config.kstat_path = path.clone();
    }
    if !args.kstat_metrics.is_empty() {
        config.kstat_metrics = args.kstat_metrics.clone();
    }
    config.pool_metrics |= args.pool_metrics;
    config.pool_iostat_metrics |= args.pool_iostat_metrics;
    if let Some(size) = args.buffer_size {
        if size == 0 {
            return Err("buffer size must be at least 1".to_string());
        }
        config.iostat.buffer_size = size;
    }
    Ok(config)
}

fn make_sink(format: Format) -> Box<dyn MetricSink> {
    let out = io::stdout();
    match format {
        Format::Line => Box::new(LineProtocolSink::new(out)),
        Format::Json => Box::new(JsonLinesSink::new(out)),
    }
}

fn main() {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    };

    info!("zpoolmond {} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Config: interval={}s, kstat={}, pool_metrics={}, pool_iostat_metrics={}",
        args.interval,
        config.kstat_path(),
        config.pool_metrics,
        config.pool_iostat_metrics
    );

    let mut collector = ZfsCollector::new(RealFs::new(), SystemRunner, config);
    if let Err(e) = collector.start() {
        error!("Failed to start zpool iostat: {}", e);
        std::process::exit(1);
    }

    let mut sink = make_sink(args.format);
    let interval = Duration::from_secs(args.interval);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    info!("Starting collection loop");
    let mut gather_count: u64 = 0;

    while running.load(Ordering::SeqCst) {
        match collector.gather() {
            Ok(metrics) => {
                gather_count += 1;
                debug!("Gather #{}: {} records", gather_count, metrics.len());
                if let Err(e) = sink.emit_all(&metrics) {
                    error!("Failed to write metrics: {}", e);
                }
            }
            Err(e) => {
                error!("Failed to gather ZFS metrics: {}", e);
            }
        }

        if let Some(supervisor) = collector.supervisor() {
            let feed = supervisor.feed();
            debug!(
                state = ?supervisor.state(),
                restarts = supervisor.restarts(),
                pending = feed.pending(),
                stalls = feed.stalls(),
                "zpool iostat status"
            );
        }

        if args.once {
            break;
        }

        // Sleep with periodic checks for shutdown signal
        let sleep_interval = Duration::from_millis(100);
        let mut remaining = interval;
        while remaining > Duration::ZERO && running.load(Ordering::SeqCst) {
            let sleep_time = remaining.min(sleep_interval);
            std::thread::sleep(sleep_time);
            remaining = remaining.saturating_sub(sleep_time);
        }
    }

    info!("Shutting down...");
    collector.stop();
    info!("Shutdown complete");
}
