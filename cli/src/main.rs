//! fifo-transfer - Command-line front end for the streaming engine.
//!
//! Streams a file out and back through a multi-channel loopback, prints
//! per-second throughput and per-channel verification results, and exits
//! non-zero if any channel received something other than what was sent.

use clap::Parser;
use fifostream::{
    format_bytes, format_rate, plan_transfer, run_transfer, CancelToken, Direction,
    LoopbackTransport, RunReport, SessionResult, StreamSettings, ThroughputSample, TransferConfig, TransferObserver,
    TransferPlan, VerifyOutcome, DEFAULT_BUFFER_LEN,
};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// fifo-transfer - File transfer through a multi-channel FIFO loopback
#[derive(Parser, Debug)]
#[command(name = "fifo-transfer")]
#[command(version = "0.1.0")]
#[command(about = "Stream a file out and back on every channel, then verify it byte for byte")]
struct Args {
    /// Source file to stream out
    #[arg(value_name = "SRC")]
    src: PathBuf,

    /// Destination file; suffixed with the channel index when channels > 1
    #[arg(value_name = "DEST")]
    dst: PathBuf,

    /// Channel count (0 = single channel, 1-4 channels)
    #[arg(long, value_name = "N", default_value_t = 0)]
    channels: u8,

    /// Repeat the transfer until interrupted
    #[arg(long = "loop")]
    loop_mode: bool,

    /// Per-call transport timeout in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 1100)]
    timeout_ms: u64,

    /// Working buffer per stream in bytes (largest chunk size)
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_BUFFER_LEN)]
    buffer_len: usize,

    /// Loopback FIFO capacity per channel in bytes [default: 4 x buffer-len]
    #[arg(long, value_name = "BYTES")]
    fifo_capacity: Option<usize>,

    /// Stop a reader after this many consecutive empty reads [default: never]
    #[arg(long, value_name = "N")]
    max_empty_reads: Option<u32>,

    /// Throughput report interval in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 1000)]
    interval_ms: u64,

    /// Write a JSON run report to this file
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// CLI implementation of TransferObserver for console output
struct ConsoleProgress {
    verbose: bool,
    start_time: Instant,
}

impl ConsoleProgress {
    fn new(verbose: bool) -> Self {
        ConsoleProgress {
            verbose,
            start_time: Instant::now(),
        }
    }

    fn format_duration(elapsed: Duration) -> String {
        let secs = elapsed.as_secs();
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, mins, secs)
        } else if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}s", secs)
        }
    }

    fn describe(result: &SessionResult) -> String {
        let dest = result.destination.display();
        match &result.verification {
            VerifyOutcome::Identical { .. } => format!("{} binary same", dest),
            VerifyOutcome::SizeMismatch {
                source_len,
                destination_len,
            } => format!("{} size not same: {} {}", dest, source_len, destination_len),
            VerifyOutcome::ContentMismatch { offset } => {
                format!("{} content not same at {}", dest, offset)
            }
            VerifyOutcome::Unreadable { path, reason } => {
                format!("{} could not be verified ({}): {}", dest, path.display(), reason)
            }
        }
    }
}

impl TransferObserver for ConsoleProgress {
    fn on_run_started(&self, plan: &TransferPlan) {
        eprintln!("Preparing transfer...");
        if let Some(spec) = plan.specs.first() {
            eprintln!("  Source: {}", spec.source.display());
        }
        for spec in &plan.specs {
            eprintln!("  Channel {}: {}", spec.channel, spec.destination.display());
        }
        eprintln!(
            "  Total: {} per channel{}",
            format_bytes(plan.total_length),
            if plan.loop_mode { ", looping until interrupted" } else { "" }
        );
        eprintln!();
    }

    fn on_throughput(&self, sample: &ThroughputSample) {
        eprintln!("{}", sample);
    }

    fn on_stream_stopped(&self, channel: u8, direction: Direction, bytes: u64) {
        eprintln!("Channel {} {} stopped, {}", channel, direction, bytes);
    }

    fn on_session_completed(&self, result: &SessionResult) {
        if self.verbose || !result.verified() {
            eprintln!(
                "[ch{} #{}] {}",
                result.channel,
                result.iteration,
                Self::describe(result)
            );
        } else {
            eprintln!("{}", Self::describe(result));
        }
    }

    fn on_run_completed(&self, report: &RunReport) {
        eprintln!();
        eprintln!(
            "Transfer {}!",
            if report.cancelled { "stopped" } else { "complete" }
        );

        let passes = report.passes();
        let failed: u64 = report.channels.iter().map(|c| c.failures).sum();
        let moved: u64 = report
            .channels
            .iter()
            .map(|c| c.bytes_written + c.bytes_read)
            .sum();
        let elapsed = self.start_time.elapsed();

        eprintln!(
            "Started: {}",
            report
                .started_at
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
        );
        eprintln!(
            "Summary: {} channel(s), {} pass(es), {} verified, {} failed",
            report.channels.len(),
            passes,
            passes - failed,
            failed
        );
        eprintln!("Bytes moved: {}", format_bytes(moved));
        if elapsed.as_secs_f64() > 0.0 {
            eprintln!(
                "Average: {}",
                format_rate(moved as f64 / elapsed.as_secs_f64())
            );
        }
        eprintln!("Elapsed: {}", Self::format_duration(elapsed));

        if report.failed() {
            eprintln!();
            eprintln!("Verification failures:");
            for summary in &report.channels {
                if let Some(first) = &summary.first_failure {
                    eprintln!(
                        "  [ch{}] {} of {} pass(es) failed, first at #{}: {}",
                        summary.channel,
                        summary.failures,
                        summary.passes,
                        first.iteration,
                        Self::describe(first)
                    );
                }
                if summary.panicked {
                    eprintln!("  [ch{}] session aborted before finishing", summary.channel);
                } else if summary.passes == 0 {
                    eprintln!("  [ch{}] no result", summary.channel);
                }
            }
        }
    }
}

/// Parse arguments, wire up logging and Ctrl+C, then run the transfer
fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let cancel = CancelToken::new();
    spawn_interrupt_handler(cancel.clone());

    let exit_code = match run_cli(&args, &cancel) {
        Ok(report) if report.failed() => 1,
        Ok(_) => 0,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            2
        }
    };

    std::process::exit(exit_code);
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // RUST_LOG overrides the verbosity flag
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("fifostream={},fifo_transfer={}", level, level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Cancel the run on Ctrl+C. The signal is awaited on its own thread so the
/// transfer threads never block on it.
fn spawn_interrupt_handler(cancel: CancelToken) {
    let spawned = thread::Builder::new()
        .name("ctrl-c".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    tracing::warn!(error = %e, "Ctrl+C handling unavailable");
                    return;
                }
            };
            runtime.block_on(async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Received Ctrl+C, stopping transfer...");
                    cancel.cancel();
                }
            });
        });

    if let Err(e) = spawned {
        tracing::warn!(error = %e, "failed to spawn Ctrl+C handler");
    }
}

/// Main CLI logic - separated for testability
fn run_cli(args: &Args, cancel: &CancelToken) -> Result<RunReport, String> {
    let fifo_capacity = args.fifo_capacity.unwrap_or(4 * args.buffer_len);
    if fifo_capacity < args.buffer_len {
        return Err(format!(
            "FIFO capacity {} is smaller than the buffer length {}; full-size chunks could never be written",
            fifo_capacity, args.buffer_len
        ));
    }

    let settings = StreamSettings {
        buffer_len: args.buffer_len,
        op_timeout: Duration::from_millis(args.timeout_ms),
        report_interval: Duration::from_millis(args.interval_ms),
        max_empty_reads: args.max_empty_reads,
    };
    let config = TransferConfig::new(&args.src, &args.dst, args.channels)
        .with_loop_mode(args.loop_mode)
        .with_settings(settings);

    let plan = plan_transfer(&config).map_err(|e| format!("Transfer planning failed: {}", e))?;

    let transport = LoopbackTransport::new(plan.channel_count() as u8, fifo_capacity);
    let progress = ConsoleProgress::new(args.verbose > 0);
    let report = run_transfer(&plan, &transport, cancel, &progress);

    if let Some(path) = &args.report {
        write_report(path, &report)?;
    }

    Ok(report)
}

fn write_report(path: &Path, report: &RunReport) -> Result<(), String> {
    let json = serde_json::to_string_pretty(report)
        .map_err(|e| format!("Failed to encode run report: {}", e))?;
    std::fs::write(path, json)
        .map_err(|e| format!("Failed to write run report {}: {}", path.display(), e))
}
