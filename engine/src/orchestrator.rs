//! Run orchestration.
//!
//! - Planning: validate the request, measure the source once, derive one
//!   `TransferSpec` per channel
//! - Running: fan the plan out to one session per channel plus the
//!   throughput meter, fold session results into a `RunReport` as they arrive

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::thread;

use chrono::Utc;
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::error::EngineError;
use crate::model::{
    ChannelSummary, RunReport, SessionResult, StreamSettings, TransferConfig, TransferPlan,
    TransferSpec, MAX_CHANNELS,
};
use crate::planner::WORD_SIZE;
use crate::progress::TransferObserver;
use crate::session::ChannelTransferSession;
use crate::stream::StreamContext;
use crate::throughput::{ThroughputCounters, ThroughputMeter};
use crate::transport::DuplexTransport;

/// Destination for `channel`: the base name alone for a single channel,
/// otherwise the base name with the channel index appended.
pub fn destination_for(base: &Path, channel: u8, channels: u8) -> PathBuf {
    if channels <= 1 {
        return base.to_path_buf();
    }
    let mut name = OsString::from(base.as_os_str());
    name.push(channel.to_string());
    PathBuf::from(name)
}

/// Validate a request and measure the source.
///
/// A channel count of 0 means 1.
///
/// # Errors
/// Returns `EngineError` if the source is missing, unreadable, not a regular
/// file or empty, if the channel count exceeds `MAX_CHANNELS`, or if the
/// settings cannot drive a transfer.
pub fn plan_transfer(config: &TransferConfig) -> Result<TransferPlan, EngineError> {
    let channels = if config.channels == 0 { 1 } else { config.channels };
    if channels > MAX_CHANNELS {
        return Err(EngineError::InvalidChannelCount {
            count: config.channels,
            max: MAX_CHANNELS,
        });
    }

    validate_settings(&config.settings)?;
    let total_length = measure_source(&config.source)?;

    let specs = (0..channels)
        .map(|channel| TransferSpec {
            source: config.source.clone(),
            destination: destination_for(&config.destination, channel, channels),
            channel,
            total_length,
        })
        .collect();

    Ok(TransferPlan {
        id: Uuid::new_v4(),
        total_length,
        specs,
        loop_mode: config.loop_mode,
        settings: config.settings.clone(),
    })
}

/// Execute a plan over `transport`.
///
/// Starts every channel session and the meter concurrently and folds session
/// results into per-channel summaries as they arrive. Once the sessions are
/// done it sets `cancel` to stop the meter. Per-channel verification failures
/// never stop other channels; only cancellation (interrupt or a hard
/// transport error) stops them all.
pub fn run_transfer(
    plan: &TransferPlan,
    transport: &dyn DuplexTransport,
    cancel: &CancelToken,
    observer: &dyn TransferObserver,
) -> RunReport {
    let started_at = Utc::now();
    tracing::info!(
        run_id = %plan.id,
        channels = plan.channel_count(),
        total_length = plan.total_length,
        loop_mode = plan.loop_mode,
        "transfer started"
    );
    observer.on_run_started(plan);

    let counters = ThroughputCounters::new();
    let ctx = StreamContext {
        transport,
        counters: &counters,
        cancel,
        settings: &plan.settings,
    };
    let mut summaries: Vec<ChannelSummary> = plan
        .specs
        .iter()
        .map(|spec| ChannelSummary::new(spec.channel, spec.destination.clone()))
        .collect();
    let (result_tx, result_rx) =
        crossbeam_channel::bounded::<SessionResult>(plan.channel_count().max(1));

    let interrupted = thread::scope(|s| {
        let meter = s.spawn(|| {
            ThroughputMeter::new(&counters, plan.settings.report_interval).run(cancel, observer)
        });

        let sessions: Vec<_> = plan
            .specs
            .iter()
            .map(|spec| {
                let results = result_tx.clone();
                let handle = s.spawn(move || {
                    ChannelTransferSession::new(spec, plan.loop_mode).run(ctx, observer, &results)
                });
                (spec.channel, handle)
            })
            .collect();
        drop(result_tx);

        // Ends once every session thread has exited and dropped its sender
        for result in result_rx.iter() {
            match summaries.iter_mut().find(|c| c.channel == result.channel) {
                Some(summary) => summary.record(result),
                None => tracing::warn!(channel = result.channel, "result for unplanned channel"),
            }
        }

        for (channel, session) in sessions {
            match session.join() {
                Ok(iterations) => tracing::debug!(channel, iterations, "session finished"),
                Err(_) => {
                    tracing::error!(channel, "session thread panicked");
                    if let Some(summary) = summaries.iter_mut().find(|c| c.channel == channel) {
                        summary.panicked = true;
                    }
                }
            }
        }

        let interrupted = cancel.is_cancelled();
        cancel.cancel();
        if meter.join().is_err() {
            tracing::error!("throughput meter panicked");
        }
        interrupted
    });

    let report = RunReport {
        run_id: plan.id,
        started_at,
        finished_at: Utc::now(),
        total_length: plan.total_length,
        loop_mode: plan.loop_mode,
        cancelled: interrupted,
        channels: summaries,
    };

    if report.failed() {
        tracing::error!(
            run_id = %report.run_id,
            missing = ?report.missing_channels(),
            "transfer failed verification"
        );
    } else {
        tracing::info!(run_id = %report.run_id, passes = report.passes(), "transfer verified");
    }
    observer.on_run_completed(&report);
    report
}

/// Plan and run in one call.
pub fn transfer(
    config: &TransferConfig,
    transport: &dyn DuplexTransport,
    cancel: &CancelToken,
    observer: &dyn TransferObserver,
) -> Result<RunReport, EngineError> {
    let plan = plan_transfer(config)?;
    Ok(run_transfer(&plan, transport, cancel, observer))
}

fn validate_settings(settings: &StreamSettings) -> Result<(), EngineError> {
    let reason = if settings.buffer_len < WORD_SIZE {
        format!("buffer length {} is smaller than one word", settings.buffer_len)
    } else if settings.op_timeout.is_zero() {
        "transport timeout must be non-zero".to_string()
    } else if settings.report_interval.is_zero() {
        "report interval must be non-zero".to_string()
    } else if settings.max_empty_reads == Some(0) {
        "empty read bound must be at least 1".to_string()
    } else {
        return Ok(());
    };
    Err(EngineError::InvalidSettings { reason })
}

fn measure_source(source: &Path) -> Result<u64, EngineError> {
    let metadata = match std::fs::metadata(source) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(EngineError::SourceNotFound {
                path: source.to_path_buf(),
            });
        }
        Err(e) => {
            return Err(EngineError::SourceAccessDenied {
                path: source.to_path_buf(),
                source: e,
            });
        }
    };

    if !metadata.is_file() {
        return Err(EngineError::SourceNotAFile {
            path: source.to_path_buf(),
        });
    }
    if metadata.len() == 0 {
        return Err(EngineError::EmptySource {
            path: source.to_path_buf(),
        });
    }
    Ok(metadata.len())
}
