//! Core data model for streaming runs.
//!
//! - StreamSettings / TransferConfig: how a run is configured
//! - TransferPlan / TransferSpec: what a validated run will move, per channel
//! - SessionResult / ChannelSummary / RunReport: what happened

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::verify::VerifyOutcome;

/// Working buffer per stream; also the largest chunk a single call moves.
pub const DEFAULT_BUFFER_LEN: usize = 128 * 1024;

/// Nominal per-call control interval of the transport.
pub const CONTROL_INTERVAL: Duration = Duration::from_millis(1000);

/// Slack added to the control interval to form the per-call timeout.
pub const TIMEOUT_SLACK: Duration = Duration::from_millis(100);

/// Most channels a FIFO bridge multiplexes over one handle.
pub const MAX_CHANNELS: u8 = 4;

/// Tunables shared by every stream of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    /// Working buffer length in bytes; caps the chunk size
    pub buffer_len: usize,

    /// Timeout handed to every transport call
    pub op_timeout: Duration,

    /// Throughput reporting cadence
    pub report_interval: Duration,

    /// Stop a reader after this many consecutive empty reads (None = never)
    pub max_empty_reads: Option<u32>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        StreamSettings {
            buffer_len: DEFAULT_BUFFER_LEN,
            op_timeout: CONTROL_INTERVAL + TIMEOUT_SLACK,
            report_interval: Duration::from_secs(1),
            max_empty_reads: None,
        }
    }
}

/// A run as requested, before validation.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// File whose bytes are streamed out on every channel
    pub source: PathBuf,

    /// Destination name; suffixed with the channel index when channels > 1
    pub destination: PathBuf,

    /// Channel count (0 means 1)
    pub channels: u8,

    /// Repeat every session until cancelled
    pub loop_mode: bool,

    pub settings: StreamSettings,
}

impl TransferConfig {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(source: P, destination: Q, channels: u8) -> Self {
        TransferConfig {
            source: source.as_ref().to_path_buf(),
            destination: destination.as_ref().to_path_buf(),
            channels,
            loop_mode: false,
            settings: StreamSettings::default(),
        }
    }

    pub fn with_loop_mode(mut self, loop_mode: bool) -> Self {
        self.loop_mode = loop_mode;
        self
    }

    pub fn with_settings(mut self, settings: StreamSettings) -> Self {
        self.settings = settings;
        self
    }
}

/// What one channel moves. Immutable once its session starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferSpec {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub channel: u8,
    /// Bytes the writer must push and the reader must expect
    pub total_length: u64,
}

/// A validated run: the measured source length and one spec per channel.
#[derive(Debug, Clone)]
pub struct TransferPlan {
    pub id: Uuid,
    pub total_length: u64,
    pub specs: Vec<TransferSpec>,
    pub loop_mode: bool,
    pub settings: StreamSettings,
}

impl TransferPlan {
    pub fn channel_count(&self) -> usize {
        self.specs.len()
    }
}

/// Direction of one stream on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Source file into the transport
    Write,
    /// Transport into the destination file
    Read,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Write => write!(f, "write"),
            Direction::Read => write!(f, "read"),
        }
    }
}

/// Outcome of one channel iteration: write + read + verification.
#[derive(Debug, Clone, Serialize)]
pub struct SessionResult {
    pub channel: u8,

    /// Zero-based pass number (always 0 outside loop mode)
    pub iteration: u64,

    pub destination: PathBuf,

    pub bytes_written: u64,

    pub bytes_read: u64,

    /// Cancellation was observed before this iteration finished
    pub cancelled: bool,

    pub verification: VerifyOutcome,
}

impl SessionResult {
    pub fn verified(&self) -> bool {
        self.verification.is_identical()
    }
}

/// Running tally of one channel's iterations.
///
/// Holds at most two full results however long a loop-mode run lasts.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelSummary {
    pub channel: u8,
    pub destination: PathBuf,

    /// Iterations that finished, verified or not
    pub passes: u64,

    /// Iterations that failed verification
    pub failures: u64,

    pub bytes_written: u64,
    pub bytes_read: u64,

    /// The session thread died; later iterations never ran
    pub panicked: bool,

    pub first_failure: Option<SessionResult>,
    pub last_result: Option<SessionResult>,
}

impl ChannelSummary {
    pub fn new(channel: u8, destination: PathBuf) -> Self {
        ChannelSummary {
            channel,
            destination,
            passes: 0,
            failures: 0,
            bytes_written: 0,
            bytes_read: 0,
            panicked: false,
            first_failure: None,
            last_result: None,
        }
    }

    /// Fold one finished iteration into the tally.
    pub fn record(&mut self, result: SessionResult) {
        self.passes += 1;
        self.bytes_written = self.bytes_written.saturating_add(result.bytes_written);
        self.bytes_read = self.bytes_read.saturating_add(result.bytes_read);
        if !result.verified() {
            self.failures += 1;
            if self.first_failure.is_none() {
                self.first_failure = Some(result.clone());
            }
        }
        self.last_result = Some(result);
    }

    /// No result ever arrived, or the session died before finishing.
    pub fn is_missing(&self) -> bool {
        self.panicked || self.passes == 0
    }

    /// Every iteration verified and the session finished normally.
    pub fn verified(&self) -> bool {
        !self.is_missing() && self.failures == 0
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_length: u64,
    pub loop_mode: bool,

    /// Cancellation was requested (interrupt or hard transport error)
    /// before the sessions finished on their own
    pub cancelled: bool,

    /// One entry per planned channel, in channel order
    pub channels: Vec<ChannelSummary>,
}

impl RunReport {
    /// True unless every planned channel finished and verified every pass.
    pub fn failed(&self) -> bool {
        self.channels.is_empty() || self.channels.iter().any(|c| !c.verified())
    }

    /// Channels with no result, or whose session died.
    pub fn missing_channels(&self) -> Vec<u8> {
        self.channels
            .iter()
            .filter(|c| c.is_missing())
            .map(|c| c.channel)
            .collect()
    }

    /// Iterations finished across all channels.
    pub fn passes(&self) -> u64 {
        self.channels.iter().map(|c| c.passes).sum()
    }

    pub fn channel(&self, channel: u8) -> Option<&ChannelSummary> {
        self.channels.iter().find(|c| c.channel == channel)
    }
}
