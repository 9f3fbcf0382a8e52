//! Progress reporting trait.
//!
//! `TransferObserver` decouples the engine from whatever presents a run to
//! the user (CLI, tests, automation). Callbacks arrive from worker threads,
//! possibly several at once, so implementations must be `Sync`.

use crate::model::{Direction, RunReport, SessionResult, TransferPlan};
use crate::throughput::ThroughputSample;

/// Receives progress updates from a running transfer.
///
/// Every method has an empty default, so implementations only override what
/// they present.
pub trait TransferObserver: Send + Sync {
    /// Called once, after planning and before any channel starts.
    fn on_run_started(&self, _plan: &TransferPlan) {}

    /// Called by the meter once per reporting interval.
    fn on_throughput(&self, _sample: &ThroughputSample) {}

    /// Called when one direction of one channel stops, with its final count.
    fn on_stream_stopped(&self, _channel: u8, _direction: Direction, _bytes: u64) {}

    /// Called after each verified session iteration.
    fn on_session_completed(&self, _result: &SessionResult) {}

    /// Called once, after every channel and the meter have stopped.
    fn on_run_completed(&self, _report: &RunReport) {}
}

/// Observer that discards all updates.
pub struct NullObserver;

impl TransferObserver for NullObserver {}
