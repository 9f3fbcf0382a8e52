/// Integration tests: stream files through a loopback transport on one or
/// more channels and check what comes back.
///
/// Fault-injecting wrappers around `LoopbackTransport` cover write timeouts,
/// empty reads, hard transport errors and a transport that stalls entirely.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use fifostream::{
    plan_transfer, run_transfer, transfer, CancelToken, Direction, DuplexTransport,
    LoopbackTransport, NullObserver, RunReport, SessionResult, StreamSettings, TransferConfig,
    TransferObserver, TransferOutcome, TransferPlan, VerifyOutcome,
};
use parking_lot::Mutex;

fn settings() -> StreamSettings {
    StreamSettings {
        buffer_len: 16 * 1024,
        op_timeout: Duration::from_millis(50),
        report_interval: Duration::from_millis(20),
        max_empty_reads: None,
    }
}

fn write_source(dir: &Path, len: usize) -> PathBuf {
    let path = dir.join("input.bin");
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    fs::write(&path, data).expect("Failed to write source");
    path
}

fn run(config: &TransferConfig, transport: &dyn DuplexTransport) -> RunReport {
    let cancel = CancelToken::new();
    transfer(config, transport, &cancel, &NullObserver).expect("transfer failed to start")
}

/// Records stream stop counts and completed sessions; optionally cancels
/// after a number of completed sessions.
struct Recorder {
    stopped: Mutex<Vec<(u8, Direction, u64)>>,
    completed: Mutex<Vec<SessionResult>>,
    cancel_after: Option<(usize, CancelToken)>,
}

impl Recorder {
    fn new() -> Self {
        Recorder {
            stopped: Mutex::new(Vec::new()),
            completed: Mutex::new(Vec::new()),
            cancel_after: None,
        }
    }

    fn cancelling_after(sessions: usize, cancel: CancelToken) -> Self {
        Recorder {
            cancel_after: Some((sessions, cancel)),
            ..Recorder::new()
        }
    }
}

impl TransferObserver for Recorder {
    fn on_stream_stopped(&self, channel: u8, direction: Direction, bytes: u64) {
        self.stopped.lock().push((channel, direction, bytes));
    }

    fn on_session_completed(&self, result: &SessionResult) {
        let mut completed = self.completed.lock();
        completed.push(result.clone());
        if let Some((limit, cancel)) = &self.cancel_after {
            if completed.len() >= *limit {
                cancel.cancel();
            }
        }
    }
}

/// Loopback that times out every third write and returns nothing on every
/// fourth read, without moving any bytes on those calls.
struct FlakyTransport {
    inner: LoopbackTransport,
    writes: AtomicUsize,
    reads: AtomicUsize,
}

impl DuplexTransport for FlakyTransport {
    fn write_chunk(&self, channel: u8, data: &[u8], timeout: Duration) -> TransferOutcome {
        if self.writes.fetch_add(1, Ordering::Relaxed) % 3 == 2 {
            return TransferOutcome::timeout();
        }
        self.inner.write_chunk(channel, data, timeout)
    }

    fn read_chunk(&self, channel: u8, buf: &mut [u8], timeout: Duration) -> TransferOutcome {
        if self.reads.fetch_add(1, Ordering::Relaxed) % 4 == 3 {
            return TransferOutcome::timeout();
        }
        self.inner.read_chunk(channel, buf, timeout)
    }
}

/// Loopback whose writes on one channel fail hard after a few chunks.
struct FailingChannel {
    inner: LoopbackTransport,
    channel: u8,
    healthy_writes: usize,
    writes: AtomicUsize,
}

impl DuplexTransport for FailingChannel {
    fn write_chunk(&self, channel: u8, data: &[u8], timeout: Duration) -> TransferOutcome {
        if channel == self.channel
            && self.writes.fetch_add(1, Ordering::Relaxed) >= self.healthy_writes
        {
            return TransferOutcome::failed(4);
        }
        self.inner.write_chunk(channel, data, timeout)
    }

    fn read_chunk(&self, channel: u8, buf: &mut [u8], timeout: Duration) -> TransferOutcome {
        self.inner.read_chunk(channel, buf, timeout)
    }
}

/// Accepts nothing and delivers nothing; every call waits out its timeout.
struct StalledTransport;

impl DuplexTransport for StalledTransport {
    fn write_chunk(&self, _channel: u8, _data: &[u8], timeout: Duration) -> TransferOutcome {
        thread::sleep(timeout);
        TransferOutcome::timeout()
    }

    fn read_chunk(&self, _channel: u8, _buf: &mut [u8], timeout: Duration) -> TransferOutcome {
        thread::sleep(timeout);
        TransferOutcome::timeout()
    }
}

/// Loopback whose reads never deliver anything: the FIFO fills and stays full.
struct DeafReader {
    inner: LoopbackTransport,
}

impl DuplexTransport for DeafReader {
    fn write_chunk(&self, channel: u8, data: &[u8], timeout: Duration) -> TransferOutcome {
        self.inner.write_chunk(channel, data, timeout)
    }

    fn read_chunk(&self, _channel: u8, _buf: &mut [u8], timeout: Duration) -> TransferOutcome {
        thread::sleep(timeout);
        TransferOutcome::timeout()
    }
}

/// Panics while reporting a finished iteration of one channel.
struct PanicsOnChannel(u8);

impl TransferObserver for PanicsOnChannel {
    fn on_session_completed(&self, result: &SessionResult) {
        if result.channel == self.0 {
            panic!("observer failure on channel {}", result.channel);
        }
    }
}

/// Run `plan`, cancelling it from outside if it is still going after `limit`.
/// Returns the report and how long the run took.
fn run_with_watchdog(
    plan: &TransferPlan,
    transport: &dyn DuplexTransport,
    limit: Duration,
) -> (RunReport, Duration) {
    let cancel = CancelToken::new();
    let start = Instant::now();
    thread::scope(|s| {
        let run = s.spawn(|| {
            let report = run_transfer(plan, transport, &cancel, &NullObserver);
            (report, start.elapsed())
        });
        while !run.is_finished() && start.elapsed() < limit {
            thread::sleep(Duration::from_millis(10));
        }
        cancel.cancel();
        run.join().expect("run panicked")
    })
}

fn assert_round_trip(len: usize) {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let src = write_source(temp_dir.path(), len);
    let dst = temp_dir.path().join("output.bin");
    let config = TransferConfig::new(&src, &dst, 1).with_settings(settings());
    let transport = LoopbackTransport::new(1, 64 * 1024);

    let report = run(&config, &transport);

    assert!(!report.failed(), "verification failed: {:?}", report.channels);
    assert!(!report.cancelled);
    assert_eq!(report.channels.len(), 1);
    let summary = &report.channels[0];
    assert_eq!(summary.passes, 1);
    assert_eq!(summary.bytes_written, len as u64);
    assert_eq!(summary.bytes_read, len as u64);
    let last = summary.last_result.as_ref().expect("no result");
    assert_eq!(last.verification, VerifyOutcome::Identical { length: len as u64 });
    assert_eq!(fs::read(&src).expect("read src"), fs::read(&dst).expect("read dst"));
}

#[test]
fn loopback_round_trip_tiny_file() {
    assert_round_trip(3);
}

#[test]
fn loopback_round_trip_unaligned_length() {
    assert_round_trip(100_003);
}

#[test]
fn loopback_round_trip_medium_file() {
    assert_round_trip(2 * 1024 * 1024);
}

#[test]
fn multi_channel_fan_out_verifies_every_destination() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let src = write_source(temp_dir.path(), 300_000);
    let base = temp_dir.path().join("out.bin");
    let config = TransferConfig::new(&src, &base, 3).with_settings(settings());
    let transport = LoopbackTransport::new(3, 64 * 1024);
    let recorder = Recorder::new();

    let plan = plan_transfer(&config).expect("Failed to plan");
    let report = run_transfer(&plan, &transport, &CancelToken::new(), &recorder);

    assert!(!report.failed());
    assert_eq!(report.channels.len(), 3);
    assert_eq!(report.passes(), 3);
    for (channel, summary) in report.channels.iter().enumerate() {
        assert_eq!(summary.channel as usize, channel);
        assert_eq!(summary.destination, temp_dir.path().join(format!("out.bin{}", channel)));
        assert!(summary.destination.exists());
    }
    assert!(!base.exists(), "base name is only used for a single channel");

    let stopped = recorder.stopped.lock();
    assert_eq!(stopped.len(), 6);
    assert!(stopped.iter().all(|(_, _, bytes)| *bytes == 300_000));
}

#[test]
fn timeouts_and_empty_reads_are_retried_losslessly() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let src = write_source(temp_dir.path(), 500_000);
    let dst = temp_dir.path().join("output.bin");
    let config = TransferConfig::new(&src, &dst, 2).with_settings(settings());
    let transport = FlakyTransport {
        inner: LoopbackTransport::new(2, 64 * 1024),
        writes: AtomicUsize::new(0),
        reads: AtomicUsize::new(0),
    };

    let report = run(&config, &transport);

    assert!(!report.failed(), "verification failed: {:?}", report.channels);
    assert!(!report.cancelled);
    assert!(transport.writes.load(Ordering::Relaxed) > 0);
}

#[test]
fn hard_transport_error_cancels_all_channels() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let src = write_source(temp_dir.path(), 4 * 1024 * 1024);
    let dst = temp_dir.path().join("output.bin");
    let config = TransferConfig::new(&src, &dst, 2).with_settings(settings());
    let transport = FailingChannel {
        inner: LoopbackTransport::new(2, 64 * 1024),
        channel: 1,
        healthy_writes: 2,
        writes: AtomicUsize::new(0),
    };

    let report = run(&config, &transport);

    assert!(report.cancelled);
    assert!(report.failed());
    let failing = report
        .channel(1)
        .and_then(|c| c.first_failure.as_ref())
        .expect("no failure recorded for channel 1");
    assert!(failing.cancelled);
    assert!(failing.bytes_written < 4 * 1024 * 1024);
    assert!(matches!(failing.verification, VerifyOutcome::SizeMismatch { .. }));
}

#[test]
fn loop_mode_repeats_until_cancelled() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let src = write_source(temp_dir.path(), 64 * 1024 + 5);
    let dst = temp_dir.path().join("output.bin");
    let config = TransferConfig::new(&src, &dst, 1)
        .with_loop_mode(true)
        .with_settings(settings());
    let transport = LoopbackTransport::new(1, 64 * 1024);
    let cancel = CancelToken::new();
    let recorder = Recorder::cancelling_after(3, cancel.clone());

    let report = transfer(&config, &transport, &cancel, &recorder).expect("transfer failed to start");

    assert!(report.loop_mode);
    assert!(report.cancelled);
    assert_eq!(report.passes(), 3, "no iteration may start after cancellation");
    let iterations: Vec<u64> = recorder.completed.lock().iter().map(|s| s.iteration).collect();
    assert_eq!(iterations, [0, 1, 2]);
    let summary = report.channel(0).expect("no summary for channel 0");
    assert_eq!(summary.last_result.as_ref().map(|r| r.iteration), Some(2));
    assert!(summary.first_failure.is_none());
    assert!(!report.failed(), "every completed iteration should verify");
    assert_eq!(fs::read(&src).expect("read src"), fs::read(&dst).expect("read dst"));
}

#[test]
fn cancellation_converges_on_stalled_transport() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let src = write_source(temp_dir.path(), 10_000);
    let dst = temp_dir.path().join("output.bin");
    let config = TransferConfig::new(&src, &dst, 4).with_settings(settings());
    let plan = plan_transfer(&config).expect("Failed to plan");
    let cancel = CancelToken::new();

    let start = Instant::now();
    let report = thread::scope(|s| {
        let run = s.spawn(|| run_transfer(&plan, &StalledTransport, &cancel, &NullObserver));
        thread::sleep(Duration::from_millis(150));
        cancel.cancel();
        run.join().expect("run panicked")
    });

    assert!(start.elapsed() < Duration::from_secs(3));
    assert!(report.cancelled);
    assert_eq!(report.channels.len(), 4);
    assert!(report
        .channels
        .iter()
        .all(|c| c.passes == 1 && c.bytes_written == 0 && c.bytes_read == 0));
    assert!(report.failed());
}

#[test]
fn reader_giving_up_ends_session_when_writer_is_blocked() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let src = write_source(temp_dir.path(), 200_000);
    let dst = temp_dir.path().join("output.bin");
    let settings = StreamSettings {
        buffer_len: 4096,
        op_timeout: Duration::from_millis(10),
        max_empty_reads: Some(3),
        ..settings()
    };
    let config = TransferConfig::new(&src, &dst, 1).with_settings(settings);
    let plan = plan_transfer(&config).expect("Failed to plan");
    let transport = DeafReader {
        inner: LoopbackTransport::new(1, 16 * 1024),
    };

    let (report, elapsed) = run_with_watchdog(&plan, &transport, Duration::from_secs(5));

    assert!(elapsed < Duration::from_secs(3), "session hung for {:?}", elapsed);
    assert!(!report.cancelled);
    assert!(report.failed());
    let summary = report.channel(0).expect("no summary for channel 0");
    assert_eq!(summary.passes, 1);
    assert!(summary.bytes_written <= 16 * 1024);
    assert_eq!(summary.bytes_read, 0);
    assert!(matches!(
        summary.first_failure.as_ref().map(|r| &r.verification),
        Some(VerifyOutcome::SizeMismatch { source_len: 200_000, destination_len: 0 })
    ));
}

#[test]
fn source_removed_after_planning_fails_verification_promptly() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let src = write_source(temp_dir.path(), 50_000);
    let dst = temp_dir.path().join("output.bin");
    let config = TransferConfig::new(&src, &dst, 2).with_settings(settings());
    let plan = plan_transfer(&config).expect("Failed to plan");
    assert_eq!(plan.settings.max_empty_reads, None);
    fs::remove_file(&src).expect("Failed to remove source");
    let transport = LoopbackTransport::new(2, 64 * 1024);

    let (report, elapsed) = run_with_watchdog(&plan, &transport, Duration::from_secs(5));

    assert!(elapsed < Duration::from_secs(3), "session hung for {:?}", elapsed);
    assert!(!report.cancelled);
    assert!(report.failed());
    assert!(report.missing_channels().is_empty());
    for summary in &report.channels {
        assert_eq!(summary.passes, 1);
        assert_eq!(summary.bytes_written, 0);
        let failure = summary.first_failure.as_ref().expect("no failure recorded");
        assert!(matches!(failure.verification, VerifyOutcome::Unreadable { .. }));
    }
}

#[test]
fn panicking_session_marks_run_failed() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let src = write_source(temp_dir.path(), 10_000);
    let base = temp_dir.path().join("out.bin");
    let config = TransferConfig::new(&src, &base, 2).with_settings(settings());
    let transport = LoopbackTransport::new(2, 64 * 1024);

    let report = transfer(&config, &transport, &CancelToken::new(), &PanicsOnChannel(1))
        .expect("transfer failed to start");

    assert_eq!(report.channels.len(), 2);
    assert!(report.failed());
    assert_eq!(report.missing_channels(), [1]);
    assert!(report.channel(0).map(|c| c.verified()).unwrap_or(false));
    assert!(report.channel(1).map(|c| c.panicked).unwrap_or(false));
}

#[test]
fn loop_mode_report_stays_bounded() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let src = write_source(temp_dir.path(), 64);
    let dst = temp_dir.path().join("output.bin");
    let config = TransferConfig::new(&src, &dst, 1)
        .with_loop_mode(true)
        .with_settings(settings());
    let transport = LoopbackTransport::new(1, 64 * 1024);
    let cancel = CancelToken::new();
    let recorder = Recorder::cancelling_after(200, cancel.clone());

    let report = transfer(&config, &transport, &cancel, &recorder).expect("transfer failed to start");

    let summary = report.channel(0).expect("no summary for channel 0");
    assert_eq!(summary.passes, 200);
    assert_eq!(summary.failures, 0);
    assert_eq!(summary.bytes_written, 200 * 64);
    assert_eq!(summary.last_result.as_ref().map(|r| r.iteration), Some(199));
    assert!(!report.failed());
}
