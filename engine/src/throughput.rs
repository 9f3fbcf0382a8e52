//! Aggregate throughput accounting.
//!
//! Writers and readers of every channel add to one shared pair of counters.
//! The meter drains both on a fixed cadence and hands the sample to the
//! observer. No per-channel breakdown is kept.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::progress::TransferObserver;

/// Longest the meter sleeps before re-checking cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Transmit/receive byte counters shared by all stream threads.
///
/// These are the only values mutated by several threads at once; every access
/// is a single atomic add or swap.
#[derive(Debug, Default)]
pub struct ThroughputCounters {
    tx_bytes: AtomicU64,
    rx_bytes: AtomicU64,
}

impl ThroughputCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tx(&self, bytes: u64) {
        self.tx_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_rx(&self, bytes: u64) {
        self.rx_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Read both counters and reset them to zero.
    pub fn drain(&self) -> (u64, u64) {
        (
            self.tx_bytes.swap(0, Ordering::Relaxed),
            self.rx_bytes.swap(0, Ordering::Relaxed),
        )
    }
}

/// Bytes moved in each direction during one reporting interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThroughputSample {
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub interval: Duration,
}

impl ThroughputSample {
    pub fn total_bytes(&self) -> u64 {
        self.tx_bytes + self.rx_bytes
    }

    pub fn tx_rate(&self) -> f64 {
        self.per_second(self.tx_bytes)
    }

    pub fn rx_rate(&self) -> f64 {
        self.per_second(self.rx_bytes)
    }

    pub fn total_rate(&self) -> f64 {
        self.per_second(self.total_bytes())
    }

    fn per_second(&self, bytes: u64) -> f64 {
        let secs = self.interval.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            bytes as f64 / secs
        }
    }
}

impl fmt::Display for ThroughputSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TX:{} RX:{}, total:{}",
            format_rate(self.tx_rate()),
            format_rate(self.rx_rate()),
            format_rate(self.total_rate())
        )
    }
}

const BINARY_UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];

/// Scale `value` down by 1024 until it fits the largest sensible unit.
fn scale_binary(value: f64) -> (f64, &'static str) {
    let mut value = value;
    let mut unit_idx = 0;

    while value >= 1024.0 && unit_idx < BINARY_UNITS.len() - 1 {
        value /= 1024.0;
        unit_idx += 1;
    }

    (value, BINARY_UNITS[unit_idx])
}

/// Format a byte count with a binary unit, e.g. `1.50 KiB`.
pub fn format_bytes(bytes: u64) -> String {
    let (size, unit) = scale_binary(bytes as f64);
    format!("{:.2} {}", size, unit)
}

/// Format a byte rate with a binary unit, e.g. `12.50MiB/s`.
pub fn format_rate(bytes_per_sec: f64) -> String {
    let (rate, unit) = scale_binary(bytes_per_sec);
    format!("{:.2}{}/s", rate, unit)
}

/// Periodic reporter over a set of counters.
pub struct ThroughputMeter<'a> {
    counters: &'a ThroughputCounters,
    interval: Duration,
}

impl<'a> ThroughputMeter<'a> {
    pub fn new(counters: &'a ThroughputCounters, interval: Duration) -> Self {
        ThroughputMeter { counters, interval }
    }

    /// Report once per interval until `cancel` is set.
    ///
    /// Ticks are scheduled at `t0 + k * interval` so the cadence does not
    /// drift with the time spent reporting.
    pub fn run(&self, cancel: &CancelToken, observer: &dyn TransferObserver) {
        let mut next = Instant::now() + self.interval;

        while !cancel.is_cancelled() {
            let now = Instant::now();
            if now < next {
                thread::sleep((next - now).min(CANCEL_POLL));
                continue;
            }
            next += self.interval;

            let (tx_bytes, rx_bytes) = self.counters.drain();
            let sample = ThroughputSample {
                tx_bytes,
                rx_bytes,
                interval: self.interval,
            };
            tracing::debug!(tx_bytes, rx_bytes, "throughput tick");
            observer.on_throughput(&sample);
        }
    }
}
