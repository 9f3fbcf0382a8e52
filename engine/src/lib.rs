//! # fifostream - Multi-channel loopback streaming engine
//!
//! Streams a file through a duplex, multi-channel transport while writing
//! what comes back to a second file, then checks the two are byte-identical.
//! Built for exercising FIFO bridges (USB 3.0 FIFO chips behind a loopback
//! FPGA and similar) under sustained, variable-size traffic.
//!
//! ## Overview
//!
//! - One writer and one reader thread per channel, fully overlapped
//! - Randomized, word-aligned chunk sizes on every transport call
//! - Writes retried on timeout, hard transport errors cancel every channel
//! - Aggregate TX/RX throughput reported on a fixed cadence
//! - Per-channel byte-exact verification, optional repeat-until-cancelled
//!
//! How a transport handle is obtained or configured is outside this crate:
//! anything implementing [`DuplexTransport`] will do. [`LoopbackTransport`]
//! provides an in-process one.
//!
//! ## Basic Usage
//!
//! ```no_run
//! use fifostream::{plan_transfer, run_transfer, CancelToken, LoopbackTransport,
//!                  NullObserver, TransferConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TransferConfig::new("input.bin", "output.bin", 2);
//! let plan = plan_transfer(&config)?;
//!
//! let transport = LoopbackTransport::new(2, 4 * config.settings.buffer_len);
//! let cancel = CancelToken::new();
//! let report = run_transfer(&plan, &transport, &cancel, &NullObserver);
//!
//! for channel in &report.channels {
//!     println!("{}: {} passes, {} failed", channel.destination.display(), channel.passes, channel.failures);
//! }
//! assert!(!report.failed());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: settings, plans, per-session results, run report
//! - **error**: configuration and verification errors
//! - **cancel**: cooperative cancellation token
//! - **planner**: randomized chunk sizing
//! - **transport**: the duplex handle seam
//! - **loopback**: in-process loopback transport
//! - **throughput**: shared counters and the periodic meter
//! - **stream**: per-channel writer and reader loops
//! - **session**: one channel's write/read/verify lifecycle
//! - **verify**: byte-exact file comparison
//! - **orchestrator**: planning and multi-channel fan-out
//! - **progress**: observer trait for UIs

pub mod cancel;
pub mod error;
pub mod loopback;
pub mod model;
pub mod orchestrator;
pub mod planner;
pub mod progress;
pub mod session;
pub mod stream;
pub mod throughput;
pub mod transport;
pub mod verify;

// Re-export main types and functions
pub use cancel::CancelToken;
pub use error::EngineError;
pub use loopback::LoopbackTransport;
pub use model::{
    ChannelSummary, Direction, RunReport, SessionResult, StreamSettings, TransferConfig,
    TransferPlan, TransferSpec, DEFAULT_BUFFER_LEN, MAX_CHANNELS,
};
pub use orchestrator::{destination_for, plan_transfer, run_transfer, transfer};
pub use planner::{ChunkPlanner, WORD_SIZE};
pub use progress::{NullObserver, TransferObserver};
pub use session::{ChannelTransferSession, SessionPhase};
pub use stream::{StreamContext, StreamLink, StreamReader, StreamWriter};
pub use throughput::{format_bytes, format_rate, ThroughputCounters, ThroughputMeter, ThroughputSample};
pub use transport::{DuplexTransport, TransferOutcome, TransferStatus};
pub use verify::{compare, verify, VerifyOutcome};
