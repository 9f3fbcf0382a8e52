//! One channel's paired writer/reader lifecycle.
//!
//! Writer and reader run fully overlapped: with an external loopback, the
//! channel's reader is what drains the FIFO the writer fills, so gating one on
//! the other would deadlock once the hardware buffer is full. Verification
//! starts only after both have joined.

use std::fmt;
use std::thread;

use crossbeam_channel::Sender;

use crate::model::{Direction, SessionResult, TransferSpec};
use crate::progress::TransferObserver;
use crate::stream::{StreamContext, StreamLink, StreamReader, StreamWriter};
use crate::verify;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    /// Writer and reader in flight
    Running,
    Verifying,
    /// Loop mode: about to start the next iteration
    LoopBack,
    Done,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::Idle => write!(f, "idle"),
            SessionPhase::Running => write!(f, "running"),
            SessionPhase::Verifying => write!(f, "verifying"),
            SessionPhase::LoopBack => write!(f, "loop-back"),
            SessionPhase::Done => write!(f, "done"),
        }
    }
}

/// Runs one channel to completion, once or until cancelled in loop mode.
pub struct ChannelTransferSession<'a> {
    spec: &'a TransferSpec,
    loop_mode: bool,
    phase: SessionPhase,
    iteration: u64,
}

impl<'a> ChannelTransferSession<'a> {
    pub fn new(spec: &'a TransferSpec, loop_mode: bool) -> Self {
        ChannelTransferSession {
            spec,
            loop_mode,
            phase: SessionPhase::Idle,
            iteration: 0,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Run every iteration. Each result goes to the observer and to `results`.
    ///
    /// Returns the number of iterations completed.
    pub fn run(
        &mut self,
        ctx: StreamContext<'_>,
        observer: &dyn TransferObserver,
        results: &Sender<SessionResult>,
    ) -> u64 {
        loop {
            let result = self.run_once(ctx, observer);
            observer.on_session_completed(&result);
            if results.send(result).is_err() {
                tracing::debug!(channel = self.spec.channel, "result collector gone");
            }
            self.iteration += 1;

            if self.loop_mode && !ctx.cancel.is_cancelled() {
                self.enter(SessionPhase::LoopBack);
            } else {
                self.enter(SessionPhase::Done);
                return self.iteration;
            }
        }
    }

    /// One write/read/verify cycle. The destination is truncated on entry.
    pub fn run_once(&mut self, ctx: StreamContext<'_>, observer: &dyn TransferObserver) -> SessionResult {
        let spec = self.spec;
        let channel = spec.channel;
        self.enter(SessionPhase::Running);

        let link = StreamLink::new();
        let (bytes_written, bytes_read) = thread::scope(|s| {
            let writer = s.spawn(|| StreamWriter::new(ctx, spec, &link).run());
            let reader = s.spawn(|| StreamReader::new(ctx, spec, &link).run());

            let written = writer.join().unwrap_or_else(|_| {
                tracing::error!(channel, "writer thread panicked");
                0
            });
            let read = reader.join().unwrap_or_else(|_| {
                tracing::error!(channel, "reader thread panicked");
                0
            });
            (written, read)
        });
        observer.on_stream_stopped(channel, Direction::Write, bytes_written);
        observer.on_stream_stopped(channel, Direction::Read, bytes_read);

        let cancelled = ctx.cancel.is_cancelled();
        self.enter(SessionPhase::Verifying);
        let verification = verify::verify(&spec.source, &spec.destination);

        SessionResult {
            channel,
            iteration: self.iteration,
            destination: spec.destination.clone(),
            bytes_written,
            bytes_read,
            cancelled,
            verification,
        }
    }

    fn enter(&mut self, phase: SessionPhase) {
        tracing::debug!(
            channel = self.spec.channel,
            iteration = self.iteration,
            from = %self.phase,
            to = %phase,
            "session phase"
        );
        self.phase = phase;
    }
}
