//! Per-channel writer and reader loops.
//!
//! The writer drains the source file into a channel; the reader drains the
//! channel into the destination file. Both run until the `TransferSpec`
//! `total_length` has moved, cancellation is observed, or the other side of
//! the same channel stopped short (see `StreamLink`). Both report their final
//! byte count.
//!
//! The two sides retry differently. A timed-out write is retried with the
//! same payload, any other write failure cancels the whole run. A read that
//! returns no bytes is retried whatever its status, since "did data arrive"
//! is the only signal the reader can act on.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::cancel::CancelToken;
use crate::model::{StreamSettings, TransferSpec};
use crate::planner::ChunkPlanner;
use crate::throughput::ThroughputCounters;
use crate::transport::{DuplexTransport, TransferStatus};

/// Everything a stream shares with the rest of the run.
#[derive(Clone, Copy)]
pub struct StreamContext<'a> {
    pub transport: &'a dyn DuplexTransport,
    pub counters: &'a ThroughputCounters,
    pub cancel: &'a CancelToken,
    pub settings: &'a StreamSettings,
}

/// Writer count while the writer is still running.
const WRITER_RUNNING: u64 = u64::MAX;

/// State shared by the writer and reader of one channel iteration.
///
/// Lets either side end the iteration early without touching the run-wide
/// `CancelToken`: a writer that stops short caps what the reader waits for,
/// and a reader that gives up stops the writer from retrying into a FIFO
/// nobody drains.
#[derive(Debug)]
pub struct StreamLink {
    writer_sent: AtomicU64,
    reader_stopped: AtomicBool,
}

impl StreamLink {
    pub fn new() -> Self {
        StreamLink {
            writer_sent: AtomicU64::new(WRITER_RUNNING),
            reader_stopped: AtomicBool::new(false),
        }
    }

    /// Record the writer's final count.
    pub fn finish_writer(&self, sent: u64) {
        self.writer_sent.store(sent, Ordering::SeqCst);
    }

    /// Bytes the reader can still hope to receive out of `total`.
    pub fn expected(&self, total: u64) -> u64 {
        total.min(self.writer_sent.load(Ordering::SeqCst))
    }

    pub fn stop_reader(&self) {
        self.reader_stopped.store(true, Ordering::SeqCst);
    }

    pub fn reader_stopped(&self) -> bool {
        self.reader_stopped.load(Ordering::SeqCst)
    }
}

impl Default for StreamLink {
    fn default() -> Self {
        Self::new()
    }
}

/// What the writer does after a transport call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAction {
    /// Count the transferred bytes and move to the next chunk
    Accept,
    /// Send the same chunk again
    Retry,
    /// Stop every channel
    Abort,
}

/// Write retry policy: retry on timeout only, abort on anything else.
pub fn write_action(status: TransferStatus) -> WriteAction {
    match status {
        TransferStatus::Success => WriteAction::Accept,
        TransferStatus::Timeout => WriteAction::Retry,
        TransferStatus::Failed { .. } => WriteAction::Abort,
    }
}

/// Pushes a source file into one channel.
pub struct StreamWriter<'a> {
    ctx: StreamContext<'a>,
    spec: &'a TransferSpec,
    link: &'a StreamLink,
    planner: ChunkPlanner,
}

impl<'a> StreamWriter<'a> {
    pub fn new(ctx: StreamContext<'a>, spec: &'a TransferSpec, link: &'a StreamLink) -> Self {
        StreamWriter {
            ctx,
            spec,
            link,
            planner: ChunkPlanner::new(ctx.settings.buffer_len),
        }
    }

    pub fn with_planner(mut self, planner: ChunkPlanner) -> Self {
        self.planner = planner;
        self
    }

    /// Stream the source out. Returns the number of bytes the transport accepted.
    ///
    /// The final count is published on the link whether or not the whole
    /// source went out.
    pub fn run(mut self) -> u64 {
        let sent = self.stream();
        self.link.finish_writer(sent);
        tracing::info!(channel = self.spec.channel, sent, "write stopped");
        sent
    }

    fn stream(&mut self) -> u64 {
        let channel = self.spec.channel;
        let mut src = match File::open(&self.spec.source) {
            Ok(file) => file,
            Err(e) => {
                tracing::error!(channel, path = %self.spec.source.display(), error = %e, "failed to open source");
                return 0;
            }
        };

        let ctx = self.ctx;
        let total = self.spec.total_length;
        let mut buf = vec![0u8; self.planner.max_chunk()];
        let mut sent: u64 = 0;

        while !ctx.cancel.is_cancelled() && !self.link.reader_stopped() && sent < total {
            let len = self.planner.next_chunk_size().min((total - sent) as usize);
            let len = match read_up_to(&mut src, &mut buf[..len]) {
                Ok(n) => n,
                Err(e) => {
                    tracing::error!(channel, sent, error = %e, "failed to read source");
                    break;
                }
            };
            if len == 0 {
                tracing::warn!(channel, sent, total, "source ended early");
                break;
            }

            let Some(count) = self.send_chunk(&buf[..len], sent) else {
                break;
            };
            ctx.counters.add_tx(count as u64);
            sent += count as u64;
        }

        sent
    }

    /// One chunk, retried on timeout. `None` means the stream must stop.
    fn send_chunk(&self, chunk: &[u8], sent: u64) -> Option<usize> {
        let ctx = self.ctx;
        let channel = self.spec.channel;

        loop {
            let outcome = ctx
                .transport
                .write_chunk(channel, chunk, ctx.settings.op_timeout);

            match write_action(outcome.status) {
                WriteAction::Accept => return Some(outcome.transferred),
                WriteAction::Retry => {
                    if ctx.cancel.is_cancelled() {
                        return None;
                    }
                    if self.link.reader_stopped() {
                        tracing::warn!(channel, sent, "reader gone, abandoning write");
                        return None;
                    }
                    tracing::warn!(channel, sent, len = chunk.len(), "write timed out, retrying");
                }
                WriteAction::Abort => {
                    if ctx.cancel.is_cancelled() {
                        return None;
                    }
                    tracing::error!(channel, sent, status = %outcome.status, "write failed, cancelling transfer");
                    ctx.cancel.cancel();
                    return None;
                }
            }
        }
    }
}

/// Pulls one channel into a destination file.
pub struct StreamReader<'a> {
    ctx: StreamContext<'a>,
    spec: &'a TransferSpec,
    link: &'a StreamLink,
    planner: ChunkPlanner,
}

impl<'a> StreamReader<'a> {
    pub fn new(ctx: StreamContext<'a>, spec: &'a TransferSpec, link: &'a StreamLink) -> Self {
        StreamReader {
            ctx,
            spec,
            link,
            planner: ChunkPlanner::new(ctx.settings.buffer_len),
        }
    }

    pub fn with_planner(mut self, planner: ChunkPlanner) -> Self {
        self.planner = planner;
        self
    }

    /// Receive into the (truncated) destination. Returns the bytes written to it.
    ///
    /// Stops once `total_length` arrived, or once everything a writer that
    /// stopped short managed to send has arrived.
    pub fn run(mut self) -> u64 {
        let received = self.stream();
        if received < self.spec.total_length {
            self.link.stop_reader();
        }
        tracing::info!(channel = self.spec.channel, received, "read stopped");
        received
    }

    fn stream(&mut self) -> u64 {
        let channel = self.spec.channel;
        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.spec.destination)
        {
            Ok(file) => file,
            Err(e) => {
                tracing::error!(channel, path = %self.spec.destination.display(), error = %e, "failed to open destination");
                return 0;
            }
        };

        let ctx = self.ctx;
        let total = self.spec.total_length;
        let mut dest = BufWriter::with_capacity(self.planner.max_chunk(), file);
        let mut buf = vec![0u8; self.planner.max_chunk()];
        let mut received: u64 = 0;
        let mut empty_reads: u32 = 0;

        loop {
            let expected = self.link.expected(total);
            if ctx.cancel.is_cancelled() || received >= expected {
                break;
            }

            let len = self.planner.next_read_size(expected - received);
            let outcome = ctx
                .transport
                .read_chunk(channel, &mut buf[..len], ctx.settings.op_timeout);

            if outcome.transferred == 0 {
                empty_reads += 1;
                tracing::warn!(channel, received, status = %outcome.status, "no data read from channel");
                if let Some(max) = ctx.settings.max_empty_reads {
                    if empty_reads >= max {
                        tracing::error!(channel, received, empty_reads, "channel stalled, giving up");
                        break;
                    }
                }
                continue;
            }
            empty_reads = 0;

            let count = outcome.transferred.min(len);
            if let Err(e) = dest.write_all(&buf[..count]) {
                tracing::error!(channel, received, error = %e, "failed to write destination");
                break;
            }
            ctx.counters.add_rx(count as u64);
            received += count as u64;
        }

        if let Err(e) = dest.flush() {
            tracing::error!(channel, received, error = %e, "failed to flush destination");
        }
        received
    }
}

/// Fill `buf` from `src`, stopping early only at end of file.
fn read_up_to(src: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match src.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
