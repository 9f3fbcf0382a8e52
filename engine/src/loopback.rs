//! In-process loopback transport.
//!
//! Stands in for a loopback FPGA behind a multi-channel FIFO bridge: bytes
//! written on channel N come back, in order, on channel N. Each channel is a
//! bounded byte FIFO, so a writer that runs ahead of its reader sees the same
//! backpressure (write timeouts) real hardware produces.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::transport::{DuplexTransport, TransferOutcome};

/// Status code for a call on a channel the transport does not have.
pub const STATUS_INVALID_CHANNEL: u32 = 6;

/// Status code for a write larger than the channel FIFO can ever hold.
pub const STATUS_CHUNK_TOO_LARGE: u32 = 5;

struct ChannelFifo {
    bytes: Mutex<VecDeque<u8>>,
    readable: Condvar,
    writable: Condvar,
}

impl ChannelFifo {
    fn new(capacity: usize) -> Self {
        ChannelFifo {
            bytes: Mutex::new(VecDeque::with_capacity(capacity)),
            readable: Condvar::new(),
            writable: Condvar::new(),
        }
    }
}

/// Bounded per-channel FIFOs looped back onto themselves.
pub struct LoopbackTransport {
    channels: Vec<ChannelFifo>,
    capacity: usize,
}

impl LoopbackTransport {
    /// Create a transport with `channels` FIFOs of `capacity` bytes each.
    pub fn new(channels: u8, capacity: usize) -> Self {
        LoopbackTransport {
            channels: (0..channels).map(|_| ChannelFifo::new(capacity)).collect(),
            capacity,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently queued on `channel`, or `None` for an unknown channel.
    pub fn pending(&self, channel: u8) -> Option<usize> {
        self.channels
            .get(channel as usize)
            .map(|fifo| fifo.bytes.lock().len())
    }
}

impl DuplexTransport for LoopbackTransport {
    fn write_chunk(&self, channel: u8, data: &[u8], timeout: Duration) -> TransferOutcome {
        let Some(fifo) = self.channels.get(channel as usize) else {
            return TransferOutcome::failed(STATUS_INVALID_CHANNEL);
        };
        if data.len() > self.capacity {
            return TransferOutcome::failed(STATUS_CHUNK_TOO_LARGE);
        }

        // All-or-nothing: the chunk goes in whole once there is room for it.
        let deadline = Instant::now() + timeout;
        let mut bytes = fifo.bytes.lock();
        while self.capacity - bytes.len() < data.len() {
            if fifo.writable.wait_until(&mut bytes, deadline).timed_out()
                && self.capacity - bytes.len() < data.len()
            {
                return TransferOutcome::timeout();
            }
        }
        bytes.extend(data.iter().copied());
        drop(bytes);
        fifo.readable.notify_all();

        TransferOutcome::success(data.len())
    }

    fn read_chunk(&self, channel: u8, buf: &mut [u8], timeout: Duration) -> TransferOutcome {
        let Some(fifo) = self.channels.get(channel as usize) else {
            return TransferOutcome::failed(STATUS_INVALID_CHANNEL);
        };
        if buf.is_empty() {
            return TransferOutcome::success(0);
        }

        let deadline = Instant::now() + timeout;
        let mut bytes = fifo.bytes.lock();
        while bytes.is_empty() {
            if fifo.readable.wait_until(&mut bytes, deadline).timed_out() && bytes.is_empty() {
                return TransferOutcome::timeout();
            }
        }
        let count = buf.len().min(bytes.len());
        for (slot, byte) in buf.iter_mut().zip(bytes.drain(..count)) {
            *slot = byte;
        }
        drop(bytes);
        fifo.writable.notify_all();

        TransferOutcome::success(count)
    }
}
