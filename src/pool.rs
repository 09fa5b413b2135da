// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::warn;

/// Describes one packet inside a buffer. Only variable bit-rate streams need
/// these; constant bit-rate buffers are sliced uniformly by the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketDescription {
    /// Byte offset of the packet inside the buffer.
    pub offset: usize,
    /// Size of the packet in bytes.
    pub byte_size: usize,
    /// Timestamp of the packet's first frame, in frames since the start of
    /// the stream.
    pub timestamp: u64,
    /// Number of frames the packet decodes to.
    pub frames: u64,
}

/// A fixed-size buffer holding a run of packets read from a file or captured
/// from a device. Buffers are recycled through a [`BufferPool`] rather than
/// reallocated.
pub struct PacketBuffer {
    data: Vec<u8>,
    capacity: usize,
    descriptions: Vec<PacketDescription>,
    start_timestamp: u64,
    packet_count: usize,
}

impl PacketBuffer {
    fn new(capacity: usize) -> PacketBuffer {
        PacketBuffer {
            data: Vec::with_capacity(capacity),
            capacity,
            descriptions: Vec::new(),
            start_timestamp: 0,
            packet_count: 0,
        }
    }

    /// Clears the buffer for reuse. Capacity is retained.
    pub fn reset(&mut self) {
        self.data.clear();
        self.descriptions.clear();
        self.start_timestamp = 0;
        self.packet_count = 0;
    }

    /// Whether a packet of the given size fits in the remaining space. An
    /// empty buffer always accepts one packet, even an oversized one.
    pub fn fits(&self, byte_size: usize) -> bool {
        self.data.is_empty() || self.data.len() + byte_size <= self.capacity
    }

    /// Appends a packet. For variable bit-rate streams `described` is true
    /// and a packet description is recorded; constant bit-rate buffers only
    /// track their starting timestamp.
    pub fn push_packet(&mut self, bytes: &[u8], timestamp: u64, frames: u64, described: bool) {
        if self.data.is_empty() {
            self.start_timestamp = timestamp;
        }
        if bytes.len() > self.capacity {
            // The sizing heuristic keeps buffers at least one max-size packet
            // large, so this only happens when the upper bound was wrong.
            warn!(
                packet_bytes = bytes.len(),
                capacity = self.capacity,
                "Packet exceeds buffer capacity, growing buffer"
            );
        }
        if described {
            self.descriptions.push(PacketDescription {
                offset: self.data.len(),
                byte_size: bytes.len(),
                timestamp,
                frames,
            });
        }
        self.data.extend_from_slice(bytes);
        self.packet_count += 1;
    }

    /// Appends raw interleaved f32 samples, used by the capture pipeline
    /// where the device callback produces frames rather than file packets.
    pub fn push_samples(&mut self, samples: &[f32], timestamp: u64) {
        if self.data.is_empty() {
            self.start_timestamp = timestamp;
        }
        for sample in samples {
            self.data.extend_from_slice(&sample.to_le_bytes());
        }
        self.packet_count += 1;
    }

    /// Reads back interleaved f32 samples written with
    /// [`PacketBuffer::push_samples`].
    pub fn samples(&self) -> impl Iterator<Item = f32> + '_ {
        self.data
            .chunks_exact(std::mem::size_of::<f32>())
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn descriptions(&self) -> &[PacketDescription] {
        &self.descriptions
    }

    pub fn start_timestamp(&self) -> u64 {
        self.start_timestamp
    }

    pub fn packet_count(&self) -> usize {
        self.packet_count
    }
}

/// A fixed pool of packet buffers. All buffers are allocated up front; the
/// producer acquires free buffers, fills them, and hands them downstream, and
/// the consumer releases them back through a [`BufferRecycler`]. A buffer is
/// owned by exactly one side at a time.
pub struct BufferPool {
    free_tx: Sender<PacketBuffer>,
    free_rx: Receiver<PacketBuffer>,
}

impl BufferPool {
    /// Allocates `count` buffers of `buffer_size` bytes each.
    pub fn new(count: usize, buffer_size: usize) -> BufferPool {
        let (free_tx, free_rx) = bounded(count);
        for _ in 0..count {
            free_tx
                .send(PacketBuffer::new(buffer_size))
                .expect("pool channel sized to pool count");
        }
        BufferPool { free_tx, free_rx }
    }

    /// Waits up to `timeout` for a free buffer. Returns None on timeout so
    /// callers can check for cancellation and retry.
    pub fn acquire_timeout(&self, timeout: Duration) -> Option<PacketBuffer> {
        self.free_rx.recv_timeout(timeout).ok()
    }

    /// Takes a free buffer without waiting.
    pub fn try_acquire(&self) -> Option<PacketBuffer> {
        self.free_rx.try_recv().ok()
    }

    /// Creates a handle the consuming side uses to return buffers.
    pub fn recycler(&self) -> BufferRecycler {
        BufferRecycler {
            free_tx: self.free_tx.clone(),
        }
    }
}

/// Returns consumed buffers to the pool, reset for reuse.
#[derive(Clone)]
pub struct BufferRecycler {
    free_tx: Sender<PacketBuffer>,
}

impl BufferRecycler {
    pub fn release(&self, mut buffer: PacketBuffer) {
        buffer.reset();
        // The pool may already be gone during teardown; dropping the buffer
        // is fine in that case.
        let _ = self.free_tx.send(buffer);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_pool_cycles_fixed_buffers() {
        let pool = BufferPool::new(3, 64);
        let recycler = pool.recycler();

        let a = pool.try_acquire().expect("first buffer");
        let b = pool.try_acquire().expect("second buffer");
        let c = pool.try_acquire().expect("third buffer");
        assert!(pool.try_acquire().is_none());

        recycler.release(b);
        let again = pool.try_acquire().expect("recycled buffer");
        assert_eq!(again.capacity(), 64);
        assert!(again.is_empty());

        drop(a);
        drop(c);
        drop(again);
    }

    #[test]
    fn test_release_resets_buffer() {
        let pool = BufferPool::new(1, 64);
        let recycler = pool.recycler();

        let mut buffer = pool.try_acquire().expect("buffer");
        buffer.push_packet(&[1, 2, 3, 4], 100, 2, true);
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.packet_count(), 1);

        recycler.release(buffer);
        let buffer = pool.try_acquire().expect("buffer");
        assert!(buffer.is_empty());
        assert_eq!(buffer.packet_count(), 0);
        assert!(buffer.descriptions().is_empty());
        assert_eq!(buffer.start_timestamp(), 0);
    }

    #[test]
    fn test_described_packets_record_offsets() {
        let pool = BufferPool::new(1, 64);
        let mut buffer = pool.try_acquire().expect("buffer");

        buffer.push_packet(&[0; 10], 0, 4, true);
        buffer.push_packet(&[0; 6], 4, 4, true);

        let descriptions = buffer.descriptions();
        assert_eq!(descriptions.len(), 2);
        assert_eq!(descriptions[0].offset, 0);
        assert_eq!(descriptions[0].byte_size, 10);
        assert_eq!(descriptions[1].offset, 10);
        assert_eq!(descriptions[1].byte_size, 6);
        assert!(descriptions[0].timestamp <= descriptions[1].timestamp);
    }

    #[test]
    fn test_undescribed_packets_track_start_only() {
        let pool = BufferPool::new(1, 64);
        let mut buffer = pool.try_acquire().expect("buffer");

        buffer.push_packet(&[0; 8], 42, 2, false);
        buffer.push_packet(&[0; 8], 44, 2, false);

        assert!(buffer.descriptions().is_empty());
        assert_eq!(buffer.start_timestamp(), 42);
        assert_eq!(buffer.packet_count(), 2);
        assert_eq!(buffer.len(), 16);
    }

    #[test]
    fn test_fits() {
        let pool = BufferPool::new(1, 16);
        let mut buffer = pool.try_acquire().expect("buffer");

        // An empty buffer accepts anything, including oversized packets.
        assert!(buffer.fits(1000));
        buffer.push_packet(&[0; 12], 0, 1, true);
        assert!(buffer.fits(4));
        assert!(!buffer.fits(5));
    }

    #[test]
    fn test_sample_round_trip() {
        let pool = BufferPool::new(1, 64);
        let mut buffer = pool.try_acquire().expect("buffer");

        let frames = [0.5f32, -0.25, 1.0, 0.0];
        buffer.push_samples(&frames, 0);
        let read: Vec<f32> = buffer.samples().collect();
        assert_eq!(read, frames);
    }
}
