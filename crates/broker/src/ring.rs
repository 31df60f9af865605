// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use parking_lot::Mutex;

/// Fixed-capacity circular buffer of recent PTY output.
///
/// New viewers are sent a snapshot so they see the current screen state
/// without a full scrollback. When the buffer wraps, older data is silently
/// discarded. The buffer guards its own state: `append` from the read loop
/// and `snapshot` from attach paths may race freely.
#[derive(Debug)]
pub struct ReplayBuffer {
    inner: Mutex<Inner>,
    capacity: usize,
}

#[derive(Debug)]
struct Inner {
    buf: Vec<u8>,
    write_pos: usize,
    filled: usize,
    total_written: u64,
}

impl ReplayBuffer {
    /// Create a new replay buffer with the given capacity in bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                buf: vec![0u8; capacity],
                write_pos: 0,
                filled: 0,
                total_written: 0,
            }),
            capacity,
        }
    }

    /// Append data, overwriting the oldest bytes when full.
    pub fn append(&self, data: &[u8]) {
        let mut inner = self.inner.lock();
        inner.total_written += data.len() as u64;

        // Only the final `capacity` bytes of an oversized append survive.
        let data = if data.len() > self.capacity {
            &data[data.len() - self.capacity..]
        } else {
            data
        };

        let start = inner.write_pos;
        let end = start + data.len();
        if end <= self.capacity {
            inner.buf[start..end].copy_from_slice(data);
        } else {
            let first = self.capacity - start;
            inner.buf[start..self.capacity].copy_from_slice(&data[..first]);
            let rest = data.len() - first;
            inner.buf[..rest].copy_from_slice(&data[first..]);
        }

        inner.write_pos = end % self.capacity.max(1);
        inner.filled = (inner.filled + data.len()).min(self.capacity);
    }

    /// Copy of the most recent bytes, in write order.
    ///
    /// The result is always a suffix of everything ever appended, of length
    /// `min(capacity, total_written)`.
    pub fn snapshot(&self) -> Vec<u8> {
        let inner = self.inner.lock();
        let mut out = Vec::with_capacity(inner.filled);
        if inner.filled < self.capacity {
            out.extend_from_slice(&inner.buf[..inner.filled]);
        } else {
            out.extend_from_slice(&inner.buf[inner.write_pos..]);
            out.extend_from_slice(&inner.buf[..inner.write_pos]);
        }
        out
    }

    /// Drop all buffered data. The total-written counter is kept.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.write_pos = 0;
        inner.filled = 0;
    }

    /// Total bytes ever appended through this buffer.
    pub fn total_written(&self) -> u64 {
        self.inner.lock().total_written
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
#[path = "ring_tests.rs"]
mod tests;
