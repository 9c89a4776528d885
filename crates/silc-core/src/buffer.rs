//! Byte-accurate ring buffer that preserves raw PTY output.
//!
//! The buffer is append-only and size-bounded. Readers address it through a
//! monotonic byte cursor: `get_since(cursor)` returns everything appended
//! since the caller last checked plus the new cursor. A reader that falls
//! behind eviction observes a gap (fewer bytes than the cursor delta); that
//! is part of the contract, and history-hungry clients re-request the whole
//! buffer on connect instead.

use std::collections::VecDeque;

use bytes::Bytes;

/// Default buffer capacity in bytes.
pub const DEFAULT_CAPACITY: usize = 64 * 1024;

#[derive(Debug)]
pub struct RawBuffer {
    data: VecDeque<u8>,
    capacity: usize,
    /// Bytes evicted so far.
    start_offset: u64,
    /// Bytes ever appended.
    total_bytes: u64,
}

impl Default for RawBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl RawBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity,
            start_offset: 0,
            total_bytes: 0,
        }
    }

    /// Append new bytes, evicting the oldest ones past capacity.
    pub fn append(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }

        self.data.extend(bytes.iter().copied());
        self.total_bytes += bytes.len() as u64;

        if self.data.len() > self.capacity {
            let overflow = self.data.len() - self.capacity;
            self.data.drain(..overflow);
            self.start_offset += overflow as u64;
        }
    }

    /// The cursor a brand-new reader should start from.
    pub fn cursor(&self) -> u64 {
        self.total_bytes
    }

    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Return all bytes appended since `cursor` along with the new cursor.
    ///
    /// The cursor is clamped into `[start_offset, total_bytes]`, so stale and
    /// future cursors are both safe. An up-to-date caller gets an empty slice.
    pub fn get_since(&self, cursor: u64) -> (Bytes, u64) {
        let clamped = cursor.clamp(self.start_offset, self.total_bytes);
        let start = (clamped - self.start_offset) as usize;
        if start >= self.data.len() {
            return (Bytes::new(), self.total_bytes);
        }

        let chunk: Vec<u8> = self.data.iter().skip(start).copied().collect();
        (Bytes::from(chunk), self.total_bytes)
    }

    /// Decode the buffer as lossy UTF-8 and return the last `lines` lines.
    pub fn get_last(&self, lines: usize) -> Vec<String> {
        if self.data.is_empty() {
            return Vec::new();
        }

        let contiguous: Vec<u8> = self.data.iter().copied().collect();
        let decoded = String::from_utf8_lossy(&contiguous);
        let all: Vec<String> = decoded
            .split('\n')
            .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
            .collect();

        let skip = all.len().saturating_sub(lines);
        all.into_iter().skip(skip).collect()
    }

    /// Full current contents, for screen rehydration.
    pub fn get_bytes(&self) -> Bytes {
        let contiguous: Vec<u8> = self.data.iter().copied().collect();
        Bytes::from(contiguous)
    }

    /// Reset to an empty buffer with offset 0.
    pub fn clear(&mut self) {
        self.data.clear();
        self.start_offset = 0;
        self.total_bytes = 0;
    }
}
