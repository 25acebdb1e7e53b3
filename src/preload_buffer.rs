use crate::format::BlockHeader;

/// One-shot record/replay byte arena backing a preload window.
///
/// Blocks captured during a preload pass are appended at the tail; replay
/// drains them through a separate read cursor. The buffer is not a ring:
/// `reset` is the only way to reuse the storage.
#[derive(Default)]
pub struct PreloadBuffer {
    bytes: Vec<u8>,
    read_offset: usize,
}

impl PreloadBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes appended so far.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn capacity(&self) -> usize {
        self.bytes.capacity()
    }

    /// Requests capacity for `additional` more bytes. Allocation failure is
    /// surfaced as `false` so callers can degrade their request.
    pub fn reserve(&mut self, additional: usize) -> bool {
        self.bytes.try_reserve(additional).is_ok()
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    pub fn append_header(&mut self, header: &BlockHeader) {
        self.bytes.extend_from_slice(&header.to_bytes());
    }

    /// Copies up to `destination.len()` bytes from the read cursor, advancing
    /// it. Returns the actual count, which is short at end of buffer.
    pub fn read(&mut self, destination: &mut [u8]) -> usize {
        let remaining = self.bytes.len() - self.read_offset;
        let count = destination.len().min(remaining);
        destination[..count]
            .copy_from_slice(&self.bytes[self.read_offset..self.read_offset + count]);
        self.read_offset += count;
        count
    }

    /// True once the read cursor has consumed everything appended.
    pub fn replay_finished(&self) -> bool {
        self.read_offset >= self.bytes.len()
    }

    /// Clears storage and cursor, releasing the backing allocation.
    pub fn reset(&mut self) {
        self.bytes = Vec::new();
        self.read_offset = 0;
    }
}
