//! Fixed-capacity staging buffer between network reads and disk writes.

use bytes::{Bytes, BytesMut};

/// Accumulates incoming bytes into chunks of a fixed capacity.
///
/// A full buffer is only released by [`ChunkBuffer::push`] when more input is
/// waiting behind it. The bytes staged when the stream ends are therefore
/// always collected with [`ChunkBuffer::take`], so the caller can hand them to
/// a finalizing step instead of a mid-stream one.
#[derive(Debug)]
pub struct ChunkBuffer {
    buf: BytesMut,
    capacity: usize,
}

impl ChunkBuffer {
    /// Chunk size for a file of `file_size` bytes given `available_memory`.
    pub fn size_for(file_size: Option<u64>, available_memory: Option<u64>) -> usize {
        crate::pacer::tiered_chunk_size(file_size, available_memory)
    }

    /// Create an empty buffer holding at most `capacity` bytes (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    /// Stage bytes from `input`, advancing it past what was consumed.
    ///
    /// Returns a full chunk when one is ready and `input` still has bytes.
    /// Callers loop until `input` is empty.
    pub fn push(&mut self, input: &mut Bytes) -> Option<Bytes> {
        if input.is_empty() {
            return None;
        }
        if self.is_full() {
            return Some(self.take());
        }
        // Pass whole chunks through without copying when nothing is staged.
        if self.buf.is_empty() && input.len() > self.capacity {
            return Some(input.split_to(self.capacity));
        }
        let room = self.capacity - self.buf.len();
        let n = room.min(input.len());
        self.buf.extend_from_slice(&input.split_to(n));
        None
    }

    /// Remove and return everything staged.
    pub fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.buf.len() >= self.capacity
    }
}
