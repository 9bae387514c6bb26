//! Fixed-capacity stream buffer backing a connection's non-blocking I/O.

use bytes::{Buf, BytesMut};

/// A bounded byte queue between a protocol action and the transport.
///
/// Capacity is fixed at construction (`io_buffer_size`); a full or empty
/// buffer is the would-block condition the caller re-arms on.
#[derive(Debug)]
pub struct StreamBuf {
    buf: BytesMut,
    capacity: usize,
}

impl StreamBuf {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { buf: BytesMut::with_capacity(capacity), capacity }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn remaining_capacity(&self) -> usize {
        self.capacity - self.buf.len()
    }

    /// Borrow the buffered bytes without consuming them.
    pub fn peek(&self) -> &[u8] {
        &self.buf
    }

    /// Drop `n` buffered bytes from the front.
    pub fn consume(&mut self, n: usize) {
        self.buf.advance(n);
    }

    /// Move up to `dst.len()` bytes out of the buffer. Returns the count.
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.buf.len());
        dst[..n].copy_from_slice(&self.buf[..n]);
        self.buf.advance(n);
        n
    }

    /// Append up to `remaining_capacity()` bytes. Returns the count taken.
    pub fn write(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.remaining_capacity());
        self.buf.extend_from_slice(&src[..n]);
        n
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
