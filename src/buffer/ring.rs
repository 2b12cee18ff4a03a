//! Fixed-capacity circular byte buffer
//!
//! Bytes are appended at the write cursor and drained from the read cursor,
//! both wrapping to zero at the end of the backing array. An empty and a
//! full buffer both have coincident cursors; the two states are told apart
//! by the free count alone.
//!
//! The buffer is best effort: a write that does not fit is truncated and a
//! read of more than is available is shortened. Callers treat a short
//! return value as backpressure, never as a fault.

/// Circular byte buffer backed by an inline array of `N` bytes.
pub struct RingBuffer<const N: usize> {
    storage: [u8; N],
    free: usize,
    read_pos: usize,
    write_pos: usize,
}

impl<const N: usize> RingBuffer<N> {
    /// Create an empty buffer
    pub const fn new() -> Self {
        Self {
            storage: [0; N],
            free: N,
            read_pos: 0,
            write_pos: 0,
        }
    }

    /// Total number of bytes the buffer can hold
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of bytes that can still be written
    pub fn free(&self) -> usize {
        self.free
    }

    /// Number of bytes waiting to be read
    pub fn len(&self) -> usize {
        N - self.free
    }

    pub fn is_empty(&self) -> bool {
        self.free == N
    }

    pub fn is_full(&self) -> bool {
        self.free == 0
    }

    /// Append as much of `data` as fits.
    ///
    /// Returns the number of bytes copied, which is less than `data.len()`
    /// when the buffer fills up.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let mut written = 0;

        while written < data.len() && self.free > 0 {
            let contiguous = N - self.write_pos;
            let chunk = self.free.min(contiguous).min(data.len() - written);

            self.storage[self.write_pos..self.write_pos + chunk]
                .copy_from_slice(&data[written..written + chunk]);

            self.write_pos += chunk;
            if self.write_pos == N {
                self.write_pos = 0;
            }
            self.free -= chunk;
            written += chunk;
        }

        written
    }

    /// Drain up to `max_len` bytes.
    ///
    /// With a sink the bytes are copied into it (and the amount is further
    /// capped by the sink length); without one they are discarded.
    /// Returns the number of bytes removed from the buffer.
    pub fn read(&mut self, max_len: usize, mut sink: Option<&mut [u8]>) -> usize {
        let mut wanted = max_len.min(self.len());
        if let Some(out) = sink.as_deref() {
            wanted = wanted.min(out.len());
        }

        let mut read = 0;
        while read < wanted {
            let contiguous = N - self.read_pos;
            let chunk = contiguous.min(wanted - read);

            if let Some(out) = sink.as_deref_mut() {
                out[read..read + chunk]
                    .copy_from_slice(&self.storage[self.read_pos..self.read_pos + chunk]);
            }

            self.read_pos += chunk;
            if self.read_pos == N {
                self.read_pos = 0;
            }
            self.free += chunk;
            read += chunk;
        }

        read
    }

    /// Discard up to `count` bytes from the front of the buffer
    pub fn skip(&mut self, count: usize) -> usize {
        self.read(count, None)
    }

    /// Copy up to `out.len()` bytes from the front without consuming them
    pub fn peek(&self, out: &mut [u8]) -> usize {
        let wanted = out.len().min(self.len());
        let mut pos = self.read_pos;
        let mut copied = 0;

        while copied < wanted {
            let chunk = (N - pos).min(wanted - copied);
            out[copied..copied + chunk].copy_from_slice(&self.storage[pos..pos + chunk]);
            pos += chunk;
            if pos == N {
                pos = 0;
            }
            copied += chunk;
        }

        copied
    }

    /// Restore the empty state
    pub fn reset(&mut self) {
        self.free = N;
        self.read_pos = 0;
        self.write_pos = 0;
    }
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}
