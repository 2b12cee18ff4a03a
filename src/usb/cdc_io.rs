//! embedded_io_async adapters for the CDC-ACM packet API.
//!
//! CDC endpoints move whole packets of at most `max_packet_size` bytes.
//! The reader stages each packet so callers may read with any buffer size;
//! the writer splits writes into packets and terminates a transfer that
//! ends on a full packet with a zero-length packet on flush.

use embassy_usb::class::cdc_acm::{Receiver, Sender};
use embassy_usb::driver::Driver;
use embedded_io_async::{ErrorType, Read, Write};

/// Largest full-speed bulk packet
const MAX_PACKET_LEN: usize = 64;

/// Error type for CDC I/O operations.
#[derive(Debug, Clone, Copy)]
pub struct CdcError;

impl embedded_io::Error for CdcError {
    fn kind(&self) -> embedded_io::ErrorKind {
        embedded_io::ErrorKind::BrokenPipe
    }
}

/// CDC receiver implementing `embedded_io_async::Read`.
pub struct CdcReader<'d, D: Driver<'d>> {
    inner: Receiver<'d, D>,
    staged: [u8; MAX_PACKET_LEN],
    start: usize,
    end: usize,
}

impl<'d, D: Driver<'d>> CdcReader<'d, D> {
    pub fn new(inner: Receiver<'d, D>) -> Self {
        Self {
            inner,
            staged: [0; MAX_PACKET_LEN],
            start: 0,
            end: 0,
        }
    }
}

impl<'d, D: Driver<'d>> ErrorType for CdcReader<'d, D> {
    type Error = CdcError;
}

impl<'d, D: Driver<'d>> Read for CdcReader<'d, D> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.start == self.end {
            // Host must assert DTR before anything arrives
            self.inner.wait_connection().await;
            let len = usize::from(self.inner.max_packet_size()).min(MAX_PACKET_LEN);
            self.end = self
                .inner
                .read_packet(&mut self.staged[..len])
                .await
                .map_err(|_| CdcError)?;
            self.start = 0;
        }

        let n = buf.len().min(self.end - self.start);
        buf[..n].copy_from_slice(&self.staged[self.start..self.start + n]);
        self.start += n;
        Ok(n)
    }
}

/// CDC sender implementing `embedded_io_async::Write`.
pub struct CdcWriter<'d, D: Driver<'d>> {
    inner: Sender<'d, D>,
    needs_zlp: bool,
}

impl<'d, D: Driver<'d>> CdcWriter<'d, D> {
    pub fn new(inner: Sender<'d, D>) -> Self {
        Self {
            inner,
            needs_zlp: false,
        }
    }
}

impl<'d, D: Driver<'d>> ErrorType for CdcWriter<'d, D> {
    type Error = CdcError;
}

impl<'d, D: Driver<'d>> Write for CdcWriter<'d, D> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.inner.wait_connection().await;

        let packet_len = usize::from(self.inner.max_packet_size());
        let n = buf.len().min(packet_len);
        self.inner.write_packet(&buf[..n]).await.map_err(|_| CdcError)?;
        self.needs_zlp = n == packet_len;
        Ok(n)
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        if self.needs_zlp {
            self.inner.write_packet(&[]).await.map_err(|_| CdcError)?;
            self.needs_zlp = false;
        }
        Ok(())
    }
}
