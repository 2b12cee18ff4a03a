//! Serial bridge between a byte port and the data session.
//!
//! Bytes read from the port are queued for transmission to the peer;
//! bytes received from the peer are drained back out to the port. Generic
//! over `embedded_io_async`, so it works with USB CDC-ACM or a UART.

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer};
use embedded_io_async::{Read, Write};

use crate::ble::LinkSession;

/// Port read and write chunk size
const CHUNK_LEN: usize = 64;

/// Wait before retrying when the transmit buffer is full
const TX_RETRY_MS: u64 = 5;

/// Raised by the BLE task when received bytes were buffered
pub static RX_READY: Signal<CriticalSectionRawMutex, ()> = Signal::new();

pub async fn bridge_task<R: Read, W: Write>(mut reader: R, mut writer: W, session: &'static LinkSession) {
    let mut buf = [0u8; CHUNK_LEN];

    loop {
        match select(reader.read(&mut buf), RX_READY.wait()).await {
            Either::First(Ok(0)) => {}
            Either::First(Ok(n)) => forward(session, &mut writer, &buf[..n]).await,
            Either::First(Err(_)) => Timer::after(Duration::from_millis(10)).await,
            Either::Second(()) => drain(session, &mut writer).await,
        }
    }
}

/// Queue port bytes, waiting for room rather than overflowing.
///
/// Received data keeps draining while waiting, so receive grants still
/// reach the peer whose transmit credits we are waiting on.
async fn forward<W: Write>(session: &LinkSession, writer: &mut W, mut data: &[u8]) {
    while !data.is_empty() {
        let room = session.tx_free();
        if room == 0 {
            let retry = Timer::after(Duration::from_millis(TX_RETRY_MS));
            if let Either::Second(()) = select(retry, RX_READY.wait()).await {
                drain(session, writer).await;
            }
            continue;
        }
        match session.write_data(&data[..data.len().min(room)]) {
            Ok(taken) => data = &data[taken..],
            // No link; the bytes have nowhere to go
            Err(_) => return,
        }
    }
}

async fn drain<W: Write>(session: &LinkSession, writer: &mut W) {
    let mut buf = [0u8; CHUNK_LEN];
    loop {
        let n = session.read_into(&mut buf);
        if n == 0 {
            let _ = writer.flush().await;
            return;
        }
        if writer.write_all(&buf[..n]).await.is_err() {
            return;
        }
    }
}
