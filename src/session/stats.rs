//! Throughput counters and stream checksums
//!
//! Both directions keep a running CRC-32 of every byte that crossed the
//! link, so the two ends of a loopback run can compare stream integrity
//! without storing the data.

use crate::config::progress::REPORT_INTERVAL_BYTES;
use crc::{Crc, Digest, CRC_32_ISO_HDLC};

static STREAM_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Point-in-time copy of the session counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub bytes_looped_back: u64,
    pub transmit_dropped: u64,
    pub receive_dropped: u64,
    /// CRC-32 of everything accepted by the transport
    pub tx_checksum: u32,
    /// CRC-32 of everything that arrived from the peer
    pub rx_checksum: u32,
}

pub struct StreamStats {
    bytes_sent: u64,
    bytes_received: u64,
    bytes_looped_back: u64,
    transmit_dropped: u64,
    receive_dropped: u64,
    tx_digest: Digest<'static, u32>,
    rx_digest: Digest<'static, u32>,
}

impl StreamStats {
    pub fn new() -> Self {
        Self {
            bytes_sent: 0,
            bytes_received: 0,
            bytes_looped_back: 0,
            transmit_dropped: 0,
            receive_dropped: 0,
            tx_digest: STREAM_CRC.digest(),
            rx_digest: STREAM_CRC.digest(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Count bytes accepted by the transport.
    ///
    /// Returns true when the running total crossed a progress boundary.
    pub fn record_sent(&mut self, data: &[u8]) -> bool {
        self.tx_digest.update(data);
        advance(&mut self.bytes_sent, data.len())
    }

    /// Count bytes delivered by the peer.
    ///
    /// Returns true when the running total crossed a progress boundary.
    pub fn record_received(&mut self, data: &[u8]) -> bool {
        self.rx_digest.update(data);
        advance(&mut self.bytes_received, data.len())
    }

    pub fn record_looped_back(&mut self, count: usize) {
        self.bytes_looped_back += count as u64;
    }

    pub fn record_transmit_dropped(&mut self, count: usize) {
        self.transmit_dropped += count as u64;
    }

    pub fn record_receive_dropped(&mut self, count: usize) {
        self.receive_dropped += count as u64;
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            bytes_sent: self.bytes_sent,
            bytes_received: self.bytes_received,
            bytes_looped_back: self.bytes_looped_back,
            transmit_dropped: self.transmit_dropped,
            receive_dropped: self.receive_dropped,
            tx_checksum: self.tx_digest.clone().finalize(),
            rx_checksum: self.rx_digest.clone().finalize(),
        }
    }
}

impl Default for StreamStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Checksum of a complete byte stream, for comparing against a snapshot
pub fn stream_checksum(data: &[u8]) -> u32 {
    STREAM_CRC.checksum(data)
}

fn advance(total: &mut u64, count: usize) -> bool {
    let before = *total / REPORT_INTERVAL_BYTES;
    *total += count as u64;
    *total / REPORT_INTERVAL_BYTES > before
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_matches_one_shot() {
        let mut stats = StreamStats::new();
        stats.record_sent(b"1234");
        stats.record_sent(b"56789");

        // Standard CRC-32 check value
        assert_eq!(stats.snapshot().tx_checksum, 0xCBF4_3926);
        assert_eq!(stream_checksum(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_progress_boundary() {
        let mut stats = StreamStats::new();
        let block = [0u8; 250];

        let crossings = (0..8_000).filter(|_| stats.record_received(&block)).count();

        assert_eq!(stats.bytes_received(), 2_000_000);
        assert_eq!(crossings, 2);
    }

    #[test]
    fn test_reset_clears_counters() {
        let mut stats = StreamStats::new();
        stats.record_sent(&[1, 2, 3]);
        stats.record_transmit_dropped(4);

        stats.reset();
        assert_eq!(stats.snapshot(), StreamStats::new().snapshot());
    }
}
