//! Link configuration constants for the SPPLE data path

/// GATT layout of the Serial Port Profile over LE service
///
/// The server notifies stream data on TX and the credits it grants on
/// TX credits. The client writes stream data to RX and its own grants
/// to RX credits.
pub mod gatt {
    pub const SERVICE_UUID: &str = "14839ac4-7d7e-415c-9a42-167340cf2339";
    pub const TX_UUID: &str = "8b00ace7-eb0b-49b0-bbe9-9aee0a26e1a3";
    pub const TX_CREDITS_UUID: &str = "ba04c4b2-892b-43be-b69c-5d13f2195392";
    pub const RX_UUID: &str = "0734594a-a8e7-4b1a-a6b1-cd5243059a57";
    pub const RX_CREDITS_UUID: &str = "e06d5efb-4f4a-45c0-9eb1-371ae5a14ad4";
}

/// Ring buffer sizing
pub mod buffers {
    pub const DEFAULT_TX_CAPACITY: usize = 2048;
    pub const DEFAULT_RX_CAPACITY: usize = 2048;
}

/// Attribute transport limits
pub mod transport {
    /// Opcode + handle overhead of a notification or write
    pub const ATT_HEADER_LEN: usize = 3;

    /// ATT MTU before any exchange has taken place
    pub const DEFAULT_ATT_MTU: usize = 23;

    /// Largest payload a single attribute write may carry
    pub const MAX_ATT_PAYLOAD: usize = 244;
}

/// Credit grant tuning
pub mod credits {
    /// Grants below this many bytes are held back while the receive
    /// buffer still has data in it
    pub const DEFAULT_GRANT_THRESHOLD: usize = 64;
}

/// Throughput progress reporting
pub mod progress {
    pub const REPORT_INTERVAL_BYTES: u64 = 1_000_000;
}

/// Raw data display
pub mod display {
    pub const BYTES_PER_ROW: u8 = 16;
}

/// Filler payload
pub mod pattern {
    /// Length of the repeating 0x00..=0xFF filler sequence
    pub const PATTERN_LEN: usize = 256;
}
