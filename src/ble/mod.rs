//! Bluetooth Low Energy module
//!
//! Hosts the data session on a Serial Port Profile over LE GATT service.

pub mod service;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

use crate::config::buffers::{DEFAULT_RX_CAPACITY, DEFAULT_TX_CAPACITY};
use crate::debug::DebugWriter;
use crate::session::{DataSession, HexDisplay, PatternSource};
use crate::transport::{ChannelTransport, OUTBOUND_DEPTH};

pub use service::SppleService;

/// Transport feeding the BLE task's notification queue
pub type LinkTransport = ChannelTransport<'static, CriticalSectionRawMutex, OUTBOUND_DEPTH>;

/// The firmware's single data session
pub type LinkSession = DataSession<
    CriticalSectionRawMutex,
    LinkTransport,
    HexDisplay<DebugWriter>,
    PatternSource,
    DEFAULT_TX_CAPACITY,
    DEFAULT_RX_CAPACITY,
>;
