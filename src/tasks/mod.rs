//! Embassy tasks module
//!
//! Contains all async tasks for the firmware, organised by functionality.

pub mod ble;
pub mod bridge;
pub mod led;

pub use ble::{ble_task, OutboundReceiver};
pub use bridge::{bridge_task, RX_READY};
pub use led::{led_task, LedEvent, LedReceiver, LedSender, LED_CHANNEL};
