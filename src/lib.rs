#![cfg_attr(not(test), no_std)]

pub mod buffer;
pub mod config;
pub mod flow;
pub mod session;
pub mod transport;

// These modules depend on embassy/async features only available with embedded feature
#[cfg(feature = "embedded")]
pub mod ble;
#[cfg(feature = "embedded")]
pub mod debug;
#[cfg(feature = "embedded")]
pub mod tasks;
#[cfg(feature = "embedded")]
pub mod usb;
