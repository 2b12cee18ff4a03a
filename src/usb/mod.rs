//! USB OTG module for dual CDC-ACM serial ports.
//!
//! - CDC0: serial data bridged to the BLE data session
//! - CDC1: log output

pub mod cdc_io;

pub use cdc_io::{CdcReader, CdcWriter};
