//! Log backend over the USB CDC debug port.
//!
//! Installs a `log::Log` implementation that formats records into a shared
//! buffer and wakes the debug writer task. Output is non-blocking: when the
//! buffer is full or the port is not connected, text is dropped.

use core::cell::RefCell;
use core::fmt::Write;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use embedded_io_async::Write as _;
use esp_hal::otg_fs::asynch::Driver;
use heapless::String;
use log::{LevelFilter, Log, Metadata, Record};

use crate::usb::CdcWriter;

/// Capacity of the pending output buffer
const MAX_DEBUG_BUFFER_LEN: usize = 1024;

/// Signal to indicate debug output is available
pub static DEBUG_SIGNAL: Signal<CriticalSectionRawMutex, ()> = Signal::new();

/// Pending output (protected by critical section mutex)
static DEBUG_BUFFER: Mutex<CriticalSectionRawMutex, RefCell<Option<String<MAX_DEBUG_BUFFER_LEN>>>> =
    Mutex::new(RefCell::new(None));

static LOGGER: DebugLogger = DebugLogger;

/// Initialise the debug buffer and install the logger.
///
/// Must be called once during startup, before any task logs.
pub fn init(level: LevelFilter) {
    DEBUG_BUFFER.lock(|cell| {
        cell.replace(Some(String::new()));
    });
    // Only fails if a logger is already installed
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

/// Append text to the pending output.
///
/// Returns false if debug output is not initialised.
pub fn write_debug(text: &str) -> bool {
    DEBUG_BUFFER.lock(|cell| {
        let mut borrowed = cell.borrow_mut();
        match borrowed.as_mut() {
            Some(buffer) => {
                // Whole fragments only; a partial line is worse than none
                if buffer.push_str(text).is_ok() {
                    DEBUG_SIGNAL.signal(());
                }
                true
            }
            None => false,
        }
    })
}

/// Take everything written so far
fn take_pending() -> Option<String<MAX_DEBUG_BUFFER_LEN>> {
    DEBUG_BUFFER.lock(|cell| {
        let mut borrowed = cell.borrow_mut();
        let buffer = borrowed.as_mut()?;
        if buffer.is_empty() {
            return None;
        }
        let text = buffer.clone();
        buffer.clear();
        Some(text)
    })
}

/// `core::fmt::Write` adapter onto the debug buffer
#[derive(Debug, Default, Clone, Copy)]
pub struct DebugWriter;

impl Write for DebugWriter {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        write_debug(s);
        Ok(())
    }
}

struct DebugLogger;

impl Log for DebugLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut line: String<256> = String::new();
        let _ = write!(line, "[{}] {}\r\n", record.level(), record.args());
        write_debug(&line);
    }

    fn flush(&self) {}
}

/// Debug writer task that sends buffered output to the CDC port.
pub async fn debug_writer_task(mut writer: CdcWriter<'static, Driver<'static>>) {
    loop {
        DEBUG_SIGNAL.wait().await;

        if let Some(text) = take_pending() {
            // Port might not be connected
            if writer.write_all(text.as_bytes()).await.is_ok() {
                let _ = writer.flush().await;
            }
        }
    }
}
