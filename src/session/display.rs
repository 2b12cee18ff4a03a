//! Raw display sink for received bytes

use crate::config::display::BYTES_PER_ROW;
use core::fmt::Write;

/// Destination for bytes shown in raw display mode
pub trait DisplaySink {
    fn display(&mut self, data: &[u8]);
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDisplay;

impl DisplaySink for NullDisplay {
    fn display(&mut self, _data: &[u8]) {}
}

/// Hex dump over any `core::fmt::Write`
///
/// Each byte is printed as `0xNN `, sixteen to a row. The row position is
/// kept between calls so consecutive arrivals continue the same row.
pub struct HexDisplay<W: Write> {
    writer: W,
    column: u8,
}

impl<W: Write> HexDisplay<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, column: 0 }
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> DisplaySink for HexDisplay<W> {
    fn display(&mut self, data: &[u8]) {
        for byte in data {
            // Formatter errors only mean the sink is full
            let _ = write!(self.writer, "0x{:02X} ", byte);
            self.column += 1;
            if self.column == BYTES_PER_ROW {
                let _ = self.writer.write_str("\r\n");
                self.column = 0;
            }
        }
    }
}
