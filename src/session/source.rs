//! Payload sources for synthetic writes

use crate::config::pattern::PATTERN_LEN;

/// Supplies the bytes sent by `submit_write`
pub trait PayloadSource {
    /// Fill `out` with the next bytes of the stream
    fn fill(&mut self, out: &mut [u8]);

    /// Restart the stream for a new write
    fn reset(&mut self) {}
}

/// Repeating `0x00..=0xFF` filler
///
/// The sequence continues across calls, so the bytes received by the peer
/// read as an unbroken counter regardless of how the write was chunked.
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternSource {
    next: usize,
}

impl PatternSource {
    pub const fn new() -> Self {
        Self { next: 0 }
    }
}

impl PayloadSource for PatternSource {
    fn fill(&mut self, out: &mut [u8]) {
        for slot in out.iter_mut() {
            *slot = self.next as u8;
            self.next = (self.next + 1) % PATTERN_LEN;
        }
    }

    fn reset(&mut self) {
        self.next = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_continues_across_fills() {
        let mut source = PatternSource::new();
        let mut first = [0u8; 3];
        let mut second = [0u8; 3];

        source.fill(&mut first);
        source.fill(&mut second);

        assert_eq!(first, [0, 1, 2]);
        assert_eq!(second, [3, 4, 5]);
    }

    #[test]
    fn test_pattern_wraps_after_full_cycle() {
        let mut source = PatternSource::new();
        let mut block = [0u8; PATTERN_LEN + 2];
        source.fill(&mut block);

        assert_eq!(block[255], 0xFF);
        assert_eq!(&block[PATTERN_LEN..], &[0, 1]);
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let mut source = PatternSource::new();
        let mut scratch = [0u8; 7];
        source.fill(&mut scratch);
        source.reset();

        source.fill(&mut scratch[..1]);
        assert_eq!(scratch[0], 0);
    }
}
