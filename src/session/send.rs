//! Send engine
//!
//! Slices queued and freshly generated data into MTU-sized, credit-gated
//! transport writes. Queued bytes always leave before fresh ones; bytes the
//! transport does not accept go back into the transmit buffer.

use log::{debug, info, warn};

use crate::config::transport::MAX_ATT_PAYLOAD;
use crate::transport::TransportPort;

use super::display::DisplaySink;
use super::source::PayloadSource;
use super::state::{Activity, SessionState, Suspension, WriteOutcome};

impl<T, D, P, const TX: usize, const RX: usize> SessionState<T, D, P, TX, RX>
where
    T: TransportPort,
    D: DisplaySink,
    P: PayloadSource,
{
    /// Drain the transmit side until idle or suspended
    pub(crate) fn run_send_cycle(&mut self, activity: &mut Activity) {
        let link = match self.link {
            Some(link) if self.is_active() => link,
            _ => return,
        };
        activity.suspended = None;

        loop {
            let fresh = self.pending.map_or(0, |pending| pending.remaining());
            if self.tx.is_empty() && fresh == 0 {
                return;
            }

            let chunk_cap = self.ledger.can_send(link.mtu).min(link.mtu);
            if chunk_cap == 0 {
                activity.suspended = Some(if link.mtu == 0 {
                    Suspension::Transport
                } else {
                    Suspension::Credits
                });
                debug!("send suspended, {} bytes queued", self.tx.len());
                return;
            }

            let mut chunk = [0u8; MAX_ATT_PAYLOAD];
            let from_queue = !self.tx.is_empty();
            let len = if from_queue {
                self.tx.peek(&mut chunk[..chunk_cap])
            } else {
                let len = chunk_cap.min(fresh);
                self.source.fill(&mut chunk[..len]);
                if let Some(pending) = self.pending.as_mut() {
                    pending.generated += len;
                }
                len
            };
            let chunk = &chunk[..len];

            let accepted = match self.transport.write_bytes(link.data_handle, chunk) {
                Ok(accepted) => accepted.min(len),
                Err(error) => {
                    warn!("data write of {} bytes failed: {}", len, error);
                    if error.is_disconnect() {
                        // Teardown completes the pending write as cancelled
                        activity.link_lost = true;
                    } else {
                        self.abort_write(error, activity);
                    }
                    return;
                }
            };

            self.ledger.debit(accepted);
            activity.sent += accepted;
            debug!("sent chunk of {}/{} bytes", accepted, len);

            if from_queue {
                self.tx.skip(accepted);
                if let Some(pending) = self.pending.as_mut() {
                    let own = accepted.min(pending.queued);
                    pending.queued -= own;
                    pending.sent += own;
                }
            } else {
                self.requeue(&chunk[accepted..], activity);
                if let Some(pending) = self.pending.as_mut() {
                    pending.sent += accepted;
                }
            }

            self.note_sent(&chunk[..accepted]);
            self.finish_write(activity);

            if accepted < len {
                activity.suspended = Some(Suspension::Transport);
                return;
            }
        }
    }

    /// Queue caller bytes behind anything already waiting and push as much
    /// as possible out. Returns the number of bytes taken.
    pub(crate) fn enqueue(&mut self, mut data: &[u8], activity: &mut Activity) -> usize {
        let mut taken = 0;

        while !data.is_empty() && !activity.link_lost {
            let stored = self.tx.write(data);
            data = &data[stored..];
            taken += stored;

            let queued = self.tx.len();
            self.run_send_cycle(activity);
            if stored == 0 && self.tx.len() == queued {
                break;
            }
        }

        taken
    }

    /// Put back bytes of a fresh chunk the transport did not take
    fn requeue(&mut self, leftover: &[u8], activity: &mut Activity) {
        if leftover.is_empty() {
            return;
        }
        let stored = self.tx.write(leftover);
        let dropped = leftover.len() - stored;

        if let Some(pending) = self.pending.as_mut() {
            pending.queued += stored;
            pending.dropped += dropped;
        }
        if dropped > 0 {
            warn!("transmit overflow: dropped {} bytes", dropped);
            activity.transmit_dropped += dropped;
            self.stats.record_transmit_dropped(dropped);
        }
    }

    fn note_sent(&mut self, data: &[u8]) {
        if !self.stats.record_sent(data) {
            return;
        }
        match self.pending {
            Some(pending) => info!("sent {} of {} bytes", pending.sent, pending.requested),
            None => info!("sent {} bytes", self.stats.bytes_sent()),
        }
    }

    /// Report the pending write once every byte has left or been dropped
    fn finish_write(&mut self, activity: &mut Activity) {
        let pending = match self.pending {
            Some(pending) if pending.is_finished() => pending,
            _ => return,
        };
        self.pending = None;

        let outcome = if pending.dropped > 0 {
            WriteOutcome::Truncated {
                sent: pending.sent,
                dropped: pending.dropped,
            }
        } else {
            WriteOutcome::Complete { sent: pending.sent }
        };
        info!("write finished: {} of {} bytes sent", pending.sent, pending.requested);
        activity.completed = Some(outcome);
    }
}
