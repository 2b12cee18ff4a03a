//! Receive engine
//!
//! Routes arriving bytes into the receive buffer, back out through the send
//! engine in loopback mode, and to the display sink in raw display mode.
//! Receive credits are granted back to the peer as bytes leave the buffer.

use log::{debug, info, warn};

use crate::config::transport::MAX_ATT_PAYLOAD;
use crate::flow::encode_credits;
use crate::transport::TransportPort;

use super::display::DisplaySink;
use super::source::PayloadSource;
use super::state::{Activity, SessionState};

impl<T, D, P, const TX: usize, const RX: usize> SessionState<T, D, P, TX, RX>
where
    T: TransportPort,
    D: DisplaySink,
    P: PayloadSource,
{
    /// Handle a data notification. An empty span only re-polls the buffers.
    pub(crate) fn on_bytes_arrived(&mut self, data: &[u8], activity: &mut Activity) {
        if !self.is_active() {
            if !data.is_empty() {
                warn!("dropping {} bytes received without an active link", data.len());
            }
            return;
        }

        if !data.is_empty() {
            if self.modes.raw_display {
                self.display.display(data);
            }
            if self.stats.record_received(data) {
                if self.modes.loopback {
                    info!("received and looped back {} bytes", self.stats.bytes_received());
                } else {
                    info!("received {} bytes", self.stats.bytes_received());
                }
            }
        }

        if self.modes.loopback {
            self.loop_back(data, activity);
        } else {
            self.store(data, activity);
            if self.modes.auto_read {
                let drained = self.rx.skip(RX);
                if drained > 0 {
                    activity.consumed += drained;
                    self.ledger.grant(drained);
                }
            }
        }

        self.flush_grants(self.rx.is_empty(), activity);
    }

    /// Drain received bytes for the application
    pub(crate) fn read_into(&mut self, out: &mut [u8], activity: &mut Activity) -> usize {
        if !self.is_active() {
            return 0;
        }
        let read = self.rx.read(out.len(), Some(out));
        if read > 0 {
            self.ledger.grant(read);
            self.flush_grants(self.rx.is_empty(), activity);
        }
        read
    }

    /// Write owed receive credits to the peer.
    ///
    /// A failed grant keeps the owed amount for the next attempt.
    pub(crate) fn flush_grants(&mut self, force: bool, activity: &mut Activity) {
        let handle = match self.link.and_then(|link| link.credit_handles) {
            Some(handles) => handles.grant,
            None => return,
        };

        while let Some(amount) = self.ledger.next_grant(self.grant_threshold, force) {
            match self.transport.write_bytes(handle, &encode_credits(amount)) {
                Ok(_) => {
                    self.ledger.confirm_grant(amount);
                    activity.granted += amount as usize;
                    debug!("granted {} credits", amount);
                }
                Err(error) => {
                    warn!("credit grant of {} failed: {}", amount, error);
                    if error.is_disconnect() {
                        activity.link_lost = true;
                    }
                    return;
                }
            }
        }
    }

    fn store(&mut self, data: &[u8], activity: &mut Activity) {
        if data.is_empty() {
            return;
        }
        let stored = self.rx.write(data);
        activity.buffered += stored;

        let dropped = data.len() - stored;
        if dropped > 0 {
            warn!("receive overflow: dropped {} bytes", dropped);
            activity.receive_dropped += dropped;
            self.stats.record_receive_dropped(dropped);
        }
    }

    fn loop_back(&mut self, data: &[u8], activity: &mut Activity) {
        // Earlier arrivals parked in the receive buffer go first
        let mut scratch = [0u8; MAX_ATT_PAYLOAD];
        while !self.rx.is_empty() && !activity.link_lost {
            let parked = self.rx.peek(&mut scratch);
            let taken = self.enqueue(&scratch[..parked], activity);
            if !self.is_active() || taken == 0 {
                break;
            }
            self.rx.skip(taken);
            self.consume_looped(taken, activity);
            if taken < parked {
                break;
            }
        }

        let mut rest = data;
        if self.rx.is_empty() && !rest.is_empty() && !activity.link_lost {
            let taken = self.enqueue(rest, activity);
            self.consume_looped(taken, activity);
            rest = &rest[taken..];
        }

        if self.is_active() {
            self.store(rest, activity);
        }
    }

    fn consume_looped(&mut self, count: usize, activity: &mut Activity) {
        activity.looped_back += count;
        self.stats.record_looped_back(count);
        self.ledger.grant(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::display::HexDisplay;
    use crate::session::source::PatternSource;
    use crate::session::state::{SessionConfig, SessionModes, Suspension};
    use crate::transport::traits::mock::MockTransport;
    use crate::transport::TransportError;
    use heapless::String;

    type TestState<const TX: usize, const RX: usize> =
        SessionState<MockTransport, HexDisplay<String<512>>, PatternSource, TX, RX>;

    fn active<const TX: usize, const RX: usize>(
        transport: MockTransport,
        modes: SessionModes,
    ) -> TestState<TX, RX> {
        let config = SessionConfig {
            modes,
            ..SessionConfig::default()
        };
        let display = HexDisplay::new(String::new());
        let mut state = TestState::<TX, RX>::new(transport, display, PatternSource::new(), config);
        let mut activity = Activity::default();
        state.begin_configuration(1).unwrap();
        state.activate(&mut activity).unwrap();
        state.transport.clear_history();
        state
    }

    fn ramp<const N: usize>() -> [u8; N] {
        let mut data = [0u8; N];
        for (i, byte) in data.iter_mut().enumerate() {
            *byte = i as u8;
        }
        data
    }

    #[test]
    fn test_overflow_keeps_prefix() {
        let mut state = active::<64, 100>(MockTransport::new(20), SessionModes::default());
        let mut activity = Activity::default();
        let data = ramp::<150>();

        state.on_bytes_arrived(&data, &mut activity);
        assert_eq!(activity.buffered, 100);
        assert_eq!(activity.receive_dropped, 50);

        let mut out = [0u8; 200];
        let read = state.read_into(&mut out, &mut Activity::default());
        assert_eq!(read, 100);
        assert_eq!(&out[..100], &data[..100]);
    }

    #[test]
    fn test_raw_display_sees_arrivals() {
        let modes = SessionModes {
            raw_display: true,
            ..SessionModes::default()
        };
        let mut state = active::<64, 64>(MockTransport::new(20), modes);

        state.on_bytes_arrived(&[0xDE, 0xAD], &mut Activity::default());
        assert_eq!(state.display.writer().as_str(), "0xDE 0xAD ");
        assert_eq!(state.rx.len(), 2);
    }

    #[test]
    fn test_auto_read_never_rests_and_grants() {
        let modes = SessionModes {
            auto_read: true,
            ..SessionModes::default()
        };
        let mut state = active::<64, 64>(MockTransport::with_credits(20), modes);
        let mut activity = Activity::default();

        state.on_bytes_arrived(&[1; 30], &mut activity);

        assert!(state.rx.is_empty());
        assert_eq!(activity.consumed, 30);
        assert_eq!(activity.granted, 30);
        assert_eq!(state.transport.get_grants().as_slice(), &[30]);
    }

    #[test]
    fn test_auto_read_discards_after_display() {
        let modes = SessionModes {
            auto_read: true,
            raw_display: true,
            ..SessionModes::default()
        };
        let mut state = active::<64, 64>(MockTransport::new(20), modes);
        let mut activity = Activity::default();

        state.on_bytes_arrived(&[0x01, 0x02], &mut activity);
        assert_eq!(state.display.writer().as_str(), "0x01 0x02 ");
        assert_eq!(activity.consumed, 2);

        let mut out = [0u8; 8];
        assert_eq!(state.read_into(&mut out, &mut Activity::default()), 0);
        assert!(state.transport.get_data().is_empty());
    }

    #[test]
    fn test_manual_read_coalesces_small_grants() {
        let mut state = active::<64, 128>(MockTransport::with_credits(20), SessionModes::default());
        state.on_bytes_arrived(&[5; 100], &mut Activity::default());

        let mut out = [0u8; 10];
        state.read_into(&mut out, &mut Activity::default());
        assert!(state.transport.get_grants().is_empty());
        assert_eq!(state.ledger.owed(), 10);

        let mut out = [0u8; 90];
        state.read_into(&mut out, &mut Activity::default());
        assert_eq!(state.transport.get_grants().as_slice(), &[100]);
        assert_eq!(state.ledger.owed(), 0);
    }

    #[test]
    fn test_failed_grant_keeps_owed_amount() {
        let modes = SessionModes {
            auto_read: true,
            ..SessionModes::default()
        };
        let mut state = active::<64, 64>(MockTransport::with_credits(20), modes);
        state.transport.set_next_grant_error(TransportError::Busy);

        state.on_bytes_arrived(&[1; 10], &mut Activity::default());
        assert_eq!(state.ledger.owed(), 10);

        let mut activity = Activity::default();
        state.on_bytes_arrived(&[], &mut activity);
        assert_eq!(activity.granted, 10);
        assert_eq!(state.ledger.owed(), 0);
    }

    #[test]
    fn test_loopback_forwards_immediately() {
        let modes = SessionModes {
            loopback: true,
            ..SessionModes::default()
        };
        let mut state = active::<64, 64>(MockTransport::new(20), modes);
        let mut activity = Activity::default();
        let data = ramp::<30>();

        state.on_bytes_arrived(&data, &mut activity);

        assert_eq!(activity.looped_back, 30);
        assert_eq!(state.transport.get_data().as_slice(), &data[..]);
        assert_eq!(state.transport.get_chunk_sizes().as_slice(), &[20, 10]);
        assert!(state.rx.is_empty());
    }

    #[test]
    fn test_loopback_parks_what_cannot_be_queued() {
        let modes = SessionModes {
            loopback: true,
            ..SessionModes::default()
        };
        let mut state = active::<16, 64>(MockTransport::with_credits(20), modes);
        let mut activity = Activity::default();
        let data = ramp::<40>();

        // No transmit credits: 16 bytes fit the transmit buffer, the rest parks
        state.on_bytes_arrived(&data, &mut activity);
        assert_eq!(activity.looped_back, 16);
        assert_eq!(activity.suspended, Some(Suspension::Credits));
        assert_eq!(state.rx.len(), 24);

        state.ledger.credit(100);
        let mut activity = Activity::default();
        state.run_send_cycle(&mut activity);
        state.on_bytes_arrived(&[], &mut activity);

        assert!(state.rx.is_empty());
        assert_eq!(state.transport.get_data().as_slice(), &data[..]);
    }

    #[test]
    fn test_arrival_when_idle_is_ignored() {
        let mut state = active::<64, 64>(MockTransport::new(20), SessionModes::default());
        state.teardown();

        let mut activity = Activity::default();
        state.on_bytes_arrived(&[1, 2, 3], &mut activity);
        assert_eq!(activity, Activity::default());
        assert!(state.rx.is_empty());
    }
}
