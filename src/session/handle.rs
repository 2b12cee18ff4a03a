//! Lock-guarded entry point to the data session
//!
//! Application calls and transport events both enter here. Each call takes
//! the session lock for one complete engine pass and releases it before
//! returning; the only wait is on the lock itself. A pending write's final
//! outcome is published on a [`Signal`] so the caller that submitted it can
//! wait outside the lock.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use heapless::Vec;
use log::warn;

use crate::flow::CreditLedger;
use crate::transport::{CreditHandles, TransportEvent, TransportPort};

use super::display::DisplaySink;
use super::source::PayloadSource;
use super::state::{
    Activity, PendingWrite, SessionConfig, SessionError, SessionModes, SessionPhase, SessionState,
    WriteOutcome,
};
use super::stats::StatsSnapshot;

/// The single data session of a link
///
/// `TX` and `RX` are the transmit and receive buffer capacities in bytes.
pub struct DataSession<M: RawMutex, T, D, P, const TX: usize, const RX: usize> {
    state: Mutex<M, RefCell<SessionState<T, D, P, TX, RX>>>,
    completion: Signal<M, WriteOutcome>,
}

impl<M, T, D, P, const TX: usize, const RX: usize> DataSession<M, T, D, P, TX, RX>
where
    M: RawMutex,
    T: TransportPort,
    D: DisplaySink,
    P: PayloadSource,
{
    pub fn new(transport: T, display: D, source: P, config: SessionConfig) -> Self {
        Self {
            state: Mutex::new(RefCell::new(SessionState::new(transport, display, source, config))),
            completion: Signal::new(),
        }
    }

    /// Run one engine pass under the lock, then publish any outcome
    fn pass<R>(&self, f: impl FnOnce(&mut SessionState<T, D, P, TX, RX>, &mut Activity) -> R) -> (R, Activity) {
        self.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            let mut activity = Activity::default();
            let result = f(&mut *state, &mut activity);
            state.settle(&mut activity);
            if let Some(outcome) = activity.completed {
                self.completion.signal(outcome);
            }
            (result, activity)
        })
    }

    fn inspect<R>(&self, f: impl FnOnce(&SessionState<T, D, P, TX, RX>) -> R) -> R {
        self.state.lock(|cell| f(&*cell.borrow()))
    }

    /// Connection established; handles and credit support being resolved
    pub fn begin_configuration(&self, connection_id: u16) -> Result<(), SessionError> {
        self.pass(|state, _| state.begin_configuration(connection_id)).0
    }

    /// Resolution finished: reset the buffers and ledger and start data flow
    pub fn activate(&self) -> Result<Activity, SessionError> {
        let (result, activity) = self.pass(|state, activity| state.activate(activity));
        result.map(|_| activity)
    }

    /// Configure and activate in one step
    pub fn connect(&self, connection_id: u16) -> Result<Activity, SessionError> {
        self.begin_configuration(connection_id)?;
        self.activate()
    }

    /// Turn credit flow control on for the running connection
    pub fn enable_credits(&self, handles: CreditHandles) -> Result<Activity, SessionError> {
        let (result, activity) = self.pass(|state, activity| state.enable_credits(handles, activity));
        result.map(|_| activity)
    }

    /// Dispatch one transport event
    pub fn handle_event(&self, event: TransportEvent<'_>) -> Activity {
        self.pass(|state, activity| match event {
            TransportEvent::BytesArrived(data) => state.on_bytes_arrived(data, activity),
            TransportEvent::CreditsArrived(amount) => {
                if !state.is_active() {
                    warn!("ignoring {} credits without an active link", amount);
                    return;
                }
                state.ledger.credit(amount as usize);
                state.run_send_cycle(activity);
                state.on_bytes_arrived(&[], activity);
            }
            TransportEvent::WriteComplete => {
                state.run_send_cycle(activity);
                state.on_bytes_arrived(&[], activity);
            }
            TransportEvent::Disconnected => {
                if state.phase != SessionPhase::Idle {
                    activity.completed = state.teardown();
                }
            }
        })
        .1
    }

    pub fn disconnect(&self) -> Activity {
        self.handle_event(TransportEvent::Disconnected)
    }

    /// Start sending `len` bytes from the payload source.
    ///
    /// The final outcome is available from
    /// [`wait_write_complete`](Self::wait_write_complete).
    pub fn submit_write(&self, len: usize) -> Result<Activity, SessionError> {
        let (result, activity) = self.pass(|state, activity| {
            state.begin_write(len)?;
            self.completion.reset();
            state.run_send_cycle(activity);
            Ok::<(), SessionError>(())
        });
        result.map(|_| activity)
    }

    /// Queue caller bytes for transmission. Returns how many were taken;
    /// the rest did not fit the transmit buffer.
    pub fn write_data(&self, data: &[u8]) -> Result<usize, SessionError> {
        self.pass(|state, activity| {
            if !state.is_active() {
                return Err(SessionError::NotConnected);
            }
            let taken = state.enqueue(data, activity);
            if taken < data.len() {
                warn!("transmit overflow: dropped {} bytes", data.len() - taken);
                activity.transmit_dropped += data.len() - taken;
                state.stats.record_transmit_dropped(data.len() - taken);
            }
            Ok(taken)
        })
        .0
    }

    /// Drain up to `out.len()` received bytes. Never blocks; returns zero
    /// when nothing is buffered or no link is active.
    pub fn read_into(&self, out: &mut [u8]) -> usize {
        self.pass(|state, activity| state.read_into(out, activity)).0
    }

    /// Drain up to `max_len` received bytes
    pub fn read(&self, max_len: usize) -> Vec<u8, RX> {
        let mut out = Vec::new();
        let _ = out.resize(max_len.min(RX), 0);
        let read = self.read_into(&mut out);
        out.truncate(read);
        out
    }

    pub fn set_mode(&self, loopback: bool, auto_read: bool, raw_display: bool) -> Result<Activity, SessionError> {
        let modes = SessionModes {
            loopback,
            auto_read,
            raw_display,
        };
        let (result, activity) = self.pass(|state, activity| state.set_modes(modes, activity));
        result.map(|_| activity)
    }

    /// Cancel the pending write, discarding its queued bytes
    pub fn cancel_write(&self) -> Option<WriteOutcome> {
        self.pass(|state, activity| {
            activity.completed = state.cancel_write();
            activity.completed
        })
        .0
    }

    /// Wait for the pending write to complete, fail or be cancelled
    pub async fn wait_write_complete(&self) -> WriteOutcome {
        self.completion.wait().await
    }

    /// Take the last write outcome without waiting
    pub fn try_take_outcome(&self) -> Option<WriteOutcome> {
        self.completion.try_take()
    }

    pub fn phase(&self) -> SessionPhase {
        self.inspect(|state| state.phase)
    }

    pub fn modes(&self) -> SessionModes {
        self.inspect(|state| state.modes)
    }

    pub fn pending_write(&self) -> Option<PendingWrite> {
        self.inspect(|state| state.pending)
    }

    pub fn transmit_credits(&self) -> usize {
        self.inspect(|state| state.ledger.transmit_credits())
    }

    pub fn credit_ledger(&self) -> CreditLedger {
        self.inspect(|state| state.ledger.clone())
    }

    /// Bytes waiting in the transmit buffer
    pub fn tx_queued(&self) -> usize {
        self.inspect(|state| state.tx.len())
    }

    /// Room left in the transmit buffer
    pub fn tx_free(&self) -> usize {
        self.inspect(|state| state.tx.free())
    }

    /// Bytes waiting in the receive buffer
    pub fn receive_available(&self) -> usize {
        self.inspect(|state| state.rx.len())
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inspect(|state| state.stats.snapshot())
    }

    /// Run `f` against the transport under the session lock
    pub fn with_transport<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        self.state.lock(|cell| f(&mut cell.borrow_mut().transport))
    }

    pub fn with_display<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        self.state.lock(|cell| f(&mut cell.borrow_mut().display))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::display::NullDisplay;
    use crate::session::source::PatternSource;
    use crate::session::state::Suspension;
    use crate::session::stats::stream_checksum;
    use crate::transport::traits::mock::MockTransport;
    use crate::transport::TransportError;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

    type TestSession<const TX: usize, const RX: usize> =
        DataSession<CriticalSectionRawMutex, MockTransport, NullDisplay, PatternSource, TX, RX>;

    fn session<const TX: usize, const RX: usize>(transport: MockTransport) -> TestSession<TX, RX> {
        let session = TestSession::new(transport, NullDisplay, PatternSource::new(), SessionConfig::default());
        session.connect(1).unwrap();
        session.with_transport(|t| t.clear_history());
        session
    }

    #[test]
    fn test_exact_fit_send() {
        let session = session::<600, 600>(MockTransport::with_credits(200));
        session.handle_event(TransportEvent::CreditsArrived(600));

        let activity = session.submit_write(600).unwrap();

        assert_eq!(activity.sent, 600);
        assert_eq!(
            session.with_transport(|t| t.get_chunk_sizes()).as_slice(),
            &[200, 200, 200]
        );
        assert_eq!(session.transmit_credits(), 0);
        assert_eq!(session.try_take_outcome(), Some(WriteOutcome::Complete { sent: 600 }));
    }

    #[test]
    fn test_credit_starved_send_resumes() {
        let session = session::<600, 600>(MockTransport::with_credits(200));
        session.handle_event(TransportEvent::CreditsArrived(50));

        let activity = session.submit_write(300).unwrap();
        assert_eq!(activity.sent, 50);
        assert_eq!(activity.suspended, Some(Suspension::Credits));
        assert_eq!(session.try_take_outcome(), None);

        let activity = session.handle_event(TransportEvent::CreditsArrived(250));
        assert_eq!(activity.sent, 250);
        assert_eq!(activity.completed, Some(WriteOutcome::Complete { sent: 300 }));

        let chunks = session.with_transport(|t| t.get_chunk_sizes());
        assert_eq!(chunks.iter().sum::<usize>(), 300);
        assert!(chunks.iter().all(|&c| c <= 200));
        assert_eq!(session.transmit_credits(), 0);
    }

    #[test]
    fn test_receive_overflow() {
        let session = session::<64, 100>(MockTransport::new(20));
        let mut data = [0u8; 150];
        for (i, byte) in data.iter_mut().enumerate() {
            *byte = i as u8;
        }

        let activity = session.handle_event(TransportEvent::BytesArrived(&data));
        assert_eq!(activity.buffered, 100);
        assert_eq!(activity.receive_overflow().map(|o| o.dropped), Some(50));

        let read = session.read(200);
        assert_eq!(read.as_slice(), &data[..100]);
        assert_eq!(session.read(200).len(), 0);
    }

    #[test]
    fn test_disconnect_mid_write() {
        let session = session::<256, 256>(MockTransport::with_credits(200));
        session.handle_event(TransportEvent::CreditsArrived(300));
        session.with_transport(|t| t.set_accept_limit(Some(150)));

        session.submit_write(1000).unwrap();
        assert!(session.tx_queued() > 0);
        session.handle_event(TransportEvent::BytesArrived(&[1, 2, 3]));

        let activity = session.handle_event(TransportEvent::Disconnected);
        let outcome = futures::executor::block_on(session.wait_write_complete());

        assert_eq!(activity.completed, Some(outcome));
        assert_eq!(outcome, WriteOutcome::Cancelled { sent: 150 });
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert_eq!(session.tx_queued(), 0);
        assert_eq!(session.receive_available(), 0);
        assert_eq!(session.credit_ledger(), CreditLedger::new());
        assert_eq!(session.pending_write(), None);
    }

    #[test]
    fn test_usage_errors_do_not_mutate() {
        let session = TestSession::<64, 64>::new(
            MockTransport::new(20),
            NullDisplay,
            PatternSource::new(),
            SessionConfig::default(),
        );
        assert_eq!(session.submit_write(10), Err(SessionError::NotConnected));
        assert_eq!(session.write_data(&[1]), Err(SessionError::NotConnected));
        assert_eq!(session.read(10).len(), 0);

        session.connect(1).unwrap();
        assert_eq!(session.connect(2), Err(SessionError::AlreadyConnected));

        session.with_transport(|t| t.set_accept_limit(Some(0)));
        session.submit_write(10).unwrap();
        let pending = session.pending_write();
        assert_eq!(session.submit_write(5), Err(SessionError::WriteAlreadyPending));
        assert_eq!(session.pending_write(), pending);
    }

    #[test]
    fn test_set_mode_rejects_conflict() {
        let session = session::<64, 64>(MockTransport::new(20));
        assert_eq!(session.set_mode(true, true, false), Err(SessionError::ConflictingModes));
        assert_eq!(session.modes(), SessionModes::default());

        session.set_mode(true, false, true).unwrap();
        assert!(session.modes().loopback);
    }

    #[test]
    fn test_enabling_auto_read_drains_buffer() {
        let session = session::<64, 64>(MockTransport::with_credits(20));
        session.handle_event(TransportEvent::BytesArrived(&[9; 12]));
        assert_eq!(session.receive_available(), 12);

        let activity = session.set_mode(false, true, false).unwrap();
        assert_eq!(activity.consumed, 12);
        assert_eq!(session.receive_available(), 0);
        assert_eq!(session.with_transport(|t| t.get_grants()).as_slice(), &[12]);
    }

    #[test]
    fn test_modes_survive_reconnect() {
        let session = session::<64, 64>(MockTransport::new(20));
        session.set_mode(false, true, true).unwrap();

        session.disconnect();
        session.connect(2).unwrap();
        assert!(session.modes().auto_read);
    }

    #[test]
    fn test_cancel_write() {
        let session = session::<256, 64>(MockTransport::with_credits(20));
        session.handle_event(TransportEvent::CreditsArrived(30));
        session.submit_write(100).unwrap();

        assert_eq!(session.cancel_write(), Some(WriteOutcome::Cancelled { sent: 30 }));
        assert_eq!(
            futures::executor::block_on(session.wait_write_complete()),
            WriteOutcome::Cancelled { sent: 30 }
        );
        assert_eq!(session.cancel_write(), None);

        // A fresh write may start right away
        session.handle_event(TransportEvent::CreditsArrived(10));
        assert!(session.submit_write(10).is_ok());
    }

    #[test]
    fn test_write_complete_resumes_transport_backpressure() {
        let session = session::<256, 64>(MockTransport::new(20));
        session.with_transport(|t| t.set_accept_limit(Some(5)));

        let activity = session.submit_write(40).unwrap();
        assert_eq!(activity.suspended, Some(Suspension::Transport));

        session.with_transport(|t| t.set_accept_limit(None));
        let activity = session.handle_event(TransportEvent::WriteComplete);
        assert_eq!(activity.completed, Some(WriteOutcome::Complete { sent: 40 }));
    }

    #[test]
    fn test_data_disconnect_error_cancels_stalled_write() {
        let session = session::<256, 64>(MockTransport::new(20));
        session.with_transport(|t| t.set_accept_limit(Some(0)));

        let activity = session.submit_write(100).unwrap();
        assert_eq!(activity.suspended, Some(Suspension::Transport));

        session.with_transport(|t| t.set_next_error(TransportError::Disconnected));
        let activity = session.handle_event(TransportEvent::WriteComplete);

        assert!(activity.link_lost);
        assert_eq!(activity.completed, Some(WriteOutcome::Cancelled { sent: 0 }));
        assert_eq!(session.try_take_outcome(), Some(WriteOutcome::Cancelled { sent: 0 }));
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert_eq!(session.tx_queued(), 0);
    }

    #[test]
    fn test_grant_disconnect_error_tears_down() {
        let session = session::<64, 64>(MockTransport::with_credits(20));
        session.set_mode(false, true, false).unwrap();
        session.with_transport(|t| t.set_next_grant_error(TransportError::Disconnected));

        let activity = session.handle_event(TransportEvent::BytesArrived(&[1; 8]));
        assert!(activity.link_lost);
        assert_eq!(session.phase(), SessionPhase::Idle);
    }

    #[test]
    fn test_enable_credits_mid_session() {
        let session = session::<64, 64>(MockTransport::new(20));
        session.handle_event(TransportEvent::BytesArrived(&[0; 4]));

        let activity = session.enable_credits(MockTransport::handles()).unwrap();
        assert_eq!(activity.granted, 60);
        assert!(session.credit_ledger().is_enabled());

        // Credit gating now applies
        let activity = session.submit_write(10).unwrap();
        assert_eq!(activity.suspended, Some(Suspension::Credits));
    }

    #[test]
    fn test_write_data_reports_overflow() {
        let session = session::<16, 64>(MockTransport::with_credits(20));

        assert_eq!(session.write_data(&[3; 24]), Ok(16));
        assert_eq!(session.stats().transmit_dropped, 8);
        assert_eq!(session.tx_queued(), 16);
    }

    #[test]
    fn test_loopback_checksums_match() {
        let session = session::<256, 256>(MockTransport::new(20));
        session.set_mode(true, false, false).unwrap();

        let mut data = [0u8; 200];
        for (i, byte) in data.iter_mut().enumerate() {
            *byte = (i * 7) as u8;
        }
        for part in data.chunks(33) {
            session.handle_event(TransportEvent::BytesArrived(part));
        }

        let stats = session.stats();
        assert_eq!(stats.bytes_looped_back, 200);
        assert_eq!(stats.rx_checksum, stats.tx_checksum);
        assert_eq!(stats.tx_checksum, stream_checksum(&data));
    }

    #[test]
    fn test_concurrent_application_and_notifications() {
        let session = session::<512, 1024>(MockTransport::with_credits(100));
        let total = 3000;

        std::thread::scope(|scope| {
            scope.spawn(|| {
                session.submit_write(total).unwrap();
                futures::executor::block_on(session.wait_write_complete())
            });
            scope.spawn(|| {
                for _ in 0..60 {
                    session.handle_event(TransportEvent::CreditsArrived(50));
                    session.handle_event(TransportEvent::BytesArrived(&[0x55; 10]));
                    std::thread::yield_now();
                }
            });
            scope.spawn(|| {
                let mut drained = 0;
                while drained < 600 {
                    drained += session.read(64).len();
                    std::thread::yield_now();
                }
            });
        });

        let stats = session.stats();
        assert_eq!(stats.bytes_sent, total as u64);
        assert_eq!(stats.bytes_received, 600);
        assert_eq!(session.transmit_credits(), 0);
    }
}
