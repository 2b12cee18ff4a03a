//! Per-connection session state and lifecycle
//!
//! Everything in here is mutated only while the owning
//! [`DataSession`](super::DataSession) holds its lock. The send and receive
//! engines are `impl` blocks on [`SessionState`] in their own modules.

use core::fmt;

use log::{info, warn};

use crate::buffer::RingBuffer;
use crate::config::credits::DEFAULT_GRANT_THRESHOLD;
use crate::config::transport::MAX_ATT_PAYLOAD;
use crate::flow::CreditLedger;
use crate::transport::{AttributeHandle, CreditHandles, TransportError, TransportPort};

use super::display::DisplaySink;
use super::source::PayloadSource;
use super::stats::StreamStats;

/// Lifecycle of the single data session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No connection
    Idle,
    /// Connected, handles and credit support still being resolved
    Configuring,
    /// Buffers and ledger live, data flowing
    Active,
}

/// Stream direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Transmit,
    Receive,
}

/// Why a send cycle stopped with data still waiting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suspension {
    /// Out of transmit credits; resumes on the next credit grant
    Credits,
    /// The transport took less than offered; resumes on write completion
    Transport,
}

/// Receive routing flags
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionModes {
    /// Retransmit received bytes back to the peer
    pub loopback: bool,
    /// Drain received bytes as soon as they arrive. Drained bytes are
    /// discarded; only raw display sees them.
    pub auto_read: bool,
    /// Hex dump received bytes to the display sink
    pub raw_display: bool,
}

impl SessionModes {
    /// Loopback and auto-read both consume the receive buffer, so only one
    /// may be active.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.loopback && self.auto_read {
            return Err(SessionError::ConflictingModes);
        }
        Ok(())
    }
}

/// Runtime options for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub modes: SessionModes,
    /// Smallest receive grant sent while the receive buffer still holds data
    pub grant_threshold: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            modes: SessionModes::default(),
            grant_threshold: DEFAULT_GRANT_THRESHOLD,
        }
    }
}

/// Attribute parameters resolved at activation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub mtu: usize,
    pub data_handle: AttributeHandle,
    pub credit_handles: Option<CreditHandles>,
}

/// Progress of the outstanding `submit_write`.
///
/// Every generated byte is accounted for exactly once:
/// `generated == sent + queued + dropped`. Queued bytes of the pending
/// write always sit at the front of the transmit buffer because fresh
/// bytes are only generated once that buffer is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingWrite {
    pub requested: usize,
    pub generated: usize,
    pub sent: usize,
    pub queued: usize,
    pub dropped: usize,
}

impl PendingWrite {
    pub fn new(requested: usize) -> Self {
        Self {
            requested,
            generated: 0,
            sent: 0,
            queued: 0,
            dropped: 0,
        }
    }

    /// Bytes not yet pulled from the payload source
    pub fn remaining(&self) -> usize {
        self.requested - self.generated
    }

    pub fn is_finished(&self) -> bool {
        self.remaining() == 0 && self.queued == 0
    }
}

/// Bytes dropped because a buffer could not hold them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overflow {
    pub direction: Direction,
    pub dropped: usize,
}

/// Final result of a `submit_write`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Every requested byte reached the transport
    Complete { sent: usize },
    /// Finished, but the transmit buffer overflowed along the way
    Truncated { sent: usize, dropped: usize },
    /// Disconnect or explicit cancellation
    Cancelled { sent: usize },
    /// A transport error ended the write
    Aborted { sent: usize, error: TransportError },
}

impl WriteOutcome {
    /// Bytes accepted by the transport before the write ended
    pub fn sent(&self) -> usize {
        match *self {
            WriteOutcome::Complete { sent }
            | WriteOutcome::Truncated { sent, .. }
            | WriteOutcome::Cancelled { sent }
            | WriteOutcome::Aborted { sent, .. } => sent,
        }
    }
}

/// Caller errors, returned before any state is touched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    NotConnected,
    AlreadyConnected,
    NotConfiguring,
    WriteAlreadyPending,
    ConflictingModes,
    ZeroLengthWrite,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::NotConnected => write!(f, "no active connection"),
            SessionError::AlreadyConnected => write!(f, "a connection is already open"),
            SessionError::NotConfiguring => write!(f, "connection is not being configured"),
            SessionError::WriteAlreadyPending => write!(f, "a write is already pending"),
            SessionError::ConflictingModes => {
                write!(f, "loopback and auto-read cannot both be active")
            }
            SessionError::ZeroLengthWrite => write!(f, "write length must be non-zero"),
        }
    }
}

/// What one pass through the engines did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Activity {
    /// Bytes accepted by the transport
    pub sent: usize,
    /// Bytes stored in the receive buffer
    pub buffered: usize,
    /// Received bytes moved to the transmit side
    pub looped_back: usize,
    /// Bytes drained by auto-read
    pub consumed: usize,
    /// Receive credits written to the peer
    pub granted: usize,
    pub receive_dropped: usize,
    pub transmit_dropped: usize,
    /// Set when the pending write finished or was cancelled
    pub completed: Option<WriteOutcome>,
    /// Set when the send cycle stopped with data still waiting
    pub suspended: Option<Suspension>,
    /// The transport reported the link gone; the session was torn down
    pub link_lost: bool,
}

impl Activity {
    pub fn receive_overflow(&self) -> Option<Overflow> {
        (self.receive_dropped > 0).then_some(Overflow {
            direction: Direction::Receive,
            dropped: self.receive_dropped,
        })
    }

    pub fn transmit_overflow(&self) -> Option<Overflow> {
        (self.transmit_dropped > 0).then_some(Overflow {
            direction: Direction::Transmit,
            dropped: self.transmit_dropped,
        })
    }
}

/// State guarded by the session lock
pub struct SessionState<T, D, P, const TX: usize, const RX: usize> {
    pub(crate) phase: SessionPhase,
    pub(crate) connection_id: Option<u16>,
    pub(crate) link: Option<Link>,
    pub(crate) tx: RingBuffer<TX>,
    pub(crate) rx: RingBuffer<RX>,
    pub(crate) ledger: CreditLedger,
    pub(crate) modes: SessionModes,
    pub(crate) grant_threshold: usize,
    pub(crate) pending: Option<PendingWrite>,
    pub(crate) transport: T,
    pub(crate) display: D,
    pub(crate) source: P,
    pub(crate) stats: StreamStats,
}

impl<T, D, P, const TX: usize, const RX: usize> SessionState<T, D, P, TX, RX>
where
    T: TransportPort,
    D: DisplaySink,
    P: PayloadSource,
{
    pub fn new(transport: T, display: D, source: P, config: SessionConfig) -> Self {
        Self {
            phase: SessionPhase::Idle,
            connection_id: None,
            link: None,
            tx: RingBuffer::new(),
            rx: RingBuffer::new(),
            ledger: CreditLedger::new(),
            modes: config.modes,
            grant_threshold: config.grant_threshold,
            pending: None,
            transport,
            display,
            source,
            stats: StreamStats::new(),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.phase == SessionPhase::Active
    }

    pub(crate) fn begin_configuration(&mut self, connection_id: u16) -> Result<(), SessionError> {
        if self.phase != SessionPhase::Idle {
            return Err(SessionError::AlreadyConnected);
        }
        self.connection_id = Some(connection_id);
        self.phase = SessionPhase::Configuring;
        info!("connection {} configuring", connection_id);
        Ok(())
    }

    pub(crate) fn activate(&mut self, activity: &mut Activity) -> Result<(), SessionError> {
        if self.phase != SessionPhase::Configuring {
            return Err(SessionError::NotConfiguring);
        }

        let link = Link {
            mtu: self.transport.resolve_mtu().min(MAX_ATT_PAYLOAD),
            data_handle: self.transport.data_handle(),
            credit_handles: self.transport.credit_handles(),
        };

        self.tx.reset();
        self.rx.reset();
        self.ledger.reset();
        self.pending = None;
        self.stats.reset();
        self.link = Some(link);
        self.phase = SessionPhase::Active;

        info!(
            "connection {} active: mtu {}, credits {}",
            self.connection_id.unwrap_or_default(),
            link.mtu,
            if link.credit_handles.is_some() { "on" } else { "off" }
        );

        if link.credit_handles.is_some() {
            self.ledger.enable();
            self.ledger.grant(RX);
            self.flush_grants(true, activity);
        }
        Ok(())
    }

    pub(crate) fn enable_credits(
        &mut self,
        handles: CreditHandles,
        activity: &mut Activity,
    ) -> Result<(), SessionError> {
        let link = match self.link.as_mut() {
            Some(link) if self.phase == SessionPhase::Active => link,
            _ => return Err(SessionError::NotConnected),
        };
        link.credit_handles = Some(handles);

        if !self.ledger.is_enabled() {
            info!("credits enabled mid-session");
            self.ledger.enable();
            self.ledger.grant(self.rx.free());
            self.flush_grants(true, activity);
        }
        Ok(())
    }

    pub(crate) fn set_modes(&mut self, modes: SessionModes, activity: &mut Activity) -> Result<(), SessionError> {
        modes.validate()?;
        self.modes = modes;
        if self.is_active() {
            self.on_bytes_arrived(&[], activity);
        }
        Ok(())
    }

    /// Start a new pending write after validating the request
    pub(crate) fn begin_write(&mut self, len: usize) -> Result<(), SessionError> {
        if !self.is_active() {
            return Err(SessionError::NotConnected);
        }
        if len == 0 {
            return Err(SessionError::ZeroLengthWrite);
        }
        if self.pending.is_some() {
            return Err(SessionError::WriteAlreadyPending);
        }
        self.source.reset();
        self.pending = Some(PendingWrite::new(len));
        info!("sending {} bytes", len);
        Ok(())
    }

    /// Drop the pending write and its queued bytes
    pub(crate) fn cancel_write(&mut self) -> Option<WriteOutcome> {
        let pending = self.pending.take()?;
        self.tx.skip(pending.queued);
        info!("write cancelled after {} of {} bytes", pending.sent, pending.requested);
        Some(WriteOutcome::Cancelled { sent: pending.sent })
    }

    /// End the pending write after a transport error
    pub(crate) fn abort_write(&mut self, error: TransportError, activity: &mut Activity) {
        if let Some(pending) = self.pending.take() {
            self.tx.skip(pending.queued);
            warn!("write aborted after {} bytes: {}", pending.sent, error);
            activity.completed = Some(WriteOutcome::Aborted {
                sent: pending.sent,
                error,
            });
        }
    }

    /// Return to idle, clearing buffers and ledger together
    pub(crate) fn teardown(&mut self) -> Option<WriteOutcome> {
        let outcome = self
            .pending
            .take()
            .map(|pending| WriteOutcome::Cancelled { sent: pending.sent });

        self.tx.reset();
        self.rx.reset();
        self.ledger.reset();
        self.link = None;
        self.phase = SessionPhase::Idle;

        info!(
            "connection {} closed",
            self.connection_id.take().unwrap_or_default()
        );
        outcome
    }

    /// Tear down if anything during the pass reported the link gone
    pub(crate) fn settle(&mut self, activity: &mut Activity) {
        if activity.link_lost && self.phase != SessionPhase::Idle {
            if let Some(outcome) = self.teardown() {
                activity.completed = Some(outcome);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::display::NullDisplay;
    use crate::session::source::PatternSource;
    use crate::transport::traits::mock::MockTransport;

    type TestState = SessionState<MockTransport, NullDisplay, PatternSource, 64, 64>;

    fn active(transport: MockTransport) -> TestState {
        let mut state = TestState::new(transport, NullDisplay, PatternSource::new(), SessionConfig::default());
        let mut activity = Activity::default();
        state.begin_configuration(7).unwrap();
        state.activate(&mut activity).unwrap();
        state
    }

    #[test]
    fn test_modes_conflict() {
        let modes = SessionModes {
            loopback: true,
            auto_read: true,
            raw_display: false,
        };
        assert_eq!(modes.validate(), Err(SessionError::ConflictingModes));

        let modes = SessionModes {
            loopback: true,
            auto_read: false,
            raw_display: true,
        };
        assert_eq!(modes.validate(), Ok(()));
    }

    #[test]
    fn test_lifecycle_order_enforced() {
        let mut state = TestState::new(MockTransport::new(20), NullDisplay, PatternSource::new(), SessionConfig::default());
        let mut activity = Activity::default();

        assert_eq!(state.activate(&mut activity), Err(SessionError::NotConfiguring));
        state.begin_configuration(1).unwrap();
        assert_eq!(state.begin_configuration(2), Err(SessionError::AlreadyConnected));
        state.activate(&mut activity).unwrap();
        assert_eq!(state.phase, SessionPhase::Active);
    }

    #[test]
    fn test_mtu_clamped_to_payload_limit() {
        let state = active(MockTransport::new(1000));
        assert_eq!(state.link.unwrap().mtu, MAX_ATT_PAYLOAD);
    }

    #[test]
    fn test_activation_grants_receive_capacity() {
        let state = active(MockTransport::with_credits(20));
        assert!(state.ledger.is_enabled());
        assert_eq!(state.transport.get_grants().as_slice(), &[64]);
        assert_eq!(state.ledger.owed(), 0);
    }

    #[test]
    fn test_begin_write_rejections_leave_state_alone() {
        let mut state = active(MockTransport::new(20));
        assert_eq!(state.begin_write(0), Err(SessionError::ZeroLengthWrite));
        assert!(state.pending.is_none());

        state.begin_write(10).unwrap();
        assert_eq!(state.begin_write(5), Err(SessionError::WriteAlreadyPending));
        assert_eq!(state.pending.unwrap().requested, 10);
    }

    #[test]
    fn test_teardown_resets_everything() {
        let mut state = active(MockTransport::with_credits(20));
        state.tx.write(&[1, 2, 3]);
        state.rx.write(&[4, 5]);
        state.ledger.credit(40);
        state.pending = Some(PendingWrite {
            requested: 10,
            generated: 6,
            sent: 3,
            queued: 3,
            dropped: 0,
        });

        assert_eq!(state.teardown(), Some(WriteOutcome::Cancelled { sent: 3 }));
        assert!(state.tx.is_empty());
        assert!(state.rx.is_empty());
        assert_eq!(state.ledger, CreditLedger::new());
        assert_eq!(state.phase, SessionPhase::Idle);
        assert!(state.link.is_none());
    }

    #[test]
    fn test_cancel_discards_only_own_queued_bytes() {
        let mut state = active(MockTransport::new(20));
        state.tx.write(&[1, 2, 9, 9]);
        state.pending = Some(PendingWrite {
            requested: 4,
            generated: 4,
            sent: 2,
            queued: 2,
            dropped: 0,
        });

        assert_eq!(state.cancel_write(), Some(WriteOutcome::Cancelled { sent: 2 }));
        assert_eq!(state.tx.len(), 2);
        assert_eq!(state.cancel_write(), None);
    }

    #[test]
    fn test_activity_overflow_reports() {
        let activity = Activity {
            receive_dropped: 50,
            ..Activity::default()
        };
        assert_eq!(
            activity.receive_overflow(),
            Some(Overflow {
                direction: Direction::Receive,
                dropped: 50
            })
        );
        assert_eq!(activity.transmit_overflow(), None);
    }
}
