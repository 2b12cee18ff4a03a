//! Attribute transport trait for abstraction and testability
//!
//! The data path never talks to the radio directly. It asks a
//! [`TransportPort`] for the negotiated MTU and the resolved attribute
//! handles, and hands it bounded, non-blocking writes. Inbound traffic is
//! delivered back to the session as [`TransportEvent`]s.

use core::fmt;

/// Attribute handle as resolved during discovery
pub type AttributeHandle = u16;

/// Handles of the two optional credit characteristics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditHandles {
    /// Characteristic the local side writes its receive grants to
    pub grant: AttributeHandle,
    /// Characteristic the peer notifies its grants on
    pub notify: AttributeHandle,
}

/// Errors that can occur during transport writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The stack refused the write
    Rejected,
    /// The link is gone
    Disconnected,
    /// The handle does not belong to the connection
    InvalidHandle,
    /// No room in the outgoing queue
    Busy,
}

impl TransportError {
    /// Whether the error means the connection itself was lost
    pub fn is_disconnect(&self) -> bool {
        matches!(self, TransportError::Disconnected)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Rejected => write!(f, "write rejected"),
            TransportError::Disconnected => write!(f, "connection lost"),
            TransportError::InvalidHandle => write!(f, "invalid attribute handle"),
            TransportError::Busy => write!(f, "transport busy"),
        }
    }
}

/// Notification delivered from the transport into the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent<'a> {
    /// Stream data arrived from the peer. An empty span re-polls the
    /// receive buffer without delivering anything new.
    BytesArrived(&'a [u8]),
    /// The peer granted transmit credits
    CreditsArrived(u16),
    /// A previous write left the transport and there may be room again
    WriteComplete,
    /// The link dropped
    Disconnected,
}

/// Abstract attribute transport for testability
///
/// This trait allows the session to work with either the GATT server in the
/// firmware or a mock implementation for testing.
pub trait TransportPort {
    /// Negotiated maximum number of bytes per write
    fn resolve_mtu(&self) -> usize;

    /// Handle that stream data is written to
    fn data_handle(&self) -> AttributeHandle;

    /// Credit characteristic handles, if the peer exposes both
    fn credit_handles(&self) -> Option<CreditHandles>;

    fn credits_supported(&self) -> bool {
        self.credit_handles().is_some()
    }

    /// Write bytes to an attribute without blocking
    ///
    /// Returns the number of bytes accepted, which may be fewer than
    /// offered when the transport is short of room.
    fn write_bytes(&mut self, handle: AttributeHandle, data: &[u8]) -> Result<usize, TransportError>;
}
