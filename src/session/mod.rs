//! Single-connection data session
//!
//! [`DataSession`] owns the transmit and receive ring buffers, the credit
//! ledger and the receive routing modes for the one active link. The send
//! and receive engines run inside it under the session lock.

pub mod display;
pub mod handle;
mod receive;
mod send;
pub mod source;
pub mod state;
pub mod stats;

pub use display::{DisplaySink, HexDisplay, NullDisplay};
pub use handle::DataSession;
pub use source::{PatternSource, PayloadSource};
pub use state::{
    Activity, Direction, Link, Overflow, PendingWrite, SessionConfig, SessionError, SessionModes,
    SessionPhase, Suspension, WriteOutcome,
};
pub use stats::{stream_checksum, StatsSnapshot};
