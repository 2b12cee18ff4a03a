pub mod channel;
pub mod traits;

pub use channel::{ChannelTransport, Outbound, OUTBOUND_DEPTH};
pub use traits::{AttributeHandle, CreditHandles, TransportError, TransportEvent, TransportPort};
