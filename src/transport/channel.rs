//! Transport port backed by a bounded outbound queue
//!
//! Session writes never touch the radio. Each accepted write becomes one
//! [`Outbound`] frame on an embassy channel, and the BLE task drains that
//! channel into notifications. A full queue is reported as zero bytes
//! accepted for data, which suspends the send cycle until the BLE task
//! signals `WriteComplete`.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Sender;
use heapless::Vec;

use super::traits::{AttributeHandle, CreditHandles, TransportError, TransportPort};
use crate::config::transport::{ATT_HEADER_LEN, DEFAULT_ATT_MTU, MAX_ATT_PAYLOAD};
use crate::flow::decode_credits;

/// Depth of the outbound notification queue
pub const OUTBOUND_DEPTH: usize = 8;

/// One queued notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Stream bytes for the data characteristic
    Data(Vec<u8, MAX_ATT_PAYLOAD>),
    /// Receive credits for the grant characteristic
    Credits(u16),
}

pub struct ChannelTransport<'a, M: RawMutex, const N: usize> {
    sender: Sender<'a, M, Outbound, N>,
    payload_mtu: usize,
    data_handle: AttributeHandle,
    credit_handles: Option<CreditHandles>,
}

impl<'a, M: RawMutex, const N: usize> ChannelTransport<'a, M, N> {
    pub fn new(sender: Sender<'a, M, Outbound, N>) -> Self {
        Self {
            sender,
            payload_mtu: DEFAULT_ATT_MTU - ATT_HEADER_LEN,
            data_handle: 0,
            credit_handles: None,
        }
    }

    /// Record the attribute layout and the exchanged ATT MTU of a new link
    pub fn configure(
        &mut self,
        att_mtu: u16,
        data_handle: AttributeHandle,
        credit_handles: Option<CreditHandles>,
    ) {
        self.payload_mtu = (att_mtu as usize).saturating_sub(ATT_HEADER_LEN).min(MAX_ATT_PAYLOAD);
        self.data_handle = data_handle;
        self.credit_handles = credit_handles;
    }

    /// Accept grant writes once the peer has opted into credits
    pub fn enable_credits(&mut self, handles: CreditHandles) {
        self.credit_handles = Some(handles);
    }
}

impl<'a, M: RawMutex, const N: usize> TransportPort for ChannelTransport<'a, M, N> {
    fn resolve_mtu(&self) -> usize {
        self.payload_mtu
    }

    fn data_handle(&self) -> AttributeHandle {
        self.data_handle
    }

    fn credit_handles(&self) -> Option<CreditHandles> {
        self.credit_handles
    }

    fn write_bytes(&mut self, handle: AttributeHandle, data: &[u8]) -> Result<usize, TransportError> {
        if handle == self.data_handle {
            let len = data.len().min(self.payload_mtu);
            let frame = Vec::from_slice(&data[..len]).map_err(|_| TransportError::Rejected)?;
            return match self.sender.try_send(Outbound::Data(frame)) {
                Ok(()) => Ok(len),
                Err(_) => Ok(0),
            };
        }

        match self.credit_handles {
            Some(handles) if handles.grant == handle => {
                let amount = decode_credits(data).ok_or(TransportError::Rejected)?;
                self.sender
                    .try_send(Outbound::Credits(amount))
                    .map_err(|_| TransportError::Busy)?;
                Ok(data.len())
            }
            _ => Err(TransportError::InvalidHandle),
        }
    }
}
