//! Serial Port Profile over LE service definition
//!
//! - TX: stream data from this device (notify)
//! - TX credits: receive credits this device grants the client (notify)
//! - RX: stream data from the client (write, write without response)
//! - RX credits: transmit credits the client grants this device (write)
//!
//! Credit values are little-endian `u16`.

use heapless::Vec;
use trouble_host::prelude::*;

use crate::config::transport::MAX_ATT_PAYLOAD;

#[gatt_service(uuid = "14839ac4-7d7e-415c-9a42-167340cf2339")]
pub struct SppleService {
    #[characteristic(uuid = "8b00ace7-eb0b-49b0-bbe9-9aee0a26e1a3", notify, value = Vec::new())]
    pub tx: Vec<u8, MAX_ATT_PAYLOAD>,

    #[characteristic(uuid = "ba04c4b2-892b-43be-b69c-5d13f2195392", notify, value = 0)]
    pub tx_credits: u16,

    #[characteristic(uuid = "0734594a-a8e7-4b1a-a6b1-cd5243059a57", write, write_without_response, value = Vec::new())]
    pub rx: Vec<u8, MAX_ATT_PAYLOAD>,

    #[characteristic(uuid = "e06d5efb-4f4a-45c0-9eb1-371ae5a14ad4", write, value = 0)]
    pub rx_credits: u16,
}
