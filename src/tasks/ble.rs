//! BLE peripheral task hosting the data session
//!
//! Advertises the SPPLE service, feeds characteristic writes into the
//! session as transport events and drains the outbound queue into
//! notifications. Each drained frame is followed by a `WriteComplete`
//! event so a send cycle suspended on a full queue resumes.
//!
//! Links start without credit flow control. Credits are switched on when
//! the client subscribes to TX credits or first writes RX credits, so the
//! initial grant is only sent once the client can receive it.

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Receiver;
use log::{debug, info, warn};
use trouble_host::prelude::*;

use crate::ble::{LinkSession, SppleService};
use crate::config::gatt::SERVICE_UUID;
use crate::flow::decode_credits;
use crate::tasks::bridge::RX_READY;
use crate::tasks::led::{LedEvent, LedSender};
use crate::transport::{CreditHandles, Outbound, TransportEvent, OUTBOUND_DEPTH};

/// Device name prefix for BLE advertising
const DEVICE_NAME_PREFIX: &str = "SPPLE-";

/// Number of maximum concurrent connections
const CONNECTIONS_MAX: usize = 1;
/// Number of L2CAP channels
const L2CAP_CHANNELS_MAX: usize = 3;

/// Type alias for the outbound queue receiver
pub type OutboundReceiver = Receiver<'static, CriticalSectionRawMutex, Outbound, OUTBOUND_DEPTH>;

/// Notification bit of a client characteristic configuration value
const CCCD_NOTIFY: u8 = 0x01;

/// Switch the running link over to credit flow control
fn enable_link_credits(session: &LinkSession, handles: CreditHandles) {
    session.with_transport(|transport| transport.enable_credits(handles));
    if let Err(e) = session.enable_credits(handles) {
        warn!("BLE: cannot enable credits: {}", e);
    }
}

/// Format device ID bytes as uppercase hex after the name prefix
fn format_device_name<'a>(buf: &'a mut [u8; 20], device_id: &[u8; 3]) -> &'a str {
    const HEX_CHARS: &[u8; 16] = b"0123456789ABCDEF";
    let prefix = DEVICE_NAME_PREFIX.as_bytes();

    buf[..prefix.len()].copy_from_slice(prefix);

    let mut pos = prefix.len();
    for &byte in device_id {
        buf[pos] = HEX_CHARS[(byte >> 4) as usize];
        buf[pos + 1] = HEX_CHARS[(byte & 0x0F) as usize];
        pos += 2;
    }

    core::str::from_utf8(&buf[..pos]).unwrap_or(DEVICE_NAME_PREFIX)
}

#[gatt_server(mutex_type = CriticalSectionRawMutex)]
struct Server {
    spple: SppleService,
}

pub async fn ble_task<C: Controller>(
    controller: C,
    device_id: [u8; 3],
    session: &'static LinkSession,
    outbound: OutboundReceiver,
    led: LedSender,
) {
    let mut device_name_buf = [0u8; 20];
    let device_name = format_device_name(&mut device_name_buf, &device_id);

    info!("BLE: starting as '{}', service {}", device_name, SERVICE_UUID);

    let mut resources: HostResources<DefaultPacketPool, CONNECTIONS_MAX, L2CAP_CHANNELS_MAX> =
        HostResources::new();

    let stack = trouble_host::new(controller, &mut resources).set_random_address(Address::random([
        device_id[0],
        device_id[1],
        device_id[2],
        0x5C,
        0x9A,
        0xC4,
    ]));

    let Host {
        mut peripheral,
        mut runner,
        ..
    } = stack.build();

    let gap = GapConfig::Peripheral(PeripheralConfig {
        name: device_name,
        appearance: &appearance::UNKNOWN,
    });
    let server: Server = match Server::new_with_config(gap) {
        Ok(s) => s,
        Err(_) => return,
    };

    let credit_handles = CreditHandles {
        grant: server.spple.tx_credits.handle,
        notify: server.spple.rx_credits.handle,
    };
    let tx_credits_cccd = server.spple.tx_credits.cccd_handle;

    let runner_task = runner.run();

    let peripheral_task = async {
        let mut adv_data = [0u8; 31];
        let len = match AdStructure::encode_slice(
            &[
                AdStructure::Flags(LE_GENERAL_DISCOVERABLE | BR_EDR_NOT_SUPPORTED),
                AdStructure::CompleteLocalName(device_name.as_bytes()),
            ],
            &mut adv_data,
        ) {
            Ok(l) => l,
            Err(_) => return,
        };

        loop {
            debug!("BLE: advertising");
            let advertiser = match peripheral
                .advertise(
                    &Default::default(),
                    Advertisement::ConnectableScannableUndirected {
                        adv_data: &adv_data[..len],
                        scan_data: &[],
                    },
                )
                .await
            {
                Ok(a) => a,
                Err(_) => continue,
            };

            let acceptor = match advertiser.accept().await {
                Ok(a) => a,
                Err(_) => continue,
            };

            let conn = match acceptor.with_attribute_server(&*server) {
                Ok(c) => c,
                Err(_) => continue,
            };

            // Frames queued for a previous link must not reach this one
            while outbound.try_receive().is_ok() {}

            let connection_id = conn.raw().handle().raw();
            let att_mtu = conn.raw().att_mtu();
            if let Err(e) = session.begin_configuration(connection_id) {
                warn!("BLE: cannot start session: {}", e);
                continue;
            }
            session.with_transport(|transport| {
                transport.configure(att_mtu, server.spple.tx.handle, None)
            });
            if let Err(e) = session.activate() {
                warn!("BLE: cannot activate session: {}", e);
                session.disconnect();
                continue;
            }
            let _ = led.try_send(LedEvent::Connected);
            let mut credits_on = false;

            loop {
                match select(conn.next(), outbound.receive()).await {
                    Either::First(GattConnectionEvent::Disconnected { reason }) => {
                        info!("BLE: disconnected ({:?})", reason);
                        session.handle_event(TransportEvent::Disconnected);
                        let _ = led.try_send(LedEvent::Disconnected);
                        break;
                    }
                    Either::First(GattConnectionEvent::Gatt { event }) => match event {
                        GattEvent::Write(write_event) => {
                            let handle = write_event.handle();
                            if handle == server.spple.rx.handle {
                                let activity =
                                    session.handle_event(TransportEvent::BytesArrived(write_event.data()));
                                if activity.buffered > 0 {
                                    RX_READY.signal(());
                                }
                                let _ = led.try_send(LedEvent::Traffic);
                            } else if handle == server.spple.rx_credits.handle {
                                match decode_credits(write_event.data()) {
                                    Some(amount) => {
                                        if !credits_on {
                                            enable_link_credits(session, credit_handles);
                                            credits_on = true;
                                        }
                                        session.handle_event(TransportEvent::CreditsArrived(amount));
                                    }
                                    None => warn!("BLE: malformed credit write"),
                                }
                            } else if Some(handle) == tx_credits_cccd
                                && !credits_on
                                && write_event.data().first().is_some_and(|flags| flags & CCCD_NOTIFY != 0)
                            {
                                // The grant is queued now and notified after the
                                // subscription below takes effect
                                enable_link_credits(session, credit_handles);
                                credits_on = true;
                            }
                            let _ = write_event.accept();
                        }
                        GattEvent::Read(read_event) => {
                            let _ = read_event.accept();
                        }
                        GattEvent::Other(other_event) => {
                            let _ = other_event.accept();
                        }
                    },
                    Either::First(_) => {}
                    Either::Second(frame) => {
                        let sent = match &frame {
                            Outbound::Data(data) => server.spple.tx.notify(&conn, data).await,
                            Outbound::Credits(amount) => server.spple.tx_credits.notify(&conn, amount).await,
                        };
                        if let Err(e) = sent {
                            warn!("BLE: notify failed: {:?}", e);
                        }
                        session.handle_event(TransportEvent::WriteComplete);
                    }
                }
            }
        }
    };

    select(runner_task, peripheral_task).await;
}
