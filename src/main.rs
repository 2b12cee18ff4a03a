#![no_std]
#![no_main]

extern crate alloc;

// Required for ESP-IDF bootloader compatibility
// Use explicit parameters to ensure correct efuse block revision values
esp_bootloader_esp_idf::esp_app_desc!(
    env!("CARGO_PKG_VERSION"),  // version
    env!("CARGO_PKG_NAME"),     // project_name
    "00:00:00",                 // build_time
    "2025-01-01",               // build_date
    "0.0.0",                    // idf_ver (not using IDF)
    0x10000,                    // mmu_page_size (64KB)
    0,                          // min_efuse_blk_rev_full (accept all)
    u16::MAX                    // max_efuse_blk_rev_full (accept all)
);

use embassy_executor::Spawner;
use embassy_usb::class::cdc_acm::{CdcAcmClass, State};
use embassy_usb::UsbDevice;
use esp_backtrace as _;
use esp_hal::gpio::{Level, Output, OutputConfig};
use esp_hal::otg_fs::asynch::{Config as UsbDriverConfig, Driver};
use esp_hal::otg_fs::Usb;
use esp_hal::timer::timg::TimerGroup;
use log::LevelFilter;
use static_cell::StaticCell;

use spple_link::ble::{LinkSession, LinkTransport};
use spple_link::session::{HexDisplay, PatternSource, SessionConfig};
use spple_link::tasks::{LedReceiver, LedSender, OutboundReceiver, LED_CHANNEL};
use spple_link::transport::Outbound;
use spple_link::usb::{CdcReader, CdcWriter};
use spple_link::{debug, tasks};

/// Type alias for the BLE controller
type BleController = trouble_host::prelude::ExternalController<
    esp_radio::ble::controller::BleConnector<'static>,
    10,
>;

type UsbDriver = Driver<'static>;

/// Static executor for embassy
static EXECUTOR: StaticCell<esp_rtos::embassy::Executor> = StaticCell::new();

/// Static cell for esp-radio controller (needed for 'static lifetime)
static RADIO_CONTROLLER: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();

/// Queue between the session's transport and the BLE task
static OUTBOUND_CHANNEL: embassy_sync::channel::Channel<
    embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex,
    Outbound,
    { spple_link::transport::OUTBOUND_DEPTH },
> = embassy_sync::channel::Channel::new();

static SESSION: StaticCell<LinkSession> = StaticCell::new();

// USB descriptor and endpoint storage
static EP_OUT_BUFFER: StaticCell<[u8; 1024]> = StaticCell::new();
static CONFIG_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
static BOS_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
static CONTROL_BUF: StaticCell<[u8; 64]> = StaticCell::new();
static DATA_STATE: StaticCell<State<'static>> = StaticCell::new();
static DEBUG_STATE: StaticCell<State<'static>> = StaticCell::new();

#[esp_hal::main]
fn main() -> ! {
    // Initialise heap allocator for BLE support (64KB - BLE requires significant heap)
    esp_alloc::heap_allocator!(size: 64 * 1024);

    let peripherals = esp_hal::init(esp_hal::Config::default());

    debug::init(LevelFilter::Info);

    // LED off until a link comes up (active low)
    let led = Output::new(peripherals.GPIO48, Level::High, OutputConfig::default());

    // Initialise the RTOS scheduler with timer - MUST be done before any async operations
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    // USB OTG with two CDC-ACM ports
    let usb = Usb::new(peripherals.USB0, peripherals.GPIO20, peripherals.GPIO19);
    let driver = Driver::new(usb, EP_OUT_BUFFER.init([0; 1024]), UsbDriverConfig::default());

    let mut usb_config = embassy_usb::Config::new(0x303a, 0x4002);
    usb_config.manufacturer = Some("spple-link");
    usb_config.product = Some("SPPLE serial bridge");
    usb_config.max_power = 100;

    let mut builder = embassy_usb::Builder::new(
        driver,
        usb_config,
        CONFIG_DESCRIPTOR.init([0; 256]),
        BOS_DESCRIPTOR.init([0; 256]),
        &mut [],
        CONTROL_BUF.init([0; 64]),
    );
    let data_class = CdcAcmClass::new(&mut builder, DATA_STATE.init(State::new()), 64);
    let debug_class = CdcAcmClass::new(&mut builder, DEBUG_STATE.init(State::new()), 64);
    let usb_device = builder.build();

    let (data_tx, data_rx) = data_class.split();
    let (debug_tx, _debug_rx) = debug_class.split();

    // Read unique device ID from eFuse MAC address (last 3 bytes)
    let mac = esp_hal::efuse::Efuse::read_base_mac_address();
    let device_id: [u8; 3] = [mac[3], mac[4], mac[5]];

    // Initialise esp-radio for BLE support (must be after esp_rtos::start)
    let radio_controller = RADIO_CONTROLLER.init(
        esp_radio::init().expect("Failed to initialize esp-radio")
    );

    // Create BLE connector (ownership is passed to ExternalController)
    let ble_connector = esp_radio::ble::controller::BleConnector::new(
        radio_controller,
        peripherals.BT,
        esp_radio::ble::Config::default(),
    ).expect("Failed to initialize BLE connector");

    let controller: BleController = trouble_host::prelude::ExternalController::new(ble_connector);

    let session: &'static LinkSession = SESSION.init(LinkSession::new(
        LinkTransport::new(OUTBOUND_CHANNEL.sender()),
        HexDisplay::new(debug::DebugWriter),
        PatternSource::new(),
        SessionConfig::default(),
    ));

    let executor = EXECUTOR.init(esp_rtos::embassy::Executor::new());
    executor.run(|spawner| {
        spawner.must_spawn(async_main(
            spawner,
            usb_device,
            CdcReader::new(data_rx),
            CdcWriter::new(data_tx),
            CdcWriter::new(debug_tx),
            led,
            controller,
            device_id,
            session,
        ));
    })
}

#[allow(clippy::too_many_arguments)]
#[embassy_executor::task]
async fn async_main(
    spawner: Spawner,
    usb_device: UsbDevice<'static, UsbDriver>,
    data_reader: CdcReader<'static, UsbDriver>,
    data_writer: CdcWriter<'static, UsbDriver>,
    debug_writer: CdcWriter<'static, UsbDriver>,
    led: Output<'static>,
    ble_controller: BleController,
    device_id: [u8; 3],
    session: &'static LinkSession,
) {
    spawner.must_spawn(usb_task(usb_device));
    spawner.must_spawn(debug_task(debug_writer));
    spawner.must_spawn(led_task(led, LED_CHANNEL.receiver()));
    spawner.must_spawn(bridge_task(data_reader, data_writer, session));
    spawner.must_spawn(ble_host_task(
        ble_controller,
        device_id,
        session,
        OUTBOUND_CHANNEL.receiver(),
        LED_CHANNEL.sender(),
    ));
}

#[embassy_executor::task]
async fn usb_task(mut usb_device: UsbDevice<'static, UsbDriver>) {
    usb_device.run().await;
}

#[embassy_executor::task]
async fn debug_task(writer: CdcWriter<'static, UsbDriver>) {
    debug::debug_writer_task(writer).await;
}

#[embassy_executor::task]
async fn led_task(led: Output<'static>, receiver: LedReceiver) {
    tasks::led_task(led, receiver).await;
}

/// Task that bridges the CDC data port to the session
#[embassy_executor::task]
async fn bridge_task(
    reader: CdcReader<'static, UsbDriver>,
    writer: CdcWriter<'static, UsbDriver>,
    session: &'static LinkSession,
) {
    tasks::bridge_task(reader, writer, session).await;
}

/// Task that manages BLE connectivity and the data session
#[embassy_executor::task]
async fn ble_host_task(
    controller: BleController,
    device_id: [u8; 3],
    session: &'static LinkSession,
    outbound: OutboundReceiver,
    led: LedSender,
) {
    tasks::ble_task(controller, device_id, session, outbound, led).await;
}
