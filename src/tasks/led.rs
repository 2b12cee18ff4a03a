//! Link status LED
//!
//! Solid while a link is active, dark while advertising, with a short
//! blink for every burst of received data. The LED is active low.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use embassy_time::{Duration, Timer};
use esp_hal::gpio::Output;

/// Length of the traffic blink in milliseconds
const BLINK_MS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedEvent {
    Connected,
    Disconnected,
    Traffic,
}

/// Type alias for the LED event channel sender
pub type LedSender = Sender<'static, CriticalSectionRawMutex, LedEvent, 4>;

/// Type alias for the LED event channel receiver
pub type LedReceiver = Receiver<'static, CriticalSectionRawMutex, LedEvent, 4>;

/// Channel for LED events
pub static LED_CHANNEL: Channel<CriticalSectionRawMutex, LedEvent, 4> = Channel::new();

pub async fn led_task(mut led: Output<'static>, receiver: LedReceiver) {
    let mut linked = false;
    led.set_high();

    loop {
        match receiver.receive().await {
            LedEvent::Connected => {
                linked = true;
                led.set_low();
            }
            LedEvent::Disconnected => {
                linked = false;
                led.set_high();
            }
            // Blink inverts the steady state
            LedEvent::Traffic => {
                led.toggle();
                Timer::after(Duration::from_millis(BLINK_MS)).await;
                if linked {
                    led.set_low();
                } else {
                    led.set_high();
                }
            }
        }
    }
}
