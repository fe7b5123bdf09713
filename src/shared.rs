//! State shared between interrupt handlers and the main loop.

use portable_atomic::{AtomicBool, Ordering};
use static_cell::StaticCell;

use crate::{
    clock::TickClock,
    events::{Event, EventGroup},
    systems::{bus::SpiBus, protocol::RxQueue},
};

pub struct Shared {
    pub events: EventGroup,
    pub rx: RxQueue,
    pub bus: SpiBus,
    pub clock: TickClock,
    charger_plugged: AtomicBool,
}

impl Shared {
    pub const fn new() -> Self {
        Self {
            events: EventGroup::new(),
            rx: RxQueue::new(),
            bus: SpiBus::new(),
            clock: TickClock::new(),
            charger_plugged: AtomicBool::new(false),
        }
    }

    pub fn init() -> &'static Self {
        static SHARED: StaticCell<Shared> = StaticCell::new();
        SHARED.init(Self::new())
    }

    /// Scheduler timer interrupt. Returns the period of the next tick in ms.
    pub fn on_tick(&self) -> u32 {
        self.clock.on_tick()
    }

    /// Transport receive callback.
    pub fn on_bytes_received(&self, bytes: &[u8]) {
        let accepted = self.rx.push(bytes);
        if accepted < bytes.len() {
            log::warn!("RX queue full, dropped {} bytes", bytes.len() - accepted);
        }
    }

    /// Transport transmit-complete callback.
    pub fn on_tx_complete(&self) {
        self.events.set(Event::NusTxRdy);
    }

    /// USB power detected.
    pub fn on_charger_plugged(&self) {
        self.charger_plugged.store(true, Ordering::Release);
    }

    pub fn take_charger_plugged(&self) -> bool {
        self.charger_plugged.swap(false, Ordering::AcqRel)
    }
}

impl Default for Shared {
    fn default() -> Self {
        Self::new()
    }
}
