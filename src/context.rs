//! What a task step gets to work with.

use crate::{
    bsp::{Board, Transport},
    clock::{Housekeeping, WallClock},
    events::{EventGroup, Events},
    shared::Shared,
    systems::{
        battery::BatteryState,
        config::Config,
        history::{record::RecordType, History},
        protocol::TxFrame,
        sensor::{asc::Asc, calibration::Calibration, Co2State},
    },
    util::hexdump,
};

/// Seconds the fast connection interval is kept after the last history request.
pub const FAST_CONNECTION_SECS: u16 = 30;

/// Connection interval bookkeeping for history uploads.
#[derive(Debug, Default)]
pub struct FastConnection {
    enabled: bool,
    remaining: u16,
}

impl FastConnection {
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Keep the fast interval for another [`FAST_CONNECTION_SECS`].
    pub fn extend(&mut self) {
        self.remaining = FAST_CONNECTION_SECS;
    }

    /// Flip the interval unless a fast period is still running. Returns the new
    /// setting if it changed.
    pub fn toggle(&mut self) -> Option<bool> {
        if self.remaining > 0 {
            return None;
        }

        self.enabled = !self.enabled;
        self.remaining = if self.enabled { FAST_CONNECTION_SECS } else { 0 };
        Some(self.enabled)
    }

    /// One second passed. Returns the new setting when the fast period ran out.
    pub fn on_second(&mut self) -> Option<bool> {
        if self.remaining == 0 {
            return None;
        }

        self.remaining -= 1;
        if self.remaining == 0 {
            return self.toggle();
        }
        None
    }

    pub fn cancel(&mut self) {
        self.enabled = false;
        self.remaining = 0;
    }
}

/// Runtime device state that is not persisted.
#[derive(Debug, Default)]
pub struct Device {
    pub clock: WallClock,
    pub housekeeping: Housekeeping,
    pub co2: Co2State,
    pub asc: Asc,
    pub calibration: Calibration,
    pub battery: BatteryState,
    pub connection: FastConnection,
    /// Low battery mode was left; the measuring tasks start over.
    pub restart_requested: bool,
}

impl Device {
    pub fn new(asc_enabled: bool, calib_target: u16) -> Self {
        Self {
            asc: Asc::new(asc_enabled, calib_target),
            ..Default::default()
        }
    }
}

pub struct Context<'a, B: Board> {
    pub shared: &'static Shared,
    pub board: &'a mut B,
    pub config: &'a mut Config<B::ConfigFlash>,
    pub history: &'a mut History,
    pub device: &'a mut Device,
}

impl<'a, B: Board> Context<'a, B> {
    pub fn events(&self) -> &'static EventGroup {
        &self.shared.events
    }

    pub fn any(&self, events: impl Into<Events>) -> bool {
        self.shared.events.any(events)
    }

    pub fn set(&self, events: impl Into<Events>) {
        self.shared.events.set(events);
    }

    pub fn clear(&self, events: impl Into<Events>) {
        self.shared.events.clear(events);
    }

    pub fn now(&self) -> u32 {
        self.device.clock.now()
    }

    pub fn battery_low(&self) -> bool {
        self.any(Events::BATTERY_LOW)
    }

    /// Queue a history record stamped with the current time.
    pub fn record(&mut self, kind: RecordType, value: u16) {
        let now = self.device.clock.now();
        self.history.add_record(now, value, kind);
    }

    /// Put `frame` on the link. The caller holds the NUS lock.
    ///
    /// Returns whether the transport accepted it; a transmit-complete event
    /// only follows for accepted frames.
    pub fn send(&mut self, frame: &TxFrame) -> bool {
        log::debug!("TX {}", hexdump(frame.as_bytes()));

        match self.board.transport().transmit(frame.as_bytes()) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Frame {:#04x} not sent: {:?}", frame.command(), e);
                false
            }
        }
    }

    /// Apply a connection interval change to the transport.
    pub fn set_fast_connection(&mut self, fast: Option<bool>) {
        if let Some(fast) = fast {
            log::info!("Connection interval {}", if fast { "fast" } else { "slow" });
            self.board.transport().set_fast_connection(fast);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_connection_times_out() {
        let mut conn = FastConnection::default();

        assert_eq!(conn.toggle(), Some(true));
        assert_eq!(conn.toggle(), None, "fast period still running");

        for _ in 1..FAST_CONNECTION_SECS {
            assert_eq!(conn.on_second(), None);
        }
        assert_eq!(conn.on_second(), Some(false));
        assert!(!conn.is_enabled());
        assert_eq!(conn.on_second(), None);
    }

    #[test]
    fn history_requests_keep_it_fast() {
        let mut conn = FastConnection::default();
        conn.toggle();

        for _ in 0..100 {
            conn.extend();
            assert_eq!(conn.on_second(), None);
        }
        assert!(conn.is_enabled());
    }
}
