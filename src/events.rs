//! Process-wide event flags shared by every task and interrupt handler.
//!
//! Flags are level-triggered: once set they stay set until a task clears them.

use core::ops::{BitOr, BitOrAssign};

use num_enum::{IntoPrimitive, TryFromPrimitive};
use portable_atomic::{AtomicU64, Ordering};

/// A single named flag. The discriminant is its bit position and never changes.
#[derive(Clone, Copy, PartialEq, Eq, Debug, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Event {
    BtnPress = 0,
    BtnPress2T = 1,
    BtnPress2S = 2,
    UiUpCo2 = 3,
    NusTxRdy = 4,
    Co2CalibTiming = 5,
    Co2UpAlarm = 6,
    BatUpdate = 7,
    Co2UpdateOnce = 8,
    Co2UpHis = 9,
    TimebaseUp = 10,
    RequestHistory = 11,
    NusTaken = 12,
    ShowPasskey = 13,
    CancelShowPasskey = 14,
    ScreenForceOn = 15,
    Charging = 16,
    TimeUpdate = 17,
    ScreenOnOnetime = 18,
    FindDevice = 19,
    Co2CalibModeChange = 20,
    PopulateFakeData = 21,
    FastConn = 22,
    UiUpBle = 23,
    Co2CalibStart = 24,
    UiBlink = 25,
    Co2CalibDone = 26,
    BatLow = 27,
    BtnDown = 28,
    UiOffScreen = 29,
    BatteryAdcEn = 30,
    Co2SensorError = 31,
    DeviceSleep = 32,
    Co2FactoryReset = 33,
    StopAdvertising = 34,
    ToggleUiMode = 35,
    BatLowWarning = 36,
    UiGraphUpdate = 37,
    GetSensorDetails = 38,
    FlightModeUpdate = 39,
}

impl Event {
    pub const fn mask(self) -> u64 {
        1u64 << (self as u8)
    }
}

/// A set of [`Event`]s.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Events(u64);

impl Events {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn with(self, event: Event) -> Self {
        Self(self.0 | event.mask())
    }

    pub const fn contains(self, event: Event) -> bool {
        self.0 & event.mask() != 0
    }

    pub const fn intersects(self, other: Events) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Anything the display reacts to.
    pub const UI_UPDATE: Events = Events::empty()
        .with(Event::UiBlink)
        .with(Event::UiUpCo2)
        .with(Event::BatUpdate)
        .with(Event::TimeUpdate)
        .with(Event::UiUpBle)
        .with(Event::UiOffScreen)
        .with(Event::Co2CalibModeChange)
        .with(Event::ToggleUiMode)
        .with(Event::BatLow)
        .with(Event::BatLowWarning)
        .with(Event::UiGraphUpdate)
        .with(Event::FlightModeUpdate);

    /// Wakes the CO2 task out of its power-mode wait.
    pub const CO2_UPDATE: Events = Events::empty()
        .with(Event::Co2UpdateOnce)
        .with(Event::Co2CalibDone)
        .with(Event::Co2CalibStart)
        .with(Event::BatLow)
        .with(Event::BatLowWarning)
        .with(Event::Co2FactoryReset)
        .with(Event::GetSensorDetails);

    /// Ends a continuous measurement run early.
    pub const CO2_MEASUREMENT_BREAK: Events = Events::empty()
        .with(Event::BatLow)
        .with(Event::BatLowWarning)
        .with(Event::Co2CalibStart)
        .with(Event::Co2CalibDone)
        .with(Event::Co2FactoryReset)
        .with(Event::Co2CalibModeChange)
        .with(Event::GetSensorDetails);

    pub const BATTERY_LOW: Events = Events::empty()
        .with(Event::BatLow)
        .with(Event::BatLowWarning);
}

impl From<Event> for Events {
    fn from(value: Event) -> Self {
        Events(value.mask())
    }
}

impl BitOr for Event {
    type Output = Events;

    fn bitor(self, rhs: Self) -> Events {
        Events(self.mask() | rhs.mask())
    }
}

impl BitOr<Event> for Events {
    type Output = Events;

    fn bitor(self, rhs: Event) -> Events {
        self.with(rhs)
    }
}

impl BitOr for Events {
    type Output = Events;

    fn bitor(self, rhs: Events) -> Events {
        Events(self.0 | rhs.0)
    }
}

impl BitOrAssign<Event> for Events {
    fn bitor_assign(&mut self, rhs: Event) {
        *self = self.with(rhs);
    }
}

impl core::fmt::Debug for Events {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut list = f.debug_set();
        for bit in 0..64u8 {
            if self.0 & (1 << bit) != 0 {
                match Event::try_from(bit) {
                    Ok(event) => list.entry(&event),
                    Err(_) => list.entry(&bit),
                };
            }
        }
        list.finish()
    }
}

/// The shared flag word. Every mutation is a single atomic read-modify-write,
/// so interrupt handlers and tasks may touch it concurrently.
pub struct EventGroup(AtomicU64);

impl EventGroup {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn set(&self, events: impl Into<Events>) {
        self.0.fetch_or(events.into().bits(), Ordering::AcqRel);
    }

    pub fn clear(&self, events: impl Into<Events>) {
        self.0.fetch_and(!events.into().bits(), Ordering::AcqRel);
    }

    /// True if any of `events` is set.
    pub fn any(&self, events: impl Into<Events>) -> bool {
        self.snapshot().intersects(events.into())
    }

    /// True if all of `events` are set.
    pub fn all(&self, events: impl Into<Events>) -> bool {
        let events = events.into();
        self.snapshot().bits() & events.bits() == events.bits()
    }

    /// Sets `event` and reports whether this call was the one that set it.
    pub fn try_set(&self, event: Event) -> bool {
        self.0.fetch_or(event.mask(), Ordering::AcqRel) & event.mask() == 0
    }

    pub fn snapshot(&self) -> Events {
        Events(self.0.load(Ordering::Acquire))
    }
}

impl Default for EventGroup {
    fn default() -> Self {
        Self::new()
    }
}
