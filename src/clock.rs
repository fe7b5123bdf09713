//! Time keeping: the scheduler tick clock, the wall clock and the per-second
//! housekeeping schedule.

use portable_atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

use crate::scheduler::{SLOW_TICK_MS, TICK_MS};

const MODE_UNCHANGED: u8 = 0;
const MODE_NORMAL: u8 = 1;
const MODE_SLOW: u8 = 2;

/// Counts scheduler ticks in interrupt context and hands them to the main loop.
///
/// The interrupt handler only touches atomics; the main loop drains the
/// pending ticks and seconds with [`TickClock::take_ticks`] and
/// [`TickClock::take_seconds`].
pub struct TickClock {
    pending_ticks: AtomicU32,
    pending_secs: AtomicU32,
    subsecond_ms: AtomicU32,
    uptime_ms: AtomicU64,
    slow: AtomicBool,
    requested: AtomicU8,
}

impl TickClock {
    pub const fn new() -> Self {
        Self {
            pending_ticks: AtomicU32::new(0),
            pending_secs: AtomicU32::new(0),
            subsecond_ms: AtomicU32::new(0),
            uptime_ms: AtomicU64::new(0),
            slow: AtomicBool::new(false),
            requested: AtomicU8::new(MODE_UNCHANGED),
        }
    }

    /// Account for one elapsed tick. Returns the period in milliseconds the
    /// board timer should use for the next tick.
    pub fn on_tick(&self) -> u32 {
        let period = self.period_ms();

        self.uptime_ms.fetch_add(period as u64, Ordering::AcqRel);
        self.pending_ticks.fetch_add(1, Ordering::AcqRel);

        let subsecond = self.subsecond_ms.load(Ordering::Acquire) + period;
        if subsecond >= 1000 {
            self.subsecond_ms.store(0, Ordering::Release);
            self.pending_secs.fetch_add(1, Ordering::AcqRel);
        } else {
            self.subsecond_ms.store(subsecond, Ordering::Release);
        }

        match self.requested.swap(MODE_UNCHANGED, Ordering::AcqRel) {
            MODE_SLOW => self.slow.store(true, Ordering::Release),
            MODE_NORMAL => self.slow.store(false, Ordering::Release),
            _ => {}
        }

        self.period_ms()
    }

    /// Request a tick rate change, applied at the next tick.
    pub fn set_slow_mode(&self, slow: bool) {
        let mode = if slow { MODE_SLOW } else { MODE_NORMAL };
        self.requested.store(mode, Ordering::Release);
    }

    pub fn is_slow(&self) -> bool {
        self.slow.load(Ordering::Acquire)
    }

    pub fn period_ms(&self) -> u32 {
        if self.is_slow() {
            SLOW_TICK_MS
        } else {
            TICK_MS
        }
    }

    pub fn uptime_ms(&self) -> u64 {
        self.uptime_ms.load(Ordering::Acquire)
    }

    pub fn take_ticks(&self) -> u32 {
        self.pending_ticks.swap(0, Ordering::AcqRel)
    }

    pub fn take_seconds(&self) -> u32 {
        self.pending_secs.swap(0, Ordering::AcqRel)
    }
}

impl Default for TickClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Drift added per elapsed second; one extra second is inserted once it
/// reaches [`DRIFT_LIMIT`].
pub const DRIFT_PER_SECOND: u32 = 960;
pub const DRIFT_LIMIT: u32 = 1_000_000;

/// Seconds since 2000-01-01 00:00:00, as set by the app.
#[derive(Debug, Default)]
pub struct WallClock {
    time_base: u32,
    time_set: bool,
    drift: u32,
}

impl WallClock {
    pub const fn new() -> Self {
        Self {
            time_base: 0,
            time_set: false,
            drift: 0,
        }
    }

    pub fn now(&self) -> u32 {
        self.time_base
    }

    pub fn is_set(&self) -> bool {
        self.time_set
    }

    pub fn mark_set(&mut self) {
        self.time_set = true;
    }

    pub fn set(&mut self, time: u32) {
        self.time_base = time;
    }

    pub fn inc_second(&mut self) {
        self.time_base = self.time_base.wrapping_add(1);
    }

    /// Account one real second of drift. Returns `true` when an extra
    /// correction second is due.
    pub fn accumulate_drift(&mut self) -> bool {
        self.drift += DRIFT_PER_SECOND;
        if self.drift >= DRIFT_LIMIT {
            log::debug!("Drift correction applied");
            self.drift = 0;
            return true;
        }
        false
    }

    pub fn hour(&self) -> u8 {
        ((self.time_base / 60 / 60) % 24) as u8
    }

    pub fn minute(&self) -> u8 {
        ((self.time_base / 60) % 60) as u8
    }

    pub fn is_minute_boundary(&self) -> bool {
        self.time_base % 60 == 0
    }
}

/// Flight mode switches itself off after this many seconds.
pub const FLIGHT_MODE_DURATION: u32 = 12 * 60 * 60;

/// Kind of ASC check that fell due this second.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AscCheck {
    /// The 23:59 wall clock check.
    Daily,
    /// The check driven by a non-zero check duration.
    Periodic,
}

/// Runtime schedule for the once-per-second checks. Not persisted.
#[derive(Debug, Default)]
pub struct Housekeeping {
    asc_check_duration: u16,
    last_asc_check: u32,
    flight_mode_since: u32,
}

impl Housekeeping {
    pub const fn new() -> Self {
        Self {
            asc_check_duration: 0,
            last_asc_check: 0,
            flight_mode_since: 0,
        }
    }

    pub fn set_asc_check_duration(&mut self, secs: u16) {
        log::info!("ASC check duration set to {}s", secs);
        self.asc_check_duration = secs;
    }

    pub fn asc_check_duration(&self) -> u16 {
        self.asc_check_duration
    }

    /// Track when flight mode was switched on, or forget it when switched off.
    pub fn update_flight_mode_activation(&mut self, now: u32, enabled: bool) {
        if enabled {
            log::info!("Flight mode activated at {}", now);
            self.flight_mode_since = now;
        } else {
            log::info!("Flight mode deactivated");
            self.flight_mode_since = 0;
        }
    }

    pub fn flight_mode_expired(&self, now: u32, enabled: bool) -> bool {
        enabled
            && self.flight_mode_since != 0
            && now.wrapping_sub(self.flight_mode_since) >= FLIGHT_MODE_DURATION
    }

    /// Decide whether an ASC check is due at the clock's current second.
    pub fn asc_due(&mut self, clock: &WallClock, on_demand: bool) -> Option<AscCheck> {
        let now = clock.now();

        if self.asc_check_duration == 0 {
            if clock.is_set()
                && clock.hour() == 23
                && clock.minute() == 59
                && now.wrapping_sub(self.last_asc_check) >= 60
            {
                self.last_asc_check = now;
                return Some(AscCheck::Daily);
            }
            return None;
        }

        let duration = self.asc_check_duration as u32;
        if now % duration == 0 && !on_demand && now.wrapping_sub(self.last_asc_check) >= duration {
            log::debug!("ASC check at {} (every {}s)", now, duration);
            self.last_asc_check = now;
            return Some(AscCheck::Periodic);
        }

        None
    }
}
