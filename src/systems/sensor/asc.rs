//! Automatic self calibration.
//!
//! Tracks the lowest three-reading average over a week and moves the
//! calibration correction so that the lowest level reads as the target.

use crate::{
    bsp::Board,
    context::Context,
    events::Event,
    systems::{config::Settings, history::record::RecordType},
    util::window::Window,
};

/// Lowest plausible outdoor level. A lower average is corrected right away.
pub const FLOOR: u16 = 420;

/// Days per adjustment period.
pub const DAYS: u8 = 7;

/// Readings a day needs before a daily check counts it.
pub const RECORDS_PER_DAY: u16 = 400;

const LOWEST_START: u16 = 10_000;

/// End of an adjustment period.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Weekly {
    pub target: u16,
    pub lowest: u16,
    pub adjustment: i16,
}

#[derive(Debug)]
pub struct Asc {
    enabled: bool,
    readings: Window<3>,
    lowest3: u16,
    day_count: u8,
    day_record_count: u16,
    target: u16,
}

impl Default for Asc {
    fn default() -> Self {
        Self::new(false, Settings::default().calib_target)
    }
}

impl Asc {
    pub fn new(enabled: bool, target: u16) -> Self {
        Self {
            enabled,
            readings: Window::new(),
            lowest3: LOWEST_START,
            day_count: 0,
            day_record_count: 0,
            target,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Enabling starts a fresh period.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if enabled {
            self.reset();
        }
    }

    pub fn reset(&mut self) {
        self.readings.clear();
        self.lowest3 = LOWEST_START;
        self.day_count = 0;
        self.day_record_count = 0;
    }

    pub fn set_target(&mut self, target: u16) {
        self.target = target;
    }

    /// Forget the averaging window, e.g. after the correction changed.
    pub fn clear_readings(&mut self) {
        self.readings.clear();
    }

    pub fn day_count(&self) -> u8 {
        self.day_count
    }

    pub fn lowest(&self) -> u16 {
        self.lowest3
    }

    /// Feed one corrected reading. Returns an immediate correction when the
    /// lowest average fell below [`FLOOR`]; none is applied in flight mode.
    pub fn process(&mut self, reading: u16, flight_mode: bool) -> Option<i16> {
        if !self.enabled {
            return None;
        }

        self.day_record_count = self.day_record_count.saturating_add(1);
        self.readings.write(reading);
        if !self.readings.is_full() {
            return None;
        }

        let average = self.readings.mean();
        if average < self.lowest3 {
            log::debug!("ASC lowest average {}", average);
            self.lowest3 = average;
        }

        if self.lowest3 < FLOOR && !flight_mode {
            let adjustment = (FLOOR - self.lowest3) as i16;
            log::info!("ASC low level adjustment {}", adjustment);
            self.lowest3 = FLOOR;
            return Some(adjustment);
        }

        None
    }

    /// Count a day. With `check_count` a day only counts once it saw
    /// [`RECORDS_PER_DAY`] readings. Every [`DAYS`] days the period closes and
    /// the weekly adjustment is returned; the next period aims at `next_target`.
    pub fn daily_update(&mut self, check_count: bool, next_target: u16) -> Option<Weekly> {
        if !self.enabled || (check_count && self.day_record_count < RECORDS_PER_DAY) {
            return None;
        }

        self.day_count += 1;
        self.day_record_count = 0;
        log::info!("ASC day {}, lowest {}", self.day_count, self.lowest3);

        if self.day_count < DAYS {
            return None;
        }

        let weekly = Weekly {
            target: self.target,
            lowest: self.lowest3,
            adjustment: self.target as i16 - self.lowest3 as i16,
        };

        self.reset();
        self.target = next_target;
        Some(weekly)
    }
}

/// Apply a low level adjustment from [`Asc::process`].
pub fn apply_adjustment<B: Board>(cx: &mut Context<'_, B>, adjustment: i16) {
    cx.config.update(|s| Settings {
        cc: s.cc.wrapping_add(adjustment),
        ..s
    });
    cx.record(RecordType::AscAdjustment, adjustment as u16);
}

/// Count a day of self calibration and close the period when it is due.
pub fn run_daily_check<B: Board>(cx: &mut Context<'_, B>, check_count: bool) {
    let target = cx.config.settings().calib_target;
    let Some(weekly) = cx.device.asc.daily_update(check_count, target) else {
        return;
    };

    let old = cx.config.settings().cc;
    let new = old.wrapping_add(weekly.adjustment);
    log::info!("Weekly ASC adjustment {}, correction {} -> {}", weekly.adjustment, old, new);

    cx.record(RecordType::CalibTarget, weekly.target);
    cx.record(RecordType::AscLowest, weekly.lowest);
    cx.record(RecordType::CalibrationCorrectionOld, old as u16);
    cx.record(RecordType::CalibrationCorrection, new as u16);
    cx.config.update(|s| Settings { cc: new, ..s });
    cx.set(Event::Co2UpHis);
}

/// Switch self calibration on or off. The read task reprograms the sensor.
pub fn set_self_calibration<B: Board>(cx: &mut Context<'_, B>, enable: bool) {
    cx.set(Event::Co2CalibModeChange);
    cx.config.update(|s| Settings {
        auto_calibrate: enable as u8,
        ..s
    });
    cx.record(RecordType::SensorAutoCalibration, enable as u16);
    cx.set(Event::Co2UpHis);
    cx.device.asc.set_enabled(enable);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;

    #[test]
    fn needs_three_readings() {
        let mut asc = Asc::new(true, 426);
        assert_eq!(asc.process(400, false), None);
        assert_eq!(asc.process(400, false), None);
        assert_eq!(asc.lowest(), LOWEST_START);

        assert_eq!(asc.process(400, false), Some(20));
        assert_eq!(asc.lowest(), FLOOR);
    }

    #[test]
    fn floor_is_skipped_in_flight_mode() {
        let mut asc = Asc::new(true, 426);
        for _ in 0..3 {
            assert_eq!(asc.process(300, true), None);
        }
        assert_eq!(asc.lowest(), 300);
    }

    #[test]
    fn disabled_ignores_readings() {
        let mut asc = Asc::new(false, 426);
        for _ in 0..5 {
            assert_eq!(asc.process(300, false), None);
        }
        assert_eq!(asc.daily_update(false, 426), None);
        assert_eq!(asc.day_count(), 0);
    }

    #[test]
    fn weekly_adjustment() {
        let mut asc = Asc::new(true, 426);
        for value in [500, 520, 540, 600] {
            asc.process(value, false);
        }
        assert_eq!(asc.lowest(), 520);

        for day in 1..DAYS {
            assert_eq!(asc.daily_update(false, 430), None);
            assert_eq!(asc.day_count(), day);
        }

        let weekly = asc.daily_update(false, 430).unwrap();
        assert_eq!(
            weekly,
            Weekly {
                target: 426,
                lowest: 520,
                adjustment: -94
            }
        );
        assert_eq!(asc.day_count(), 0);
        assert_eq!(asc.lowest(), LOWEST_START);
    }

    #[test]
    fn daily_check_needs_enough_readings() {
        let mut asc = Asc::new(true, 426);
        for _ in 0..RECORDS_PER_DAY - 1 {
            asc.process(600, false);
        }
        assert_eq!(asc.daily_update(true, 426), None);
        assert_eq!(asc.day_count(), 0);

        asc.process(600, false);
        assert_eq!(asc.daily_update(true, 426), None);
        assert_eq!(asc.day_count(), 1);
    }

    #[test]
    fn week_end_updates_the_correction() {
        let mut h = Harness::new();
        h.config.update(|s| Settings { cc: 10, ..s });
        h.device.asc.set_enabled(true);
        for _ in 0..3 {
            h.device.asc.process(500, false);
        }

        for _ in 0..DAYS {
            run_daily_check(&mut h.context(), false);
        }
        h.flush();

        assert_eq!(h.config.settings().cc, 10 - 74);
        let kinds: Vec<_> = h.records.iter().map(|r| (r.kind, r.value)).collect();
        assert_eq!(
            kinds,
            vec![
                (RecordType::CalibTarget.into(), 426),
                (RecordType::AscLowest.into(), 500),
                (RecordType::CalibrationCorrectionOld.into(), 10),
                (RecordType::CalibrationCorrection.into(), (10i16 - 74) as u16),
            ]
        );
    }

    #[test]
    fn enabling_persists_and_asks_for_a_sensor_update() {
        let mut h = Harness::new();
        set_self_calibration(&mut h.context(), true);

        assert_eq!(h.config.settings().auto_calibrate, 1);
        assert!(h.device.asc.is_enabled());
        assert!(h.shared.events.all(Event::Co2CalibModeChange | Event::Co2UpHis));
        h.flush();
        assert_eq!(h.records[0].kind, u8::from(RecordType::SensorAutoCalibration));
        assert_eq!(h.records[0].value, 1);
    }
}
