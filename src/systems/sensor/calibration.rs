//! Manual calibration: a timed window of readings averaged against the target.

use crate::{
    bsp::Board,
    context::Context,
    events::Event,
    scheduler::{secs, Run, Step, Task, Tcb, TICK_MAX},
    systems::{
        config::{PowerMode, Settings},
        history::record::RecordType,
        protocol::{replies, NusLock},
    },
};

/// Countdown in Low power mode, where samples are further apart.
pub const LOW_POWER_SECS: u16 = 541;
pub const DEFAULT_SECS: u16 = 241;

/// Samples taken while [`Event::Co2CalibTiming`] is set.
#[derive(Debug)]
pub struct Calibration {
    power_mode_before: PowerMode,
    samples: u32,
    sum: u32,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            power_mode_before: PowerMode::Low,
            samples: 0,
            sum: 0,
        }
    }
}

impl Calibration {
    /// Open a window. `power_mode` is restored once the countdown ends.
    pub fn begin(&mut self, power_mode: PowerMode) {
        self.power_mode_before = power_mode;
        self.samples = 0;
        self.sum = 0;
    }

    pub fn add_sample(&mut self, ppm: u16) {
        self.samples += 1;
        self.sum += ppm as u32;
        log::debug!("Calibration sample {} ({} so far)", ppm, self.samples);
    }

    pub fn power_mode_before(&self) -> PowerMode {
        self.power_mode_before
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    pub fn average(&self) -> Option<u16> {
        (self.samples > 0).then(|| (self.sum / self.samples) as u16)
    }
}

/// Close the window and store `cc = target - average`. Returns the change of
/// the correction. Without samples the correction is left alone and its
/// current value is returned.
pub fn finish_calibration<B: Board>(cx: &mut Context<'_, B>) -> i16 {
    let settings = *cx.config.settings();
    let Some(average) = cx.device.calibration.average() else {
        log::warn!("Calibration ended without samples");
        return settings.cc;
    };

    let cc = settings.calib_target as i16 - average as i16;
    log::info!(
        "Calibration average {} over {} samples, correction {} -> {}",
        average,
        cx.device.calibration.samples(),
        settings.cc,
        cc
    );

    cx.config.update(|s| Settings { cc, ..s });
    cx.device.asc.clear_readings();
    cc.wrapping_sub(settings.cc)
}

pub fn update_calibration_target<B: Board>(cx: &mut Context<'_, B>, target: u16) {
    log::info!("Calibration target {}", target);
    cx.config.update(|s| Settings {
        calib_target: target,
        ..s
    });
    cx.device.asc.set_target(target);
    cx.record(RecordType::CalibrationTargetUpdate, target);
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
enum State {
    #[default]
    Wait,
    Announce,
    Countdown,
    Finish,
    Settle,
    Report,
    Record,
    Updated,
}

/// Counts the window down for the app and reports the outcome.
#[derive(Default)]
pub struct CalibrationTask {
    state: State,
    nus: NusLock,
    remaining: u16,
    correction: i16,
    cc: i16,
}

impl Task for CalibrationTask {
    fn restart(&mut self) {
        *self = Self::default();
    }
}

impl<'a, B: Board> Run<Context<'a, B>> for CalibrationTask {
    fn step(&mut self, tcb: &mut Tcb, cx: &mut Context<'a, B>) -> Step {
        loop {
            match self.state {
                State::Wait => {
                    if !tcb.wait(cx.any(Event::Co2CalibTiming), TICK_MAX) {
                        return Step::Yield;
                    }

                    self.remaining = match cx.config.settings().power_mode() {
                        PowerMode::Low => LOW_POWER_SECS,
                        _ => DEFAULT_SECS,
                    };
                    self.correction = 0;
                    self.cc = 0;
                    log::info!("Calibrating for {}s", self.remaining);
                    self.state = State::Announce;
                }
                State::Announce => {
                    if !self.nus.take(tcb, cx.events()) {
                        return Step::Yield;
                    }
                    cx.send(&replies::calibration_started());
                    self.nus.give();
                    self.state = State::Countdown;
                }
                State::Countdown => {
                    if !self.nus.take(tcb, cx.events()) {
                        return Step::Yield;
                    }
                    self.remaining = self.remaining.saturating_sub(1);
                    cx.send(&replies::calibration_countdown(self.remaining));
                    self.nus.give();

                    if self.remaining == 0 {
                        self.state = State::Finish;
                    }
                    return tcb.delay(secs(1));
                }
                State::Finish => {
                    cx.clear(Event::Co2CalibTiming);

                    let mode = cx.device.calibration.power_mode_before();
                    cx.config.update(|s| Settings {
                        power_mode: mode.into(),
                        ..s
                    });
                    cx.set(Event::Co2CalibDone);
                    self.state = State::Settle;
                }
                State::Settle => {
                    if !tcb.wait(!cx.any(Event::Co2UpHis), TICK_MAX) {
                        return Step::Yield;
                    }
                    self.correction = finish_calibration(cx);
                    self.cc = cx.config.settings().cc;
                    self.state = State::Report;
                }
                State::Report => {
                    if !self.nus.take(tcb, cx.events()) {
                        return Step::Yield;
                    }
                    cx.send(&replies::calibration_result(self.correction));
                    self.nus.give();
                    self.state = State::Record;
                    return tcb.delay(secs(3));
                }
                State::Record => {
                    if !tcb.wait(!cx.any(Event::Co2UpHis), TICK_MAX) {
                        return Step::Yield;
                    }
                    cx.record(RecordType::CalibrationCorrection, self.cc as u16);
                    self.state = State::Updated;
                }
                State::Updated => {
                    if !tcb.wait(cx.any(Event::UiUpCo2), TICK_MAX) {
                        return Step::Yield;
                    }
                    cx.clear(Event::Co2CalibDone);
                    log::info!("Calibration done, correction {}", self.cc);
                    self.state = State::Wait;
                }
            }
        }
    }
}
