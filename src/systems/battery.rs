//! Battery sampling and the low battery mode.

use crate::{
    bsp::{BatteryGauge, Board, Transport},
    context::Context,
    events::Event,
    scheduler::{ms, Run, Step, Task, Tcb, TICK_MAX},
    systems::{
        config::Settings,
        history::record::RecordType,
        protocol::{replies, NusLock},
    },
    util::Millivolts,
};

pub const FULL_MV: u16 = 4100;
/// Below this the device enters low battery mode.
pub const LOW_MV: u16 = 3400;
/// Above this a low battery counts as recovered.
pub const RECOVER_MV: u16 = 3710;

#[derive(Debug, Default)]
pub struct BatteryState {
    pub millivolts: Millivolts,
    /// Percent.
    pub level: u8,
    pub charging: bool,
}

impl BatteryState {
    pub fn level_for(mv: Millivolts) -> u8 {
        let level = 100 * (mv.0 as i32 - LOW_MV as i32) / (FULL_MV - LOW_MV) as i32;
        level.clamp(0, 100) as u8
    }

    pub fn update(&mut self, mv: Millivolts, charging: bool) {
        self.millivolts = mv;
        self.level = Self::level_for(mv);
        self.charging = charging;
    }
}

/// Switch to the slow tick and stop advertising until the battery recovers.
pub fn enter_low_mode<B: Board>(cx: &mut Context<'_, B>) {
    if cx.battery_low() {
        return;
    }

    let mv = cx.device.battery.millivolts;
    log::warn!("Battery low at {:?}, entering low power mode", mv);

    cx.clear(Event::ScreenForceOn | Event::Charging);
    cx.set(Event::BatLowWarning | Event::ScreenOnOnetime);
    cx.record(RecordType::BatteryLow, mv.0);

    if cx.config.settings().flight_mode() {
        cx.config.update(|s| Settings {
            flight_mode: 0,
            ..s
        });
        let now = cx.now();
        cx.device.housekeeping.update_flight_mode_activation(now, false);
        cx.record(RecordType::FlightMode, 0);
    }

    cx.set(Event::Co2UpHis);
    cx.board.transport().stop_advertising();
    cx.shared.clock.set_slow_mode(true);
    cx.device.connection.cancel();
}

/// Back to normal operation. The tasks stopped by the low battery are
/// restarted by the app. Returns whether low mode was active.
pub fn exit_low_mode<B: Board>(cx: &mut Context<'_, B>) -> bool {
    if !cx.battery_low() {
        return false;
    }

    log::info!("Leaving low power mode");
    cx.shared.clock.set_slow_mode(false);
    cx.board.transport().start_advertising();
    cx.clear(Event::BatLow | Event::BatLowWarning);
    cx.device.restart_requested = true;
    true
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
enum State {
    #[default]
    Start,
    Wait,
    /// Push the level to the app, then optionally enter low mode.
    Report { enter_low: bool, update: bool },
}

#[derive(Default)]
pub struct BatteryTask {
    state: State,
    nus: NusLock,
    plugged: bool,
}

impl BatteryTask {
    /// Sample and decide what to tell the app.
    fn evaluate<B: Board>(&mut self, cx: &mut Context<'_, B>) -> Option<State> {
        let battery = cx.board.battery();
        let mv = battery.sample();
        let charging = battery.is_charging();
        cx.device.battery.update(mv, charging);
        log::debug!("Battery {:?} ({}%), charging {}", mv, cx.device.battery.level, charging);

        if core::mem::take(&mut self.plugged) {
            log::info!("Charger connected");
            cx.set(Event::Charging);
            if exit_low_mode(cx) {
                return Some(State::Report {
                    enter_low: false,
                    update: false,
                });
            }
        }

        if !charging {
            if mv.0 < LOW_MV && !cx.battery_low() {
                return Some(State::Report {
                    enter_low: true,
                    update: false,
                });
            }
            if cx.any(Event::BatLow) && mv.0 > RECOVER_MV {
                exit_low_mode(cx);
                return Some(State::Report {
                    enter_low: false,
                    update: false,
                });
            }
        }

        if cx.battery_low() {
            return None;
        }
        Some(State::Report {
            enter_low: false,
            update: true,
        })
    }
}

impl Task for BatteryTask {
    fn restart(&mut self) {
        *self = Self::default();
    }
}

impl<'a, B: Board> Run<Context<'a, B>> for BatteryTask {
    fn step(&mut self, tcb: &mut Tcb, cx: &mut Context<'a, B>) -> Step {
        loop {
            match self.state {
                State::Start => {
                    self.state = State::Wait;
                    return tcb.delay(ms(100));
                }
                State::Wait => {
                    self.plugged |= cx.shared.take_charger_plugged();
                    if !tcb.wait(self.plugged || cx.any(Event::BatteryAdcEn), TICK_MAX) {
                        return Step::Yield;
                    }

                    cx.clear(Event::BatteryAdcEn);
                    match self.evaluate(cx) {
                        Some(next) => self.state = next,
                        None => return Step::Yield,
                    }
                }
                State::Report { enter_low, update } => {
                    if !self.nus.take(tcb, cx.events()) {
                        return Step::Yield;
                    }
                    let battery = &cx.device.battery;
                    let frame = replies::battery(battery.level, battery.charging);
                    cx.send(&frame);
                    self.nus.give();

                    if enter_low {
                        enter_low_mode(cx);
                    }
                    if update {
                        cx.set(Event::BatUpdate);
                    }
                    self.state = State::Wait;
                }
            }
        }
    }
}
