//! The CO2 read task: powers the sensor, samples it per power mode and
//! publishes corrected readings.

use crate::{
    bsp::{Board, Co2Sensor, SensorDetails},
    context::Context,
    events::{Event, Events},
    scheduler::{ms, secs, Run, Step, Task, Tcb, Ticks, TICK_MAX},
    serialnumber::SerialNumber,
    systems::{
        config::{PowerMode, Settings},
        history::record::RecordType,
        protocol::{replies, NusLock},
    },
};

use super::{
    asc::apply_adjustment, scaled, SensorError, MAX_PPM, VARIANT_FALLBACK,
};

const MID_PERIOD_MS: u64 = 60_000;
const LOW_PERIOD_MS: u64 = 180_000;

/// Marker stored as the error code right before a sensor triggered reboot.
pub const RESTART_MARKER: u16 = 0xFF;

/// Work that runs once earlier records reached the storage task.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Pending {
    CalibrationStart,
    CalibrationSample(u16),
    Retry(u16),
    Reading(u16),
    FactoryReset,
    Error,
    Restart,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
enum State {
    #[default]
    PowerUp,
    Init,
    Boot,
    StopIdle,
    Configure,
    DisableAsc,
    Loop,
    Details,
    DetailsReply,
    Reprogram,
    ReprogramSettle,
    FactoryResetReply,
    Start,
    Measure,
    Sample,
    Flush(Pending),
    Publish,
    AfterSample,
    Stop,
    Wait(PowerMode),
    BatteryReport,
    Error,
    Strike,
    Reset,
}

#[derive(Default)]
pub struct ReadTask {
    state: State,
    nus: NusLock,
    /// Set once the first configuration went through; later power ups only
    /// redo the minimum.
    booted: bool,
    started_ms: u64,
    error: Option<SensorError>,
    details: SensorDetails,
}

impl ReadTask {
    fn fail(&mut self, error: SensorError) {
        log::warn!("CO2 sensor error {:?} ({:#04x})", error, u8::from(error));
        self.error = Some(error);
        self.state = State::Error;
    }

    /// Ticks left of a power mode period that started with the last measurement.
    fn remaining<B: Board>(&self, cx: &Context<'_, B>, period_ms: u64) -> Ticks {
        let elapsed = cx.shared.clock.uptime_ms().saturating_sub(self.started_ms);
        ms(period_ms.saturating_sub(elapsed) as u32)
    }

    fn sample<B: Board>(&mut self, cx: &mut Context<'_, B>) {
        let sensor = cx.board.sensor();
        match sensor.data_ready() {
            Ok(true) => {}
            Ok(false) => return self.fail(SensorError::DataStatus),
            Err(fault) => return self.fail(SensorError::from_fault(fault, SensorError::DataStatus)),
        }

        let measurement = match sensor.read() {
            Ok(measurement) => measurement,
            Err(nb::Error::WouldBlock) => return self.fail(SensorError::DataStatus),
            Err(nb::Error::Other(fault)) => {
                return self.fail(SensorError::from_fault(fault, SensorError::Read))
            }
        };
        if measurement.status != 0 {
            log::warn!("Sensor flagged the sample: {:#x}", measurement.status);
            return self.fail(SensorError::DataStatus);
        }

        let settings = *cx.config.settings();
        let ppm = scaled(measurement.co2, &settings);
        log::debug!("Raw {} ppm, scaled {} ppm", measurement.co2, ppm);
        if ppm > MAX_PPM as u32 {
            return self.fail(SensorError::InvalidReading);
        }
        let ppm = ppm as u16;

        if cx.any(Event::Co2CalibTiming) {
            cx.device.calibration.add_sample(ppm);
            self.state = State::Flush(Pending::CalibrationSample(ppm));
            return;
        }

        let co2 = &mut cx.device.co2;
        if co2.is_jump(ppm) && co2.stable {
            log::info!("Unstable reading {} after {}, measuring again", ppm, co2.previous);
            co2.stable = false;
            self.state = State::Flush(Pending::Retry(ppm.wrapping_add_signed(settings.cc)));
            return;
        }

        co2.previous = ppm;
        co2.stable = true;
        self.state = State::Flush(Pending::Reading(ppm.wrapping_add_signed(settings.cc)));
    }

    /// Returns a step when the task has to pause before its next state.
    fn flush<B: Board>(
        &mut self,
        tcb: &mut Tcb,
        cx: &mut Context<'_, B>,
        pending: Pending,
    ) -> Option<Step> {
        match pending {
            Pending::CalibrationStart => {
                let settings = *cx.config.settings();
                cx.record(RecordType::ManualCalibStart, 1);
                cx.record(RecordType::CalibrationCorrectionOld, settings.cc as u16);
                cx.record(RecordType::CalibTarget, settings.calib_target);
                cx.set(Event::Co2UpHis);

                if settings.power_mode() == PowerMode::OnDemand {
                    log::info!("Calibrating in on demand mode, switching to mid");
                    cx.config.update(|s| Settings {
                        power_mode: PowerMode::Mid.into(),
                        ..s
                    });
                }
                self.state = State::Loop;
            }
            Pending::CalibrationSample(ppm) => {
                cx.record(RecordType::Co2, ppm);
                cx.set(Event::Co2UpHis);
                self.state = State::AfterSample;
            }
            Pending::Retry(value) => {
                cx.record(RecordType::Co2Retry, value);
                self.state = State::Measure;
            }
            Pending::Reading(value) => {
                cx.record(RecordType::Co2, value);
                let flight_mode = cx.config.settings().flight_mode();
                if let Some(adjustment) = cx.device.asc.process(value, flight_mode) {
                    apply_adjustment(cx, adjustment);
                }

                cx.device.co2.value = value;
                cx.device.co2.error = None;
                cx.set(Event::UiUpCo2 | Event::Co2UpHis | Event::Co2UpAlarm);
                self.state = State::Publish;
            }
            Pending::FactoryReset => {
                cx.record(RecordType::SensorUserFactoryReset, 1);
                cx.clear(Event::Co2FactoryReset);
                self.state = State::FactoryResetReply;
            }
            Pending::Error => {
                let code = self.error.map(u8::from).unwrap_or(0);
                cx.device.co2.error = self.error;
                cx.record(RecordType::SensorError, code as u16);
                self.state = State::Strike;
            }
            Pending::Restart => {
                cx.record(RecordType::SensorError, RESTART_MARKER);
                cx.set(Event::Co2UpHis);
                self.state = State::Reset;
                return Some(tcb.delay(ms(100)));
            }
        }
        None
    }
}

impl Task for ReadTask {
    fn restart(&mut self) {
        *self = Self::default();
    }
}

impl<'a, B: Board> Run<Context<'a, B>> for ReadTask {
    fn step(&mut self, tcb: &mut Tcb, cx: &mut Context<'a, B>) -> Step {
        loop {
            match self.state {
                State::PowerUp => {
                    if self.booted {
                        log::info!("Re-initialising CO2 sensor");
                    } else {
                        let settings = *cx.config.settings();
                        cx.device.asc.set_enabled(settings.auto_calibrate != 0);
                        cx.device.asc.set_target(settings.calib_target);
                        log::info!("Powering up CO2 sensor");
                    }
                    cx.board.sensor().power_on();
                    self.state = State::Init;
                    return tcb.delay(ms(1500));
                }
                State::Init => {
                    if let Err(fault) = cx.board.sensor().init() {
                        self.fail(SensorError::from_fault(fault, SensorError::Bus));
                        continue;
                    }
                    self.state = if self.booted {
                        State::DisableAsc
                    } else {
                        State::Boot
                    };
                    return tcb.delay(ms(500));
                }
                State::Boot => {
                    self.state = State::StopIdle;
                    if cx.config.settings().erase_required {
                        log::info!("First boot, factory resetting the sensor");
                        if let Err(fault) = cx.board.sensor().factory_reset() {
                            log::warn!("Sensor factory reset failed: {:?}", fault);
                        }
                        cx.config.update(|s| Settings { cc: 0, ..s });
                        return tcb.delay(ms(1200));
                    }
                }
                State::StopIdle => {
                    if let Err(fault) = cx.board.sensor().stop_measurement() {
                        log::debug!("Stop before configuration failed: {:?}", fault);
                    }
                    self.state = State::Configure;
                    return tcb.delay(ms(500));
                }
                State::Configure => {
                    let sensor = cx.board.sensor();
                    cx.device.co2.variant = match sensor.variant() {
                        Ok(variant) => variant,
                        Err(fault) => {
                            log::warn!("Sensor variant unknown ({:?}), assuming {}", fault, VARIANT_FALLBACK);
                            VARIANT_FALLBACK
                        }
                    };
                    log::info!("Sensor variant {}", cx.device.co2.variant);
                    self.booted = true;
                    self.state = State::DisableAsc;
                }
                State::DisableAsc => {
                    cx.device.co2.powered = true;
                    if let Err(fault) = cx.board.sensor().set_asc(false) {
                        self.fail(SensorError::from_fault(fault, SensorError::AutoCalibration));
                        continue;
                    }
                    self.state = State::Loop;
                }
                State::Loop => {
                    if cx.battery_low() {
                        log::info!("Battery low, CO2 sensor off");
                        cx.board.sensor().power_off();
                        cx.device.co2.powered = false;
                        return Step::Exit;
                    }

                    if cx.any(Event::GetSensorDetails) {
                        cx.clear(Event::GetSensorDetails);
                        self.state = State::Details;
                    } else if !cx.device.co2.powered {
                        self.state = State::PowerUp;
                    } else if cx.any(Event::Co2CalibStart) {
                        cx.clear(Event::Co2CalibStart);
                        let mode = cx.config.settings().power_mode();
                        log::info!("Calibration window opens");
                        cx.device.calibration.begin(mode);
                        cx.set(Event::Co2CalibTiming);
                        self.state = State::Flush(Pending::CalibrationStart);
                    } else if cx.any(Event::Co2FactoryReset | Event::Co2CalibModeChange) {
                        self.state = State::Reprogram;
                    } else {
                        self.state = State::Start;
                    }
                }
                State::Details => {
                    match cx.board.sensor().details() {
                        Ok(details) => {
                            log::info!("Sensor serial {}", SerialNumber::from(details.serial));
                            self.details = details;
                            self.state = State::DetailsReply;
                        }
                        Err(fault) => {
                            log::warn!("Sensor details incomplete ({:?}), not replying", fault);
                            self.state = State::Stop;
                        }
                    }
                }
                State::DetailsReply => {
                    if !self.nus.take(tcb, cx.events()) {
                        return Step::Yield;
                    }
                    let frame = replies::sensor_details(
                        &self.details,
                        cx.config.settings(),
                        cx.device.co2.variant,
                    );
                    cx.send(&frame);
                    self.nus.give();
                    self.state = State::Stop;
                }
                State::Reprogram => {
                    if let Err(fault) = cx.board.sensor().factory_reset() {
                        self.fail(SensorError::from_fault(fault, SensorError::Reset));
                        continue;
                    }
                    self.state = State::ReprogramSettle;
                    return tcb.delay(ms(1200));
                }
                State::ReprogramSettle => {
                    if let Err(fault) = cx.board.sensor().set_asc(false) {
                        self.fail(SensorError::from_fault(fault, SensorError::AutoCalibration));
                        continue;
                    }

                    if cx.any(Event::Co2CalibModeChange) {
                        cx.clear(Event::Co2CalibModeChange);
                        self.state = State::Start;
                    } else {
                        let target = Settings::default().calib_target;
                        log::info!("Sensor factory reset, correction cleared");
                        cx.config.update(|s| Settings {
                            cc: 0,
                            calib_target: target,
                            ..s
                        });
                        cx.device.asc.set_target(target);
                        self.state = State::Flush(Pending::FactoryReset);
                    }
                }
                State::FactoryResetReply => {
                    if !self.nus.take(tcb, cx.events()) {
                        return Step::Yield;
                    }
                    let asc = cx.device.asc.is_enabled() as u8;
                    cx.send(&replies::sensor_factory_reset_done(asc));
                    self.nus.give();
                    self.state = State::Start;
                }
                State::Start => {
                    self.started_ms = cx.shared.clock.uptime_ms();
                    if let Err(fault) = cx.board.sensor().start_measurement() {
                        self.fail(SensorError::from_fault(fault, SensorError::MeasurementStart));
                        continue;
                    }
                    self.state = State::Measure;
                }
                State::Measure => {
                    cx.set(Event::BatteryAdcEn);
                    cx.clear(Event::Co2UpdateOnce);
                    self.state = State::Sample;
                }
                State::Sample => {
                    if !tcb.wait(cx.battery_low(), secs(5)) {
                        return Step::Yield;
                    }
                    if cx.battery_low() {
                        self.state = State::Stop;
                        continue;
                    }
                    self.sample(cx);
                }
                State::Flush(pending) => {
                    if !tcb.wait(!cx.any(Event::Co2UpHis), TICK_MAX) {
                        return Step::Yield;
                    }
                    if let Some(step) = self.flush(tcb, cx, pending) {
                        return step;
                    }
                }
                State::Publish => {
                    if !self.nus.take(tcb, cx.events()) {
                        return Step::Yield;
                    }
                    let frame = replies::realtime_co2(cx.now(), cx.device.co2.value);
                    cx.send(&frame);
                    self.nus.give();
                    self.state = State::AfterSample;
                }
                State::AfterSample => {
                    cx.device.co2.strikes = 0;
                    let continuous = cx.config.settings().power_mode() == PowerMode::Hi
                        || !cx.device.co2.stable;

                    self.state = if cx.any(Events::CO2_MEASUREMENT_BREAK) || !continuous {
                        State::Stop
                    } else {
                        State::Measure
                    };
                }
                State::Stop => {
                    if let Err(fault) = cx.board.sensor().stop_measurement() {
                        self.fail(SensorError::from_fault(fault, SensorError::MeasurementStop));
                        continue;
                    }
                    self.state = State::Wait(cx.config.settings().power_mode());
                    return tcb.delay(ms(500));
                }
                State::Wait(mode) => {
                    let timeout = match mode {
                        PowerMode::Mid => self.remaining(cx, MID_PERIOD_MS),
                        PowerMode::Low => self.remaining(cx, LOW_PERIOD_MS),
                        PowerMode::OnDemand => TICK_MAX,
                        PowerMode::Hi => 0,
                    };
                    let wake = cx.config.settings().power_mode() != mode
                        || cx.any(Events::CO2_UPDATE);
                    if !tcb.wait(wake, timeout) {
                        return Step::Yield;
                    }

                    cx.clear(Event::Co2UpdateOnce);
                    self.state = if cx.battery_low() {
                        State::Loop
                    } else {
                        State::BatteryReport
                    };
                }
                State::BatteryReport => {
                    if !self.nus.take(tcb, cx.events()) {
                        return Step::Yield;
                    }
                    let battery = &cx.device.battery;
                    let frame = replies::battery(battery.level, battery.charging);
                    cx.send(&frame);
                    self.nus.give();
                    self.state = State::Loop;
                }
                State::Error => {
                    self.state = State::Flush(Pending::Error);
                    if self.error != Some(SensorError::MeasurementStart) {
                        if let Err(fault) = cx.board.sensor().stop_measurement() {
                            log::debug!("Stop after error failed: {:?}", fault);
                        }
                        return tcb.delay(ms(500));
                    }
                }
                State::Strike => match cx.device.co2.strikes {
                    0 => {
                        log::info!("First sensor error, retrying");
                        cx.set(Event::Co2UpHis);
                        cx.device.co2.strikes = 1;
                        self.state = State::Loop;
                    }
                    1 => {
                        log::warn!("Second sensor error, power cycling");
                        cx.device.co2.strikes = 2;
                        cx.set(Event::Co2UpHis);
                        cx.board.sensor().power_off();
                        cx.device.co2.powered = false;
                        self.state = State::Loop;
                        return tcb.delay(secs(2));
                    }
                    _ => {
                        log::error!("Third sensor error, restarting the device");
                        cx.set(Event::Co2SensorError | Event::Co2UpHis | Event::ScreenOnOnetime);
                        self.state = State::Flush(Pending::Restart);
                        return tcb.delay(secs(2));
                    }
                },
                State::Reset => {
                    cx.board.system_reset();
                    cx.device.co2.strikes = 0;
                    return Step::Exit;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{scheduler::Scheduled, testing::Harness};

    fn harness() -> (Harness, Scheduled<ReadTask>) {
        (Harness::new(), Scheduled::new(ReadTask::default()))
    }

    fn set_power_mode(h: &mut Harness, mode: PowerMode) {
        h.config.update(|s| Settings {
            power_mode: mode.into(),
            ..s
        });
    }

    fn records(h: &Harness, kinds: &[RecordType]) -> Vec<(u8, u16)> {
        h.records
            .iter()
            .filter(|r| kinds.iter().any(|&k| u8::from(k) == r.kind))
            .map(|r| (r.kind, r.value))
            .collect()
    }

    #[test]
    fn boots_and_publishes_a_reading() {
        let (mut h, mut task) = harness();
        h.board.sensor.push(800);

        h.run_until(&mut task, |h, _| {
            h.flush();
            !h.board.transport.sent.is_empty()
        });

        assert_eq!(h.board.transport.sent[0], replies::realtime_co2(0, 800).as_bytes());
        assert_eq!(h.device.co2.value, 800);
        assert_eq!(h.device.co2.variant, 1);
        assert_eq!(h.board.sensor.asc, Some(false));
        assert!(h.shared.events.all(Event::UiUpCo2 | Event::Co2UpAlarm | Event::BatteryAdcEn));
        assert_eq!(records(&h, &[RecordType::Co2]), vec![(0, 800)]);
        assert_eq!(h.board.sensor.factory_resets, 0);
    }

    #[test]
    fn applies_scale_and_correction() {
        let (mut h, mut task) = harness();
        h.config.update(|s| Settings {
            cc: 20,
            co2_scale_factor: 1.25,
            ..s
        });
        h.board.sensor.push(800);

        h.run_until(&mut task, |h, _| {
            h.flush();
            !h.board.transport.sent.is_empty()
        });
        assert_eq!(h.device.co2.value, 1020);
        assert_eq!(h.device.co2.previous, 1000);
    }

    #[test]
    fn low_mode_waits_then_reports_the_battery() {
        let (mut h, mut task) = harness();
        h.board.sensor.push(800);
        h.device.battery.level = 77;

        h.run_until(&mut task, |h, _| {
            h.flush();
            h.board.transport.sent.len() == 2
        });
        assert_eq!(h.board.sensor.stops, 2);
        assert_eq!(&h.board.transport.sent[1][..6], &[0xFF, 0xAA, 0x20, 0x01, 77, 0]);
    }

    #[test]
    fn refresh_cuts_the_wait_short() {
        let (mut h, mut task) = harness();
        h.board.sensor.push(800);
        h.run_until(&mut task, |h, _| {
            h.flush();
            !h.board.transport.sent.is_empty()
        });

        h.spin(&mut task, 200);
        assert_eq!(h.board.transport.sent.len(), 1, "still waiting");

        h.shared.events.set(Event::Co2UpdateOnce);
        h.spin(&mut task, 5);
        assert_eq!(h.board.transport.sent.len(), 2);
        assert!(!h.shared.events.any(Event::Co2UpdateOnce));
    }

    #[test]
    fn unstable_reading_is_measured_again() {
        let (mut h, mut task) = harness();
        set_power_mode(&mut h, PowerMode::Hi);
        for ppm in [800, 2000, 2000] {
            h.board.sensor.push(ppm);
        }

        h.run_until(&mut task, |h, _| {
            h.flush();
            h.board.transport.sent.len() == 2
        });

        assert_eq!(
            records(&h, &[RecordType::Co2, RecordType::Co2Retry]),
            vec![(0, 800), (18, 2000), (0, 2000)]
        );
        assert!(h.device.co2.stable);
    }

    #[test]
    fn calibration_samples_skip_the_stability_check() {
        let (mut h, mut task) = harness();
        set_power_mode(&mut h, PowerMode::OnDemand);
        h.board.sensor.push(600);
        h.shared.events.set(Event::Co2CalibStart);

        h.run_until(&mut task, |h, _| {
            h.flush();
            h.device.calibration.samples() == 1
        });

        assert_eq!(h.config.settings().power_mode(), PowerMode::Mid);
        assert_eq!(h.device.calibration.power_mode_before(), PowerMode::OnDemand);
        assert!(h.shared.events.any(Event::Co2CalibTiming));
        assert_eq!(
            records(
                &h,
                &[
                    RecordType::ManualCalibStart,
                    RecordType::CalibrationCorrectionOld,
                    RecordType::CalibTarget
                ]
            ),
            vec![(14, 1), (13, 0), (9, 426)]
        );
    }

    #[test]
    fn three_strikes_restart_the_device() {
        let (mut h, mut task) = harness();

        h.run_until(&mut task, |h, _| {
            h.flush();
            h.board.resets > 0
        });

        assert_eq!(
            records(&h, &[RecordType::SensorError]),
            vec![(3, 0x05), (3, 0x05), (3, 0x05), (3, 0xFF)]
        );
        assert!(h.shared.events.all(Event::Co2SensorError | Event::ScreenOnOnetime));
        assert_eq!(h.board.sensor.power_offs, 1);
        assert_eq!(h.board.sensor.power_ons, 2);
        assert!(task.tcb().is_stopped());
    }

    #[test]
    fn a_good_reading_clears_the_strikes() {
        let (mut h, mut task) = harness();
        set_power_mode(&mut h, PowerMode::Hi);

        h.run_until(&mut task, |h, _| {
            h.flush();
            h.device.co2.strikes == 1
        });
        h.board.sensor.push(700);
        h.run_until(&mut task, |h, _| {
            h.flush();
            !h.board.transport.sent.is_empty()
        });
        h.spin(&mut task, 1);
        assert_eq!(h.device.co2.strikes, 0);
    }

    #[test]
    fn exits_on_low_battery() {
        let (mut h, mut task) = harness();
        h.shared.events.set(Event::BatLowWarning);

        h.run_until(&mut task, |_, t| t.tcb().is_stopped());
        assert!(!h.board.sensor.powered);
        assert!(!h.device.co2.powered);
        assert_eq!(h.board.sensor.starts, 0);
    }

    #[test]
    fn details_are_sent_instead_of_measuring() {
        let (mut h, mut task) = harness();
        h.board.sensor.details = Some(SensorDetails {
            temperature_offset: 4,
            altitude: 100,
            pressure: 1013,
            serial: [1, 2, 3, 4, 5, 6],
        });
        h.shared.events.set(Event::GetSensorDetails);

        h.run_until(&mut task, |h, _| !h.board.transport.sent.is_empty());

        let frame = &h.board.transport.sent[0];
        assert_eq!(&frame[..4], &[0xFF, 0xAA, 0x30, 16]);
        assert_eq!(frame[19], 1, "variant");
        assert_eq!(h.board.sensor.starts, 0);
        assert!(!h.shared.events.any(Event::GetSensorDetails));
    }

    #[test]
    fn missing_details_send_nothing() {
        let (mut h, mut task) = harness();
        h.shared.events.set(Event::GetSensorDetails);

        h.run_until(&mut task, |h, _| h.board.sensor.stops == 2);
        h.spin(&mut task, 100);
        assert!(h.board.transport.sent.is_empty());
    }

    #[test]
    fn factory_reset_clears_the_correction() {
        let (mut h, mut task) = harness();
        h.config.update(|s| Settings {
            cc: 50,
            calib_target: 450,
            ..s
        });
        h.shared.events.set(Event::Co2FactoryReset);

        h.run_until(&mut task, |h, _| {
            h.flush();
            !h.board.transport.sent.is_empty()
        });

        assert_eq!(h.board.transport.sent[0][..5], [0xFF, 0xAA, 0x24, 0x01, 0x00]);
        assert_eq!(h.config.settings().cc, 0);
        assert_eq!(h.config.settings().calib_target, 426);
        assert_eq!(h.board.sensor.factory_resets, 1);
        assert!(!h.shared.events.any(Event::Co2FactoryReset));
        h.flush();
        assert_eq!(records(&h, &[RecordType::SensorUserFactoryReset]), vec![(5, 1)]);
    }

    #[test]
    fn mode_change_reprograms_without_reset_record() {
        let (mut h, mut task) = harness();
        h.shared.events.set(Event::Co2CalibModeChange);

        h.run_until(&mut task, |h, _| h.board.sensor.starts == 1);
        assert_eq!(h.board.sensor.factory_resets, 1);
        assert!(!h.shared.events.any(Event::Co2CalibModeChange));
        assert!(h.board.transport.sent.is_empty());
    }

    #[test]
    fn first_boot_resets_the_sensor() {
        let (mut h, mut task) = harness();
        h.config.update(|s| Settings {
            erase_required: true,
            cc: 33,
            ..s
        });

        h.run_until(&mut task, |h, _| h.board.sensor.starts == 1);
        assert_eq!(h.board.sensor.factory_resets, 1);
        assert_eq!(h.config.settings().cc, 0);
    }
}
