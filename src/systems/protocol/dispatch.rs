//! Executes received commands.

use crate::{
    bsp::{Board, Transport},
    context::Context,
    events::Event,
    systems::{
        config::{AdvancedAlarm, Settings, SettingsBuilder, ADVANCED_ALARM_COUNT},
        history::record::RecordType,
        sensor::{
            asc::set_self_calibration, calibration::update_calibration_target, SensorError,
        },
    },
    util::hexdump,
};

use super::{command::Command, replies, Frame, TxFrame};

/// Accepted range of the CO2 scale factor.
pub const SCALE_FACTOR_MIN: f32 = 0.5;
pub const SCALE_FACTOR_MAX: f32 = 2.0;

/// Scale factor as stored in a history record.
pub fn encode_scale_factor(factor: f32) -> u16 {
    ((factor - SCALE_FACTOR_MIN) * 65535.0 / (SCALE_FACTOR_MAX - SCALE_FACTOR_MIN) + 0.5) as u16
}

/// Check and execute one complete frame. The caller holds the NUS lock.
pub fn dispatch<B: Board>(cx: &mut Context<'_, B>, raw: &[u8]) {
    log::debug!("RX {}", hexdump(raw));

    let frame = match Frame::parse(raw) {
        Ok(frame) => frame,
        Err(e) => {
            log::warn!("Dropping frame: {:?}", e);
            return;
        }
    };

    let Ok(command) = Command::try_from(frame.command()) else {
        log::warn!("Unknown command {:#04x}", frame.command());
        return;
    };

    if let Some(reply) = execute(cx, command, &frame) {
        cx.send(&reply);
    }
}

fn execute<B: Board>(cx: &mut Context<'_, B>, command: Command, frame: &Frame<'_>) -> Option<TxFrame> {
    let arg = frame.byte(0);
    log::info!("Command {:?}", command);

    match command {
        Command::GetCo2Value => {
            let value = cx.device.co2.value;
            (value != 0).then(|| replies::realtime_co2(cx.now(), value))
        }
        Command::SetBuzzer => {
            cx.config.update(|s| Settings { buzzer: arg, ..s });
            Some(replies::ack(command, arg))
        }
        Command::SetVibrator => {
            cx.config.update(|s| Settings { vibrator: arg, ..s });
            Some(replies::ack(command, arg))
        }
        Command::SetTimebase => {
            let time = frame.be32(0);
            let clock = &mut cx.device.clock;
            if clock.is_set() {
                clock.set(time);
            } else {
                let before = clock.now();
                clock.mark_set();
                clock.set(time);
                cx.record(RecordType::TimeSet, before as u16);
            }
            log::info!("Time set to {}", time);
            Some(replies::ack(command, 1))
        }
        Command::SetPowerMode => {
            cx.config.update(|s| Settings { power_mode: arg, ..s });
            cx.set(Event::BatUpdate);
            Some(replies::ack(command, arg))
        }
        Command::BleDisconnect => {
            let reply = replies::ack(command, 1);
            cx.send(&reply);
            cx.board.transport().stop_advertising();
            cx.config.update(|s| Settings {
                bluetooth_enabled: 0,
                ..s
            });
            None
        }
        Command::SetGraphThresholds => {
            if frame.frame_len() > 7 {
                cx.config.apply(
                    SettingsBuilder::default()
                        .yellow_start(frame.be16(0))
                        .red_start(frame.be16(2)),
                );
                cx.set(Event::UiGraphUpdate);
            }
            None
        }
        Command::GetDeviceState => Some(replies::device_state(
            cx.config.settings(),
            cx.any(Event::ScreenForceOn),
        )),
        Command::GetDeviceName => Some(replies::device_name(cx.config.settings().device_name())),
        Command::SetDeviceName => {
            let name = frame.payload();
            cx.config.update(|mut s| {
                s.set_device_name(name);
                s
            });
            Some(replies::ack(command, 1))
        }
        Command::GetCurrentHalfPage => {
            let change = cx.device.connection.toggle();
            cx.set_fast_connection(change);
            Some(replies::current_half_page(cx.history.current_half_page()))
        }
        Command::GetHistoryPage => {
            if frame.frame_len() >= 6 {
                cx.device.connection.extend();
                cx.history.request_half_page(frame.be16(0));
                cx.set(Event::RequestHistory);
            }
            None
        }
        Command::CalibrationStart => {
            if frame.frame_len() < 6 {
                log::info!("Calibration start, target {}", cx.config.settings().calib_target);
                cx.set(Event::Co2CalibStart);
            } else {
                update_calibration_target(cx, frame.be16(0));
            }
            None
        }
        Command::SetScreenConst => match arg {
            1 => {
                cx.set(Event::ScreenForceOn);
                Some(replies::ack(command, 3))
            }
            2 => {
                cx.clear(Event::ScreenForceOn);
                cx.set(Event::UiOffScreen);
                Some(replies::ack(command, 3))
            }
            _ => None,
        },
        Command::FindDevice => (arg == 1).then(|| {
            cx.set(Event::FindDevice);
            replies::ack(command, 1)
        }),
        Command::SetSelfCalibration => (arg <= 1).then(|| {
            set_self_calibration(cx, arg == 1);
            replies::ack(command, 2)
        }),
        Command::GetHardwareVersion => Some(replies::hardware_version()),
        Command::GetSoftwareVersion => Some(replies::software_version()),
        Command::GetBatteryLevel => {
            let battery = &cx.device.battery;
            Some(replies::battery(battery.level, battery.charging))
        }
        Command::RefreshCo2Value => {
            cx.set(Event::Co2UpdateOnce);
            None
        }
        Command::SetDnd => {
            match arg {
                0 => {
                    cx.config.update(|s| Settings { dnd_mode: 0, ..s });
                    cx.set(Event::UiUpBle);
                }
                1 => {
                    cx.config.apply(
                        SettingsBuilder::default()
                            .dnd_mode(1)
                            .dnd_start_hour(frame.byte(1))
                            .dnd_start_minute(frame.byte(2))
                            .dnd_end_hour(frame.byte(3))
                            .dnd_end_minute(frame.byte(4)),
                    );
                    cx.set(Event::UiUpBle);
                }
                _ => {}
            }
            Some(replies::ack(command, cx.config.settings().dnd_mode))
        }
        Command::PopulateFakeRecords => {
            cx.set(Event::PopulateFakeData);
            None
        }
        Command::ResetSensor => {
            cx.set(Event::Co2FactoryReset);
            None
        }
        Command::GetAscCount => Some(replies::asc_count(cx.config.settings().cc)),
        Command::DumpDeviceState => Some(replies::debug_dump(
            cx.events().snapshot(),
            cx.config.settings(),
        )),
        Command::ResetDevice => {
            log::warn!("Reset requested at {}", cx.now());
            cx.board.system_reset();
            None
        }
        Command::SetGraphMode => {
            let ui_mode = arg.min(2);
            let custom_range = ui_mode == 0 && frame.frame_len() > 7;
            let (graph_max, graph_min) = (frame.be16(1), frame.be16(3));
            cx.config.update(|s| {
                if custom_range {
                    Settings {
                        ui_mode,
                        graph_max,
                        graph_min,
                        ..s
                    }
                } else {
                    Settings { ui_mode, ..s }
                }
            });
            cx.set(Event::ToggleUiMode);
            None
        }
        Command::SetAscCheckDuration => {
            cx.device.housekeeping.set_asc_check_duration(frame.be16(0));
            None
        }
        Command::GetAscDayCount => Some(replies::ack(command, cx.device.asc.day_count())),
        Command::GetSensorVariant => Some(replies::ack(command, cx.device.co2.variant)),
        Command::SetAdvancedAlarm => {
            let index = arg as usize;
            if frame.declared_len() != 5 || index >= ADVANCED_ALARM_COUNT {
                log::warn!("Bad advanced alarm, length {} index {}", frame.declared_len(), index);
                return None;
            }

            let alarm = AdvancedAlarm::new(frame.be16(1), frame.byte(3), frame.byte(4));
            log::info!("Advanced alarm {}: {:?}", index, alarm);
            cx.config.update(|mut s| {
                s.advanced_alarms[index] = alarm;
                s
            });
            Some(replies::ack(command, arg))
        }
        Command::SetIlluminateOnAlarm => (frame.declared_len() == 1).then(|| {
            cx.config.update(|s| Settings {
                illuminate_on_alarm: arg,
                ..s
            });
            replies::ack(command, arg)
        }),
        Command::SetAlarmCo2Falling => (frame.declared_len() == 1).then(|| {
            cx.config.update(|s| Settings {
                alarm_co2_falling: arg,
                ..s
            });
            replies::ack(command, arg)
        }),
        Command::ResetAdvancedAlarms => {
            cx.config.reset_advanced_alarms();
            None
        }
        Command::GetSensorDetails => {
            cx.set(Event::GetSensorDetails);
            None
        }
        Command::SetCo2ScaleFactor => {
            if frame.declared_len() != 4 {
                log::warn!("Bad scale factor length {}", frame.declared_len());
                return None;
            }

            let factor = f32::from_bits(frame.be32(0));
            if !(SCALE_FACTOR_MIN..=SCALE_FACTOR_MAX).contains(&factor) {
                log::warn!("Scale factor {} out of range", factor);
                return None;
            }

            cx.config.update(|s| Settings {
                co2_scale_factor: factor,
                ..s
            });
            cx.record(RecordType::Co2ScaleFactor, encode_scale_factor(factor));
            cx.set(Event::Co2UpHis);
            None
        }
        Command::SetFlightMode => {
            cx.config.update(|s| Settings { flight_mode: arg, ..s });
            cx.set(Event::FlightModeUpdate);
            let now = cx.now();
            cx.device.housekeeping.update_flight_mode_activation(now, arg != 0);
            cx.record(RecordType::FlightMode, arg as u16);
            cx.set(Event::Co2UpHis);
            None
        }
        Command::DeviceSleep => {
            cx.set(Event::DeviceSleep | Event::UiOffScreen);
            None
        }
        Command::FactoryReset => {
            cx.config.factory_reset();
            cx.board.system_reset();
            None
        }
        Command::EraseHistory => {
            cx.history.request_erase();
            None
        }
        Command::GetSystemTime => Some(replies::system_time(cx.now())),
        Command::SensorErrorDebug => {
            if arg == 1 {
                cx.set(Event::Co2SensorError | Event::Co2UpHis);
                cx.record(RecordType::SensorError, SensorError::Read as u16);
                cx.set(Event::ScreenOnOnetime);
            } else {
                cx.clear(Event::Co2SensorError);
            }
            None
        }
        Command::CalibrationCountdown => {
            log::warn!("Ignoring device side command {:?}", command);
            None
        }
    }
}
