//! Frames the device sends, with the length bytes the app expects.

use crate::{
    bsp::SensorDetails,
    events::Events,
    systems::{config::Settings, history::record::HalfPage},
};

use super::{
    command::{Command, HARDWARE_VERSION, SOFTWARE_VERSION},
    frame::TX_FRAME_LEN,
    FrameBuilder, TxFrame,
};

fn builder(command: Command, declared_len: u8) -> FrameBuilder {
    FrameBuilder::new(command.into(), declared_len)
}

/// One status byte, the most common reply shape.
pub fn ack(command: Command, value: u8) -> TxFrame {
    builder(command, 1).u8(value).finish()
}

pub fn realtime_co2(time: u32, co2: u16) -> TxFrame {
    builder(Command::GetCo2Value, 2).be32(time).be16(co2).finish()
}

pub fn battery(level: u8, charging: bool) -> TxFrame {
    builder(Command::GetBatteryLevel, 1)
        .u8(level)
        .u8(charging as u8)
        .finish()
}

pub fn current_half_page(half_page: u16) -> TxFrame {
    builder(Command::GetHistoryPage, 1).be16(half_page).finish()
}

/// Sixteen records as stored, each `ts BE32, value BE16, type, 0`, then the
/// half page index.
pub fn history(half_page: u16, data: &HalfPage) -> TxFrame {
    let mut frame = builder(Command::GetHistoryPage, data.0.len() as u8);
    for record in data.records() {
        frame = frame
            .be32(record.timestamp)
            .be16(record.value)
            .u8(record.kind)
            .u8(0);
    }
    frame.be16(half_page).finish()
}

pub const DEVICE_STATE_LEN: u8 = 68;

pub fn device_state(settings: &Settings, screen_force_on: bool) -> TxFrame {
    let mut frame = builder(Command::GetDeviceState, DEVICE_STATE_LEN)
        .u8(settings.buzzer)
        .u8(settings.vibrator)
        .u8(settings.power_mode)
        .be16(settings.yellow_start)
        .be16(settings.red_start)
        .u8(screen_force_on as u8)
        .u8(settings.auto_calibrate)
        .u8(settings.dnd_mode)
        .u8(settings.dnd_start_hour)
        .u8(settings.dnd_start_minute)
        .u8(settings.dnd_end_hour)
        .u8(settings.dnd_end_minute)
        .be16(settings.calib_target)
        .u8(settings.ui_mode)
        .be16(settings.graph_max)
        .be16(settings.graph_min)
        .u8(settings.illuminate_on_alarm)
        .u8(settings.alarm_co2_falling);

    for alarm in settings.advanced_alarms.iter() {
        frame = frame
            .be16(alarm.co2_level)
            .u8(alarm.repeats)
            .u8(alarm.enabled);
    }

    frame
        .be32(settings.co2_scale_factor.to_bits())
        .u8(settings.flight_mode)
        .finish()
}

pub fn device_name(name: &[u8]) -> TxFrame {
    FrameBuilder::with_payload(Command::GetDeviceName.into(), name).finish()
}

pub fn hardware_version() -> TxFrame {
    FrameBuilder::with_payload(Command::GetHardwareVersion.into(), HARDWARE_VERSION).finish()
}

pub fn software_version() -> TxFrame {
    FrameBuilder::with_payload(Command::GetSoftwareVersion.into(), SOFTWARE_VERSION).finish()
}

pub fn system_time(time: u32) -> TxFrame {
    builder(Command::GetSystemTime, 4).be32(time).finish()
}

/// Magnitude and sign flag of a calibration correction. The flag is 0 for a
/// positive value and 1 otherwise.
fn signed_magnitude(frame: FrameBuilder, value: i16, negative: bool) -> TxFrame {
    frame
        .be16(value.unsigned_abs())
        .u8(negative as u8)
        .finish()
}

pub fn calibration_started() -> TxFrame {
    ack(Command::CalibrationStart, 0x02)
}

pub fn calibration_countdown(seconds: u16) -> TxFrame {
    builder(Command::CalibrationCountdown, 1).be16(seconds).finish()
}

pub fn calibration_result(correction: i16) -> TxFrame {
    signed_magnitude(builder(Command::CalibrationStart, 1), correction, correction <= 0)
}

pub fn asc_count(cc: i16) -> TxFrame {
    signed_magnitude(builder(Command::GetAscCount, 1), cc, cc < 0)
}

pub fn sensor_factory_reset_done(asc_enabled: u8) -> TxFrame {
    ack(Command::ResetSensor, asc_enabled)
}

pub fn sensor_details(details: &SensorDetails, settings: &Settings, variant: u8) -> TxFrame {
    builder(Command::GetSensorDetails, 16)
        .be16(details.temperature_offset)
        .be16(details.altitude)
        .be16(details.pressure)
        .u8(settings.auto_calibrate)
        .be16(settings.calib_target)
        .bytes(&details.serial)
        .u8(variant)
        .finish()
}

pub fn erase_done() -> TxFrame {
    ack(Command::EraseHistory, 0x01)
}

pub fn populate_done() -> TxFrame {
    ack(Command::PopulateFakeRecords, 0x01)
}

/// Event word little endian followed by the serialised settings.
pub fn debug_dump(events: Events, settings: &Settings) -> TxFrame {
    let mut buf = [0u8; TX_FRAME_LEN];
    let settings = match postcard::to_slice(settings, &mut buf) {
        Ok(bytes) => &*bytes,
        Err(e) => {
            log::error!("Failed to serialise settings: {:?}", e);
            &[]
        }
    };

    builder(Command::DumpDeviceState, 1)
        .bytes(&events.bits().to_le_bytes())
        .bytes(settings)
        .finish()
}
