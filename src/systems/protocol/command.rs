use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Command ids shared with the mobile app. Replies reuse the request's id
/// unless noted.
#[derive(Clone, Copy, PartialEq, Eq, Debug, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Command {
    GetCo2Value = 0x01,
    SetBuzzer = 0x02,
    SetVibrator = 0x03,
    SetTimebase = 0x04,
    SetPowerMode = 0x05,
    BleDisconnect = 0x06,
    SetGraphThresholds = 0x07,
    GetDeviceState = 0x08,
    GetDeviceName = 0x09,
    SetDeviceName = 0x0A,
    /// Answered with a [`Command::GetHistoryPage`] frame.
    GetCurrentHalfPage = 0x0B,
    GetHistoryPage = 0x0C,
    CalibrationStart = 0x0D,
    SetScreenConst = 0x0E,
    /// Device initiated only.
    CalibrationCountdown = 0x0F,
    FindDevice = 0x10,
    SetSelfCalibration = 0x11,
    GetHardwareVersion = 0x12,
    GetSoftwareVersion = 0x13,
    GetBatteryLevel = 0x20,
    RefreshCo2Value = 0x21,
    SetDnd = 0x22,
    PopulateFakeRecords = 0x23,
    ResetSensor = 0x24,
    GetAscCount = 0x25,
    DumpDeviceState = 0x26,
    ResetDevice = 0x27,
    SetGraphMode = 0x28,
    SetAscCheckDuration = 0x29,
    GetAscDayCount = 0x2A,
    GetSensorVariant = 0x2B,
    SetAdvancedAlarm = 0x2C,
    SetIlluminateOnAlarm = 0x2D,
    SetAlarmCo2Falling = 0x2E,
    ResetAdvancedAlarms = 0x2F,
    GetSensorDetails = 0x30,
    SetCo2ScaleFactor = 0x31,
    SetFlightMode = 0x32,
    DeviceSleep = 0xEE,
    FactoryReset = 0xFA,
    EraseHistory = 0xFD,
    GetSystemTime = 0xFE,
    SensorErrorDebug = 0xFF,
}

pub const HARDWARE_VERSION: &[u8] = b"1.1.0";
pub const SOFTWARE_VERSION: &[u8] = b"1.5.0";
