//! CO2 sensor orchestration: sampling, corrections, recovery and calibration.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{bsp::SensorFault, systems::config::Settings};

pub mod asc;
pub mod calibration;
pub mod read;

pub use calibration::CalibrationTask;
pub use read::ReadTask;

/// Readings above this are treated as a sensor fault.
pub const MAX_PPM: u16 = 50_000;

/// Scale factor forced while flight mode is on.
pub const FLIGHT_SCALE_FACTOR: f32 = 1.6;

/// Variant reported before the sensor was asked.
pub const VARIANT_UNKNOWN: u8 = 2;

/// Variant assumed when the sensor does not tell.
pub const VARIANT_FALLBACK: u8 = 1;

/// Error codes stored in `SensorError` history records.
#[derive(Clone, Copy, PartialEq, Eq, Debug, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum SensorError {
    Read = 0x01,
    AutoCalibration = 0x02,
    Reset = 0x03,
    MeasurementStart = 0x04,
    DataStatus = 0x05,
    Variant = 0x06,
    MeasurementStop = 0x07,
    InvalidReading = 0x08,
    Bus = 0x09,
    Crc = 0x0A,
}

impl SensorError {
    /// Bus and checksum faults keep their own code; anything else is reported
    /// as the operation that failed.
    pub fn from_fault(fault: SensorFault, operation: SensorError) -> Self {
        match fault {
            SensorFault::Bus => SensorError::Bus,
            SensorFault::Crc => SensorError::Crc,
            SensorFault::Device => operation,
        }
    }
}

/// Live sensor bookkeeping.
#[derive(Debug)]
pub struct Co2State {
    /// Last published reading, correction applied.
    pub value: u16,
    /// Last accepted raw reading, for the stability check.
    pub previous: u16,
    pub stable: bool,
    pub variant: u8,
    pub error: Option<SensorError>,
    /// Consecutive failed cycles.
    pub strikes: u8,
    pub powered: bool,
}

impl Default for Co2State {
    fn default() -> Self {
        Self {
            value: 0,
            previous: 0,
            stable: true,
            variant: VARIANT_UNKNOWN,
            error: None,
            strikes: 0,
            powered: false,
        }
    }
}

impl Co2State {
    /// A jump above 1.5x or below 0.75x of the previous reading.
    pub fn is_jump(&self, ppm: u16) -> bool {
        if self.previous == 0 {
            return false;
        }

        let (ppm, previous) = (ppm as u32, self.previous as u32);
        ppm * 2 > previous * 3 || ppm * 4 < previous * 3
    }
}

pub fn scale_factor(settings: &Settings) -> f32 {
    if settings.flight_mode() {
        FLIGHT_SCALE_FACTOR
    } else {
        settings.co2_scale_factor
    }
}

/// Raw reading with the configured scale factor applied.
pub fn scaled(raw: u16, settings: &Settings) -> u32 {
    (raw as f32 * scale_factor(settings)) as u32
}
