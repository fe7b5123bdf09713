//! Peripherals the firmware core needs from a board.
//!
//! A board support crate implements [`Board`] for its hardware. Pin maps,
//! radio stack setup and the display live there as well.

use core::fmt::Debug;

use embedded_storage::nor_flash::NorFlash;

use crate::{drivers::SpiFlash, util::Millivolts};

/// Nordic UART service link to the mobile app.
pub trait Transport {
    type Error: Debug;

    /// Queue one notification. Fails when no central is connected.
    fn transmit(&mut self, bytes: &[u8]) -> Result<(), Self::Error>;

    fn start_advertising(&mut self);

    fn stop_advertising(&mut self);

    /// Switch between the fast interval used for history uploads and the
    /// power saving one.
    fn set_fast_connection(&mut self, fast: bool);
}

/// How a sensor command failed at the driver level.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SensorFault {
    /// No acknowledge or a bus error.
    Bus,
    /// Response checksum mismatch.
    Crc,
    /// The sensor answered but the command did not succeed.
    Device,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Measurement {
    pub co2: u16,
    /// Non-zero when the sensor flagged the sample as unusable.
    pub status: u8,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct SensorDetails {
    pub temperature_offset: u16,
    pub altitude: u16,
    pub pressure: u16,
    pub serial: [u8; 6],
}

/// The NDIR CO2 sensor.
///
/// Calls return as soon as the command was issued; the read task provides the
/// settling delays between them.
pub trait Co2Sensor {
    fn power_on(&mut self);

    fn power_off(&mut self);

    fn init(&mut self) -> Result<(), SensorFault>;

    fn start_measurement(&mut self) -> Result<(), SensorFault>;

    fn stop_measurement(&mut self) -> Result<(), SensorFault>;

    fn data_ready(&mut self) -> Result<bool, SensorFault>;

    /// `WouldBlock` while no new sample is available.
    fn read(&mut self) -> nb::Result<Measurement, SensorFault>;

    fn factory_reset(&mut self) -> Result<(), SensorFault>;

    /// The sensor's own self calibration. The firmware runs its own and keeps
    /// this off.
    fn set_asc(&mut self, enabled: bool) -> Result<(), SensorFault>;

    fn variant(&mut self) -> Result<u8, SensorFault>;

    fn details(&mut self) -> Result<SensorDetails, SensorFault>;
}

/// Buzzer and vibration motor.
pub trait Annunciator {
    fn set(&mut self, buzzer: bool, vibrator: bool);

    fn off(&mut self) {
        self.set(false, false);
    }
}

pub trait BatteryGauge {
    fn sample(&mut self) -> Millivolts;

    /// Charger connected and charging.
    fn is_charging(&mut self) -> bool;
}

pub trait Board {
    type Flash: SpiFlash;
    type Sensor: Co2Sensor;
    type Transport: Transport;
    type Annunciator: Annunciator;
    type Battery: BatteryGauge;
    type ConfigFlash: NorFlash;

    fn flash(&mut self) -> &mut Self::Flash;

    fn sensor(&mut self) -> &mut Self::Sensor;

    fn transport(&mut self) -> &mut Self::Transport;

    fn annunciator(&mut self) -> &mut Self::Annunciator;

    fn battery(&mut self) -> &mut Self::Battery;

    /// Reboot the MCU. Does not return on hardware.
    fn system_reset(&mut self);

    /// Raw reset cause register, logged as a `ResetReason` record at boot.
    fn reset_reason(&self) -> u16;
}
