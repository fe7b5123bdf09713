//! Device configuration, persisted write-through.

use core::ops::Range;

use derive_builder::Builder;
use embedded_storage::nor_flash::NorFlash;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use crate::systems::storage::{Storage, StorageEntry, StorageKey};

pub const DEVICE_NAME_LEN: usize = 20;
pub const ADVANCED_ALARM_COUNT: usize = 10;

/// How often the sensor is sampled.
#[derive(Clone, Copy, PartialEq, Eq, Debug, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum PowerMode {
    OnDemand = 0,
    Low = 1,
    Mid = 2,
    Hi = 3,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct AdvancedAlarm {
    pub co2_level: u16,
    pub repeats: u8,
    pub enabled: u8,
}

impl AdvancedAlarm {
    pub const fn new(co2_level: u16, repeats: u8, enabled: u8) -> Self {
        Self {
            co2_level,
            repeats,
            enabled,
        }
    }

    pub fn is_active(&self) -> bool {
        self.enabled != 0 && self.repeats > 0 && self.co2_level > 0
    }
}

pub const DEFAULT_ADVANCED_ALARMS: [AdvancedAlarm; ADVANCED_ALARM_COUNT] = [
    AdvancedAlarm::new(800, 1, 1),
    AdvancedAlarm::new(1000, 2, 1),
    AdvancedAlarm::new(1200, 3, 1),
    AdvancedAlarm::new(1500, 5, 1),
    AdvancedAlarm::new(0, 0, 0),
    AdvancedAlarm::new(0, 0, 0),
    AdvancedAlarm::new(0, 0, 0),
    AdvancedAlarm::new(0, 0, 0),
    AdvancedAlarm::new(0, 0, 0),
    AdvancedAlarm::new(0, 0, 0),
];

#[derive(PartialEq, Debug, Serialize, Deserialize, Clone, Copy, Builder)]
#[builder(no_std, pattern = "owned", build_fn(error(validation_error = false)))]
pub struct Settings {
    /// Calibration correction added to every raw reading.
    pub cc: i16,
    /// The history log must be erased on the next boot.
    pub erase_required: bool,
    pub power_mode: u8,
    pub vibrator: u8,
    pub buzzer: u8,
    pub auto_calibrate: u8,
    pub bluetooth_enabled: u8,
    pub dnd_mode: u8,
    pub dnd_start_hour: u8,
    pub dnd_start_minute: u8,
    pub dnd_end_hour: u8,
    pub dnd_end_minute: u8,
    pub calib_target: u16,
    pub ui_mode: u8,
    pub graph_max: u16,
    pub graph_min: u16,
    pub yellow_start: u16,
    pub red_start: u16,
    /// NUL padded.
    pub device_name: [u8; DEVICE_NAME_LEN + 1],
    pub illuminate_on_alarm: u8,
    pub alarm_co2_falling: u8,
    pub flight_mode: u8,
    pub advanced_alarms: [AdvancedAlarm; ADVANCED_ALARM_COUNT],
    pub co2_scale_factor: f32,
}

impl Default for Settings {
    fn default() -> Self {
        let mut device_name = [0u8; DEVICE_NAME_LEN + 1];
        device_name[..7].copy_from_slice(b"Airspot");

        Self {
            cc: 0,
            erase_required: true,
            power_mode: PowerMode::Low.into(),
            vibrator: 0,
            buzzer: 0,
            auto_calibrate: 0,
            bluetooth_enabled: 1,
            dnd_mode: 0,
            dnd_start_hour: 0,
            dnd_start_minute: 0,
            dnd_end_hour: 0,
            dnd_end_minute: 0,
            calib_target: 426,
            ui_mode: 0,
            graph_max: 1600,
            graph_min: 0,
            yellow_start: 800,
            red_start: 1000,
            device_name,
            illuminate_on_alarm: 1,
            alarm_co2_falling: 0,
            flight_mode: 0,
            advanced_alarms: DEFAULT_ADVANCED_ALARMS,
            co2_scale_factor: 1.0,
        }
    }
}

impl Settings {
    pub fn power_mode(&self) -> PowerMode {
        PowerMode::try_from(self.power_mode).unwrap_or(PowerMode::Low)
    }

    pub fn flight_mode(&self) -> bool {
        self.flight_mode != 0
    }

    /// The device name up to its first NUL.
    pub fn device_name(&self) -> &[u8] {
        let end = self
            .device_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.device_name.len());
        &self.device_name[..end]
    }

    /// Store `name`, cut at the first NUL and at [`DEVICE_NAME_LEN`] bytes.
    pub fn set_device_name(&mut self, name: &[u8]) {
        let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
        let name = &name[..end.min(DEVICE_NAME_LEN)];

        self.device_name = [0u8; DEVICE_NAME_LEN + 1];
        self.device_name[..name.len()].copy_from_slice(name);
    }

    /// Merge the fields present in `value`.
    pub fn integrate(&mut self, value: SettingsBuilder) {
        macro_rules! merge {
            ($($field:ident),* $(,)?) => {
                $(if let Some(v) = value.$field {
                    self.$field = v;
                })*
            };
        }

        merge!(
            cc,
            erase_required,
            power_mode,
            vibrator,
            buzzer,
            auto_calibrate,
            bluetooth_enabled,
            dnd_mode,
            dnd_start_hour,
            dnd_start_minute,
            dnd_end_hour,
            dnd_end_minute,
            calib_target,
            ui_mode,
            graph_max,
            graph_min,
            yellow_start,
            red_start,
            device_name,
            illuminate_on_alarm,
            alarm_co2_falling,
            flight_mode,
            advanced_alarms,
            co2_scale_factor,
        );
    }
}

impl StorageEntry for Settings {
    const KEY: StorageKey = StorageKey::Settings;
}

pub struct Config<S: NorFlash> {
    storage: Storage<S>,
    settings: Settings,
}

impl<S: NorFlash> Config<S> {
    /// Load the settings, falling back to defaults if the region is fresh,
    /// stale or unreadable.
    pub fn init(flash: S, range: Range<u32>) -> Self {
        let mut storage = Storage::new(flash, range);

        if let Err(e) = storage.ensure_initialized() {
            log::error!("Config storage unusable: {:?}", e);
        }

        let settings = match storage.fetch::<Settings>() {
            Ok(Some(settings)) => settings,
            Ok(None) => {
                log::info!("No settings stored, using defaults");
                Settings::default()
            }
            Err(e) => {
                log::error!("Failed to load settings: {:?}", e);
                Settings::default()
            }
        };

        let mut system = Self { storage, settings };
        system.persist();
        system
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn update(&mut self, f: impl FnOnce(Settings) -> Settings) {
        self.settings = f(self.settings);
        self.persist();
    }

    pub fn apply(&mut self, changes: SettingsBuilder) {
        self.settings.integrate(changes);
        self.persist();
    }

    /// Wipe the region and start over from defaults, which request a history erase.
    pub fn factory_reset(&mut self) {
        log::warn!("Config factory reset");

        if let Err(e) = self.storage.erase() {
            log::error!("Failed to erase config: {:?}", e);
        }
        if let Err(e) = self.storage.ensure_initialized() {
            log::error!("Config storage unusable: {:?}", e);
        }

        self.settings = Settings::default();
        self.persist();
    }

    pub fn reset_advanced_alarms(&mut self) {
        let defaults = Settings::default();
        self.update(|s| Settings {
            advanced_alarms: defaults.advanced_alarms,
            illuminate_on_alarm: defaults.illuminate_on_alarm,
            alarm_co2_falling: defaults.alarm_co2_falling,
            ..s
        });
        log::info!("Advanced alarms reset to defaults");
    }

    fn persist(&mut self) {
        match self.storage.store(self.settings) {
            Ok(()) => log::debug!("Settings stored"),
            Err(e) => log::error!("Failed to store settings: {:?}", e),
        }
    }
}
