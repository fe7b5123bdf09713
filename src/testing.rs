//! Host doubles for the board peripherals.

use std::{cell::RefCell, collections::VecDeque, convert::Infallible, ops::Range, rc::Rc};

use embedded_hal::spi::{ErrorType, Operation, SpiDevice};
use embedded_storage::nor_flash::{
    check_erase, check_read, check_write, ErrorType as NorErrorType, NorFlash, NorFlashErrorKind,
    ReadNorFlash,
};

use crate::{
    bsp::{
        Annunciator, BatteryGauge, Board, Co2Sensor, Measurement, SensorDetails, SensorFault,
        Transport,
    },
    context::{Context, Device},
    drivers::zb25d16::Zb25d16,
    events::Event,
    scheduler::{Run, Scheduled, Task},
    shared::Shared,
    systems::{
        config::{Config, Settings},
        history::{record::Record, History},
    },
    util::Millivolts,
};

/// Ticks after which [`Harness::run_until`] gives up.
const RUN_LIMIT: u32 = 1_000_000;

const FLASH_SIZE: usize = 2 * 1024 * 1024;
const FLASH_SECTOR: usize = 4096;

/// Status reads that report busy after an erase was started.
const ERASE_BUSY_READS: u32 = 3;

struct Chip {
    data: Vec<u8>,
    write_enabled: bool,
    busy_reads: u32,
    program_sizes: Vec<usize>,
    sector_erases: Vec<u32>,
    chip_erases: u32,
    tear_after: Option<usize>,
}

impl Chip {
    fn program_byte(&mut self, address: usize, byte: u8) {
        match self.tear_after.as_mut() {
            Some(0) => return,
            Some(left) => *left -= 1,
            None => {}
        }
        self.data[address % FLASH_SIZE] &= byte;
    }
}

/// A ZB25D16 on the other end of an SPI bus, backed by RAM.
///
/// Clones share the same chip so a test can inspect it after handing one to
/// the driver.
#[derive(Clone)]
pub struct RamFlash(Rc<RefCell<Chip>>);

impl RamFlash {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(Chip {
            data: vec![0xFF; FLASH_SIZE],
            write_enabled: false,
            busy_reads: 0,
            program_sizes: Vec::new(),
            sector_erases: Vec::new(),
            chip_erases: 0,
            tear_after: None,
        })))
    }

    /// Lengths of every page program data phase so far.
    pub fn program_sizes(&self) -> Vec<usize> {
        self.0.borrow().program_sizes.clone()
    }

    pub fn sector_erases(&self) -> Vec<u32> {
        self.0.borrow().sector_erases.clone()
    }

    pub fn chip_erases(&self) -> u32 {
        self.0.borrow().chip_erases
    }

    /// Cut power after `bytes` more programmed bytes: later programming is lost.
    pub fn tear_after(&self, bytes: usize) {
        self.0.borrow_mut().tear_after = Some(bytes);
    }

    /// Power is back.
    pub fn heal(&self) {
        self.0.borrow_mut().tear_after = None;
    }
}

impl Default for RamFlash {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorType for RamFlash {
    type Error = Infallible;
}

impl SpiDevice for RamFlash {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Infallible> {
        let mut chip = self.0.borrow_mut();
        let mut operations = operations.iter_mut();

        let header = match operations.next() {
            Some(Operation::Write(header)) if !header.is_empty() => header.to_vec(),
            _ => return Ok(()),
        };
        let address = match header.get(1..4) {
            Some(a) => u32::from_be_bytes([0, a[0], a[1], a[2]]) as usize,
            None => 0,
        };

        match header[0] {
            0x06 => chip.write_enabled = true,
            0x05 => {
                let mut status = if chip.write_enabled { 0x02 } else { 0x00 };
                if chip.busy_reads > 0 {
                    chip.busy_reads -= 1;
                    status |= 0x01;
                }
                for op in operations {
                    if let Operation::Read(buf) = op {
                        buf.fill(status);
                    }
                }
            }
            0x03 => {
                let mut address = address;
                for op in operations {
                    if let Operation::Read(buf) = op {
                        for byte in buf.iter_mut() {
                            *byte = chip.data[address % FLASH_SIZE];
                            address += 1;
                        }
                    }
                }
            }
            0x02 if chip.write_enabled => {
                chip.write_enabled = false;
                let mut address = address;
                for op in operations {
                    if let Operation::Write(data) = op {
                        chip.program_sizes.push(data.len());
                        for &byte in data.iter() {
                            chip.program_byte(address, byte);
                            address += 1;
                        }
                    }
                }
            }
            0x20 if chip.write_enabled => {
                chip.write_enabled = false;
                let start = address - address % FLASH_SECTOR;
                chip.data[start..start + FLASH_SECTOR].fill(0xFF);
                chip.sector_erases.push(start as u32);
                chip.busy_reads = ERASE_BUSY_READS;
            }
            0xC7 if chip.write_enabled => {
                chip.write_enabled = false;
                chip.data.fill(0xFF);
                chip.chip_erases += 1;
                chip.busy_reads = ERASE_BUSY_READS;
            }
            0x9F => {
                for op in operations {
                    if let Operation::Read(buf) = op {
                        for (byte, id) in buf.iter_mut().zip([0x5E, 0x40, 0x15]) {
                            *byte = id;
                        }
                    }
                }
            }
            _ => {}
        }

        Ok(())
    }
}

/// Internal MCU flash for the configuration store.
#[derive(Clone)]
pub struct RamNorFlash(Rc<RefCell<Vec<u8>>>);

impl RamNorFlash {
    pub const RANGE: Range<u32> = 0..4 * 4096;

    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(vec![0xFF; Self::RANGE.end as usize])))
    }
}

impl Default for RamNorFlash {
    fn default() -> Self {
        Self::new()
    }
}

impl NorErrorType for RamNorFlash {
    type Error = NorFlashErrorKind;
}

impl ReadNorFlash for RamNorFlash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        check_read(self, offset, bytes.len())?;
        let offset = offset as usize;
        bytes.copy_from_slice(&self.0.borrow()[offset..offset + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.0.borrow().len()
    }
}

impl NorFlash for RamNorFlash {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = 4096;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        check_erase(self, from, to)?;
        self.0.borrow_mut()[from as usize..to as usize].fill(0xFF);
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        check_write(self, offset, bytes.len())?;
        let offset = offset as usize;
        let mut data = self.0.borrow_mut();
        for (cell, byte) in data[offset..offset + bytes.len()].iter_mut().zip(bytes) {
            *cell &= *byte;
        }
        Ok(())
    }
}

/// A fresh `Shared` with a static lifetime, as `Shared::init` gives on target.
pub fn leak_shared() -> &'static Shared {
    Box::leak(Box::new(Shared::new()))
}

/// A sensor that hands out queued readings.
#[derive(Default)]
pub struct ScriptedSensor {
    pub readings: VecDeque<Measurement>,
    pub powered: bool,
    pub power_ons: u32,
    pub power_offs: u32,
    pub starts: u32,
    pub stops: u32,
    pub factory_resets: u32,
    /// Last self calibration setting written.
    pub asc: Option<bool>,
    /// `None` makes the variant query fail.
    pub variant: Option<u8>,
    pub details: Option<SensorDetails>,
}

impl ScriptedSensor {
    pub fn push(&mut self, ppm: u16) {
        self.readings.push_back(Measurement { co2: ppm, status: 0 });
    }
}

impl Co2Sensor for ScriptedSensor {
    fn power_on(&mut self) {
        self.power_ons += 1;
        self.powered = true;
    }

    fn power_off(&mut self) {
        self.power_offs += 1;
        self.powered = false;
    }

    fn init(&mut self) -> Result<(), SensorFault> {
        Ok(())
    }

    fn start_measurement(&mut self) -> Result<(), SensorFault> {
        self.starts += 1;
        Ok(())
    }

    fn stop_measurement(&mut self) -> Result<(), SensorFault> {
        self.stops += 1;
        Ok(())
    }

    fn data_ready(&mut self) -> Result<bool, SensorFault> {
        Ok(!self.readings.is_empty())
    }

    fn read(&mut self) -> nb::Result<Measurement, SensorFault> {
        self.readings.pop_front().ok_or(nb::Error::WouldBlock)
    }

    fn factory_reset(&mut self) -> Result<(), SensorFault> {
        self.factory_resets += 1;
        Ok(())
    }

    fn set_asc(&mut self, enabled: bool) -> Result<(), SensorFault> {
        self.asc = Some(enabled);
        Ok(())
    }

    fn variant(&mut self) -> Result<u8, SensorFault> {
        self.variant.ok_or(SensorFault::Device)
    }

    fn details(&mut self) -> Result<SensorDetails, SensorFault> {
        self.details.ok_or(SensorFault::Device)
    }
}

#[derive(Debug)]
pub struct NotConnected;

/// Keeps every frame put on the link.
pub struct RecordingTransport {
    shared: &'static Shared,
    pub sent: Vec<Vec<u8>>,
    pub connected: bool,
    pub advertising: bool,
    pub fast: bool,
}

impl Transport for RecordingTransport {
    type Error = NotConnected;

    fn transmit(&mut self, bytes: &[u8]) -> Result<(), NotConnected> {
        if !self.connected {
            return Err(NotConnected);
        }
        self.sent.push(bytes.to_vec());
        self.shared.on_tx_complete();
        Ok(())
    }

    fn start_advertising(&mut self) {
        self.advertising = true;
    }

    fn stop_advertising(&mut self) {
        self.advertising = false;
    }

    fn set_fast_connection(&mut self, fast: bool) {
        self.fast = fast;
    }
}

/// Logs every output change as `(buzzer, vibrator)`.
#[derive(Default)]
pub struct RecordingAnnunciator {
    pub log: Vec<(bool, bool)>,
}

impl Annunciator for RecordingAnnunciator {
    fn set(&mut self, buzzer: bool, vibrator: bool) {
        self.log.push((buzzer, vibrator));
    }
}

pub struct FakeBattery {
    pub millivolts: u16,
    pub charging: bool,
}

impl Default for FakeBattery {
    fn default() -> Self {
        Self {
            millivolts: 3900,
            charging: false,
        }
    }
}

impl BatteryGauge for FakeBattery {
    fn sample(&mut self) -> Millivolts {
        Millivolts(self.millivolts)
    }

    fn is_charging(&mut self) -> bool {
        self.charging
    }
}

pub struct TestBoard {
    /// The chip behind `flash`, for inspection.
    pub spi: RamFlash,
    pub flash: Zb25d16<RamFlash>,
    pub sensor: ScriptedSensor,
    pub transport: RecordingTransport,
    pub annunciator: RecordingAnnunciator,
    pub battery: FakeBattery,
    pub resets: u32,
    pub reset_reason: u16,
}

impl Board for TestBoard {
    type Flash = Zb25d16<RamFlash>;
    type Sensor = ScriptedSensor;
    type Transport = RecordingTransport;
    type Annunciator = RecordingAnnunciator;
    type Battery = FakeBattery;
    type ConfigFlash = RamNorFlash;

    fn flash(&mut self) -> &mut Self::Flash {
        &mut self.flash
    }

    fn sensor(&mut self) -> &mut Self::Sensor {
        &mut self.sensor
    }

    fn transport(&mut self) -> &mut Self::Transport {
        &mut self.transport
    }

    fn annunciator(&mut self) -> &mut Self::Annunciator {
        &mut self.annunciator
    }

    fn battery(&mut self) -> &mut Self::Battery {
        &mut self.battery
    }

    fn system_reset(&mut self) {
        self.resets += 1;
    }

    fn reset_reason(&self) -> u16 {
        self.reset_reason
    }
}

/// Everything a task needs, with the board replaced by doubles.
pub struct Harness {
    pub shared: &'static Shared,
    pub board: TestBoard,
    pub config: Config<RamNorFlash>,
    pub history: History,
    pub device: Device,
    /// Records taken off the queue by [`Harness::flush`].
    pub records: Vec<Record>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_flash(RamFlash::new())
    }

    /// Boot on an existing history chip, with settings that are past their
    /// first boot.
    pub fn with_flash(spi: RamFlash) -> Self {
        let shared = leak_shared();
        let mut config = Config::init(RamNorFlash::new(), RamNorFlash::RANGE);
        config.update(|s| Settings {
            erase_required: false,
            ..s
        });
        let device = Device::new(config.settings().auto_calibrate != 0, config.settings().calib_target);

        Self {
            shared,
            board: TestBoard {
                flash: Zb25d16::new(spi.clone()).unwrap(),
                spi,
                sensor: ScriptedSensor::default(),
                transport: RecordingTransport {
                    shared,
                    sent: Vec::new(),
                    connected: true,
                    advertising: true,
                    fast: false,
                },
                annunciator: RecordingAnnunciator::default(),
                battery: FakeBattery::default(),
                resets: 0,
                reset_reason: 0,
            },
            config,
            history: History::new(),
            device,
            records: Vec::new(),
        }
    }

    pub fn context(&mut self) -> Context<'_, TestBoard> {
        Context {
            shared: self.shared,
            board: &mut self.board,
            config: &mut self.config,
            history: &mut self.history,
            device: &mut self.device,
        }
    }

    fn pass<T>(&mut self, task: &mut Scheduled<T>)
    where
        T: Task + for<'a> Run<Context<'a, TestBoard>>,
    {
        task.run(&mut self.context());
    }

    fn tick<T: Task>(&mut self, task: &mut Scheduled<T>) {
        self.shared.on_tick();
        self.shared.clock.take_ticks();
        task.tick();
    }

    /// Run `task` tick by tick until `done` holds after a pass.
    pub fn run_until<T>(
        &mut self,
        task: &mut Scheduled<T>,
        mut done: impl FnMut(&mut Harness, &Scheduled<T>) -> bool,
    ) where
        T: Task + for<'a> Run<Context<'a, TestBoard>>,
    {
        for _ in 0..RUN_LIMIT {
            self.pass(task);
            if done(self, task) {
                return;
            }
            self.tick(task);
        }
        panic!("condition not reached after {} ticks", RUN_LIMIT);
    }

    /// Run `task` for `ticks` ticks.
    pub fn spin<T>(&mut self, task: &mut Scheduled<T>, ticks: u32)
    where
        T: Task + for<'a> Run<Context<'a, TestBoard>>,
    {
        for _ in 0..ticks {
            self.pass(task);
            self.tick(task);
        }
    }

    /// Play the storage task: take every queued record.
    pub fn flush(&mut self) {
        while let Some(record) = self.history.next_record().copied() {
            self.records.push(record);
            self.history.commit();
        }
        self.shared.events.clear(Event::Co2UpHis);
    }
}
