//! Flash I/O for the history log and the bus lease the history tasks hold
//! across yields.

use crate::{
    drivers::SpiFlash,
    scheduler::{Tcb, TICK_MAX},
    systems::bus::{BusGuard, BusMode, SpiBus},
};

use super::{
    area::StorageArea,
    record::{HalfPage, Page, Record, HALF_PAGE_SIZE, RECORD_SIZE},
};

/// Holds the SPI bus in flash mode between an acquire and a release step.
///
/// Both steps follow the [`Tcb::wait`] contract: they return `false` while the
/// task has to yield and call again from the same state.
#[derive(Default)]
pub struct FlashLease {
    guard: Option<BusGuard<'static>>,
}

impl FlashLease {
    pub fn acquire(&mut self, tcb: &mut Tcb, bus: &'static SpiBus) -> bool {
        if self.guard.is_some() {
            return true;
        }

        if !tcb.wait(bus.is_idle(), TICK_MAX) {
            return false;
        }

        self.guard = bus.try_acquire(BusMode::Flash);
        self.guard.is_some()
    }

    /// Hand the bus back once the chip finished its last operation.
    pub fn release<F: SpiFlash>(&mut self, tcb: &mut Tcb, flash: &mut F) -> bool {
        if self.guard.is_none() {
            return true;
        }

        let busy = match flash.is_busy() {
            Ok(busy) => busy,
            Err(e) => {
                log::warn!("Flash status read failed: {:?}", e);
                false
            }
        };

        if !tcb.wait(!busy, TICK_MAX) {
            return false;
        }

        self.guard = None;
        true
    }

    /// Drop the bus without waiting, for task restarts.
    pub fn abandon(&mut self) {
        self.guard = None;
    }
}

pub fn read_page<F: SpiFlash>(flash: &mut F, area: &StorageArea) -> Result<Page, F::Error> {
    let mut page = Page::erased();
    flash.read(area.address(), page.as_bytes_mut())?;
    Ok(page)
}

pub fn read_half_page<F: SpiFlash>(flash: &mut F, address: u32) -> Result<HalfPage, F::Error> {
    let mut half = HalfPage([0xFF; HALF_PAGE_SIZE]);
    flash.read(address, &mut half.0)?;
    Ok(half)
}

/// Whether the slot at `area.count` still reads as erased and can be programmed.
pub fn slot_is_erased<F: SpiFlash>(flash: &mut F, area: &StorageArea) -> Result<bool, F::Error> {
    let mut slot = [0u8; RECORD_SIZE];
    flash.read(area.slot_address(), &mut slot)?;
    Ok(slot.iter().all(|&b| b == 0xFF))
}

/// Program `record` into the free slot at `area.count`.
///
/// The timestamp goes last: a write cut short leaves it erased and the slot
/// reads as unused.
pub fn write_record<F: SpiFlash>(
    flash: &mut F,
    area: &StorageArea,
    record: &Record,
) -> Result<(), F::Error> {
    let bytes = record.encode();
    let address = area.slot_address();

    flash.program(address + 4, &bytes[4..])?;
    flash.program(address, &bytes[..4])
}

pub fn write_page<F: SpiFlash>(flash: &mut F, area: &StorageArea, page: &Page) -> Result<(), F::Error> {
    flash.program(area.address(), page.as_bytes())
}
