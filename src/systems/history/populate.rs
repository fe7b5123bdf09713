//! Fills the log with a week of synthetic CO2 readings for app testing.

use crate::{
    bsp::Board,
    context::Context,
    drivers::SpiFlash,
    events::Event,
    scheduler::{Run, Step, Task, Tcb, TICK_MAX},
    systems::protocol::{replies, NusLock},
};

use super::{
    area::StorageArea,
    flashlog::{read_page, write_page, FlashLease},
    record::{Page, Record, RecordType, RECORDS_PER_PAGE},
};

/// Linear page the synthetic data starts at, close to the end of the chip so
/// the data wraps around.
pub const FIRST_PAGE: u32 = 8000;

/// About 10000 records.
pub const PAGE_COUNT: u32 = 312;

pub const RECORD_INTERVAL: u32 = 60;

const WEEK: u32 = 7 * 24 * 60 * 60;

const SAWTOOTH_MIN: u32 = 400;
const SAWTOOTH_MAX: u32 = 4000;
const SAWTOOTH_STEP: u32 = 100;

/// Value of the `n`th synthetic record.
pub fn sawtooth(n: u32) -> u16 {
    let span = SAWTOOTH_MAX - SAWTOOTH_MIN + SAWTOOTH_STEP;
    (SAWTOOTH_MIN + (n * SAWTOOTH_STEP) % span) as u16
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
enum State {
    #[default]
    Wait,
    Erase,
    EraseRelease,
    Write,
    WriteRelease,
    Reply,
}

#[derive(Default)]
pub struct PopulateTask {
    state: State,
    lease: FlashLease,
    nus: NusLock,
    area: StorageArea,
    written: u32,
    timestamp: u32,
    mismatches: u32,
}

impl PopulateTask {
    fn fill(&mut self) -> Page {
        let mut page = Page::erased();
        for slot in 0..RECORDS_PER_PAGE {
            let n = self.written * RECORDS_PER_PAGE as u32 + slot as u32;
            page.set_record(slot, &Record::new(self.timestamp, sawtooth(n), RecordType::Co2));
            self.timestamp = self.timestamp.wrapping_add(RECORD_INTERVAL);
        }
        page
    }

    fn write<F: SpiFlash>(&mut self, flash: &mut F) {
        let page = self.fill();
        if let Err(e) = write_page(flash, &self.area, &page) {
            log::error!("Synthetic page {} write failed: {:?}", self.written, e);
            self.mismatches += 1;
            return;
        }

        match read_page(flash, &self.area) {
            Ok(back) if back == page => {}
            Ok(_) => {
                log::warn!("Synthetic page {} reads back differently", self.written);
                self.mismatches += 1;
            }
            Err(e) => {
                log::warn!("Synthetic page {} read back failed: {:?}", self.written, e);
                self.mismatches += 1;
            }
        }
    }
}

impl Task for PopulateTask {
    fn restart(&mut self) {
        *self = Self::default();
    }
}

impl<'a, B: Board> Run<Context<'a, B>> for PopulateTask {
    fn step(&mut self, tcb: &mut Tcb, cx: &mut Context<'a, B>) -> Step {
        loop {
            match self.state {
                State::Wait => {
                    if !tcb.wait(cx.any(Event::PopulateFakeData), TICK_MAX) {
                        return Step::Yield;
                    }

                    self.timestamp = cx.now().wrapping_sub(WEEK);
                    self.area = StorageArea::from_linear(FIRST_PAGE);
                    self.written = 0;
                    self.mismatches = 0;
                    log::info!(
                        "Populating {} pages from sector {} page {}, first timestamp {}",
                        PAGE_COUNT,
                        self.area.sector,
                        self.area.page,
                        self.timestamp
                    );
                    self.state = State::Erase;
                }
                State::Erase => {
                    if !self.lease.acquire(tcb, &cx.shared.bus) {
                        return Step::Yield;
                    }
                    if let Err(e) = cx.board.flash().erase_chip() {
                        log::error!("Chip erase failed: {:?}", e);
                    }
                    self.state = State::EraseRelease;
                }
                State::EraseRelease => {
                    if !self.lease.release(tcb, cx.board.flash()) {
                        return Step::Yield;
                    }
                    cx.history.erased();
                    self.state = State::Write;
                }
                State::Write => {
                    if !self.lease.acquire(tcb, &cx.shared.bus) {
                        return Step::Yield;
                    }
                    self.write(cx.board.flash());
                    self.state = State::WriteRelease;
                }
                State::WriteRelease => {
                    if !self.lease.release(tcb, cx.board.flash()) {
                        return Step::Yield;
                    }

                    self.written += 1;
                    self.area = self.area.next();
                    if self.written < PAGE_COUNT {
                        self.state = State::Write;
                        // One page per pass.
                        return Step::Yield;
                    }

                    if self.mismatches > 0 {
                        log::warn!("{} synthetic pages failed verification", self.mismatches);
                    }
                    log::info!("Synthetic history written");
                    cx.history.set_cursor(self.area);
                    self.state = State::Reply;
                }
                State::Reply => {
                    if !self.nus.take(tcb, cx.events()) {
                        return Step::Yield;
                    }
                    cx.send(&replies::populate_done());
                    self.nus.give();
                    cx.clear(Event::PopulateFakeData);
                    self.state = State::Wait;
                }
            }
        }
    }
}
