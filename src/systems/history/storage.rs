//! Drains the record queue into flash.

use crate::{
    bsp::Board,
    context::Context,
    drivers::SpiFlash,
    events::Event,
    scheduler::{Run, Scheduled, Step, Task, Tcb, TICK_MAX},
    systems::{
        config::Settings,
        protocol::{replies, NusLock},
    },
};

use super::{
    flashlog::{slot_is_erased, write_record, FlashLease},
    RecoverTask,
};

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
enum State {
    #[default]
    Start,
    Recover,
    Idle,
    Erase,
    EraseRelease,
    EraseReply,
    Drain,
    WriteRelease,
    SectorErase,
    SectorEraseRelease,
}

pub struct StorageTask {
    state: State,
    lease: FlashLease,
    nus: NusLock,
    recover: Scheduled<RecoverTask>,
}

impl StorageTask {
    pub fn new() -> Self {
        Self {
            state: State::Start,
            lease: FlashLease::default(),
            nus: NusLock::default(),
            recover: Scheduled::new(RecoverTask::default()),
        }
    }

    /// Waiting for records or an erase request.
    pub fn is_idle(&self) -> bool {
        self.state == State::Idle
    }

    fn flushed<B: Board>(cx: &mut Context<'_, B>) {
        cx.clear(Event::Co2UpHis);
        if cx.any(Event::BatLowWarning) {
            cx.clear(Event::BatLowWarning);
            cx.set(Event::BatLow);
        }
    }
}

impl Default for StorageTask {
    fn default() -> Self {
        Self::new()
    }
}

impl Task for StorageTask {
    fn restart(&mut self) {
        self.state = State::Start;
        self.lease.abandon();
        self.nus.give();
    }

    fn tick_children(&mut self) {
        self.recover.tick();
    }
}

impl<'a, B: Board> Run<Context<'a, B>> for StorageTask {
    fn step(&mut self, tcb: &mut Tcb, cx: &mut Context<'a, B>) -> Step {
        loop {
            match self.state {
                State::Start => {
                    if let Err(e) = cx.board.flash().wake() {
                        log::error!("Flash wake failed: {:?}", e);
                    }
                    log::info!("History storage started");
                    self.state = State::Recover;
                }
                State::Recover => {
                    if !tcb.wait_sync(&mut self.recover, cx, TICK_MAX) {
                        return Step::Yield;
                    }

                    // Set once after a firmware update or factory reset.
                    if cx.config.settings().erase_required {
                        cx.config.update(|s| Settings {
                            erase_required: false,
                            ..s
                        });
                        cx.history.request_erase();
                    }
                    self.state = State::Idle;
                }
                State::Idle => {
                    let events = cx.events();
                    let due = (events.any(Event::Co2UpHis | Event::BatLowWarning)
                        && !events.any(Event::RequestHistory))
                        || cx.history.erase_pending();
                    if !tcb.wait(due, TICK_MAX) {
                        return Step::Yield;
                    }

                    if cx.any(Event::BatLow) {
                        log::info!("History storage stopped on low battery");
                        if let Err(e) = cx.board.flash().sleep() {
                            log::warn!("Flash sleep failed: {:?}", e);
                        }
                        return Step::Exit;
                    }

                    self.state = if cx.history.erase_pending() {
                        State::Erase
                    } else {
                        State::Drain
                    };
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
                    log::info!("History erased");
                    self.state = State::EraseReply;
                }
                State::EraseReply => {
                    if !self.nus.take(tcb, cx.events()) {
                        return Step::Yield;
                    }
                    cx.send(&replies::erase_done());
                    self.nus.give();
                    self.state = State::Idle;
                }
                State::Drain => {
                    if cx.history.pending_sector_erase().is_some() {
                        self.state = State::SectorErase;
                        continue;
                    }

                    let Some(record) = cx.history.next_record().copied() else {
                        Self::flushed(cx);
                        self.state = State::Idle;
                        continue;
                    };

                    if !self.lease.acquire(tcb, &cx.shared.bus) {
                        return Step::Yield;
                    }

                    let cursor = cx.history.cursor();
                    self.state = State::WriteRelease;

                    // A failed or torn program can leave bytes behind.
                    match slot_is_erased(cx.board.flash(), &cursor) {
                        Ok(true) => {}
                        Ok(false) => {
                            cx.history.skip_slot();
                            continue;
                        }
                        Err(e) => {
                            log::error!("Slot check failed: {:?}", e);
                            cx.history.discard();
                            continue;
                        }
                    }

                    match write_record(cx.board.flash(), &cursor, &record) {
                        Ok(()) => {
                            log::debug!(
                                "Wrote {:?} at sector {} page {} slot {}",
                                record,
                                cursor.sector,
                                cursor.page,
                                cursor.count
                            );
                            cx.history.commit();
                        }
                        Err(e) => {
                            log::error!("Record write failed: {:?}", e);
                            cx.history.discard();
                        }
                    }
                }
                State::WriteRelease => {
                    if !self.lease.release(tcb, cx.board.flash()) {
                        return Step::Yield;
                    }
                    self.state = State::Drain;
                }
                State::SectorErase => {
                    if !self.lease.acquire(tcb, &cx.shared.bus) {
                        return Step::Yield;
                    }
                    if let Some(address) = cx.history.pending_sector_erase() {
                        if let Err(e) = cx.board.flash().erase_sector(address) {
                            log::error!("Sector erase at {:#x} failed: {:?}", address, e);
                        }
                        cx.history.sector_erased();
                    }
                    self.state = State::SectorEraseRelease;
                }
                State::SectorEraseRelease => {
                    if !self.lease.release(tcb, cx.board.flash()) {
                        return Step::Yield;
                    }
                    self.state = State::Drain;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        drivers::zb25d16::Zb25d16,
        systems::history::{
            area::StorageArea,
            flashlog::{read_page, write_page},
            record::{Page, Record, RecordType, RECORDS_PER_PAGE},
            BAR_COUNT,
        },
        testing::{Harness, RamFlash},
    };

    fn booted(harness: &mut Harness) -> Scheduled<StorageTask> {
        let mut task = Scheduled::new(StorageTask::new());
        harness.run_until(&mut task, |_, t| t.task().is_idle());
        task
    }

    fn append(harness: &mut Harness, task: &mut Scheduled<StorageTask>, timestamp: u32, value: u16) {
        harness.history.add_record(timestamp, value, RecordType::Co2);
        harness.shared.events.set(Event::Co2UpHis);
        harness.run_until(task, |h, _| !h.shared.events.any(Event::Co2UpHis));
    }

    #[test]
    fn one_page_reads_back() {
        let mut harness = Harness::new();
        let mut task = booted(&mut harness);

        for i in 0..RECORDS_PER_PAGE as u32 {
            harness.history.add_record(0x2000_0000 + i * 60, 400 + i as u16, RecordType::Co2);
        }
        harness.shared.events.set(Event::Co2UpHis);
        harness.run_until(&mut task, |h, _| !h.shared.events.any(Event::Co2UpHis));

        let page = read_page(harness.board.flash(), &StorageArea::new(0, 0)).unwrap();
        assert_eq!(page.record_count(), RECORDS_PER_PAGE);
        assert_eq!(
            page.record(RECORDS_PER_PAGE - 1),
            Record::new(0x2000_0000 + 31 * 60, 431, RecordType::Co2)
        );
        assert_eq!(harness.history.cursor(), StorageArea::new(0, 1));
    }

    #[test]
    fn ten_thousand_appends() {
        let mut harness = Harness::new();
        let mut task = booted(&mut harness);
        let erases_before = harness.board.spi.sector_erases().len();

        let mut pages_advanced = 0;
        let mut last = harness.history.cursor();
        for i in 0..10_000u32 {
            append(&mut harness, &mut task, 0x2000_0000 + i, (i % 3000) as u16);
            let cursor = harness.history.cursor();
            if !cursor.same_page(&last) {
                pages_advanced += 1;
                last = cursor;
            }
        }

        // ceil(10000 / 32) = 313 pages touched: 312 filled and left behind,
        // the open one holding the last 16 records.
        assert_eq!(pages_advanced, 312);
        assert_eq!(pages_advanced + 1, (10_000 + RECORDS_PER_PAGE - 1) / RECORDS_PER_PAGE);
        assert_eq!(harness.history.cursor(), StorageArea { sector: 19, page: 8, count: 16 });

        // One erase for each sector entered after the first.
        let erases = &harness.board.spi.sector_erases()[erases_before..];
        let expected: Vec<u32> = (1..=19).map(|s| s * 4096).collect();
        assert_eq!(erases, expected.as_slice());
    }

    #[test]
    fn torn_record_is_not_counted_after_reboot() {
        let spi = RamFlash::new();
        let mut harness = Harness::with_flash(spi.clone());
        let mut task = booted(&mut harness);

        for i in 0..5 {
            append(&mut harness, &mut task, 0x2000_0000 + i, 500 + i as u16);
        }

        spi.tear_after(4);
        append(&mut harness, &mut task, 0x2000_0005, 999);
        spi.heal();

        let mut rebooted = Harness::with_flash(spi.clone());
        let mut task = booted(&mut rebooted);

        let page = read_page(rebooted.board.flash(), &StorageArea::new(0, 0)).unwrap();
        assert_eq!(page.record_count(), 5);
        assert_eq!(rebooted.history.bars()[..6], [504, 503, 502, 501, 500, 0]);

        // The dirty slot is skipped.
        assert_eq!(rebooted.history.cursor(), StorageArea::new(0, 1));
        append(&mut rebooted, &mut task, 0x2000_0010, 700);
        let page = read_page(rebooted.board.flash(), &StorageArea::new(0, 1)).unwrap();
        assert_eq!(page.record(0).value, 700);
    }

    /// Old data in sector 0, the newest page one slot short of the chip end.
    fn chip_end_image() -> RamFlash {
        let spi = RamFlash::new();
        let mut flash = Zb25d16::new(spi.clone()).unwrap();

        for page in 0..2u8 {
            let mut data = Page::erased();
            for slot in 0..RECORDS_PER_PAGE {
                let ts = 0x1800_0000 + (page as u32 * 32 + slot as u32) * 60;
                data.set_record(slot, &Record::new(ts, 450, RecordType::Co2));
            }
            write_page(&mut flash, &StorageArea::new(0, page), &data).unwrap();
        }

        for page in 0..16u8 {
            let count = if page == 15 { RECORDS_PER_PAGE - 1 } else { RECORDS_PER_PAGE };
            let mut data = Page::erased();
            for slot in 0..count {
                let ts = 0x3000_0000 + (page as u32 * 32 + slot as u32) * 60;
                let value = if page == 15 { 600 + slot as u16 } else { 500 };
                data.set_record(slot, &Record::new(ts, value, RecordType::Co2));
            }
            write_page(&mut flash, &StorageArea::new(511, page), &data).unwrap();
        }

        spi
    }

    #[test]
    fn wraps_from_the_chip_end_to_sector_zero() {
        let spi = chip_end_image();
        let mut harness = Harness::with_flash(spi.clone());
        let mut task = booted(&mut harness);
        assert_eq!(harness.history.cursor(), StorageArea { sector: 511, page: 15, count: 31 });
        let erases_before = spi.sector_erases().len();

        append(&mut harness, &mut task, 0x3100_0000, 700);
        assert_eq!(harness.history.cursor(), StorageArea::new(0, 0));
        assert_eq!(spi.sector_erases()[erases_before..], [0]);

        let last = read_page(harness.board.flash(), &StorageArea::new(511, 15)).unwrap();
        assert_eq!(last.record(31), Record::new(0x3100_0000, 700, RecordType::Co2));

        append(&mut harness, &mut task, 0x3100_0001, 701);
        assert_eq!(harness.history.cursor(), StorageArea { sector: 0, page: 0, count: 1 });
        let first = read_page(harness.board.flash(), &StorageArea::new(0, 0)).unwrap();
        assert_eq!(first.record_count(), 1);
        assert_eq!(first.record(0).value, 701);
        assert!(read_page(harness.board.flash(), &StorageArea::new(0, 1)).unwrap().is_empty());
    }

    #[test]
    fn recovers_across_the_chip_end() {
        let spi = chip_end_image();
        let mut harness = Harness::with_flash(spi.clone());
        let mut task = booted(&mut harness);
        for (i, value) in (700..=705).enumerate() {
            append(&mut harness, &mut task, 0x3100_0000 + i as u32, value);
        }
        assert_eq!(harness.history.cursor(), StorageArea { sector: 0, page: 0, count: 5 });

        let mut rebooted = Harness::with_flash(spi.clone());
        booted(&mut rebooted);
        assert_eq!(rebooted.history.cursor(), StorageArea { sector: 0, page: 0, count: 5 });

        let expected: Vec<u16> = (700..=705).rev().chain((605..=630).rev()).collect();
        assert_eq!(rebooted.history.bars().as_slice(), expected.as_slice());
    }

    #[test]
    fn unsynced_pages_after_the_newest_synced_page_are_kept() {
        let spi = RamFlash::new();
        {
            let mut flash = Zb25d16::new(spi.clone()).unwrap();
            let mut synced = Page::erased();
            for slot in 0..RECORDS_PER_PAGE {
                synced.set_record(slot, &Record::new(0x3000_0000 + slot as u32 * 60, 420, RecordType::Co2));
            }
            write_page(&mut flash, &StorageArea::new(2, 0), &synced).unwrap();

            let mut unsynced = Page::erased();
            for (slot, ts) in [100, 160, 220].into_iter().enumerate() {
                unsynced.set_record(slot, &Record::new(ts, 430, RecordType::Co2));
            }
            write_page(&mut flash, &StorageArea::new(2, 1), &unsynced).unwrap();
        }

        let mut harness = Harness::with_flash(spi.clone());
        let mut task = booted(&mut harness);
        assert_eq!(harness.history.cursor(), StorageArea::new(2, 2));
        assert_eq!(harness.history.pending_sector_erase(), None);

        append(&mut harness, &mut task, 0x3000_1000, 700);
        let written = read_page(harness.board.flash(), &StorageArea::new(2, 2)).unwrap();
        assert_eq!(written.record(0), Record::new(0x3000_1000, 700, RecordType::Co2));

        let kept = read_page(harness.board.flash(), &StorageArea::new(2, 1)).unwrap();
        assert_eq!(kept.record_count(), 3);
        assert_eq!(kept.record(0), Record::new(100, 430, RecordType::Co2));
        assert!(spi.sector_erases().is_empty());
    }

    #[test]
    fn dirty_slot_is_skipped_not_reused() {
        let mut harness = Harness::new();
        let mut task = booted(&mut harness);
        append(&mut harness, &mut task, 0x2000_0000, 600);

        // Leftover payload bytes from an interrupted write.
        let dirty = StorageArea { sector: 0, page: 0, count: 1 };
        harness.board.flash().program(dirty.slot_address() + 4, &[0x12, 0x34]).unwrap();

        append(&mut harness, &mut task, 0x2000_0001, 700);
        assert_eq!(harness.history.cursor(), StorageArea { sector: 0, page: 0, count: 3 });

        let page = read_page(harness.board.flash(), &StorageArea::new(0, 0)).unwrap();
        assert_eq!(page.record(0).value, 600);
        assert!(!page.record(1).is_valid());
        assert_eq!(page.record(2), Record::new(0x2000_0001, 700, RecordType::Co2));
    }

    #[test]
    fn recovery_is_idempotent() {
        let spi = RamFlash::new();
        {
            let mut flash = Zb25d16::new(spi.clone()).unwrap();
            // Sector 3 holds the newest synced data, sector 7 older data.
            for (sector, base) in [(3u16, 0x3000_0000u32), (7, 0x2000_0000)] {
                for page in 0..4u8 {
                    let area = StorageArea::new(sector, page);
                    let count = if page == 3 { 10 } else { RECORDS_PER_PAGE };
                    for slot in 0..count {
                        let ts = base + (page as u32 * 32 + slot as u32) * 60;
                        let record = Record::new(ts, 400 + slot as u16, RecordType::Co2);
                        let area = StorageArea { count: slot as u8, ..area };
                        crate::systems::history::flashlog::write_record(&mut flash, &area, &record).unwrap();
                    }
                }
            }
        }

        let mut results = Vec::new();
        for _ in 0..2 {
            let mut harness = Harness::with_flash(spi.clone());
            booted(&mut harness);
            results.push((harness.history.cursor(), *harness.history.bars()));
        }

        assert_eq!(results[0], results[1]);
        assert_eq!(results[0].0, StorageArea { sector: 3, page: 3, count: 10 });
        let bars = results[0].1;
        assert_eq!(bars[..10], [409, 408, 407, 406, 405, 404, 403, 402, 401, 400]);
        assert_eq!(bars[10], 431);
        assert!(bars.iter().take(BAR_COUNT).all(|&v| v != 0));
    }

    #[test]
    fn erase_request_wipes_and_replies() {
        let mut harness = Harness::new();
        let mut task = booted(&mut harness);
        append(&mut harness, &mut task, 0x2000_0000, 800);

        harness.history.request_erase();
        harness.run_until(&mut task, |h, _| !h.history.erase_pending() && !h.board.transport.sent.is_empty());

        assert_eq!(harness.board.spi.chip_erases(), 1);
        assert_eq!(harness.history.cursor(), StorageArea::default());
        assert_eq!(harness.history.bars()[0], 0);
        assert_eq!(harness.board.transport.sent[0], vec![0xFF, 0xAA, 0xFD, 0x01, 0x01, 0xA8]);
        assert!(!harness.shared.events.any(Event::NusTaken));
    }

    #[test]
    fn erase_required_is_consumed_at_boot() {
        let mut harness = Harness::new();
        harness.config.update(|s| Settings {
            erase_required: true,
            ..s
        });

        let mut task = Scheduled::new(StorageTask::new());
        harness.run_until(&mut task, |h, _| h.board.spi.chip_erases() == 1 && !h.history.erase_pending());
        assert!(!harness.config.settings().erase_required);
    }

    #[test]
    fn low_battery_warning_becomes_low_after_flush() {
        let mut harness = Harness::new();
        let mut task = booted(&mut harness);

        harness.history.add_record(0x2000_0000, 3300, RecordType::BatteryLow);
        harness.shared.events.set(Event::BatLowWarning);
        harness.run_until(&mut task, |h, _| h.shared.events.any(Event::BatLow));
        assert_eq!(harness.history.queued(), 0);
        assert!(!harness.shared.events.any(Event::BatLowWarning));

        // The next wake up ends the task.
        harness.history.add_record(0x2000_0001, 1, RecordType::Co2);
        harness.shared.events.set(Event::Co2UpHis);
        harness.run_until(&mut task, |_, t| t.tcb().is_stopped());
        assert_eq!(harness.history.queued(), 1);
    }

    #[test]
    fn history_requests_hold_off_writes() {
        let mut harness = Harness::new();
        let mut task = booted(&mut harness);

        harness.shared.events.set(Event::RequestHistory | Event::Co2UpHis);
        harness.history.add_record(0x2000_0000, 600, RecordType::Co2);
        harness.spin(&mut task, 50);
        assert_eq!(harness.history.queued(), 1);

        harness.shared.events.clear(Event::RequestHistory);
        harness.run_until(&mut task, |h, _| h.history.queued() == 0);
    }
}
