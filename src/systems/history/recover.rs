//! Boot scan that finds the write cursor again and refills the bar graph.

use crate::{
    bsp::Board,
    context::Context,
    drivers::SpiFlash,
    scheduler::{Run, Step, Task, Tcb},
};

use super::{
    area::{StorageArea, PAGES_PER_SECTOR, SECTOR_COUNT},
    flashlog::{read_page, FlashLease},
    record::{Page, RecordType, SYNCED_THRESHOLD},
    History, BAR_COUNT,
};

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
enum State {
    #[default]
    Scan,
    ScanRelease,
    Locate,
    LocateRelease,
    Walk,
    WalkRelease,
}

/// Newest page seen so far by timestamp.
#[derive(Clone, Copy, Default)]
struct Candidate(Option<(u32, StorageArea)>);

impl Candidate {
    fn offer(&mut self, timestamp: u32, area: StorageArea) {
        match self.0 {
            Some((best, _)) if best > timestamp => {}
            _ => self.0 = Some((timestamp, area)),
        }
    }
}

#[derive(Default)]
pub struct RecoverTask {
    state: State,
    lease: FlashLease,
    sector: u16,
    synced: Candidate,
    unsynced: Candidate,
    cursor: StorageArea,
    sector_erase: bool,
    page: Option<Page>,
    walk: StorageArea,
    walk_start: StorageArea,
    bars: [u16; BAR_COUNT],
    found: usize,
}

impl RecoverTask {
    /// Look at every page of the current sector. Pages of a sector are
    /// filled in order, so the first never-written page ends the sector.
    fn scan_sector<F: SpiFlash>(&mut self, flash: &mut F) {
        for page in 0..PAGES_PER_SECTOR {
            let area = StorageArea::new(self.sector, page);
            let data = match read_page(flash, &area) {
                Ok(data) => data,
                Err(e) => {
                    log::warn!("Recovery read of sector {} page {} failed: {:?}", self.sector, page, e);
                    continue;
                }
            };

            if data.is_empty() {
                break;
            }
            if !data.is_valid() {
                continue;
            }

            let timestamp = data.last_record(true).timestamp;
            if timestamp >= SYNCED_THRESHOLD {
                self.synced.offer(timestamp, area);
            } else {
                self.unsynced.offer(timestamp, area);
            }
        }
    }

    /// Pick the cursor page and read it back to count its records.
    fn locate<F: SpiFlash>(&mut self, flash: &mut F) {
        let area = match (self.synced.0, self.unsynced.0) {
            (Some((ts, area)), _) => {
                log::info!("Newest synced page at sector {} page {} ({:#x})", area.sector, area.page, ts);
                area
            }
            (None, Some((ts, area))) => {
                log::info!("Only unsynced history, newest at sector {} page {} ({})", area.sector, area.page, ts);
                area
            }
            (None, None) => {
                log::info!("History is empty");
                StorageArea::default()
            }
        };

        let page = match read_page(flash, &area) {
            Ok(page) => page,
            Err(e) => {
                log::error!("Failed to read cursor page: {:?}", e);
                Page::erased()
            }
        };

        let mut cursor = area;
        cursor.count = page.record_count() as u8;
        self.walk_start = if cursor.count == 0 { cursor.prev() } else { cursor };

        // A torn write leaves a slot that reads as unused but can no longer be
        // programmed; continue on a fresh page.
        if cursor.is_full() || !page.is_erased_from(cursor.count as usize) {
            if !cursor.is_full() {
                log::warn!("Slot {} of the cursor page is dirty, skipping the page", cursor.count);
            }
            cursor = cursor.next();

            // Pages written without a synced clock can follow the newest
            // synced page. Never append into them.
            while !cursor.starts_sector() {
                match read_page(flash, &cursor) {
                    Ok(next) if next.is_empty() => break,
                    Ok(_) => log::warn!("Sector {} page {} is in use, moving past it", cursor.sector, cursor.page),
                    Err(e) => log::warn!("Read of sector {} page {} failed: {:?}", cursor.sector, cursor.page, e),
                }
                cursor = cursor.next();
            }
            self.sector_erase = cursor.starts_sector();
        }

        self.cursor = cursor;
        self.walk = self.walk_start;
        self.page = self.walk_start.same_page(&area).then_some(page);
    }

    /// Take the CO2 readings of one page, newest first. Returns `false` once
    /// the walk is over.
    fn collect(&mut self, page: &Page) -> bool {
        if !page.is_valid() {
            return false;
        }

        for record in page.records().rev().filter(|r| r.is_valid()) {
            if self.found == BAR_COUNT {
                break;
            }
            if record.record_type() == Some(RecordType::Co2) {
                self.bars[self.found] = record.value;
                self.found += 1;
            }
        }

        self.walk = self.walk.prev();
        self.found < BAR_COUNT && !self.walk.same_page(&self.walk_start)
    }

    fn start_walk(&mut self, history: &History) {
        self.bars = [0; BAR_COUNT];
        self.found = 0;
        // Readings taken before the scan finished are not on flash yet.
        for value in history.queued_co2().take(BAR_COUNT) {
            self.bars[self.found] = value;
            self.found += 1;
        }
    }

    fn finish(&mut self, history: &mut History) -> Step {
        log::info!(
            "History cursor at sector {} page {} count {}, {} readings for the graph",
            self.cursor.sector,
            self.cursor.page,
            self.cursor.count,
            self.found
        );
        history.restore(self.cursor, self.bars, self.sector_erase);
        Step::Exit
    }
}

impl Task for RecoverTask {
    fn restart(&mut self) {
        *self = Self::default();
    }
}

impl<'a, B: Board> Run<Context<'a, B>> for RecoverTask {
    fn step(&mut self, tcb: &mut Tcb, cx: &mut Context<'a, B>) -> Step {
        loop {
            match self.state {
                State::Scan => {
                    if !self.lease.acquire(tcb, &cx.shared.bus) {
                        return Step::Yield;
                    }
                    self.scan_sector(cx.board.flash());
                    self.state = State::ScanRelease;
                }
                State::ScanRelease => {
                    if !self.lease.release(tcb, cx.board.flash()) {
                        return Step::Yield;
                    }
                    self.sector += 1;
                    self.state = if self.sector < SECTOR_COUNT {
                        State::Scan
                    } else {
                        State::Locate
                    };
                }
                State::Locate => {
                    if !self.lease.acquire(tcb, &cx.shared.bus) {
                        return Step::Yield;
                    }
                    self.locate(cx.board.flash());
                    self.state = State::LocateRelease;
                }
                State::LocateRelease => {
                    if !self.lease.release(tcb, cx.board.flash()) {
                        return Step::Yield;
                    }

                    self.start_walk(cx.history);
                    // The walk starts on the page just read unless it was empty.
                    if let Some(page) = self.page.take() {
                        if !self.collect(&page) {
                            return self.finish(cx.history);
                        }
                    }
                    self.state = State::Walk;
                }
                State::Walk => {
                    if !self.lease.acquire(tcb, &cx.shared.bus) {
                        return Step::Yield;
                    }
                    self.page = Some(match read_page(cx.board.flash(), &self.walk) {
                        Ok(page) => page,
                        Err(e) => {
                            log::warn!("Failed to read page for the graph: {:?}", e);
                            Page::erased()
                        }
                    });
                    self.state = State::WalkRelease;
                }
                State::WalkRelease => {
                    if !self.lease.release(tcb, cx.board.flash()) {
                        return Step::Yield;
                    }
                    let page = self.page.take().unwrap_or_else(Page::erased);
                    if !self.collect(&page) {
                        return self.finish(cx.history);
                    }
                    self.state = State::Walk;
                }
            }
        }
    }
}
