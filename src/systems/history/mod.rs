//! Circular history log on the external SPI flash.
//!
//! Records are queued in RAM by whoever produces them and written one slot at
//! a time by [`storage::StorageTask`]. The write cursor is not persisted;
//! [`recover::RecoverTask`] finds it again at boot by scanning the chip.

use heapless::Deque;

pub mod area;
pub mod flashlog;
pub mod populate;
pub mod record;
pub mod recover;
pub mod storage;
pub mod upload;

use area::StorageArea;
use record::{Record, RecordType, RECORDS_PER_PAGE};

pub use populate::PopulateTask;
pub use recover::RecoverTask;
pub use storage::StorageTask;
pub use upload::UploadTask;

/// Records waiting for the storage task.
pub const QUEUE_LEN: usize = RECORDS_PER_PAGE;

/// CO2 readings kept for the bar graph.
pub const BAR_COUNT: usize = 32;

pub struct History {
    cursor: StorageArea,
    queue: Deque<Record, QUEUE_LEN>,
    /// Newest first.
    bars: [u16; BAR_COUNT],
    requested_half_page: u16,
    erase_pending: bool,
    sector_erase_pending: bool,
}

impl History {
    pub const fn new() -> Self {
        Self {
            cursor: StorageArea::new(0, 0),
            queue: Deque::new(),
            bars: [0; BAR_COUNT],
            requested_half_page: 0,
            erase_pending: false,
            sector_erase_pending: false,
        }
    }

    /// Queue a record for writing. Returns `false` if the queue was full and
    /// the record was dropped.
    pub fn add_record(&mut self, timestamp: u32, value: u16, kind: RecordType) -> bool {
        if self.queue.push_back(Record::new(timestamp, value, kind)).is_err() {
            log::error!("Record queue full, dropping {:?} {}", kind, value);
            return false;
        }

        log::debug!("Queued {:?} {} ({} pending)", kind, value, self.queue.len());

        if kind == RecordType::Co2 {
            self.push_bar(value);
        }
        true
    }

    fn push_bar(&mut self, value: u16) {
        self.bars.copy_within(0..BAR_COUNT - 1, 1);
        self.bars[0] = value;
    }

    pub fn bars(&self) -> &[u16; BAR_COUNT] {
        &self.bars
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn next_record(&self) -> Option<&Record> {
        self.queue.front()
    }

    /// CO2 values still waiting in the queue, newest first.
    fn queued_co2(&self) -> impl Iterator<Item = u16> + '_ {
        self.queue
            .iter()
            .rev()
            .filter(|r| r.record_type() == Some(RecordType::Co2))
            .map(|r| r.value)
    }

    /// The front record was programmed: take it off the queue and move the
    /// cursor past it.
    pub fn commit(&mut self) {
        self.queue.pop_front();
        self.advance();
    }

    /// The slot under the cursor is not erased and cannot take a record. Move
    /// past it; the front record stays queued.
    pub fn skip_slot(&mut self) {
        log::warn!(
            "Skipping dirty slot {} of sector {} page {}",
            self.cursor.count,
            self.cursor.sector,
            self.cursor.page
        );
        self.advance();
    }

    fn advance(&mut self) {
        self.cursor.count += 1;

        if self.cursor.is_full() {
            self.cursor = self.cursor.next();
            log::debug!(
                "Page full, moving to sector {} page {}",
                self.cursor.sector,
                self.cursor.page
            );

            if self.cursor.starts_sector() {
                self.sector_erase_pending = true;
            }
        }
    }

    /// The front record could not be written. The slot may hold part of it;
    /// the storage task checks it again before the next write.
    pub fn discard(&mut self) {
        if let Some(record) = self.queue.pop_front() {
            log::warn!("Dropped record {:?}", record);
        }
    }

    pub fn cursor(&self) -> StorageArea {
        self.cursor
    }

    /// Move the cursor, e.g. after the log was rewritten.
    pub fn set_cursor(&mut self, cursor: StorageArea) {
        self.cursor = cursor;
        self.sector_erase_pending = cursor.count == 0 && cursor.starts_sector();
    }

    /// Sector the cursor entered, if it still has to be erased before use.
    pub fn pending_sector_erase(&self) -> Option<u32> {
        self.sector_erase_pending.then(|| self.cursor.sector_address())
    }

    pub fn sector_erased(&mut self) {
        self.sector_erase_pending = false;
    }

    pub fn current_half_page(&self) -> u16 {
        self.cursor.half_page()
    }

    pub fn request_half_page(&mut self, half_page: u16) {
        log::debug!("History request for half page {}", half_page);
        self.requested_half_page = half_page;
    }

    pub fn requested_half_page(&self) -> u16 {
        self.requested_half_page
    }

    pub fn request_erase(&mut self) {
        log::info!("History erase requested");
        self.erase_pending = true;
    }

    pub fn erase_pending(&self) -> bool {
        self.erase_pending
    }

    /// The chip was wiped: start over at the first page.
    pub fn erased(&mut self) {
        self.cursor = StorageArea::default();
        self.bars = [0; BAR_COUNT];
        self.erase_pending = false;
        self.sector_erase_pending = false;
    }

    fn restore(&mut self, cursor: StorageArea, bars: [u16; BAR_COUNT], sector_erase: bool) {
        self.cursor = cursor;
        self.bars = bars;
        self.sector_erase_pending = sector_erase;
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for History {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("History")
            .field("cursor", &self.cursor)
            .field("queued", &self.queue.len())
            .field("erase_pending", &self.erase_pending)
            .finish()
    }
}
