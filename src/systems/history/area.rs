use crate::drivers::zb25d16::{CAPACITY, SECTOR_SIZE};

use super::record::{HALF_PAGE_SIZE, PAGE_SIZE, RECORDS_PER_PAGE};

pub const SECTOR_COUNT: u16 = (CAPACITY / SECTOR_SIZE) as u16;
pub const PAGES_PER_SECTOR: u8 = (SECTOR_SIZE as usize / PAGE_SIZE) as u8;
pub const PAGE_COUNT: u32 = SECTOR_COUNT as u32 * PAGES_PER_SECTOR as u32;
pub const HALF_PAGE_COUNT: u32 = PAGE_COUNT * 2;

/// Position in the history ring: the page being filled and how many of its
/// slots are used.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct StorageArea {
    pub sector: u16,
    pub page: u8,
    pub count: u8,
}

impl StorageArea {
    pub const fn new(sector: u16, page: u8) -> Self {
        Self {
            sector,
            page,
            count: 0,
        }
    }

    /// Page index over the whole chip.
    pub fn linear(&self) -> u32 {
        self.sector as u32 * PAGES_PER_SECTOR as u32 + self.page as u32
    }

    pub fn from_linear(page: u32) -> Self {
        let page = page % PAGE_COUNT;
        Self::new(
            (page / PAGES_PER_SECTOR as u32) as u16,
            (page % PAGES_PER_SECTOR as u32) as u8,
        )
    }

    /// The page `pages` away, wrapping around the chip. `count` restarts at 0.
    pub fn offset(&self, pages: i32) -> Self {
        let page = (self.linear() as i64 + pages as i64).rem_euclid(PAGE_COUNT as i64);
        Self::from_linear(page as u32)
    }

    pub fn next(&self) -> Self {
        self.offset(1)
    }

    pub fn prev(&self) -> Self {
        self.offset(-1)
    }

    pub fn same_page(&self, other: &Self) -> bool {
        self.sector == other.sector && self.page == other.page
    }

    pub fn is_full(&self) -> bool {
        self.count as usize >= RECORDS_PER_PAGE
    }

    /// First page of a sector: the sector has to be erased before use.
    pub fn starts_sector(&self) -> bool {
        self.page == 0
    }

    pub fn address(&self) -> u32 {
        self.linear() * PAGE_SIZE as u32
    }

    pub fn sector_address(&self) -> u32 {
        self.sector as u32 * SECTOR_SIZE
    }

    /// Flash address of the next free record slot.
    pub fn slot_address(&self) -> u32 {
        self.address() + self.count as u32 * super::record::RECORD_SIZE as u32
    }

    pub fn from_half_page(half_page: u16) -> Option<(Self, u32)> {
        let half_page = half_page as u32;
        if half_page >= HALF_PAGE_COUNT {
            return None;
        }

        let area = Self::from_linear(half_page / 2);
        let offset = (half_page % 2) * HALF_PAGE_SIZE as u32;
        Some((area, area.address() + offset))
    }

    /// Index of the half page holding the newest records.
    pub fn half_page(&self) -> u16 {
        let upper = self.count as usize >= RECORDS_PER_PAGE / 2;
        (self.linear() * 2 + upper as u32) as u16
    }
}
