use num_enum::{IntoPrimitive, TryFromPrimitive};

pub const RECORD_SIZE: usize = 8;
pub const RECORDS_PER_PAGE: usize = 32;
pub const PAGE_SIZE: usize = RECORD_SIZE * RECORDS_PER_PAGE;
pub const HALF_PAGE_SIZE: usize = PAGE_SIZE / 2;

/// Timestamps at or below this were taken before the wall clock was set.
pub const SYNCED_THRESHOLD: u32 = 0x1000_0000;

/// Timestamp of an erased slot. The only end-of-data marker: a zero
/// timestamp is a valid record.
pub const ERASED_TIMESTAMP: u32 = 0xFFFF_FFFF;

#[derive(Clone, Copy, PartialEq, Eq, Debug, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum RecordType {
    Co2 = 0,
    BatteryLow = 1,
    Calibration = 2,
    SensorError = 3,
    ResetReason = 4,
    SensorUserFactoryReset = 5,
    CalibrationCorrection = 6,
    SensorAutoCalibration = 7,
    IntegrityError = 8,
    CalibTarget = 9,
    TimeSet = 10,
    AscAdjustment = 11,
    AscLowest = 12,
    CalibrationCorrectionOld = 13,
    ManualCalibStart = 14,
    CalibrationTargetUpdate = 15,
    Dfu = 16,
    DfuFail = 17,
    Co2Retry = 18,
    FlightMode = 19,
    Co2ScaleFactor = 20,
}

/// One history entry.
///
/// On flash: timestamp little endian, value big endian, type, reserved.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Record {
    pub timestamp: u32,
    pub value: u16,
    /// Raw type byte; flash may hold types this firmware does not know.
    pub kind: u8,
}

impl Record {
    pub fn new(timestamp: u32, value: u16, kind: RecordType) -> Self {
        Self {
            timestamp,
            value,
            kind: kind.into(),
        }
    }

    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let ts = self.timestamp.to_le_bytes();
        let value = self.value.to_be_bytes();
        [ts[0], ts[1], ts[2], ts[3], value[0], value[1], self.kind, 0]
    }

    pub fn decode(bytes: &[u8; RECORD_SIZE]) -> Self {
        Self {
            timestamp: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            value: u16::from_be_bytes([bytes[4], bytes[5]]),
            kind: bytes[6],
        }
    }

    pub fn is_valid(&self) -> bool {
        self.timestamp != ERASED_TIMESTAMP
    }

    pub fn record_type(&self) -> Option<RecordType> {
        RecordType::try_from(self.kind).ok()
    }
}

fn record_at(bytes: &[u8], index: usize) -> Record {
    let mut raw = [0u8; RECORD_SIZE];
    raw.copy_from_slice(&bytes[index * RECORD_SIZE..(index + 1) * RECORD_SIZE]);
    Record::decode(&raw)
}

/// A full flash page of records.
#[derive(Clone, PartialEq, Eq)]
pub struct Page([u8; PAGE_SIZE]);

impl Page {
    pub const fn erased() -> Self {
        Self([0xFF; PAGE_SIZE])
    }

    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.0
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.0
    }

    pub fn record(&self, index: usize) -> Record {
        record_at(&self.0, index)
    }

    pub fn set_record(&mut self, index: usize, record: &Record) {
        self.0[index * RECORD_SIZE..(index + 1) * RECORD_SIZE].copy_from_slice(&record.encode());
    }

    pub fn records(&self) -> impl DoubleEndedIterator<Item = Record> + '_ {
        (0..RECORDS_PER_PAGE).map(|i| self.record(i))
    }

    /// Records in use, counted from the start up to the first erased slot.
    pub fn record_count(&self) -> usize {
        self.records().take_while(Record::is_valid).count()
    }

    /// A page is in use when its first slot holds a record.
    pub fn is_valid(&self) -> bool {
        self.record(0).is_valid()
    }

    /// Never programmed since the last erase.
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|&b| b == 0xFF)
    }

    /// The slot at `index` and everything after it still reads as erased.
    pub fn is_erased_from(&self, index: usize) -> bool {
        self.0[index.min(RECORDS_PER_PAGE) * RECORD_SIZE..]
            .iter()
            .all(|&b| b == 0xFF)
    }

    /// Newest record of the page, scanning from the end.
    ///
    /// With `prefer_synced`, records taken before the clock was set are
    /// skipped as long as a synced one exists further back; the newest
    /// unsynced record is the fallback, and an all-zero record if there is
    /// none.
    pub fn last_record(&self, prefer_synced: bool) -> Record {
        let mut unsynced = Record::default();

        for record in self.records().rev().filter(Record::is_valid) {
            if !prefer_synced {
                return record;
            }

            if record.timestamp < SYNCED_THRESHOLD && record.timestamp > 0 {
                if unsynced.timestamp == 0 {
                    unsynced = record;
                }
                continue;
            }

            if record.timestamp > SYNCED_THRESHOLD {
                return record;
            }
        }

        unsynced
    }
}

impl core::fmt::Debug for Page {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list()
            .entries(self.records().take_while(Record::is_valid))
            .finish()
    }
}

/// The half of a page sent in one upload frame.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct HalfPage(pub [u8; HALF_PAGE_SIZE]);

impl HalfPage {
    pub const RECORDS: usize = RECORDS_PER_PAGE / 2;

    pub fn records(&self) -> impl Iterator<Item = Record> + '_ {
        (0..Self::RECORDS).map(|i| record_at(&self.0, i))
    }
}
