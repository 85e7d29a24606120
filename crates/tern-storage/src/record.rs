//! Record identifiers for heap relations.

use tern_common::page::INVALID_PAGE_NUM;

/// Identifies a record in a heap file by page number and slot.
///
/// Heap data pages start at page 1 (page 0 is the file header), so a page
/// number of zero never names a real record. That makes a zeroed RecordId
/// the natural empty marker, which the index leaf pages rely on for their
/// occupancy sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    /// Page within the heap file.
    pub page_num: u32,
    /// Slot number within the page.
    pub slot: u16,
}

impl RecordId {
    /// Size of a record ID in its on-disk form.
    pub const ON_DISK_SIZE: usize = 8;

    /// The invalid record ID (page number zero).
    pub const INVALID: RecordId = RecordId {
        page_num: INVALID_PAGE_NUM,
        slot: 0,
    };

    /// Creates a new record ID.
    pub fn new(page_num: u32, slot: u16) -> Self {
        Self { page_num, slot }
    }

    /// Returns true if this record ID names a real record page.
    pub fn is_valid(&self) -> bool {
        self.page_num != INVALID_PAGE_NUM
    }

    /// Serializes to the 8-byte on-disk form (2 trailing bytes reserved).
    pub fn to_bytes(&self) -> [u8; Self::ON_DISK_SIZE] {
        let mut buf = [0u8; Self::ON_DISK_SIZE];
        buf[0..4].copy_from_slice(&self.page_num.to_le_bytes());
        buf[4..6].copy_from_slice(&self.slot.to_le_bytes());
        buf
    }

    /// Deserializes from the on-disk form.
    pub fn from_bytes(buf: &[u8]) -> Self {
        Self {
            page_num: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            slot: u16::from_le_bytes([buf[4], buf[5]]),
        }
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.page_num, self.slot)
    }
}
