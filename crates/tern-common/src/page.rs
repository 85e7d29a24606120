//! Page identifiers for TernDB storage.

use serde::{Deserialize, Serialize};

/// Page size in bytes (16 KB).
pub const PAGE_SIZE: usize = 16 * 1024;

/// The invalid page number.
///
/// Page 0 of every data file is reserved for file metadata (the heap file
/// header, the index meta page), so 0 never names a heap record page or an
/// index node page. Sibling pointers, child pointers, and record identifiers
/// all use 0 as their "no page" sentinel.
pub const INVALID_PAGE_NUM: u32 = 0;

/// Unique identifier for a page across all open files.
///
/// A PageId pairs a file ID (assigned by the disk manager when a file is
/// opened) with a page number within that file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId {
    /// File identifier.
    pub file_id: u32,
    /// Page number within the file (0-indexed).
    pub page_num: u32,
}

impl PageId {
    /// Creates a new PageId.
    pub fn new(file_id: u32, page_num: u32) -> Self {
        Self { file_id, page_num }
    }

    /// Returns the PageId as a single u64 for compact storage.
    pub fn as_u64(&self) -> u64 {
        ((self.file_id as u64) << 32) | (self.page_num as u64)
    }

    /// Creates a PageId from its u64 representation.
    pub fn from_u64(value: u64) -> Self {
        Self {
            file_id: (value >> 32) as u32,
            page_num: value as u32,
        }
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file_id, self.page_num)
    }
}
