//! HeapFile: a relation stored as a header page plus slotted data pages.
//!
//! All page I/O goes through the buffer manager; every pin taken here is
//! released before the call returns.

use crate::bufmgr::BufferManager;
use crate::heap::page::HeapPage;
use crate::record::RecordId;
use bytes::Bytes;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tern_common::page::{PageId, INVALID_PAGE_NUM};
use tern_common::{Result, TernError};

/// Magic value at the start of every heap file header page.
const HEAP_MAGIC: u32 = 0x4E52_4554;

/// Heap file format version.
const HEAP_VERSION: u32 = 1;

/// A heap relation.
///
/// Page 0 is the file header; record pages start at page 1, which keeps
/// page number 0 free to act as the invalid sentinel in record IDs.
pub struct HeapFile {
    bufmgr: Arc<BufferManager>,
    file_id: u32,
    name: String,
    /// Page currently receiving inserts (INVALID_PAGE_NUM when none yet).
    tail_page: AtomicU32,
}

impl HeapFile {
    /// Creates a new heap file and writes its header page.
    pub fn create(bufmgr: Arc<BufferManager>, name: &str) -> Result<Self> {
        let file_id = bufmgr.disk().open(name, true)?;

        let (page_num, frame) = bufmgr.alloc_page(file_id)?;
        debug_assert_eq!(page_num, 0);
        {
            let mut data = frame.write_data();
            data[0..4].copy_from_slice(&HEAP_MAGIC.to_le_bytes());
            data[4..8].copy_from_slice(&HEAP_VERSION.to_le_bytes());
        }
        bufmgr.unpin_page(PageId::new(file_id, page_num), true)?;

        tracing::debug!(name, file_id, "created heap file");

        Ok(Self {
            bufmgr,
            file_id,
            name: name.to_string(),
            tail_page: AtomicU32::new(INVALID_PAGE_NUM),
        })
    }

    /// Opens an existing heap file, validating its header.
    pub fn open(bufmgr: Arc<BufferManager>, name: &str) -> Result<Self> {
        let file_id = bufmgr.disk().open(name, false)?;

        let header_pid = PageId::new(file_id, 0);
        let frame = bufmgr.read_page(header_pid)?;
        let magic = {
            let data = frame.read_data();
            u32::from_le_bytes([data[0], data[1], data[2], data[3]])
        };
        bufmgr.unpin_page(header_pid, false)?;

        if magic != HEAP_MAGIC {
            return Err(TernError::PageCorrupted {
                page_id: header_pid,
                reason: "bad heap file magic".to_string(),
            });
        }

        let num_pages = bufmgr.disk().num_pages(file_id)?;
        let tail = if num_pages > 1 {
            num_pages - 1
        } else {
            INVALID_PAGE_NUM
        };

        Ok(Self {
            bufmgr,
            file_id,
            name: name.to_string(),
            tail_page: AtomicU32::new(tail),
        })
    }

    /// Returns the relation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the file ID.
    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    /// Returns the number of pages in the file, header included.
    pub fn num_pages(&self) -> Result<u32> {
        self.bufmgr.disk().num_pages(self.file_id)
    }

    pub(crate) fn bufmgr(&self) -> &Arc<BufferManager> {
        &self.bufmgr
    }

    /// Inserts a record and returns its ID.
    pub fn insert_record(&self, record: &[u8]) -> Result<RecordId> {
        if record.len() > HeapPage::MAX_RECORD_SIZE {
            return Err(TernError::PageFull);
        }

        // Try the tail page first.
        let tail = self.tail_page.load(Ordering::Acquire);
        if tail != INVALID_PAGE_NUM {
            let pid = PageId::new(self.file_id, tail);
            let frame = self.bufmgr.read_page(pid)?;
            let inserted = {
                let mut data = frame.write_data();
                HeapPage::insert_record(&mut data[..], record)
            };
            match inserted {
                Ok(slot) => {
                    self.bufmgr.unpin_page(pid, true)?;
                    return Ok(RecordId::new(tail, slot));
                }
                Err(TernError::PageFull) => {
                    self.bufmgr.unpin_page(pid, false)?;
                }
                Err(e) => {
                    self.bufmgr.unpin_page(pid, false)?;
                    return Err(e);
                }
            }
        }

        // Tail is full or absent: start a fresh page.
        let (page_num, frame) = self.bufmgr.alloc_page(self.file_id)?;
        let slot = {
            let mut data = frame.write_data();
            HeapPage::init(&mut data[..]);
            HeapPage::insert_record(&mut data[..], record)?
        };
        self.bufmgr.unpin_page(PageId::new(self.file_id, page_num), true)?;
        self.tail_page.store(page_num, Ordering::Release);

        Ok(RecordId::new(page_num, slot))
    }

    /// Fetches the bytes of a record.
    pub fn record(&self, rid: RecordId) -> Result<Bytes> {
        if !rid.is_valid() {
            return Err(TernError::RecordNotFound {
                page_num: rid.page_num,
                slot: rid.slot,
            });
        }

        let pid = PageId::new(self.file_id, rid.page_num);
        let frame = self.bufmgr.read_page(pid)?;
        let record = {
            let data = frame.read_data();
            HeapPage::record(&data[..], rid.slot).map(Bytes::copy_from_slice)
        };
        self.bufmgr.unpin_page(pid, false)?;

        record.ok_or(TernError::RecordNotFound {
            page_num: rid.page_num,
            slot: rid.slot,
        })
    }
}
