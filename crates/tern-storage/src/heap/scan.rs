//! Sequential scan over a heap relation.

use crate::bufmgr::BufferManager;
use crate::heap::file::HeapFile;
use crate::heap::page::HeapPage;
use crate::record::RecordId;
use bytes::Bytes;
use std::sync::Arc;
use tern_common::page::PageId;
use tern_common::{Result, TernError};

/// Scans a heap relation page by page, slot by slot.
///
/// Yields record IDs in physical order; `record` returns the bytes of the
/// most recently yielded record. No pins are held between calls.
pub struct FileScan {
    heap: HeapFile,
    next_page: u32,
    next_slot: u16,
    current: Option<RecordId>,
}

impl FileScan {
    /// Opens a scan over the named relation.
    pub fn open(bufmgr: Arc<BufferManager>, relation_name: &str) -> Result<Self> {
        let heap = HeapFile::open(bufmgr, relation_name)?;
        Ok(Self {
            heap,
            next_page: 1,
            next_slot: 0,
            current: None,
        })
    }

    /// Returns the next record ID, or None at end-of-data.
    pub fn scan_next(&mut self) -> Result<Option<RecordId>> {
        let num_pages = self.heap.num_pages()?;

        while self.next_page < num_pages {
            let pid = PageId::new(self.heap.file_id(), self.next_page);
            let frame = self.heap.bufmgr().read_page(pid)?;
            let slot_count = {
                let data = frame.read_data();
                HeapPage::slot_count(&data[..])
            };
            self.heap.bufmgr().unpin_page(pid, false)?;

            if self.next_slot < slot_count {
                let rid = RecordId::new(self.next_page, self.next_slot);
                self.next_slot += 1;
                self.current = Some(rid);
                return Ok(Some(rid));
            }

            self.next_page += 1;
            self.next_slot = 0;
        }

        self.current = None;
        Ok(None)
    }

    /// Returns the bytes of the record most recently yielded by `scan_next`.
    pub fn record(&self) -> Result<Bytes> {
        let rid = self.current.ok_or(TernError::ScanNotInitialized)?;
        self.heap.record(rid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::{DiskManager, DiskManagerConfig};
    use tern_buffer::{BufferPool, BufferPoolConfig};
    use tempfile::tempdir;

    fn setup() -> (Arc<BufferManager>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(
            DiskManager::new(DiskManagerConfig {
                data_dir: dir.path().to_path_buf(),
                fsync_enabled: false,
            })
            .unwrap(),
        );
        let pool = Arc::new(BufferPool::new(BufferPoolConfig { num_frames: 64 }));
        (Arc::new(BufferManager::new(disk, pool)), dir)
    }

    #[test]
    fn test_scan_yields_all_records() {
        let (bufmgr, _dir) = setup();
        let heap = HeapFile::create(bufmgr.clone(), "rel").unwrap();

        let mut inserted = Vec::new();
        for i in 0..100u32 {
            let record = format!("record-{}", i).into_bytes();
            inserted.push((heap.insert_record(&record).unwrap(), record));
        }

        let mut scan = FileScan::open(bufmgr.clone(), "rel").unwrap();
        let mut seen = Vec::new();
        while let Some(rid) = scan.scan_next().unwrap() {
            seen.push((rid, scan.record().unwrap().to_vec()));
        }

        assert_eq!(seen.len(), inserted.len());
        for ((rid_a, rec_a), (rid_b, rec_b)) in inserted.iter().zip(seen.iter()) {
            assert_eq!(rid_a, rid_b);
            assert_eq!(rec_a, rec_b);
        }
        assert_eq!(bufmgr.pinned_count(heap.file_id()), 0);
    }

    #[test]
    fn test_scan_spanning_pages() {
        let (bufmgr, _dir) = setup();
        let heap = HeapFile::create(bufmgr.clone(), "rel").unwrap();

        let record = vec![3u8; 5000];
        for _ in 0..10 {
            heap.insert_record(&record).unwrap();
        }
        assert!(heap.num_pages().unwrap() > 2);

        let mut scan = FileScan::open(bufmgr, "rel").unwrap();
        let mut count = 0;
        while scan.scan_next().unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 10);
    }

    #[test]
    fn test_empty_relation() {
        let (bufmgr, _dir) = setup();
        HeapFile::create(bufmgr.clone(), "rel").unwrap();

        let mut scan = FileScan::open(bufmgr, "rel").unwrap();
        assert!(scan.scan_next().unwrap().is_none());
        // Repeated calls stay at end-of-data.
        assert!(scan.scan_next().unwrap().is_none());
    }

    #[test]
    fn test_record_before_first_next_fails() {
        let (bufmgr, _dir) = setup();
        HeapFile::create(bufmgr.clone(), "rel").unwrap();

        let scan = FileScan::open(bufmgr, "rel").unwrap();
        assert!(matches!(
            scan.record(),
            Err(TernError::ScanNotInitialized)
        ));
    }

    #[test]
    fn test_record_after_exhaustion_fails() {
        let (bufmgr, _dir) = setup();
        let heap = HeapFile::create(bufmgr.clone(), "rel").unwrap();
        heap.insert_record(b"only").unwrap();

        let mut scan = FileScan::open(bufmgr, "rel").unwrap();
        assert!(scan.scan_next().unwrap().is_some());
        assert!(scan.scan_next().unwrap().is_none());
        assert!(matches!(
            scan.record(),
            Err(TernError::ScanNotInitialized)
        ));
    }
}
