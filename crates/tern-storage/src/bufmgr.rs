//! Buffer manager facade over the disk manager and the buffer pool.
//!
//! This is the surface the heap file and the B+ tree consume: pages are
//! pinned by `read_page`/`alloc_page`, released through `unpin_page`, and
//! made durable with `flush_file`. Dirty pages handed back by the pool on
//! eviction are written through to disk before the replacement frame is
//! returned, so callers never see eviction happen.

use crate::disk::DiskManager;
use std::sync::Arc;
use tern_buffer::{BufferFrame, BufferPool, EvictedPage};
use tern_common::page::{PageId, PAGE_SIZE};
use tern_common::{Result, TernError};

/// Buffer manager: the page access path for every storage component.
pub struct BufferManager {
    disk: Arc<DiskManager>,
    pool: Arc<BufferPool>,
}

impl BufferManager {
    /// Creates a buffer manager over a disk manager and a buffer pool.
    pub fn new(disk: Arc<DiskManager>, pool: Arc<BufferPool>) -> Self {
        Self { disk, pool }
    }

    /// Returns the underlying disk manager.
    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    fn write_back(&self, evicted: Option<EvictedPage>) -> Result<()> {
        if let Some(page) = evicted {
            self.disk.write_page(page.page_id, &page.data)?;
        }
        Ok(())
    }

    /// Reads a page, pinning it.
    ///
    /// Serves from the pool when resident, otherwise loads from disk.
    pub fn read_page(&self, page_id: PageId) -> Result<&BufferFrame> {
        if let Some(frame) = self.pool.fetch_page(page_id) {
            return Ok(frame);
        }

        let data = self.disk.read_page(page_id)?;
        let (frame, evicted) = self.pool.load_page(page_id, &data)?;
        self.write_back(evicted)?;
        Ok(frame)
    }

    /// Allocates a fresh page at the end of a file, pinning a zeroed frame.
    pub fn alloc_page(&self, file_id: u32) -> Result<(u32, &BufferFrame)> {
        let page_id = self.disk.allocate_page(file_id)?;
        let (frame, evicted) = self.pool.new_page(page_id)?;
        self.write_back(evicted)?;
        Ok((page_id.page_num, frame))
    }

    /// Releases one pin on a page, marking it dirty if it was mutated.
    pub fn unpin_page(&self, page_id: PageId, dirty: bool) -> Result<()> {
        if self.pool.unpin_page(page_id, dirty) {
            Ok(())
        } else {
            Err(TernError::PageNotFound(page_id))
        }
    }

    /// Returns a page the caller already holds a pin on, without re-pinning.
    pub fn peek_page(&self, page_id: PageId) -> Result<&BufferFrame> {
        self.pool
            .peek_page(page_id)
            .ok_or(TernError::PageNotFound(page_id))
    }

    /// Writes every dirty resident page of the file through to disk and syncs.
    pub fn flush_file(&self, file_id: u32) -> Result<()> {
        let disk = &self.disk;
        self.pool.flush_file(file_id, |page_id, data| {
            let mut buf = [0u8; PAGE_SIZE];
            buf.copy_from_slice(data);
            disk.write_page(page_id, &buf)
        })?;
        self.disk.flush_file(file_id)
    }

    /// Returns the number of pinned resident pages of one file.
    pub fn pinned_count(&self, file_id: u32) -> usize {
        self.pool.pinned_count(file_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::DiskManagerConfig;
    use tern_buffer::BufferPoolConfig;
    use tempfile::tempdir;

    fn setup(num_frames: usize) -> (BufferManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(
            DiskManager::new(DiskManagerConfig {
                data_dir: dir.path().to_path_buf(),
                fsync_enabled: false,
            })
            .unwrap(),
        );
        let pool = Arc::new(BufferPool::new(BufferPoolConfig { num_frames }));
        (BufferManager::new(disk, pool), dir)
    }

    #[test]
    fn test_alloc_read_roundtrip() {
        let (bufmgr, _dir) = setup(10);
        let file_id = bufmgr.disk().open("t.dat", true).unwrap();

        let (page_num, frame) = bufmgr.alloc_page(file_id).unwrap();
        frame.write_data()[0] = 0x5A;
        bufmgr.unpin_page(PageId::new(file_id, page_num), true).unwrap();

        let frame = bufmgr.read_page(PageId::new(file_id, page_num)).unwrap();
        assert_eq!(frame.read_data()[0], 0x5A);
        bufmgr.unpin_page(PageId::new(file_id, page_num), false).unwrap();

        assert_eq!(bufmgr.pinned_count(file_id), 0);
    }

    #[test]
    fn test_eviction_writes_dirty_pages_through() {
        // Two frames force constant eviction across three pages.
        let (bufmgr, _dir) = setup(2);
        let file_id = bufmgr.disk().open("t.dat", true).unwrap();

        for i in 0..3u8 {
            let (page_num, frame) = bufmgr.alloc_page(file_id).unwrap();
            frame.write_data()[0] = i + 1;
            bufmgr.unpin_page(PageId::new(file_id, page_num), true).unwrap();
        }

        // Every page reads back with its value whether it survived in the
        // pool or was evicted and reloaded.
        for i in 0..3u32 {
            let pid = PageId::new(file_id, i);
            let frame = bufmgr.read_page(pid).unwrap();
            assert_eq!(frame.read_data()[0], i as u8 + 1);
            bufmgr.unpin_page(pid, false).unwrap();
        }
    }

    #[test]
    fn test_unpin_unknown_page_fails() {
        let (bufmgr, _dir) = setup(4);
        let result = bufmgr.unpin_page(PageId::new(9, 9), false);
        assert!(matches!(result, Err(TernError::PageNotFound(_))));
    }

    #[test]
    fn test_flush_file_persists() {
        let (bufmgr, _dir) = setup(10);
        let file_id = bufmgr.disk().open("t.dat", true).unwrap();

        let (page_num, frame) = bufmgr.alloc_page(file_id).unwrap();
        frame.write_data()[7] = 0x77;
        bufmgr.unpin_page(PageId::new(file_id, page_num), true).unwrap();

        bufmgr.flush_file(file_id).unwrap();

        let on_disk = bufmgr
            .disk()
            .read_page(PageId::new(file_id, page_num))
            .unwrap();
        assert_eq!(on_disk[7], 0x77);
    }
}
