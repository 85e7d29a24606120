//! Disk manager for page-level file I/O.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tern_common::page::{PageId, PAGE_SIZE};
use tern_common::{Result, TernError};

/// Configuration for the disk manager.
#[derive(Debug, Clone)]
pub struct DiskManagerConfig {
    /// Base directory for data files.
    pub data_dir: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync_enabled: true,
        }
    }
}

/// Manages reading and writing pages of named data files.
///
/// Files are opened by name (relative to the data directory) and addressed
/// afterwards by the file ID assigned at open time. Index files carry
/// derived names like `orders.4`, so the name is the identity of the file,
/// not a numbering scheme.
pub struct DiskManager {
    /// Configuration.
    config: DiskManagerConfig,
    /// Open files and the name-to-ID mapping.
    inner: Mutex<DiskManagerInner>,
}

struct DiskManagerInner {
    files: HashMap<u32, FileHandle>,
    ids_by_name: HashMap<String, u32>,
    next_file_id: u32,
}

/// Handle for an open data file.
struct FileHandle {
    file: File,
    name: String,
    /// Number of pages in the file.
    num_pages: u32,
}

impl DiskManager {
    /// Creates a new disk manager rooted at the configured data directory.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(Self {
            config,
            inner: Mutex::new(DiskManagerInner {
                files: HashMap::new(),
                ids_by_name: HashMap::new(),
                next_file_id: 0,
            }),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    fn file_path(&self, name: &str) -> PathBuf {
        self.config.data_dir.join(name)
    }

    /// Returns true if a data file with this name exists.
    pub fn exists(&self, name: &str) -> bool {
        self.inner.lock().ids_by_name.contains_key(name) || self.file_path(name).exists()
    }

    /// Opens a data file by name and returns its file ID.
    ///
    /// With `create_new`, the file must not already exist (`FileExists`
    /// otherwise); without it, a missing file fails `FileNotFound`. Opening
    /// an already-open name returns the existing ID.
    pub fn open(&self, name: &str, create_new: bool) -> Result<u32> {
        let mut inner = self.inner.lock();

        if let Some(&file_id) = inner.ids_by_name.get(name) {
            if create_new {
                return Err(TernError::FileExists(name.to_string()));
            }
            return Ok(file_id);
        }

        let path = self.file_path(name);
        if create_new && path.exists() {
            return Err(TernError::FileExists(name.to_string()));
        }
        if !create_new && !path.exists() {
            return Err(TernError::FileNotFound(name.to_string()));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create_new)
            .open(&path)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        let file_id = inner.next_file_id;
        inner.next_file_id += 1;
        inner.files.insert(
            file_id,
            FileHandle {
                file,
                name: name.to_string(),
                num_pages,
            },
        );
        inner.ids_by_name.insert(name.to_string(), file_id);

        Ok(file_id)
    }

    /// Reads a page from disk.
    pub fn read_page(&self, page_id: PageId) -> Result<[u8; PAGE_SIZE]> {
        let mut inner = self.inner.lock();
        let handle = inner
            .files
            .get_mut(&page_id.file_id)
            .ok_or(TernError::PageNotFound(page_id))?;

        if page_id.page_num >= handle.num_pages {
            return Err(TernError::PageNotFound(page_id));
        }

        let offset = (page_id.page_num as u64) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;

        let mut buffer = [0u8; PAGE_SIZE];
        handle.file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    /// Writes a page to disk.
    pub fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut inner = self.inner.lock();
        let handle = inner
            .files
            .get_mut(&page_id.file_id)
            .ok_or(TernError::PageNotFound(page_id))?;

        let offset = (page_id.page_num as u64) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;
        handle.file.write_all(data)?;

        if self.config.fsync_enabled {
            handle.file.sync_all()?;
        }

        if page_id.page_num >= handle.num_pages {
            handle.num_pages = page_id.page_num + 1;
        }

        Ok(())
    }

    /// Allocates a new zeroed page at the end of the file.
    pub fn allocate_page(&self, file_id: u32) -> Result<PageId> {
        let mut inner = self.inner.lock();
        let handle = inner
            .files
            .get_mut(&file_id)
            .ok_or_else(|| TernError::Internal(format!("file {} not open", file_id)))?;

        let page_num = handle.num_pages;
        let page_id = PageId::new(file_id, page_num);

        let offset = (page_num as u64) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;
        handle.file.write_all(&[0u8; PAGE_SIZE])?;

        if self.config.fsync_enabled {
            handle.file.sync_all()?;
        }

        handle.num_pages = page_num + 1;

        Ok(page_id)
    }

    /// Returns the number of pages in a file.
    pub fn num_pages(&self, file_id: u32) -> Result<u32> {
        let inner = self.inner.lock();
        let handle = inner
            .files
            .get(&file_id)
            .ok_or_else(|| TernError::Internal(format!("file {} not open", file_id)))?;
        Ok(handle.num_pages)
    }

    /// Syncs a file's pending writes to disk.
    pub fn flush_file(&self, file_id: u32) -> Result<()> {
        let inner = self.inner.lock();
        if let Some(handle) = inner.files.get(&file_id) {
            handle.file.sync_all()?;
        }
        Ok(())
    }

    /// Closes a file, syncing it first.
    pub fn close_file(&self, file_id: u32) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(handle) = inner.files.remove(&file_id) {
            inner.ids_by_name.remove(&handle.name);
            handle.file.sync_all()?;
        }
        Ok(())
    }

    /// Closes all open files.
    pub fn close_all(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.ids_by_name.clear();
        for (_, handle) in inner.files.drain() {
            handle.file.sync_all()?;
        }
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.close_all();
    }
}
