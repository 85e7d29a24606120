//! The B+ tree index: lifecycle, insert, and range scan.

use crate::btree::node::{IndexMetaPage, InternalNode, LeafNode, MAX_INTERNAL_KEYS, MAX_LEAF_ENTRIES};
use crate::bufmgr::BufferManager;
use crate::heap::FileScan;
use crate::record::RecordId;
use std::sync::Arc;
use tern_common::page::{PageId, INVALID_PAGE_NUM};
use tern_common::types::AttrType;
use tern_common::{Result, TernError};
use tracing::debug;

/// Comparison operator for a scan bound.
///
/// The lower bound accepts `GreaterThan`/`GreaterThanOrEqual`, the upper
/// bound accepts `LessThan`/`LessThanOrEqual`; any other assignment fails
/// `BadOpcodes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOperator {
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

/// Node capacities for the tree.
///
/// Defaults fill a page; tests shrink them to force splits on small key
/// sets. `leaf_occupancy` must be at least 2 and `node_occupancy` at least
/// 3 so both split rules always leave each half non-empty. Capacities are
/// not persisted: reopening an index built with a custom config requires
/// the same config.
#[derive(Debug, Clone)]
pub struct BTreeConfig {
    /// Entries per leaf node.
    pub leaf_occupancy: usize,
    /// Keys per internal node (one more child pointer than keys).
    pub node_occupancy: usize,
}

impl Default for BTreeConfig {
    fn default() -> Self {
        Self {
            leaf_occupancy: MAX_LEAF_ENTRIES,
            node_occupancy: MAX_INTERNAL_KEYS,
        }
    }
}

/// A (separator key, new right child) pair pushed up from a split node.
#[derive(Debug, Clone, Copy)]
struct Promotion {
    key: i32,
    right_page_num: u32,
}

/// State of the live range scan, if any.
#[derive(Debug)]
struct ScanState {
    low: i32,
    high: i32,
    low_op: ScanOperator,
    high_op: ScanOperator,
    /// Leaf currently being consumed; pinned for the lifetime of this state.
    current_page_num: u32,
    /// Next slot to emit within the current leaf.
    next_entry: usize,
    /// Set when the sibling chain ran out; the next call completes the scan.
    at_end: bool,
}

/// A disk-resident B+ tree index over one `i32` attribute of a heap relation.
///
/// The index file is named `"<relation>.<attr_byte_offset>"`. Page 0 holds
/// the meta page, whose root pointer is mirrored in memory and kept in sync
/// across root splits. At most one scan is live per index handle.
pub struct BTreeIndex {
    bufmgr: Arc<BufferManager>,
    file_id: u32,
    index_name: String,
    header_page_num: u32,
    root_page_num: u32,
    root_is_leaf: bool,
    leaf_occupancy: usize,
    node_occupancy: usize,
    scan: Option<ScanState>,
}

impl BTreeIndex {
    /// Derives the index file name for a relation and attribute offset.
    pub fn index_file_name(relation_name: &str, attr_byte_offset: usize) -> String {
        format!("{}.{}", relation_name, attr_byte_offset)
    }

    /// Opens the index for `relation_name` keyed on the attribute at
    /// `attr_byte_offset`, creating and bulk-loading it if it does not exist.
    pub fn open(
        relation_name: &str,
        bufmgr: Arc<BufferManager>,
        attr_byte_offset: usize,
        attr_type: AttrType,
    ) -> Result<Self> {
        Self::open_with_config(
            relation_name,
            bufmgr,
            attr_byte_offset,
            attr_type,
            BTreeConfig::default(),
        )
    }

    /// Like [`BTreeIndex::open`], with explicit node capacities.
    pub fn open_with_config(
        relation_name: &str,
        bufmgr: Arc<BufferManager>,
        attr_byte_offset: usize,
        attr_type: AttrType,
        config: BTreeConfig,
    ) -> Result<Self> {
        debug_assert!(config.leaf_occupancy >= 2);
        debug_assert!(config.node_occupancy >= 3);

        let index_name = Self::index_file_name(relation_name, attr_byte_offset);

        if bufmgr.disk().exists(&index_name) {
            Self::open_existing(
                relation_name,
                bufmgr,
                attr_byte_offset,
                attr_type,
                config,
                index_name,
            )
        } else {
            Self::create(
                relation_name,
                bufmgr,
                attr_byte_offset,
                attr_type,
                config,
                index_name,
            )
        }
    }

    fn open_existing(
        relation_name: &str,
        bufmgr: Arc<BufferManager>,
        attr_byte_offset: usize,
        attr_type: AttrType,
        config: BTreeConfig,
        index_name: String,
    ) -> Result<Self> {
        let file_id = bufmgr.disk().open(&index_name, false)?;

        let header_page_num = 0;
        let meta_pid = PageId::new(file_id, header_page_num);
        let frame = bufmgr.read_page(meta_pid)?;
        let meta = {
            let data = frame.read_data();
            IndexMetaPage::from_bytes(&data[..IndexMetaPage::SIZE])
        };
        bufmgr.unpin_page(meta_pid, false)?;

        // The caller's arguments must match what the file was built with.
        let expected =
            IndexMetaPage::new(relation_name, attr_byte_offset as u32, attr_type.as_u32(), 0);
        if meta.relation_name != expected.relation_name
            || meta.attr_byte_offset != attr_byte_offset as u32
            || meta.attr_type != attr_type.as_u32()
        {
            return Err(TernError::BadIndexInfo(index_name));
        }

        debug!(index = %index_name, root = meta.root_page_num, "opened index");

        Ok(Self {
            bufmgr,
            file_id,
            index_name,
            header_page_num,
            root_page_num: meta.root_page_num,
            root_is_leaf: meta.root_is_leaf,
            leaf_occupancy: config.leaf_occupancy,
            node_occupancy: config.node_occupancy,
            scan: None,
        })
    }

    fn create(
        relation_name: &str,
        bufmgr: Arc<BufferManager>,
        attr_byte_offset: usize,
        attr_type: AttrType,
        config: BTreeConfig,
        index_name: String,
    ) -> Result<Self> {
        if attr_type != AttrType::Int32 {
            return Err(TernError::UnsupportedAttrType(attr_type));
        }

        let file_id = bufmgr.disk().open(&index_name, true)?;

        let (header_page_num, meta_frame) = bufmgr.alloc_page(file_id)?;
        let (root_page_num, root_frame) = bufmgr.alloc_page(file_id)?;

        {
            let mut data = root_frame.write_data();
            LeafNode::init(&mut data[..]);
        }
        {
            let meta = IndexMetaPage::new(
                relation_name,
                attr_byte_offset as u32,
                attr_type.as_u32(),
                root_page_num,
            );
            let mut data = meta_frame.write_data();
            data[..IndexMetaPage::SIZE].copy_from_slice(&meta.to_bytes());
        }
        bufmgr.unpin_page(PageId::new(file_id, header_page_num), true)?;
        bufmgr.unpin_page(PageId::new(file_id, root_page_num), true)?;

        let mut index = Self {
            bufmgr: bufmgr.clone(),
            file_id,
            index_name,
            header_page_num,
            root_page_num,
            root_is_leaf: true,
            leaf_occupancy: config.leaf_occupancy,
            node_occupancy: config.node_occupancy,
            scan: None,
        };

        // Initial bulk load: every record of the relation, one at a time.
        let mut loaded = 0u64;
        let mut file_scan = FileScan::open(bufmgr.clone(), relation_name)?;
        while let Some(rid) = file_scan.scan_next()? {
            let record = file_scan.record()?;
            let key = key_at_offset(&record, attr_byte_offset)?;
            index.insert_entry(key, rid)?;
            loaded += 1;
        }
        bufmgr.flush_file(file_id)?;

        debug!(index = %index.index_name, records = loaded, "created and bulk-loaded index");

        Ok(index)
    }

    /// Returns the index file name.
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Returns the index file ID.
    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    /// Returns true while the root is still the original leaf.
    pub fn is_root_leaf(&self) -> bool {
        self.root_is_leaf
    }

    fn page_id(&self, page_num: u32) -> PageId {
        PageId::new(self.file_id, page_num)
    }

    // =========================================================================
    // Insert
    // =========================================================================

    /// Inserts a key/record-ID pair.
    pub fn insert_entry(&mut self, key: i32, rid: RecordId) -> Result<()> {
        let (root, root_is_leaf) = (self.root_page_num, self.root_is_leaf);
        if let Some(promotion) = self.insert_into_node(root, root_is_leaf, key, rid)? {
            self.form_new_root(root, promotion)?;
        }
        Ok(())
    }

    /// Recursive descent. Pins the node it is given, releases that pin on
    /// every path, and returns the promotion from a split, if any.
    fn insert_into_node(
        &self,
        page_num: u32,
        is_leaf: bool,
        key: i32,
        rid: RecordId,
    ) -> Result<Option<Promotion>> {
        let pid = self.page_id(page_num);
        let frame = self.bufmgr.read_page(pid)?;

        if is_leaf {
            let full = {
                let data = frame.read_data();
                LeafNode::is_full(&data[..], self.leaf_occupancy)
            };
            if !full {
                {
                    let mut data = frame.write_data();
                    LeafNode::insert_sorted(&mut data[..], self.leaf_occupancy, key, rid);
                }
                self.bufmgr.unpin_page(pid, true)?;
                return Ok(None);
            }
            // split_leaf takes over the pin on this page.
            return self.split_leaf(page_num, key, rid).map(Some);
        }

        let (child, child_is_leaf) = {
            let data = frame.read_data();
            (
                InternalNode::find_child(&data[..], self.node_occupancy, key),
                InternalNode::level(&data[..]) == 1,
            )
        };

        let promotion = match self.insert_into_node(child, child_is_leaf, key, rid) {
            Ok(promotion) => promotion,
            Err(e) => {
                let _ = self.bufmgr.unpin_page(pid, false);
                return Err(e);
            }
        };

        let Some(promotion) = promotion else {
            // Child absorbed the insert; nothing changed here.
            self.bufmgr.unpin_page(pid, false)?;
            return Ok(None);
        };

        let full = {
            let data = frame.read_data();
            InternalNode::is_full(&data[..], self.node_occupancy)
        };
        if !full {
            {
                let mut data = frame.write_data();
                InternalNode::insert_entry(
                    &mut data[..],
                    self.node_occupancy,
                    promotion.key,
                    promotion.right_page_num,
                );
            }
            self.bufmgr.unpin_page(pid, true)?;
            return Ok(None);
        }

        self.split_internal(page_num, promotion).map(Some)
    }

    /// Splits a full leaf, inserting the new entry into the proper half.
    ///
    /// The caller's pin on `leaf_page_num` is released here, along with the
    /// pin on the freshly allocated right sibling.
    fn split_leaf(&self, leaf_page_num: u32, key: i32, rid: RecordId) -> Result<Promotion> {
        let cap = self.leaf_occupancy;
        let left_pid = self.page_id(leaf_page_num);

        let (right_page_num, right_frame) = match self.bufmgr.alloc_page(self.file_id) {
            Ok(allocated) => allocated,
            Err(e) => {
                let _ = self.bufmgr.unpin_page(left_pid, false);
                return Err(e);
            }
        };
        let left_frame = self.bufmgr.peek_page(left_pid)?;

        let promoted_key = {
            let mut left = left_frame.write_data();
            let mut right = right_frame.write_data();
            LeafNode::init(&mut right[..]);

            // Split point: half, nudged right when the new key lands in the
            // upper half of an odd-capacity leaf.
            let mut mid = cap / 2;
            if cap % 2 == 1 && key > LeafNode::key_at(&left[..], mid) {
                mid += 1;
            }

            for i in mid..cap {
                let k = LeafNode::key_at(&left[..], i);
                let r = LeafNode::rid_at(&left[..], cap, i);
                LeafNode::set_entry(&mut right[..], cap, i - mid, k, r);
                LeafNode::clear_entry(&mut left[..], cap, i);
            }

            if key > LeafNode::key_at(&left[..], mid - 1) {
                LeafNode::insert_sorted(&mut right[..], cap, key, rid);
            } else {
                LeafNode::insert_sorted(&mut left[..], cap, key, rid);
            }

            // Splice the new leaf into the sibling chain.
            let old_sibling = LeafNode::right_sibling(&left[..]);
            LeafNode::set_right_sibling(&mut right[..], old_sibling);
            LeafNode::set_right_sibling(&mut left[..], right_page_num);

            LeafNode::key_at(&right[..], 0)
        };

        self.bufmgr.unpin_page(left_pid, true)?;
        self.bufmgr
            .unpin_page(self.page_id(right_page_num), true)?;

        Ok(Promotion {
            key: promoted_key,
            right_page_num,
        })
    }

    /// Splits a full internal node around a pushed-up separator.
    ///
    /// Releases the caller's pin on `page_num` and the pin on the new node.
    fn split_internal(&self, page_num: u32, incoming: Promotion) -> Result<Promotion> {
        let cap = self.node_occupancy;
        let left_pid = self.page_id(page_num);

        let (right_page_num, right_frame) = match self.bufmgr.alloc_page(self.file_id) {
            Ok(allocated) => allocated,
            Err(e) => {
                let _ = self.bufmgr.unpin_page(left_pid, false);
                return Err(e);
            }
        };
        let left_frame = self.bufmgr.peek_page(left_pid)?;

        let promoted_key = {
            let mut left = left_frame.write_data();
            let mut right = right_frame.write_data();

            // The pushed-up index: the midpoint, except an even capacity
            // leans on which half the incoming key belongs to.
            let mid = cap / 2;
            let push_idx = if cap % 2 == 0 {
                if incoming.key < InternalNode::key_at(&left[..], mid) {
                    mid - 1
                } else {
                    mid
                }
            } else {
                mid
            };
            let promoted_key = InternalNode::key_at(&left[..], push_idx);

            InternalNode::init(&mut right[..], InternalNode::level(&left[..]));

            // Keys above the pushed-up slot move right; the child pointers
            // from push_idx + 1 through cap go with them.
            for i in (push_idx + 1)..cap {
                let k = InternalNode::key_at(&left[..], i);
                InternalNode::set_key(&mut right[..], i - (push_idx + 1), k);
                InternalNode::set_key(&mut left[..], i, 0);
            }
            for i in (push_idx + 1)..=cap {
                let c = InternalNode::child_at(&left[..], cap, i);
                InternalNode::set_child(&mut right[..], cap, i - (push_idx + 1), c);
                InternalNode::set_child(&mut left[..], cap, i, INVALID_PAGE_NUM);
            }
            InternalNode::set_key(&mut left[..], push_idx, 0);

            // The incoming entry lands on whichever side its key range fell:
            // below the pushed-up separator is the left node, at or above it
            // the right node.
            if incoming.key < promoted_key {
                InternalNode::insert_entry(&mut left[..], cap, incoming.key, incoming.right_page_num);
            } else {
                InternalNode::insert_entry(
                    &mut right[..],
                    cap,
                    incoming.key,
                    incoming.right_page_num,
                );
            }

            promoted_key
        };

        self.bufmgr.unpin_page(left_pid, true)?;
        self.bufmgr
            .unpin_page(self.page_id(right_page_num), true)?;

        Ok(Promotion {
            key: promoted_key,
            right_page_num,
        })
    }

    /// Replaces the root after a promotion climbed past it.
    ///
    /// The meta page is updated (and unpinned dirty) before this returns, so
    /// any later descent sees the new root.
    fn form_new_root(&mut self, old_root: u32, promotion: Promotion) -> Result<()> {
        let (new_root_num, root_frame) = self.bufmgr.alloc_page(self.file_id)?;

        {
            let mut data = root_frame.write_data();
            let level = if self.root_is_leaf { 1 } else { 0 };
            InternalNode::init(&mut data[..], level);
            InternalNode::set_child(&mut data[..], self.node_occupancy, 0, old_root);
            InternalNode::set_child(
                &mut data[..],
                self.node_occupancy,
                1,
                promotion.right_page_num,
            );
            InternalNode::set_key(&mut data[..], 0, promotion.key);
        }

        let meta_pid = self.page_id(self.header_page_num);
        let meta_frame = match self.bufmgr.read_page(meta_pid) {
            Ok(frame) => frame,
            Err(e) => {
                let _ = self
                    .bufmgr
                    .unpin_page(self.page_id(new_root_num), false);
                return Err(e);
            }
        };
        {
            let mut data = meta_frame.write_data();
            let mut meta = IndexMetaPage::from_bytes(&data[..IndexMetaPage::SIZE]);
            meta.root_page_num = new_root_num;
            meta.root_is_leaf = false;
            data[..IndexMetaPage::SIZE].copy_from_slice(&meta.to_bytes());
        }
        self.bufmgr.unpin_page(meta_pid, true)?;
        self.bufmgr.unpin_page(self.page_id(new_root_num), true)?;

        self.root_page_num = new_root_num;
        self.root_is_leaf = false;

        debug!(index = %self.index_name, new_root = new_root_num, "root split");

        Ok(())
    }

    // =========================================================================
    // Range scan
    // =========================================================================

    /// Begins a range scan over keys between `low` and `high`.
    ///
    /// An already-live scan is ended first. On success exactly one page, the
    /// current leaf, stays pinned until the scan advances past it or ends.
    pub fn start_scan(
        &mut self,
        low: i32,
        low_op: ScanOperator,
        high: i32,
        high_op: ScanOperator,
    ) -> Result<()> {
        if self.scan.is_some() {
            self.end_scan()?;
        }

        if !matches!(
            low_op,
            ScanOperator::GreaterThan | ScanOperator::GreaterThanOrEqual
        ) || !matches!(high_op, ScanOperator::LessThan | ScanOperator::LessThanOrEqual)
        {
            return Err(TernError::BadOpcodes);
        }
        if high < low {
            return Err(TernError::BadScanRange { low, high });
        }

        // Descend toward the leaf that would hold the lower bound, using the
        // same routing as insert.
        let mut page_num = self.root_page_num;
        if !self.root_is_leaf {
            loop {
                let pid = self.page_id(page_num);
                let frame = self.bufmgr.read_page(pid)?;
                let (child, next_is_leaf) = {
                    let data = frame.read_data();
                    (
                        InternalNode::find_child(&data[..], self.node_occupancy, low),
                        InternalNode::level(&data[..]) == 1,
                    )
                };
                self.bufmgr.unpin_page(pid, false)?;
                page_num = child;
                if next_is_leaf {
                    break;
                }
            }
        }

        // Walk the sibling chain to the first entry satisfying the lower
        // bound; keys only grow rightward, so the first hit is the start.
        let mut frame = self.bufmgr.read_page(self.page_id(page_num))?;
        loop {
            let first_match = {
                let data = frame.read_data();
                let occupancy = LeafNode::occupancy(&data[..], self.leaf_occupancy);
                (0..occupancy)
                    .map(|i| (i, LeafNode::key_at(&data[..], i)))
                    .find(|&(_, k)| match low_op {
                        ScanOperator::GreaterThan => k > low,
                        _ => k >= low,
                    })
            };

            if let Some((next_entry, key)) = first_match {
                let in_range = match high_op {
                    ScanOperator::LessThan => key < high,
                    _ => key <= high,
                };
                if !in_range {
                    self.bufmgr.unpin_page(self.page_id(page_num), false)?;
                    return Err(TernError::NoSuchKeyFound);
                }
                self.scan = Some(ScanState {
                    low,
                    high,
                    low_op,
                    high_op,
                    current_page_num: page_num,
                    next_entry,
                    at_end: false,
                });
                return Ok(());
            }

            let sibling = {
                let data = frame.read_data();
                LeafNode::right_sibling(&data[..])
            };
            self.bufmgr.unpin_page(self.page_id(page_num), false)?;
            if sibling == INVALID_PAGE_NUM {
                return Err(TernError::NoSuchKeyFound);
            }
            page_num = sibling;
            frame = self.bufmgr.read_page(self.page_id(page_num))?;
        }
    }

    /// Emits the record ID of the next entry in the scan.
    ///
    /// Fails `IndexScanCompleted` once the upper bound is passed or the
    /// sibling chain runs out; the scan stays live (and its leaf pinned)
    /// until `end_scan`.
    pub fn scan_next(&mut self) -> Result<RecordId> {
        let file_id = self.file_id;
        let leaf_occupancy = self.leaf_occupancy;

        let scan = self
            .scan
            .as_mut()
            .ok_or(TernError::ScanNotInitialized)?;
        if scan.at_end {
            return Err(TernError::IndexScanCompleted);
        }

        let pid = PageId::new(file_id, scan.current_page_num);
        let frame = self.bufmgr.peek_page(pid)?;

        let (key, rid, occupancy, sibling) = {
            let data = frame.read_data();
            (
                LeafNode::key_at(&data[..], scan.next_entry),
                LeafNode::rid_at(&data[..], leaf_occupancy, scan.next_entry),
                LeafNode::occupancy(&data[..], leaf_occupancy),
                LeafNode::right_sibling(&data[..]),
            )
        };

        // Keys only grow along the chain, so entries past the start always
        // satisfy the lower bound.
        debug_assert!(match scan.low_op {
            ScanOperator::GreaterThan => key > scan.low,
            _ => key >= scan.low,
        });

        let in_range = match scan.high_op {
            ScanOperator::LessThan => key < scan.high,
            _ => key <= scan.high,
        };
        if !in_range {
            return Err(TernError::IndexScanCompleted);
        }

        // Advance: next slot, next sibling, or end of chain.
        if scan.next_entry + 1 < occupancy {
            scan.next_entry += 1;
        } else if sibling == INVALID_PAGE_NUM {
            scan.at_end = true;
        } else {
            self.bufmgr.unpin_page(pid, false)?;
            self.bufmgr.read_page(PageId::new(file_id, sibling))?;
            scan.current_page_num = sibling;
            scan.next_entry = 0;
        }

        Ok(rid)
    }

    /// Ends the live scan, releasing its leaf pin.
    pub fn end_scan(&mut self) -> Result<()> {
        let scan = self.scan.take().ok_or(TernError::ScanNotInitialized)?;
        self.bufmgr
            .unpin_page(self.page_id(scan.current_page_num), false)?;
        Ok(())
    }
}

impl Drop for BTreeIndex {
    fn drop(&mut self) {
        if let Some(scan) = self.scan.take() {
            let _ = self
                .bufmgr
                .unpin_page(self.page_id(scan.current_page_num), false);
        }
        let _ = self.bufmgr.flush_file(self.file_id);
    }
}

/// Reads the indexed attribute out of a record as a little-endian `i32`.
fn key_at_offset(record: &[u8], offset: usize) -> Result<i32> {
    if record.len() < offset + 4 {
        return Err(TernError::Internal(format!(
            "record of {} bytes has no attribute at offset {}",
            record.len(),
            offset
        )));
    }
    Ok(i32::from_le_bytes([
        record[offset],
        record[offset + 1],
        record[offset + 2],
        record[offset + 3],
    ]))
}
