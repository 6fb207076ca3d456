use std::fmt;
use std::sync::Arc;
use parking_lot::RwLock;
use serde::{Serialize, Deserialize};

/// Page size in bytes (4KB), shared by every table file
pub const PAGE_SIZE: usize = 4096;

/// Table (file) ID type
pub type TableId = u32;

/// Page number within a table file
pub type PageNo = u32;

/// Transaction ID type. 0 is never handed out to a transaction.
pub type TxnId = u32;

/// Buffer pool frame ID type
pub type FrameId = u32;

/// LSN (Log Sequence Number) type. 0 means "no record".
pub type Lsn = u64;

/// Identifies one fixed-size block: a page number inside a table file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId {
    pub table_id: TableId,
    pub page_no: PageNo,
}

impl PageId {
    pub fn new(table_id: TableId, page_no: PageNo) -> Self {
        Self { table_id, page_no }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table_id, self.page_no)
    }
}

/// Record ID: a slot on a page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.page_id, self.slot)
    }
}

/// In-memory copy of one on-disk block
#[derive(Debug, Clone)]
pub struct Page {
    pub page_id: PageId,
    pub data: Box<[u8; PAGE_SIZE]>,
    /// LSN of the latest log record describing a change to this page
    pub lsn: Lsn,
    /// Transaction that dirtied the page since it was last written out
    pub dirtied_by: Option<TxnId>,
    before_image: Option<Box<[u8; PAGE_SIZE]>>,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            page_id,
            data: Box::new([0; PAGE_SIZE]),
            lsn: 0,
            dirtied_by: None,
            before_image: None,
        }
    }

    /// Build a clean page from bytes just read from the page store
    pub fn from_disk(page_id: PageId, data: Box<[u8; PAGE_SIZE]>) -> Self {
        Self {
            page_id,
            before_image: Some(data.clone()),
            data,
            lsn: 0,
            dirtied_by: None,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirtied_by.is_some()
    }

    /// Content as of the last read from, or write to, the page store
    pub fn before_image(&self) -> Option<&[u8; PAGE_SIZE]> {
        self.before_image.as_deref()
    }

    /// Snapshot the current content as the new before-image
    pub fn set_before_image(&mut self) {
        self.before_image = Some(self.data.clone());
    }
}

/// Smart pointer to a page
pub type PagePtr = Arc<RwLock<Page>>;

/// Buffer pool frame: one cache slot. The reference bit lives in the
/// replacer; the dirty bit lives in the page.
#[derive(Debug)]
pub struct Frame {
    pub page: PagePtr,
    pub frame_id: FrameId,
    /// Page currently cached in this frame
    pub page_id: Option<PageId>,
    pub pin_count: u32,
}

impl Frame {
    pub fn new(frame_id: FrameId, page: PagePtr) -> Self {
        Self {
            page,
            frame_id,
            page_id: None,
            pin_count: 0,
        }
    }
}
