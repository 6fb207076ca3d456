use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::types::{FrameId, Page, PageId, PagePtr};
use crate::storage::buffer::BufferPoolManager;

/// RAII pin on a cached page.
///
/// The frame cannot be evicted while the guard lives; dropping it unpins
/// the frame. Content is reached through the page latch with `read` and
/// `write`, which should be held only for the duration of one access.
pub struct PageGuard<'a> {
    pool: &'a BufferPoolManager,
    frame_id: FrameId,
    page_id: PageId,
    page: PagePtr,
}

impl<'a> PageGuard<'a> {
    pub(crate) fn new(pool: &'a BufferPoolManager, frame_id: FrameId, page_id: PageId, page: PagePtr) -> Self {
        Self {
            pool,
            frame_id,
            page_id,
            page,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Shared access to the page
    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read()
    }

    /// Exclusive access to the page
    pub fn write(&self) -> RwLockWriteGuard<'_, Page> {
        self.page.write()
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin(self.frame_id);
    }
}
