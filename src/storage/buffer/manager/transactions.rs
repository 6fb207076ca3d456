use crate::common::types::{PageId, TxnId};
use crate::storage::buffer::error::Result;

use super::BufferPoolManager;

impl BufferPoolManager {
    /// Write every cached page last dirtied by `txn_id`
    pub fn flush_pages(&self, txn_id: TxnId) -> Result<()> {
        self.for_each_resident(|pool, page| {
            if page.dirtied_by == Some(txn_id) {
                pool.write_out(page)?;
            }
            Ok(())
        })
    }

    /// Take a fresh before-image of every cached page dirtied by a
    /// transaction that just committed
    pub fn refresh_before_images(&self, txn_id: TxnId) -> Result<()> {
        self.for_each_resident(|_, page| {
            if page.dirtied_by == Some(txn_id) {
                page.set_before_image();
            }
            Ok(())
        })
    }

    /// Cached pages that differ from their on-disk copy
    pub fn dirty_pages(&self) -> Result<Vec<PageId>> {
        let mut dirty = Vec::new();
        self.for_each_resident(|_, page| {
            if page.is_dirty() {
                dirty.push(page.page_id);
            }
            Ok(())
        })?;
        dirty.sort();
        Ok(dirty)
    }

    /// Give up one page lock before the transaction ends. Only safe for
    /// pages the transaction has read but not changed.
    pub fn release_page(&self, txn_id: TxnId, page_id: PageId) -> bool {
        self.lock_manager.release(txn_id, page_id)
    }

    /// Whether the transaction holds any lock on the page
    pub fn holds_lock(&self, txn_id: TxnId, page_id: PageId) -> bool {
        self.lock_manager.holds(txn_id, page_id)
    }
}
