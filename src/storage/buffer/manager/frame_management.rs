use log::debug;

use crate::common::types::{FrameId, Page, PageId};
use crate::storage::buffer::error::{BufferPoolError, Result};

use super::{BufferPoolManager, PoolState};

impl BufferPoolManager {
    /// Take a free frame, or evict a page to make one
    pub(super) fn allocate_frame(&self, state: &mut PoolState) -> Result<FrameId> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }
        self.evict_frame(state)
    }

    /// Run the clock sweep and empty the chosen frame. A dirty victim is
    /// written out first, so a failed write leaves it cached.
    fn evict_frame(&self, state: &mut PoolState) -> Result<FrameId> {
        let PoolState {
            frames,
            page_table,
            replacer,
            ..
        } = state;

        // Unpinned frames have no latch holders, so this read never waits
        let frame_id = replacer
            .victim(|frame_id| frames[frame_id as usize].page.read().is_dirty())
            .ok_or(BufferPoolError::CacheExhausted)?;

        let frame = &mut frames[frame_id as usize];
        {
            let mut page = frame.page.write();
            if page.is_dirty() {
                debug!("Evicting dirty page {} from frame {}", page.page_id, frame_id);
                // Runs under the pool mutex: every fetch waits on this log
                // force and page write. Accepted, eviction stays one step.
                self.write_out(&mut page)?;
            }
        }

        if let Some(old_page_id) = frame.page_id.take() {
            page_table.remove(&old_page_id);
        }
        replacer.remove(frame_id);
        Ok(frame_id)
    }

    /// Write a dirty page to the page store, honoring write-ahead order:
    /// the log must be durable up to the page LSN before the page is.
    pub(super) fn write_out(&self, page: &mut Page) -> Result<()> {
        if !page.is_dirty() {
            return Ok(());
        }

        self.log_manager.flush_till_lsn(page.lsn)?;
        let flushed_lsn = self.log_manager.flushed_lsn();
        if flushed_lsn < page.lsn {
            return Err(BufferPoolError::WalViolation {
                page_id: page.page_id,
                page_lsn: page.lsn,
                flushed_lsn,
            });
        }

        self.disk_manager.write_page(page.page_id, &page.data)?;
        page.dirtied_by = None;
        page.set_before_image();
        debug!("Wrote page {} (LSN {})", page.page_id, page.lsn);
        Ok(())
    }

    /// Pages currently cached, in no particular order
    pub(super) fn resident_page_ids(&self) -> Vec<PageId> {
        self.state.lock().page_table.keys().copied().collect()
    }

    /// Pin each cached page in turn and run `op` on it under its write
    /// latch. No pool-wide lock is held while `op` runs.
    pub(super) fn for_each_resident(
        &self,
        mut op: impl FnMut(&BufferPoolManager, &mut Page) -> Result<()>,
    ) -> Result<()> {
        for page_id in self.resident_page_ids() {
            if let Some(guard) = self.pin_resident(page_id) {
                let mut page = guard.write();
                op(self, &mut page)?;
            }
        }
        Ok(())
    }
}
