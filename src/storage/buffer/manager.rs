use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::common::types::{Frame, FrameId, Lsn, Page, PageId, PageNo, TableId, TxnId};
use crate::storage::buffer::error::{BufferPoolError, Result};
use crate::storage::buffer::page_guard::PageGuard;
use crate::storage::buffer::replacer::ClockReplacer;
use crate::storage::disk::PageStore;
use crate::transaction::concurrency::{LockManager, LockMode};
use crate::transaction::wal::LogManager;

mod frame_management;
mod transactions;

/// Configuration for the page cache
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames
    pub pool_size: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self { pool_size: 128 }
    }
}

/// Slot table state. Pin counts, the page table and the replacer only
/// change under this one mutex; page content has its own latch per frame.
pub(super) struct PoolState {
    frames: Vec<Frame>,
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: ClockReplacer,
}

pub struct BufferPoolManager {
    pool_size: usize,
    state: Mutex<PoolState>,
    disk_manager: Arc<dyn PageStore>,
    log_manager: Arc<LogManager>,
    lock_manager: Arc<LockManager>,
}

impl BufferPoolManager {
    pub fn new(
        config: BufferPoolConfig,
        disk_manager: Arc<dyn PageStore>,
        log_manager: Arc<LogManager>,
        lock_manager: Arc<LockManager>,
    ) -> Self {
        let pool_size = config.pool_size;
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            let frame_id = i as FrameId;
            let page = Arc::new(RwLock::new(Page::new(PageId::new(0, 0))));
            frames.push(Frame::new(frame_id, page));
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            state: Mutex::new(PoolState {
                frames,
                page_table: HashMap::new(),
                free_list,
                replacer: ClockReplacer::new(pool_size),
            }),
            disk_manager,
            log_manager,
            lock_manager,
        }
    }

    /// Lock the page in `mode` for `txn_id` (this may block), then return it
    /// pinned, reading it from the page store on a miss.
    pub fn fetch_page(&self, txn_id: TxnId, page_id: PageId, mode: LockMode) -> Result<PageGuard<'_>> {
        self.lock_manager.acquire(txn_id, page_id, mode)?;
        self.pin_page(page_id)
    }

    /// Pin a page without taking a transaction lock. Only used while no
    /// transactions run, i.e. during restart recovery.
    pub(crate) fn fetch_page_unlocked(&self, page_id: PageId) -> Result<PageGuard<'_>> {
        self.pin_page(page_id)
    }

    fn pin_page(&self, page_id: PageId) -> Result<PageGuard<'_>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = &mut state.frames[frame_id as usize];
            frame.pin_count += 1;
            state.replacer.record_access(frame_id);
            state.replacer.set_evictable(frame_id, false);
            return Ok(PageGuard::new(self, frame_id, page_id, Arc::clone(&frame.page)));
        }

        let frame_id = self.allocate_frame(state)?;
        let data = match self.disk_manager.read_page(page_id) {
            Ok(data) => data,
            Err(e) => {
                state.free_list.push_back(frame_id);
                return Err(e.into());
            }
        };

        let frame = &mut state.frames[frame_id as usize];
        *frame.page.write() = Page::from_disk(page_id, data);
        frame.page_id = Some(page_id);
        frame.pin_count = 1;
        let page = Arc::clone(&frame.page);

        state.page_table.insert(page_id, frame_id);
        state.replacer.insert(frame_id);
        debug!("Loaded page {} into frame {}", page_id, frame_id);

        Ok(PageGuard::new(self, frame_id, page_id, page))
    }

    /// Pin a page only if it is already cached
    fn pin_resident(&self, page_id: PageId) -> Option<PageGuard<'_>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let frame_id = *state.page_table.get(&page_id)?;
        let frame = &mut state.frames[frame_id as usize];
        frame.pin_count += 1;
        state.replacer.set_evictable(frame_id, false);
        Some(PageGuard::new(self, frame_id, page_id, Arc::clone(&frame.page)))
    }

    pub(crate) fn unpin(&self, frame_id: FrameId) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if let Some(frame) = state.frames.get_mut(frame_id as usize) {
            frame.pin_count = frame.pin_count.saturating_sub(1);
            if frame.pin_count == 0 {
                state.replacer.set_evictable(frame_id, true);
            }
        }
    }

    /// Record that `txn_id` changed the page under the log record `lsn`.
    /// The record must already be appended.
    pub fn mark_dirty(&self, page: &mut Page, txn_id: TxnId, lsn: Lsn) {
        page.dirtied_by = Some(txn_id);
        if lsn > page.lsn {
            page.lsn = lsn;
        }
    }

    /// Write a cached page to the page store if it is dirty, forcing the
    /// log up to the page's LSN first. Pages not in the cache are skipped.
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let Some(guard) = self.pin_resident(page_id) else {
            return Ok(());
        };
        let mut page = guard.write();
        self.write_out(&mut page)
    }

    /// Drop a page from the cache without writing it. The page must not
    /// be pinned.
    pub fn discard_page(&self, page_id: PageId) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(());
        };
        let frame = &mut state.frames[frame_id as usize];
        if frame.pin_count > 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }

        *frame.page.write() = Page::new(page_id);
        frame.page_id = None;
        state.page_table.remove(&page_id);
        state.replacer.remove(frame_id);
        state.free_list.push_back(frame_id);
        debug!("Discarded page {} from frame {}", page_id, frame_id);
        Ok(())
    }

    /// Write every dirty cached page
    pub fn flush_all_pages(&self) -> Result<()> {
        self.for_each_resident(|pool, page| pool.write_out(page))
    }

    /// Append a zeroed page to a table
    pub fn allocate_page(&self, table_id: TableId) -> Result<PageId> {
        Ok(self.disk_manager.allocate_page(table_id)?)
    }

    /// Number of pages in a table
    pub fn num_pages(&self, table_id: TableId) -> Result<PageNo> {
        Ok(self.disk_manager.num_pages(table_id)?)
    }

    /// Number of frames
    pub fn capacity(&self) -> usize {
        self.pool_size
    }

    /// Number of pages currently cached
    pub fn resident_pages(&self) -> usize {
        self.state.lock().page_table.len()
    }

    pub fn is_resident(&self, page_id: PageId) -> bool {
        self.state.lock().page_table.contains_key(&page_id)
    }

    /// Pin count of a cached page
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.state.lock();
        let frame_id = *state.page_table.get(&page_id)?;
        Some(state.frames[frame_id as usize].pin_count)
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    pub fn log_manager(&self) -> &Arc<LogManager> {
        &self.log_manager
    }
}
