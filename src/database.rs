// BasaltDB Database Engine Handle
//
// Wires the page store, log, lock manager and page cache together, runs
// restart recovery on open, and exposes the transactional page and record
// interface used by higher layers.

use std::ops::Range;
use std::sync::Arc;

use log::{info, warn};
use thiserror::Error;

use crate::common::config::DatabaseConfig;
use crate::common::types::{Lsn, Page, PageId, Rid, TableId, TxnId, PAGE_SIZE};
use crate::storage::buffer::{BufferPoolError, BufferPoolManager, PageGuard};
use crate::storage::disk::{DiskManager, DiskManagerError, PageStore};
use crate::storage::page::layout::MAX_RECORD_SIZE;
use crate::storage::page::{PageError, PageManager};
use crate::transaction::concurrency::{
    LockError, LockManager, LockMode, Transaction, TransactionError, TransactionManager,
};
use crate::transaction::recovery::TransactionRecoveryManager;
use crate::transaction::wal::checkpoint::{CheckpointError, CheckpointManager};
use crate::transaction::wal::recovery::{RecoveryError, RecoveryManager, RecoverySummary};
use crate::transaction::wal::{LogManager, LogManagerError};

/// Unchanged bytes between two changed runs shorter than this are logged
/// with them rather than splitting the change into two records
const MERGE_GAP: usize = 16;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Transaction {txn_id} must be aborted: {source}")]
    TransactionAborted {
        txn_id: TxnId,
        #[source]
        source: LockError,
    },

    #[error("Buffer pool error: {0}")]
    BufferPoolError(BufferPoolError),

    #[error("Disk manager error: {0}")]
    DiskManagerError(#[from] DiskManagerError),

    #[error("Log manager error: {0}")]
    LogManagerError(#[from] LogManagerError),

    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),

    #[error("Recovery error: {0}")]
    RecoveryError(RecoveryError),

    #[error("Checkpoint error: {0}")]
    CheckpointError(#[from] CheckpointError),

    #[error("Page error: {0}")]
    PageError(#[from] PageError),

    #[error("Write of {len} bytes at offset {offset} is not within one page")]
    InvalidWrite { offset: usize, len: usize },
}

impl From<BufferPoolError> for DatabaseError {
    fn from(e: BufferPoolError) -> Self {
        match e {
            BufferPoolError::TransactionAborted(source) => DatabaseError::TransactionAborted {
                txn_id: source.txn_id(),
                source,
            },
            other => DatabaseError::BufferPoolError(other),
        }
    }
}

impl From<RecoveryError> for DatabaseError {
    fn from(e: RecoveryError) -> Self {
        match e {
            RecoveryError::TransactionAborted(source)
            | RecoveryError::BufferPoolError(BufferPoolError::TransactionAborted(source)) => {
                DatabaseError::TransactionAborted {
                    txn_id: source.txn_id(),
                    source,
                }
            }
            other => DatabaseError::RecoveryError(other),
        }
    }
}

impl DatabaseError {
    /// Whether the caller has to abort the transaction and retry it
    pub fn is_transaction_aborted(&self) -> bool {
        matches!(self, DatabaseError::TransactionAborted { .. })
    }
}

pub type Result<T> = std::result::Result<T, DatabaseError>;

/// One open database
pub struct Database {
    config: DatabaseConfig,
    disk_manager: Arc<DiskManager>,
    log_manager: Arc<LogManager>,
    buffer_pool: Arc<BufferPoolManager>,
    transaction_manager: Arc<TransactionManager>,
    recovery_manager: TransactionRecoveryManager,
    checkpoint_manager: CheckpointManager,
    page_manager: PageManager,
    recovery_summary: RecoverySummary,
}

impl Database {
    /// Open (or create) a database and bring it to a consistent state
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        let disk_manager = Arc::new(DiskManager::new(&config.data_dir)?);
        let log_manager = Arc::new(LogManager::new(config.log.clone())?);
        let lock_manager = Arc::new(LockManager::new(config.lock_manager.clone()));
        let buffer_pool = Arc::new(BufferPoolManager::new(
            config.buffer_pool.clone(),
            disk_manager.clone(),
            log_manager.clone(),
            lock_manager,
        ));

        let recovery_summary = RecoveryManager::new(log_manager.clone(), buffer_pool.clone()).recover()?;

        let transaction_manager = Arc::new(TransactionManager::new(
            log_manager.clone(),
            recovery_summary.max_txn_id.saturating_add(1),
        ));
        let recovery_manager = TransactionRecoveryManager::new(
            log_manager.clone(),
            buffer_pool.clone(),
            transaction_manager.clone(),
        );
        let checkpoint_manager =
            CheckpointManager::new(log_manager.clone(), buffer_pool.clone(), config.checkpoint.clone());

        let db = Self {
            config,
            disk_manager,
            log_manager,
            buffer_pool,
            transaction_manager,
            recovery_manager,
            checkpoint_manager,
            page_manager: PageManager::new(),
            recovery_summary,
        };

        if db.recovery_summary.redone > 0 || !db.recovery_summary.losers.is_empty() {
            db.checkpoint()?;
        }

        info!(
            "Opened database at {} (next transaction {})",
            db.config.data_dir.display(),
            db.transaction_manager.next_txn_id()
        );
        Ok(db)
    }

    pub fn begin(&self) -> Result<Arc<Transaction>> {
        Ok(self.transaction_manager.begin_transaction()?)
    }

    /// Commit; durable when this returns. Refused with `TransactionAborted`
    /// once the lock manager picked the transaction to abort.
    pub fn commit(&self, txn: &Transaction) -> Result<Lsn> {
        Ok(self.recovery_manager.commit(txn)?)
    }

    /// Roll the transaction back and release its locks. Required after any
    /// `TransactionAborted` error.
    pub fn abort(&self, txn: &Transaction) -> Result<Lsn> {
        Ok(self.recovery_manager.abort(txn)?)
    }

    /// Lock and pin a page
    pub fn fetch_page(&self, txn: &Transaction, page_id: PageId, mode: LockMode) -> Result<PageGuard<'_>> {
        Ok(self.buffer_pool.fetch_page(txn.id(), page_id, mode)?)
    }

    /// Overwrite `bytes.len()` bytes of a page at `offset`, logging the
    /// change before the page is marked dirty
    pub fn write_page_bytes(&self, txn: &Transaction, page_id: PageId, offset: usize, bytes: &[u8]) -> Result<Lsn> {
        let in_page = offset
            .checked_add(bytes.len())
            .is_some_and(|end| end <= PAGE_SIZE);
        if bytes.is_empty() || !in_page {
            return Err(DatabaseError::InvalidWrite {
                offset,
                len: bytes.len(),
            });
        }

        let guard = self.fetch_page(txn, page_id, LockMode::Exclusive)?;
        let mut page = guard.write();
        self.log_and_apply(txn, &mut page, offset, bytes)
    }

    fn log_and_apply(&self, txn: &Transaction, page: &mut Page, offset: usize, after: &[u8]) -> Result<Lsn> {
        let range = offset..offset + after.len();
        let lsn = txn.log_update(page.page_id, offset as u32, &page.data[range.clone()], after)?;
        page.data[range].copy_from_slice(after);
        self.buffer_pool.mark_dirty(page, txn.id(), lsn);
        Ok(lsn)
    }

    /// Run a page operation on a copy of the page, then log and apply the
    /// bytes it changed
    fn modify_page<T, F>(&self, txn: &Transaction, page_id: PageId, op: F) -> Result<T>
    where
        F: FnOnce(&mut [u8]) -> std::result::Result<T, PageError>,
    {
        let guard = self.fetch_page(txn, page_id, LockMode::Exclusive)?;
        let mut page = guard.write();

        let mut scratch = page.data.to_vec();
        let value = op(&mut scratch)?;

        for range in changed_ranges(&page.data[..], &scratch) {
            let offset = range.start;
            self.log_and_apply(txn, &mut page, offset, &scratch[range])?;
        }
        Ok(value)
    }

    /// Insert a record into the first page of the table with room for it,
    /// extending the table when none has
    pub fn insert_record(&self, txn: &Transaction, table_id: TableId, record: &[u8]) -> Result<Rid> {
        if record.is_empty() {
            return Err(PageError::EmptyRecord.into());
        }
        if record.len() > MAX_RECORD_SIZE {
            return Err(PageError::RecordTooLarge(record.len()).into());
        }

        for page_no in 0..self.buffer_pool.num_pages(table_id)? {
            let page_id = PageId::new(table_id, page_no);
            let held = self.buffer_pool.holds_lock(txn.id(), page_id);

            let fits = {
                let guard = self.fetch_page(txn, page_id, LockMode::Shared)?;
                let page = guard.read();
                self.page_manager.can_fit(&page.data[..], record.len())
            };
            if !fits {
                // Only looked at, never changed: safe to let go early
                if !held {
                    self.buffer_pool.release_page(txn.id(), page_id);
                }
                continue;
            }

            match self.modify_page(txn, page_id, |data| self.page_manager.insert_record(data, record)) {
                Ok(slot) => return Ok(Rid::new(page_id, slot)),
                Err(DatabaseError::PageError(PageError::InsufficientSpace)) => continue,
                Err(e) => return Err(e),
            }
        }

        let page_id = self.buffer_pool.allocate_page(table_id)?;
        let slot = self.modify_page(txn, page_id, |data| self.page_manager.insert_record(data, record))?;
        Ok(Rid::new(page_id, slot))
    }

    pub fn delete_record(&self, txn: &Transaction, rid: Rid) -> Result<()> {
        self.modify_page(txn, rid.page_id, |data| self.page_manager.delete_record(data, rid.slot))
    }

    pub fn get_record(&self, txn: &Transaction, rid: Rid) -> Result<Vec<u8>> {
        let guard = self.fetch_page(txn, rid.page_id, LockMode::Shared)?;
        let page = guard.read();
        Ok(self.page_manager.get_record(&page.data[..], rid.slot)?)
    }

    /// Every live record of a table, in page and slot order
    pub fn scan_table(&self, txn: &Transaction, table_id: TableId) -> Result<Vec<(Rid, Vec<u8>)>> {
        let mut records = Vec::new();
        for page_no in 0..self.buffer_pool.num_pages(table_id)? {
            let page_id = PageId::new(table_id, page_no);
            let guard = self.fetch_page(txn, page_id, LockMode::Shared)?;
            let page = guard.read();
            for slot in self.page_manager.live_slots(&page.data[..]) {
                let record = self.page_manager.get_record(&page.data[..], slot)?;
                records.push((Rid::new(page_id, slot), record));
            }
        }
        Ok(records)
    }

    /// Append a zeroed page to a table
    pub fn allocate_page(&self, table_id: TableId) -> Result<PageId> {
        Ok(self.buffer_pool.allocate_page(table_id)?)
    }

    /// Write a checkpoint now
    pub fn checkpoint(&self) -> Result<Lsn> {
        Ok(self.checkpoint_manager.create_checkpoint(&self.transaction_manager)?)
    }

    /// Write a checkpoint if the configured interval has passed
    pub fn maybe_checkpoint(&self) -> Result<Option<Lsn>> {
        if !self.checkpoint_manager.checkpoint_needed() {
            return Ok(None);
        }
        self.checkpoint().map(Some)
    }

    /// Force the log, then every dirty page
    pub fn flush_all(&self) -> Result<()> {
        self.log_manager.flush()?;
        self.buffer_pool.flush_all_pages()?;
        self.disk_manager.sync()?;
        Ok(())
    }

    /// Roll back whatever is still running, checkpoint, and close
    pub fn shutdown(self) -> Result<()> {
        for txn_id in self.transaction_manager.active_transaction_ids() {
            if let Ok(txn) = self.transaction_manager.get_transaction(txn_id) {
                warn!("Rolling back transaction {} still active at shutdown", txn_id);
                self.abort(&txn)?;
            }
        }

        self.checkpoint()?;
        self.disk_manager.sync()?;
        info!("Database at {} shut down", self.config.data_dir.display());
        Ok(())
    }

    /// What restart recovery did when this database was opened
    pub fn recovery_summary(&self) -> &RecoverySummary {
        &self.recovery_summary
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.buffer_pool
    }

    pub fn log_manager(&self) -> &Arc<LogManager> {
        &self.log_manager
    }

    pub fn transaction_manager(&self) -> &Arc<TransactionManager> {
        &self.transaction_manager
    }
}

/// Byte ranges where `new` differs from `old`. Runs separated by fewer
/// than `MERGE_GAP` equal bytes are merged.
fn changed_ranges(old: &[u8], new: &[u8]) -> Vec<Range<usize>> {
    let mut ranges: Vec<Range<usize>> = Vec::new();

    for (i, (a, b)) in old.iter().zip(new).enumerate() {
        if a == b {
            continue;
        }
        match ranges.last_mut() {
            Some(last) if i - last.end < MERGE_GAP => last.end = i + 1,
            _ => ranges.push(i..i + 1),
        }
    }
    ranges
}
