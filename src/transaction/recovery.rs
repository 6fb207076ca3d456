// BasaltDB Transaction Recovery Module
//
// Commit and abort protocols, and the entry point to restart recovery.

use std::sync::Arc;

use log::{debug, error, info};

use crate::common::types::Lsn;
use crate::storage::buffer::BufferPoolManager;
use crate::transaction::concurrency::{Transaction, TransactionError, TransactionManager, TransactionState};
use crate::transaction::wal::log_manager::LogManager;
use crate::transaction::wal::log_record::{LogRecord, LogRecordType};
use crate::transaction::wal::recovery::{overwrite_range, RecoveryError, RecoveryManager, RecoverySummary, Result};

/// Drives transaction end: forces the log on commit, rolls changes back
/// from the log on abort, then hands the locks back.
pub struct TransactionRecoveryManager {
    log_manager: Arc<LogManager>,
    buffer_pool: Arc<BufferPoolManager>,
    transaction_manager: Arc<TransactionManager>,
}

impl TransactionRecoveryManager {
    pub fn new(
        log_manager: Arc<LogManager>,
        buffer_pool: Arc<BufferPoolManager>,
        transaction_manager: Arc<TransactionManager>,
    ) -> Self {
        Self {
            log_manager,
            buffer_pool,
            transaction_manager,
        }
    }

    /// Commit: the transaction is durable once its COMMIT record is on
    /// disk. Dirty pages stay in the cache until eviction or a checkpoint.
    ///
    /// A transaction the lock manager told to abort (deadlock victim or
    /// timed-out waiter) is refused before anything is logged; it must be
    /// rolled back with `abort`.
    pub fn commit(&self, txn: &Transaction) -> Result<Lsn> {
        let lock_manager = self.buffer_pool.lock_manager();
        if let Some(verdict) = lock_manager.abort_verdict(txn.id()) {
            return Err(RecoveryError::TransactionAborted(verdict));
        }

        let result = self.force_commit(txn);
        // Locks go back even when the log could not be forced. A failed log
        // accepts no further records, so no later transaction commits and
        // restart recovery settles this one.
        lock_manager.release_all(txn.id());
        match &result {
            Ok(lsn) => debug!("Committed transaction {} at LSN {}", txn.id(), lsn),
            Err(e) => error!("Commit of transaction {} failed: {}", txn.id(), e),
        }
        result
    }

    fn force_commit(&self, txn: &Transaction) -> Result<Lsn> {
        let commit_lsn = self.transaction_manager.end_transaction(txn.id(), || txn.commit())?;
        self.log_manager.flush_till_lsn(commit_lsn)?;
        self.buffer_pool.refresh_before_images(txn.id())?;
        Ok(commit_lsn)
    }

    /// Abort: undo every update of the transaction, newest first, following
    /// its `prev_lsn` chain, then write the ABORT record and release locks.
    /// Pages evicted mid-transaction are read back and restored.
    pub fn abort(&self, txn: &Transaction) -> Result<Lsn> {
        if txn.state() != TransactionState::Active {
            return Err(TransactionError::InvalidState(txn.id()).into());
        }

        let result = self.roll_back(txn);
        // Same rule as commit: a failed rollback leaves the outcome to restart
        self.buffer_pool.lock_manager().release_all(txn.id());
        if let Err(e) = &result {
            error!("Rollback of transaction {} failed: {}", txn.id(), e);
        }
        result
    }

    fn roll_back(&self, txn: &Transaction) -> Result<Lsn> {
        let mut undone = 0;
        let mut lsn = txn.last_lsn();
        while lsn != 0 {
            let record = self.log_manager.read_record(lsn)?;
            if record.txn_id != txn.id() {
                return Err(RecoveryError::InvalidRecord(lsn));
            }
            if record.record_type == LogRecordType::Update {
                self.undo_update(txn, &record)?;
                undone += 1;
            }
            lsn = record.prev_lsn;
        }

        let abort_lsn = self.transaction_manager.end_transaction(txn.id(), || txn.abort())?;
        self.log_manager.flush_till_lsn(abort_lsn)?;
        info!("Rolled back transaction {} ({} updates undone)", txn.id(), undone);
        Ok(abort_lsn)
    }

    fn undo_update(&self, txn: &Transaction, record: &LogRecord) -> Result<()> {
        let data = record.data().ok_or(RecoveryError::InvalidRecord(record.lsn))?;

        // The transaction still holds the exclusive lock on this page
        let guard = self.buffer_pool.fetch_page_unlocked(data.page_id)?;
        let mut page = guard.write();

        let clr_lsn = txn.log_compensation(data.page_id, data.offset, &data.after_image, &data.before_image)?;
        overwrite_range(&mut page, record.lsn, data, &data.before_image)?;
        self.buffer_pool.mark_dirty(&mut page, txn.id(), clr_lsn);
        Ok(())
    }

    /// Run restart recovery. No transaction may be running.
    pub fn recover(&self) -> Result<RecoverySummary> {
        RecoveryManager::new(self.log_manager.clone(), self.buffer_pool.clone()).recover()
    }
}
