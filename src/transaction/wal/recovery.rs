// BasaltDB WAL Crash Recovery
//
// Restart recovery in three passes over the durable log: analysis finds
// the transactions that never finished, redo replays every page change,
// undo rolls the unfinished transactions back with compensation records.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, error, info};
use thiserror::Error;

use crate::common::types::{Lsn, Page, PAGE_SIZE, TxnId};
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::transaction::concurrency::{LockError, TransactionError};
use crate::transaction::wal::log_manager::{LogManager, LogManagerError};
use crate::transaction::wal::log_record::{
    DataOperationContent, LogRecord, LogRecordContent, LogRecordType,
};

/// Error type for recovery operations
#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Log manager error: {0}")]
    LogManagerError(#[from] LogManagerError),

    #[error("Buffer pool error: {0}")]
    BufferPoolError(#[from] BufferPoolError),

    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),

    #[error("Log record {0} does not describe a valid page range")]
    InvalidRecord(Lsn),

    #[error("Transaction cannot commit: {0}")]
    TransactionAborted(LockError),
}

/// Result type for recovery operations
pub type Result<T> = std::result::Result<T, RecoveryError>;

/// Status of a transaction as seen by analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Committed,
    Aborted,
    InProgress,
}

/// What analysis learned about one transaction
#[derive(Debug, Clone)]
pub struct TransactionInfo {
    pub txn_id: TxnId,
    /// LSN of the BEGIN record, 0 if analysis started after it
    pub first_lsn: Lsn,
    /// Most recent record of the transaction
    pub last_lsn: Lsn,
    pub status: TransactionStatus,
}

/// Outcome of a recovery run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoverySummary {
    /// LSN of the checkpoint analysis started from, if any
    pub checkpoint_lsn: Option<Lsn>,
    /// First LSN considered by redo
    pub redo_start_lsn: Lsn,
    /// Page changes replayed
    pub redone: usize,
    /// Transactions rolled back, oldest first
    pub losers: Vec<TxnId>,
    /// Updates undone
    pub undone: usize,
    /// Highest transaction id in the log
    pub max_txn_id: TxnId,
}

/// Overwrite the bytes a page change covers with `image`
pub(crate) fn overwrite_range(page: &mut Page, lsn: Lsn, data: &DataOperationContent, image: &[u8]) -> Result<()> {
    let range = data.range();
    if range.end > PAGE_SIZE || image.len() != range.len() {
        return Err(RecoveryError::InvalidRecord(lsn));
    }
    page.data[range].copy_from_slice(image);
    Ok(())
}

/// Manager for restart recovery
pub struct RecoveryManager {
    log_manager: Arc<LogManager>,
    buffer_pool: Arc<BufferPoolManager>,
    transaction_table: HashMap<TxnId, TransactionInfo>,
}

impl RecoveryManager {
    pub fn new(log_manager: Arc<LogManager>, buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self {
            log_manager,
            buffer_pool,
            transaction_table: HashMap::new(),
        }
    }

    /// Run recovery. Must finish before any transaction starts.
    pub fn recover(&mut self) -> Result<RecoverySummary> {
        info!("Starting database recovery process");
        self.transaction_table.clear();

        let records = self.log_manager.read_all()?;
        let mut summary = RecoverySummary::default();

        if records.is_empty() {
            info!("Log is empty, nothing to recover");
            return Ok(summary);
        }

        if let Err(e) = self.run_passes(&records, &mut summary) {
            error!("Recovery failed: {}", e);
            return Err(e);
        }

        info!(
            "Recovery complete: {} changes redone, {} updates undone, {} transactions rolled back",
            summary.redone,
            summary.undone,
            summary.losers.len()
        );
        Ok(summary)
    }

    fn run_passes(&mut self, records: &[LogRecord], summary: &mut RecoverySummary) -> Result<()> {
        self.analysis_phase(records, summary)?;
        self.redo_phase(records, summary)?;
        self.undo_phase(records, summary)?;

        self.log_manager.flush()?;
        self.buffer_pool.flush_all_pages()?;
        Ok(())
    }

    /// Status of every transaction analysis saw
    pub fn transaction_table(&self) -> &HashMap<TxnId, TransactionInfo> {
        &self.transaction_table
    }

    fn analysis_phase(&mut self, records: &[LogRecord], summary: &mut RecoverySummary) -> Result<()> {
        summary.max_txn_id = records.iter().map(|r| r.txn_id).max().unwrap_or(0);

        let checkpoint = records.iter().rev().find_map(|record| match &record.content {
            LogRecordContent::Checkpoint(content) => Some((record.lsn, content)),
            _ => None,
        });

        summary.redo_start_lsn = records[0].lsn;
        if let Some((checkpoint_lsn, checkpoint)) = checkpoint {
            // The active set is exact as of redo_lsn, so analysis picks up
            // from there rather than from the checkpoint record itself
            summary.checkpoint_lsn = Some(checkpoint_lsn);
            summary.redo_start_lsn = checkpoint.redo_lsn;
            for &txn_id in &checkpoint.active_transactions {
                self.transaction_table.insert(
                    txn_id,
                    TransactionInfo {
                        txn_id,
                        first_lsn: 0,
                        last_lsn: 0,
                        status: TransactionStatus::InProgress,
                    },
                );
            }
            debug!(
                "Analysis starts at checkpoint {} with {} active transactions",
                checkpoint_lsn,
                checkpoint.active_transactions.len()
            );
        }

        for record in records.iter().filter(|r| r.lsn >= summary.redo_start_lsn) {
            if record.record_type == LogRecordType::Checkpoint {
                continue;
            }

            let info = self.transaction_table.entry(record.txn_id).or_insert(TransactionInfo {
                txn_id: record.txn_id,
                first_lsn: 0,
                last_lsn: 0,
                status: TransactionStatus::InProgress,
            });
            info.last_lsn = record.lsn;

            match record.record_type {
                LogRecordType::Begin => info.first_lsn = record.lsn,
                LogRecordType::Commit => info.status = TransactionStatus::Committed,
                LogRecordType::Abort => info.status = TransactionStatus::Aborted,
                _ => {}
            }
        }

        let mut losers: Vec<TxnId> = self
            .transaction_table
            .values()
            .filter(|info| info.status == TransactionStatus::InProgress)
            .map(|info| info.txn_id)
            .collect();
        losers.sort_unstable();
        summary.losers = losers;

        info!(
            "Analysis phase completed: {} transactions, {} to roll back",
            self.transaction_table.len(),
            summary.losers.len()
        );
        Ok(())
    }

    fn redo_phase(&mut self, records: &[LogRecord], summary: &mut RecoverySummary) -> Result<()> {
        info!("Starting redo from LSN {}", summary.redo_start_lsn);

        for record in records.iter().filter(|r| r.lsn >= summary.redo_start_lsn) {
            if !record.record_type.is_page_change() {
                continue;
            }
            let data = record.data().ok_or(RecoveryError::InvalidRecord(record.lsn))?;

            let guard = self.buffer_pool.fetch_page_unlocked(data.page_id)?;
            let mut page = guard.write();
            overwrite_range(&mut page, record.lsn, data, &data.after_image)?;
            self.buffer_pool.mark_dirty(&mut page, record.txn_id, record.lsn);
            summary.redone += 1;
        }

        info!("Redo phase completed: {} changes replayed", summary.redone);
        Ok(())
    }

    fn undo_phase(&mut self, records: &[LogRecord], summary: &mut RecoverySummary) -> Result<()> {
        if summary.losers.is_empty() {
            info!("Undo phase skipped: no transactions to roll back");
            return Ok(());
        }
        info!("Undo phase: rolling back transactions {:?}", summary.losers);

        // Losers whose BEGIN has not been reached yet
        let mut pending: Vec<TxnId> = summary.losers.clone();

        for record in records.iter().rev() {
            if pending.is_empty() {
                break;
            }
            if !pending.contains(&record.txn_id) {
                continue;
            }

            match record.record_type {
                LogRecordType::Begin => pending.retain(|&t| t != record.txn_id),
                // Compensations are redone already; the update they undo is
                // undone again below, which writes the same bytes.
                LogRecordType::Update => {
                    self.undo_update(record)?;
                    summary.undone += 1;
                }
                _ => {}
            }
        }

        for &txn_id in &summary.losers {
            let prev_lsn = self.transaction_table.get(&txn_id).map_or(0, |info| info.last_lsn);
            let lsn = self.log_manager.append_log_record(
                txn_id,
                prev_lsn,
                LogRecordType::Abort,
                LogRecordContent::transaction_now(),
            )?;
            if let Some(info) = self.transaction_table.get_mut(&txn_id) {
                info.last_lsn = lsn;
                info.status = TransactionStatus::Aborted;
            }
            debug!("Rolled back transaction {}", txn_id);
        }
        self.log_manager.flush()?;

        info!("Undo phase completed: {} updates undone", summary.undone);
        Ok(())
    }

    fn undo_update(&mut self, record: &LogRecord) -> Result<()> {
        let data = record.data().ok_or(RecoveryError::InvalidRecord(record.lsn))?;
        let prev_lsn = self.transaction_table.get(&record.txn_id).map_or(0, |info| info.last_lsn);

        let guard = self.buffer_pool.fetch_page_unlocked(data.page_id)?;
        let mut page = guard.write();

        let clr_lsn = self.log_manager.append_log_record(
            record.txn_id,
            prev_lsn,
            LogRecordType::CompensationUpdate,
            LogRecordContent::Data(DataOperationContent {
                page_id: data.page_id,
                offset: data.offset,
                before_image: data.after_image.clone(),
                after_image: data.before_image.clone(),
            }),
        )?;
        overwrite_range(&mut page, record.lsn, data, &data.before_image)?;
        self.buffer_pool.mark_dirty(&mut page, record.txn_id, clr_lsn);

        if let Some(info) = self.transaction_table.get_mut(&record.txn_id) {
            info.last_lsn = clr_lsn;
        }
        debug!("Undid LSN {} of transaction {} on page {}", record.lsn, record.txn_id, data.page_id);
        Ok(())
    }
}
