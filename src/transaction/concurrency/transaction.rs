// BasaltDB Transaction implementation
// Represents an active database transaction

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Lsn, PageId, TxnId};
use crate::transaction::wal::log_manager::{LogManager, LogManagerError};
use crate::transaction::wal::log_record::{DataOperationContent, LogRecordContent, LogRecordType};

/// Transaction states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

/// Errors that can occur during transaction processing
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Transaction {0} is already committed or aborted")]
    InvalidState(TxnId),

    #[error("Transaction {0} is not active")]
    NotFound(TxnId),

    #[error("Failed to write to WAL: {0}")]
    LogError(#[from] LogManagerError),
}

/// Result type for transaction operations
pub type Result<T> = std::result::Result<T, TransactionError>;

/// A running transaction and the tail of its log chain
pub struct Transaction {
    id: TxnId,
    state: Mutex<TransactionState>,
    log_manager: Arc<LogManager>,
    /// LSN of the BEGIN record
    first_lsn: AtomicU64,
    /// LSN of the most recent record; the next record points back to it
    last_lsn: AtomicU64,
}

impl Transaction {
    pub fn new(txn_id: TxnId, log_manager: Arc<LogManager>) -> Self {
        Self {
            id: txn_id,
            state: Mutex::new(TransactionState::Active),
            log_manager,
            first_lsn: AtomicU64::new(0),
            last_lsn: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn first_lsn(&self) -> Lsn {
        self.first_lsn.load(Ordering::SeqCst)
    }

    pub fn last_lsn(&self) -> Lsn {
        self.last_lsn.load(Ordering::SeqCst)
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state() != TransactionState::Active {
            return Err(TransactionError::InvalidState(self.id));
        }
        Ok(())
    }

    fn append(&self, record_type: LogRecordType, content: LogRecordContent) -> Result<Lsn> {
        let lsn = self.log_manager.append_log_record(self.id, self.last_lsn(), record_type, content)?;
        self.last_lsn.store(lsn, Ordering::SeqCst);
        Ok(lsn)
    }

    /// Write the BEGIN record
    pub fn begin(&self) -> Result<Lsn> {
        let lsn = self.append(LogRecordType::Begin, LogRecordContent::transaction_now())?;
        self.first_lsn.store(lsn, Ordering::SeqCst);
        Ok(lsn)
    }

    /// Log a byte-range change to a page
    pub fn log_update(&self, page_id: PageId, offset: u32, before: &[u8], after: &[u8]) -> Result<Lsn> {
        self.ensure_active()?;
        self.append(LogRecordType::Update, data_content(page_id, offset, before, after))
    }

    /// Log the restoration of an undone change. Allowed while the
    /// transaction is rolling back.
    pub fn log_compensation(&self, page_id: PageId, offset: u32, before: &[u8], after: &[u8]) -> Result<Lsn> {
        self.append(LogRecordType::CompensationUpdate, data_content(page_id, offset, before, after))
    }

    /// Write the COMMIT record. Durability is up to the caller's flush.
    pub fn commit(&self) -> Result<Lsn> {
        self.ensure_active()?;
        let lsn = self.append(LogRecordType::Commit, LogRecordContent::transaction_now())?;
        *self.state.lock() = TransactionState::Committed;
        Ok(lsn)
    }

    /// Write the ABORT record once rollback is complete
    pub fn abort(&self) -> Result<Lsn> {
        self.ensure_active()?;
        let lsn = self.append(LogRecordType::Abort, LogRecordContent::transaction_now())?;
        *self.state.lock() = TransactionState::Aborted;
        Ok(lsn)
    }
}

fn data_content(page_id: PageId, offset: u32, before: &[u8], after: &[u8]) -> LogRecordContent {
    LogRecordContent::Data(DataOperationContent {
        page_id,
        offset,
        before_image: before.to_vec(),
        after_image: after.to_vec(),
    })
}
